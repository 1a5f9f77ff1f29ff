use std::sync::Arc;

// Internal Result type alias
type Result<T> = crate::ClientResult<T>;
use russh::keys::{HashAlg, PublicKey};
use tn_types::ssh::HostKeyPolicy;
use tracing::{info, warn};

use crate::ClientError;

enum Expected {
    Any,
    Fingerprint(String),
    Key(PublicKey),
}

/// Checks the key a jump node presents against its configured policy.
pub struct HostKeyVerifier {
    authority: String,
    expected: Expected,
}

impl HostKeyVerifier {
    /// Parse the pinned key or fingerprint up front so a typo fails at startup.
    pub fn new(authority: impl Into<String>, policy: &HostKeyPolicy) -> Result<Self> {
        let authority = authority.into();
        let expected = match policy {
            HostKeyPolicy::AcceptAny => Expected::Any,
            HostKeyPolicy::Fingerprint(fingerprint) => {
                let Some(digest) = fingerprint.strip_prefix("SHA256:") else {
                    return Err(ClientError::HostKeyFailed(format!(
                        "pinned fingerprint for {authority} must start with SHA256:"
                    )));
                };
                Expected::Fingerprint(normalize(digest))
            }
            HostKeyPolicy::PublicKey(key) => Expected::Key(PublicKey::from_openssh(key).map_err(|err| {
                ClientError::Crypto(format!("invalid server_public_key for {authority}: {err}"))
            })?),
        };
        Ok(Self { authority, expected })
    }

    pub fn check(&self, server_key: &PublicKey) -> Result<bool> {
        let presented = server_key.fingerprint(HashAlg::Sha256).to_string();
        match &self.expected {
            Expected::Any => {
                warn!(
                    authority = %self.authority,
                    fingerprint = %presented,
                    "accepting host key without verification (insecure_ignore_host_key)"
                );
                Ok(true)
            }
            Expected::Fingerprint(digest) => {
                if presented.strip_prefix("SHA256:").map(normalize).as_deref() == Some(digest.as_str()) {
                    info!("host key for {} verified against pinned fingerprint", self.authority);
                    return Ok(true);
                }
                Err(self.mismatch(&format!("SHA256:{digest}"), &presented))
            }
            Expected::Key(pinned) => {
                if pinned.key_data() == server_key.key_data() {
                    info!("host key for {} verified against pinned public key", self.authority);
                    return Ok(true);
                }
                let pinned_fp = pinned.fingerprint(HashAlg::Sha256).to_string();
                Err(self.mismatch(&pinned_fp, &presented))
            }
        }
    }

    fn mismatch(&self, pinned: &str, presented: &str) -> ClientError {
        ClientError::HostKeyFailed(format!(
            "host key mismatch for {} (pinned {} vs received {})",
            self.authority, pinned, presented
        ))
    }
}

/// Base64 digests are compared without trailing padding.
fn normalize(digest: &str) -> String {
    digest.trim().trim_end_matches('=').to_string()
}

#[derive(Clone)]
pub struct ClientHandler {
    verifier: Arc<HostKeyVerifier>,
}

impl ClientHandler {
    pub fn new(verifier: Arc<HostKeyVerifier>) -> Self {
        Self { verifier }
    }
}

impl russh::client::Handler for ClientHandler {
    type Error = crate::ClientError;

    fn check_server_key(
        &mut self,
        server_public_key: &PublicKey,
    ) -> impl std::future::Future<Output = std::result::Result<bool, Self::Error>> + Send {
        let verdict = self.verifier.check(server_public_key);
        async move { verdict }
    }
}
