use std::{
    env,
    path::{Path, PathBuf},
    sync::Arc,
};

// Internal Result type alias
type Result<T> = crate::ClientResult<T>;
use russh::{
    client::{self, AuthResult},
    keys::{self, HashAlg, PrivateKeyWithHashAlg},
};
use secrecy::{ExposeSecret, SecretString};
use ssh_core::session::SessionHandle;
use tn_types::ssh::Credential;
use tracing::{debug, info, warn};

use crate::ClientError;

/// Authentication material resolved from a [`Credential`], ready to present.
#[derive(Clone)]
pub enum LoadedCredential {
    PrivateKey(Arc<keys::PrivateKey>),
    Password(SecretString),
}

impl LoadedCredential {
    fn label(&self) -> &'static str {
        match self {
            LoadedCredential::PrivateKey(_) => "publickey",
            LoadedCredential::Password(_) => "password",
        }
    }
}

impl std::fmt::Debug for LoadedCredential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LoadedCredential::PrivateKey(key) => f
                .debug_tuple("PrivateKey")
                .field(&key.public_key().fingerprint(HashAlg::Sha256).to_string())
                .finish(),
            LoadedCredential::Password(_) => f.write_str("Password(<redacted>)"),
        }
    }
}

/// Read key files and environment variables named by `credential`.
///
/// Runs once at startup so a missing key or variable fails before any
/// connection is attempted.
pub fn load_credential(credential: &Credential) -> Result<LoadedCredential> {
    match credential {
        Credential::PrivateKeyFile { path, passphrase_env } => {
            let path = expand_home(path);
            let passphrase = passphrase_env.as_deref().map(read_secret_env).transpose()?;
            let key = load_private_key(&path, passphrase.as_ref())?;
            debug!(path = %path.display(), algorithm = %key.algorithm(), "loaded private key");
            Ok(LoadedCredential::PrivateKey(Arc::new(key)))
        }
        Credential::PasswordEnv { variable } => Ok(LoadedCredential::Password(read_secret_env(variable)?)),
    }
}

fn load_private_key(path: &Path, passphrase: Option<&SecretString>) -> Result<keys::PrivateKey> {
    if !path.is_file() {
        return Err(ClientError::Credential(format!("private key {} does not exist", path.display())));
    }
    match keys::load_secret_key(path, passphrase.map(|secret| secret.expose_secret())) {
        Ok(key) => Ok(key),
        Err(keys::Error::KeyIsEncrypted) => Err(ClientError::Credential(format!(
            "{} is encrypted; set passphrase_env to the variable holding its passphrase",
            path.display()
        ))),
        Err(err) => Err(ClientError::Crypto(format!("failed to load {}: {err}", path.display()))),
    }
}

fn read_secret_env(variable: &str) -> Result<SecretString> {
    match env::var(variable) {
        Ok(value) if !value.is_empty() => Ok(SecretString::from(value)),
        Ok(_) => Err(ClientError::Credential(format!("environment variable {variable} is empty"))),
        Err(_) => Err(ClientError::Credential(format!("environment variable {variable} is not set"))),
    }
}

/// Expand a leading `~/` against `$HOME`.
pub(crate) fn expand_home(path: &Path) -> PathBuf {
    if let Ok(rest) = path.strip_prefix("~")
        && let Some(home) = env::var_os("HOME")
    {
        return PathBuf::from(home).join(rest);
    }
    path.to_path_buf()
}

pub async fn authenticate<H>(session: &mut SessionHandle<H>, username: &str, credential: &LoadedCredential) -> Result<()>
where
    H: client::Handler + Send,
{
    let label = credential.label();
    let result = match credential {
        LoadedCredential::PrivateKey(key) => {
            let rsa_hash_hint = session.best_supported_rsa_hash().await.unwrap_or(None).flatten();
            let hash_alg = if key.algorithm().is_rsa() { rsa_hash_hint } else { None };
            debug!(key = ?key.algorithm(), "attempting public-key auth");
            session
                .authenticate_publickey(username.to_string(), PrivateKeyWithHashAlg::new(key.clone(), hash_alg))
                .await?
        }
        LoadedCredential::Password(password) => {
            session
                .authenticate_password(username.to_string(), password.expose_secret().to_string())
                .await?
        }
    };

    match result {
        AuthResult::Success => {
            info!(method = label, "authentication succeeded");
            Ok(())
        }
        AuthResult::Failure { .. } => {
            warn!(method = label, "authentication rejected by server");
            Err(ClientError::AuthFailed(format!("{label} authentication for {username} was rejected")))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expand_home_only_touches_tilde_prefix() {
        assert_eq!(expand_home(Path::new("/keys/id")), PathBuf::from("/keys/id"));
        assert_eq!(expand_home(Path::new("keys/~id")), PathBuf::from("keys/~id"));
        if let Some(home) = env::var_os("HOME") {
            assert_eq!(expand_home(Path::new("~/.ssh/id")), PathBuf::from(home).join(".ssh/id"));
        }
    }

    #[test]
    fn missing_environment_variable_is_reported_by_name() {
        let err = read_secret_env("TOONELS_TEST_SURELY_UNSET_VARIABLE").unwrap_err();
        assert!(err.to_string().contains("TOONELS_TEST_SURELY_UNSET_VARIABLE"), "{err}");
    }

    #[test]
    fn missing_key_file_is_a_credential_error() {
        let err = load_private_key(Path::new("/definitely/not/a/key"), None).unwrap_err();
        assert!(matches!(err, ClientError::Credential(_)), "{err:?}");
    }
}
