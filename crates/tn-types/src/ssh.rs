//! Jump node and tunnel descriptors.
//!
//! These structs are what the configuration loader produces and what the SSH
//! client layer and the forwarding engine consume. They carry no protocol
//! state; live sessions and listeners are runtime objects owned elsewhere.

use std::{fmt, path::PathBuf};

use crate::net::EndpointAddress;

/// How the server's host key is checked during the handshake.
///
/// There is deliberately no `Default`: every jump node has to pick one.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum HostKeyPolicy {
    /// Accept whatever key the server presents. Insecure; only reachable through
    /// an explicit `insecure_ignore_host_key: true` in the configuration.
    AcceptAny,
    /// Accept only a key whose SHA-256 fingerprint matches (`SHA256:...`).
    Fingerprint(String),
    /// Accept only this exact OpenSSH public key (`ssh-ed25519 AAAA...`).
    PublicKey(String),
}

impl HostKeyPolicy {
    pub fn describe(&self) -> &'static str {
        match self {
            HostKeyPolicy::AcceptAny => "accept-any (insecure)",
            HostKeyPolicy::Fingerprint(_) => "pinned fingerprint",
            HostKeyPolicy::PublicKey(_) => "pinned public key",
        }
    }
}

/// Authentication material for a jump node.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Credential {
    /// Private key file; the passphrase, if any, is read from `passphrase_env`.
    PrivateKeyFile {
        path: PathBuf,
        passphrase_env: Option<String>,
    },
    /// Password read from the named environment variable.
    PasswordEnv { variable: String },
}

/// One upstream SSH server through which targets are dialed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct JumpNode {
    /// Unique name used in logs and error messages.
    pub name: String,
    pub address: EndpointAddress,
    pub username: String,
    pub credential: Credential,
    pub host_key: HostKeyPolicy,
}

impl fmt::Display for JumpNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.name == self.address.to_string() {
            write!(f, "{}@{}", self.username, self.address)
        } else {
            write!(f, "{} ({}@{})", self.name, self.username, self.address)
        }
    }
}

/// A local listen address forwarded to a remote target through a named jump node.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TunnelSpec {
    /// Name of the [`JumpNode`] this tunnel dials through.
    pub jump: String,
    pub local: EndpointAddress,
    pub target: EndpointAddress,
}

impl TunnelSpec {
    /// `local -> jump -> target`, the form used in every log line about this tunnel.
    pub fn label(&self) -> String {
        format!("{} -> {} -> {}", self.local, self.jump, self.target)
    }
}
