use std::error::Error as StdError;

use thiserror::Error;
use tn_types::InvalidAddressError;

use crate::forwarding::TunnelOutcome;

/// Boxed transport/auth failure carried inside session and dial errors.
pub type BoxError = Box<dyn StdError + Send + Sync + 'static>;

/// Errors that can occur while establishing sessions and forwarding traffic.
///
/// Each variant is scoped to the unit it is fatal for: an address or session
/// error takes down the tunnels that depend on it, a bind error one tunnel and
/// a dial error one connection. Mid-stream relay failures are never returned;
/// they are reported as [`crate::events::RelayFailure`]s.
#[derive(Error, Debug)]
pub enum SshCoreError {
    /// Malformed endpoint address
    #[error(transparent)]
    InvalidAddress(#[from] InvalidAddressError),

    /// Handshake, authentication or host-key verification against a jump node failed
    #[error("failed to establish session with jump node {jump}: {source}")]
    SessionEstablishment {
        jump: String,
        #[source]
        source: BoxError,
    },

    /// Local listener could not be bound
    #[error("failed to bind {address}: {source}")]
    BindFailed {
        address: String,
        #[source]
        source: std::io::Error,
    },

    /// Target could not be reached through an otherwise healthy session
    #[error("failed to dial {target} via {jump}: {source}")]
    DialFailed {
        target: String,
        jump: String,
        #[source]
        source: BoxError,
    },

    /// Nothing is left listening; carries why each tunnel stopped
    #[error("no tunnels are running: {}", describe_outcomes(.0))]
    NoTunnels(Vec<TunnelOutcome>),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// SSH protocol error
    #[error("SSH protocol error: {0}")]
    Ssh(#[from] russh::Error),

    /// Generic error with context
    #[error("{0}")]
    Other(String),
}

/// Result type alias for SSH core operations
pub type SshResult<T> = Result<T, SshCoreError>;

impl SshCoreError {
    /// Wrap a connector failure for the named jump node.
    pub fn session(jump: impl Into<String>, source: impl Into<BoxError>) -> Self {
        Self::SessionEstablishment {
            jump: jump.into(),
            source: source.into(),
        }
    }

    /// Wrap a dial failure, unwrapping an inner `DialFailed` so the context is not repeated.
    pub fn dial(target: impl Into<String>, jump: impl Into<String>, source: SshCoreError) -> Self {
        match source {
            already @ SshCoreError::DialFailed { .. } => already,
            other => Self::DialFailed {
                target: target.into(),
                jump: jump.into(),
                source: Box::new(other),
            },
        }
    }
}

fn describe_outcomes(outcomes: &[TunnelOutcome]) -> String {
    if outcomes.is_empty() {
        return "none configured".to_string();
    }
    outcomes
        .iter()
        .map(|outcome| format!("[{}] {}", outcome.label, outcome.reason))
        .collect::<Vec<_>>()
        .join("; ")
}
