use thiserror::Error;

/// Errors that can occur in client-core operations
#[derive(Error, Debug)]
pub enum ClientError {
    /// SSH error
    #[error("SSH error: {0}")]
    Ssh(#[from] russh::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Credential could not be loaded
    #[error("credential error: {0}")]
    Credential(String),

    /// Authentication failed
    #[error("authentication failed: {0}")]
    AuthFailed(String),

    /// Host key verification failed
    #[error("host key verification failed: {0}")]
    HostKeyFailed(String),

    /// Cryptographic error
    #[error("cryptographic error: {0}")]
    Crypto(String),

    /// Connect or authentication did not finish in time
    #[error("timed out: {0}")]
    Timeout(String),
}

/// Result type alias for client-core operations
pub type ClientResult<T> = Result<T, ClientError>;
