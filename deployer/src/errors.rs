//! Error types for the deployer

use thiserror::Error;

/// Main error type for the deployer
#[derive(Error, Debug)]
pub enum DeployerError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("{0}")]
    Unauthorized(String),

    #[error("rate limit exceeded")]
    RateLimited,

    #[error("{0}")]
    InvalidRequest(String),

    #[error("stack not found: {0}")]
    StackNotFound(String),

    #[error("stack has no running services: {0}")]
    StackNotRunning(String),

    #[error("Secret store authentication failed: {0}")]
    SecretStoreAuth(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Server error: {0}")]
    Server(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Errors raised at the secret store boundary
#[derive(Error, Debug)]
pub enum SecretStoreError {
    /// The store rejected the role credentials
    #[error("authentication rejected: {0}")]
    Auth(String),

    /// The store could not be reached or answered with an unexpected status
    #[error("secret store unavailable: {0}")]
    Unavailable(String),

    /// The store answered with a body we could not interpret
    #[error("invalid secret store response: {0}")]
    InvalidResponse(String),
}

impl From<reqwest::Error> for SecretStoreError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            SecretStoreError::InvalidResponse(err.to_string())
        } else {
            SecretStoreError::Unavailable(err.to_string())
        }
    }
}
