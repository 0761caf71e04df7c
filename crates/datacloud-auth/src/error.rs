//! Error taxonomy for authentication
//!
//! Callers branch on these variants: `Transient` and `Revoked` are absorbed by
//! the flow controller, everything else reaches the tool invocation.

use std::time::Duration;

/// Errors from OAuth authentication operations.
///
/// `Clone` so that callers waiting on an in-flight exchange can receive the
/// same failure the exchanging caller saw.
#[derive(Debug, Clone, thiserror::Error)]
pub enum Error {
    #[error("OAuth state mismatch: callback does not belong to this login attempt")]
    StateMismatch,

    #[error("no OAuth callback received within {}s", .0.as_secs())]
    Timeout(Duration),

    #[error("transient token endpoint failure: {0}")]
    Transient(String),

    #[error("refresh token rejected: {0}")]
    Revoked(String),

    #[error("authorization rejected after token refresh: {0}")]
    Rejected(String),

    #[error("authorization denied by identity provider: {0}")]
    Denied(String),

    #[error("token exchange failed: {0}")]
    Exchange(String),

    #[error("callback listener error: {0}")]
    Callback(String),

    #[error("invalid client registration: {0}")]
    Registration(String),

    #[error("credential parse error: {0}")]
    CredentialParse(String),

    #[error("I/O error: {0}")]
    Io(String),
}

impl Error {
    /// Whether a fresh attempt may succeed without operator intervention.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Transient(_) | Error::Timeout(_))
    }
}

/// Result alias for auth operations.
pub type Result<T> = std::result::Result<T, Error>;
