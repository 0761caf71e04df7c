//! Error types for authenticated session operations

/// Errors from the flow controller and the request gateway.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Auth(#[from] datacloud_auth::Error),

    #[error("data API request failed: {0}")]
    Http(String),
}

impl Error {
    /// The underlying auth error, if this failure came from authentication.
    pub fn as_auth(&self) -> Option<&datacloud_auth::Error> {
        match self {
            Error::Auth(e) => Some(e),
            Error::Http(_) => None,
        }
    }
}

/// Result alias for session operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auth_errors_keep_their_message() {
        let err: Error = datacloud_auth::Error::Rejected("401 twice".into()).into();
        assert_eq!(
            err.to_string(),
            "authorization rejected after token refresh: 401 twice"
        );
        assert!(matches!(
            err.as_auth(),
            Some(datacloud_auth::Error::Rejected(_))
        ));
    }

    #[test]
    fn http_errors_are_not_auth_errors() {
        let err = Error::Http("connection refused".into());
        assert!(err.as_auth().is_none());
        assert_eq!(err.to_string(), "data API request failed: connection refused");
    }
}
