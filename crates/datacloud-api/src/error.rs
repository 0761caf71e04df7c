//! Error types for Data Cloud API calls

use datacloud_session::Error as SessionError;

/// Errors from Data Cloud API operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Session(#[from] SessionError),

    #[error("Data Cloud API error {status} {reason}: {message}")]
    Api {
        status: u16,
        reason: String,
        message: String,
    },

    #[error("query ID not returned by the API")]
    MissingQueryId,

    #[error("expected rows at offset {offset}, but received 0")]
    MissingRows { offset: usize },

    #[error("query did not finish within {}s", .0.as_secs())]
    QueryTimeout(std::time::Duration),

    #[error("invalid response from Data Cloud: {0}")]
    Decode(String),

    #[error("field suggestion failed: {0}")]
    Suggestion(String),
}

/// Result alias for Data Cloud API operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Human-readable message from a Connect API error body.
///
/// Connect API errors are a list whose first element carries a `message`. That
/// message is often itself JSON with `primaryMessage` and `customerHint`.
/// Anything that does not fit this shape is returned verbatim.
pub fn describe_error_body(body: &str) -> String {
    let Ok(serde_json::Value::Array(items)) = serde_json::from_str::<serde_json::Value>(body) else {
        return body.to_string();
    };
    let Some(inner) = items
        .first()
        .and_then(|item| item.get("message"))
        .and_then(|message| message.as_str())
    else {
        return body.to_string();
    };

    match serde_json::from_str::<serde_json::Value>(inner) {
        Ok(details) => {
            let primary = details.get("primaryMessage").and_then(|v| v.as_str());
            let hint = details.get("customerHint").and_then(|v| v.as_str());
            match (primary, hint) {
                (Some(primary), Some(hint)) => format!("{primary}, Hint: {hint}"),
                (Some(primary), None) => primary.to_string(),
                _ => inner.to_string(),
            }
        }
        Err(_) => inner.to_string(),
    }
}
