//! Service-specific error types

use thiserror::Error;

/// Failures of a single tool invocation.
///
/// `InvalidParams` and `UnknownTool` are protocol errors (JSON-RPC -32602).
/// Everything else is reported to the client as a tool result with
/// `isError: true`, so the model can read the message and react.
#[derive(Error, Debug)]
pub enum Error {
    #[error("unknown tool: {0}")]
    UnknownTool(String),

    #[error("invalid arguments: {0}")]
    InvalidParams(String),

    #[error(transparent)]
    DataCloud(#[from] datacloud_api::Error),
}

impl Error {
    pub fn is_protocol_error(&self) -> bool {
        matches!(self, Error::UnknownTool(_) | Error::InvalidParams(_))
    }
}

/// Result alias using service Error
pub type Result<T> = std::result::Result<T, Error>;
