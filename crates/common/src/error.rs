//! Configuration-level error types

use thiserror::Error;

/// Errors raised while assembling the process configuration.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Missing required environment variables: {}", .0.join(", "))]
    MissingEnv(Vec<String>),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
}

/// Result alias using common Error
pub type Result<T> = std::result::Result<T, Error>;
