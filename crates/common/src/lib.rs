//! Shared types for the Data Cloud MCP bridge
//!
//! Everything here is free of network and runtime concerns so that both the
//! auth library and the service binary can depend on it.

mod error;
mod secret;

pub use error::{Error, Result};
pub use secret::Secret;
