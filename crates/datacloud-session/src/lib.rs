//! Authenticated session for the Salesforce Data Cloud API
//!
//! Ties the auth building blocks together: the OAuth flow controller decides
//! between the stored token, a refresh, and an interactive login; the gateway
//! attaches the token to data API calls and recovers from a single 401.
//!
//! Token lifecycle:
//! 1. First tool call finds the store empty → browser login → credential stored
//! 2. Later calls reuse the credential until it is within the safety margin
//! 3. Background task refreshes ahead of expiry
//! 4. Data API 401 → credential marked stale → refresh → one retry
//! 5. Second 401, or a revoked refresh token → store cleared → next call logs in

pub mod controller;
pub mod error;
pub mod gateway;
pub mod refresh;

#[cfg(test)]
mod testing;

pub use controller::OAuthController;
pub use error::{Error, Result};
pub use gateway::{ApiRequest, Gateway};
pub use refresh::spawn_refresh_task;
