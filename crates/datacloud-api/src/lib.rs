//! Salesforce Data Cloud API client
//!
//! SQL execution over the Query Connect API, catalog lookups built on it, and
//! field suggestions from the focus service. Authentication is delegated to
//! `datacloud_session::Gateway`.

pub mod client;
pub mod error;
pub mod types;

pub use client::{ClientOptions, DataCloudClient};
pub use error::{Error, Result, describe_error_body};
pub use types::{FieldSuggestion, QueryResult, SqlParameter};
