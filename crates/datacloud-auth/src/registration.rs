//! Connected-app registration
//!
//! The client id/secret, the identity provider base URL and the callback URL
//! are fixed at startup and never change for the lifetime of the process.

use common::Secret;
use url::Url;

use crate::constants::{AUTHORIZE_PATH, DEFAULT_SCOPES, TOKEN_PATH};
use crate::error::{Error, Result};

/// Immutable OAuth client registration.
#[derive(Debug, Clone)]
pub struct ClientRegistration {
    pub client_id: String,
    pub client_secret: Secret<String>,
    /// Bare host (`login.salesforce.com`) or full base URL
    /// (`https://test.salesforce.com`, `http://127.0.0.1:8080`).
    pub login_url: String,
    pub callback_url: String,
    pub scopes: Vec<String>,
}

impl ClientRegistration {
    /// Registration requesting the default scope set.
    pub fn new(
        client_id: impl Into<String>,
        client_secret: impl Into<Secret<String>>,
        login_url: impl Into<String>,
        callback_url: impl Into<String>,
    ) -> Self {
        Self {
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            login_url: login_url.into(),
            callback_url: callback_url.into(),
            scopes: DEFAULT_SCOPES.iter().map(|s| s.to_string()).collect(),
        }
    }

    pub fn with_scopes(mut self, scopes: Vec<String>) -> Self {
        self.scopes = scopes;
        self
    }

    /// Base URL of the identity provider, without trailing slash.
    pub fn login_base(&self) -> String {
        let trimmed = self.login_url.trim().trim_end_matches('/');
        if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
            trimmed.to_string()
        } else {
            format!("https://{trimmed}")
        }
    }

    pub fn authorize_endpoint(&self) -> String {
        format!("{}{AUTHORIZE_PATH}", self.login_base())
    }

    pub fn token_endpoint(&self) -> String {
        format!("{}{TOKEN_PATH}", self.login_base())
    }

    /// Parsed callback URL. Must be absolute http(s) with a host.
    pub fn callback(&self) -> Result<Url> {
        let url = Url::parse(&self.callback_url).map_err(|e| {
            Error::Registration(format!("callback_url {:?} is not a URL: {e}", self.callback_url))
        })?;
        if url.scheme() != "http" && url.scheme() != "https" {
            return Err(Error::Registration(format!(
                "callback_url must use http or https, got: {}",
                url.scheme()
            )));
        }
        if url.host_str().is_none() {
            return Err(Error::Registration(format!(
                "callback_url has no host: {}",
                self.callback_url
            )));
        }
        Ok(url)
    }

    /// Port the callback listener binds. Explicit port, else the scheme default.
    pub fn callback_port(&self) -> Result<u16> {
        self.callback()?
            .port_or_known_default()
            .ok_or_else(|| Error::Registration("callback_url has no usable port".into()))
    }

    /// Check everything that can be checked without the network.
    pub fn validate(&self) -> Result<()> {
        if self.client_id.trim().is_empty() {
            return Err(Error::Registration("client_id is empty".into()));
        }
        if self.client_secret.expose().trim().is_empty() {
            return Err(Error::Registration("client_secret is empty".into()));
        }
        if self.login_url.trim().is_empty() {
            return Err(Error::Registration("login_url is empty".into()));
        }
        Url::parse(&self.login_base()).map_err(|e| {
            Error::Registration(format!("login_url {:?} is not usable: {e}", self.login_url))
        })?;
        if self.scopes.is_empty() {
            return Err(Error::Registration("at least one scope is required".into()));
        }
        self.callback_port()?;
        Ok(())
    }
}
