//! Authenticated request gateway
//!
//! Wraps every data API call: attaches the bearer token, targets the
//! credential's `instance_url`, and recovers once from a 401 by refreshing.
//! A second consecutive 401 means the new token is rejected too; the
//! credential is dropped and the caller gets `Rejected`.

use std::sync::Arc;
use std::time::Duration;

use datacloud_auth::Credential;
use reqwest::{Method, StatusCode};
use tracing::{debug, warn};

use crate::controller::OAuthController;
use crate::error::{Error, Result};

/// A data API call, relative to the instance URL.
#[derive(Debug, Clone)]
pub struct ApiRequest {
    pub method: Method,
    /// Path starting with `/`, e.g. `/services/data/v63.0/ssot/query-sql`
    pub path: String,
    pub query: Vec<(String, String)>,
    pub body: Option<serde_json::Value>,
    pub timeout: Option<Duration>,
}

impl ApiRequest {
    pub fn get(path: impl Into<String>) -> Self {
        Self {
            method: Method::GET,
            path: path.into(),
            query: Vec::new(),
            body: None,
            timeout: None,
        }
    }

    pub fn post(path: impl Into<String>, body: serde_json::Value) -> Self {
        Self {
            method: Method::POST,
            path: path.into(),
            query: Vec::new(),
            body: Some(body),
            timeout: None,
        }
    }

    pub fn query(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.query.push((key.into(), value.to_string()));
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// Sends data API requests with the current access token.
#[derive(Clone)]
pub struct Gateway {
    controller: Arc<OAuthController>,
    http_client: reqwest::Client,
    default_timeout: Duration,
}

impl Gateway {
    pub fn new(controller: Arc<OAuthController>, http_client: reqwest::Client) -> Self {
        Self {
            controller,
            http_client,
            default_timeout: Duration::from_secs(120),
        }
    }

    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }

    pub fn controller(&self) -> &Arc<OAuthController> {
        &self.controller
    }

    /// Issue `request`. Any status other than 401 is returned to the caller
    /// as-is; interpreting it is the caller's job.
    pub async fn call(&self, request: &ApiRequest) -> Result<reqwest::Response> {
        let credential = self.controller.ensure_valid_credential().await?;
        let response = self.send(&credential, request).await?;
        if response.status() != StatusCode::UNAUTHORIZED {
            return Ok(response);
        }

        debug!(path = %request.path, generation = credential.generation, "data API returned 401, refreshing");
        metrics::counter!("datacloud_gateway_retries_total").increment(1);
        self.controller.invalidate(credential.generation).await;

        let retry_credential = self.controller.ensure_valid_credential().await?;
        let response = self.send(&retry_credential, request).await?;
        if response.status() != StatusCode::UNAUTHORIZED {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        warn!(path = %request.path, "data API rejected refreshed token");
        self.controller.reject(retry_credential.generation).await;
        Err(datacloud_auth::Error::Rejected(format!("HTTP 401 on {}: {body}", request.path)).into())
    }

    async fn send(&self, credential: &Credential, request: &ApiRequest) -> Result<reqwest::Response> {
        let url = format!(
            "{}{}",
            credential.instance_url.trim_end_matches('/'),
            request.path
        );
        let mut builder = self
            .http_client
            .request(request.method.clone(), &url)
            .bearer_auth(&credential.access_token)
            .timeout(request.timeout.unwrap_or(self.default_timeout));
        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        builder
            .send()
            .await
            .map_err(|e| Error::Http(format!("{} {}: {e}", request.method, request.path)))
    }
}
