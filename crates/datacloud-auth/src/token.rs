//! Token endpoint client
//!
//! Handles the two token endpoint interactions:
//! 1. Authorization code exchange (completes interactive login)
//! 2. Refresh token grant (proactive and 401-driven refresh)
//!
//! Both POST form-encoded bodies to `<login base>/services/oauth2/token`.
//! Failures are classified here so the flow controller can decide whether to
//! retry, fall back to interactive login, or give up.

use std::fmt;
use std::time::Duration;

use common::Secret;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::constants::DEFAULT_TOKEN_LIFETIME_SECS;
use crate::error::{Error, Result};
use crate::registration::ClientRegistration;

/// Response from the token endpoint for both exchange and refresh.
///
/// Salesforce omits `expires_in`, and omits `refresh_token` on refresh unless
/// refresh-token rotation is enabled, so both are optional.
#[derive(Clone, Deserialize, Serialize)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    /// Seconds until the access token expires (delta, not absolute)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_in: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instance_url: Option<String>,
}

impl TokenResponse {
    /// Lifetime in seconds, falling back to the default session length.
    pub fn lifetime_secs(&self) -> u64 {
        self.expires_in.unwrap_or(DEFAULT_TOKEN_LIFETIME_SECS)
    }
}

impl fmt::Debug for TokenResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenResponse")
            .field("access_token", &"[REDACTED]")
            .field(
                "refresh_token",
                &self.refresh_token.as_ref().map(|_| "[REDACTED]"),
            )
            .field("expires_in", &self.expires_in)
            .field("instance_url", &self.instance_url)
            .finish()
    }
}

/// OAuth error body, e.g. `{"error":"invalid_grant","error_description":"expired access/refresh token"}`
#[derive(Debug, Deserialize)]
struct OAuthErrorBody {
    error: String,
    #[serde(default)]
    error_description: Option<String>,
}

/// Client for the registration's token endpoint.
#[derive(Clone)]
pub struct TokenClient {
    http: reqwest::Client,
    endpoint: String,
    client_id: String,
    client_secret: Secret<String>,
    timeout: Duration,
}

impl TokenClient {
    pub fn new(http: reqwest::Client, registration: &ClientRegistration) -> Self {
        Self {
            http,
            endpoint: registration.token_endpoint(),
            client_id: registration.client_id.clone(),
            client_secret: registration.client_secret.clone(),
            timeout: Duration::from_secs(30),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Exchange an authorization code for tokens.
    ///
    /// The PKCE verifier proves this client started the flow; `redirect_uri`
    /// must be byte-identical to the one sent on the authorization URL.
    pub async fn exchange_code(
        &self,
        code: &str,
        verifier: &str,
        redirect_uri: &str,
    ) -> Result<TokenResponse> {
        let response = self
            .http
            .post(&self.endpoint)
            .header(reqwest::header::ACCEPT, "application/json")
            .timeout(self.timeout)
            .form(&[
                ("grant_type", "authorization_code"),
                ("code", code),
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.expose().as_str()),
                ("redirect_uri", redirect_uri),
                ("code_verifier", verifier),
            ])
            .send()
            .await
            .map_err(|e| Error::Transient(format!("token exchange request failed: {e}")))?;

        let status = response.status();
        debug!(status = status.as_u16(), "token exchange response");
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| String::from("<no body>"));
            return Err(classify_exchange_failure(status, &body));
        }

        response
            .json::<TokenResponse>()
            .await
            .map_err(|e| Error::Exchange(format!("invalid token response: {e}")))
    }

    /// Redeem a refresh token for a new access token.
    pub async fn refresh_token(&self, refresh: &str) -> Result<TokenResponse> {
        let response = self
            .http
            .post(&self.endpoint)
            .header(reqwest::header::ACCEPT, "application/json")
            .timeout(self.timeout)
            .form(&[
                ("grant_type", "refresh_token"),
                ("refresh_token", refresh),
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.expose().as_str()),
            ])
            .send()
            .await
            .map_err(|e| Error::Transient(format!("token refresh request failed: {e}")))?;

        let status = response.status();
        debug!(status = status.as_u16(), "token refresh response");
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| String::from("<no body>"));
            return Err(classify_refresh_failure(status, &body));
        }

        // A 200 with an unparseable body is the server's fault, not the token's
        response
            .json::<TokenResponse>()
            .await
            .map_err(|e| Error::Transient(format!("invalid refresh response: {e}")))
    }
}

/// Any 4xx on the refresh grant means the refresh token is no longer usable.
pub fn classify_refresh_failure(status: StatusCode, body: &str) -> Error {
    let detail = describe_failure(status, body);
    if status.is_client_error() {
        Error::Revoked(detail)
    } else {
        Error::Transient(detail)
    }
}

/// 5xx, 408 and 429 on the code grant are worth retrying; other 4xx are not
/// (the one-time code is spent or was never valid).
pub fn classify_exchange_failure(status: StatusCode, body: &str) -> Error {
    let detail = describe_failure(status, body);
    if status.is_server_error()
        || status == StatusCode::REQUEST_TIMEOUT
        || status == StatusCode::TOO_MANY_REQUESTS
    {
        Error::Transient(detail)
    } else {
        Error::Exchange(detail)
    }
}

fn describe_failure(status: StatusCode, body: &str) -> String {
    match serde_json::from_str::<OAuthErrorBody>(body) {
        Ok(parsed) => match parsed.error_description {
            Some(description) => format!("{status}: {} ({description})", parsed.error),
            None => format!("{status}: {}", parsed.error),
        },
        Err(_) => format!("{status}: {body}"),
    }
}
