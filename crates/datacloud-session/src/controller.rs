//! OAuth flow controller
//!
//! Single entry point for obtaining a usable access token. A valid stored
//! credential is returned without touching the network. A stale one is
//! refreshed; an absent one (or one whose refresh token was revoked) triggers
//! the interactive browser login.
//!
//! Only one exchange (refresh or login) runs at a time. Callers that arrive
//! while one is in flight wait on the async mutex and then re-read the store.
//! If the exchange they waited on failed, they get the same error instead of
//! starting another one.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use datacloud_auth::{
    Browser, CallbackListener, ClientRegistration, Credential, DEFAULT_LOGIN_TIMEOUT,
    DEFAULT_SAFETY_MARGIN, Error, PkcePair, Result, SystemBrowser, TokenClient, TokenStore,
    build_authorization_url, generate_state, now_millis,
};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Drives refresh and interactive login for the single Data Cloud connection.
pub struct OAuthController {
    registration: ClientRegistration,
    store: Arc<TokenStore>,
    token_client: TokenClient,
    browser: Arc<dyn Browser>,
    /// Held for the duration of an exchange; stores the outcome of the last one.
    exchange: Mutex<Option<Error>>,
    /// Number of finished exchanges, read before queueing on `exchange`.
    completed: AtomicU64,
    safety_margin: Duration,
    login_timeout: Duration,
}

impl OAuthController {
    pub fn new(
        registration: ClientRegistration,
        store: Arc<TokenStore>,
        http_client: reqwest::Client,
    ) -> Self {
        let token_client = TokenClient::new(http_client, &registration);
        Self {
            registration,
            store,
            token_client,
            browser: Arc::new(SystemBrowser),
            exchange: Mutex::new(None),
            completed: AtomicU64::new(0),
            safety_margin: DEFAULT_SAFETY_MARGIN,
            login_timeout: DEFAULT_LOGIN_TIMEOUT,
        }
    }

    pub fn with_browser(mut self, browser: Arc<dyn Browser>) -> Self {
        self.browser = browser;
        self
    }

    /// Treat a credential as stale this long before it actually expires.
    pub fn with_safety_margin(mut self, margin: Duration) -> Self {
        self.safety_margin = margin;
        self
    }

    /// How long an interactive login waits for the browser redirect.
    pub fn with_login_timeout(mut self, timeout: Duration) -> Self {
        self.login_timeout = timeout;
        self
    }

    pub fn store(&self) -> &Arc<TokenStore> {
        &self.store
    }

    pub fn registration(&self) -> &ClientRegistration {
        &self.registration
    }

    pub fn safety_margin(&self) -> Duration {
        self.safety_margin
    }

    /// Access token valid for at least the safety margin.
    pub async fn ensure_valid_token(&self) -> Result<String> {
        self.ensure_valid_credential()
            .await
            .map(|credential| credential.access_token)
    }

    /// Like [`ensure_valid_token`](Self::ensure_valid_token), but returns the
    /// whole credential so callers can use `instance_url` and `generation`.
    pub async fn ensure_valid_credential(&self) -> Result<Credential> {
        if let Some(credential) = self.current_valid().await {
            return Ok(credential);
        }

        let observed = self.completed.load(Ordering::Acquire);
        let mut last_error = self.exchange.lock().await;

        // Another caller may have finished an exchange while we waited
        if let Some(credential) = self.current_valid().await {
            return Ok(credential);
        }
        if self.completed.load(Ordering::Acquire) != observed {
            if let Some(error) = last_error.as_ref() {
                debug!(error = %error, "sharing failure of the exchange we waited on");
                return Err(error.clone());
            }
        }

        let outcome = self.run_exchange().await;
        *last_error = outcome.as_ref().err().cloned();
        self.completed.fetch_add(1, Ordering::Release);
        outcome
    }

    /// Flag the credential of `generation` as stale after the data API
    /// rejected it. The next token request refreshes.
    pub async fn invalidate(&self, generation: u64) -> bool {
        let marked = self.store.mark_stale(generation).await;
        if marked {
            debug!(generation, "credential marked stale");
        }
        marked
    }

    /// Drop the credential of `generation`: it was rejected even after a refresh.
    pub async fn reject(&self, generation: u64) -> bool {
        let cleared = self.store.clear_if_current(generation).await;
        if cleared {
            warn!(generation, "credential rejected after refresh, cleared");
        }
        cleared
    }

    /// Refresh the stored credential if it expires within `within`.
    ///
    /// Never starts an interactive login. Returns `Ok(true)` when a refresh
    /// happened. A revoked refresh token clears the store so the next tool
    /// call logs in again.
    pub async fn refresh_if_expiring(&self, within: Duration) -> Result<bool> {
        if !self.needs_proactive_refresh(within).await {
            return Ok(false);
        }

        let _guard = self.exchange.lock().await;
        // Re-read under the lock: a caller may have refreshed already
        if !self.needs_proactive_refresh(within).await {
            return Ok(false);
        }
        let Some(credential) = self.store.get().await else {
            return Ok(false);
        };
        let Some(refresh) = credential.refresh_token.clone() else {
            debug!("credential has no refresh token, skipping proactive refresh");
            return Ok(false);
        };

        match self.refresh(&credential, &refresh).await {
            Ok(_) => Ok(true),
            Err(Error::Revoked(message)) => {
                self.store.clear_if_current(credential.generation).await;
                Err(Error::Revoked(message))
            }
            Err(e) => Err(e),
        }
    }

    async fn needs_proactive_refresh(&self, within: Duration) -> bool {
        match self.store.get().await {
            Some(credential) => {
                credential.is_forced_stale() || credential.expires_within(now_millis(), within)
            }
            None => false,
        }
    }

    async fn current_valid(&self) -> Option<Credential> {
        self.store
            .get()
            .await
            .filter(|credential| credential.is_valid(self.safety_margin))
    }

    /// Refresh if possible, otherwise (or on revocation) log in interactively.
    async fn run_exchange(&self) -> Result<Credential> {
        if let Some(credential) = self.store.get().await {
            match credential.refresh_token.clone() {
                Some(refresh) => match self.refresh(&credential, &refresh).await {
                    Ok(refreshed) => return Ok(refreshed),
                    Err(Error::Revoked(message)) => {
                        warn!(error = %message, "refresh token revoked, falling back to interactive login");
                        self.store.clear_if_current(credential.generation).await;
                    }
                    Err(e) => return Err(e),
                },
                None => debug!("stale credential has no refresh token, logging in again"),
            }
        }

        self.interactive_login().await
    }

    async fn refresh(&self, credential: &Credential, refresh: &str) -> Result<Credential> {
        debug!(generation = credential.generation, "refreshing access token");
        let response = match self.token_client.refresh_token(refresh).await {
            Ok(response) => response,
            Err(e) => {
                let outcome = if matches!(e, Error::Revoked(_)) {
                    "revoked"
                } else {
                    "transient"
                };
                metrics::counter!("datacloud_auth_refreshes_total", "outcome" => outcome)
                    .increment(1);
                warn!(error = %e, "token refresh failed");
                return Err(e);
            }
        };

        let refreshed = Credential::from_token_response(
            response,
            now_millis(),
            Some(credential),
            &self.registration.login_base(),
        );
        match self
            .store
            .replace_if_current(credential.generation, refreshed)
            .await
        {
            Some(stored) => {
                metrics::counter!("datacloud_auth_refreshes_total", "outcome" => "success")
                    .increment(1);
                info!(
                    generation = stored.generation,
                    expires_in = stored.expires_in,
                    "access token refreshed"
                );
                Ok(stored)
            }
            None => {
                metrics::counter!("datacloud_auth_refreshes_total", "outcome" => "superseded")
                    .increment(1);
                self.current_valid().await.ok_or_else(|| {
                    Error::Transient("refreshed credential was superseded".into())
                })
            }
        }
    }

    async fn interactive_login(&self) -> Result<Credential> {
        let outcome = self.login_once().await;
        let label = match &outcome {
            Ok(_) => "success",
            Err(Error::StateMismatch) => "state_mismatch",
            Err(Error::Timeout(_)) => "timeout",
            Err(Error::Denied(_)) => "denied",
            Err(_) => "error",
        };
        metrics::counter!("datacloud_auth_logins_total", "outcome" => label).increment(1);
        outcome
    }

    async fn login_once(&self) -> Result<Credential> {
        // Bind first so the redirect can never arrive before we listen
        let listener =
            CallbackListener::bind(&self.registration.callback_url, self.login_timeout).await?;
        let redirect_uri = listener.redirect_uri().to_string();
        let pkce = PkcePair::generate();
        let state = generate_state();
        let url = build_authorization_url(&self.registration, &redirect_uri, &pkce.challenge, &state)?;

        info!(redirect_uri = %redirect_uri, "starting interactive Salesforce login");
        // Launchers such as xdg-open may block; keep them off the async workers
        let browser = self.browser.clone();
        let target = url.clone();
        let opened = tokio::task::spawn_blocking(move || browser.open(&target))
            .await
            .unwrap_or_else(|e| Err(std::io::Error::other(e)));
        if let Err(e) = opened {
            warn!(error = %e, "could not open browser, printing login URL");
            // stdout carries the MCP protocol
            eprintln!("Open this URL in a browser to log in to Salesforce:\n{url}");
        }

        let authorization = listener.wait_for_code(&state).await?;
        let response = self
            .token_client
            .exchange_code(&authorization.code, &pkce.verifier, &redirect_uri)
            .await?;

        let credential = Credential::from_token_response(
            response,
            now_millis(),
            None,
            &self.registration.login_base(),
        );
        let stored = self.store.set(credential).await;
        info!(
            generation = stored.generation,
            instance_url = %stored.instance_url,
            "interactive login complete"
        );
        Ok(stored)
    }
}
