//! Configuration types and loading
//!
//! Config precedence: env vars > config file > defaults. The config file is
//! optional; its path comes from `--config`, then `CONFIG_PATH`, then
//! `datacloud-mcp.toml` in the working directory if present.
//! The client secret is loaded from SF_CLIENT_SECRET or client_secret_file,
//! never stored in the TOML directly to avoid leaking secrets.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use common::Secret;
use datacloud_api::ClientOptions;
use datacloud_auth::{
    ClientRegistration, DEFAULT_CALLBACK_URL, DEFAULT_LOGIN_HOST, DEFAULT_LOGIN_TIMEOUT,
    DEFAULT_SAFETY_MARGIN, DEFAULT_SCOPES, DEFAULT_TOKEN_LIFETIME_SECS,
};
use serde::Deserialize;

const DEFAULT_CONFIG_FILE: &str = "datacloud-mcp.toml";

/// Root configuration
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub salesforce: SalesforceConfig,
    pub auth: AuthConfig,
    pub datacloud: DataCloudConfig,
    pub metrics: MetricsConfig,
}

/// Connected app registration
#[derive(Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SalesforceConfig {
    pub client_id: Option<String>,
    #[serde(skip)]
    pub client_secret: Option<Secret<String>>,
    /// Path to a file containing the client secret (alternative to SF_CLIENT_SECRET)
    pub client_secret_file: Option<PathBuf>,
    /// Bare host (`login.salesforce.com`) or full base URL
    pub login_url: String,
    /// Must match the callback URL registered on the connected app exactly
    pub callback_url: String,
    pub scopes: Vec<String>,
}

impl Default for SalesforceConfig {
    fn default() -> Self {
        Self {
            client_id: None,
            client_secret: None,
            client_secret_file: None,
            login_url: DEFAULT_LOGIN_HOST.to_string(),
            callback_url: DEFAULT_CALLBACK_URL.to_string(),
            scopes: DEFAULT_SCOPES.iter().map(|s| s.to_string()).collect(),
        }
    }
}

/// Token lifecycle settings
#[derive(Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AuthConfig {
    pub login_timeout_secs: u64,
    pub safety_margin_secs: u64,
    /// Background refresh period; 0 disables the refresh task
    pub refresh_interval_secs: u64,
    /// Persist the credential here (mode 0600) so restarts can refresh
    pub token_cache_path: Option<PathBuf>,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            login_timeout_secs: DEFAULT_LOGIN_TIMEOUT.as_secs(),
            safety_margin_secs: DEFAULT_SAFETY_MARGIN.as_secs(),
            refresh_interval_secs: 300,
            token_cache_path: None,
        }
    }
}

/// Data Cloud API settings
#[derive(Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DataCloudConfig {
    pub api_version: String,
    pub dataspace: String,
    pub workload_name: Option<String>,
    /// LIKE pattern used by `list_tables` when the caller passes none
    pub default_list_table_filter: String,
    pub page_size: u32,
    pub request_timeout_secs: u64,
    pub query_timeout_secs: u64,
}

impl Default for DataCloudConfig {
    fn default() -> Self {
        let options = ClientOptions::default();
        Self {
            api_version: options.api_version,
            dataspace: options.dataspace,
            workload_name: None,
            default_list_table_filter: "%".to_string(),
            page_size: options.page_size,
            request_timeout_secs: 120,
            query_timeout_secs: options.query_timeout.as_secs(),
        }
    }
}

/// Prometheus exposition
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MetricsConfig {
    /// Serve `/metrics` here; unset disables the endpoint
    pub listen_addr: Option<SocketAddr>,
}

impl Config {
    /// Load configuration from an optional TOML file, then overlay environment
    /// variables and validate.
    ///
    /// Client secret resolution order:
    /// 1. SF_CLIENT_SECRET env var
    /// 2. client_secret_file path from config
    pub fn load(path: Option<&Path>) -> common::Result<Self> {
        let mut config: Config = match path {
            Some(path) => {
                let contents = std::fs::read_to_string(path)?;
                toml::from_str(&contents)?
            }
            None => Config::default(),
        };

        config.apply_env()?;

        if config.salesforce.client_secret.is_none() {
            if let Some(ref secret_file) = config.salesforce.client_secret_file {
                let secret = std::fs::read_to_string(secret_file).map_err(|e| {
                    common::Error::Config(format!(
                        "failed to read client_secret_file {}: {e}",
                        secret_file.display()
                    ))
                })?;
                let secret = secret.trim().to_owned();
                if !secret.is_empty() {
                    config.salesforce.client_secret = Some(Secret::new(secret));
                }
            }
        }

        config.validate()?;
        Ok(config)
    }

    fn apply_env(&mut self) -> common::Result<()> {
        if let Some(id) = env_var("SF_CLIENT_ID") {
            self.salesforce.client_id = Some(id);
        }
        if let Some(secret) = env_var("SF_CLIENT_SECRET") {
            self.salesforce.client_secret = Some(Secret::new(secret));
        }
        if let Some(login_url) = env_var("SF_LOGIN_URL") {
            self.salesforce.login_url = login_url;
        }
        if let Some(callback_url) = env_var("CALLBACK_URL") {
            self.salesforce.callback_url = callback_url;
        }
        if let Some(scopes) = env_var("SF_SCOPES") {
            self.salesforce.scopes = scopes
                .split([' ', ','])
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect();
        }
        if let Some(filter) = env_var("DEFAULT_LIST_TABLE_FILTER") {
            self.datacloud.default_list_table_filter = filter;
        }
        if let Some(path) = env_var("TOKEN_CACHE_PATH") {
            self.auth.token_cache_path = Some(PathBuf::from(path));
        }
        if let Some(addr) = env_var("METRICS_ADDR") {
            let addr = addr.parse().map_err(|e| {
                common::Error::Config(format!("METRICS_ADDR {addr:?} is not a socket address: {e}"))
            })?;
            self.metrics.listen_addr = Some(addr);
        }
        Ok(())
    }

    fn validate(&self) -> common::Result<()> {
        let mut missing = Vec::new();
        if self.salesforce.client_id.as_deref().is_none_or(str::is_empty) {
            missing.push("SF_CLIENT_ID".to_string());
        }
        if self.salesforce.client_secret.is_none() {
            missing.push("SF_CLIENT_SECRET".to_string());
        }
        if !missing.is_empty() {
            return Err(common::Error::MissingEnv(missing));
        }

        self.registration()?
            .validate()
            .map_err(|e| common::Error::Config(e.to_string()))?;

        if self.auth.login_timeout_secs == 0 {
            return Err(common::Error::Config(
                "login_timeout_secs must be greater than 0".into(),
            ));
        }
        // A margin as long as the token lifetime makes every credential stale
        if self.auth.safety_margin_secs >= DEFAULT_TOKEN_LIFETIME_SECS {
            return Err(common::Error::Config(format!(
                "safety_margin_secs must be less than the token lifetime ({DEFAULT_TOKEN_LIFETIME_SECS}s)"
            )));
        }
        if self.datacloud.page_size == 0 {
            return Err(common::Error::Config(
                "page_size must be greater than 0".into(),
            ));
        }
        if self.datacloud.request_timeout_secs == 0 || self.datacloud.query_timeout_secs == 0 {
            return Err(common::Error::Config(
                "request_timeout_secs and query_timeout_secs must be greater than 0".into(),
            ));
        }
        if self.datacloud.dataspace.trim().is_empty() {
            return Err(common::Error::Config("dataspace must not be empty".into()));
        }
        Ok(())
    }

    /// Connected app registration for the OAuth flow.
    pub fn registration(&self) -> common::Result<ClientRegistration> {
        let (Some(client_id), Some(client_secret)) = (
            self.salesforce.client_id.clone(),
            self.salesforce.client_secret.clone(),
        ) else {
            return Err(common::Error::MissingEnv(vec![
                "SF_CLIENT_ID".into(),
                "SF_CLIENT_SECRET".into(),
            ]));
        };
        Ok(ClientRegistration::new(
            client_id,
            client_secret,
            self.salesforce.login_url.clone(),
            self.salesforce.callback_url.clone(),
        )
        .with_scopes(self.salesforce.scopes.clone()))
    }

    pub fn client_options(&self) -> ClientOptions {
        ClientOptions {
            api_version: self.datacloud.api_version.clone(),
            dataspace: self.datacloud.dataspace.clone(),
            workload_name: self.datacloud.workload_name.clone(),
            page_size: self.datacloud.page_size,
            query_timeout: Duration::from_secs(self.datacloud.query_timeout_secs),
            ..ClientOptions::default()
        }
    }

    pub fn login_timeout(&self) -> Duration {
        Duration::from_secs(self.auth.login_timeout_secs)
    }

    pub fn safety_margin(&self) -> Duration {
        Duration::from_secs(self.auth.safety_margin_secs)
    }

    /// `None` when background refresh is disabled.
    pub fn refresh_interval(&self) -> Option<Duration> {
        (self.auth.refresh_interval_secs > 0)
            .then(|| Duration::from_secs(self.auth.refresh_interval_secs))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.datacloud.request_timeout_secs)
    }

    /// Resolve config file path from CLI arg, CONFIG_PATH env var, or the
    /// default file if it exists.
    pub fn resolve_path(cli_path: Option<&str>) -> Option<PathBuf> {
        if let Some(p) = cli_path {
            return Some(PathBuf::from(p));
        }
        if let Ok(p) = std::env::var("CONFIG_PATH") {
            return Some(PathBuf::from(p));
        }
        let default = PathBuf::from(DEFAULT_CONFIG_FILE);
        default.exists().then_some(default)
    }
}

/// Non-empty environment variable.
fn env_var(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}
