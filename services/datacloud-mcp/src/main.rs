//! Salesforce Data Cloud MCP server
//!
//! Single-binary stdio MCP server that:
//! 1. Exposes Data Cloud query and metadata tools
//! 2. Logs the user in through the browser (OAuth2 + PKCE) on first use
//! 3. Keeps the access token fresh and retries once on 401

mod config;
mod error;
mod metrics;
mod protocol;
mod server;
mod tools;

use std::sync::Arc;

use anyhow::{Context, Result};
use datacloud_api::DataCloudClient;
use datacloud_auth::TokenStore;
use datacloud_session::{Gateway, OAuthController, spawn_refresh_task};
use tokio::net::TcpListener;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::Config;
use crate::tools::{DataCloudTools, ToolHandler};

#[tokio::main]
async fn main() -> Result<()> {
    // stdout carries the protocol, so logs go to stderr
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_env("LOG_LEVEL")
                .or_else(|_| EnvFilter::try_from_default_env())
                .unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_writer(std::io::stderr),
        )
        .init();

    info!(version = env!("CARGO_PKG_VERSION"), "starting datacloud-mcp");

    // Install Prometheus metrics recorder before any metrics are emitted
    let prometheus_handle =
        metrics::install_recorder().context("failed to install Prometheus recorder")?;

    // CLI: simple --config flag parsing
    let args: Vec<String> = std::env::args().collect();
    let cli_config_path = args
        .iter()
        .position(|a| a == "--config")
        .and_then(|i| args.get(i + 1))
        .map(|s| s.as_str());

    let config_path = Config::resolve_path(cli_config_path);
    match &config_path {
        Some(path) => info!(path = %path.display(), "loading configuration"),
        None => info!("no config file, using environment only"),
    }
    let config = Config::load(config_path.as_deref()).with_context(|| match &config_path {
        Some(path) => format!("failed to load config from {}", path.display()),
        None => "failed to load config from environment".to_string(),
    })?;

    info!(
        login_url = %config.salesforce.login_url,
        callback_url = %config.salesforce.callback_url,
        dataspace = %config.datacloud.dataspace,
        api_version = %config.datacloud.api_version,
        token_cache = config.auth.token_cache_path.is_some(),
        "configuration loaded"
    );

    let store = match &config.auth.token_cache_path {
        Some(path) => TokenStore::with_cache(path.clone())
            .await
            .with_context(|| format!("failed to load token cache {}", path.display()))?,
        None => TokenStore::new(),
    };

    let http_client = reqwest::Client::builder()
        .build()
        .context("failed to build HTTP client")?;

    let controller = Arc::new(
        OAuthController::new(config.registration()?, Arc::new(store), http_client.clone())
            .with_safety_margin(config.safety_margin())
            .with_login_timeout(config.login_timeout()),
    );

    let refresh_task = config.refresh_interval().map(|interval| {
        info!(
            interval_secs = interval.as_secs(),
            "starting background token refresh"
        );
        spawn_refresh_task(
            controller.clone(),
            interval,
            config.safety_margin() + interval,
        )
    });

    let gateway =
        Gateway::new(controller, http_client).with_default_timeout(config.request_timeout());
    let client = DataCloudClient::new(gateway, config.client_options());
    let handler: Arc<dyn ToolHandler> = Arc::new(DataCloudTools::new(
        client,
        config.datacloud.default_list_table_filter.clone(),
    ));

    let metrics_server = match config.metrics.listen_addr {
        Some(addr) => {
            let listener = TcpListener::bind(addr)
                .await
                .with_context(|| format!("failed to bind metrics listener on {addr}"))?;
            info!(%addr, "serving metrics");
            let app = metrics::router(prometheus_handle);
            Some(tokio::spawn(async move {
                if let Err(e) = axum::serve(listener, app).await {
                    error!(error = %e, "metrics server failed");
                }
            }))
        }
        None => None,
    };

    info!("serving MCP over stdio");
    let served = tokio::select! {
        result = server::serve(handler, tokio::io::stdin(), tokio::io::stdout()) => {
            result.context("stdio transport failed")
        }
        () = shutdown_signal() => Ok(()),
    };

    if let Some(task) = refresh_task {
        task.abort();
    }
    if let Some(task) = metrics_server {
        task.abort();
    }
    info!("datacloud-mcp stopped");
    served
}

/// Wait for SIGINT or SIGTERM. A handler that cannot be installed never fires.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received SIGINT, shutting down"),
        _ = terminate => info!("received SIGTERM, shutting down"),
    }
}
