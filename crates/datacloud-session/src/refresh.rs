//! Proactive background token refresh
//!
//! Spawns a periodic task that refreshes the credential before it goes stale,
//! so most tool calls never wait on the token endpoint. The task only ever
//! uses the refresh grant: if the refresh token is gone or revoked it leaves
//! interactive login to the next tool call.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::controller::OAuthController;

/// Spawn a background task that refreshes the credential when it expires
/// within `threshold`. Runs every `interval`.
///
/// Returns a `JoinHandle` for the spawned task.
pub fn spawn_refresh_task(
    controller: Arc<OAuthController>,
    interval: Duration,
    threshold: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        // Skip the immediate first tick: nothing can be expiring at startup
        // that the first tool call would not handle itself
        ticker.tick().await;

        loop {
            ticker.tick().await;
            refresh_cycle(&controller, threshold).await;
        }
    })
}

/// Run one refresh cycle.
async fn refresh_cycle(controller: &OAuthController, threshold: Duration) {
    match controller.refresh_if_expiring(threshold).await {
        Ok(true) => info!("background token refresh succeeded"),
        Ok(false) => debug!("no token refresh needed"),
        Err(datacloud_auth::Error::Revoked(message)) => {
            warn!(error = %message, "refresh token rejected, next tool call will log in again");
        }
        Err(e) => {
            warn!(error = %e, "background refresh failed (transient), will retry next cycle");
        }
    }
}
