//! Proactive background token refresh
//!
//! Spawns a periodic task that keeps the access token ahead of its expiry,
//! so the request path almost never pays for a fetch. A failed cycle
//! invalidates the manager's pool and token state; the next request (or the
//! next cycle) rebuilds from scratch.

use std::sync::Arc;
use std::time::Duration;

use metrics::counter;
use tracing::{debug, warn};

use crate::manager::ConnectionManager;

/// Spawn a background task that refreshes the token every `interval`.
///
/// The token provider's refresh buffer decides whether a cycle actually
/// fetches; most cycles are no-ops. Cancel by aborting the returned handle.
pub fn spawn_refresh_task(
    manager: Arc<ConnectionManager>,
    interval: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        // Skip the immediate first tick — the manager was just initialized
        ticker.tick().await;

        loop {
            ticker.tick().await;
            refresh_cycle(&manager).await;
        }
    })
}

/// Run one refresh cycle.
async fn refresh_cycle(manager: &ConnectionManager) {
    match manager.token_provider().refresh_if_needed().await {
        Ok(_) => {
            let minutes = manager.token_provider().time_until_expiry_minutes().await;
            debug!(expires_in_minutes = minutes, "background token check complete");
        }
        Err(err) => {
            counter!("sql_token_refresh_failures_total").increment(1);
            warn!(error = %err, "background token refresh failed, invalidating connection state");
            manager.invalidate().await;
        }
    }
}
