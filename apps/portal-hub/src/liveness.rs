use std::sync::Arc;
use std::time::Duration;

use metrics::counter;
use tokio::task::JoinHandle;
use tracing::info;

use crate::registry::ConnectionRegistry;
use crate::spaces::SessionManager;

/// Sweep for sessions that stopped heartbeating and run the full
/// disconnect cascade on them (leave, control release, unregister). The
/// sweep cadence equals the heartbeat interval, so a dead session is
/// reclaimed within one cycle of crossing the timeout.
pub fn spawn_monitor(
    registry: Arc<ConnectionRegistry>,
    sessions: Arc<SessionManager>,
    interval: Duration,
    timeout: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            for session_id in registry.stale_sessions(timeout) {
                info!("removing session {} (heartbeat timeout)", session_id);
                counter!("portal_hub_liveness_reaps_total", 1);
                sessions.disconnect(&session_id).await;
            }
        }
    })
}
