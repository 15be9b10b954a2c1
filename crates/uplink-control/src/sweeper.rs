//! Heartbeat sweeper
//!
//! One task on a fixed tick walks every live session and closes the ones
//! whose heartbeats stopped, instead of arming a timer per session.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{info, warn};

use crate::manager::SessionManager;

pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(5);
pub const DEFAULT_HEARTBEAT_TIMEOUT: Duration = Duration::from_secs(15);

/// Spawn the sweeper task. Sessions idle longer than `timeout` are torn
/// down; the route table stops resolving them in the same call.
pub fn spawn_sweeper(
    manager: Arc<SessionManager>,
    interval: Duration,
    timeout: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!(?interval, ?timeout, "Heartbeat sweeper started");
        let mut tick = tokio::time::interval(interval);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tick.tick().await;
            for session in manager.sessions_snapshot() {
                let idle = session.idle_for();
                if idle > timeout {
                    warn!(
                        session_id = %session.id,
                        idle_secs = idle.as_secs(),
                        "Session missed heartbeats, closing"
                    );
                    manager.teardown(&session, "heartbeat timeout").await;
                }
            }
        }
    })
}
