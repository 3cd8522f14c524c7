//! Periodic liveness pings.
//!
//! Independent of any connection: every `heartbeat_interval` the hub pings
//! each active connection from its own task. A failed ping removes the
//! connection through the normal removal path. Nothing waits on the ping
//! tasks and there is no ordering between them.

use std::sync::Arc;

use tokio::{
    task::JoinHandle,
    time::{Instant, MissedTickBehavior},
};

use crate::hub::Hub;

/// Ping every active connection once per `heartbeat_interval`, forever.
///
/// The first ping goes out one full interval after start.
pub async fn run_heartbeat(hub: Arc<Hub>) {
    let period = hub.config().heartbeat_interval;
    let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;
        let pings = hub.ping_all().await;
        tracing::debug!(connections = pings.len(), "heartbeat");
    }
}

/// Start the heartbeat on the current runtime.
pub fn spawn_heartbeat(hub: Arc<Hub>) -> JoinHandle<()> {
    tokio::spawn(run_heartbeat(hub))
}
