//! # Sweeper
//!
//! Periodically evicts sessions whose worker is gone: the task panicked,
//! its writer died, or it was never started. Peers receive the `D` line
//! the lost client never sent.

use std::sync::Arc;
use std::time::Duration;

use msgsrv_common::Message;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::hub::Hub;

/// Runs one pass; returns how many sessions were evicted.
pub fn sweep_once(hub: &Hub) -> usize {
    let mut sessions = hub.registry().lock();
    let live = hub.workers().live_handles();
    let mut orphans: Vec<_> = sessions
        .all_handles()
        .into_iter()
        .filter(|id| !live.contains(id))
        .collect();
    orphans.sort();
    hub.stats().record_swept(orphans.len() as u64);

    for id in &orphans {
        let Some(session) = sessions.remove(*id) else {
            continue;
        };
        let peers = sessions.snapshot_matching(&session.db_host, &session.db_name, None);
        let line = Message::Disconnect {
            name: session.name.clone(),
        }
        .encode();
        let notified = hub.relay(peers.iter().map(|(peer, _)| *peer), &line);
        info!(conn = %id, name = %session.name, notified, "evicted session without a worker");
    }
    drop(sessions);

    debug!(evicted = orphans.len(), counters = %hub.stats().snapshot(), "sweep finished");
    orphans.len()
}

/// Handle to the background sweeper task.
#[derive(Debug)]
pub struct SweeperHandle {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl SweeperHandle {
    /// Stops the sweeper and waits for it to exit.
    pub async fn stop(self) {
        self.cancel.cancel();
        if let Err(err) = self.task.await {
            debug!(%err, "sweeper task failed");
        }
    }
}

pub struct Sweeper;

impl Sweeper {
    /// Spawns the periodic sweep. The first pass runs one `interval` after
    /// start; the task ends when `cancel` fires.
    pub fn start(hub: Arc<Hub>, interval: Duration, cancel: CancellationToken) -> SweeperHandle {
        let token = cancel.clone();
        let task = tokio::spawn(async move {
            let start = tokio::time::Instant::now() + interval;
            let mut ticker = tokio::time::interval_at(start, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {
                        sweep_once(&hub);
                    }
                }
            }
            debug!("sweeper stopped");
        });
        SweeperHandle { cancel, task }
    }
}
