//! Shared server context handed to every listener, worker and the sweeper.

use std::net::SocketAddr;
use std::sync::Arc;

use msgsrv_common::Message;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::ServerConfig;
use crate::registry::{ConnectionId, Registry};
use crate::stats::Stats;
use crate::worker::Worker;
use crate::workers::{DeliveryError, WorkerSet};

/// Registry, live workers, counters and configuration in one place.
///
/// Lock order is always registry first, then workers.
#[derive(Debug)]
pub struct Hub {
    config: ServerConfig,
    registry: Registry,
    workers: WorkerSet,
    stats: Stats,
    shutdown: CancellationToken,
}

impl Hub {
    pub fn new(config: ServerConfig) -> Self {
        Hub {
            config,
            registry: Registry::new(),
            workers: WorkerSet::new(),
            stats: Stats::new(),
            shutdown: CancellationToken::new(),
        }
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn workers(&self) -> &WorkerSet {
        &self.workers
    }

    pub fn stats(&self) -> &Stats {
        &self.stats
    }

    /// Root token; cancelling it stops listeners, sweeper and all workers.
    pub fn shutdown_token(&self) -> &CancellationToken {
        &self.shutdown
    }

    /// Registers and starts a worker for an accepted stream.
    ///
    /// The worker is removed from the live set when its task ends, whether
    /// it returns normally or panics.
    pub fn spawn_worker<S>(self: &Arc<Self>, stream: S, peer: SocketAddr, tls: bool) -> ConnectionId
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let id = ConnectionId::next();
        let (inbox, cancel) =
            self.workers
                .register(id, self.config.outbox_capacity, &self.shutdown);
        let worker = Worker::new(Arc::clone(self), id, peer, tls, cancel);
        let task = tokio::spawn(worker.run(stream, inbox));

        let hub = Arc::clone(self);
        tokio::spawn(async move {
            if let Err(err) = task.await
                && err.is_panic()
            {
                warn!(conn = %id, %peer, "worker panicked; its session is left to the sweeper");
            }
            hub.workers.unregister(id);
            debug!(conn = %id, "worker exited");
        });
        id
    }

    /// Queues a message for one connection; failures are logged and counted.
    pub fn send(&self, id: ConnectionId, message: &Message) -> bool {
        self.send_line(id, message.encode())
    }

    /// Queues an already encoded line for one connection.
    pub fn send_line(&self, id: ConnectionId, line: String) -> bool {
        match self.workers.deliver(id, line) {
            Ok(()) => {
                self.stats.record_delivery();
                true
            }
            Err(DeliveryError::Missing) => {
                debug!(conn = %id, "relay target has no live worker");
                false
            }
            Err(err) => {
                warn!(conn = %id, ?err, "dropping line for slow or closed client");
                self.stats.record_drop();
                false
            }
        }
    }

    /// Queues one line to every handle in `targets`. Returns the number queued.
    pub fn relay<I>(&self, targets: I, line: &str) -> usize
    where
        I: IntoIterator<Item = ConnectionId>,
    {
        targets
            .into_iter()
            .filter(|id| self.send_line(*id, line.to_string()))
            .count()
    }

    /// Stops every worker and forgets every session; listeners keep running.
    pub fn reset_users(&self) -> usize {
        let mut sessions = self.registry.lock();
        let stopped = self.workers.stop_all();
        sessions.clear();
        warn!(stopped, "all users reset");
        stopped
    }

    /// Cooperatively stops one worker.
    pub fn stop_worker(&self, id: ConnectionId) -> bool {
        self.workers.stop(id)
    }
}
