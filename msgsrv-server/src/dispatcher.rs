//! # Dispatcher
//!
//! Owns the two listeners, the sweeper and the shared [`Hub`]. Starting it
//! binds both ports; a bind failure is fatal and reported before anything
//! is accepted.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::ServerConfig;
use crate::error::ServerError;
use crate::hub::Hub;
use crate::listener::{self, Transport};
use crate::sweeper::{Sweeper, SweeperHandle};

const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);
const DRAIN_POLL: Duration = Duration::from_millis(20);

/// A running server.
#[derive(Debug)]
pub struct Dispatcher {
    hub: Arc<Hub>,
    plain_addr: SocketAddr,
    tls_addr: SocketAddr,
    listeners: Vec<JoinHandle<()>>,
    sweeper: SweeperHandle,
}

impl Dispatcher {
    /// Binds the plain and TLS ports from `config` and starts serving.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start(config: ServerConfig) -> Result<Self, ServerError> {
        let plain_addr = config.plain_addr()?;
        let tls_addr = config.tls_addr()?;
        let plain = bind(Transport::Plain, plain_addr)?;
        let tls = bind(Transport::Tls, tls_addr)?;
        Self::from_listeners(config, plain, tls)
    }

    /// Serves on already bound listeners.
    pub fn from_listeners(
        config: ServerConfig,
        plain: TcpListener,
        tls: TcpListener,
    ) -> Result<Self, ServerError> {
        let plain_addr = plain.local_addr()?;
        let tls_addr = tls.local_addr()?;
        let sweep_interval = config.sweep_interval();
        let hub = Arc::new(Hub::new(config));

        let listeners = vec![
            tokio::spawn(listener::serve(plain, Transport::Plain, Arc::clone(&hub))),
            tokio::spawn(listener::serve(tls, Transport::Tls, Arc::clone(&hub))),
        ];
        let sweeper = Sweeper::start(
            Arc::clone(&hub),
            sweep_interval,
            hub.shutdown_token().child_token(),
        );

        info!(%plain_addr, %tls_addr, "message server started");
        Ok(Dispatcher {
            hub,
            plain_addr,
            tls_addr,
            listeners,
            sweeper,
        })
    }

    pub fn hub(&self) -> &Arc<Hub> {
        &self.hub
    }

    pub fn plain_addr(&self) -> SocketAddr {
        self.plain_addr
    }

    pub fn tls_addr(&self) -> SocketAddr {
        self.tls_addr
    }

    /// Stops every worker, forgets every session and closes the listeners.
    /// Returns the number of workers signalled.
    pub fn kill_all_threads(&self) -> usize {
        let stopped = self.hub.reset_users();
        self.hub.shutdown_token().cancel();
        info!(stopped, "dispatcher shutting down");
        stopped
    }

    /// Waits for the listeners, the sweeper and (briefly) the workers to end.
    ///
    /// Call after [`Dispatcher::kill_all_threads`].
    pub async fn join(self) {
        for task in self.listeners {
            if let Err(err) = task.await {
                warn!(%err, "listener task failed");
            }
        }
        self.sweeper.stop().await;

        let deadline = tokio::time::Instant::now() + DRAIN_TIMEOUT;
        while !self.hub.workers().is_empty() {
            if tokio::time::Instant::now() >= deadline {
                warn!(remaining = self.hub.workers().len(), "workers still running at exit");
                break;
            }
            tokio::time::sleep(DRAIN_POLL).await;
        }
        debug!(counters = %self.hub.stats().snapshot(), "dispatcher stopped");
    }
}

fn bind(transport: Transport, addr: SocketAddr) -> Result<TcpListener, ServerError> {
    listener::bind(addr).map_err(|source| ServerError::Bind {
        transport,
        addr,
        source,
    })
}
