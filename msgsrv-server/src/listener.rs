//! # Listeners
//!
//! Accept loops for the plain and TLS ports. Each accepted socket becomes a
//! worker; the loop itself never reads client data.
//!
//! ## Notes
//! - TLS handshakes run on their own task so a stalled handshake never holds
//!   up the accept loop.
//! - A failed accept or handshake drops that one connection and the loop
//!   keeps going. Repeated accept failures (descriptor exhaustion, for
//!   instance) back off exponentially instead of spinning.

use std::fmt;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use socket2::{Domain, Protocol, SockRef, Socket, Type};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, info, warn};

use crate::hub::Hub;
use crate::tls;

const BACKLOG: i32 = 1024;
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);
const ACCEPT_BACKOFF_MIN: Duration = Duration::from_millis(10);
const ACCEPT_BACKOFF_MAX: Duration = Duration::from_secs(1);

/// Which of the two listening ports a connection arrived on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transport {
    Plain,
    Tls,
}

impl fmt::Display for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Transport::Plain => "plain",
            Transport::Tls => "tls",
        })
    }
}

/// Delay between consecutive failed accepts, doubling up to a cap.
#[derive(Debug)]
struct Backoff {
    current: Duration,
}

impl Backoff {
    fn new() -> Self {
        Backoff {
            current: ACCEPT_BACKOFF_MIN,
        }
    }

    fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = (self.current * 2).min(ACCEPT_BACKOFF_MAX);
        delay
    }

    fn reset(&mut self) {
        self.current = ACCEPT_BACKOFF_MIN;
    }
}

/// Binds a listening socket with address reuse enabled.
///
/// Must be called from within a Tokio runtime.
pub fn bind(addr: SocketAddr) -> io::Result<TcpListener> {
    let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))?;
    socket.set_reuse_address(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    socket.listen(BACKLOG)?;
    TcpListener::from_std(socket.into())
}

/// Accepts connections until the hub's shutdown token is cancelled.
pub async fn serve(listener: TcpListener, transport: Transport, hub: Arc<Hub>) {
    let shutdown = hub.shutdown_token().clone();
    if let Ok(addr) = listener.local_addr() {
        info!(%transport, %addr, "listening");
    }

    let mut backoff = Backoff::new();
    loop {
        let accepted = tokio::select! {
            _ = shutdown.cancelled() => break,
            accepted = listener.accept() => accepted,
        };
        let (stream, peer) = match accepted {
            Ok(pair) => {
                backoff.reset();
                pair
            }
            Err(err) => {
                let delay = backoff.next_delay();
                warn!(%transport, %err, ?delay, "accept failed");
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = tokio::time::sleep(delay) => {}
                }
                continue;
            }
        };
        hub.stats().record_accept();
        if let Err(err) = SockRef::from(&stream).set_keepalive(true) {
            debug!(%peer, %err, "cannot enable keepalive");
        }

        match transport {
            Transport::Plain => {
                hub.spawn_worker(stream, peer, false);
            }
            Transport::Tls => {
                tokio::spawn(accept_tls(Arc::clone(&hub), stream, peer));
            }
        }
    }
    info!(%transport, "listener stopped");
}

async fn accept_tls(hub: Arc<Hub>, stream: TcpStream, peer: SocketAddr) {
    // Reload per connection so replaced certificate files apply immediately.
    let acceptor = match tls::load_acceptor(hub.config()) {
        Ok(acceptor) => acceptor,
        Err(err) => {
            warn!(
                %peer,
                %err,
                category = ?err.category(),
                "tls material unavailable; dropping connection"
            );
            hub.stats().record_tls_failure();
            return;
        }
    };

    match tokio::time::timeout(HANDSHAKE_TIMEOUT, acceptor.accept(stream)).await {
        Ok(Ok(stream)) => {
            hub.spawn_worker(stream, peer, true);
        }
        Ok(Err(err)) => {
            warn!(%peer, %err, "tls handshake failed");
            hub.stats().record_tls_failure();
        }
        Err(_) => {
            warn!(%peer, "tls handshake timed out");
            hub.stats().record_tls_failure();
        }
    }
}
