//! # Worker
//!
//! One task per client socket. Reads delimiter-framed lines, keeps the
//! client's [`Session`] in the registry current, and relays messages to the
//! workers of peers on the same database.
//!
//! ## Lifecycle
//!
//! ```text
//! AwaitingConnect --C--> Active --D / socket loss / stop--> Closed
//!        |                                                    ^
//!        +----------- socket loss / stop / error budget ------+
//! ```
//!
//! ## Design Principles
//!
//! 1. **One Lock per Message**: Everything a single inbound line causes
//!    (lookup, decision, registry change, fan-out) happens under one
//!    registry lock acquisition.
//! 2. **Relay Drives Announcements**: Peers learn about a newcomer from the
//!    relayed connect, never from a separate welcome broadcast.
//! 3. **Isolation**: Nothing a worker hits propagates to other workers; a lost
//!    socket becomes a synthesized `D` for its peers.
//! 4. **Cancellable Reads**: The read loop races the socket against the
//!    worker's cancellation token, so `stop` takes effect immediately.

use std::net::SocketAddr;
use std::sync::Arc;

use bytes::BytesMut;
use msgsrv_common::{
    AdminCommand, ConnectRequest, DELIMITER, Message, SERVER_VERSION, attribute, split_private,
};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::admin;
use crate::audit::{self, LoginRecord};
use crate::connect::resolve_connect;
use crate::error::WorkerError;
use crate::framing::FrameSplitter;
use crate::hub::Hub;
use crate::registry::{ConnectionId, Session, Sessions};

const READ_CHUNK: usize = 4096;

/// Where a worker is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    /// No `C` seen yet; relays from this client are dropped.
    AwaitingConnect,
    /// The client holds a session.
    Active,
    /// The read loop has ended.
    Closed,
}

/// Why the read loop ended.
#[derive(Debug)]
enum Exit {
    /// The client sent `D`.
    Disconnected,
    /// `stop` or process shutdown.
    Cancelled,
    /// EOF, socket error, or the error budget ran out.
    Lost(String),
}

enum Event {
    Cancelled,
    Read(std::io::Result<usize>),
    Idle,
}

/// Result of handling one parsed message.
enum Step {
    Continue,
    Login(LoginRecord),
    Close,
}

/// Protocol state machine for one connection.
pub struct Worker {
    hub: Arc<Hub>,
    id: ConnectionId,
    peer: SocketAddr,
    tls: bool,
    cancel: CancellationToken,
    state: WorkerState,
    errors: u32,
    splitter: FrameSplitter,
}

impl Worker {
    pub fn new(
        hub: Arc<Hub>,
        id: ConnectionId,
        peer: SocketAddr,
        tls: bool,
        cancel: CancellationToken,
    ) -> Self {
        Worker {
            hub,
            id,
            peer,
            tls,
            cancel,
            state: WorkerState::AwaitingConnect,
            errors: 0,
            splitter: FrameSplitter::default(),
        }
    }

    /// Serves the stream until disconnect, loss or cancellation.
    ///
    /// Outbound lines arrive through `inbox` and are written by a companion
    /// task, so a slow client never blocks the sender's worker.
    pub async fn run<S>(mut self, stream: S, inbox: mpsc::Receiver<String>)
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        info!(conn = %self.id, peer = %self.peer, tls = self.tls, "client connected");
        let (mut reader, writer) = tokio::io::split(stream);
        let writer_task = tokio::spawn(write_loop(writer, inbox, self.cancel.clone(), self.id));

        let exit = self.read_loop(&mut reader).await;
        debug!(conn = %self.id, state = ?self.state, ?exit, "read loop ended");
        match &exit {
            Exit::Disconnected => info!(conn = %self.id, "client disconnected"),
            Exit::Cancelled => {
                self.hub.registry().remove(self.id);
                info!(conn = %self.id, "worker stopped");
            }
            Exit::Lost(reason) => {
                info!(conn = %self.id, %reason, "connection lost");
                self.leave();
            }
        }
        self.state = WorkerState::Closed;

        self.cancel.cancel();
        if let Err(err) = writer_task.await {
            debug!(conn = %self.id, %err, "writer task failed");
        }
    }

    async fn read_loop<R>(&mut self, reader: &mut R) -> Exit
    where
        R: AsyncRead + Unpin,
    {
        let mut buf = BytesMut::with_capacity(READ_CHUNK);
        let cancel = self.cancel.clone();
        let idle = self.hub.config().idle_flush();

        loop {
            loop {
                let frame = match self.splitter.next_frame(&mut buf) {
                    Ok(Some(frame)) => frame,
                    Ok(None) => break,
                    Err(err) => match self.on_error(err.into()) {
                        Some(exit) => return exit,
                        None => continue,
                    },
                };
                if let Some(exit) = self.on_frame(&frame).await {
                    return exit;
                }
            }

            let pending = !buf.is_empty();
            let event = tokio::select! {
                _ = cancel.cancelled() => Event::Cancelled,
                read = reader.read_buf(&mut buf) => Event::Read(read),
                _ = tokio::time::sleep(idle), if pending => Event::Idle,
            };

            match event {
                Event::Cancelled => return Exit::Cancelled,
                Event::Read(Ok(0)) => {
                    if let Some(frame) = self.splitter.finish(&mut buf)
                        && let Some(exit) = self.on_frame(&frame).await
                    {
                        return exit;
                    }
                    return Exit::Lost("peer closed the connection".to_string());
                }
                Event::Read(Ok(_)) => {}
                Event::Read(Err(err)) => return Exit::Lost(WorkerError::from(err).to_string()),
                Event::Idle => {
                    // No terminator arrived; treat the tail as a whole message.
                    if let Some(frame) = self.splitter.finish(&mut buf)
                        && let Some(exit) = self.on_frame(&frame).await
                    {
                        return exit;
                    }
                }
            }
        }
    }

    async fn on_frame(&mut self, frame: &str) -> Option<Exit> {
        self.hub.stats().record_frame();
        trace!(conn = %self.id, frame, "received");

        let step = match Message::parse(frame) {
            Ok(message) => {
                trace!(conn = %self.id, tag = message.tag(), "parsed");
                self.handle(message)
            }
            Err(err) => return self.on_error(err.into()),
        };
        self.errors = 0;

        match step {
            Step::Continue => None,
            Step::Login(record) => {
                if let Some(path) = self.hub.config().login_log() {
                    audit::append(path, &record).await;
                }
                None
            }
            Step::Close => Some(Exit::Disconnected),
        }
    }

    /// Counts a failed message; returns an exit once the budget is spent.
    fn on_error(&mut self, err: WorkerError) -> Option<Exit> {
        if err.category().is_terminal() {
            return Some(Exit::Lost(err.to_string()));
        }
        self.errors += 1;
        warn!(conn = %self.id, errors = self.errors, %err, "bad message");
        let threshold = self.hub.config().error_threshold.max(1);
        (self.errors >= threshold)
            .then(|| Exit::Lost(format!("{} consecutive bad messages", self.errors)))
    }

    fn handle(&mut self, message: Message) -> Step {
        match message {
            Message::Connect(request) => Step::Login(self.on_connect(request)),
            Message::Disconnect { name } => {
                debug!(conn = %self.id, claimed = %name, "disconnect requested");
                self.leave();
                Step::Close
            }
            Message::Chat { body } => {
                self.on_chat(&body);
                Step::Continue
            }
            Message::Update { tag, body } | Message::Other { tag, body } => {
                self.on_relay(&tag, &body);
                Step::Continue
            }
            Message::Announce { .. } | Message::Rename { .. } | Message::Validated => {
                debug!(conn = %self.id, "ignoring server-to-client message from client");
                Step::Continue
            }
        }
    }

    fn on_connect(&mut self, request: ConnectRequest) -> LoginRecord {
        let hub = Arc::clone(&self.hub);
        let mut sessions = hub.registry().lock();

        if request.ssl != self.tls {
            debug!(
                conn = %self.id,
                declared = request.ssl,
                tls = self.tls,
                "declared ssl flag differs from transport"
            );
        }

        let decision = resolve_connect(&sessions, self.id, &request, SERVER_VERSION);
        let session = Session {
            name: decision.name.clone(),
            db_host: request.db_host.clone(),
            db_name: request.db_name.clone(),
            tls: self.tls,
            version: request.version,
            peer: self.peer,
        };

        // Reconnecting to a different database on the same socket: the old
        // database's peers see this client leave.
        if let Some(previous) = sessions.upsert(self.id, session)
            && !previous.shares_database(&request.db_host, &request.db_name)
        {
            let old_peers =
                sessions.snapshot_matching(&previous.db_host, &previous.db_name, Some(self.id));
            let leave = Message::Disconnect {
                name: previous.name,
            };
            hub.relay(handles(&old_peers), &leave.encode());
        }

        if decision.renamed {
            info!(
                conn = %self.id,
                requested = %request.name,
                assigned = %decision.name,
                "display name taken; client renamed"
            );
            hub.send(
                self.id,
                &Message::Rename {
                    name: decision.name.clone(),
                    ssl: self.tls,
                },
            );
        }
        for warning in decision.verdict.warnings(request.version, SERVER_VERSION) {
            hub.send(self.id, &Message::notice(warning));
        }
        hub.send(self.id, &Message::Validated);

        // The relayed connect tells existing peers about the newcomer; the
        // newcomer alone receives the roster of who is already here.
        let peers = sessions.snapshot_matching(&request.db_host, &request.db_name, Some(self.id));
        let announce = Message::Announce {
            name: decision.name.clone(),
            ssl: self.tls,
        };
        hub.relay(handles(&peers), &announce.encode());
        for (_, peer) in &peers {
            hub.send(
                self.id,
                &Message::Announce {
                    name: peer.name.clone(),
                    ssl: peer.tls,
                },
            );
        }
        drop(sessions);

        self.state = WorkerState::Active;
        info!(
            conn = %self.id,
            name = %decision.name,
            db_host = %request.db_host,
            db_name = %request.db_name,
            version = request.version,
            verdict = ?decision.verdict,
            "client joined"
        );

        LoginRecord {
            name: decision.name,
            db_host: request.db_host,
            db_name: request.db_name,
            ssl: self.tls,
            version: request.version,
        }
    }

    /// Removes this client's session and tells its peers, using the
    /// registry's name rather than whatever the client last claimed.
    fn leave(&mut self) -> Option<Session> {
        let hub = Arc::clone(&self.hub);
        let mut sessions = hub.registry().lock();
        let Some(session) = sessions.remove(self.id) else {
            debug!(conn = %self.id, "no session to remove");
            return None;
        };
        let peers = sessions.snapshot_matching(&session.db_host, &session.db_name, None);
        let line = Message::Disconnect {
            name: session.name.clone(),
        }
        .encode();
        hub.relay(handles(&peers), &line);
        Some(session)
    }

    fn on_chat(&mut self, body: &str) {
        let hub = Arc::clone(&self.hub);
        let sessions = hub.registry().lock();
        let Some(sender) = sessions.get(self.id).cloned() else {
            debug!(conn = %self.id, "dropping chat before connect");
            return;
        };

        if let Some(command) = AdminCommand::parse(body)
            && hub.config().is_admin(&sender.name)
        {
            drop(sessions);
            admin::execute(&hub, self.id, &sender.name, command);
            return;
        }
        self.relay_from(&hub, &sessions, &sender, "M", body);
    }

    fn on_relay(&mut self, tag: &str, body: &str) {
        let hub = Arc::clone(&self.hub);
        let sessions = hub.registry().lock();
        let Some(sender) = sessions.get(self.id).cloned() else {
            debug!(conn = %self.id, tag, "dropping relay before connect");
            return;
        };
        self.relay_from(&hub, &sessions, &sender, tag, body);
    }

    /// Fans a message out to the sender's database, or to the named
    /// recipients of a private message. The sender always gets a copy.
    fn relay_from(&self, hub: &Hub, sessions: &Sessions, sender: &Session, tag: &str, body: &str) {
        let peers = sessions.snapshot_matching(&sender.db_host, &sender.db_name, None);

        let delivered = match split_private(body) {
            Some(private) => {
                let text = format!("{} {}", private.text, private.footnote());
                let line = format!("{}{DELIMITER}", attribute(tag, &sender.name, text.trim_start()));
                let targets = peers
                    .iter()
                    .filter(|(id, peer)| *id == self.id || private.is_addressed_to(&peer.name))
                    .map(|(id, _)| *id);
                hub.relay(targets, &line)
            }
            None => {
                let line = format!("{}{DELIMITER}", attribute(tag, &sender.name, body));
                hub.relay(handles(&peers), &line)
            }
        };
        trace!(conn = %self.id, tag, delivered, "relayed");
    }
}

fn handles(peers: &[(ConnectionId, Session)]) -> impl Iterator<Item = ConnectionId> + '_ {
    peers.iter().map(|(id, _)| *id)
}

/// Drains the outbox to the socket, batching queued lines per flush.
async fn write_loop<W>(
    mut writer: W,
    mut inbox: mpsc::Receiver<String>,
    cancel: CancellationToken,
    id: ConnectionId,
) where
    W: AsyncWrite + Unpin,
{
    loop {
        let line = tokio::select! {
            biased;
            line = inbox.recv() => match line {
                Some(line) => line,
                None => break,
            },
            _ = cancel.cancelled() => break,
        };
        if let Err(err) = writer.write_all(line.as_bytes()).await {
            debug!(conn = %id, %err, "write failed");
            return;
        }
        while let Ok(queued) = inbox.try_recv() {
            if let Err(err) = writer.write_all(queued.as_bytes()).await {
                debug!(conn = %id, %err, "write failed");
                return;
            }
        }
        if let Err(err) = writer.flush().await {
            debug!(conn = %id, %err, "flush failed");
            return;
        }
    }
    if let Err(err) = writer.shutdown().await {
        trace!(conn = %id, %err, "shutdown failed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServerConfig;
    use std::time::Duration;
    use tokio::io::DuplexStream;

    const WAIT: Duration = Duration::from_secs(2);

    struct Pipe {
        stream: DuplexStream,
        buf: BytesMut,
        splitter: FrameSplitter,
    }

    impl Pipe {
        async fn send(&mut self, line: &str) {
            self.stream.write_all(line.as_bytes()).await.unwrap();
        }

        /// Next frame, or `None` on EOF or timeout.
        async fn next(&mut self, wait: Duration) -> Option<String> {
            loop {
                if let Some(frame) = self.splitter.next_frame(&mut self.buf).unwrap() {
                    return Some(frame);
                }
                match tokio::time::timeout(wait, self.stream.read_buf(&mut self.buf)).await {
                    Ok(Ok(0)) | Ok(Err(_)) | Err(_) => return None,
                    Ok(Ok(_)) => {}
                }
            }
        }

        async fn expect(&mut self) -> String {
            self.next(WAIT).await.expect("expected a frame")
        }
    }

    fn hub(config: ServerConfig) -> Arc<Hub> {
        Arc::new(Hub::new(config))
    }

    fn attach(hub: &Arc<Hub>) -> (ConnectionId, Pipe) {
        attach_over(hub, false)
    }

    fn attach_over(hub: &Arc<Hub>, tls: bool) -> (ConnectionId, Pipe) {
        let (client, server) = tokio::io::duplex(64 * 1024);
        let id = hub.spawn_worker(server, "127.0.0.1:50000".parse().unwrap(), tls);
        let pipe = Pipe {
            stream: client,
            buf: BytesMut::new(),
            splitter: FrameSplitter::default(),
        };
        (id, pipe)
    }

    #[tokio::test]
    async fn connect_is_validated() {
        let hub = hub(ServerConfig::default());
        let (id, mut alice) = attach(&hub);
        alice.send("C Alice h n 320 ||| ").await;

        assert_eq!(alice.expect().await, "V MessageServer: ServerValidated");
        let session = hub.registry().get(id).unwrap();
        assert_eq!(session.name, "Alice");
        assert_eq!((session.db_host.as_str(), session.db_name.as_str()), ("H", "N"));
    }

    #[tokio::test]
    async fn session_records_the_transport_not_the_declared_flag() {
        let hub = hub(ServerConfig::default());
        let (plain_id, mut plain) = attach_over(&hub, false);
        plain.send("C Liar h n TRUE 320 ||| ").await;
        assert_eq!(plain.expect().await, "V MessageServer: ServerValidated");
        assert!(!hub.registry().get(plain_id).unwrap().tls);

        let (secure_id, mut secure) = attach_over(&hub, true);
        secure.send("C Modest h n FALSE 320 ||| ").await;
        assert_eq!(secure.expect().await, "V MessageServer: ServerValidated");
        assert_eq!(secure.expect().await, "C Liar FALSE");
        assert_eq!(plain.expect().await, "C Modest TRUE");
        assert!(hub.registry().get(secure_id).unwrap().tls);
    }

    #[tokio::test]
    async fn old_client_is_warned_then_validated() {
        let hub = hub(ServerConfig::default());
        let (_, mut alice) = attach(&hub);
        alice.send("C Alice h n 100 ||| ").await;

        let mut lines = Vec::new();
        loop {
            let line = alice.expect().await;
            let done = line.starts_with("V ");
            lines.push(line);
            if done {
                break;
            }
        }
        assert!(lines.len() > 1);
        assert!(lines[0].starts_with("M MessageServer: WARNING"));
    }

    #[tokio::test]
    async fn unterminated_frame_is_flushed_after_idle() {
        let config = ServerConfig {
            idle_flush_ms: 20,
            ..ServerConfig::default()
        };
        let hub = hub(config);
        let (_, mut alice) = attach(&hub);
        alice.send("C Alice h n 320").await;
        assert_eq!(alice.expect().await, "V MessageServer: ServerValidated");
    }

    #[tokio::test]
    async fn chat_before_connect_is_dropped() {
        let hub = hub(ServerConfig::default());
        let (_, mut alice) = attach(&hub);
        alice.send("M anyone? ||| ").await;
        assert!(alice.next(Duration::from_millis(100)).await.is_none());
    }

    #[tokio::test]
    async fn error_budget_ends_session_and_notifies_peers() {
        let config = ServerConfig {
            error_threshold: 3,
            ..ServerConfig::default()
        };
        let hub = hub(config);
        let (_, mut alice) = attach(&hub);
        alice.send("C Alice h n 320 ||| ").await;
        alice.expect().await;

        let (bob_id, mut bob) = attach(&hub);
        bob.send("C Bob h n 320 ||| ").await;
        assert_eq!(bob.expect().await, "V MessageServer: ServerValidated");
        assert_eq!(alice.expect().await, "C Bob FALSE");

        bob.send("C broken ||| C broken ||| C broken ||| ").await;
        assert_eq!(alice.expect().await, "D Bob");
        assert!(hub.registry().get(bob_id).is_none());
    }

    #[tokio::test]
    async fn stop_closes_the_socket_silently() {
        let hub = hub(ServerConfig::default());
        let (alice_id, mut alice) = attach(&hub);
        alice.send("C Alice h n 320 ||| ").await;
        alice.expect().await;
        let (_, mut bob) = attach(&hub);
        bob.send("C Bob h n 320 ||| ").await;
        assert_eq!(bob.expect().await, "V MessageServer: ServerValidated");
        assert_eq!(bob.expect().await, "C Alice FALSE");
        alice.expect().await;

        assert!(hub.stop_worker(alice_id));
        assert!(alice.next(WAIT).await.is_none());
        assert!(bob.next(Duration::from_millis(100)).await.is_none());
        assert!(hub.registry().get(alice_id).is_none());
    }

    #[tokio::test]
    async fn reconnecting_to_another_database_leaves_the_old_one() {
        let hub = hub(ServerConfig::default());
        let (_, mut alice) = attach(&hub);
        alice.send("C Alice h n 320 ||| ").await;
        alice.expect().await;
        let (_, mut bob) = attach(&hub);
        bob.send("C Bob h n 320 ||| ").await;
        bob.expect().await;
        bob.expect().await;
        alice.expect().await;

        bob.send("C Bob h other 320 ||| ").await;
        assert_eq!(alice.expect().await, "D Bob");
        assert_eq!(bob.expect().await, "V MessageServer: ServerValidated");
    }
}
