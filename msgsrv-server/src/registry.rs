//! # Connection Registry
//!
//! The single source of truth for "who is connected": a map from connection
//! handle to [`Session`], behind one mutex.
//!
//! ## Design Principles
//!
//! 1. **One Lock per Logical Step**: Workers take [`Registry::lock`] once per
//!    inbound message and hold it across read, decide and relay, so two
//!    workers never observe each other's half-finished updates.
//! 2. **Convenience Wrappers**: Single-call operations lock internally for
//!    callers that need only one step.
//! 3. **Plain Values**: Snapshots clone sessions so nothing borrows the map
//!    after the guard is released.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::{Mutex, MutexGuard};

/// Opaque handle naming one accepted connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Allocates a process-unique handle.
    pub fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        ConnectionId(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Identity and database affinity of one connected client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    /// Display name, unique across the registry.
    pub name: String,
    /// Uppercased database host.
    pub db_host: String,
    /// Uppercased database name.
    pub db_name: String,
    /// SSL flag declared by the client.
    pub tls: bool,
    /// Client build number.
    pub version: u32,
    /// Remote address of the socket.
    pub peer: SocketAddr,
}

impl Session {
    /// Returns true if this session edits the given database.
    pub fn shares_database(&self, db_host: &str, db_name: &str) -> bool {
        self.db_host == db_host && self.db_name == db_name
    }
}

/// The unlocked session map, reachable through [`Registry::lock`].
#[derive(Debug, Default)]
pub struct Sessions {
    map: HashMap<ConnectionId, Session>,
}

impl Sessions {
    /// Inserts or replaces the session for `id`, returning the old one.
    pub fn upsert(&mut self, id: ConnectionId, session: Session) -> Option<Session> {
        self.map.insert(id, session)
    }

    pub fn get(&self, id: ConnectionId) -> Option<&Session> {
        self.map.get(&id)
    }

    pub fn remove(&mut self, id: ConnectionId) -> Option<Session> {
        self.map.remove(&id)
    }

    /// Sessions on the given database, excluding `exclude`, sorted by handle.
    pub fn snapshot_matching(
        &self,
        db_host: &str,
        db_name: &str,
        exclude: Option<ConnectionId>,
    ) -> Vec<(ConnectionId, Session)> {
        let mut peers: Vec<(ConnectionId, Session)> = self
            .map
            .iter()
            .filter(|(id, session)| {
                Some(**id) != exclude && session.shares_database(db_host, db_name)
            })
            .map(|(id, session)| (*id, session.clone()))
            .collect();
        peers.sort_by_key(|(id, _)| *id);
        peers
    }

    /// Every handle currently holding a session.
    pub fn all_handles(&self) -> HashSet<ConnectionId> {
        self.map.keys().copied().collect()
    }

    /// Handle owning a display name, if any.
    pub fn name_owner(&self, name: &str) -> Option<ConnectionId> {
        self.map
            .iter()
            .find(|(_, session)| session.name == name)
            .map(|(id, _)| *id)
    }

    /// All sessions, sorted by display name.
    pub fn sorted(&self) -> Vec<(ConnectionId, Session)> {
        let mut all: Vec<(ConnectionId, Session)> = self
            .map
            .iter()
            .map(|(id, session)| (*id, session.clone()))
            .collect();
        all.sort_by(|a, b| a.1.name.cmp(&b.1.name));
        all
    }

    pub fn clear(&mut self) {
        self.map.clear();
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

/// Shared, mutex-protected session map.
#[derive(Debug, Default)]
pub struct Registry {
    sessions: Mutex<Sessions>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Locks the map for a multi-step operation.
    ///
    /// The lock is not reentrant: drop the guard before calling any other
    /// `Registry` method.
    pub fn lock(&self) -> MutexGuard<'_, Sessions> {
        self.sessions.lock()
    }

    pub fn upsert(&self, id: ConnectionId, session: Session) -> Option<Session> {
        self.lock().upsert(id, session)
    }

    pub fn get(&self, id: ConnectionId) -> Option<Session> {
        self.lock().get(id).cloned()
    }

    pub fn remove(&self, id: ConnectionId) -> Option<Session> {
        self.lock().remove(id)
    }

    pub fn snapshot_matching(
        &self,
        db_host: &str,
        db_name: &str,
        exclude: Option<ConnectionId>,
    ) -> Vec<(ConnectionId, Session)> {
        self.lock().snapshot_matching(db_host, db_name, exclude)
    }

    pub fn all_handles(&self) -> HashSet<ConnectionId> {
        self.lock().all_handles()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}
