//! Connect resolution.
//!
//! Deciding what a `C` message does is kept free of sockets and locks so it
//! can be tested on a bare [`Sessions`] map. The worker applies the
//! resulting [`ConnectDecision`] while it still holds the registry lock.

use msgsrv_common::{ConnectRequest, VersionVerdict};

use crate::registry::{ConnectionId, Sessions};

/// What the server will do with one connect request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectDecision {
    /// Display name the session will carry.
    pub name: String,
    /// True if `name` differs from the requested name.
    pub renamed: bool,
    /// Version compatibility outcome; never a refusal.
    pub verdict: VersionVerdict,
}

/// Resolves name collisions and version compatibility for `requester`.
///
/// A name held by the requester's own session does not count as taken, so a
/// client reconnecting on the same socket keeps its name.
pub fn resolve_connect(
    sessions: &Sessions,
    requester: ConnectionId,
    request: &ConnectRequest,
    server_version: u32,
) -> ConnectDecision {
    let name = unique_name(sessions, requester, &request.name);
    ConnectDecision {
        renamed: name != request.name,
        name,
        verdict: VersionVerdict::assess(request.version, server_version),
    }
}

/// Returns `requested`, or the first free `name(n)` variant of it.
pub fn unique_name(sessions: &Sessions, requester: ConnectionId, requested: &str) -> String {
    let mut candidate = requested.to_string();
    while sessions
        .name_owner(&candidate)
        .is_some_and(|owner| owner != requester)
    {
        candidate = next_candidate(&candidate);
    }
    candidate
}

/// `Alice` becomes `Alice(2)`; `Alice(n)` becomes `Alice(n+1)`.
fn next_candidate(name: &str) -> String {
    match numbered_suffix(name) {
        Some((base, n)) => match n.checked_add(1) {
            Some(next) => format!("{base}({next})"),
            None => format!("{name}(2)"),
        },
        None => format!("{name}(2)"),
    }
}

fn numbered_suffix(name: &str) -> Option<(&str, u32)> {
    let inner = name.strip_suffix(')')?;
    let open = inner.rfind('(')?;
    let n = inner[open + 1..].parse::<u32>().ok()?;
    Some((&name[..open], n))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::Registry;
    use crate::registry::tests::session;
    use msgsrv_common::SERVER_VERSION;

    fn request(name: &str, version: u32) -> ConnectRequest {
        ConnectRequest {
            name: name.to_string(),
            db_host: "H".into(),
            db_name: "N".into(),
            ssl: false,
            version,
        }
    }

    #[test]
    fn free_name_is_kept() {
        let registry = Registry::new();
        let decision = resolve_connect(
            &registry.lock(),
            ConnectionId::next(),
            &request("Alice", SERVER_VERSION),
            SERVER_VERSION,
        );
        assert_eq!(decision.name, "Alice");
        assert!(!decision.renamed);
        assert_eq!(decision.verdict, VersionVerdict::Exact);
    }

    #[test]
    fn collision_skips_taken_suffixes() {
        let registry = Registry::new();
        registry.upsert(ConnectionId::next(), session("Alice", "H", "N"));
        registry.upsert(ConnectionId::next(), session("Alice(2)", "H", "N"));

        let decision = resolve_connect(
            &registry.lock(),
            ConnectionId::next(),
            &request("Alice", SERVER_VERSION),
            SERVER_VERSION,
        );
        assert_eq!(decision.name, "Alice(3)");
        assert!(decision.renamed);
    }

    #[test]
    fn collision_is_global_across_databases() {
        let registry = Registry::new();
        registry.upsert(ConnectionId::next(), session("Bob", "OTHER", "DB"));
        let sessions = registry.lock();
        assert_eq!(unique_name(&sessions, ConnectionId::next(), "Bob"), "Bob(2)");
    }

    #[test]
    fn own_name_is_not_a_collision() {
        let registry = Registry::new();
        let me = ConnectionId::next();
        registry.upsert(me, session("Alice", "H", "N"));
        let sessions = registry.lock();
        assert_eq!(unique_name(&sessions, me, "Alice"), "Alice");
    }

    #[test]
    fn numbered_request_increments() {
        let registry = Registry::new();
        registry.upsert(ConnectionId::next(), session("Carol(7)", "H", "N"));
        let sessions = registry.lock();
        assert_eq!(unique_name(&sessions, ConnectionId::next(), "Carol(7)"), "Carol(8)");
        assert_eq!(next_candidate("Dave(x)"), "Dave(x)(2)");
    }

    #[test]
    fn version_gate_never_refuses() {
        let registry = Registry::new();
        for version in [0, SERVER_VERSION - 10, SERVER_VERSION, SERVER_VERSION + 1, 9_999] {
            let decision = resolve_connect(
                &registry.lock(),
                ConnectionId::next(),
                &request("Eve", version),
                SERVER_VERSION,
            );
            assert_eq!(decision.name, "Eve");
        }
    }
}
