//! Privileged chat commands (`SHOW USERS`, `SHOW CERTIFICATES`, `RESET USERS`).
//!
//! The caller checks the allow-list and releases the registry lock before
//! calling [`execute`].

use msgsrv_common::{AdminCommand, Message, flag};
use tracing::{info, warn};

use crate::hub::Hub;
use crate::registry::ConnectionId;
use crate::tls;

/// Runs an admin command on behalf of `requester`, named `admin`.
pub fn execute(hub: &Hub, requester: ConnectionId, admin: &str, command: AdminCommand) {
    match command {
        AdminCommand::ShowUsers => {
            info!(conn = %requester, admin, "admin listed users");
            for line in user_lines(hub) {
                hub.send(requester, &Message::notice(line));
            }
        }
        AdminCommand::ShowCertificates => {
            info!(conn = %requester, admin, "admin listed certificates");
            for line in tls::describe(hub.config()) {
                hub.send(requester, &Message::notice(line));
            }
        }
        AdminCommand::ResetUsers => {
            warn!(conn = %requester, admin, "admin reset all users");
            hub.reset_users();
        }
    }
}

fn user_lines(hub: &Hub) -> Vec<String> {
    let sessions = hub.registry().lock().sorted();
    let mut lines = Vec::with_capacity(sessions.len() + 2);
    lines.push(format!("{} user(s) connected:", sessions.len()));
    for (id, session) in &sessions {
        lines.push(format!(
            "{} on {}/{} SSL={} build {} from {} ({})",
            session.name,
            session.db_host,
            session.db_name,
            flag(session.tls),
            session.version,
            session.peer,
            id
        ));
    }
    lines.push(format!("Server counters: {}", hub.stats().snapshot()));
    lines
}
