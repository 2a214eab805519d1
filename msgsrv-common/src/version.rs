//! Client/server build compatibility.
//!
//! The server never refuses a client over its version; it only decides which
//! warnings precede the `V` validation line.

/// Build number of this server.
pub const SERVER_VERSION: u32 = 320;

/// Builds sharing `build / MAJOR_DIVISOR` are wire compatible.
pub const MAJOR_DIVISOR: u32 = 100;

/// Outcome of comparing a client build with the server build.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VersionVerdict {
    /// Same build: validate silently.
    Exact,
    /// Older client from the same major line: warn, it still works.
    OlderClient,
    /// Different major line, or a client newer than the server.
    Incompatible,
}

impl VersionVerdict {
    /// Compares a client build against a server build.
    pub const fn assess(client: u32, server: u32) -> Self {
        if client == server {
            Self::Exact
        } else if client < server && client / MAJOR_DIVISOR == server / MAJOR_DIVISOR {
            Self::OlderClient
        } else {
            Self::Incompatible
        }
    }

    /// Warning texts to send before validation, in order.
    pub fn warnings(self, client: u32, server: u32) -> Vec<String> {
        match self {
            Self::Exact => Vec::new(),
            Self::OlderClient => vec![
                format!("This Message Server (build {server}) is newer than your client (build {client})."),
                "Your client will keep working, but please upgrade when you can.".to_string(),
            ],
            Self::Incompatible => vec![
                format!("WARNING: your client (build {client}) does not match this Message Server (build {server})."),
                "Other users of this database may be running incompatible software.".to_string(),
                "Please do not continue. Data corruption is possible.".to_string(),
                "Ask your system administrator for matching client and server versions.".to_string(),
            ],
        }
    }
}
