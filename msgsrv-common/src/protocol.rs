//! # Line Protocol
//!
//! Purpose: Define the text messages exchanged between desktop clients and
//! the message server, and the tokenizer that turns one frame into a typed
//! [`Message`].
//!
//! ## Design Principles
//!
//! 1. **Legacy Compatibility**: The field layout matches what deployed
//!    clients already send, including the optional SSL flag on connect.
//! 2. **Parse Once**: Wire text becomes a tagged enum before any business
//!    logic looks at it.
//! 3. **Opaque Payloads**: Update notifications are relayed as-is; the server
//!    never interprets their arguments.
//!
//! ## Wire Layout
//!
//! ```text
//! <tag> <fields...> ||| <tag> <fields...> ||| ...
//!
//! C <name> <dbHost> <dbName> [<SSL>] <version>   connect
//! C <name> <SSL>                                 peer announcement
//! D <name>                                       leave
//! R <name> <SSL>                                 server-assigned rename
//! V MessageServer: ServerValidated               connect accepted
//! M <text> [ >|< <recipient> <recipient> ...]     chat / admin
//! U<sub> <args>                                  update notification
//! ```

use std::fmt;

use crate::error::ProtocolError;

/// Terminator appended after every message.
pub const DELIMITER: &str = " ||| ";

/// Separates a chat body from its private recipient list.
pub const PRIVATE_MARKER: &str = " >|< ";

/// Name the server uses when it speaks for itself.
pub const SERVER_NAME: &str = "MessageServer";

/// Fields of a client `C` message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectRequest {
    /// Requested display name (may still collide with a live session).
    pub name: String,
    /// Database host, uppercased.
    pub db_host: String,
    /// Database name, uppercased.
    pub db_name: String,
    /// Whether the client reached the server over TLS.
    pub ssl: bool,
    /// Client build number.
    pub version: u32,
}

/// One protocol message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    /// Client joins a database.
    Connect(ConnectRequest),
    /// Server tells a client that a peer is present.
    Announce { name: String, ssl: bool },
    /// A client leaves.
    Disconnect { name: String },
    /// Server assigned a different display name.
    Rename { name: String, ssl: bool },
    /// Server accepted the connect.
    Validated,
    /// Free text (`M`), including admin commands.
    Chat { body: String },
    /// Cache-invalidation notification (`U*`), opaque to the server.
    Update { tag: String, body: String },
    /// Any other tag; relayed like chat.
    Other { tag: String, body: String },
}

impl Message {
    /// Parses a single frame, with or without its trailing terminator.
    pub fn parse(frame: &str) -> Result<Self, ProtocolError> {
        let frame = frame.trim();
        let frame = frame
            .strip_suffix(DELIMITER.trim())
            .map(str::trim_end)
            .unwrap_or(frame);
        if frame.is_empty() {
            return Err(ProtocolError::Empty);
        }

        let (tag, body) = match frame.split_once(char::is_whitespace) {
            Some((tag, body)) => (tag, body.trim_start()),
            None => (frame, ""),
        };

        match tag {
            "C" => parse_connect(body).map(Message::Connect),
            "D" => Ok(Message::Disconnect {
                name: body.to_string(),
            }),
            "R" => {
                let (name, flag) = body
                    .rsplit_once(' ')
                    .ok_or_else(|| ProtocolError::MissingFields { tag: "R".into() })?;
                Ok(Message::Rename {
                    name: name.trim_end().to_string(),
                    ssl: parse_flag(flag).unwrap_or(false),
                })
            }
            "V" => Ok(Message::Validated),
            "M" => Ok(Message::Chat {
                body: body.to_string(),
            }),
            t if t.starts_with('U') => Ok(Message::Update {
                tag: t.to_string(),
                body: body.to_string(),
            }),
            t => Ok(Message::Other {
                tag: t.to_string(),
                body: body.to_string(),
            }),
        }
    }

    /// Builds a chat line spoken by the server itself.
    pub fn notice(text: impl fmt::Display) -> Self {
        Message::Chat {
            body: format!("{SERVER_NAME}: {text}"),
        }
    }

    /// Returns the one-or-more character tag.
    pub fn tag(&self) -> &str {
        match self {
            Message::Connect(_) | Message::Announce { .. } => "C",
            Message::Disconnect { .. } => "D",
            Message::Rename { .. } => "R",
            Message::Validated => "V",
            Message::Chat { .. } => "M",
            Message::Update { tag, .. } | Message::Other { tag, .. } => tag,
        }
    }

    /// Renders the wire form including the trailing terminator.
    pub fn encode(&self) -> String {
        let mut out = self.to_string();
        out.push_str(DELIMITER);
        out
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Message::Connect(req) => write!(
                f,
                "C {} {} {} {} {}",
                req.name,
                req.db_host,
                req.db_name,
                flag(req.ssl),
                req.version
            ),
            Message::Announce { name, ssl } => write!(f, "C {} {}", name, flag(*ssl)),
            Message::Disconnect { name } => write!(f, "D {}", name),
            Message::Rename { name, ssl } => write!(f, "R {} {}", name, flag(*ssl)),
            Message::Validated => write!(f, "V {SERVER_NAME}: ServerValidated"),
            Message::Chat { body } => write!(f, "M {}", body),
            Message::Update { tag, body } | Message::Other { tag, body } => {
                if body.is_empty() {
                    write!(f, "{}", tag)
                } else {
                    write!(f, "{} {}", tag, body)
                }
            }
        }
    }
}

/// Renders the SSL flag the way legacy clients expect it.
pub const fn flag(ssl: bool) -> &'static str {
    if ssl { "TRUE" } else { "FALSE" }
}

fn parse_flag(token: &str) -> Option<bool> {
    if token.eq_ignore_ascii_case("TRUE") {
        Some(true)
    } else if token.eq_ignore_ascii_case("FALSE") {
        Some(false)
    } else {
        None
    }
}

/// Parses `<name> <dbHost> <dbName> [<SSL>] <version>` from the right, so a
/// display name may itself contain spaces.
fn parse_connect(body: &str) -> Result<ConnectRequest, ProtocolError> {
    let missing = || ProtocolError::MissingFields { tag: "C".into() };
    let tokens: Vec<&str> = body.split_whitespace().collect();

    let (raw_version, rest) = tokens.split_last().ok_or_else(missing)?;
    let version = raw_version
        .parse::<u32>()
        .map_err(|_| ProtocolError::BadVersion((*raw_version).to_string()))?;

    // Older clients never send the flag; a trailing TRUE/FALSE only counts
    // as the flag when enough fields remain for name, host and database.
    let (ssl, rest) = match rest.split_last() {
        Some((last, before)) if before.len() >= 3 => match parse_flag(last) {
            Some(ssl) => (ssl, before),
            None => (false, rest),
        },
        _ => (false, rest),
    };

    if rest.len() < 3 {
        return Err(missing());
    }
    let (name_parts, db) = rest.split_at(rest.len() - 2);

    Ok(ConnectRequest {
        name: name_parts.join(" "),
        db_host: db[0].to_uppercase(),
        db_name: db[1].to_uppercase(),
        ssl,
        version,
    })
}

/// Prefixes a relayed body with its sender: `"<tag> <sender>: <body>"`.
pub fn attribute(tag: &str, sender: &str, body: &str) -> String {
    format!("{tag} {sender}: {body}")
}

/// A chat body addressed to a subset of peers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrivateMessage<'a> {
    /// Text before the marker.
    pub text: &'a str,
    /// Display names after the marker.
    pub recipients: Vec<&'a str>,
}

impl PrivateMessage<'_> {
    /// Returns true if `name` is on the recipient list.
    pub fn is_addressed_to(&self, name: &str) -> bool {
        self.recipients.iter().any(|r| *r == name)
    }

    /// Human-readable suffix appended to the delivered text.
    pub fn footnote(&self) -> String {
        format!("(private message to {})", self.recipients.join(", "))
    }
}

/// Splits a body on the private marker, if present.
pub fn split_private(body: &str) -> Option<PrivateMessage<'_>> {
    let (text, list) = match body.find(PRIVATE_MARKER) {
        Some(idx) => (&body[..idx], &body[idx + PRIVATE_MARKER.len()..]),
        None => ("", body.strip_prefix(PRIVATE_MARKER.trim_start())?),
    };
    Some(PrivateMessage {
        text: text.trim(),
        recipients: list.split_whitespace().collect(),
    })
}

/// Privileged chat commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdminCommand {
    /// List every session.
    ShowUsers,
    /// Report TLS certificate status.
    ShowCertificates,
    /// Terminate every worker and clear the registry.
    ResetUsers,
}

impl AdminCommand {
    /// Recognizes an admin command in a chat body.
    pub fn parse(body: &str) -> Option<Self> {
        match body.trim() {
            "SHOW USERS" => Some(Self::ShowUsers),
            "SHOW CERTIFICATES" => Some(Self::ShowCertificates),
            "RESET USERS" => Some(Self::ResetUsers),
            _ => None,
        }
    }
}
