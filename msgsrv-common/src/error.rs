//! # Message Server Error Types
//!
//! ## Design Principles
//!
//! 1. **Categorized Failures**: Every error maps onto one of the server's
//!    failure classes (fatal, connection-local, session-terminal).
//! 2. **Isolation Hints**: Only fatal errors may cross a worker boundary.
//! 3. **Cheap Values**: Protocol errors are small, cloneable and comparable.

use thiserror::Error;

/// Failure class used to decide how far an error propagates.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum ErrorCategory {
    /// The process cannot serve at all (e.g. a port failed to bind).
    Fatal,
    /// One message or handshake failed; the connection keeps going.
    Connection,
    /// The session is over; the worker must clean up and exit.
    Session,
}

impl ErrorCategory {
    /// Returns true if the owning worker must stop.
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Fatal | Self::Session)
    }
}

/// Malformed or unsupported input on the wire.
#[derive(Clone, Debug, Eq, PartialEq, Error)]
pub enum ProtocolError {
    /// The frame held nothing but whitespace.
    #[error("empty message")]
    Empty,
    /// A message carried fewer fields than its tag requires.
    #[error("`{tag}` message is missing fields")]
    MissingFields {
        /// Tag of the offending message.
        tag: String,
    },
    /// The client version field was not a base-10 integer.
    #[error("client version `{0}` is not numeric")]
    BadVersion(String),
    /// A frame grew past the limit without a terminator.
    #[error("frame exceeds {limit} bytes without a terminator")]
    FrameTooLong {
        /// Maximum accepted frame size in bytes.
        limit: usize,
    },
}

impl ProtocolError {
    /// Protocol errors never end a session on their own.
    pub const fn category(&self) -> ErrorCategory {
        ErrorCategory::Connection
    }
}
