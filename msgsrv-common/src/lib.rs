// msgsrv-common - Shared wire protocol and error types for the message server
//
// This crate defines the line protocol spoken between desktop clients and the server

pub mod error;
pub mod protocol;
pub mod version;

// Re-export for convenience
pub use error::*;
pub use protocol::*;
pub use version::*;
