//! # Message Server
//!
//! Presence and chat relay for desktop database clients. Every client
//! connects over plain TCP or TLS, announces which database it is editing,
//! and from then on exchanges delimiter-framed lines with the peers editing
//! the same database.
//!
//! ## Design Principles
//!
//! 1. **One Registry**: [`registry::Registry`] is the only record of who is
//!    connected; workers hold just their own handle.
//! 2. **Database Partitioning**: Relays never cross a `(dbHost, dbName)` pair.
//! 3. **Fail-Open Workers**: Errors end at most one connection; the sweeper
//!    cleans up whatever a dead worker left behind.
//! 4. **Async First**: Tokio tasks for listeners, workers and the sweeper.

pub mod admin;
pub mod audit;
pub mod config;
pub mod connect;
pub mod dispatcher;
pub mod error;
pub mod framing;
pub mod hub;
pub mod listener;
pub mod registry;
pub mod service;
pub mod stats;
pub mod sweeper;
pub mod tls;
pub mod worker;
pub mod workers;

pub use config::ServerConfig;
pub use dispatcher::Dispatcher;
pub use error::ServerError;
