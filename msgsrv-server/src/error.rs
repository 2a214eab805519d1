//! # Server Error Types
//!
//! ## Design Principles
//!
//! 1. **Taxonomy First**: Each error reports an [`ErrorCategory`] so callers
//!    decide between aborting startup, dropping one connection, or ending a
//!    session.
//! 2. **Worker Isolation**: `WorkerError` never leaves the worker that raised it.
//! 3. **Context in the Type**: Paths and addresses travel with the error.

use std::io;
use std::net::SocketAddr;
use std::path::PathBuf;

use msgsrv_common::{ErrorCategory, ProtocolError};
use thiserror::Error;
use tokio_rustls::rustls;

use crate::listener::Transport;

/// Startup and lifecycle failures of the dispatcher.
#[derive(Debug, Error)]
pub enum ServerError {
    /// A listening port could not be bound.
    #[error("failed to bind {transport} listener on {addr}: {source}")]
    Bind {
        transport: Transport,
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },
    /// Configuration was unusable.
    #[error(transparent)]
    Config(#[from] ConfigError),
    /// Any other I/O failure during startup.
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),
}

impl ServerError {
    /// Startup errors stop the process.
    pub const fn category(&self) -> ErrorCategory {
        match self {
            Self::Config(err) => err.category(),
            Self::Bind { .. } | Self::Io(_) => ErrorCategory::Fatal,
        }
    }
}

/// Failures while handling one connection.
#[derive(Debug, Error)]
pub enum WorkerError {
    /// The client sent something unparseable.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    /// The socket failed.
    #[error("socket error: {0}")]
    Io(#[from] io::Error),
}

impl WorkerError {
    /// Returns the failure class used by the worker's error budget.
    pub const fn category(&self) -> ErrorCategory {
        match self {
            Self::Protocol(_) => ErrorCategory::Connection,
            Self::Io(_) => ErrorCategory::Session,
        }
    }
}

/// Failures loading the TLS certificate and key.
#[derive(Debug, Error)]
pub enum TlsError {
    /// A PEM file could not be read.
    #[error("cannot read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    /// The certificate file held no certificates.
    #[error("no certificates found in {0}")]
    NoCertificates(PathBuf),
    /// The key file held no private key.
    #[error("no private key found in {0}")]
    NoPrivateKey(PathBuf),
    /// rustls rejected the certificate/key pair.
    #[error("invalid tls configuration: {0}")]
    Rustls(#[from] rustls::Error),
}

impl TlsError {
    /// Bad TLS material costs only the connection being accepted.
    pub const fn category(&self) -> ErrorCategory {
        ErrorCategory::Connection
    }
}

/// Failures loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The config file could not be read.
    #[error("cannot read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    /// The config file was not valid JSON for [`crate::config::ServerConfig`].
    #[error("cannot parse config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    /// The listen host was not an IP address.
    #[error("invalid listen host `{0}`")]
    InvalidHost(String),
    /// A port setting was out of range.
    #[error("invalid port `{0}`")]
    InvalidPort(String),
}

impl ConfigError {
    pub const fn category(&self) -> ErrorCategory {
        ErrorCategory::Fatal
    }
}
