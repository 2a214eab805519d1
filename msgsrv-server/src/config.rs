//! # Server Configuration
//!
//! Defaults, an optional JSON file and a few environment variables combine
//! into one [`ServerConfig`]. Command-line overrides are applied by the
//! binary on top of the result.

use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::error::ConfigError;

/// Plaintext port when nothing else is configured; TLS listens one above.
pub const DEFAULT_BASE_PORT: u16 = 17595;

/// Environment variable overriding the base port.
pub const PORT_ENV: &str = "MSGSRV_PORT";

/// Environment variable overriding the listen host.
pub const HOST_ENV: &str = "MSGSRV_HOST";

/// Runtime settings for the dispatcher and its workers.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// IP address both listeners bind to.
    pub host: String,
    /// Plaintext port; TLS uses `base_port + 1`.
    pub base_port: u16,
    /// PEM certificate chain for the TLS listener.
    pub cert_path: PathBuf,
    /// PEM private key for the TLS listener.
    pub key_path: PathBuf,
    /// Login audit file; absent or empty disables auditing.
    pub login_log: Option<PathBuf>,
    /// Display names allowed to run admin commands.
    pub admins: Vec<String>,
    /// Seconds between liveness sweeps.
    pub sweep_interval_secs: u64,
    /// Consecutive handling errors tolerated before a worker gives up.
    pub error_threshold: u32,
    /// Quiet time after which an unterminated frame is processed anyway.
    pub idle_flush_ms: u64,
    /// Per-worker queue of outbound lines.
    pub outbox_capacity: usize,
    /// Where `start` records the background process id.
    pub pid_file: PathBuf,
}

impl Default for ServerConfig {
    fn default() -> Self {
        let dir = program_dir();
        ServerConfig {
            host: "0.0.0.0".to_string(),
            base_port: DEFAULT_BASE_PORT,
            cert_path: dir.join("MessageServer.crt"),
            key_path: dir.join("MessageServer.key"),
            login_log: None,
            admins: vec!["Administrator".to_string()],
            sweep_interval_secs: 20,
            error_threshold: 50,
            idle_flush_ms: 250,
            outbox_capacity: 1024,
            pid_file: std::env::temp_dir().join("msgsrv.pid"),
        }
    }
}

impl ServerConfig {
    /// Reads a JSON config file; missing fields keep their defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Applies `MSGSRV_PORT` and `MSGSRV_HOST` when set.
    pub fn apply_env(&mut self) -> Result<(), ConfigError> {
        if let Ok(port) = std::env::var(PORT_ENV) {
            self.base_port = parse_port(&port)?;
        }
        if let Ok(host) = std::env::var(HOST_ENV) {
            self.host = host;
        }
        Ok(())
    }

    /// Address of the plaintext listener.
    pub fn plain_addr(&self) -> Result<SocketAddr, ConfigError> {
        Ok(SocketAddr::new(self.ip()?, self.base_port))
    }

    /// Address of the TLS listener.
    pub fn tls_addr(&self) -> Result<SocketAddr, ConfigError> {
        let port = self
            .base_port
            .checked_add(1)
            .ok_or_else(|| ConfigError::InvalidPort(self.base_port.to_string()))?;
        Ok(SocketAddr::new(self.ip()?, port))
    }

    fn ip(&self) -> Result<IpAddr, ConfigError> {
        self.host
            .parse()
            .map_err(|_| ConfigError::InvalidHost(self.host.clone()))
    }

    /// Enabled audit path, if any.
    pub fn login_log(&self) -> Option<&Path> {
        self.login_log
            .as_deref()
            .filter(|path| !path.as_os_str().is_empty())
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs.max(1))
    }

    pub fn idle_flush(&self) -> Duration {
        Duration::from_millis(self.idle_flush_ms.max(1))
    }

    /// Returns true if `name` may run admin commands.
    pub fn is_admin(&self, name: &str) -> bool {
        self.admins.iter().any(|admin| admin == name)
    }
}

/// Parses a port given on the command line or in the environment.
pub fn parse_port(raw: &str) -> Result<u16, ConfigError> {
    match raw.trim().parse::<u16>() {
        Ok(port) if port != 0 => Ok(port),
        _ => Err(ConfigError::InvalidPort(raw.to_string())),
    }
}

/// Directory holding the running executable; certificates live beside it.
fn program_dir() -> PathBuf {
    std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(Path::to_path_buf))
        .unwrap_or_else(|| PathBuf::from("."))
}
