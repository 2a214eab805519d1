//! # Message Server binary
//!
//! `msgsrv [PORT]` serves in the foreground. `start`, `stop` and `restart`
//! manage a background copy through a pid file.

use std::ffi::OsString;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, value_parser};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use msgsrv_server::config::ServerConfig;
use msgsrv_server::{Dispatcher, service};

const DEFAULT_FILTER: &str = "msgsrv=info,msgsrv_server=info";

#[derive(Debug, Parser)]
#[command(name = "msgsrv", version, about = "Presence and chat relay for database clients")]
#[command(args_conflicts_with_subcommands = true)]
struct Cli {
    #[command(flatten)]
    opts: RunOpts,
    #[command(subcommand)]
    command: Option<Verb>,
}

#[derive(Debug, Clone, Default, Args)]
struct RunOpts {
    /// Plaintext port; TLS listens on PORT+1.
    #[arg(value_parser = value_parser!(u16).range(1..))]
    port: Option<u16>,
    /// JSON configuration file.
    #[arg(long)]
    config: Option<PathBuf>,
    /// Address both listeners bind to.
    #[arg(long)]
    host: Option<String>,
}

impl RunOpts {
    fn load(&self) -> Result<ServerConfig> {
        let mut config = match &self.config {
            Some(path) => ServerConfig::load(path)?,
            None => ServerConfig::default(),
        };
        config.apply_env()?;
        if let Some(host) = &self.host {
            config.host = host.clone();
        }
        if let Some(port) = self.port {
            config.base_port = port;
        }
        Ok(config)
    }

    /// Arguments forwarded to a background `run`.
    fn forward(&self) -> Vec<OsString> {
        let mut args = Vec::new();
        if let Some(path) = &self.config {
            args.push("--config".into());
            args.push(path.clone().into_os_string());
        }
        if let Some(host) = &self.host {
            args.push("--host".into());
            args.push(host.into());
        }
        if let Some(port) = self.port {
            args.push(port.to_string().into());
        }
        args
    }
}

#[derive(Debug, Subcommand)]
enum Verb {
    /// Serve in the foreground.
    Run(RunOpts),
    /// Serve in the background and record its pid.
    Start(RunOpts),
    /// Stop the background server.
    Stop(RunOpts),
    /// Stop, then start, the background server.
    Restart(RunOpts),
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER)),
        )
        .init();

    let cli = Cli::parse();
    match cli.command {
        None => serve(&cli.opts).await,
        Some(Verb::Run(opts)) => serve(&opts).await,
        Some(Verb::Start(opts)) => start(&opts),
        Some(Verb::Stop(opts)) => stop(&opts).map(|_| ()),
        Some(Verb::Restart(opts)) => {
            stop(&opts)?;
            start(&opts)
        }
    }
}

async fn serve(opts: &RunOpts) -> Result<()> {
    let config = opts.load().context("loading configuration")?;
    let dispatcher = match Dispatcher::start(config) {
        Ok(dispatcher) => dispatcher,
        Err(err) => {
            error!(category = ?err.category(), %err, "message server failed to start");
            return Err(err).context("starting message server");
        }
    };

    service::shutdown_signal().await;
    dispatcher.kill_all_threads();
    dispatcher.join().await;
    info!("message server stopped");
    Ok(())
}

fn start(opts: &RunOpts) -> Result<()> {
    let config = opts.load().context("loading configuration")?;
    if let Some(pid) = service::read_pid_file(&config.pid_file)? {
        anyhow::bail!(
            "a server is already recorded as pid {pid} in {}; stop it first",
            config.pid_file.display()
        );
    }
    let pid = service::spawn_background(opts.forward()).context("spawning background server")?;
    service::write_pid_file(&config.pid_file, pid)
        .with_context(|| format!("writing {}", config.pid_file.display()))?;
    println!("Message server started (pid {pid}).");
    Ok(())
}

fn stop(opts: &RunOpts) -> Result<bool> {
    let config = opts.load().context("loading configuration")?;
    let Some(pid) = service::read_pid_file(&config.pid_file)? else {
        println!("Message server is not running.");
        return Ok(false);
    };
    let signalled = service::terminate(pid).with_context(|| format!("stopping pid {pid}"))?;
    service::remove_pid_file(&config.pid_file)?;
    if signalled {
        println!("Message server stopped (pid {pid}).");
    } else {
        println!("Message server (pid {pid}) was not running.");
    }
    Ok(signalled)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_port_runs_in_foreground() {
        let cli = Cli::try_parse_from(["msgsrv", "18000"]).unwrap();
        assert!(cli.command.is_none());
        assert_eq!(cli.opts.port, Some(18000));
    }

    #[test]
    fn verbs_take_their_own_options() {
        let cli = Cli::try_parse_from(["msgsrv", "start", "--host", "127.0.0.1", "18000"]).unwrap();
        let Some(Verb::Start(opts)) = cli.command else {
            panic!("expected start");
        };
        assert_eq!(opts.port, Some(18000));
        assert_eq!(opts.forward(), vec![
            OsString::from("--host"),
            OsString::from("127.0.0.1"),
            OsString::from("18000"),
        ]);
    }

    #[test]
    fn port_zero_is_rejected() {
        assert!(Cli::try_parse_from(["msgsrv", "0"]).is_err());
    }
}
