//! Background-service helpers behind the `start`, `stop` and `restart` verbs.

use std::ffi::OsString;
use std::io;
use std::path::Path;
use std::process::{Command, Stdio};

use tracing::{debug, info};

/// Records `pid` so a later `stop` can find the background server.
pub fn write_pid_file(path: &Path, pid: u32) -> io::Result<()> {
    std::fs::write(path, format!("{pid}\n"))
}

/// Reads the recorded pid; `None` if no server was started.
pub fn read_pid_file(path: &Path) -> io::Result<Option<u32>> {
    match std::fs::read_to_string(path) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err)),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(err) => Err(err),
    }
}

/// Removes the pid file, ignoring a file that is already gone.
pub fn remove_pid_file(path: &Path) -> io::Result<()> {
    match std::fs::remove_file(path) {
        Err(err) if err.kind() != io::ErrorKind::NotFound => Err(err),
        _ => Ok(()),
    }
}

/// Re-launches this executable with `run <args>` detached from the terminal.
/// Returns the child's pid.
pub fn spawn_background<I>(args: I) -> io::Result<u32>
where
    I: IntoIterator<Item = OsString>,
{
    let exe = std::env::current_exe()?;
    let child = Command::new(exe)
        .arg("run")
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()?;
    info!(pid = child.id(), "server started in background");
    Ok(child.id())
}

/// Asks the process `pid` to shut down. Returns false if it was not running.
#[cfg(unix)]
pub fn terminate(pid: u32) -> io::Result<bool> {
    use nix::errno::Errno;
    use nix::sys::signal::{Signal, kill};
    use nix::unistd::Pid;

    let raw = i32::try_from(pid).map_err(|err| io::Error::new(io::ErrorKind::InvalidInput, err))?;
    match kill(Pid::from_raw(raw), Signal::SIGTERM) {
        Ok(()) => {
            info!(pid, "sent SIGTERM");
            Ok(true)
        }
        Err(Errno::ESRCH) => {
            debug!(pid, "process already gone");
            Ok(false)
        }
        Err(errno) => Err(io::Error::from(errno)),
    }
}

#[cfg(not(unix))]
pub fn terminate(_pid: u32) -> io::Result<bool> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        "stopping a background server is only supported on unix",
    ))
}

/// Resolves on Ctrl-C, or SIGTERM on unix.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            debug!(%err, "cannot listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(err) => {
                debug!(%err, "cannot listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("interrupt received"),
        _ = terminate => info!("terminate received"),
    }
}
