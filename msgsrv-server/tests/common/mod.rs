//! Shared fixtures for the end-to-end tests.

#![allow(dead_code)]

use std::path::Path;
use std::time::Duration;

use msgsrv_client::Client;
use msgsrv_server::config::ServerConfig;
use msgsrv_server::{Dispatcher, listener};

pub const WAIT: Duration = Duration::from_secs(3);
pub const QUIET: Duration = Duration::from_millis(200);
pub const BUILD: u32 = msgsrv_common::SERVER_VERSION;

/// Config with TLS material pointed into `dir` (absent unless a test writes it).
pub fn test_config(dir: &Path) -> ServerConfig {
    ServerConfig {
        host: "127.0.0.1".to_string(),
        cert_path: dir.join("MessageServer.crt"),
        key_path: dir.join("MessageServer.key"),
        pid_file: dir.join("msgsrv.pid"),
        ..ServerConfig::default()
    }
}

/// Starts a dispatcher on two ephemeral ports.
pub fn spawn_test_server(config: ServerConfig) -> Dispatcher {
    let plain = listener::bind("127.0.0.1:0".parse().unwrap()).unwrap();
    let tls = listener::bind("127.0.0.1:0".parse().unwrap()).unwrap();
    Dispatcher::from_listeners(config, plain, tls).unwrap()
}

/// Connects, sends `C`, and returns the client once `V` has arrived, along
/// with everything received up to and including it.
pub fn join(server: &Dispatcher, name: &str, db_host: &str, db_name: &str) -> (Client, Vec<String>) {
    join_as(server, name, db_host, db_name, BUILD)
}

pub fn join_as(
    server: &Dispatcher,
    name: &str,
    db_host: &str,
    db_name: &str,
    version: u32,
) -> (Client, Vec<String>) {
    let mut client = Client::connect(server.plain_addr()).unwrap();
    client.join(name, db_host, db_name, false, version).unwrap();
    let frames = client.recv_until(WAIT, |frame| frame.starts_with("V ")).unwrap();
    (client, frames)
}

/// Next frame, failing the test if none arrives.
pub fn expect(client: &mut Client) -> String {
    client.recv(WAIT).unwrap().expect("expected a frame")
}

/// Polls `check` until it holds or `WAIT` passes.
pub async fn eventually<F: FnMut() -> bool>(mut check: F) -> bool {
    let deadline = tokio::time::Instant::now() + WAIT;
    while tokio::time::Instant::now() < deadline {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    check()
}
