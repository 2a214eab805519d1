//! # Relay Integration Tests
//!
//! Purpose: Drive a real dispatcher over TCP with blocking clients and check
//! what each peer sees.
//!
//! ## Design Principles
//!
//! 1. **End-to-End**: Every assertion is on bytes a client actually read.
//! 2. **Isolated Server**: Each test binds its own ephemeral ports.
//! 3. **Silence Counts**: Clients that must not see a message are drained
//!    and checked empty.

mod common;

use common::{QUIET, expect, join, join_as, spawn_test_server, test_config};
use msgsrv_client::Client;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn relays_stay_inside_one_database() {
    let dir = tempfile::tempdir().unwrap();
    let server = spawn_test_server(test_config(dir.path()));

    let (mut alice, frames) = join(&server, "Alice", "h", "n");
    assert_eq!(frames, ["V MessageServer: ServerValidated"]);

    let (mut bob, _) = join(&server, "Bob", "H", "N");
    assert_eq!(expect(&mut bob), "C Alice FALSE");
    assert_eq!(expect(&mut alice), "C Bob FALSE");

    let (mut carol, _) = join(&server, "Carol", "H", "M");
    assert!(carol.drain(QUIET).unwrap().is_empty());

    alice.say("hello").unwrap();
    assert_eq!(expect(&mut alice), "M Alice: hello");
    assert_eq!(expect(&mut bob), "M Alice: hello");
    assert!(carol.drain(QUIET).unwrap().is_empty());

    bob.leave("Bob").unwrap();
    assert_eq!(expect(&mut alice), "D Bob");
    bob.wait_closed(common::WAIT).unwrap();
    assert!(carol.drain(QUIET).unwrap().is_empty());

    server.kill_all_threads();
    server.join().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn colliding_names_get_numbered() {
    let dir = tempfile::tempdir().unwrap();
    let server = spawn_test_server(test_config(dir.path()));

    let (mut first, _) = join(&server, "Alice", "H", "N");

    let (mut second, frames) = join(&server, "Alice", "H", "N");
    assert_eq!(frames, ["R Alice(2) FALSE", "V MessageServer: ServerValidated"]);
    assert_eq!(expect(&mut second), "C Alice FALSE");
    assert_eq!(expect(&mut first), "C Alice(2) FALSE");

    let (_third, frames) = join(&server, "Alice", "H", "OTHER");
    assert_eq!(frames[0], "R Alice(3) FALSE");

    server.kill_all_threads();
    server.join().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn older_clients_are_warned_but_validated() {
    let dir = tempfile::tempdir().unwrap();
    let server = spawn_test_server(test_config(dir.path()));

    let (_old, frames) = join_as(&server, "Old", "H", "N", common::BUILD - 10);
    assert_eq!(frames.len(), 3);
    assert!(frames[0].starts_with("M MessageServer: "));
    assert_eq!(frames[2], "V MessageServer: ServerValidated");

    let (_foreign, frames) = join_as(&server, "Foreign", "H", "N", common::BUILD + 100);
    assert!(frames[0].starts_with("M MessageServer: WARNING"));
    assert_eq!(frames.last().unwrap(), "V MessageServer: ServerValidated");

    server.kill_all_threads();
    server.join().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn disconnect_uses_the_assigned_name() {
    let dir = tempfile::tempdir().unwrap();
    let server = spawn_test_server(test_config(dir.path()));

    let (mut alice, _) = join(&server, "Alice", "H", "N");
    let (mut twin, _) = join(&server, "Alice", "H", "N");
    expect(&mut twin);
    assert_eq!(expect(&mut alice), "C Alice(2) FALSE");

    twin.leave("Alice").unwrap();
    assert_eq!(expect(&mut alice), "D Alice(2)");
    assert!(server.hub().registry().len() == 1);

    server.kill_all_threads();
    server.join().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn dropped_socket_synthesizes_disconnect() {
    let dir = tempfile::tempdir().unwrap();
    let server = spawn_test_server(test_config(dir.path()));

    let (mut alice, _) = join(&server, "Alice", "H", "N");
    let (bob, _) = join(&server, "Bob", "H", "N");
    assert_eq!(expect(&mut alice), "C Bob FALSE");

    bob.abort().unwrap();
    assert_eq!(expect(&mut alice), "D Bob");
    let hub = server.hub().clone();
    assert!(common::eventually(|| hub.registry().len() == 1).await);

    server.kill_all_threads();
    server.join().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn private_messages_reach_only_recipients() {
    let dir = tempfile::tempdir().unwrap();
    let server = spawn_test_server(test_config(dir.path()));

    let (mut alice, _) = join(&server, "Alice", "H", "N");
    let (mut bob, _) = join(&server, "Bob", "H", "N");
    let (mut dave, _) = join(&server, "Dave", "H", "N");
    alice.drain(QUIET).unwrap();
    bob.drain(QUIET).unwrap();
    dave.drain(QUIET).unwrap();

    alice.whisper("psst", &["Bob"]).unwrap();
    let expected = "M Alice: psst (private message to Bob)";
    assert_eq!(expect(&mut alice), expected);
    assert_eq!(expect(&mut bob), expected);
    assert!(dave.drain(QUIET).unwrap().is_empty());

    server.kill_all_threads();
    server.join().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn private_messages_reach_every_listed_recipient() {
    let dir = tempfile::tempdir().unwrap();
    let server = spawn_test_server(test_config(dir.path()));

    let (mut alice, _) = join(&server, "Alice", "H", "N");
    let (mut bob, _) = join(&server, "Bob", "H", "N");
    let (mut carol, _) = join(&server, "Carol", "H", "N");
    let (mut dave, _) = join(&server, "Dave", "H", "N");
    for client in [&mut alice, &mut bob, &mut carol, &mut dave] {
        client.drain(QUIET).unwrap();
    }

    alice.whisper("psst", &["Bob", "Carol"]).unwrap();
    let expected = "M Alice: psst (private message to Bob, Carol)";
    assert_eq!(expect(&mut alice), expected);
    assert_eq!(expect(&mut bob), expected);
    assert_eq!(expect(&mut carol), expected);
    assert!(dave.drain(QUIET).unwrap().is_empty());

    server.kill_all_threads();
    server.join().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn updates_are_relayed_with_their_tag() {
    let dir = tempfile::tempdir().unwrap();
    let server = spawn_test_server(test_config(dir.path()));

    let (mut alice, _) = join(&server, "Alice", "H", "N");
    let (mut bob, _) = join(&server, "Bob", "H", "N");
    expect(&mut bob);
    expect(&mut alice);

    bob.send_raw("UR PATIENTS 42").unwrap();
    assert_eq!(expect(&mut alice), "UR Bob: PATIENTS 42");
    assert_eq!(expect(&mut bob), "UR Bob: PATIENTS 42");

    server.kill_all_threads();
    server.join().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn chat_before_connect_is_dropped() {
    let dir = tempfile::tempdir().unwrap();
    let server = spawn_test_server(test_config(dir.path()));

    let (mut alice, _) = join(&server, "Alice", "H", "N");
    let mut lurker = Client::connect(server.plain_addr()).unwrap();
    lurker.say("anyone?").unwrap();

    assert!(alice.drain(QUIET).unwrap().is_empty());
    assert!(lurker.drain(QUIET).unwrap().is_empty());

    server.kill_all_threads();
    server.join().await;
}
