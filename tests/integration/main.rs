//! Arbor integration test harness.
//!
//! Every test runs several engines inside one process, each on its own
//! loopback UDP socket, with a [`StaticDirectory`] standing in for the HTTP
//! peer directory. Nothing here needs root or network access.
//!
//!   cargo test --test integration
//!
//! Nodes abort their listener and reaper tasks when dropped.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Result};

use arbor_core::{EngineSettings, Keypair};
use arbor_services::{new_store, StaticDirectory};
use arbord::{EngineTasks, Transport};

mod content;
mod failures;
mod nat;
mod signatures;

// ── Harness ───────────────────────────────────────────────────────────────────

/// Name every node uses for the rendezvous server.
pub const SERVER: &str = "server";

/// Short timers so failure paths finish in well under a second. Only the
/// node named [`SERVER`] relays traversal requests.
pub fn fast_settings(peer_name: &str) -> EngineSettings {
    EngineSettings {
        peer_name: peer_name.to_string(),
        listen_addr: "127.0.0.1:0".parse().unwrap(),
        server_peer_name: SERVER.to_string(),
        reemissions: 2,
        reply_timeout: Duration::from_millis(60),
        nat_traversal_retries: 3,
        keep_alive: Duration::from_millis(200),
        reap_interval: Duration::from_millis(50),
        sign_messages: true,
        relay_traversal: peer_name == SERVER,
    }
}

/// One running engine plus the directory it consults.
pub struct Node {
    pub transport: Transport,
    pub directory: Arc<StaticDirectory>,
    tasks: EngineTasks,
}

impl Node {
    pub fn addr(&self) -> SocketAddr {
        self.transport.local_addr().unwrap()
    }
}

impl Drop for Node {
    fn drop(&mut self) {
        self.tasks.abort();
    }
}

pub async fn spawn_node(peer_name: &str) -> Node {
    spawn_node_with(fast_settings(peer_name)).await
}

pub async fn spawn_node_with(settings: EngineSettings) -> Node {
    let directory = Arc::new(StaticDirectory::new());
    let transport = Transport::bind(
        settings,
        Arc::new(Keypair::generate()),
        new_store(),
        directory.clone(),
    )
    .await
    .unwrap();
    let tasks = transport.start();
    Node {
        transport,
        directory,
        tasks,
    }
}

/// Publish `node`'s address and key in `directory` under `name`.
pub fn announce(directory: &StaticDirectory, name: &str, node: &Node) {
    directory.set_addresses(name, vec![node.addr()]);
    directory.set_key(name, Some(*node.transport.public_key()));
}

/// Poll `cond` every 20 ms until it holds or `timeout_ms` elapses.
pub async fn wait_for_condition(timeout_ms: u64, mut cond: impl FnMut() -> bool) -> Result<()> {
    let deadline = tokio::time::Instant::now() + Duration::from_millis(timeout_ms);
    while tokio::time::Instant::now() < deadline {
        if cond() {
            return Ok(());
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    bail!("condition not met within {timeout_ms} ms")
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_nodes_bind_distinct_ports() {
    let a = spawn_node("a").await;
    let b = spawn_node("b").await;
    assert_ne!(a.addr(), b.addr());
    assert!(a.transport.address_book().is_empty());
}

#[tokio::test]
async fn test_hello_registers_both_directions() {
    let a = spawn_node("a").await;
    let b = spawn_node("b").await;

    let name = a.transport.hello(b.addr()).await.unwrap();
    assert_eq!(name, "b");
    assert!(a.transport.address_book().contains("b", b.addr()));
    wait_for_condition(500, || b.transport.address_book().contains("a", a.addr()))
        .await
        .unwrap();
}
