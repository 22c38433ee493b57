use arbor_core::wire::{as_v4, decode_nat_address, Hello, UDP_BUFFER_SIZE};
use arbor_core::{Message, MessageType};
use arbord::RequestError;

use crate::*;

// ══════════════════════════════════════════════════════════════════════════════
//  NAT traversal through the rendezvous server
// ══════════════════════════════════════════════════════════════════════════════

/// Collect every datagram arriving on `socket` until it stays quiet for
/// `quiet_ms`.
async fn drain(socket: &tokio::net::UdpSocket, quiet_ms: u64) -> Vec<Message> {
    let mut buf = vec![0u8; UDP_BUFFER_SIZE];
    let mut out = Vec::new();
    while let Ok(Ok((n, _))) =
        tokio::time::timeout(Duration::from_millis(quiet_ms), socket.recv_from(&mut buf)).await
    {
        if let Ok(msg) = Message::decode(&buf, n) {
            out.push(msg);
        }
    }
    out
}

/// The server turns a NatTraversalRequest into a NatTraversal for the
/// target, and the target greets the initiator.
#[tokio::test]
async fn test_server_relays_and_target_punches() {
    let server = spawn_node(SERVER).await;
    let target = spawn_node("t").await;
    announce(&target.directory, SERVER, &server);

    let initiator = tokio::net::UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let request = Message::nat_traversal(
        MessageType::NatTraversalRequest,
        as_v4(target.addr()).unwrap(),
    );
    initiator
        .send_to(&request.encode(), server.addr())
        .await
        .unwrap();

    let greetings = drain(&initiator, 150).await;
    let hello = greetings
        .iter()
        .find(|m| m.msg_type == MessageType::Hello)
        .expect("target never greeted the initiator");
    assert_eq!(Hello::parse(hello.body()).unwrap().peer_name, "t");
}

/// Initiator and target end up knowing each other after a traversal.
#[tokio::test]
async fn test_traversal_registers_both_sides() {
    let server = spawn_node(SERVER).await;
    let initiator = spawn_node("i").await;
    let target = spawn_node("t").await;
    announce(&initiator.directory, SERVER, &server);
    announce(&target.directory, SERVER, &server);

    initiator
        .transport
        .nat_traversal("t", target.addr())
        .await
        .unwrap();

    assert!(initiator.transport.address_book().contains("t", target.addr()));
    wait_for_condition(500, || {
        target.transport.address_book().contains("i", initiator.addr())
    })
    .await
    .unwrap();
}

/// A silent target: every round asks the server again, the server relays
/// each time, and the initiator finally gives up.
#[tokio::test]
async fn test_traversal_to_silent_target_gives_up() {
    let server = spawn_node(SERVER).await;
    let initiator = spawn_node("i").await;
    announce(&initiator.directory, SERVER, &server);

    let silent = tokio::net::UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let err = initiator
        .transport
        .nat_traversal("t", silent.local_addr().unwrap())
        .await
        .unwrap_err();
    assert!(matches!(err, RequestError::Unreachable { ref peer } if peer == "t"));

    let seen = drain(&silent, 100).await;
    let relayed: Vec<_> = seen
        .iter()
        .filter(|m| m.msg_type == MessageType::NatTraversal)
        .collect();
    assert_eq!(
        relayed.len() as u32,
        initiator.transport.settings().nat_traversal_retries
    );
    for msg in relayed {
        let from = decode_nat_address(msg.body()).unwrap();
        assert_eq!(std::net::SocketAddr::V4(from), initiator.addr());
    }
}

/// Ordinary peers do not relay for strangers.
#[tokio::test]
async fn test_plain_peer_refuses_to_relay() {
    let peer = spawn_node("p").await;
    let target = tokio::net::UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let initiator = tokio::net::UdpSocket::bind("127.0.0.1:0").await.unwrap();

    let request = Message::nat_traversal(
        MessageType::NatTraversalRequest,
        as_v4(target.local_addr().unwrap()).unwrap(),
    );
    initiator
        .send_to(&request.encode(), peer.addr())
        .await
        .unwrap();

    assert!(drain(&target, 200).await.is_empty());
}
