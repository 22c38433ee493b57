//! Answering inbound requests.
//!
//! Every request passes three gates in order: structural validation, the
//! sender's signing policy, then dispatch by type. Failing either of the
//! first two drops the request with a log line and no reply.

use std::net::{SocketAddr, SocketAddrV4};

use arbor_core::wire::{as_v4, decode_nat_address, Hello, HASH_SIZE};
use arbor_core::{Hash, Message, MessageType};
use bytes::Bytes;

use super::Transport;

/// A request that passed structural validation.
#[derive(Debug)]
enum Request {
    NoOp,
    Error(String),
    Hello(Hello),
    PublicKey,
    Root,
    GetDatum(Hash),
    NatTraversalRequest(SocketAddrV4),
    NatTraversal(SocketAddrV4),
}

fn parse_request(msg: &Message) -> Result<Request, &'static str> {
    let body = msg.body();
    match msg.msg_type {
        MessageType::NoOp => Ok(Request::NoOp),
        MessageType::Error => Ok(Request::Error(String::from_utf8_lossy(body).into_owned())),
        MessageType::Hello => Hello::parse(body)
            .map(Request::Hello)
            .map_err(|_| "malformed hello"),
        MessageType::PublicKey => Ok(Request::PublicKey),
        MessageType::Root => match body.len() {
            0 | HASH_SIZE => Ok(Request::Root),
            _ => Err("root body must be empty or one hash"),
        },
        MessageType::GetDatum => body[..]
            .try_into()
            .map(Request::GetDatum)
            .map_err(|_| "get datum body must be one hash"),
        MessageType::NatTraversalRequest => decode_nat_address(body)
            .map(Request::NatTraversalRequest)
            .map_err(|_| "malformed traversal address"),
        MessageType::NatTraversal => decode_nat_address(body)
            .map(Request::NatTraversal)
            .map_err(|_| "malformed traversal address"),
        _ => Err("not a request"),
    }
}

impl Transport {
    /// Validate, authenticate, and answer one inbound request.
    pub async fn handle_request(&self, from: SocketAddr, msg: Message) {
        let request = match parse_request(&msg) {
            Ok(r) => r,
            Err(reason) => {
                tracing::debug!(peer = %from, msg_type = %msg.msg_type, reason, "dropping request");
                return;
            }
        };

        if let Err(e) = self.check_sender_signature(from, &msg).await {
            tracing::warn!(peer = %from, msg_type = %msg.msg_type, error = %e, "rejecting request");
            return;
        }

        match request {
            Request::NoOp => {}

            Request::Error(text) => {
                tracing::warn!(peer = %from, %text, "peer reported an error");
            }

            Request::Hello(hello) => {
                self.book.register(&hello.peer_name, from);
                match Message::hello(msg.id, MessageType::HelloReply, &self.settings.peer_name) {
                    Ok(reply) => self.reply(from, reply).await,
                    Err(e) => tracing::error!(error = %e, "cannot build hello reply"),
                }
            }

            Request::PublicKey => {
                let body = if self.settings.sign_messages {
                    Bytes::copy_from_slice(&self.keypair.public)
                } else {
                    Bytes::new()
                };
                match Message::new(msg.id, MessageType::PublicKeyReply, body) {
                    Ok(reply) => self.reply(from, reply).await,
                    Err(e) => tracing::error!(error = %e, "cannot build public key reply"),
                }
            }

            Request::Root => {
                let root = self.store.root_hash().await;
                self.reply(from, Message::with_hash(msg.id, MessageType::RootReply, &root))
                    .await;
            }

            Request::GetDatum(hash) => {
                let reply = match self.store.datum_for(&hash, msg.id).await {
                    Ok(Some(datum)) => datum,
                    Ok(None) => {
                        tracing::debug!(peer = %from, hash = hex::encode(hash), "no such datum");
                        Message::with_hash(msg.id, MessageType::NoDatum, &hash)
                    }
                    Err(e) => {
                        tracing::warn!(hash = hex::encode(hash), error = %e, "cannot serve datum");
                        Message::with_hash(msg.id, MessageType::NoDatum, &hash)
                    }
                };
                self.reply(from, reply).await;
            }

            Request::NatTraversalRequest(target) => {
                if self.settings.relay_traversal {
                    self.relay_traversal(from, target).await;
                } else {
                    tracing::debug!(peer = %from, %target, "not a relay, dropping traversal request");
                }
            }

            Request::NatTraversal(initiator) => {
                if self.is_server_addr(from).await {
                    self.start_punch(SocketAddr::V4(initiator));
                } else {
                    tracing::warn!(peer = %from, %initiator, "traversal notice not from the server, ignored");
                }
            }
        }
    }

    async fn reply(&self, to: SocketAddr, reply: Message) {
        let reply = self.prepare(reply);
        if let Err(e) = self.send_raw(to, &reply).await {
            tracing::warn!(peer = %to, error = %e, "failed to send reply");
        }
    }

    /// Rendezvous role: tell `target` that `initiator` wants to reach it.
    async fn relay_traversal(&self, initiator: SocketAddr, target: SocketAddrV4) {
        let Some(initiator) = as_v4(initiator) else {
            tracing::debug!(peer = %initiator, "cannot relay for an IPv6 initiator");
            return;
        };
        let relay = Message::nat_traversal(MessageType::NatTraversal, initiator);
        match self.send_raw(SocketAddr::V4(target), &relay).await {
            Ok(()) => tracing::debug!(%initiator, %target, "relayed traversal request"),
            Err(e) => tracing::warn!(%target, error = %e, "failed to relay traversal request"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::tests::{test_transport, test_transport_with};
    use arbor_core::datum::{check_datum_integrity, empty_root_hash};
    use arbor_core::wire::UDP_BUFFER_SIZE;
    use arbor_core::Keypair;
    use arbor_services::StaticDirectory;
    use std::time::Duration;
    use tokio::net::UdpSocket;

    async fn ask(target: SocketAddr, client: &UdpSocket, msg: &Message) -> Option<Message> {
        client.send_to(&msg.encode(), target).await.unwrap();
        let mut buf = vec![0u8; UDP_BUFFER_SIZE];
        match tokio::time::timeout(Duration::from_millis(300), client.recv_from(&mut buf)).await {
            Ok(Ok((n, _))) => Some(Message::decode(&buf, n).unwrap()),
            _ => None,
        }
    }

    #[test]
    fn structural_validation() {
        let short = Message::new(1, MessageType::GetDatum, vec![0u8; 31]).unwrap();
        assert!(parse_request(&short).is_err());
        let root = Message::new(1, MessageType::Root, vec![0u8; 5]).unwrap();
        assert!(parse_request(&root).is_err());
        let nat = Message::new(1, MessageType::NatTraversal, vec![0u8; 18]).unwrap();
        assert!(parse_request(&nat).is_err());
        let hello = Message::new(1, MessageType::Hello, vec![0u8; 4]).unwrap();
        assert!(parse_request(&hello).is_err());
        assert!(parse_request(&Message::empty(1, MessageType::Root)).is_ok());
    }

    #[tokio::test]
    async fn hello_registers_sender() {
        let t = test_transport().await;
        let _tasks = t.start();
        let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let hello = Message::hello(3, MessageType::Hello, "client").unwrap();

        let reply = ask(t.local_addr().unwrap(), &client, &hello).await.unwrap();
        assert_eq!(reply.msg_type, MessageType::HelloReply);
        assert_eq!(Hello::parse(reply.body()).unwrap().peer_name, "tester");
        assert!(arbor_core::crypto::verify(&reply, t.public_key()));
        assert!(reply.is_signed());
        assert!(t
            .address_book()
            .contains("client", client.local_addr().unwrap()));
    }

    #[tokio::test]
    async fn root_and_public_key() {
        let t = test_transport().await;
        let _tasks = t.start();
        let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let target = t.local_addr().unwrap();

        let root = ask(target, &client, &Message::empty(4, MessageType::Root))
            .await
            .unwrap();
        assert_eq!(root.msg_type, MessageType::RootReply);
        assert_eq!(&root.body()[..], &empty_root_hash());

        let key = ask(target, &client, &Message::empty(5, MessageType::PublicKey))
            .await
            .unwrap();
        assert_eq!(key.msg_type, MessageType::PublicKeyReply);
        assert_eq!(&key.body()[..], t.public_key());
    }

    #[tokio::test]
    async fn get_datum_hit_and_miss() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("hello.txt"), b"abc").unwrap();
        let t = test_transport().await;
        let root = t.store().export(dir.path()).await.unwrap();
        let _tasks = t.start();
        let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let target = t.local_addr().unwrap();

        let hit = ask(target, &client, &Message::with_hash(6, MessageType::GetDatum, &root))
            .await
            .unwrap();
        assert_eq!(hit.msg_type, MessageType::Datum);
        check_datum_integrity(hit.body()).unwrap();

        let missing = [0xeeu8; 32];
        let miss = ask(target, &client, &Message::with_hash(7, MessageType::GetDatum, &missing))
            .await
            .unwrap();
        assert_eq!(miss.msg_type, MessageType::NoDatum);
        assert_eq!(&miss.body()[..], &missing);
    }

    #[tokio::test]
    async fn unsigned_hello_from_signing_peer_is_dropped() {
        let peer_key = Keypair::generate();
        let directory = StaticDirectory::new();
        directory.set_key("mallory", Some(peer_key.public));
        let t = test_transport_with("tester", directory).await;
        let _tasks = t.start();
        let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let target = t.local_addr().unwrap();

        let unsigned = Message::hello(8, MessageType::Hello, "mallory").unwrap();
        assert!(ask(target, &client, &unsigned).await.is_none());
        assert!(!t.address_book().knows("mallory"));

        let signed = peer_key.sign(Message::hello(9, MessageType::Hello, "mallory").unwrap());
        let reply = ask(target, &client, &signed).await.unwrap();
        assert_eq!(reply.msg_type, MessageType::HelloReply);
    }

    /// Count the Hellos reaching `socket` until it has been quiet for 150 ms.
    async fn count_hellos(socket: &UdpSocket) -> usize {
        let mut buf = vec![0u8; UDP_BUFFER_SIZE];
        let mut hellos = 0;
        while let Ok(Ok((n, _))) =
            tokio::time::timeout(Duration::from_millis(150), socket.recv_from(&mut buf)).await
        {
            if let Ok(msg) = Message::decode(&buf, n) {
                if msg.msg_type == MessageType::Hello {
                    hellos += 1;
                }
            }
        }
        hellos
    }

    #[tokio::test]
    async fn relay_forwards_initiator_address() {
        let relay = test_transport_with("server", StaticDirectory::new()).await;
        let _tasks = relay.start();
        let initiator = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let target = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let target_v4 = as_v4(target.local_addr().unwrap()).unwrap();

        let req = Message::nat_traversal(MessageType::NatTraversalRequest, target_v4);
        initiator
            .send_to(&req.encode(), relay.local_addr().unwrap())
            .await
            .unwrap();

        let mut buf = vec![0u8; UDP_BUFFER_SIZE];
        let (n, from) = tokio::time::timeout(Duration::from_secs(1), target.recv_from(&mut buf))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(from, relay.local_addr().unwrap());
        let relayed = Message::decode(&buf, n).unwrap();
        assert_eq!(relayed.msg_type, MessageType::NatTraversal);
        assert_eq!(
            SocketAddr::V4(decode_nat_address(relayed.body()).unwrap()),
            initiator.local_addr().unwrap()
        );
    }

    #[tokio::test]
    async fn plain_peer_does_not_relay() {
        let peer = test_transport().await;
        assert!(!peer.settings().relay_traversal);
        let _tasks = peer.start();
        let initiator = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let target = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let target_v4 = as_v4(target.local_addr().unwrap()).unwrap();

        let req = Message::nat_traversal(MessageType::NatTraversalRequest, target_v4);
        initiator
            .send_to(&req.encode(), peer.local_addr().unwrap())
            .await
            .unwrap();

        let mut buf = vec![0u8; UDP_BUFFER_SIZE];
        let got = tokio::time::timeout(Duration::from_millis(300), target.recv_from(&mut buf)).await;
        assert!(got.is_err());
    }

    #[tokio::test]
    async fn traversal_notice_from_stranger_is_ignored() {
        let server = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let directory = StaticDirectory::new();
        directory.set_addresses("server", vec![server.local_addr().unwrap()]);
        let t = test_transport_with("tester", directory).await;
        let _tasks = t.start();

        let stranger = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let victim = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let notice = Message::nat_traversal(
            MessageType::NatTraversal,
            as_v4(victim.local_addr().unwrap()).unwrap(),
        );
        for _ in 0..3 {
            stranger
                .send_to(&notice.encode(), t.local_addr().unwrap())
                .await
                .unwrap();
        }

        assert_eq!(count_hellos(&victim).await, 0);
    }

    #[tokio::test]
    async fn repeated_traversal_notice_punches_once() {
        let server = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let directory = StaticDirectory::new();
        directory.set_addresses("server", vec![server.local_addr().unwrap()]);
        let t = test_transport_with("tester", directory).await;
        let _tasks = t.start();

        let initiator = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let notice = Message::nat_traversal(
            MessageType::NatTraversal,
            as_v4(initiator.local_addr().unwrap()).unwrap(),
        );
        for _ in 0..3 {
            server
                .send_to(&notice.encode(), t.local_addr().unwrap())
                .await
                .unwrap();
        }

        // One punch: every round re-sends the Hello `attempts` times.
        let settings = t.settings();
        let expected = (settings.nat_traversal_retries * settings.attempts()) as usize;
        assert_eq!(count_hellos(&initiator).await, expected);
    }
}
