//! Reaching a peer by name, and the request helpers built on it.

use std::collections::HashSet;
use std::net::SocketAddr;

use arbor_core::crypto::parse_public_key;
use arbor_core::wire::{as_v4, Hello, WireError, HASH_SIZE};
use arbor_core::{Datum, Hash, Message, MessageType, PublicKey};

use super::{RequestError, Transport};

impl Transport {
    /// Exchange Hello/HelloReply with `addr` and register it under the name
    /// the reply announces. Returns that name.
    pub async fn hello(&self, addr: SocketAddr) -> Result<String, RequestError> {
        let msg = Message::hello(rand::random(), MessageType::Hello, &self.settings.peer_name)?;
        let reply = self.send_to_addr_with_reemissions(addr, &msg).await?;
        let hello = Hello::parse(reply.body())?;
        self.book.register(&hello.peer_name, addr);
        Ok(hello.peer_name)
    }

    /// Send `msg` to `peer` wherever it can be reached, and return its reply.
    ///
    /// Known addresses are tried first; each one that stays silent is
    /// evicted. Then every fresh IPv4 address from the directory is greeted,
    /// directly or through NAT traversal, before the request is sent there.
    /// A soft failure ends the search at once.
    pub async fn connect_and_send_and_receive(
        &self,
        peer: &str,
        msg: &Message,
    ) -> Result<Message, RequestError> {
        let mut tried = HashSet::new();

        for addr in self.book.addresses(peer).unwrap_or_default() {
            tried.insert(addr);
            match self.send_to_addr_with_reemissions(addr, msg).await {
                Ok(reply) => return Ok(reply),
                Err(e) if e.is_hard() => {
                    tracing::info!(%peer, %addr, error = %e, "evicting silent address");
                    self.book.evict(peer, addr);
                }
                Err(e) => return Err(e),
            }
        }

        let fresh = self.directory.addresses(peer).await?;
        for addr in fresh {
            if as_v4(addr).is_none() || !tried.insert(addr) {
                continue;
            }

            match self.hello(addr).await {
                Ok(_) => {}
                Err(e) if e.is_hard() => {
                    tracing::debug!(%peer, %addr, "direct hello failed, trying NAT traversal");
                    if let Err(e) = self.nat_traversal(peer, addr).await {
                        tracing::info!(%peer, %addr, error = %e, "NAT traversal failed");
                        continue;
                    }
                }
                Err(e) => return Err(e),
            }

            match self.send_to_addr_with_reemissions(addr, msg).await {
                Ok(reply) => {
                    self.book.register(peer, addr);
                    return Ok(reply);
                }
                Err(e) if e.is_hard() => {
                    tracing::info!(%peer, %addr, error = %e, "fresh address went silent");
                    self.book.evict(peer, addr);
                }
                Err(e) => return Err(e),
            }
        }

        Err(RequestError::Unreachable {
            peer: peer.to_string(),
        })
    }

    /// Fetch and verify the datum for `hash` from `peer`.
    pub async fn download_datum(&self, peer: &str, hash: &Hash) -> Result<Datum, RequestError> {
        let msg = Message::with_hash(rand::random(), MessageType::GetDatum, hash);
        let reply = self.connect_and_send_and_receive(peer, &msg).await?;
        match reply.msg_type {
            MessageType::Datum => Ok(Datum::parse(reply.body())?),
            MessageType::NoDatum => Err(RequestError::NoDatum(*hash)),
            got => Err(RequestError::UnexpectedReply {
                sent: MessageType::GetDatum,
                got,
            }),
        }
    }

    /// The root `peer` currently publishes. Asks the peer first and falls
    /// back to what it declared to the directory.
    pub async fn get_root_of_peer(&self, peer: &str) -> Result<Hash, RequestError> {
        let ours = self.store.root_hash().await;
        let msg = Message::with_hash(rand::random(), MessageType::Root, &ours);

        let wire_err = match self.connect_and_send_and_receive(peer, &msg).await {
            Ok(reply) => match <Hash>::try_from(&reply.body()[..]) {
                Ok(root) => return Ok(root),
                Err(_) => RequestError::Malformed(WireError::BadBodyLength {
                    msg_type: reply.msg_type,
                    expected: HASH_SIZE,
                    got: reply.body().len(),
                }),
            },
            Err(e) => e,
        };

        tracing::debug!(%peer, error = %wire_err, "root over the wire failed, asking directory");
        match self.directory.root(peer).await {
            Ok(Some(root)) => Ok(root),
            Ok(None) | Err(_) => Err(wire_err),
        }
    }

    /// Ask `peer` for its public key over the wire. `None` means it does
    /// not sign.
    pub async fn public_key_of_peer(&self, peer: &str) -> Result<Option<PublicKey>, RequestError> {
        let msg = Message::empty(rand::random(), MessageType::PublicKey);
        let reply = self.connect_and_send_and_receive(peer, &msg).await?;
        Ok(parse_public_key(reply.body())?)
    }
}
