//! Address book: peer name → UDP endpoints that answered a Hello.
//!
//! A name with an empty address list is a peer we have talked to but lost;
//! an absent name is a peer we have never reached.

use std::net::SocketAddr;
use std::sync::Arc;

use dashmap::DashMap;

/// Known-good endpoints for one peer, in registration order.
#[derive(Debug, Clone, Default)]
pub struct PeerEntry {
    pub addresses: Vec<SocketAddr>,
}

/// Shared between the listener, handlers, and outbound callers.
#[derive(Debug, Clone, Default)]
pub struct AddressBook {
    peers: Arc<DashMap<String, PeerEntry>>,
}

impl AddressBook {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that `addr` answered for `peer`. Returns false if it was known.
    pub fn register(&self, peer: &str, addr: SocketAddr) -> bool {
        let mut entry = self.peers.entry(peer.to_string()).or_default();
        if entry.addresses.contains(&addr) {
            return false;
        }
        entry.addresses.push(addr);
        tracing::debug!(peer, %addr, "address registered");
        true
    }

    /// Forget `addr` for `peer`. The peer itself stays known.
    pub fn evict(&self, peer: &str, addr: SocketAddr) -> bool {
        let Some(mut entry) = self.peers.get_mut(peer) else {
            return false;
        };
        let before = entry.addresses.len();
        entry.addresses.retain(|a| *a != addr);
        let evicted = entry.addresses.len() != before;
        if evicted {
            tracing::debug!(peer, %addr, "address evicted");
        }
        evicted
    }

    /// Snapshot of the endpoints for `peer`. `None` if never contacted.
    pub fn addresses(&self, peer: &str) -> Option<Vec<SocketAddr>> {
        self.peers.get(peer).map(|e| e.addresses.clone())
    }

    pub fn contains(&self, peer: &str, addr: SocketAddr) -> bool {
        self.peers
            .get(peer)
            .is_some_and(|e| e.addresses.contains(&addr))
    }

    pub fn knows(&self, peer: &str) -> bool {
        self.peers.contains_key(peer)
    }

    /// Which peer, if any, is registered at `addr`.
    pub fn peer_at(&self, addr: SocketAddr) -> Option<String> {
        self.peers
            .iter()
            .find(|e| e.addresses.contains(&addr))
            .map(|e| e.key().clone())
    }

    pub fn peers(&self) -> Vec<String> {
        self.peers.iter().map(|e| e.key().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }
}
