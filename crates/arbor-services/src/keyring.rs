//! Cache of peers' published public keys.
//!
//! `Some(None)` is a cached answer too: the peer publishes no key and its
//! messages are accepted unsigned. Directory failures are never cached.

use std::sync::Arc;

use arbor_core::PublicKey;
use dashmap::DashMap;

use crate::directory::{Directory, DirectoryError};

#[derive(Debug, Clone, Default)]
pub struct KeyRing {
    keys: Arc<DashMap<String, Option<PublicKey>>>,
}

impl KeyRing {
    pub fn new() -> Self {
        Self::default()
    }

    /// What we already know about `peer`, without asking anyone.
    pub fn cached(&self, peer: &str) -> Option<Option<PublicKey>> {
        self.keys.get(peer).map(|k| *k)
    }

    pub fn insert(&self, peer: &str, key: Option<PublicKey>) {
        self.keys.insert(peer.to_string(), key);
    }

    /// The key of `peer`, asking the directory at most once.
    pub async fn key_of(
        &self,
        peer: &str,
        directory: &dyn Directory,
    ) -> Result<Option<PublicKey>, DirectoryError> {
        if let Some(known) = self.cached(peer) {
            return Ok(known);
        }
        let key = directory.public_key(peer).await?;
        tracing::debug!(peer, signs = key.is_some(), "public key fetched");
        self.insert(peer, key);
        Ok(key)
    }
}
