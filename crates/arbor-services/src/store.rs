//! The currently published tree.
//!
//! Handlers read a snapshot (`Arc<MerkleTree>`) and never hold the lock
//! while touching disk. A re-export builds the new tree off to the side and
//! swaps it in whole, so readers see either the old tree or the new one.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use arbor_core::datum::empty_root_hash;
use arbor_core::{Hash, Message};
use tokio::sync::RwLock;

use crate::merkle::{MerkleTree, StoreError};

#[derive(Debug, Default)]
pub struct ContentStore {
    tree: RwLock<Option<Arc<MerkleTree>>>,
}

pub type SharedStore = Arc<ContentStore>;

pub fn new_store() -> SharedStore {
    Arc::new(ContentStore::default())
}

impl ContentStore {
    /// Build the tree for `path` and publish it. On error the previously
    /// published tree, if any, stays in place.
    pub async fn export(&self, path: impl AsRef<Path>) -> Result<Hash, StoreError> {
        let path: PathBuf = path.as_ref().to_path_buf();
        let build_path = path.clone();
        let tree = tokio::task::spawn_blocking(move || MerkleTree::build(&build_path))
            .await
            .map_err(|e| StoreError::Io(path.clone(), std::io::Error::other(e)))??;
        let root = tree.root_hash().ok_or(StoreError::Unhashed(tree.root()))?;
        self.publish(tree).await;
        tracing::info!(path = %path.display(), root = hex::encode(root), "exported");
        Ok(root)
    }

    pub async fn publish(&self, tree: MerkleTree) {
        *self.tree.write().await = Some(Arc::new(tree));
    }

    pub async fn snapshot(&self) -> Option<Arc<MerkleTree>> {
        self.tree.read().await.clone()
    }

    /// Our root hash, or `SHA-256("")` when nothing is published.
    pub async fn root_hash(&self) -> Hash {
        self.snapshot()
            .await
            .and_then(|t| t.root_hash())
            .unwrap_or_else(empty_root_hash)
    }

    /// The Datum reply for `hash`, or `None` if we do not have it.
    pub async fn datum_for(&self, hash: &Hash, request_id: u32) -> Result<Option<Message>, StoreError> {
        let Some(tree) = self.snapshot().await else {
            return Ok(None);
        };
        match tree.lookup(hash) {
            Some(id) => tree.to_datum(id, request_id).map(Some),
            None => Ok(None),
        }
    }
}
