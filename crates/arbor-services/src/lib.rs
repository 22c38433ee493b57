//! arbor-services — state shared by the transport engine: the published
//! Merkle tree, the address book, the pending-reply table, the key ring,
//! and the peer directory.

pub mod directory;
pub mod keyring;
pub mod merkle;
pub mod peer;
pub mod pending;
pub mod store;

pub use directory::{Directory, DirectoryError, HttpDirectory, SharedDirectory, StaticDirectory};
pub use keyring::KeyRing;
pub use merkle::{MerkleTree, NodeId, NodeKind, StoreError};
pub use peer::AddressBook;
pub use pending::PendingReplies;
pub use store::{new_store, ContentStore, SharedStore};
