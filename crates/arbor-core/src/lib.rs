//! arbor-core — wire format, datum format, signatures, and configuration.
//! No networking lives here; every other Arbor crate depends on this one.

pub mod config;
pub mod crypto;
pub mod datum;
pub mod wire;

pub use config::{ArborConfig, EngineSettings};
pub use crypto::{Keypair, PublicKey};
pub use datum::{Datum, DatumError, DatumKind, DirectoryEntry};
pub use wire::{Hash, Message, MessageType, WireError};
