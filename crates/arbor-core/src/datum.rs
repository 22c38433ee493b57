//! Datum bodies: the content-addressed nodes of a published Merkle tree.
//!
//!   hash (32B) | kind (1B) | payload
//!
//! where `hash = SHA-256(kind || payload)`. Three kinds exist:
//!
//!   Chunk      payload is raw file content, at most 1024 bytes
//!   Tree       payload is 2..=32 child hashes
//!   Directory  payload is 0..=16 entries of name (32B, zero padded) + hash

use std::fmt;

use bytes::{BufMut, Bytes, BytesMut};
use sha2::{Digest, Sha256};

use crate::wire::{Hash, Message, MessageType, HASH_SIZE};

// ── Constants ─────────────────────────────────────────────────────────────────

pub const CHUNK_MAX_SIZE: usize = 1024;
pub const FILENAME_SIZE: usize = 32;
pub const DIRECTORY_ENTRY_SIZE: usize = FILENAME_SIZE + HASH_SIZE;
pub const MAX_DIRECTORY_ENTRIES: usize = 16;
pub const MIN_TREE_CHILDREN: usize = 2;
pub const MAX_TREE_CHILDREN: usize = 32;

pub const DATUM_KIND_INDEX: usize = HASH_SIZE;
pub const DATUM_PAYLOAD_INDEX: usize = HASH_SIZE + 1;

/// Largest Datum body: a full chunk plus hash and kind.
pub const BODY_MAX_SIZE: usize = DATUM_PAYLOAD_INDEX + CHUNK_MAX_SIZE;

// ── Kind ──────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum DatumKind {
    Chunk = 0,
    Tree = 1,
    Directory = 2,
}

impl DatumKind {
    pub fn name(self) -> &'static str {
        match self {
            DatumKind::Chunk => "Chunk",
            DatumKind::Tree => "Tree",
            DatumKind::Directory => "Directory",
        }
    }
}

impl TryFrom<u8> for DatumKind {
    type Error = DatumError;

    fn try_from(value: u8) -> Result<Self, DatumError> {
        match value {
            0 => Ok(DatumKind::Chunk),
            1 => Ok(DatumKind::Tree),
            2 => Ok(DatumKind::Directory),
            other => Err(DatumError::UnknownKind(other)),
        }
    }
}

impl fmt::Display for DatumKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// ── Hashing ───────────────────────────────────────────────────────────────────

/// `SHA-256(kind || payload)`.
pub fn datum_hash(kind: DatumKind, payload: &[u8]) -> Hash {
    let mut hasher = Sha256::new();
    hasher.update([kind as u8]);
    hasher.update(payload);
    hasher.finalize().into()
}

/// Root hash announced by a peer that publishes nothing: `SHA-256("")`.
pub fn empty_root_hash() -> Hash {
    Sha256::digest(b"").into()
}

// ── Names ─────────────────────────────────────────────────────────────────────

/// Zero-pad `name` into a 32-byte directory slot.
pub fn encode_name(name: &str) -> Result<[u8; FILENAME_SIZE], DatumError> {
    let raw = name.as_bytes();
    if raw.is_empty() {
        return Err(DatumError::EmptyName);
    }
    if raw.len() > FILENAME_SIZE {
        return Err(DatumError::NameTooLong(name.to_string()));
    }
    if raw.contains(&0) {
        return Err(DatumError::NameHasNul(name.to_string()));
    }
    let mut out = [0u8; FILENAME_SIZE];
    out[..raw.len()].copy_from_slice(raw);
    Ok(out)
}

/// Strip zero padding from a 32-byte directory slot.
///
/// The name ends at the first zero byte; a slot with no zero uses all 32.
/// Names must be UTF-8 so that re-encoding gives back the same slot.
pub fn decode_name(slot: &[u8]) -> Result<String, DatumError> {
    let end = slot.iter().position(|b| *b == 0).unwrap_or(slot.len());
    if end == 0 {
        return Err(DatumError::EmptyName);
    }
    String::from_utf8(slot[..end].to_vec())
        .map_err(|e| DatumError::NameNotUtf8(e.into_bytes()))
}

// ── Datum ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectoryEntry {
    pub name: String,
    pub hash: Hash,
}

/// A parsed Datum body. The hash is whatever the body stated; use
/// [`check_datum_integrity`] before trusting it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Datum {
    Chunk { hash: Hash, data: Bytes },
    Tree { hash: Hash, children: Vec<Hash> },
    Directory { hash: Hash, entries: Vec<DirectoryEntry> },
}

impl Datum {
    /// A chunk over `data`, hash computed.
    pub fn chunk(data: impl Into<Bytes>) -> Result<Self, DatumError> {
        let data = data.into();
        if data.len() > CHUNK_MAX_SIZE {
            return Err(DatumError::ChunkTooLarge(data.len()));
        }
        let hash = datum_hash(DatumKind::Chunk, &data);
        Ok(Datum::Chunk { hash, data })
    }

    /// An interior node over `children`, hash computed.
    pub fn tree(children: Vec<Hash>) -> Result<Self, DatumError> {
        if !(MIN_TREE_CHILDREN..=MAX_TREE_CHILDREN).contains(&children.len()) {
            return Err(DatumError::BadTreeFanout(children.len()));
        }
        let hash = datum_hash(DatumKind::Tree, &children.concat());
        Ok(Datum::Tree { hash, children })
    }

    /// A directory over `entries` in the given order, hash computed.
    pub fn directory(entries: Vec<DirectoryEntry>) -> Result<Self, DatumError> {
        if entries.len() > MAX_DIRECTORY_ENTRIES {
            return Err(DatumError::TooManyEntries(entries.len()));
        }
        let payload = directory_payload(&entries)?;
        let hash = datum_hash(DatumKind::Directory, &payload);
        Ok(Datum::Directory { hash, entries })
    }

    pub fn hash(&self) -> &Hash {
        match self {
            Datum::Chunk { hash, .. } | Datum::Tree { hash, .. } | Datum::Directory { hash, .. } => {
                hash
            }
        }
    }

    pub fn kind(&self) -> DatumKind {
        match self {
            Datum::Chunk { .. } => DatumKind::Chunk,
            Datum::Tree { .. } => DatumKind::Tree,
            Datum::Directory { .. } => DatumKind::Directory,
        }
    }

    /// Parse a Datum body without checking its hash.
    pub fn parse(body: &[u8]) -> Result<Self, DatumError> {
        if body.len() < DATUM_PAYLOAD_INDEX {
            return Err(DatumError::TooShort(body.len()));
        }
        let mut hash = [0u8; HASH_SIZE];
        hash.copy_from_slice(&body[..HASH_SIZE]);
        let kind = DatumKind::try_from(body[DATUM_KIND_INDEX])?;
        let payload = &body[DATUM_PAYLOAD_INDEX..];

        match kind {
            DatumKind::Chunk => {
                if payload.len() > CHUNK_MAX_SIZE {
                    return Err(DatumError::ChunkTooLarge(payload.len()));
                }
                Ok(Datum::Chunk {
                    hash,
                    data: Bytes::copy_from_slice(payload),
                })
            }
            DatumKind::Tree => {
                if payload.len() % HASH_SIZE != 0 {
                    return Err(DatumError::Misaligned(kind, payload.len()));
                }
                let count = payload.len() / HASH_SIZE;
                if !(MIN_TREE_CHILDREN..=MAX_TREE_CHILDREN).contains(&count) {
                    return Err(DatumError::BadTreeFanout(count));
                }
                let children = payload
                    .chunks_exact(HASH_SIZE)
                    .map(|c| {
                        let mut h = [0u8; HASH_SIZE];
                        h.copy_from_slice(c);
                        h
                    })
                    .collect();
                Ok(Datum::Tree { hash, children })
            }
            DatumKind::Directory => {
                if payload.len() % DIRECTORY_ENTRY_SIZE != 0 {
                    return Err(DatumError::Misaligned(kind, payload.len()));
                }
                let count = payload.len() / DIRECTORY_ENTRY_SIZE;
                if count > MAX_DIRECTORY_ENTRIES {
                    return Err(DatumError::TooManyEntries(count));
                }
                let entries = payload
                    .chunks_exact(DIRECTORY_ENTRY_SIZE)
                    .map(|e| {
                        let name = decode_name(&e[..FILENAME_SIZE])?;
                        let mut h = [0u8; HASH_SIZE];
                        h.copy_from_slice(&e[FILENAME_SIZE..]);
                        Ok(DirectoryEntry { name, hash: h })
                    })
                    .collect::<Result<Vec<_>, DatumError>>()?;
                Ok(Datum::Directory { hash, entries })
            }
        }
    }

    /// Serialize to a Datum body: hash, kind, payload.
    pub fn to_body(&self) -> Result<Bytes, DatumError> {
        let payload: Bytes = match self {
            Datum::Chunk { data, .. } => data.clone(),
            Datum::Tree { children, .. } => Bytes::from(children.concat()),
            Datum::Directory { entries, .. } => directory_payload(entries)?.freeze(),
        };
        let mut out = BytesMut::with_capacity(DATUM_PAYLOAD_INDEX + payload.len());
        out.put_slice(self.hash());
        out.put_u8(self.kind() as u8);
        out.put_slice(&payload);
        Ok(out.freeze())
    }

    /// Wrap this datum in a Datum reply carrying `id`.
    pub fn into_message(&self, id: u32) -> Result<Message, DatumError> {
        let body = self.to_body()?;
        if body.len() > BODY_MAX_SIZE {
            return Err(DatumError::ChunkTooLarge(body.len() - DATUM_PAYLOAD_INDEX));
        }
        Ok(Message::small(id, MessageType::Datum, body))
    }
}

fn directory_payload(entries: &[DirectoryEntry]) -> Result<BytesMut, DatumError> {
    let mut payload = BytesMut::with_capacity(entries.len() * DIRECTORY_ENTRY_SIZE);
    for entry in entries {
        payload.put_slice(&encode_name(&entry.name)?);
        payload.put_slice(&entry.hash);
    }
    Ok(payload)
}

/// Does the hash stated in `body` match `SHA-256(kind || payload)`, and is
/// the payload well formed for its kind?
pub fn check_datum_integrity(body: &[u8]) -> Result<(), DatumError> {
    if body.len() < DATUM_PAYLOAD_INDEX {
        return Err(DatumError::TooShort(body.len()));
    }
    let computed: Hash = Sha256::digest(&body[DATUM_KIND_INDEX..]).into();
    if computed[..] != body[..HASH_SIZE] {
        return Err(DatumError::Corrupted);
    }
    Datum::parse(body).map(|_| ())
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DatumError {
    #[error("datum body too short: {0} bytes")]
    TooShort(usize),

    #[error("unknown datum kind: {0}")]
    UnknownKind(u8),

    #[error("datum is corrupted: hash does not match content")]
    Corrupted,

    #[error("chunk of {0} bytes exceeds 1024")]
    ChunkTooLarge(usize),

    #[error("tree must have 2..=32 children, got {0}")]
    BadTreeFanout(usize),

    #[error("directory holds at most 16 entries, got {0}")]
    TooManyEntries(usize),

    #[error("{0} payload of {1} bytes is not a whole number of entries")]
    Misaligned(DatumKind, usize),

    #[error("empty file name")]
    EmptyName,

    #[error("file name longer than 32 bytes: {0}")]
    NameTooLong(String),

    #[error("file name contains a NUL byte: {0:?}")]
    NameHasNul(String),

    #[error("file name is not UTF-8: {0:?}")]
    NameNotUtf8(Vec<u8>),
}

// ── Tests ─────────────────────────────────────────────────────────────────────
