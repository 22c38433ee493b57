//! Merkle tree over an exported directory.
//!
//! Nodes live in a flat arena and refer to each other by index, children
//! before parents, so a single forward pass over the arena is a post-order
//! walk. Only leaf paths are kept in memory: chunk bytes are re-read from
//! disk every time a datum is served.

use std::collections::HashMap;
use std::fs;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use arbor_core::datum::{
    datum_hash, encode_name, CHUNK_MAX_SIZE, FILENAME_SIZE, MAX_DIRECTORY_ENTRIES,
};
use arbor_core::{Datum, DatumError, DatumKind, DirectoryEntry, Hash, Message};

/// Index of a node inside its [`MerkleTree`].
pub type NodeId = usize;

#[derive(Debug, Clone)]
pub enum NodeKind {
    /// One chunk of a file: bytes `[index * 1024, (index + 1) * 1024)`.
    Chunk { path: PathBuf, index: u64 },
    /// A big file split into chunks. Never produced by [`MerkleTree::build_tree`].
    Tree { children: Vec<NodeId> },
    /// Children ordered by name, names zero-padded to 32 bytes.
    Directory { children: Vec<([u8; FILENAME_SIZE], NodeId)> },
}

#[derive(Debug, Clone)]
pub struct Node {
    pub name: String,
    pub kind: NodeKind,
    pub parent: Option<NodeId>,
    /// `None` until [`MerkleTree::compute_hashes`] reaches this node.
    pub hash: Option<Hash>,
}

impl Node {
    pub fn datum_kind(&self) -> DatumKind {
        match self.kind {
            NodeKind::Chunk { .. } => DatumKind::Chunk,
            NodeKind::Tree { .. } => DatumKind::Tree,
            NodeKind::Directory { .. } => DatumKind::Directory,
        }
    }
}

#[derive(Debug)]
pub struct MerkleTree {
    nodes: Vec<Node>,
    root: NodeId,
    index: HashMap<Hash, NodeId>,
}

impl MerkleTree {
    /// Build, hash, and index the tree rooted at `root_path`.
    pub fn build(root_path: &Path) -> Result<Self, StoreError> {
        let mut tree = Self::build_tree(root_path)?;
        tree.compute_hashes()?;
        Ok(tree)
    }

    /// Walk `root_path` into an arena. Leaf hashes are set from file content;
    /// directory hashes are left for [`compute_hashes`](Self::compute_hashes).
    ///
    /// Any I/O error, over-long name, oversize directory, or file above one
    /// chunk aborts the whole build.
    pub fn build_tree(root_path: &Path) -> Result<Self, StoreError> {
        let mut nodes = Vec::new();
        let name = root_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let root = build_node(&mut nodes, root_path, name)?;
        Ok(Self {
            nodes,
            root,
            index: HashMap::new(),
        })
    }

    /// Fill in every missing hash, children before parents, then rebuild
    /// the lookup table. Nodes whose hash is already set are left alone.
    ///
    /// Returns how many hashes were computed.
    pub fn compute_hashes(&mut self) -> Result<usize, StoreError> {
        let mut computed = 0;
        for id in 0..self.nodes.len() {
            if self.nodes[id].hash.is_some() {
                continue;
            }
            let hash = match &self.nodes[id].kind {
                NodeKind::Chunk { path, index } => {
                    let data = read_chunk(path, *index)?;
                    datum_hash(DatumKind::Chunk, &data)
                }
                NodeKind::Tree { children } => {
                    let mut payload = Vec::with_capacity(children.len() * 32);
                    for child in children {
                        payload.extend_from_slice(&self.child_hash(*child)?);
                    }
                    datum_hash(DatumKind::Tree, &payload)
                }
                NodeKind::Directory { children } => {
                    let mut payload = Vec::with_capacity(children.len() * 64);
                    for (name, child) in children {
                        payload.extend_from_slice(name);
                        payload.extend_from_slice(&self.child_hash(*child)?);
                    }
                    datum_hash(DatumKind::Directory, &payload)
                }
            };
            self.nodes[id].hash = Some(hash);
            computed += 1;
        }

        self.index = self
            .nodes
            .iter()
            .enumerate()
            .filter_map(|(id, n)| n.hash.map(|h| (h, id)))
            .collect();
        Ok(computed)
    }

    fn child_hash(&self, child: NodeId) -> Result<Hash, StoreError> {
        self.nodes[child].hash.ok_or(StoreError::Unhashed(child))
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    pub fn root_hash(&self) -> Option<Hash> {
        self.nodes[self.root].hash
    }

    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id]
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// O(1) hash → node lookup. Empty until hashes are computed.
    pub fn lookup(&self, hash: &Hash) -> Option<NodeId> {
        self.index.get(hash).copied()
    }

    /// Materialize the Datum reply for `id`, echoing `request_id`.
    ///
    /// Chunk bytes are read from disk and re-hashed. If the file changed
    /// since export the node is stale and no datum is produced.
    pub fn to_datum(&self, id: NodeId, request_id: u32) -> Result<Message, StoreError> {
        let node = &self.nodes[id];
        let expected = node.hash.ok_or(StoreError::Unhashed(id))?;

        let datum = match &node.kind {
            NodeKind::Chunk { path, index } => {
                let data = read_chunk(path, *index)?;
                let datum = Datum::chunk(data)?;
                if datum.hash() != &expected {
                    return Err(StoreError::StaleChunk(path.clone()));
                }
                datum
            }
            NodeKind::Tree { children } => Datum::tree(
                children
                    .iter()
                    .map(|c| self.child_hash(*c))
                    .collect::<Result<_, _>>()?,
            )?,
            NodeKind::Directory { children } => Datum::directory(
                children
                    .iter()
                    .map(|(_, c)| {
                        Ok(DirectoryEntry {
                            name: self.nodes[*c].name.clone(),
                            hash: self.child_hash(*c)?,
                        })
                    })
                    .collect::<Result<_, StoreError>>()?,
            )?,
        };

        Ok(datum.into_message(request_id)?)
    }
}

// ── Building ──────────────────────────────────────────────────────────────────

fn build_node(nodes: &mut Vec<Node>, path: &Path, name: String) -> Result<NodeId, StoreError> {
    let meta = fs::metadata(path).map_err(|e| StoreError::Io(path.to_path_buf(), e))?;

    if meta.is_dir() {
        let mut entries = fs::read_dir(path)
            .map_err(|e| StoreError::Io(path.to_path_buf(), e))?
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| StoreError::Io(path.to_path_buf(), e))?;
        entries.sort_by_key(|e| e.file_name());

        if entries.len() > MAX_DIRECTORY_ENTRIES {
            return Err(StoreError::TooManyEntries(path.to_path_buf(), entries.len()));
        }

        let mut children = Vec::with_capacity(entries.len());
        for entry in entries {
            let child_path = entry.path();
            let child_name = entry
                .file_name()
                .into_string()
                .map_err(|_| StoreError::BadName(child_path.clone()))?;
            let slot = encode_name(&child_name).map_err(|e| match e {
                DatumError::NameTooLong(_) => StoreError::NameTooLong(child_path.clone()),
                _ => StoreError::BadName(child_path.clone()),
            })?;
            let child = build_node(nodes, &child_path, child_name)?;
            children.push((slot, child));
        }

        let id = nodes.len();
        for (_, child) in &children {
            nodes[*child].parent = Some(id);
        }
        nodes.push(Node {
            name,
            kind: NodeKind::Directory { children },
            parent: None,
            hash: None,
        });
        return Ok(id);
    }

    if meta.len() > CHUNK_MAX_SIZE as u64 {
        return Err(StoreError::NotImplemented(path.to_path_buf()));
    }

    let data = read_chunk(path, 0)?;
    let id = nodes.len();
    nodes.push(Node {
        name,
        kind: NodeKind::Chunk {
            path: path.to_path_buf(),
            index: 0,
        },
        parent: None,
        hash: Some(datum_hash(DatumKind::Chunk, &data)),
    });
    Ok(id)
}

fn read_chunk(path: &Path, index: u64) -> Result<Vec<u8>, StoreError> {
    let io = |e: std::io::Error| StoreError::Io(path.to_path_buf(), e);
    let mut file = fs::File::open(path).map_err(io)?;
    file.seek(SeekFrom::Start(index * CHUNK_MAX_SIZE as u64))
        .map_err(io)?;
    let mut data = Vec::with_capacity(CHUNK_MAX_SIZE);
    file.take(CHUNK_MAX_SIZE as u64 + 1)
        .read_to_end(&mut data)
        .map_err(io)?;
    if index == 0 && data.len() > CHUNK_MAX_SIZE {
        // Grew past one chunk since it was stat'ed.
        return Err(StoreError::StaleChunk(path.to_path_buf()));
    }
    data.truncate(CHUNK_MAX_SIZE);
    Ok(data)
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("{0}: {1}")]
    Io(PathBuf, std::io::Error),

    #[error("{0}: files larger than one chunk are not implemented")]
    NotImplemented(PathBuf),

    #[error("{0}: file name longer than 32 bytes")]
    NameTooLong(PathBuf),

    #[error("{0}: file name is not valid UTF-8 or contains NUL")]
    BadName(PathBuf),

    #[error("{0}: directory has {1} entries, at most 16 are supported")]
    TooManyEntries(PathBuf, usize),

    #[error("{0}: file changed since it was exported")]
    StaleChunk(PathBuf),

    #[error("node {0} has no hash yet")]
    Unhashed(NodeId),

    #[error(transparent)]
    Datum(#[from] DatumError),
}

// ── Tests ─────────────────────────────────────────────────────────────────────
