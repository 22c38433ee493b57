//! The peer directory: who exists, where they listen, what they publish.
//!
//! The engine only sees the [`Directory`] trait. [`HttpDirectory`] talks to
//! the rendezvous server's REST interface; [`StaticDirectory`] is an
//! in-memory table for local networks and tests.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use arbor_core::crypto::{parse_public_key, SignatureError};
use arbor_core::{Hash, PublicKey};
use async_trait::async_trait;
use dashmap::DashMap;
use reqwest::{StatusCode, Url};

#[async_trait]
pub trait Directory: Send + Sync {
    /// Every registered peer name.
    async fn peers(&self) -> Result<Vec<String>, DirectoryError>;

    /// Endpoints the peer last registered from.
    async fn addresses(&self, peer: &str) -> Result<Vec<SocketAddr>, DirectoryError>;

    /// Declared root hash. `None` if the peer has not declared one.
    async fn root(&self, peer: &str) -> Result<Option<Hash>, DirectoryError>;

    /// Published public key. `None` if the peer does not sign.
    async fn public_key(&self, peer: &str) -> Result<Option<PublicKey>, DirectoryError>;
}

pub type SharedDirectory = Arc<dyn Directory>;

// ── HTTP ──────────────────────────────────────────────────────────────────────

/// REST client for the rendezvous server.
///
///   GET /peers/                  newline-separated names
///   GET /peers/<name>/addresses  newline-separated host:port
///   GET /peers/<name>/root       32 raw bytes, 204 if none declared
///   GET /peers/<name>/key        64 raw bytes, 204 or empty if none
///
/// Every request is bounded by `timeout`.
pub struct HttpDirectory {
    client: reqwest::Client,
    base_url: Url,
}

impl HttpDirectory {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, DirectoryError> {
        let base_url =
            Url::parse(base_url).map_err(|e| DirectoryError::BadUrl(format!("{base_url}: {e}")))?;
        if base_url.cannot_be_a_base() {
            return Err(DirectoryError::BadUrl(base_url.to_string()));
        }
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client, base_url })
    }

    /// `base_url` with `segments` appended, each one percent-encoded.
    fn url_for(&self, segments: &[&str]) -> Result<Url, DirectoryError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| DirectoryError::BadUrl(self.base_url.to_string()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    async fn get(&self, segments: &[&str]) -> Result<(StatusCode, bytes::Bytes), DirectoryError> {
        let url = self.url_for(segments)?;
        let resp = self.client.get(url.clone()).send().await?;
        let status = resp.status();
        let body = resp.bytes().await?;
        tracing::trace!(%url, %status, len = body.len(), "directory response");
        Ok((status, body))
    }

    /// Fetch a per-peer resource, mapping 404 to `UnknownPeer`.
    async fn get_peer(&self, peer: &str, what: &str) -> Result<(StatusCode, bytes::Bytes), DirectoryError> {
        let (status, body) = self.get(&["peers", peer, what]).await?;
        match status {
            StatusCode::NOT_FOUND => Err(DirectoryError::UnknownPeer(peer.to_string())),
            s if s.is_success() => Ok((status, body)),
            s => Err(DirectoryError::Status(s.as_u16())),
        }
    }
}

fn lines(body: &[u8]) -> impl Iterator<Item = &str> {
    std::str::from_utf8(body)
        .unwrap_or_default()
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
}

#[async_trait]
impl Directory for HttpDirectory {
    async fn peers(&self) -> Result<Vec<String>, DirectoryError> {
        let (status, body) = self.get(&["peers", ""]).await?;
        if !status.is_success() {
            return Err(DirectoryError::Status(status.as_u16()));
        }
        Ok(lines(&body).map(str::to_string).collect())
    }

    async fn addresses(&self, peer: &str) -> Result<Vec<SocketAddr>, DirectoryError> {
        let (_, body) = self.get_peer(peer, "addresses").await?;
        let mut out = Vec::new();
        for line in lines(&body) {
            match line.parse() {
                Ok(addr) => out.push(addr),
                Err(_) => tracing::warn!(peer, line, "skipping unparsable address"),
            }
        }
        Ok(out)
    }

    async fn root(&self, peer: &str) -> Result<Option<Hash>, DirectoryError> {
        let (status, body) = self.get_peer(peer, "root").await?;
        if status == StatusCode::NO_CONTENT {
            return Ok(None);
        }
        let hash: Hash = body[..]
            .try_into()
            .map_err(|_| DirectoryError::BadBody(format!("root of {} bytes", body.len())))?;
        Ok(Some(hash))
    }

    async fn public_key(&self, peer: &str) -> Result<Option<PublicKey>, DirectoryError> {
        let (status, body) = self.get_peer(peer, "key").await?;
        if status == StatusCode::NO_CONTENT {
            return Ok(None);
        }
        Ok(parse_public_key(&body)?)
    }
}

// ── In-memory ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default)]
struct StaticPeer {
    addresses: Vec<SocketAddr>,
    root: Option<Hash>,
    key: Option<PublicKey>,
}

/// A directory filled in by hand.
#[derive(Debug, Clone, Default)]
pub struct StaticDirectory {
    peers: Arc<DashMap<String, StaticPeer>>,
}

impl StaticDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_addresses(&self, peer: &str, addresses: Vec<SocketAddr>) {
        self.peers.entry(peer.to_string()).or_default().addresses = addresses;
    }

    pub fn set_root(&self, peer: &str, root: Option<Hash>) {
        self.peers.entry(peer.to_string()).or_default().root = root;
    }

    pub fn set_key(&self, peer: &str, key: Option<PublicKey>) {
        self.peers.entry(peer.to_string()).or_default().key = key;
    }

    fn with_peer<T>(&self, peer: &str, f: impl FnOnce(&StaticPeer) -> T) -> Result<T, DirectoryError> {
        self.peers
            .get(peer)
            .map(|p| f(&p))
            .ok_or_else(|| DirectoryError::UnknownPeer(peer.to_string()))
    }
}

#[async_trait]
impl Directory for StaticDirectory {
    async fn peers(&self) -> Result<Vec<String>, DirectoryError> {
        Ok(self.peers.iter().map(|e| e.key().clone()).collect())
    }

    async fn addresses(&self, peer: &str) -> Result<Vec<SocketAddr>, DirectoryError> {
        self.with_peer(peer, |p| p.addresses.clone())
    }

    async fn root(&self, peer: &str) -> Result<Option<Hash>, DirectoryError> {
        self.with_peer(peer, |p| p.root)
    }

    async fn public_key(&self, peer: &str) -> Result<Option<PublicKey>, DirectoryError> {
        self.with_peer(peer, |p| p.key)
    }
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum DirectoryError {
    #[error("directory request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("bad directory url: {0}")]
    BadUrl(String),

    #[error("{0} is not known by the directory")]
    UnknownPeer(String),

    #[error("directory answered HTTP {0}")]
    Status(u16),

    #[error("unexpected directory body: {0}")]
    BadBody(String),

    #[error("published key: {0}")]
    Key(#[from] SignatureError),
}
