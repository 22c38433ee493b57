//! Configuration system for Arbor.
//!
//! Resolution order: environment variables → config file → defaults.
//!
//! Config file location:
//!   1. $ARBOR_CONFIG (explicit override)
//!   2. $XDG_CONFIG_HOME/arbor/config.toml
//!   3. ~/.config/arbor/config.toml

use serde::{Deserialize, Serialize};
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::path::PathBuf;
use std::time::Duration;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ArborConfig {
    pub identity: IdentityConfig,
    pub network: NetworkConfig,
    pub export: ExportConfig,
    pub reliability: ReliabilityConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IdentityConfig {
    /// Name announced in Hello and registered with the directory.
    pub peer_name: String,
    /// Path to the P-256 private key. Auto-generated on first run.
    pub keypair_path: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// UDP port the engine listens on. 0 = OS-assigned.
    pub listen_port: u16,
    /// Base URL of the HTTP peer directory.
    pub directory_url: String,
    /// Peer name of the rendezvous server inside the directory.
    pub server_peer_name: String,
    /// Upper bound on one directory HTTP request.
    pub directory_timeout_secs: u64,
    /// Forward NatTraversalRequest to its target. Only the rendezvous
    /// server should turn this on.
    pub relay_traversal: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExportConfig {
    /// Directory published at startup. Empty = publish nothing.
    pub shared_dir: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReliabilityConfig {
    /// Retransmissions after the first send.
    pub reemissions: u32,
    /// How long each send waits for its reply.
    pub reply_timeout_ms: u64,
    /// Rounds of relay request + Hello before NAT traversal gives up.
    pub nat_traversal_retries: u32,
    pub keep_alive_secs: u64,
    /// How often unclaimed replies are swept from the pending table.
    pub reap_interval_ms: u64,
    /// Sign outbound Hello/PublicKey/Root messages and their replies.
    pub sign_messages: bool,
}

// ── Defaults ──────────────────────────────────────────────────────────────────

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            peer_name: "arbor".to_string(),
            keypair_path: config_dir().join("keypair"),
        }
    }
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            listen_port: 8444,
            directory_url: "https://jch.irif.fr:8443".to_string(),
            server_peer_name: "jch.irif.fr".to_string(),
            directory_timeout_secs: 10,
            relay_traversal: false,
        }
    }
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            shared_dir: PathBuf::new(),
        }
    }
}

impl Default for ReliabilityConfig {
    fn default() -> Self {
        Self {
            reemissions: 4,
            reply_timeout_ms: 500,
            nat_traversal_retries: 10,
            keep_alive_secs: 30,
            reap_interval_ms: 1000,
            sign_messages: true,
        }
    }
}

// ── Engine settings ───────────────────────────────────────────────────────────

/// Everything the transport engine needs, resolved from [`ArborConfig`].
///
/// Passed by value into the engine at construction. Tests build one
/// directly with short timeouts.
#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub peer_name: String,
    pub listen_addr: SocketAddr,
    pub server_peer_name: String,
    pub reemissions: u32,
    pub reply_timeout: Duration,
    pub nat_traversal_retries: u32,
    pub keep_alive: Duration,
    pub reap_interval: Duration,
    pub sign_messages: bool,
    pub relay_traversal: bool,
}

impl EngineSettings {
    /// Total sends for one request: the first plus every reemission.
    pub fn attempts(&self) -> u32 {
        self.reemissions + 1
    }

    /// Longest time a caller may wait on one address.
    pub fn retry_window(&self) -> Duration {
        self.reply_timeout * self.attempts()
    }
}

impl Default for EngineSettings {
    fn default() -> Self {
        ArborConfig::default().engine_settings()
    }
}

// ── Path helpers ──────────────────────────────────────────────────────────────

fn config_dir() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| dirs_or_home().join(".config"))
        .join("arbor")
}

fn dirs_or_home() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/tmp"))
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {0}: {1}")]
    ReadFailed(PathBuf, std::io::Error),
    #[error("failed to parse {0}: {1}")]
    ParseFailed(PathBuf, toml::de::Error),
    #[error("failed to write {0}: {1}")]
    WriteFailed(PathBuf, std::io::Error),
    #[error("failed to serialize: {0}")]
    SerializeFailed(toml::ser::Error),
}

// ── Loading ───────────────────────────────────────────────────────────────────

impl ArborConfig {
    /// Load config: env vars → file → defaults.
    pub fn load() -> Result<Self, ConfigError> {
        let path = Self::file_path();
        let mut config = if path.exists() {
            let text = std::fs::read_to_string(&path)
                .map_err(|e| ConfigError::ReadFailed(path.clone(), e))?;
            toml::from_str(&text).map_err(|e| ConfigError::ParseFailed(path.clone(), e))?
        } else {
            ArborConfig::default()
        };
        config.apply_env_overrides();
        Ok(config)
    }

    /// Config file path.
    pub fn file_path() -> PathBuf {
        std::env::var("ARBOR_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| config_dir().join("config.toml"))
    }

    /// Write default config if none exists. Returns the path.
    pub fn write_default_if_missing() -> Result<PathBuf, ConfigError> {
        let path = Self::file_path();
        if !path.exists() {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| ConfigError::WriteFailed(path.clone(), e))?;
            }
            let text = toml::to_string_pretty(&ArborConfig::default())
                .map_err(ConfigError::SerializeFailed)?;
            std::fs::write(&path, text).map_err(|e| ConfigError::WriteFailed(path.clone(), e))?;
        }
        Ok(path)
    }

    /// Resolve the engine's runtime settings.
    pub fn engine_settings(&self) -> EngineSettings {
        let r = &self.reliability;
        EngineSettings {
            peer_name: self.identity.peer_name.clone(),
            listen_addr: SocketAddr::V4(SocketAddrV4::new(
                Ipv4Addr::UNSPECIFIED,
                self.network.listen_port,
            )),
            server_peer_name: self.network.server_peer_name.clone(),
            reemissions: r.reemissions,
            reply_timeout: Duration::from_millis(r.reply_timeout_ms),
            nat_traversal_retries: r.nat_traversal_retries,
            keep_alive: Duration::from_secs(r.keep_alive_secs),
            reap_interval: Duration::from_millis(r.reap_interval_ms),
            sign_messages: r.sign_messages,
            relay_traversal: self.network.relay_traversal,
        }
    }

    /// Apply ARBOR_* env var overrides.
    fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("ARBOR_IDENTITY__PEER_NAME") {
            self.identity.peer_name = v;
        }
        if let Ok(v) = std::env::var("ARBOR_NETWORK__LISTEN_PORT") {
            if let Ok(p) = v.parse() {
                self.network.listen_port = p;
            }
        }
        if let Ok(v) = std::env::var("ARBOR_NETWORK__DIRECTORY_URL") {
            self.network.directory_url = v;
        }
        if let Ok(v) = std::env::var("ARBOR_NETWORK__RELAY_TRAVERSAL") {
            if let Ok(b) = v.parse() {
                self.network.relay_traversal = b;
            }
        }
        if let Ok(v) = std::env::var("ARBOR_EXPORT__SHARED_DIR") {
            self.export.shared_dir = PathBuf::from(v);
        }
        if let Ok(v) = std::env::var("ARBOR_RELIABILITY__REEMISSIONS") {
            if let Ok(n) = v.parse() {
                self.reliability.reemissions = n;
            }
        }
    }
}
