//! Message signatures for Arbor.
//!
//! ECDSA over P-256. A signature covers `SHA-256(id || type || length || body)`
//! and travels as 64 bytes `r || s` after the body. Public keys travel as
//! the 64-byte uncompressed point `X || Y`, without the SEC1 0x04 tag.
//!
//! Unsigned messages verify as valid: peers that never sign must keep
//! working. Whether a signature is *required* is decided by the caller
//! through [`check_signature`].

use std::fmt;
use std::path::Path;

use p256::ecdsa::signature::{Signer, Verifier};
use p256::ecdsa::{Signature, SigningKey, VerifyingKey};
use thiserror::Error;
use zeroize::Zeroizing;

use crate::wire::{Message, SIGNATURE_SIZE};

/// Uncompressed P-256 point without its tag byte.
pub const PUBLIC_KEY_SIZE: usize = 64;

/// Private scalar size.
pub const PRIVATE_KEY_SIZE: usize = 32;

/// SEC1 tag for an uncompressed point.
const SEC1_UNCOMPRESSED: u8 = 0x04;

pub type PublicKey = [u8; PUBLIC_KEY_SIZE];

// ── Keypair ───────────────────────────────────────────────────────────────────

/// This node's signing identity.
///
/// The signing key wipes itself on drop; exported private bytes come back
/// wrapped in [`Zeroizing`].
pub struct Keypair {
    signing: SigningKey,
    pub public: PublicKey,
}

impl Keypair {
    pub fn generate() -> Self {
        Self::from_signing(SigningKey::random(&mut rand::rngs::OsRng))
    }

    pub fn from_private(private_bytes: &[u8; PRIVATE_KEY_SIZE]) -> Result<Self, KeyError> {
        let signing = SigningKey::from_slice(private_bytes).map_err(|_| KeyError::InvalidScalar)?;
        Ok(Self::from_signing(signing))
    }

    fn from_signing(signing: SigningKey) -> Self {
        let point = VerifyingKey::from(&signing).to_encoded_point(false);
        let mut public = [0u8; PUBLIC_KEY_SIZE];
        // Skip the 0x04 tag.
        public.copy_from_slice(&point.as_bytes()[1..]);
        Self { signing, public }
    }

    pub fn private_bytes(&self) -> Zeroizing<[u8; PRIVATE_KEY_SIZE]> {
        let mut out = Zeroizing::new([0u8; PRIVATE_KEY_SIZE]);
        out.copy_from_slice(&self.signing.to_bytes());
        out
    }

    /// Load the key stored at `path`, or create and persist a new one.
    pub fn load_or_generate(path: &Path) -> Result<Self, KeyError> {
        if path.exists() {
            return Self::load(path);
        }
        let keypair = Self::generate();
        keypair.save(path)?;
        tracing::info!(path = %path.display(), "generated new keypair");
        Ok(keypair)
    }

    /// Read a hex-encoded private scalar.
    pub fn load(path: &Path) -> Result<Self, KeyError> {
        let text = Zeroizing::new(
            std::fs::read_to_string(path).map_err(|e| KeyError::Io(path.display().to_string(), e))?,
        );
        let mut scalar = Zeroizing::new([0u8; PRIVATE_KEY_SIZE]);
        hex::decode_to_slice(text.trim(), &mut *scalar).map_err(|_| KeyError::BadEncoding)?;
        Self::from_private(&scalar)
    }

    /// Write the private scalar as hex, readable by the owner only.
    pub fn save(&self, path: &Path) -> Result<(), KeyError> {
        let io = |e: std::io::Error| KeyError::Io(path.display().to_string(), e);
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(io)?;
            }
        }
        let scalar = self.private_bytes();
        let text = Zeroizing::new(hex::encode(&*scalar));
        std::fs::write(path, text.as_bytes()).map_err(io)?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600)).map_err(io)?;
        }
        Ok(())
    }

    /// Attach a signature over the message's canonical bytes.
    pub fn sign(&self, mut msg: Message) -> Message {
        let signature: Signature = self.signing.sign(&msg.canonical_bytes());
        let mut raw = [0u8; SIGNATURE_SIZE];
        raw.copy_from_slice(&signature.to_bytes());
        msg.set_signature(raw);
        msg
    }
}

impl fmt::Debug for Keypair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Keypair")
            .field("public", &hex::encode(self.public))
            .finish_non_exhaustive()
    }
}

// ── Verification ──────────────────────────────────────────────────────────────

/// Interpret a published key. An empty body means "this peer does not sign".
pub fn parse_public_key(bytes: &[u8]) -> Result<Option<PublicKey>, SignatureError> {
    match bytes.len() {
        0 => Ok(None),
        PUBLIC_KEY_SIZE => {
            let mut key = [0u8; PUBLIC_KEY_SIZE];
            key.copy_from_slice(bytes);
            Ok(Some(key))
        }
        n => Err(SignatureError::BadLength(n)),
    }
}

fn verifying_key(key: &PublicKey) -> Result<VerifyingKey, SignatureError> {
    let mut sec1 = [0u8; PUBLIC_KEY_SIZE + 1];
    sec1[0] = SEC1_UNCOMPRESSED;
    sec1[1..].copy_from_slice(key);
    VerifyingKey::from_sec1_bytes(&sec1).map_err(|_| SignatureError::BadKey)
}

/// True when `msg` is unsigned, or signed by the owner of `key`.
pub fn verify(msg: &Message, key: &PublicKey) -> bool {
    let Some(raw) = msg.signature() else {
        return true;
    };
    let Ok(vk) = verifying_key(key) else {
        return false;
    };
    let Ok(signature) = Signature::from_slice(raw) else {
        return false;
    };
    vk.verify(&msg.canonical_bytes(), &signature).is_ok()
}

/// Apply the signing policy for a sender that published `key`.
///
/// Messages in the must-be-signed set are refused when unsigned; any
/// signature present must verify.
pub fn check_signature(msg: &Message, key: &PublicKey) -> Result<(), SignatureError> {
    if msg.signature().is_none() {
        if msg.msg_type.requires_signature() {
            return Err(SignatureError::Missing);
        }
        return Ok(());
    }
    verifying_key(key)?;
    if verify(msg, key) {
        Ok(())
    } else {
        Err(SignatureError::Invalid)
    }
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SignatureError {
    #[error("required signature is missing")]
    Missing,
    #[error("signature does not verify")]
    Invalid,
    #[error("public key is not a valid P-256 point")]
    BadKey,
    #[error("public key has {0} bytes, expected 64")]
    BadLength(usize),
}

#[derive(Debug, Error)]
pub enum KeyError {
    #[error("keypair file {0}: {1}")]
    Io(String, std::io::Error),
    #[error("keypair file is not hex of a 32-byte scalar")]
    BadEncoding,
    #[error("private scalar is out of range")]
    InvalidScalar,
}

// ── Tests ─────────────────────────────────────────────────────────────────────
