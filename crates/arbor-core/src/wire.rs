//! Arbor wire format — the UDP request/reply message.
//!
//! Every datagram is a single message:
//!
//!   id (4B BE) | type (1B) | length (2B BE) | body (length bytes) | [signature (64B)]
//!
//! The header is a zerocopy struct built from network-endian integers, so
//! there is no manual byte shuffling and no unsafe code in this module.
//! Types below 128 are requests, types from 128 up are replies.

use std::fmt;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};

use bytes::Bytes;
use static_assertions::assert_eq_size;
use zerocopy::byteorder::network_endian::{U16, U32};
use zerocopy::{AsBytes, FromBytes, FromZeroes, Unaligned};

use crate::datum::{DatumKind, BODY_MAX_SIZE, DATUM_KIND_INDEX, DATUM_PAYLOAD_INDEX};
use crate::datum::{DIRECTORY_ENTRY_SIZE, FILENAME_SIZE};

// ── Constants ─────────────────────────────────────────────────────────────────

/// Size of every content hash (SHA-256).
pub const HASH_SIZE: usize = 32;

/// A SHA-256 content hash.
pub type Hash = [u8; HASH_SIZE];

/// id + type + length.
pub const HEADER_SIZE: usize = 7;

/// ECDSA P-256 signature, `r || s`.
pub const SIGNATURE_SIZE: usize = 64;

/// Reserved extensions field at the start of Hello/HelloReply bodies.
pub const HELLO_EXTENSIONS_SIZE: usize = 4;

/// IPv4 address + port carried by NatTraversal(Request) bodies.
pub const NAT_V4_ADDRESS_SIZE: usize = 6;

/// IPv6 address + port. Recognised so it can be refused explicitly.
pub const NAT_V6_ADDRESS_SIZE: usize = 18;

/// Largest datagram we expect: header, the biggest datum body, a signature.
pub const UDP_BUFFER_SIZE: usize = HEADER_SIZE + BODY_MAX_SIZE + SIGNATURE_SIZE;

/// `reply.type - request.type` for a well-formed reply.
pub const REPLY_TYPE_OFFSET: u8 = 127;

/// First message type that denotes a reply.
pub const FIRST_REPLY_TYPE: u8 = 128;

/// Bodies are truncated to this many bytes in log summaries.
const DISPLAY_BODY_TRUNCATE: usize = 100;

// ── Header ────────────────────────────────────────────────────────────────────

/// Fixed message header.
///
/// Wire size: 7 bytes. All fields big-endian.
#[derive(Debug, Clone, AsBytes, FromBytes, FromZeroes, Unaligned)]
#[repr(C)]
pub struct MessageHeader {
    /// Chosen by the requester, echoed by the replier.
    pub id: U32,
    /// Raw message type byte.
    pub msg_type: u8,
    /// Body length in bytes, signature excluded.
    pub length: U16,
}

// Compile-time size guard. If this fails, the wire format has silently changed.
assert_eq_size!(MessageHeader, [u8; HEADER_SIZE]);

// ── Message types ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MessageType {
    NoOp = 0,
    Error = 1,
    Hello = 2,
    PublicKey = 3,
    Root = 4,
    GetDatum = 5,
    NatTraversalRequest = 6,
    NatTraversal = 7,

    ErrorReply = 128,
    HelloReply = 129,
    PublicKeyReply = 130,
    RootReply = 131,
    Datum = 132,
    NoDatum = 133,
}

impl MessageType {
    pub fn is_request(self) -> bool {
        (self as u8) < FIRST_REPLY_TYPE
    }

    pub fn is_reply(self) -> bool {
        !self.is_request()
    }

    /// Messages that must carry a signature when the sender has published a key.
    pub fn requires_signature(self) -> bool {
        matches!(
            self,
            MessageType::Hello
                | MessageType::HelloReply
                | MessageType::PublicKey
                | MessageType::PublicKeyReply
                | MessageType::Root
                | MessageType::RootReply
        )
    }

    /// Does this request type expect any reply at all?
    pub fn expects_reply(self) -> bool {
        self.is_request()
            && !matches!(
                self,
                MessageType::NatTraversalRequest | MessageType::NatTraversal
            )
    }

    pub fn name(self) -> &'static str {
        match self {
            MessageType::NoOp => "NoOp",
            MessageType::Error => "Error",
            MessageType::Hello => "Hello",
            MessageType::PublicKey => "PublicKey",
            MessageType::Root => "Root",
            MessageType::GetDatum => "GetDatum",
            MessageType::NatTraversalRequest => "NatTraversalRequest",
            MessageType::NatTraversal => "NatTraversal",
            MessageType::ErrorReply => "ErrorReply",
            MessageType::HelloReply => "HelloReply",
            MessageType::PublicKeyReply => "PublicKeyReply",
            MessageType::RootReply => "RootReply",
            MessageType::Datum => "Datum",
            MessageType::NoDatum => "NoDatum",
        }
    }
}

impl TryFrom<u8> for MessageType {
    type Error = WireError;

    fn try_from(value: u8) -> Result<Self, WireError> {
        match value {
            0 => Ok(MessageType::NoOp),
            1 => Ok(MessageType::Error),
            2 => Ok(MessageType::Hello),
            3 => Ok(MessageType::PublicKey),
            4 => Ok(MessageType::Root),
            5 => Ok(MessageType::GetDatum),
            6 => Ok(MessageType::NatTraversalRequest),
            7 => Ok(MessageType::NatTraversal),
            128 => Ok(MessageType::ErrorReply),
            129 => Ok(MessageType::HelloReply),
            130 => Ok(MessageType::PublicKeyReply),
            131 => Ok(MessageType::RootReply),
            132 => Ok(MessageType::Datum),
            133 => Ok(MessageType::NoDatum),
            other => Err(WireError::UnknownType(other)),
        }
    }
}

impl From<MessageType> for u8 {
    fn from(t: MessageType) -> u8 {
        t as u8
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Does `reply` validly answer `request`?
///
/// A reply type is its request type plus 127. NoDatum is the one extra
/// answer allowed for GetDatum. Requests that take no reply pair with
/// nothing.
pub fn check_msg_type_pair(request: MessageType, reply: MessageType) -> bool {
    if !request.expects_reply() || !reply.is_reply() {
        return false;
    }
    let (q, r) = (request as u8, reply as u8);
    r - q == REPLY_TYPE_OFFSET
        || (request == MessageType::GetDatum && reply == MessageType::NoDatum)
}

// ── Message ───────────────────────────────────────────────────────────────────

/// One protocol message.
///
/// The length field is never stored: it is always `body.len()`, which the
/// constructors bound to `u16::MAX`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub id: u32,
    pub msg_type: MessageType,
    body: Bytes,
    signature: Option<[u8; SIGNATURE_SIZE]>,
}

impl Message {
    /// Build a message, refusing bodies the length field cannot describe.
    pub fn new(id: u32, msg_type: MessageType, body: impl Into<Bytes>) -> Result<Self, WireError> {
        let body = body.into();
        if body.len() > u16::MAX as usize {
            return Err(WireError::BodyTooLarge(body.len()));
        }
        Ok(Self {
            id,
            msg_type,
            body,
            signature: None,
        })
    }

    /// Same as [`Message::new`] with a random id.
    pub fn with_random_id(msg_type: MessageType, body: impl Into<Bytes>) -> Result<Self, WireError> {
        Self::new(rand::random(), msg_type, body)
    }

    /// A message with an empty body.
    pub fn empty(id: u32, msg_type: MessageType) -> Self {
        Self::small(id, msg_type, Bytes::new())
    }

    /// A message whose body is a single hash (GetDatum, Root, RootReply, NoDatum).
    pub fn with_hash(id: u32, msg_type: MessageType, hash: &Hash) -> Self {
        Self::small(id, msg_type, Bytes::copy_from_slice(hash))
    }

    /// Hello or HelloReply announcing `peer_name`.
    pub fn hello(id: u32, msg_type: MessageType, peer_name: &str) -> Result<Self, WireError> {
        if !matches!(msg_type, MessageType::Hello | MessageType::HelloReply) {
            return Err(WireError::NotAHello(msg_type));
        }
        let hello = Hello {
            extensions: 0,
            peer_name: peer_name.to_string(),
        };
        Self::new(id, msg_type, hello.to_body())
    }

    /// NatTraversal or NatTraversalRequest carrying `addr`.
    pub fn nat_traversal(msg_type: MessageType, addr: SocketAddrV4) -> Self {
        Self::small(
            rand::random(),
            msg_type,
            Bytes::copy_from_slice(&encode_nat_address(addr)),
        )
    }

    /// Bodies that are statically known to fit in the length field.
    pub(crate) fn small(id: u32, msg_type: MessageType, body: Bytes) -> Self {
        debug_assert!(body.len() <= u16::MAX as usize);
        Self {
            id,
            msg_type,
            body,
            signature: None,
        }
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }

    pub fn length(&self) -> u16 {
        self.body.len() as u16
    }

    pub fn signature(&self) -> Option<&[u8; SIGNATURE_SIZE]> {
        self.signature.as_ref()
    }

    pub fn is_signed(&self) -> bool {
        self.signature.is_some()
    }

    pub fn set_signature(&mut self, signature: [u8; SIGNATURE_SIZE]) {
        self.signature = Some(signature);
    }

    pub fn is_request(&self) -> bool {
        self.msg_type.is_request()
    }

    /// `id || type || length || body` — the bytes a signature covers.
    pub fn canonical_bytes(&self) -> Vec<u8> {
        let header = MessageHeader {
            id: U32::new(self.id),
            msg_type: self.msg_type.into(),
            length: U16::new(self.length()),
        };
        let mut out = Vec::with_capacity(HEADER_SIZE + self.body.len() + SIGNATURE_SIZE);
        out.extend_from_slice(header.as_bytes());
        out.extend_from_slice(&self.body);
        out
    }

    /// Serialize for the socket: header, body, then the signature if any.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = self.canonical_bytes();
        if let Some(sig) = &self.signature {
            out.extend_from_slice(sig);
        }
        out
    }

    /// Parse the first `bytes_read` bytes of a receive buffer.
    ///
    /// Anything after the body must be exactly one signature or nothing.
    pub fn decode(buf: &[u8], bytes_read: usize) -> Result<Self, WireError> {
        let data = buf.get(..bytes_read).ok_or(WireError::TooShort(buf.len()))?;

        let header = MessageHeader::read_from_prefix(data).ok_or(WireError::TooShort(data.len()))?;
        let msg_type = MessageType::try_from(header.msg_type)?;
        let length = header.length.get() as usize;

        let body_end = HEADER_SIZE + length;
        if data.len() < body_end {
            return Err(WireError::Truncated {
                stated: length,
                received: data.len(),
            });
        }

        let signature = match data.len() - body_end {
            0 => None,
            SIGNATURE_SIZE => {
                let mut sig = [0u8; SIGNATURE_SIZE];
                sig.copy_from_slice(&data[body_end..]);
                Some(sig)
            }
            extra => return Err(WireError::InvalidSize(extra)),
        };

        Ok(Self {
            id: header.id.get(),
            msg_type,
            body: Bytes::copy_from_slice(&data[HEADER_SIZE..body_end]),
            signature,
        })
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Id: {} Type: {}", self.id, self.msg_type)?;

        if self.msg_type == MessageType::Datum {
            if let Some(kind) = self
                .body
                .get(DATUM_KIND_INDEX)
                .and_then(|b| DatumKind::try_from(*b).ok())
            {
                write!(f, " {}", kind.name())?;
            }
        }

        write!(f, " Length: {}", self.length())?;

        let shown = &self.body[..self.body.len().min(DISPLAY_BODY_TRUNCATE)];
        write!(f, " Body: {}", String::from_utf8_lossy(shown))?;

        if self.msg_type == MessageType::Datum
            && self.body.get(DATUM_KIND_INDEX) == Some(&(DatumKind::Directory as u8))
        {
            let entries = self.body.len().saturating_sub(DATUM_PAYLOAD_INDEX) / DIRECTORY_ENTRY_SIZE;
            f.write_str(" Children:")?;
            for i in 0..entries {
                let start = DATUM_PAYLOAD_INDEX + i * DIRECTORY_ENTRY_SIZE;
                let raw = &self.body[start..start + FILENAME_SIZE];
                let end = raw.iter().position(|b| *b == 0).unwrap_or(FILENAME_SIZE);
                write!(f, " {}", String::from_utf8_lossy(&raw[..end]))?;
            }
        }
        Ok(())
    }
}

// ── Hello ─────────────────────────────────────────────────────────────────────

/// Body of Hello and HelloReply.
///
/// The peer name runs to the end of the body — there is no length prefix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Hello {
    pub extensions: u32,
    pub peer_name: String,
}

impl Hello {
    pub fn to_body(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(HELLO_EXTENSIONS_SIZE + self.peer_name.len());
        out.extend_from_slice(&self.extensions.to_be_bytes());
        out.extend_from_slice(self.peer_name.as_bytes());
        out
    }

    pub fn parse(body: &[u8]) -> Result<Self, WireError> {
        if body.len() <= HELLO_EXTENSIONS_SIZE {
            return Err(WireError::BadHello("body too short"));
        }
        let mut ext = [0u8; HELLO_EXTENSIONS_SIZE];
        ext.copy_from_slice(&body[..HELLO_EXTENSIONS_SIZE]);
        let peer_name = std::str::from_utf8(&body[HELLO_EXTENSIONS_SIZE..])
            .map_err(|_| WireError::BadHello("peer name is not UTF-8"))?
            .to_string();
        Ok(Self {
            extensions: u32::from_be_bytes(ext),
            peer_name,
        })
    }
}

// ── NAT traversal addresses ───────────────────────────────────────────────────

/// 4-byte IPv4 address followed by the big-endian port.
pub fn encode_nat_address(addr: SocketAddrV4) -> [u8; NAT_V4_ADDRESS_SIZE] {
    let mut out = [0u8; NAT_V4_ADDRESS_SIZE];
    out[..4].copy_from_slice(&addr.ip().octets());
    out[4..].copy_from_slice(&addr.port().to_be_bytes());
    out
}

pub fn decode_nat_address(body: &[u8]) -> Result<SocketAddrV4, WireError> {
    match body.len() {
        NAT_V4_ADDRESS_SIZE => {
            let ip = Ipv4Addr::new(body[0], body[1], body[2], body[3]);
            let port = u16::from_be_bytes([body[4], body[5]]);
            Ok(SocketAddrV4::new(ip, port))
        }
        NAT_V6_ADDRESS_SIZE => Err(WireError::BadAddress("IPv6 is not supported")),
        _ => Err(WireError::BadAddress("unexpected address length")),
    }
}

/// Only IPv4 endpoints can be carried by the protocol.
pub fn as_v4(addr: SocketAddr) -> Option<SocketAddrV4> {
    match addr {
        SocketAddr::V4(v4) => Some(v4),
        SocketAddr::V6(_) => None,
    }
}

// ── Errors ────────────────────────────────────────────────────────────────────

/// Malformed header, size, or fixed-layout body.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WireError {
    #[error("datagram too short for a header: {0} bytes")]
    TooShort(usize),

    #[error("unknown message type: {0}")]
    UnknownType(u8),

    #[error("message truncated: stated length {stated} but received {received} bytes")]
    Truncated { stated: usize, received: usize },

    #[error("invalid size: {0} trailing bytes do not form a signature")]
    InvalidSize(usize),

    #[error("body of {0} bytes does not fit the length field")]
    BodyTooLarge(usize),

    #[error("{0} is not a Hello or HelloReply")]
    NotAHello(MessageType),

    #[error("{msg_type} body must be {expected} bytes, got {got}")]
    BadBodyLength {
        msg_type: MessageType,
        expected: usize,
        got: usize,
    },

    #[error("malformed hello: {0}")]
    BadHello(&'static str),

    #[error("malformed address: {0}")]
    BadAddress(&'static str),
}

// ── Tests ─────────────────────────────────────────────────────────────────────
