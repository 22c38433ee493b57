//! Send-and-wait with retransmission.
//!
//! One request to one address:
//!
//!   send → wait one window → (reply) validate → done
//!                           (silence) resend the same bytes, same id
//!   after `reemissions + 1` silent windows → hard failure
//!
//! A reply that arrives but does not check out is a soft failure and is
//! returned at once: the address answered, it just answered badly.

use std::net::SocketAddr;

use arbor_core::crypto::SignatureError;
use arbor_core::datum::{check_datum_integrity, DatumError};
use arbor_core::wire::{check_msg_type_pair, WireError, HASH_SIZE};
use arbor_core::{Hash, Message, MessageType};
use arbor_services::DirectoryError;

use super::Transport;

#[derive(Debug, thiserror::Error)]
pub enum RequestError {
    // ── Hard: nobody answered ────────────────────────────────────────────────
    #[error("peer did not answer: no reply from {addr} after {attempts} attempts")]
    NoReply { addr: SocketAddr, attempts: u32 },

    #[error("peer did not answer: socket error: {0}")]
    Socket(#[from] std::io::Error),

    #[error("peer did not answer: {peer} is unreachable")]
    Unreachable { peer: String },

    #[error("peer did not answer: {0}")]
    Directory(#[from] DirectoryError),

    // ── Soft: an answer came back but is unusable ────────────────────────────
    #[error("peer answered badly: expected a reply to {sent}, got {got}")]
    UnexpectedReply { sent: MessageType, got: MessageType },

    #[error("peer answered badly: no datum for {}", hex::encode(.0))]
    NoDatum(Hash),

    #[error("peer answered badly: error reply: {0}")]
    ErrorReply(String),

    #[error("peer answered badly: asked for {} but got {}", hex::encode(.expected), hex::encode(.got))]
    HashMismatch { expected: Hash, got: Hash },

    #[error("peer answered badly: {0}")]
    Corrupted(#[from] DatumError),

    #[error("peer answered badly: {0}")]
    Signature(#[from] SignatureError),

    #[error("peer answered badly: {0}")]
    Malformed(#[from] WireError),
}

impl RequestError {
    /// Hard failures mean the address is dead and should be evicted.
    pub fn is_hard(&self) -> bool {
        matches!(
            self,
            RequestError::NoReply { .. }
                | RequestError::Socket(_)
                | RequestError::Unreachable { .. }
                | RequestError::Directory(_)
        )
    }

    pub fn is_soft(&self) -> bool {
        !self.is_hard()
    }
}

impl Transport {
    /// Send `msg` to `addr` and wait for its validated reply.
    pub async fn send_to_addr_with_reemissions(
        &self,
        addr: SocketAddr,
        msg: &Message,
    ) -> Result<Message, RequestError> {
        let msg = self.prepare(msg.clone());
        let bytes = msg.encode();
        let attempts = self.settings.attempts();
        let mut rx = self.pending.register(addr, msg.id);

        for attempt in 1..=attempts {
            if let Err(e) = self.socket.send_to(&bytes, addr).await {
                self.pending.cancel(addr, msg.id);
                return Err(RequestError::Socket(e));
            }
            tracing::trace!(peer = %addr, id = msg.id, attempt, msg_type = %msg.msg_type, "request sent");

            match tokio::time::timeout(self.settings.reply_timeout, &mut rx).await {
                Ok(Ok(reply)) => return self.validate_reply(addr, &msg, reply).await,
                Ok(Err(_)) => {
                    // Our slot was swept; wait on a fresh one.
                    rx = self.pending.register(addr, msg.id);
                }
                Err(_) => {
                    if attempt < attempts {
                        tracing::debug!(peer = %addr, id = msg.id, attempt, "no reply, reemitting");
                    }
                }
            }
        }

        self.pending.cancel(addr, msg.id);
        tracing::debug!(peer = %addr, id = msg.id, attempts, "no reply, giving up");
        Err(RequestError::NoReply { addr, attempts })
    }

    async fn validate_reply(
        &self,
        addr: SocketAddr,
        sent: &Message,
        reply: Message,
    ) -> Result<Message, RequestError> {
        if reply.msg_type == MessageType::ErrorReply && sent.msg_type != MessageType::Error {
            let text = String::from_utf8_lossy(reply.body()).into_owned();
            tracing::debug!(peer = %addr, %text, "error reply");
            return Err(RequestError::ErrorReply(text));
        }

        if !check_msg_type_pair(sent.msg_type, reply.msg_type) {
            return Err(RequestError::UnexpectedReply {
                sent: sent.msg_type,
                got: reply.msg_type,
            });
        }

        if reply.msg_type == MessageType::Datum {
            check_datum_integrity(reply.body())?;
            let stated = &reply.body()[..HASH_SIZE];
            if sent.body()[..] != *stated {
                let mut expected = [0u8; HASH_SIZE];
                let n = sent.body().len().min(HASH_SIZE);
                expected[..n].copy_from_slice(&sent.body()[..n]);
                let mut got = [0u8; HASH_SIZE];
                got.copy_from_slice(stated);
                return Err(RequestError::HashMismatch { expected, got });
            }
        }

        self.check_sender_signature(addr, &reply).await?;

        tracing::trace!(peer = %addr, %reply, "reply accepted");
        Ok(reply)
    }
}
