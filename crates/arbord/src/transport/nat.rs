//! NAT traversal through the rendezvous server.
//!
//! Initiator I cannot reach target T directly:
//!
//!   I → server   NatTraversalRequest{T}
//!   server → T   NatTraversal{I}
//!   T → I        Hello            (opens T's NAT towards I)
//!   I → T        Hello, retried   (opens I's NAT towards T)
//!
//! The traversal succeeds as soon as either Hello exchange completes.

use std::net::SocketAddr;

use arbor_core::wire::as_v4;
use arbor_core::{Message, MessageType};

use super::{RequestError, Transport};

impl Transport {
    /// Get through to `target` (an address of `peer`) with the server's help.
    pub async fn nat_traversal(&self, peer: &str, target: SocketAddr) -> Result<(), RequestError> {
        let Some(target_v4) = as_v4(target) else {
            return Err(RequestError::Unreachable {
                peer: peer.to_string(),
            });
        };
        let request = Message::nat_traversal(MessageType::NatTraversalRequest, target_v4);

        for round in 1..=self.settings.nat_traversal_retries {
            let servers = self.server_addresses().await;
            if servers.is_empty() {
                tracing::warn!(%peer, "no rendezvous server address known");
            }
            for server in &servers {
                if let Err(e) = self.send_raw(*server, &request).await {
                    tracing::debug!(%server, error = %e, "traversal request not sent");
                }
            }
            tracing::debug!(%peer, %target, round, "traversal requested");

            match self.hello(target).await {
                Ok(_) => {
                    tracing::info!(%peer, %target, round, "NAT traversal succeeded");
                    return Ok(());
                }
                Err(e) if e.is_soft() => return Err(e),
                Err(_) => {}
            }

            // T's own Hello may have reached us even though ours did not reach it.
            if self.book.contains(peer, target) {
                tracing::info!(%peer, %target, round, "NAT traversal succeeded from the far side");
                return Ok(());
            }
        }

        Err(RequestError::Unreachable {
            peer: peer.to_string(),
        })
    }

    /// Spawn a punch towards `initiator` unless one is already running.
    pub(crate) fn start_punch(&self, initiator: SocketAddr) {
        if self.punches.insert(initiator, ()).is_some() {
            tracing::debug!(addr = %initiator, "already punching towards initiator");
            return;
        }
        let t = self.clone();
        tokio::spawn(async move {
            t.punch_towards(initiator).await;
            t.punches.remove(&initiator);
        });
    }

    /// Target side: someone behind a NAT wants in. Greet them until a Hello
    /// gets through or the retry budget runs out.
    async fn punch_towards(&self, initiator: SocketAddr) {
        for round in 1..=self.settings.nat_traversal_retries {
            match self.hello(initiator).await {
                Ok(name) => {
                    tracing::info!(peer = %name, addr = %initiator, round, "reached traversal initiator");
                    return;
                }
                Err(e) if e.is_soft() => {
                    tracing::warn!(addr = %initiator, error = %e, "traversal initiator answered badly");
                    return;
                }
                Err(e) => tracing::debug!(addr = %initiator, round, error = %e, "traversal hello failed"),
            }
        }
        tracing::info!(addr = %initiator, "gave up reaching traversal initiator");
    }
}
