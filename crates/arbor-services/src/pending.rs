//! Pending-reply table: matches inbound replies to the caller waiting on them.
//!
//! Keyed on `(source address, message id)`. Either side may arrive first:
//! a reply that lands before anyone waits is parked until it is claimed or
//! reaped, and a waiter that registers first is woken directly through its
//! oneshot channel.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use arbor_core::Message;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::sync::oneshot;

type Key = (SocketAddr, u32);

#[derive(Debug)]
enum Slot {
    Waiting(oneshot::Sender<Message>),
    Arrived { msg: Message, at: Instant },
}

#[derive(Debug, Clone, Default)]
pub struct PendingReplies {
    slots: Arc<DashMap<Key, Slot>>,
}

impl PendingReplies {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for the reply to `id` from `addr`. If it already arrived the
    /// receiver resolves immediately.
    pub fn register(&self, addr: SocketAddr, id: u32) -> oneshot::Receiver<Message> {
        let (tx, rx) = oneshot::channel();
        match self.slots.entry((addr, id)) {
            Entry::Occupied(mut o) => {
                if matches!(o.get(), Slot::Arrived { .. }) {
                    if let Slot::Arrived { msg, .. } = o.remove() {
                        let _ = tx.send(msg);
                    }
                } else {
                    o.insert(Slot::Waiting(tx));
                }
            }
            Entry::Vacant(v) => {
                v.insert(Slot::Waiting(tx));
            }
        }
        rx
    }

    /// Hand a reply from `addr` to its waiter, or park it.
    ///
    /// Returns true when a waiter took it.
    pub fn deliver(&self, addr: SocketAddr, msg: Message) -> bool {
        let at = Instant::now();
        match self.slots.entry((addr, msg.id)) {
            Entry::Occupied(mut o) => {
                if matches!(o.get(), Slot::Waiting(_)) {
                    if let Slot::Waiting(tx) = o.remove() {
                        return tx.send(msg).is_ok();
                    }
                    false
                } else {
                    // Duplicate from a retransmission; keep the newest.
                    o.insert(Slot::Arrived { msg, at });
                    false
                }
            }
            Entry::Vacant(v) => {
                v.insert(Slot::Arrived { msg, at });
                false
            }
        }
    }

    /// Stop waiting on `(addr, id)`.
    pub fn cancel(&self, addr: SocketAddr, id: u32) {
        self.slots.remove(&(addr, id));
    }

    /// Drop parked replies older than `max_age` and waiters whose caller
    /// has gone away. Returns how many slots were dropped.
    pub fn reap(&self, max_age: Duration) -> usize {
        let before = self.slots.len();
        self.slots.retain(|_, slot| match slot {
            Slot::Waiting(tx) => !tx.is_closed(),
            Slot::Arrived { at, .. } => at.elapsed() < max_age,
        });
        before.saturating_sub(self.slots.len())
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}
