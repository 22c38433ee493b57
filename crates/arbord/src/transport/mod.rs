//! The UDP transport engine.
//!
//! One socket, shared by:
//!   - the listener task, which decodes every datagram, parks replies in the
//!     pending table and spawns a handler per request
//!   - outbound callers, which send a request and wait on their own
//!     `(address, id)` slot, retransmitting on silence
//!   - the reaper, which sweeps replies nobody claimed
//!
//! [`Transport`] is a cheap handle: clone it into every task.

use std::net::SocketAddr;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::net::UdpSocket;
use tokio::task::JoinHandle;

use arbor_core::crypto::check_signature;
use arbor_core::wire::{as_v4, Hello};
use arbor_core::{EngineSettings, Keypair, Message, MessageType};
use arbor_services::{AddressBook, KeyRing, PendingReplies, SharedDirectory, SharedStore};

pub mod handler;
pub mod listener;
pub mod nat;
pub mod reliability;
pub mod resolve;

pub use listener::{listener_loop, reaper_loop};
pub use reliability::RequestError;

#[derive(Clone)]
pub struct Transport {
    socket: Arc<UdpSocket>,
    settings: Arc<EngineSettings>,
    keypair: Arc<Keypair>,
    store: SharedStore,
    book: AddressBook,
    pending: PendingReplies,
    keys: KeyRing,
    directory: SharedDirectory,
    /// Initiators we are currently punching towards.
    punches: Arc<DashMap<SocketAddr, ()>>,
}

/// Handles for the tasks started by [`Transport::start`].
pub struct EngineTasks {
    pub listener: JoinHandle<()>,
    pub reaper: JoinHandle<()>,
}

impl EngineTasks {
    pub fn abort(&self) {
        self.listener.abort();
        self.reaper.abort();
    }
}

impl Transport {
    /// Bind the engine's socket on `settings.listen_addr`.
    pub async fn bind(
        settings: EngineSettings,
        keypair: Arc<Keypair>,
        store: SharedStore,
        directory: SharedDirectory,
    ) -> std::io::Result<Self> {
        let socket = UdpSocket::bind(settings.listen_addr).await?;
        tracing::info!(
            addr = %socket.local_addr()?,
            peer_name = %settings.peer_name,
            "transport bound"
        );
        Ok(Self {
            socket: Arc::new(socket),
            settings: Arc::new(settings),
            keypair,
            store,
            book: AddressBook::new(),
            pending: PendingReplies::new(),
            keys: KeyRing::new(),
            directory,
            punches: Arc::new(DashMap::new()),
        })
    }

    /// Spawn the listener and the pending-table reaper.
    pub fn start(&self) -> EngineTasks {
        EngineTasks {
            listener: tokio::spawn(listener_loop(self.clone())),
            reaper: tokio::spawn(reaper_loop(self.clone())),
        }
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    pub fn address_book(&self) -> &AddressBook {
        &self.book
    }

    pub fn pending(&self) -> &PendingReplies {
        &self.pending
    }

    pub fn key_ring(&self) -> &KeyRing {
        &self.keys
    }

    pub fn store(&self) -> &SharedStore {
        &self.store
    }

    pub fn public_key(&self) -> &arbor_core::PublicKey {
        &self.keypair.public
    }

    /// Sign `msg` if it belongs to the must-be-signed set and signing is on.
    fn prepare(&self, msg: Message) -> Message {
        if self.settings.sign_messages && msg.msg_type.requires_signature() && !msg.is_signed() {
            self.keypair.sign(msg)
        } else {
            msg
        }
    }

    /// Put one datagram on the wire. No reply is expected or awaited.
    pub(crate) async fn send_raw(&self, addr: SocketAddr, msg: &Message) -> std::io::Result<()> {
        let bytes = msg.encode();
        self.socket.send_to(&bytes, addr).await?;
        tracing::trace!(peer = %addr, %msg, "sent");
        Ok(())
    }

    /// Which peer sent `msg` from `from`: the name a Hello(Reply) claims,
    /// else whoever the address book has at that address.
    fn sender_name(&self, from: SocketAddr, msg: &Message) -> Option<String> {
        if matches!(msg.msg_type, MessageType::Hello | MessageType::HelloReply) {
            if let Ok(hello) = Hello::parse(msg.body()) {
                return Some(hello.peer_name);
            }
        }
        self.book.peer_at(from)
    }

    /// Enforce the sender's signing policy on `msg`.
    ///
    /// Only peers that published a key are held to it. If the directory
    /// cannot be asked, the message is let through.
    async fn check_sender_signature(
        &self,
        from: SocketAddr,
        msg: &Message,
    ) -> Result<(), arbor_core::crypto::SignatureError> {
        let Some(peer) = self.sender_name(from, msg) else {
            return Ok(());
        };
        match self.keys.key_of(&peer, self.directory.as_ref()).await {
            Ok(Some(key)) => check_signature(msg, &key),
            Ok(None) => Ok(()),
            Err(e) => {
                tracing::trace!(%peer, error = %e, "no key available, signature not enforced");
                Ok(())
            }
        }
    }

    /// Whether `addr` belongs to the rendezvous server, either as remembered
    /// in the address book or as listed by the directory.
    pub(crate) async fn is_server_addr(&self, addr: SocketAddr) -> bool {
        self.book.contains(&self.settings.server_peer_name, addr)
            || self.server_addresses().await.contains(&addr)
    }

    /// The rendezvous server's endpoints: fresh from the directory when it
    /// answers, otherwise whatever the address book remembers.
    pub async fn server_addresses(&self) -> Vec<SocketAddr> {
        let server = &self.settings.server_peer_name;
        match self.directory.addresses(server).await {
            Ok(addrs) => addrs.into_iter().filter(|a| as_v4(*a).is_some()).collect(),
            Err(e) => {
                tracing::debug!(%server, error = %e, "directory lookup failed, using address book");
                self.book.addresses(server).unwrap_or_default()
            }
        }
    }
}
