//! See [`Transport`].

use crate::{
    address::{AddressPool, AddressSlot},
    config::Config,
    error::TransportError,
    packet::InPacket,
    peer::Peer,
    socket::Socket,
};
use ahash::AHashMap;
use std::{
    net::SocketAddr,
    sync::{Arc, Mutex, RwLock},
};

/// Stable handle to a socket opened through [`Transport::open_socket`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SocketHandle(usize);

struct SocketEntry {
    socket: Arc<Socket>,
}

/// A tracked peer together with the [`AddressSlot`] its remote address was
/// resolved into, so its slot can be released back to the [`AddressPool`]
/// when the peer is torn down.
struct PeerEntry {
    peer: Arc<Peer>,
    slot: AddressSlot,
}

/// Owns the set of sockets, the address pool, and the peer table.
///
/// The acyclic ownership tree design note (spec §9) is realized literally
/// here: `Transport` exclusively owns `Socket`s, the [`AddressPool`], and
/// the peer table; a `Peer` holds an owning `Arc<Socket>` (there is no
/// cycle to break, since a peer never needs to look itself up in the peer
/// table a worker thread calls back into — the socket's `dispatch` closure
/// is handed a `Weak` reference to this transport instead). A `Peer` holds
/// its remote address by value rather than a pointer into the pool (the
/// pool's role is resolving and caching, not lending out mutable state);
/// see `DESIGN.md` for this deviation from the source's slot-index
/// indirection.
pub struct Transport {
    config: Arc<Config>,
    sockets: RwLock<Vec<SocketEntry>>,
    default_socket: RwLock<Option<SocketHandle>>,
    addresses: Mutex<AddressPool>,
    peers: RwLock<AHashMap<SocketAddr, PeerEntry>>,
    self_ref: RwLock<std::sync::Weak<Self>>,
}

impl Transport {
    /// Constructs a transport with the given configuration and no sockets
    /// open yet.
    #[must_use]
    pub fn new(config: Config) -> Arc<Self> {
        let transport = Arc::new(Self {
            config: Arc::new(config),
            sockets: RwLock::new(Vec::new()),
            default_socket: RwLock::new(None),
            addresses: Mutex::new(AddressPool::new()),
            peers: RwLock::new(AHashMap::new()),
            self_ref: RwLock::new(std::sync::Weak::new()),
        });
        *transport
            .self_ref
            .write()
            .expect("self_ref lock poisoned") = Arc::downgrade(&transport);
        transport
    }

    /// This transport's effective configuration.
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Resolves `host:port`, binds a socket, registers its buffer pools,
    /// launches its worker pool, and returns a handle to it.
    ///
    /// Fails if `max_sockets` would be exceeded, or if binding fails.
    pub fn open_socket(&self, host: &str, port: u16) -> Result<SocketHandle, TransportError> {
        let mut sockets = self.sockets.write().expect("sockets lock poisoned");
        if sockets.len() >= self.config.max_sockets {
            return Err(TransportError::SocketLimitReached {
                limit: self.config.max_sockets,
            });
        }

        let addr = {
            let mut addresses = self.addresses.lock().expect("address pool mutex poisoned");
            let slot = addresses.resolve(host, port)?;
            addresses.addr(slot)
        };

        let weak = self.self_ref.read().expect("self_ref lock poisoned").clone();
        let dispatch: crate::socket::DispatchFn = Arc::new(move |bytes, source| {
            let Some(transport) = weak.upgrade() else {
                return;
            };
            transport.dispatch(bytes, source);
        });

        let socket = Socket::open(addr, &self.config, dispatch)?;
        let handle = SocketHandle(sockets.len());
        sockets.push(SocketEntry {
            socket: Arc::new(socket),
        });

        if self
            .default_socket
            .read()
            .expect("default socket lock poisoned")
            .is_none()
        {
            *self
                .default_socket
                .write()
                .expect("default socket lock poisoned") = Some(handle);
        }

        Ok(handle)
    }

    /// Chooses the socket used when [`Transport::get_peer`] creates a peer
    /// without an explicit local endpoint.
    pub fn set_default_socket(&self, handle: SocketHandle) {
        *self
            .default_socket
            .write()
            .expect("default socket lock poisoned") = Some(handle);
    }

    fn socket_for(&self, handle: SocketHandle) -> Arc<Socket> {
        Arc::clone(
            &self.sockets.read().expect("sockets lock poisoned")[handle.0].socket,
        )
    }

    /// Looks up (or, on miss, creates) the peer at `host:port`, using the
    /// default socket as the peer's local endpoint.
    ///
    /// Idempotent: repeated calls with the same resolved address return the
    /// same [`Peer`].
    pub fn get_peer(&self, host: &str, port: u16) -> Result<Arc<Peer>, TransportError> {
        let (addr, slot) = {
            let mut addresses = self.addresses.lock().expect("address pool mutex poisoned");
            let slot = addresses.resolve(host, port)?;
            (addresses.addr(slot), slot)
        };

        if let Some(entry) = self.peers.read().expect("peers lock poisoned").get(&addr) {
            self.addresses
                .lock()
                .expect("address pool mutex poisoned")
                .release(slot);
            return Ok(Arc::clone(&entry.peer));
        }

        let handle = self
            .default_socket
            .read()
            .expect("default socket lock poisoned")
            .ok_or(TransportError::SocketLimitReached { limit: 0 })?;
        let socket = self.socket_for(handle);

        let mut peers = self.peers.write().expect("peers lock poisoned");
        // Re-check: another thread may have created it while we waited for the write lock.
        if let Some(entry) = peers.get(&addr) {
            self.addresses
                .lock()
                .expect("address pool mutex poisoned")
                .release(slot);
            return Ok(Arc::clone(&entry.peer));
        }
        let peer = Peer::new(addr, socket, Arc::clone(&self.config));
        peers.insert(addr, PeerEntry { peer: Arc::clone(&peer), slot });
        Ok(peer)
    }

    /// Internal entrypoint called by a receive worker once a datagram has
    /// been decompressed: parses the header, resolves `source` to its
    /// owning peer (creating one if this is the first datagram from an
    /// address we haven't seen, e.g. an inbound `Discovery`), and routes it
    /// there.
    fn dispatch(&self, bytes: bytes::Bytes, source: SocketAddr) {
        let in_packet = match InPacket::decode(bytes) {
            Ok(packet) => packet,
            Err(err) => {
                tracing::trace!(%err, %source, "dropping undecodable datagram");
                return;
            }
        };

        let existing = self
            .peers
            .read()
            .expect("peers lock poisoned")
            .get(&source)
            .map(|entry| Arc::clone(&entry.peer));
        let peer = match existing {
            Some(peer) => peer,
            None => {
                let Some(handle) = *self
                    .default_socket
                    .read()
                    .expect("default socket lock poisoned")
                else {
                    tracing::trace!(%source, "no default socket, dropping unsolicited datagram");
                    return;
                };
                let socket = self.socket_for(handle);
                let slot = self
                    .addresses
                    .lock()
                    .expect("address pool mutex poisoned")
                    .insert(source);
                let mut peers = self.peers.write().expect("peers lock poisoned");
                Arc::clone(
                    &peers
                        .entry(source)
                        .or_insert_with(|| PeerEntry {
                            peer: Peer::new(source, socket, Arc::clone(&self.config)),
                            slot,
                        })
                        .peer,
                )
            }
        };

        peer.dispatch_inbound(in_packet);
    }

    /// Drives `Peer::tick` for every currently-known peer, then reaps any
    /// peer that transitioned to [`crate::peer::PeerState::Dead`] this
    /// round, releasing its address slot back to the pool.
    ///
    /// Not part of the distilled wire protocol surface, but a natural
    /// convenience over `Peer::tick` for an application driving many peers
    /// from one loop.
    pub fn tick_all(&self) {
        for peer in self.peers.read().expect("peers lock poisoned").values() {
            peer.peer.tick();
        }
        self.reap_dead_peers();
    }

    fn reap_dead_peers(&self) {
        use crate::peer::PeerState;

        let dead: Vec<SocketAddr> = self
            .peers
            .read()
            .expect("peers lock poisoned")
            .iter()
            .filter(|(_, entry)| entry.peer.state() == PeerState::Dead)
            .map(|(addr, _)| *addr)
            .collect();
        if dead.is_empty() {
            return;
        }

        let mut peers = self.peers.write().expect("peers lock poisoned");
        let mut addresses = self.addresses.lock().expect("address pool mutex poisoned");
        for addr in dead {
            if let Some(entry) = peers.remove(&addr) {
                addresses.release(entry.slot);
            }
        }
    }

    /// Tears down every open socket in dependency order: stop accepting new
    /// work, signal workers to drain, join, deregister buffers. Sockets are
    /// `Drop`-safe on their own, so this simply clears the table.
    pub fn shutdown(&self) {
        self.sockets.write().expect("sockets lock poisoned").clear();
        let mut peers = self.peers.write().expect("peers lock poisoned");
        let mut addresses = self.addresses.lock().expect("address pool mutex poisoned");
        for (_, entry) in peers.drain() {
            addresses.release(entry.slot);
        }
    }
}

impl std::fmt::Debug for Transport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transport")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
