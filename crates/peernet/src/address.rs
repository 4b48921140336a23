//! See [`AddressPool`].

use crate::error::TransportError;
use std::{
    collections::VecDeque,
    net::{SocketAddr, ToSocketAddrs},
};

/// Stable handle into an [`AddressPool`].
///
/// Grounded on the original `NetAddress`/`AddressPool` pair
/// (`original_source/PeerNet/NetAddress.hpp`), which pre-registers a fixed
/// number of address buffers with the I/O subsystem and hands out slot
/// indices rather than allocating per-connection. This crate's pool is a
/// plain `Vec`, since there is no registered-I/O buffer to pre-announce for
/// an address the way there is for send/receive data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AddressSlot(usize);

struct Entry {
    addr: SocketAddr,
    formatted: String,
}

/// Resolves `host:port` strings to [`SocketAddr`]s and caches the result in
/// a fixed-growth pool, so a peer that is torn down and later re-contacted
/// doesn't re-pay a resolver round trip.
///
/// The original leaves releasing a freed slot back to the unused pool as a
/// `// TODO`; this crate implements it (see `SPEC_FULL.md`'s supplemented
/// features) via [`AddressPool::release`].
#[derive(Debug, Default)]
pub struct AddressPool {
    slots: Vec<Option<Entry>>,
    unused: VecDeque<usize>,
}

impl AddressPool {
    /// Creates an empty pool.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolves `host:port`, allocating a new slot (or reusing a released
    /// one) and caching the formatted `"ip:port"` string alongside it.
    pub fn resolve(&mut self, host: &str, port: u16) -> Result<AddressSlot, TransportError> {
        let addr = (host, port)
            .to_socket_addrs()
            .map_err(TransportError::AddressResolution)?
            .next()
            .ok_or_else(|| {
                TransportError::AddressResolution(std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    "resolver returned no addresses",
                ))
            })?;
        Ok(self.insert(addr))
    }

    /// Inserts an already-resolved address, reusing a released slot if one
    /// is available.
    pub fn insert(&mut self, addr: SocketAddr) -> AddressSlot {
        let entry = Entry {
            addr,
            formatted: addr.to_string(),
        };
        if let Some(index) = self.unused.pop_front() {
            self.slots[index] = Some(entry);
            AddressSlot(index)
        } else {
            self.slots.push(Some(entry));
            AddressSlot(self.slots.len() - 1)
        }
    }

    /// Looks up the [`SocketAddr`] for a slot. Panics if the slot was
    /// already released — slots are only handed out by this pool and must
    /// not outlive a `release` call.
    #[must_use]
    pub fn addr(&self, slot: AddressSlot) -> SocketAddr {
        self.slots[slot.0]
            .as_ref()
            .expect("address slot used after release")
            .addr
    }

    /// Looks up the cached `"ip:port"` formatted string for a slot.
    #[must_use]
    pub fn formatted(&self, slot: AddressSlot) -> &str {
        &self.slots[slot.0]
            .as_ref()
            .expect("address slot used after release")
            .formatted
    }

    /// Returns a slot to the unused pool, so a future `resolve`/`insert`
    /// can reuse it instead of growing the pool unboundedly.
    pub fn release(&mut self, slot: AddressSlot) {
        self.slots[slot.0] = None;
        self.unused.push_back(slot.0);
    }
}

#[cfg(test)]
mod tests {
    use super::AddressPool;
    use std::net::{IpAddr, Ipv4Addr, SocketAddr};

    fn addr(port: u16) -> SocketAddr {
        SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), port)
    }

    #[test]
    fn insert_and_lookup() {
        let mut pool = AddressPool::new();
        let slot = pool.insert(addr(9999));
        assert_eq!(addr(9999), pool.addr(slot));
        assert_eq!("127.0.0.1:9999", pool.formatted(slot));
    }

    #[test]
    fn released_slots_are_reused() {
        let mut pool = AddressPool::new();
        let a = pool.insert(addr(1));
        pool.release(a);
        let b = pool.insert(addr(2));
        assert_eq!(a, b, "released slot should be recycled, not grown past");
        assert_eq!(addr(2), pool.addr(b));
    }

    #[test]
    fn distinct_addresses_get_distinct_slots() {
        let mut pool = AddressPool::new();
        let a = pool.insert(addr(1));
        let b = pool.insert(addr(2));
        assert_ne!(a, b);
    }
}
