//! See [`BufferPool`].

use bytes::BytesMut;
use slab::Slab;

/// Stable handle to a registered buffer.
///
/// What a completion carries back to its worker is this plain `usize`
/// index, not a pointer into the buffer — grounded on
/// `other_examples`' `strata` transport pool (`slab::Slab`-backed
/// `PacketPool`/`PacketHandle`), which is exactly the Rust-idiomatic shape
/// for the abstract "registered buffer, referenced by id" design note this
/// crate's spec calls for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BufferHandle(usize);

/// A fixed-size pool of pre-allocated, pre-sized buffers.
///
/// One [`BufferPool`] backs one worker thread's private partition of a
/// socket's registered send or receive buffers; workers never share a pool,
/// so acquiring and releasing a buffer needs no lock beyond whatever
/// `&mut` access the owning worker already has.
#[derive(Debug)]
pub struct BufferPool {
    slab: Slab<BytesMut>,
    buffer_len: usize,
    capacity: usize,
}

impl BufferPool {
    /// Pre-allocates `capacity` buffers of `buffer_len` bytes each.
    #[must_use]
    pub fn new(capacity: usize, buffer_len: usize) -> Self {
        let mut slab = Slab::with_capacity(capacity);
        for _ in 0..capacity {
            slab.insert(BytesMut::with_capacity(buffer_len));
        }
        Self {
            slab,
            buffer_len,
            capacity,
        }
    }

    /// Total number of buffers this pool was constructed with.
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of buffers currently free.
    #[must_use]
    pub fn available(&self) -> usize {
        self.slab.len()
    }

    /// Claims a free buffer, or `None` if the pool is exhausted — callers
    /// must re-post their request rather than block (spec §4.3's
    /// backpressure rule).
    pub fn acquire(&mut self) -> Option<(BufferHandle, BytesMut)> {
        if self.slab.is_empty() {
            return None;
        }
        let key = self.slab.iter().next().map(|(k, _)| k)?;
        let mut buf = self.slab.remove(key);
        buf.clear();
        Some((BufferHandle(key), buf))
    }

    /// Returns a buffer to the pool after a completion, keyed by the handle
    /// [`BufferPool::acquire`] returned.
    pub fn release(&mut self, handle: BufferHandle, mut buf: BytesMut) {
        buf.clear();
        buf.reserve(self.buffer_len);
        self.slab.insert(buf);
        let _ = handle; // the slab assigns a fresh key; the old handle is spent.
    }
}
