//! Wire-framed packet types: [`OutPacket`] (builder-style, for sending) and
//! [`InPacket`] (parser-style, for receiving), plus the fixed [`header`]
//! layout shared by both.

pub mod header;

use crate::error::{DatagramError, PayloadTooLarge};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use header::{ChannelType, Header, SeqId, Timestamp, HEADER_LEN};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

/// An outbound datagram, owned jointly by its channel's outstanding map and
/// (briefly) the socket send worker.
///
/// `is_sending` and `needs_delete` are plain atomics rather than fields
/// behind the channel's outstanding-map mutex, so the send worker's
/// completion handler and the channel's retransmission sweep can touch them
/// without contending on that mutex (see `DESIGN.md`).
#[derive(Debug)]
pub struct OutPacket {
    /// Header written to the wire ahead of `payload`.
    pub header: Header,
    /// Opaque application payload.
    pub payload: Bytes,
    /// Set while a send worker is actively transmitting this packet.
    /// Cleared on completion.
    is_sending: AtomicBool,
    /// Set once this packet no longer needs to live in any outstanding map
    /// (e.g. an ACK, or a reliable packet that has been fully acked).
    needs_delete: AtomicBool,
    /// Number of times a peer tick has retransmitted this packet, used
    /// against `Config::max_retransmits` for the `PeerUnreachable` budget.
    retransmit_count: AtomicU32,
}

impl OutPacket {
    /// Creates a new outbound packet. `payload` must already have been
    /// validated against [`crate::config::Config::max_payload_len`].
    #[must_use]
    pub fn new(header: Header, payload: Bytes) -> Self {
        Self {
            header,
            payload,
            is_sending: AtomicBool::new(false),
            needs_delete: AtomicBool::new(false),
            retransmit_count: AtomicU32::new(0),
        }
    }

    /// Validates `payload` against `max_payload_len`, then constructs.
    pub fn with_payload(
        header: Header,
        payload: Bytes,
        max_payload_len: usize,
    ) -> Result<Self, PayloadTooLarge> {
        if payload.len() > max_payload_len {
            return Err(PayloadTooLarge {
                len: payload.len(),
                max: max_payload_len,
            });
        }
        Ok(Self::new(header, payload))
    }

    /// Serializes `header || payload` into `dst`, uncompressed.
    pub fn encode_into(&self, dst: &mut BytesMut) {
        self.header.encode(dst);
        dst.put_slice(&self.payload);
    }

    /// `true` while a send worker is actively transmitting this packet.
    #[must_use]
    pub fn is_sending(&self) -> bool {
        self.is_sending.load(Ordering::Acquire)
    }

    /// Marks this packet as currently being transmitted.
    pub fn set_sending(&self, sending: bool) {
        self.is_sending.store(sending, Ordering::Release);
    }

    /// `true` once this packet should be reclaimed at the next channel
    /// sweep.
    #[must_use]
    pub fn needs_delete(&self) -> bool {
        self.needs_delete.load(Ordering::Acquire)
    }

    /// Marks this packet for reclamation.
    pub fn mark_needs_delete(&self) {
        self.needs_delete.store(true, Ordering::Release);
    }

    /// Increments and returns the retransmit counter, called once per peer
    /// tick that selects this packet for retransmission.
    pub fn bump_retransmit_count(&self) -> u32 {
        self.retransmit_count.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Number of times a peer tick has retransmitted this packet so far.
    #[must_use]
    pub fn retransmit_count(&self) -> u32 {
        self.retransmit_count.load(Ordering::SeqCst)
    }
}

/// A received, already-decompressed datagram, parsed from raw bytes.
///
/// Transient: built by a receive worker and consumed by the destination
/// channel's `receive` call.
#[derive(Debug, Clone)]
pub struct InPacket {
    /// Parsed fixed header.
    pub header: Header,
    /// Payload bytes following the header.
    pub payload: Bytes,
}

impl InPacket {
    /// Convenience accessor for [`Header::channel_type`].
    #[must_use]
    pub const fn channel_type(&self) -> ChannelType {
        self.header.channel_type
    }

    /// Convenience accessor for [`Header::seq`].
    #[must_use]
    pub const fn seq(&self) -> SeqId {
        self.header.seq
    }

    /// Convenience accessor for [`Header::timestamp`].
    #[must_use]
    pub const fn timestamp(&self) -> Timestamp {
        self.header.timestamp
    }

    /// Parses a decompressed datagram into header + payload.
    ///
    /// Returns [`DatagramError::TooShort`] if `bytes` is shorter than
    /// [`HEADER_LEN`]; never fails for any other reason since the payload is
    /// treated as opaque.
    pub fn decode(mut bytes: Bytes) -> Result<Self, DatagramError> {
        if bytes.len() < HEADER_LEN {
            return Err(DatagramError::TooShort);
        }
        let header = Header::decode(&mut bytes)?;
        Ok(Self {
            header,
            payload: bytes,
        })
    }
}
