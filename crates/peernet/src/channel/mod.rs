//! Per-peer, per-type sequencing engines.
//!
//! Three concrete variants ([`unreliable`], [`reliable`], [`ordered`]) share
//! the [`Channel`] contract from the outside, but each has a different
//! internal state shape, matching the spec's "common contract, different
//! internals" design rather than forcing one struct with reliability-mode
//! branches inside every method.

pub mod ordered;
pub mod reliable;
pub mod unreliable;

use crate::{
    error::PayloadTooLarge,
    packet::{
        header::{ChannelType, SeqId, Timestamp},
        InPacket, OutPacket,
    },
};
use bytes::Bytes;
use std::{sync::Arc, time::Duration};

pub use ordered::OrderedChannel;
pub use reliable::ReliableChannel;
pub use unreliable::UnreliableChannel;

/// A packet due for retransmission, discovered during a peer tick's sweep of
/// a channel's outstanding map.
#[derive(Debug, Clone)]
pub struct RetransmitCandidate {
    /// The packet to resend, unmodified (same id and timestamp).
    pub packet: Arc<OutPacket>,
}

/// Common contract implemented by [`UnreliableChannel`], [`ReliableChannel`],
/// and [`OrderedChannel`].
pub trait Channel: Send + Sync {
    /// Which wire tag this channel emits for data-bearing outbound packets.
    fn channel_type(&self) -> ChannelType;

    /// Assigns the next outbound sequence id and builds a packet, recording
    /// it in the outstanding map if this channel is reliable.
    fn new_out(
        &self,
        channel_id: u16,
        payload: Bytes,
        now: Timestamp,
        max_payload_len: usize,
    ) -> Result<Arc<OutPacket>, PayloadTooLarge>;

    /// Feeds a received datagram through this channel's inbound logic,
    /// returning zero or more application deliveries, in delivery order
    /// (an [`OrderedChannel`] may drain several parked arrivals in one
    /// call), and an ack packet to send back (if this channel type acks).
    fn receive(&self, packet: InPacket, now: Timestamp) -> (Vec<Bytes>, Option<Arc<OutPacket>>);

    /// Processes a received ack for this channel, returning an RTT sample if
    /// the acked id was still outstanding.
    fn on_ack(&self, acked_seq: SeqId, echoed_timestamp: Timestamp, now: Timestamp) -> Option<Duration>;

    /// Number of packets currently in the outstanding map awaiting ack.
    /// Always 0 for [`UnreliableChannel`].
    fn outstanding_count(&self) -> usize;

    /// Highest inbound sequence id observed so far (0 if none yet).
    fn last_in_id(&self) -> SeqId;

    /// Collects outstanding packets whose age exceeds `threshold` and whose
    /// `is_sending` flag is clear, marking them `is_sending` as a side
    /// effect so a concurrent sweep won't double-queue them.
    fn retransmission_candidates(
        &self,
        now: Timestamp,
        threshold: Duration,
    ) -> Vec<RetransmitCandidate>;
}

/// Converts a [`Timestamp`] (sender-relative monotonic microseconds) pair
/// into a [`Duration`], saturating at zero if `later` somehow precedes
/// `earlier` (possible with a stale echoed timestamp).
#[must_use]
pub fn micros_since(earlier: Timestamp, later: Timestamp) -> Duration {
    Duration::from_micros(later.saturating_sub(earlier))
}
