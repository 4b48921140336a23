//! See [`UnreliableChannel`].

use super::{Channel, RetransmitCandidate};
use crate::{
    error::PayloadTooLarge,
    packet::{
        header::{ChannelType, Header, SeqId, Timestamp},
        InPacket, OutPacket,
    },
};
use bytes::Bytes;
use std::{
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};

/// Unreliable, unordered delivery: no outstanding map, no acks, no
/// retransmission.
///
/// `new_out` hands the caller an [`OutPacket`] without retaining it
/// anywhere; `receive` drops anything at or behind `last_in_id` (stale or
/// duplicate) and otherwise delivers immediately.
#[derive(Debug)]
pub struct UnreliableChannel {
    channel_type: ChannelType,
    next_out: AtomicU64,
    last_in_id: AtomicU64,
}

impl UnreliableChannel {
    /// Creates a fresh channel with no packets sent or received yet.
    #[must_use]
    pub fn new() -> Self {
        Self {
            channel_type: ChannelType::Unreliable,
            next_out: AtomicU64::new(1),
            last_in_id: AtomicU64::new(0),
        }
    }
}

impl Default for UnreliableChannel {
    fn default() -> Self {
        Self::new()
    }
}

impl Channel for UnreliableChannel {
    fn channel_type(&self) -> ChannelType {
        self.channel_type
    }

    fn new_out(
        &self,
        channel_id: u16,
        payload: Bytes,
        now: Timestamp,
        max_payload_len: usize,
    ) -> Result<Arc<OutPacket>, PayloadTooLarge> {
        let seq = self.next_out.fetch_add(1, Ordering::SeqCst);
        let header = Header {
            channel_type: self.channel_type,
            channel_id,
            seq,
            timestamp: now,
        };
        Ok(Arc::new(OutPacket::with_payload(
            header,
            payload,
            max_payload_len,
        )?))
    }

    fn receive(&self, packet: InPacket, _now: Timestamp) -> (Vec<Bytes>, Option<Arc<OutPacket>>) {
        let seq = packet.seq();
        let updated = self
            .last_in_id
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |last| {
                (seq > last).then_some(seq)
            })
            .is_ok();

        if updated {
            (vec![packet.payload], None)
        } else {
            tracing::trace!(seq, "dropping stale/duplicate unreliable packet");
            (Vec::new(), None)
        }
    }

    fn on_ack(&self, _acked_seq: SeqId, _echoed_timestamp: Timestamp, _now: Timestamp) -> Option<Duration> {
        None
    }

    fn outstanding_count(&self) -> usize {
        0
    }

    fn last_in_id(&self) -> SeqId {
        self.last_in_id.load(Ordering::SeqCst)
    }

    fn retransmission_candidates(
        &self,
        _now: Timestamp,
        _threshold: Duration,
    ) -> Vec<RetransmitCandidate> {
        Vec::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::header::ChannelType as Ct;

    fn in_packet(seq: SeqId, payload: &'static [u8]) -> InPacket {
        InPacket {
            header: Header {
                channel_type: Ct::Unreliable,
                channel_id: 0,
                seq,
                timestamp: 0,
            },
            payload: Bytes::from_static(payload),
        }
    }

    #[test]
    fn delivers_in_order_packets() {
        let chan = UnreliableChannel::new();
        let (deliveries, ack) = chan.receive(in_packet(1, b"a"), 0);
        assert!(ack.is_none());
        assert_eq!(vec![Bytes::from_static(b"a")], deliveries);
        assert_eq!(1, chan.last_in_id());
    }

    #[test]
    fn drops_stale_and_duplicate_packets() {
        let chan = UnreliableChannel::new();
        chan.receive(in_packet(5, b"a"), 0);
        let (deliveries, _) = chan.receive(in_packet(5, b"dup"), 0);
        assert!(deliveries.is_empty());
        let (deliveries, _) = chan.receive(in_packet(3, b"stale"), 0);
        assert!(deliveries.is_empty());
        assert_eq!(5, chan.last_in_id());
    }

    #[test]
    fn new_out_never_populates_outstanding_map() {
        let chan = UnreliableChannel::new();
        let _ = chan.new_out(0, Bytes::from_static(b"x"), 0, 1024);
        assert_eq!(0, chan.outstanding_count());
    }

    #[test]
    fn assigns_strictly_monotonic_ids() {
        let chan = UnreliableChannel::new();
        let p1 = chan.new_out(0, Bytes::new(), 0, 1024).expect("ok");
        let p2 = chan.new_out(0, Bytes::new(), 0, 1024).expect("ok");
        assert!(p1.header.seq < p2.header.seq);
    }
}
