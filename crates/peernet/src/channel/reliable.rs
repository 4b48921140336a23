//! See [`ReliableChannel`].

use super::{micros_since, Channel, RetransmitCandidate};
use crate::{
    error::PayloadTooLarge,
    packet::{
        header::{ChannelType, Header, SeqId, Timestamp},
        InPacket, OutPacket,
    },
};
use ahash::AHashMap;
use bytes::Bytes;
use std::{
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

/// Reliable, unordered delivery: at-least-once on the wire, at-most-once to
/// the application (deduplicated by sequence id).
///
/// `last_acked` is a dedicated field, distinct from `last_in_id` — the
/// original source's ACK-side dedup check reused its inbound-data
/// `last_in_id` field for this purpose, which `DESIGN.md` records as a
/// likely source bug. Here the two pieces of state simply live in different
/// atomics, so the bug class cannot recur by construction.
#[derive(Debug)]
pub struct ReliableChannel {
    channel_type: ChannelType,
    ack_channel_type: ChannelType,
    next_out: AtomicU64,
    last_acked: AtomicU64,
    last_in_id: AtomicU64,
    outstanding: Mutex<AHashMap<SeqId, Arc<OutPacket>>>,
}

impl ReliableChannel {
    /// Creates a fresh channel with no packets sent, received, or acked yet.
    #[must_use]
    pub fn new() -> Self {
        Self {
            channel_type: ChannelType::Reliable,
            ack_channel_type: ChannelType::ReliableAck,
            next_out: AtomicU64::new(1),
            last_acked: AtomicU64::new(0),
            last_in_id: AtomicU64::new(0),
            outstanding: Mutex::new(AHashMap::new()),
        }
    }

    fn ack_for(&self, channel_id: u16, seq: SeqId, echoed_timestamp: Timestamp) -> Arc<OutPacket> {
        let header = Header {
            channel_type: self.ack_channel_type,
            channel_id,
            seq,
            timestamp: echoed_timestamp,
        };
        Arc::new(OutPacket::new(header, Bytes::new()))
    }
}

impl Default for ReliableChannel {
    fn default() -> Self {
        Self::new()
    }
}

impl Channel for ReliableChannel {
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
        let packet = Arc::new(OutPacket::with_payload(header, payload, max_payload_len)?);
        self.outstanding
            .lock()
            .expect("outstanding map mutex poisoned")
            .insert(seq, Arc::clone(&packet));
        Ok(packet)
    }

    fn receive(&self, packet: InPacket, _now: Timestamp) -> (Vec<Bytes>, Option<Arc<OutPacket>>) {
        let seq = packet.seq();
        let ack = self.ack_for(packet.header.channel_id, seq, packet.timestamp());

        let advanced = self
            .last_in_id
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |last| {
                (seq > last).then_some(seq)
            })
            .is_ok();

        if !advanced {
            tracing::trace!(seq, "dropping duplicate/stale reliable packet, still acking");
            return (Vec::new(), Some(ack));
        }
        (vec![packet.payload], Some(ack))
    }

    fn on_ack(
        &self,
        acked_seq: SeqId,
        echoed_timestamp: Timestamp,
        now: Timestamp,
    ) -> Option<Duration> {
        let advanced = self
            .last_acked
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |last| {
                (acked_seq > last).then_some(acked_seq)
            })
            .is_ok();

        if !advanced {
            return None;
        }

        let last_acked = self.last_acked.load(Ordering::SeqCst);
        self.outstanding
            .lock()
            .expect("outstanding map mutex poisoned")
            .retain(|&seq, packet| !(seq <= last_acked && !packet.is_sending()));

        Some(micros_since(echoed_timestamp, now))
    }

    fn outstanding_count(&self) -> usize {
        self.outstanding
            .lock()
            .expect("outstanding map mutex poisoned")
            .len()
    }

    fn last_in_id(&self) -> SeqId {
        self.last_in_id.load(Ordering::SeqCst)
    }

    fn retransmission_candidates(
        &self,
        now: Timestamp,
        threshold: Duration,
    ) -> Vec<RetransmitCandidate> {
        let last_acked = self.last_acked.load(Ordering::SeqCst);
        let outstanding = self
            .outstanding
            .lock()
            .expect("outstanding map mutex poisoned");

        outstanding
            .values()
            .filter(|packet| {
                let seq = packet.header.seq;
                seq > last_acked
                    && !packet.is_sending()
                    && micros_since(packet.header.timestamp, now) > threshold
            })
            .map(|packet| {
                packet.set_sending(true);
                RetransmitCandidate {
                    packet: Arc::clone(packet),
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::header::ChannelType as Ct;

    fn in_packet(seq: SeqId, timestamp: Timestamp, payload: &'static [u8]) -> InPacket {
        InPacket {
            header: Header {
                channel_type: Ct::Reliable,
                channel_id: 0,
                seq,
                timestamp,
            },
            payload: Bytes::from_static(payload),
        }
    }

    #[test]
    fn receive_always_acks_even_duplicates() {
        let chan = ReliableChannel::new();
        let (deliveries, ack) = chan.receive(in_packet(1, 10, b"a"), 20);
        assert_eq!(vec![Bytes::from_static(b"a")], deliveries);
        assert!(ack.is_some());

        let (deliveries, ack) = chan.receive(in_packet(1, 10, b"a"), 25);
        assert!(deliveries.is_empty());
        assert!(ack.is_some(), "duplicates are still acked");
    }

    #[test]
    fn on_ack_purges_outstanding_entries() {
        let chan = ReliableChannel::new();
        let p1 = chan.new_out(0, Bytes::new(), 0, 1024).expect("ok");
        let _p2 = chan.new_out(0, Bytes::new(), 0, 1024).expect("ok");
        assert_eq!(2, chan.outstanding_count());

        chan.on_ack(p1.header.seq, p1.header.timestamp, 100);
        assert_eq!(1, chan.outstanding_count());
    }

    #[test]
    fn duplicate_acks_are_idempotent() {
        let chan = ReliableChannel::new();
        let p1 = chan.new_out(0, Bytes::new(), 0, 1024).expect("ok");
        chan.on_ack(p1.header.seq, 0, 100);
        assert_eq!(0, chan.outstanding_count());

        for _ in 0..4 {
            let sample = chan.on_ack(p1.header.seq, 0, 100);
            assert!(sample.is_none());
            assert_eq!(0, chan.outstanding_count());
        }
    }

    #[test]
    fn is_sending_packets_survive_ack_purge_until_cleared() {
        let chan = ReliableChannel::new();
        let p1 = chan.new_out(0, Bytes::new(), 0, 1024).expect("ok");
        p1.set_sending(true);

        chan.on_ack(p1.header.seq, 0, 100);
        assert_eq!(1, chan.outstanding_count(), "in-flight retransmit deferred");

        p1.set_sending(false);
        chan.on_ack(p1.header.seq, 0, 100); // last_acked unchanged, no-op purge
        assert_eq!(
            1,
            chan.outstanding_count(),
            "ack already consumed, needs a fresh ack to purge"
        );
    }

    #[test]
    fn retransmission_candidates_respect_threshold_and_sending_flag() {
        let chan = ReliableChannel::new();
        let p1 = chan.new_out(0, Bytes::new(), 0, 1024).expect("ok");
        let threshold = Duration::from_millis(50);

        let none_yet = chan.retransmission_candidates(p1.header.timestamp, threshold);
        assert!(none_yet.is_empty());

        let later = p1.header.timestamp + 100_000; // 100ms later
        let candidates = chan.retransmission_candidates(later, threshold);
        assert_eq!(1, candidates.len());
        assert!(p1.is_sending(), "candidate selection claims the packet");

        let again = chan.retransmission_candidates(later, threshold);
        assert!(again.is_empty(), "already claimed packets aren't re-selected");
    }
}
