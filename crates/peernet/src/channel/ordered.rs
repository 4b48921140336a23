//! See [`OrderedChannel`].

use super::{micros_since, Channel, RetransmitCandidate};
use crate::{
    error::PayloadTooLarge,
    packet::{
        header::{ChannelType, Header, SeqId, Timestamp},
        InPacket, OutPacket,
    },
};
use ahash::{AHashMap, AHashSet};
use bytes::Bytes;
use std::{
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

/// Reliable, strictly-ordered delivery.
///
/// Outbound behaves exactly like [`super::ReliableChannel`]. Inbound tracks
/// `next_expected_in` plus a reorder buffer for data, and (independently)
/// `next_expected_ack` plus a second buffer for acks, so that out-of-order
/// ack arrivals collapse into a contiguous acked prefix without blocking on
/// the data-side reorder buffer.
#[derive(Debug)]
pub struct OrderedChannel {
    channel_type: ChannelType,
    ack_channel_type: ChannelType,
    next_out: AtomicU64,
    outstanding: Mutex<AHashMap<SeqId, Arc<OutPacket>>>,

    next_expected_in: AtomicU64,
    reorder_buffer: Mutex<AHashMap<SeqId, Bytes>>,

    next_expected_ack: AtomicU64,
    ack_reorder_buffer: Mutex<AHashSet<SeqId>>,
}

impl OrderedChannel {
    /// Creates a fresh channel; the first expected inbound id and the first
    /// expected ack id both start at 1, matching the first id a peer's
    /// `next_out` counter assigns.
    #[must_use]
    pub fn new() -> Self {
        Self {
            channel_type: ChannelType::Ordered,
            ack_channel_type: ChannelType::OrderedAck,
            next_out: AtomicU64::new(1),
            outstanding: Mutex::new(AHashMap::new()),
            next_expected_in: AtomicU64::new(1),
            reorder_buffer: Mutex::new(AHashMap::new()),
            next_expected_ack: AtomicU64::new(1),
            ack_reorder_buffer: Mutex::new(AHashSet::new()),
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

    /// Drains the data reorder buffer starting from `next_expected_in`,
    /// returning deliveries in strictly increasing id order. Caller must
    /// already hold `reorder_buffer`'s lock, since the check-and-advance of
    /// `next_expected_in` has to stay atomic with the caller's own decision
    /// to deliver or park (see `receive`).
    fn drain_data_locked(&self, buffer: &mut AHashMap<SeqId, Bytes>) -> Vec<Bytes> {
        let mut deliveries = Vec::new();
        loop {
            let expected = self.next_expected_in.load(Ordering::SeqCst);
            match buffer.remove(&expected) {
                Some(payload) => {
                    deliveries.push(payload);
                    self.next_expected_in.fetch_add(1, Ordering::SeqCst);
                }
                None => break,
            }
        }
        deliveries
    }

    /// Drains the ack reorder buffer starting from `next_expected_ack`.
    fn drain_acks(&self) {
        let mut buffer = self
            .ack_reorder_buffer
            .lock()
            .expect("ack reorder buffer mutex poisoned");
        loop {
            let expected = self.next_expected_ack.load(Ordering::SeqCst);
            if buffer.remove(&expected) {
                self.next_expected_ack.fetch_add(1, Ordering::SeqCst);
            } else {
                break;
            }
        }
    }
}

impl Default for OrderedChannel {
    fn default() -> Self {
        Self::new()
    }
}

impl Channel for OrderedChannel {
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

        // The whole check-and-advance of `next_expected_in` has to happen
        // under this single lock: two concurrent receivers both observing
        // `seq == expected` must not both deliver and both advance, or the
        // id after `seq` gets skipped and parked forever.
        let mut buffer = self
            .reorder_buffer
            .lock()
            .expect("reorder buffer mutex poisoned");
        let expected = self.next_expected_in.load(Ordering::SeqCst);

        if seq < expected {
            tracing::trace!(seq, "dropping already-delivered ordered packet");
            return (Vec::new(), Some(ack));
        }
        if seq > expected {
            tracing::trace!(seq, expected, "parking out-of-order ordered packet");
            buffer.insert(seq, packet.payload);
            return (Vec::new(), Some(ack));
        }

        self.next_expected_in.fetch_add(1, Ordering::SeqCst);
        let mut deliveries = vec![packet.payload];
        deliveries.extend(self.drain_data_locked(&mut buffer));
        (deliveries, Some(ack))
    }

    fn on_ack(
        &self,
        acked_seq: SeqId,
        echoed_timestamp: Timestamp,
        now: Timestamp,
    ) -> Option<Duration> {
        let next_expected_ack = self.next_expected_ack.load(Ordering::SeqCst);
        if acked_seq < next_expected_ack {
            return None; // already contiguous: stale duplicate
        }

        let newly_inserted = self
            .ack_reorder_buffer
            .lock()
            .expect("ack reorder buffer mutex poisoned")
            .insert(acked_seq);
        if !newly_inserted {
            return None; // duplicate out-of-order ack
        }

        self.drain_acks();
        let next_expected_ack = self.next_expected_ack.load(Ordering::SeqCst);
        self.outstanding
            .lock()
            .expect("outstanding map mutex poisoned")
            .retain(|&seq, packet| !(seq < next_expected_ack && !packet.is_sending()));

        Some(micros_since(echoed_timestamp, now))
    }

    fn outstanding_count(&self) -> usize {
        self.outstanding
            .lock()
            .expect("outstanding map mutex poisoned")
            .len()
    }

    fn last_in_id(&self) -> SeqId {
        self.next_expected_in.load(Ordering::SeqCst).saturating_sub(1)
    }

    fn retransmission_candidates(
        &self,
        now: Timestamp,
        threshold: Duration,
    ) -> Vec<RetransmitCandidate> {
        let next_expected_ack = self.next_expected_ack.load(Ordering::SeqCst);
        let outstanding = self
            .outstanding
            .lock()
            .expect("outstanding map mutex poisoned");

        outstanding
            .values()
            .filter(|packet| {
                let seq = packet.header.seq;
                seq >= next_expected_ack
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
