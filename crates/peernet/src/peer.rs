//! See [`Peer`].

use crate::{
    channel::{Channel, OrderedChannel, ReliableChannel, UnreliableChannel},
    config::Config,
    error::PayloadTooLarge,
    packet::{
        header::{ChannelType, Header, Timestamp},
        InPacket, OutPacket,
    },
    rtt::RttEstimator,
    socket::Socket,
};
use bytes::Bytes;
use std::{
    collections::VecDeque,
    net::SocketAddr,
    sync::{
        atomic::{AtomicU8, Ordering},
        Arc, Mutex,
    },
    time::{Duration, Instant},
};

/// Lifecycle state of a [`Peer`], per spec §4.4.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PeerState {
    /// Discovery sent, awaiting the peer's acknowledgment. Outbound sends
    /// are queued locally rather than put on the wire.
    Probing = 0,
    /// Discovery-ACK received; normal send/receive traffic flows.
    Established = 1,
    /// Shutdown requested: no new outbound packets accepted, but
    /// outstanding reliables keep retransmitting for a bounded grace
    /// period.
    Draining = 2,
    /// Grace period elapsed (or the retransmit budget was exceeded): the
    /// peer is inert and further sends are dropped.
    Dead = 3,
}

impl PeerState {
    const fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Probing,
            1 => Self::Established,
            2 => Self::Draining,
            _ => Self::Dead,
        }
    }
}

/// Which of a peer's three channels a [`PeerEvent::Delivered`] came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelKind {
    /// See [`UnreliableChannel`].
    Unreliable,
    /// See [`ReliableChannel`].
    Reliable,
    /// See [`OrderedChannel`].
    Ordered,
}

/// The small, enumerated capability set a [`Peer`]'s receive callback is
/// invoked with (design note §9: "dynamic dispatch to user code ... should
/// become an explicit callback interface with a small, enumerated
/// capability set").
#[derive(Debug, Clone)]
pub enum PeerEvent {
    /// A payload was delivered by one of this peer's channels, in that
    /// channel's delivery order.
    Delivered {
        /// Which channel produced this delivery.
        channel: ChannelKind,
        /// The delivered application payload.
        payload: Bytes,
    },
    /// This peer exceeded its retransmit budget (spec §7's
    /// `PeerUnreachable`) and has transitioned to [`PeerState::Dead`].
    Dead,
}

type ReceiveCallback = dyn Fn(PeerEvent) + Send + Sync;

/// Reserved channel id used for the [`ChannelType::Discovery`] handshake and
/// its acknowledgment; distinct from any application-assigned channel id.
const DISCOVERY_CHANNEL_ID: u16 = 0;

/// Aggregates one channel of each type against a single remote address.
///
/// The user-visible unit of this crate: applications create packets
/// through a `Peer`, send them, tick it periodically to drive
/// retransmission and RTT smoothing, and register a receive callback to
/// observe deliveries.
pub struct Peer {
    remote_addr: SocketAddr,
    socket: Arc<Socket>,
    config: Arc<Config>,
    start: Instant,

    unreliable: UnreliableChannel,
    reliable: ReliableChannel,
    ordered: OrderedChannel,

    rtt: Mutex<RttEstimator>,
    state: AtomicU8,
    pending_while_probing: Mutex<VecDeque<(Arc<OutPacket>, SocketAddr)>>,
    draining_deadline: Mutex<Option<Instant>>,
    callback: Mutex<Option<Box<ReceiveCallback>>>,
}

impl Peer {
    /// Creates a peer for `remote_addr`, sends its `Discovery` datagram
    /// immediately, and enters [`PeerState::Probing`].
    #[must_use]
    pub fn new(remote_addr: SocketAddr, socket: Arc<Socket>, config: Arc<Config>) -> Arc<Self> {
        let peer = Arc::new(Self {
            remote_addr,
            socket,
            config,
            start: Instant::now(),
            unreliable: UnreliableChannel::new(),
            reliable: ReliableChannel::new(),
            ordered: OrderedChannel::new(),
            rtt: Mutex::new(RttEstimator::new()),
            state: AtomicU8::new(PeerState::Probing as u8),
            pending_while_probing: Mutex::new(VecDeque::new()),
            draining_deadline: Mutex::new(None),
            callback: Mutex::new(None),
        });
        peer.send_discovery();
        peer
    }

    fn send_discovery(&self) {
        let header = Header {
            channel_type: ChannelType::Discovery,
            channel_id: DISCOVERY_CHANNEL_ID,
            seq: 0,
            timestamp: self.now_ts(),
        };
        let packet = Arc::new(OutPacket::new(header, Bytes::new()));
        self.socket.submit(packet, self.remote_addr);
    }

    /// Remote address this peer talks to.
    #[must_use]
    pub const fn remote_addr(&self) -> SocketAddr {
        self.remote_addr
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> PeerState {
        PeerState::from_u8(self.state.load(Ordering::SeqCst))
    }

    /// Current smoothed RTT estimate, in milliseconds (`RTT_KOL`).
    #[must_use]
    pub fn rtt_ms(&self) -> f64 {
        self.rtt.lock().expect("rtt mutex poisoned").get_ms()
    }

    /// Registers the callback invoked for every [`PeerEvent`] this peer
    /// produces, in delivery order, from whichever worker thread observed
    /// the datagram.
    pub fn on_receive(&self, callback: impl Fn(PeerEvent) + Send + Sync + 'static) {
        *self.callback.lock().expect("callback mutex poisoned") = Some(Box::new(callback));
    }

    fn emit(&self, event: PeerEvent) {
        if let Some(callback) = self.callback.lock().expect("callback mutex poisoned").as_ref() {
            callback(event);
        }
    }

    fn now_ts(&self) -> Timestamp {
        Timestamp::try_from(self.start.elapsed().as_micros()).unwrap_or(Timestamp::MAX)
    }

    /// Builds an unreliable outbound packet for `channel_id`.
    pub fn create_unreliable(
        &self,
        channel_id: u16,
        payload: Bytes,
    ) -> Result<Arc<OutPacket>, PayloadTooLarge> {
        self.unreliable
            .new_out(channel_id, payload, self.now_ts(), self.config.max_payload_len())
    }

    /// Builds a reliable outbound packet for `channel_id`.
    pub fn create_reliable(
        &self,
        channel_id: u16,
        payload: Bytes,
    ) -> Result<Arc<OutPacket>, PayloadTooLarge> {
        self.reliable
            .new_out(channel_id, payload, self.now_ts(), self.config.max_payload_len())
    }

    /// Builds a reliable, ordered outbound packet for `channel_id`.
    pub fn create_ordered(
        &self,
        channel_id: u16,
        payload: Bytes,
    ) -> Result<Arc<OutPacket>, PayloadTooLarge> {
        self.ordered
            .new_out(channel_id, payload, self.now_ts(), self.config.max_payload_len())
    }

    /// Hands a previously-created packet to the socket for transmission.
    ///
    /// While [`PeerState::Probing`], the packet is queued locally instead
    /// (spec §4.4: "No data channels emit on the wire while Probing").
    /// While [`PeerState::Draining`] or [`PeerState::Dead`], new sends are
    /// dropped.
    pub fn send(&self, packet: Arc<OutPacket>) {
        match self.state() {
            PeerState::Probing => {
                self.pending_while_probing
                    .lock()
                    .expect("pending queue mutex poisoned")
                    .push_back((packet, self.remote_addr));
            }
            PeerState::Established => {
                self.socket.submit(packet, self.remote_addr);
            }
            PeerState::Draining | PeerState::Dead => {
                tracing::trace!("dropping new send, peer is draining or dead");
            }
        }
    }

    fn flush_pending(&self) {
        let pending: Vec<_> = self
            .pending_while_probing
            .lock()
            .expect("pending queue mutex poisoned")
            .drain(..)
            .collect();
        for (packet, dest) in pending {
            self.socket.submit(packet, dest);
        }
    }

    /// Entry point used by the transport facade's `dispatch`: routes a
    /// parsed inbound datagram to the right channel, emits any resulting
    /// [`PeerEvent`]s, and submits any ack this produced back to the
    /// socket.
    pub fn dispatch_inbound(&self, packet: InPacket) {
        let now = self.now_ts();
        match packet.channel_type() {
            ChannelType::Discovery => self.handle_discovery(&packet),
            ChannelType::ReliableAck | ChannelType::OrderedAck => self.handle_ack(&packet, now),
            ChannelType::Unreliable => {
                let (deliveries, _ack) = self.unreliable.receive(packet, now);
                self.emit_deliveries(ChannelKind::Unreliable, deliveries);
            }
            ChannelType::Reliable => {
                let (deliveries, ack) = self.reliable.receive(packet, now);
                self.emit_deliveries(ChannelKind::Reliable, deliveries);
                if let Some(ack) = ack {
                    self.socket.submit(ack, self.remote_addr);
                }
            }
            ChannelType::Ordered => {
                let (deliveries, ack) = self.ordered.receive(packet, now);
                self.emit_deliveries(ChannelKind::Ordered, deliveries);
                if let Some(ack) = ack {
                    self.socket.submit(ack, self.remote_addr);
                }
            }
        }
    }

    fn emit_deliveries(&self, channel: ChannelKind, deliveries: Vec<Bytes>) {
        for payload in deliveries {
            self.emit(PeerEvent::Delivered { channel, payload });
        }
    }

    fn handle_discovery(&self, packet: &InPacket) {
        let header = Header {
            channel_type: ChannelType::ReliableAck,
            channel_id: DISCOVERY_CHANNEL_ID,
            seq: 0,
            timestamp: packet.timestamp(),
        };
        let ack = Arc::new(OutPacket::new(header, Bytes::new()));
        self.socket.submit(ack, self.remote_addr);
    }

    fn handle_ack(&self, packet: &InPacket, now: Timestamp) {
        if self.state() == PeerState::Probing {
            // This is the Discovery-ACK: allocate no further state (already
            // allocated at construction), seed RTT, and transition.
            let sample = crate::channel::micros_since(packet.timestamp(), now);
            self.rtt.lock().expect("rtt mutex poisoned").update(sample);
            self.state.store(PeerState::Established as u8, Ordering::SeqCst);
            self.flush_pending();
            return;
        }

        let sample = match packet.channel_type() {
            ChannelType::ReliableAck => {
                self.reliable
                    .on_ack(packet.seq(), packet.timestamp(), now)
            }
            ChannelType::OrderedAck => {
                self.ordered.on_ack(packet.seq(), packet.timestamp(), now)
            }
            _ => None,
        };
        if let Some(sample) = sample {
            self.rtt.lock().expect("rtt mutex poisoned").update(sample);
        }
    }

    /// Requests a graceful shutdown: stops accepting new outbound sends but
    /// keeps retransmitting outstanding reliables for up to
    /// `min(2 * rtt, 500ms)`.
    pub fn begin_drain(&self) {
        if self.state() != PeerState::Established && self.state() != PeerState::Probing {
            return;
        }
        let rtt = self.rtt.lock().expect("rtt mutex poisoned").get();
        let grace = (rtt * 2).min(Duration::from_millis(500));
        *self
            .draining_deadline
            .lock()
            .expect("draining deadline mutex poisoned") = Some(Instant::now() + grace);
        self.state.store(PeerState::Draining as u8, Ordering::SeqCst);
    }

    /// User-driven periodic callback (recommended 60 Hz): runs the
    /// retransmission sweep over the reliable and ordered channels, updates
    /// the draining grace period, and declares the peer unreachable if any
    /// outstanding packet has exceeded the retransmit budget.
    pub fn tick(&self) {
        if self.state() == PeerState::Dead {
            return;
        }

        if self.state() == PeerState::Draining {
            let expired = self
                .draining_deadline
                .lock()
                .expect("draining deadline mutex poisoned")
                .is_some_and(|deadline| Instant::now() >= deadline);
            if expired {
                self.state.store(PeerState::Dead as u8, Ordering::SeqCst);
                self.emit(PeerEvent::Dead);
                return;
            }
        }

        // No data channel may put anything on the wire while still probing:
        // outbound sends only queue locally until discovery completes.
        if self.state() == PeerState::Probing {
            return;
        }

        let now = self.now_ts();
        let rtt = self.rtt.lock().expect("rtt mutex poisoned").get();
        let threshold = self.config.retransmit_threshold(rtt);

        let channels: [(&dyn Channel, ChannelKind); 2] = [
            (&self.reliable as &dyn Channel, ChannelKind::Reliable),
            (&self.ordered as &dyn Channel, ChannelKind::Ordered),
        ];
        for (channel, kind) in channels {
            for candidate in channel.retransmission_candidates(now, threshold) {
                let retransmits = candidate.packet.bump_retransmit_count();
                let age = crate::channel::micros_since(candidate.packet.header.timestamp, now);
                if retransmits > self.config.max_retransmits || age > self.config.unreachable_timeout
                {
                    tracing::warn!(?kind, "peer exceeded retransmit budget, declaring dead");
                    self.state.store(PeerState::Dead as u8, Ordering::SeqCst);
                    self.emit(PeerEvent::Dead);
                    return;
                }
                self.socket.submit(candidate.packet, self.remote_addr);
            }
        }
    }
}

impl std::fmt::Debug for Peer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Peer")
            .field("remote_addr", &self.remote_addr)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::{Peer, PeerEvent, PeerState};
    use crate::{
        config::Config,
        packet::{
            header::{ChannelType, Header},
            InPacket,
        },
        socket::Socket,
    };
    use assert_matches::assert_matches;
    use bytes::Bytes;
    use std::{
        sync::{Arc, Mutex},
        time::Duration,
    };

    fn bind_socket() -> Arc<Socket> {
        let config = Config::default();
        let dispatch: crate::socket::DispatchFn = Arc::new(|_, _| {});
        Arc::new(
            Socket::open("127.0.0.1:0".parse().expect("valid addr"), &config, dispatch)
                .expect("bind loopback socket"),
        )
    }

    fn discovery_ack(timestamp: u64) -> InPacket {
        InPacket {
            header: Header {
                channel_type: ChannelType::ReliableAck,
                channel_id: super::DISCOVERY_CHANNEL_ID,
                seq: 0,
                timestamp,
            },
            payload: Bytes::new(),
        }
    }

    #[test]
    fn new_peer_starts_probing_and_queues_sends_until_established() {
        let socket = bind_socket();
        let remote: std::net::SocketAddr = "127.0.0.1:1".parse().expect("valid addr");
        let peer = Peer::new(remote, socket, Arc::new(Config::default()));
        assert_matches!(peer.state(), PeerState::Probing);

        let packet = peer
            .create_unreliable(0, Bytes::from_static(b"queued"))
            .expect("payload fits");
        peer.send(packet);
        assert_eq!(
            1,
            peer.pending_while_probing
                .lock()
                .expect("pending queue mutex poisoned")
                .len(),
            "sends while probing should queue locally, not hit the wire"
        );

        peer.dispatch_inbound(discovery_ack(0));
        assert_matches!(peer.state(), PeerState::Established);
        assert!(
            peer.pending_while_probing
                .lock()
                .expect("pending queue mutex poisoned")
                .is_empty(),
            "transitioning to Established should flush the queued sends"
        );
    }

    #[test]
    fn discovery_ack_seeds_rtt_estimate() {
        let socket = bind_socket();
        let remote: std::net::SocketAddr = "127.0.0.1:1".parse().expect("valid addr");
        let peer = Peer::new(remote, socket, Arc::new(Config::default()));
        assert_eq!(0.0, peer.rtt_ms());

        // now_ts() is relative to peer.start, so any echoed timestamp in the
        // past yields a positive sample once dispatched "now".
        std::thread::sleep(Duration::from_millis(5));
        peer.dispatch_inbound(discovery_ack(0));
        assert!(peer.rtt_ms() > 0.0, "discovery ack should seed a real RTT sample");
    }

    #[test]
    fn begin_drain_then_expired_grace_period_transitions_to_dead() {
        let socket = bind_socket();
        let remote: std::net::SocketAddr = "127.0.0.1:1".parse().expect("valid addr");
        let peer = Peer::new(remote, socket, Arc::new(Config::default()));
        peer.dispatch_inbound(discovery_ack(0));
        assert_matches!(peer.state(), PeerState::Established);

        let events: Arc<Mutex<Vec<PeerEvent>>> = Arc::new(Mutex::new(Vec::new()));
        let events_for_cb = Arc::clone(&events);
        peer.on_receive(move |event| events_for_cb.lock().expect("events mutex poisoned").push(event));

        // RTT is still zero (no reliable round trip has happened), so the
        // grace period is `min(2 * 0, 500ms)` == zero: the very next tick
        // observes it as already expired.
        peer.begin_drain();
        assert_matches!(peer.state(), PeerState::Draining);
        peer.tick();
        assert_matches!(peer.state(), PeerState::Dead);
        assert!(
            events
                .lock()
                .expect("events mutex poisoned")
                .iter()
                .any(|event| matches!(event, PeerEvent::Dead)),
            "draining into Dead should emit PeerEvent::Dead through the callback"
        );
    }

    #[test]
    fn exceeding_retransmit_budget_declares_peer_dead() {
        let config = Config {
            retransmit_floor: Duration::from_millis(5),
            max_retransmits: 1,
            ..Config::default()
        };
        let socket = bind_socket();
        let remote: std::net::SocketAddr = "127.0.0.1:1".parse().expect("valid addr");
        let peer = Peer::new(remote, socket, Arc::new(config));
        peer.dispatch_inbound(discovery_ack(0));
        assert_matches!(peer.state(), PeerState::Established);

        let went_dead = Arc::new(Mutex::new(false));
        let went_dead_cb = Arc::clone(&went_dead);
        peer.on_receive(move |event| {
            if matches!(event, PeerEvent::Dead) {
                *went_dead_cb.lock().expect("dead flag mutex poisoned") = true;
            }
        });

        let packet = peer
            .create_reliable(0, Bytes::from_static(b"will time out"))
            .expect("payload fits");
        peer.send(packet);

        let declared_dead = (0..50)
            .map(|_| {
                std::thread::sleep(Duration::from_millis(10));
                peer.tick();
                *went_dead.lock().expect("dead flag mutex poisoned")
            })
            .any(|dead| dead);

        assert!(declared_dead, "peer should be declared dead once the retransmit budget is exceeded");
        assert_matches!(peer.state(), PeerState::Dead);
    }
}
