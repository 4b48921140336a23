//! See [`Config`].

use std::time::Duration;

/// All tunable knobs of a [`Transport`](crate::transport::Transport),
/// constructed via [`Config::default`] and the `with_*` builder methods, in
/// the style of `aeronet_transport::TransportConfig`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Config {
    /// Number of registered send buffers per socket.
    pub send_pool_size: usize,
    /// Number of registered receive buffers per socket.
    pub receive_pool_size: usize,
    /// Maximum number of sockets a single [`Transport`](crate::transport::Transport)
    /// may open.
    pub max_sockets: usize,
    /// Upper bound on a single (compressed) datagram, matching a standard
    /// MTU UDP payload.
    pub max_datagram: usize,
    /// Recommended interval between calls to `Peer::tick`.
    pub tick_interval: Duration,
    /// Multiplier applied to RTT when computing the retransmission
    /// threshold.
    pub retransmit_factor: f64,
    /// Minimum retransmission threshold, applied regardless of RTT.
    pub retransmit_floor: Duration,
    /// `zstd` compression level used for every outbound datagram.
    pub compression_level: i32,
    /// Number of retransmissions after which a peer is declared
    /// unreachable.
    pub max_retransmits: u32,
    /// Wall-clock budget after which a peer is declared unreachable,
    /// regardless of retransmission count.
    pub unreachable_timeout: Duration,
    /// Maximum receive completions drained per worker wake.
    pub receive_batch_size: usize,
}

impl Config {
    /// Number of send/receive worker threads, defaulting to the available
    /// hardware concurrency (falling back to 1 if it cannot be queried).
    #[must_use]
    pub fn worker_count() -> usize {
        std::thread::available_parallelism().map_or(1, std::num::NonZero::get)
    }

    /// Sets [`Config::send_pool_size`].
    #[must_use]
    pub const fn with_send_pool_size(mut self, send_pool_size: usize) -> Self {
        self.send_pool_size = send_pool_size;
        self
    }

    /// Sets [`Config::receive_pool_size`].
    #[must_use]
    pub const fn with_receive_pool_size(mut self, receive_pool_size: usize) -> Self {
        self.receive_pool_size = receive_pool_size;
        self
    }

    /// Sets [`Config::max_sockets`].
    #[must_use]
    pub const fn with_max_sockets(mut self, max_sockets: usize) -> Self {
        self.max_sockets = max_sockets;
        self
    }

    /// Sets [`Config::tick_interval`].
    #[must_use]
    pub const fn with_tick_interval(mut self, tick_interval: Duration) -> Self {
        self.tick_interval = tick_interval;
        self
    }

    /// Sets [`Config::compression_level`].
    #[must_use]
    pub const fn with_compression_level(mut self, compression_level: i32) -> Self {
        self.compression_level = compression_level;
        self
    }

    /// Computes the retransmission threshold for a given RTT estimate:
    /// `max(rtt * retransmit_factor, retransmit_floor)`.
    #[must_use]
    pub fn retransmit_threshold(&self, rtt: Duration) -> Duration {
        rtt.mul_f64(self.retransmit_factor).max(self.retransmit_floor)
    }

    /// Maximum payload length accepted by `write_payload`, after reserving
    /// room for the fixed header.
    #[must_use]
    pub const fn max_payload_len(&self) -> usize {
        self.max_datagram - crate::packet::header::HEADER_LEN
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            send_pool_size: 10240,
            receive_pool_size: 10240,
            max_sockets: 16,
            max_datagram: 1472,
            tick_interval: Duration::from_millis(16),
            retransmit_factor: 1.5,
            retransmit_floor: Duration::from_millis(50),
            compression_level: 1,
            max_retransmits: 10,
            unreachable_timeout: Duration::from_secs(30),
            receive_batch_size: 128,
        }
    }
}
