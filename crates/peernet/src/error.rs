//! Error types, split along the propagation boundary: [`TransportError`] is
//! returned to callers from fallible constructors; [`DatagramError`] is
//! logged and counted by the receive path and never surfaced.

use std::{io, net::AddrParseError};

/// Fatal error surfaced from a constructor (opening a socket, resolving an
/// address, registering buffer pools).
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// `host:port` could not be resolved to a [`SocketAddr`](std::net::SocketAddr).
    #[error("failed to resolve address")]
    AddressResolution(#[source] io::Error),
    /// The literal address string itself was malformed.
    #[error("malformed address")]
    MalformedAddress(#[from] AddrParseError),
    /// Binding the UDP socket to the local address failed.
    #[error("failed to bind socket")]
    SocketBind(#[source] io::Error),
    /// The fixed-size send/receive buffer pools could not be allocated.
    #[error("failed to register buffer pool")]
    BufferRegistration(#[source] io::Error),
    /// `max_sockets` would be exceeded by opening another socket.
    #[error("socket limit reached ({limit})")]
    SocketLimitReached {
        /// The configured `max_sockets` limit.
        limit: usize,
    },
}

/// A received datagram could not be turned into an application delivery.
///
/// Every variant here is handled locally: the datagram is dropped, a counter
/// is incremented, and a [`tracing`] event is emitted at `trace` level. None
/// of these ever propagate to the application.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum DatagramError {
    /// Decompressed datagram is shorter than the fixed header.
    #[error("datagram shorter than header")]
    TooShort,
    /// The channel-type tag byte did not match any known variant.
    #[error("unknown packet type tag {0}")]
    UnknownPacketType(u8),
    /// The channel id named in the header has no corresponding channel.
    #[error("invalid channel id")]
    InvalidChannelId,
    /// `zstd` failed to decompress the datagram.
    #[error("decompression failed")]
    Decompression,
    /// The packet's sequence id is a duplicate or predecessor of one already
    /// observed by this channel.
    #[error("duplicate or stale packet")]
    DuplicateOrStale,
}

/// `write_payload` was given a payload that would not fit in one datagram
/// after accounting for the fixed header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("payload of {len} bytes exceeds the {max} byte limit for a single datagram")]
pub struct PayloadTooLarge {
    /// Length of the rejected payload.
    pub len: usize,
    /// Maximum payload length accepted (`max_datagram - HEADER_LEN`).
    pub max: usize,
}
