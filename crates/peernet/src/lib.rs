//! A peer-to-peer datagram transport layering unreliable, reliable, and
//! reliable-ordered delivery over UDP, with per-message compression and a
//! worker-pool-driven send/receive pipeline.
//!
//! The entry point is [`transport::Transport`]: open a [`socket::Socket`]
//! with [`transport::Transport::open_socket`], then obtain a
//! [`peer::Peer`] with [`transport::Transport::get_peer`] to exchange
//! packets with a remote address through one of its three
//! [`channel::Channel`]s.

#![cfg_attr(docsrs, feature(doc_auto_cfg))]

pub mod address;
pub mod channel;
pub mod config;
pub mod error;
pub mod packet;
pub mod peer;
pub mod rtt;
pub mod socket;
pub mod transport;

pub use config::Config;
pub use error::{DatagramError, PayloadTooLarge, TransportError};
pub use peer::{ChannelKind, Peer, PeerEvent, PeerState};
pub use transport::{SocketHandle, Transport};
