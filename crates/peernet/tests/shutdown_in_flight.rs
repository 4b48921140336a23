//! Scenario 5 from the spec's end-to-end test list: shutdown while
//! reliables are in flight.
//!
//! There is no portable, dependency-free way from a test to enumerate "no
//! worker thread remains" directly, so this asserts what that really means
//! operationally: `Transport::shutdown` joins every socket worker before
//! returning (see `Socket::shutdown`), so the call itself completing within
//! the grace window *is* the property under test.

mod common;

use bytes::Bytes;
use peernet::{Config, Transport};
use std::time::{Duration, Instant};

#[test]
fn shutdown_with_outstanding_reliables_completes_promptly() {
    common::init_tracing();
    let transport = Transport::new(Config::default());
    let handle = transport
        .open_socket("127.0.0.1", 19031)
        .expect("open loopback socket");
    transport.set_default_socket(handle);

    let peer = transport
        .get_peer("127.0.0.1", 19031)
        .expect("get_peer to self");

    for i in 0..100u32 {
        let payload = Bytes::copy_from_slice(format!("r{i}").as_bytes());
        let packet = peer
            .create_reliable(0, payload)
            .expect("payload fits in one datagram");
        peer.send(packet);
    }

    // Drop this crate's own peer handle first so `Transport::shutdown`'s
    // internal peer-table drain holds the last `Arc<Peer>` (and, through it,
    // the last `Arc<Socket>`) — otherwise this handle would keep the socket
    // alive past the call and the timing below would measure nothing.
    drop(peer);

    let start = Instant::now();
    transport.shutdown();
    let elapsed = start.elapsed();

    assert!(
        elapsed < Duration::from_millis(500),
        "shutdown should join every worker well within the 500ms grace window, took {elapsed:?}"
    );
}
