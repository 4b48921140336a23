//! Shared test-only UDP relay, standing in for the "inject a middleware"
//! scenarios from the spec's end-to-end test list. A real `Socket` has no
//! pluggable middleware hook (spec §4.3 gives the socket no such concept),
//! so these tests put a relay *between* two real peernet transports on
//! loopback and let it drop, delay, or reorder datagrams in flight, which
//! exercises the real wire format, compression, and peer/channel dispatch
//! code exactly as a production run would.

#![allow(dead_code)]

use peernet::packet::header::{ChannelType, Header};
use peernet::socket::compress;
use std::{
    collections::HashSet,
    net::{SocketAddr, UdpSocket},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread::{self, JoinHandle},
    time::Duration,
};

/// Installs a `tracing` subscriber driven by `RUST_LOG`, so a failing
/// integration test can be re-run with e.g. `RUST_LOG=peernet=trace` to see
/// every drop/retransmit/ack decision. Safe to call from every test: only
/// the first call installs anything.
pub fn init_tracing() {
    use std::sync::Once;
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

/// Called once per forwarded datagram with `(channel_type, seq)`; returning
/// `true` drops that datagram the first time it is seen, then lets every
/// later retransmission with the same id through.
pub type DropOnce = Arc<dyn Fn(ChannelType, u64) -> bool + Send + Sync>;

/// A two-endpoint UDP relay: forwards datagrams between exactly `addr_a` and
/// `addr_b`, optionally delaying, reordering in fixed-size batches, or
/// dropping the first transmission of a datagram matched by `drop_once`.
pub struct Relay {
    pub addr: SocketAddr,
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl Relay {
    pub fn spawn(
        addr_a: SocketAddr,
        addr_b: SocketAddr,
        delay: Duration,
        reorder_batch: usize,
        drop_once: DropOnce,
    ) -> Self {
        let socket = UdpSocket::bind("127.0.0.1:0").expect("bind relay socket");
        let addr = socket.local_addr().expect("relay local addr");
        socket
            .set_read_timeout(Some(Duration::from_millis(20)))
            .expect("set relay read timeout");

        let stop = Arc::new(AtomicBool::new(false));
        let stop_worker = Arc::clone(&stop);

        let handle = thread::spawn(move || {
            let mut seen_once: HashSet<(SocketAddr, u8, u64)> = HashSet::new();
            let mut batch: Vec<(Vec<u8>, SocketAddr)> = Vec::new();
            let mut buf = vec![0u8; 4096];

            while !stop_worker.load(Ordering::SeqCst) {
                let (len, source) = match socket.recv_from(&mut buf) {
                    Ok(v) => v,
                    Err(err)
                        if matches!(
                            err.kind(),
                            std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut
                        ) =>
                    {
                        continue;
                    }
                    Err(_) => continue,
                };
                let dest = if source == addr_a {
                    addr_b
                } else if source == addr_b {
                    addr_a
                } else {
                    continue;
                };
                let data = buf[..len].to_vec();

                if let Ok(decompressed) = compress::decompress(&data, 4096) {
                    let mut cursor = decompressed;
                    if let Ok(header) = Header::decode(&mut cursor) {
                        let key = (source, header.channel_type.tag(), header.seq);
                        let first_time = seen_once.insert(key);
                        if first_time && drop_once(header.channel_type, header.seq) {
                            continue;
                        }
                    }
                }

                if reorder_batch > 1 {
                    batch.push((data, dest));
                    if batch.len() >= reorder_batch {
                        batch.reverse();
                        for (data, dest) in batch.drain(..) {
                            thread::sleep(delay);
                            let _ = socket.send_to(&data, dest);
                        }
                    }
                } else {
                    thread::sleep(delay);
                    let _ = socket.send_to(&data, dest);
                }
            }
        });

        Self {
            addr,
            stop,
            handle: Some(handle),
        }
    }
}

impl Drop for Relay {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

/// Polls `condition` every 5ms until it returns `true` or `timeout` elapses,
/// returning whether it succeeded.
pub fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = std::time::Instant::now() + timeout;
    loop {
        if condition() {
            return true;
        }
        if std::time::Instant::now() >= deadline {
            return false;
        }
        thread::sleep(Duration::from_millis(5));
    }
}
