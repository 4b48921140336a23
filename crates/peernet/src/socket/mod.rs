//! See [`Socket`].

pub mod compress;
pub mod pool;

use crate::{config::Config, error::TransportError, packet::OutPacket};
use pool::BufferPool;
use std::{
    net::{SocketAddr, UdpSocket},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread::JoinHandle,
    time::Duration,
};

/// Callback invoked by a receive worker once a datagram has been
/// decompressed: `(decompressed_bytes, source_addr)`. Dispatching to the
/// right peer/channel is the transport facade's job, so the socket only
/// needs an opaque closure here.
pub type DispatchFn = Arc<dyn Fn(bytes::Bytes, SocketAddr) + Send + Sync>;

struct SendRequest {
    packet: Arc<OutPacket>,
    dest: SocketAddr,
}

/// Owns one UDP endpoint, its registered send/receive buffer pools, and the
/// worker-thread pool driving them.
///
/// Implements the completion-driven pipeline from spec §4.3 using the
/// explicitly-permitted fallback: blocking `UdpSocket`s plus a worker pool,
/// rather than OS-specific registered I/O (io_uring/IOCP/kqueue). The send
/// request queue and the registered-buffer "completion" are both modeled as
/// `crossbeam_channel`s, matching a real teacher dependency
/// (`aeronet_channel`).
pub struct Socket {
    local_addr: SocketAddr,
    send_tx: crossbeam_channel::Sender<SendRequest>,
    shutdown: Arc<AtomicBool>,
    workers: Vec<JoinHandle<()>>,
}

impl Socket {
    /// Binds a UDP socket at `local_addr`, registers the send/receive
    /// buffer pools, and launches the worker pool. `dispatch` is called by
    /// receive workers for every successfully decompressed+parsed datagram.
    pub fn open(
        local_addr: SocketAddr,
        config: &Config,
        dispatch: DispatchFn,
    ) -> Result<Self, TransportError> {
        let socket = UdpSocket::bind(local_addr).map_err(TransportError::SocketBind)?;
        let local_addr = socket.local_addr().map_err(TransportError::SocketBind)?;
        // Bound the wait so shutdown is observed promptly instead of blocking forever,
        // the stand-in for a distinguished stop-sentinel completion key.
        socket
            .set_read_timeout(Some(Duration::from_millis(100)))
            .map_err(TransportError::SocketBind)?;

        let worker_count = Config::worker_count();
        let send_slots_per_worker = (config.send_pool_size / worker_count).max(1);
        let recv_slots_per_worker = (config.receive_pool_size / worker_count).max(1);

        let (send_tx, send_rx) = crossbeam_channel::unbounded::<SendRequest>();
        let shutdown = Arc::new(AtomicBool::new(false));
        let mut workers = Vec::with_capacity(worker_count * 2);

        for id in 0..worker_count {
            let socket = socket
                .try_clone()
                .map_err(TransportError::BufferRegistration)?;
            let send_rx = send_rx.clone();
            let send_tx = send_tx.clone();
            let shutdown = Arc::clone(&shutdown);
            let compression_level = config.compression_level;
            let max_datagram = config.max_datagram;
            let pool = BufferPool::new(send_slots_per_worker, max_datagram);
            workers.push(
                std::thread::Builder::new()
                    .name(format!("peernet-send-{id}"))
                    .spawn(move || {
                        send_worker_loop(socket, pool, send_rx, send_tx, compression_level, max_datagram, &shutdown);
                    })
                    .map_err(TransportError::BufferRegistration)?,
            );
        }

        for id in 0..worker_count {
            let socket = socket
                .try_clone()
                .map_err(TransportError::BufferRegistration)?;
            let shutdown = Arc::clone(&shutdown);
            let dispatch = Arc::clone(&dispatch);
            let max_datagram = config.max_datagram;
            let batch_size = config.receive_batch_size;
            let pool = BufferPool::new(recv_slots_per_worker, max_datagram);
            workers.push(
                std::thread::Builder::new()
                    .name(format!("peernet-recv-{id}"))
                    .spawn(move || {
                        receive_worker_loop(socket, pool, max_datagram, batch_size, &dispatch, &shutdown);
                    })
                    .map_err(TransportError::BufferRegistration)?,
            );
        }

        Ok(Self {
            local_addr,
            send_tx,
            shutdown,
            workers,
        })
    }

    /// Local address this socket is bound to.
    #[must_use]
    pub const fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Enqueues a packet to be compressed and sent to `dest`. Never blocks:
    /// producers (the application thread, or a peer's retransmission sweep)
    /// only ever enqueue.
    pub fn submit(&self, packet: Arc<OutPacket>, dest: SocketAddr) {
        packet.set_sending(true);
        if self.send_tx.send(SendRequest { packet, dest }).is_err() {
            tracing::warn!("send queue closed, dropping submission");
        }
    }

    /// Signals every worker to stop and joins them. Idempotent.
    pub fn shutdown(&mut self) {
        self.shutdown.store(true, Ordering::SeqCst);
        for worker in self.workers.drain(..) {
            let _ = worker.join();
        }
    }
}

impl Drop for Socket {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[allow(clippy::too_many_arguments)]
fn send_worker_loop(
    socket: UdpSocket,
    mut pool: BufferPool,
    inbox: crossbeam_channel::Receiver<SendRequest>,
    requeue: crossbeam_channel::Sender<SendRequest>,
    compression_level: i32,
    max_datagram: usize,
    shutdown: &AtomicBool,
) {
    while !shutdown.load(Ordering::SeqCst) {
        let request = match inbox.recv_timeout(Duration::from_millis(100)) {
            Ok(request) => request,
            Err(crossbeam_channel::RecvTimeoutError::Timeout) => continue,
            Err(crossbeam_channel::RecvTimeoutError::Disconnected) => break,
        };

        let Some((handle, mut buf)) = pool.acquire() else {
            tracing::trace!("send pool exhausted, re-posting request");
            if requeue.send(request).is_err() {
                break;
            }
            continue;
        };

        request.packet.encode_into(&mut buf);
        match compress::compress(&buf, compression_level) {
            Ok(compressed) if compressed.len() <= max_datagram => {
                if let Err(err) = socket.send_to(&compressed, request.dest) {
                    tracing::debug!(error = %err, dest = %request.dest, "send_to failed");
                }
            }
            Ok(compressed) => {
                tracing::warn!(
                    len = compressed.len(),
                    max_datagram,
                    "compressed datagram exceeds max_datagram, dropping"
                );
            }
            Err(err) => {
                tracing::debug!(error = %err, "compression failed, dropping outbound packet");
            }
        }

        pool.release(handle, buf);
        request.packet.set_sending(false);
        if !matches!(
            request.packet.header.channel_type,
            crate::packet::header::ChannelType::Reliable | crate::packet::header::ChannelType::Ordered
        ) {
            request.packet.mark_needs_delete();
        }
    }
}

fn receive_worker_loop(
    socket: UdpSocket,
    mut pool: BufferPool,
    max_datagram: usize,
    batch_size: usize,
    dispatch: &DispatchFn,
    shutdown: &AtomicBool,
) {
    while !shutdown.load(Ordering::SeqCst) {
        for _ in 0..batch_size {
            let Some((handle, mut buf)) = pool.acquire() else {
                tracing::trace!("receive pool exhausted this batch");
                break;
            };
            buf.resize(max_datagram, 0);

            let result = socket.recv_from(&mut buf);
            let should_stop_batch = match result {
                Ok((len, source)) => {
                    buf.truncate(len);
                    match compress::decompress(&buf, max_datagram) {
                        Ok(decompressed) => dispatch(decompressed, source),
                        Err(err) => {
                            tracing::trace!(error = %err, "dropping undecompressable datagram");
                        }
                    }
                    false
                }
                Err(err)
                    if matches!(
                        err.kind(),
                        std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut
                    ) =>
                {
                    true
                }
                Err(err) => {
                    tracing::debug!(error = %err, "recv_from failed");
                    true
                }
            };
            pool.release(handle, buf);
            if should_stop_batch {
                break;
            }
        }
    }
}
