//! Streaming, dictionary-less datagram compression.
//!
//! Grounded directly in the original `NetSocket.hpp`'s `ZSTD_compressCCtx`
//! / `ZSTD_decompressDCtx` calls at compression level 1 ("fast"); no crate
//! in the teacher workspace covers compression, so `zstd` is pulled in as a
//! new, explicitly-justified dependency (see `DESIGN.md`).

use crate::error::DatagramError;
use bytes::Bytes;

/// Compresses `data` (an already-framed `header || payload` datagram) at
/// `level`.
pub fn compress(data: &[u8], level: i32) -> std::io::Result<Vec<u8>> {
    zstd::bulk::compress(data, level)
}

/// Decompresses a received datagram into a scratch buffer of at most
/// `max_datagram` bytes, mirroring the receiver posting a fixed-size
/// registered buffer before the kernel ever fills it.
pub fn decompress(data: &[u8], max_datagram: usize) -> Result<Bytes, DatagramError> {
    zstd::bulk::decompress(data, max_datagram)
        .map(Bytes::from)
        .map_err(|err| {
            tracing::trace!(error = %err, "zstd decompression failed");
            DatagramError::Decompression
        })
}
