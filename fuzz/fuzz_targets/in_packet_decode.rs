#![no_main]

use libfuzzer_sys::fuzz_target;
use peernet::packet::InPacket;

fuzz_target!(|data: &[u8]| {
    let bytes = bytes::Bytes::copy_from_slice(data);
    let _ = InPacket::decode(bytes);
});
