#![no_main]

use libfuzzer_sys::fuzz_target;
use peernet::packet::header::Header;

fuzz_target!(|data: &[u8]| {
    let mut bytes = bytes::Bytes::copy_from_slice(data);
    let _ = Header::decode(&mut bytes);
});
