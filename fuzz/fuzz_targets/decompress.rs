#![no_main]

use libfuzzer_sys::fuzz_target;
use peernet::socket::compress::decompress;

fuzz_target!(|data: &[u8]| {
    let _ = decompress(data, 1472);
});
