#![no_main]

use bytes::Bytes;
use libfuzzer_sys::fuzz_target;
use tds_protocol::TokenDecoder;

fuzz_target!(|data: &[u8]| {
    // Server responses are untrusted: decoding must fail cleanly.
    let mut src = Bytes::copy_from_slice(data);
    let mut decoder = TokenDecoder::new();
    while let Ok(Some(_)) = decoder.decode(&mut src) {}
});
