#![no_main]

use libfuzzer_sys::fuzz_target;
use tds_protocol::PacketHeader;

fuzz_target!(|data: &[u8]| {
    let mut src = data;
    let _ = PacketHeader::decode(&mut src);
});
