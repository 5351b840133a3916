#![no_main]

use bytes::Bytes;
use libfuzzer_sys::fuzz_target;
use tds_types::{TypeInfo, convert_value, read_value};

fuzz_target!(|data: &[u8]| {
    // TYPE_INFO followed by one value in its wire layout.
    let mut src = Bytes::copy_from_slice(data);
    let Ok(type_info) = TypeInfo::decode(&mut src) else {
        return;
    };
    if let Ok(payload) = read_value(&mut src, &type_info) {
        let _ = convert_value(payload, &type_info);
    }
});
