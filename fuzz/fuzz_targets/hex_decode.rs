#![no_main]

use libfuzzer_sys::fuzz_target;
use trellis_protocol::{decode_hex, encode_hex};

fuzz_target!(|data: &[u8]| {
    let Ok(text) = std::str::from_utf8(data) else {
        return;
    };
    let Ok(bytes) = decode_hex(text) else {
        return;
    };
    // Anything accepted is pure hex digits, so re-encoding folds case only.
    assert_eq!(encode_hex(&bytes), text.to_ascii_lowercase());
});
