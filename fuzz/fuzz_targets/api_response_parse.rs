#![no_main]

use libfuzzer_sys::fuzz_target;
use trellis_protocol::{
    parse_network_records, parse_response_frame, rejection_details, require_session_token,
    ApiRequestKind,
};

fuzz_target!(|data: &[u8]| {
    let Ok(raw) = std::str::from_utf8(data) else {
        return;
    };
    let Ok(frame) = parse_response_frame(raw) else {
        return;
    };
    // An accepted frame always carries a kind that maps back to itself, and
    // the payload accessors must never panic on arbitrary payload shapes.
    assert_eq!(frame.kind.as_str().parse::<ApiRequestKind>().ok(), Some(frame.kind));
    let _ = require_session_token(&frame);
    let _ = parse_network_records(&frame);
    let _ = rejection_details(&frame);
});
