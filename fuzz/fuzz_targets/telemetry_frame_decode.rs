#![no_main]

use libfuzzer_sys::fuzz_target;
use trellis_protocol::{decode_telemetry_frame, encode_telemetry_frame};

fuzz_target!(|data: &[u8]| {
    let Ok(frame) = decode_telemetry_frame(data) else {
        return;
    };
    // Every record the decoder accepted must survive a re-encode unchanged,
    // and nothing in the re-encoded frame may look unknown.
    let encoded = encode_telemetry_frame(&frame.records).expect("decoded records re-encode");
    let again = decode_telemetry_frame(&encoded).expect("re-encoded frame decodes");
    assert_eq!(again.records, frame.records);
    assert_eq!(again.skipped, 0);
});
