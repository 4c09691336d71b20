//! Fuzz target for envelope decoding.
//!
//! Arbitrary byte sequences must never panic the decoder: invalid JSON,
//! invalid base64, and unknown tags all come back as values or errors.

#![no_main]

use libfuzzer_sys::fuzz_target;
use sealwire_proto::Frame;

fuzz_target!(|data: &[u8]| {
    if let Ok(text) = std::str::from_utf8(data) {
        let _ = Frame::decode(text);
    }
});
