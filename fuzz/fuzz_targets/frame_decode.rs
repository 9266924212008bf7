//! Fuzz target for ServerEvent::decode
//!
//! Feeds arbitrary text to the live-channel decoder to find:
//! - Parser panics on malformed JSON
//! - Size checks that can be bypassed
//! - Payloads that decode but fail to re-encode
//!
//! The fuzzer should NEVER panic. All invalid inputs should return an error.

#![no_main]

use libfuzzer_sys::fuzz_target;
use medichat_proto::{ClientFrame, MAX_FRAME_SIZE, ServerEvent};

fuzz_target!(|data: &[u8]| {
    let Ok(text) = std::str::from_utf8(data) else {
        return;
    };

    if let Ok(event) = ServerEvent::decode(text) {
        assert!(text.len() <= MAX_FRAME_SIZE, "oversized frame decoded");
        // Anything that decodes must encode again
        event.encode().expect("decoded event failed to encode");
    }

    let _ = ClientFrame::decode(text);
});
