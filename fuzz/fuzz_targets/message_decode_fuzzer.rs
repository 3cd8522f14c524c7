//! Fuzz target for request and response decoding
//!
//! # Invariants
//!
//! - Arbitrary bytes decode to a message or a structured error, never a panic
//! - A decoded request re-encodes to exactly one delimited frame that decodes
//!   back to the same request
//! - Binary file contents survive the base64 round trip

#![no_main]

use libfuzzer_sys::fuzz_target;
use rtshare_proto::{FRAME_DELIMITER, Request, Response};

fuzz_target!(|data: &[u8]| {
    if let Ok(request) = Request::decode(data) {
        let frame = request.encode().expect("decoded request must encode");
        assert_eq!(frame.last(), Some(&FRAME_DELIMITER));
        assert_eq!(frame.iter().filter(|&&b| b == FRAME_DELIMITER).count(), 1);

        let again = Request::decode(&frame[..frame.len() - 1]).expect("re-decode");
        assert_eq!(again, request);
    }

    if let Ok(response) = Response::decode(data) {
        let frame = response.encode().expect("decoded response must encode");
        let again = Response::decode(&frame[..frame.len() - 1]).expect("re-decode");
        assert_eq!(again.bytes, response.bytes);
    }
});
