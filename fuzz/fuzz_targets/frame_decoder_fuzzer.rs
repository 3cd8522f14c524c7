//! Fuzz target for newline frame reassembly
//!
//! # Strategy
//!
//! - Stream bytes split into arbitrary chunk sizes, including empty chunks
//! - Frame limit from tiny (1 byte) to comfortably large
//!
//! # Invariants
//!
//! - Emitted frames never contain the delimiter
//! - Emitted frames never exceed the limit
//! - Frames plus delimiters reproduce the consumed stream prefix exactly
//! - Decoding never panics; an oversize frame is a structured error

#![no_main]

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use rtshare_proto::{FRAME_DELIMITER, FrameDecoder, ProtocolError};

#[derive(Debug, Arbitrary)]
struct Input {
    max_frame_len: u16,
    chunk_sizes: Vec<u8>,
    stream: Vec<u8>,
}

fuzz_target!(|input: Input| {
    let max = usize::from(input.max_frame_len).max(1);
    let mut decoder = FrameDecoder::new(max);
    let mut rebuilt = Vec::with_capacity(input.stream.len());

    let mut rest = input.stream.as_slice();
    let mut sizes = input.chunk_sizes.iter().copied().cycle();

    'feed: while !rest.is_empty() {
        let take = usize::from(sizes.next().unwrap_or(u8::MAX)).clamp(1, rest.len());
        let (chunk, tail) = rest.split_at(take);
        rest = tail;
        decoder.push(chunk);

        loop {
            match decoder.next_frame() {
                Ok(Some(frame)) => {
                    assert!(!frame.contains(&FRAME_DELIMITER));
                    assert!(frame.len() <= max);
                    rebuilt.extend_from_slice(&frame);
                    rebuilt.push(FRAME_DELIMITER);
                },
                Ok(None) => break,
                Err(ProtocolError::FrameTooLong { len, max: limit }) => {
                    assert!(len > limit);
                    break 'feed;
                },
                Err(e) => panic!("unexpected decode error: {e}"),
            }
        }

        if input.chunk_sizes.is_empty() {
            break;
        }
    }

    assert!(input.stream.starts_with(&rebuilt));
});
