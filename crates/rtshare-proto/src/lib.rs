//! rt-share wire protocol.
//!
//! Clients and the relay exchange newline-delimited JSON objects over a
//! long-lived duplex byte stream. Inbound objects are [`Request`]s, outbound
//! objects (replies, forwards, broadcasts, heartbeats) are [`Response`]s.
//!
//! # Components
//!
//! - [`FrameDecoder`]: incremental scanner that splits buffered bytes into
//!   frames at each `\n`, carrying partial frames across reads
//! - [`FrameReader`]: async wrapper that pulls chunks from a reader into a
//!   decoder
//! - [`Request`] / [`Response`]: the JSON message shapes
//! - [`MessageKind`]: closed set of request types the relay understands

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod codec;
pub mod errors;
pub mod message;

pub use codec::{
    DEFAULT_CHUNK_SIZE, DEFAULT_MAX_FRAME_LEN, FRAME_DELIMITER, FrameDecoder, FrameReader, Frames,
};
pub use errors::{ProtocolError, Result};
pub use message::{HEARTBEAT_TYPE, MessageKind, Request, Response, Status};

/// ALPN protocol identifier for QUIC connections.
pub const ALPN_PROTOCOL: &[u8] = b"rt-share";
