//! Newline framing.
//!
//! Each message on the wire is one JSON object followed by a single `\n`.
//! TCP and QUIC streams deliver arbitrary chunks, so a frame may arrive split
//! across several reads or several frames may arrive in one read.
//! [`FrameDecoder`] carries the undelimited tail between chunks and only
//! emits a frame once its delimiter has been seen.
//!
//! # Invariants
//!
//! - Frames are emitted in arrival order and never contain the delimiter.
//! - The decoded sequence does not depend on how the stream was chunked.
//! - Bytes after the last delimiter stay buffered; at end of stream they are
//!   discarded, never decoded.
//! - Buffered bytes never exceed `max_frame_len` plus one chunk: a longer
//!   undelimited run fails with [`ProtocolError::FrameTooLong`].

use std::time::Duration;

use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::errors::{ProtocolError, Result};

/// Byte that terminates every frame.
pub const FRAME_DELIMITER: u8 = b'\n';

/// Default frame limit (64 MiB). File payloads travel inline as base64, so
/// this has to be generous.
pub const DEFAULT_MAX_FRAME_LEN: usize = 64 * 1024 * 1024;

/// Default size of a single stream read.
pub const DEFAULT_CHUNK_SIZE: usize = 4096;

/// Incremental frame scanner.
///
/// Push chunks with [`FrameDecoder::push`] and pull complete frames with
/// [`FrameDecoder::next_frame`]. Scanning resumes where the previous call
/// stopped, so a large frame arriving in many small chunks is scanned once.
#[derive(Debug)]
pub struct FrameDecoder {
    buf: BytesMut,
    /// Prefix of `buf` already known to contain no delimiter
    scanned: usize,
    max_frame_len: usize,
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_FRAME_LEN)
    }
}

impl FrameDecoder {
    /// Create a decoder that rejects frames longer than `max_frame_len`.
    pub fn new(max_frame_len: usize) -> Self {
        Self { buf: BytesMut::new(), scanned: 0, max_frame_len }
    }

    /// Append a chunk read from the stream.
    pub fn push(&mut self, chunk: &[u8]) {
        self.buf.extend_from_slice(chunk);
    }

    /// Next complete frame, without its delimiter.
    ///
    /// Returns `Ok(None)` when no delimiter is buffered yet.
    pub fn next_frame(&mut self) -> Result<Option<Bytes>> {
        let unscanned = &self.buf[self.scanned..];
        let Some(offset) = unscanned.iter().position(|&b| b == FRAME_DELIMITER) else {
            self.scanned = self.buf.len();
            if self.buf.len() > self.max_frame_len {
                return Err(ProtocolError::FrameTooLong {
                    len: self.buf.len(),
                    max: self.max_frame_len,
                });
            }
            return Ok(None);
        };

        let end = self.scanned + offset;
        self.scanned = 0;

        let mut frame = self.buf.split_to(end + 1);
        frame.truncate(end);

        if frame.len() > self.max_frame_len {
            return Err(ProtocolError::FrameTooLong { len: frame.len(), max: self.max_frame_len });
        }

        Ok(Some(frame.freeze()))
    }

    /// Iterator draining every complete frame currently buffered.
    pub fn frames(&mut self) -> Frames<'_> {
        Frames { decoder: self }
    }

    /// Number of buffered bytes not yet emitted as a frame.
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// True if nothing is buffered.
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }
}

/// Draining iterator returned by [`FrameDecoder::frames`].
#[derive(Debug)]
pub struct Frames<'a> {
    decoder: &'a mut FrameDecoder,
}

impl Iterator for Frames<'_> {
    type Item = Result<Bytes>;

    fn next(&mut self) -> Option<Self::Item> {
        self.decoder.next_frame().transpose()
    }
}

/// Pulls frames out of an async byte stream.
///
/// [`FrameReader::next_frame`] is cancel-safe: bytes are only moved into the
/// decoder once a read has completed, so dropping the future (for example in
/// a `select!` arm) loses nothing.
#[derive(Debug)]
pub struct FrameReader<R> {
    reader: R,
    decoder: FrameDecoder,
    chunk: Box<[u8]>,
    idle_timeout: Option<Duration>,
}

impl<R> FrameReader<R>
where
    R: AsyncRead + Unpin,
{
    /// Reader with default limits and no idle timeout.
    pub fn new(reader: R) -> Self {
        Self::with_limits(reader, DEFAULT_MAX_FRAME_LEN, DEFAULT_CHUNK_SIZE)
    }

    /// Reader with explicit frame limit and read size.
    pub fn with_limits(reader: R, max_frame_len: usize, chunk_size: usize) -> Self {
        Self {
            reader,
            decoder: FrameDecoder::new(max_frame_len),
            chunk: vec![0u8; chunk_size.max(1)].into_boxed_slice(),
            idle_timeout: None,
        }
    }

    /// Fail any single read that stays silent longer than `timeout`.
    #[must_use]
    pub fn idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = Some(timeout);
        self
    }

    /// Next frame from the stream.
    ///
    /// Returns `Ok(None)` at end of stream. Any undelimited remainder is
    /// dropped at that point.
    pub async fn next_frame(&mut self) -> Result<Option<Bytes>> {
        loop {
            if let Some(frame) = self.decoder.next_frame()? {
                return Ok(Some(frame));
            }

            let read = self.reader.read(&mut self.chunk);
            let n = match self.idle_timeout {
                Some(limit) => tokio::time::timeout(limit, read)
                    .await
                    .map_err(|_| ProtocolError::IdleTimeout(limit))??,
                None => read.await?,
            };

            if n == 0 {
                return Ok(None);
            }

            self.decoder.push(&self.chunk[..n]);
        }
    }

    /// Bytes buffered after the last emitted frame.
    pub fn buffered(&self) -> usize {
        self.decoder.buffered()
    }
}
