//! # Frame Splitter
//!
//! Split delimiter-terminated text frames out of a streaming TCP buffer.
//!
//! ## Design Principles
//!
//! 1. **Streaming Friendly**: The splitter consumes from a mutable buffer and
//!    returns `None` when more data is needed.
//! 2. **Two Terminators**: Either `" ||| "` or a newline ends a frame; legacy
//!    clients mix both.
//! 3. **Tolerant Tail**: An unterminated remainder is handed out by
//!    [`FrameSplitter::finish`] at EOF or after an idle pause.
//! 4. **Bounded Memory**: A frame that outgrows the limit is discarded with a
//!    protocol error instead of buffering forever.

use bytes::{Buf, BytesMut};
use msgsrv_common::{DELIMITER, ProtocolError};

/// Longest frame accepted without a terminator.
pub const MAX_FRAME_LEN: usize = 64 * 1024;

/// Splits frames from a read buffer.
#[derive(Debug)]
pub struct FrameSplitter {
    max_len: usize,
}

impl Default for FrameSplitter {
    fn default() -> Self {
        Self::new(MAX_FRAME_LEN)
    }
}

impl FrameSplitter {
    pub fn new(max_len: usize) -> Self {
        FrameSplitter { max_len }
    }

    /// Attempts to take one complete frame from the buffer.
    ///
    /// Blank frames are skipped. Returns `Ok(None)` if more data is required.
    pub fn next_frame(&mut self, buf: &mut BytesMut) -> Result<Option<String>, ProtocolError> {
        while let Some((end, terminator_len)) = find_terminator(buf) {
            let raw = buf.split_to(end);
            buf.advance(terminator_len);
            let frame = decode(&raw);
            if !frame.is_empty() {
                return Ok(Some(frame));
            }
        }

        if buf.len() > self.max_len {
            buf.clear();
            return Err(ProtocolError::FrameTooLong {
                limit: self.max_len,
            });
        }
        Ok(None)
    }

    /// Takes whatever remains as a final frame.
    pub fn finish(&mut self, buf: &mut BytesMut) -> Option<String> {
        let raw = buf.split();
        let frame = decode(&raw);
        (!frame.is_empty()).then_some(frame)
    }
}

/// Returns `(frame_end, terminator_len)` for the earliest terminator.
fn find_terminator(buf: &[u8]) -> Option<(usize, usize)> {
    let delimiter = DELIMITER.as_bytes();
    for idx in 0..buf.len() {
        if buf[idx] == b'\n' {
            return Some((idx, 1));
        }
        if buf[idx..].starts_with(delimiter) {
            return Some((idx, delimiter.len()));
        }
    }
    None
}

fn decode(raw: &[u8]) -> String {
    String::from_utf8_lossy(raw).trim().to_string()
}
