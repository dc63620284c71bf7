//! Incremental stream framer.
//!
//! TCP delivers no message boundaries: one read may hold zero, one or many
//! frames, or part of one. [`StreamFramer`] accumulates reads and yields each
//! complete raw frame (terminator stripped) in arrival order.
//!
//! Frames end at a NUL byte. A LF directly after the NUL is part of the
//! terminator, so streams framed with `NUL+LF` and with bare `NUL` produce the
//! same raw frames. EOLs in front of a frame (heart-beats, or the LF of a
//! `NUL+LF` pair that arrived in the next read) are dropped.
//!
//! # Example
//!
//! ```
//! use stomp_client::framer::StreamFramer;
//!
//! let mut framer = StreamFramer::new();
//! assert_eq!(framer.push(b"RECEIPT\nreceipt-id:1\n\n\0\nMESS").count(), 1);
//! assert_eq!(framer.push(b"AGE\n\n\0").count(), 1);
//! ```

use bytes::{Buf, Bytes, BytesMut};

use crate::frame::NUL;

/// Accumulation buffer that turns arbitrary byte chunks into raw frames.
#[derive(Debug, Default)]
pub struct StreamFramer {
    buffer: BytesMut,
}

impl StreamFramer {
    pub fn new() -> Self {
        Self {
            buffer: BytesMut::with_capacity(8 * 1024),
        }
    }

    /// Append a chunk and return a lazy iterator over the frames it completed.
    ///
    /// Frames the iterator does not consume stay buffered and come out, still
    /// in order, from the next call.
    pub fn push(&mut self, chunk: &[u8]) -> RawFrames<'_> {
        self.buffer.extend_from_slice(chunk);
        RawFrames { framer: self }
    }

    /// Take the next complete raw frame, if one is buffered.
    pub fn next_frame(&mut self) -> Option<Bytes> {
        split_frame(&mut self.buffer)
    }

    /// Bytes held back waiting for a terminator.
    pub fn remainder(&self) -> &[u8] {
        &self.buffer
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }
}

/// Iterator returned by [`StreamFramer::push`].
#[derive(Debug)]
pub struct RawFrames<'a> {
    framer: &'a mut StreamFramer,
}

impl Iterator for RawFrames<'_> {
    type Item = Bytes;

    fn next(&mut self) -> Option<Bytes> {
        self.framer.next_frame()
    }
}

/// Split the next complete raw frame off the front of `buf`.
///
/// Leaves incomplete data in place and returns `None` when no terminator is
/// buffered. Empty frames are skipped.
pub fn split_frame(buf: &mut BytesMut) -> Option<Bytes> {
    loop {
        skip_leading_eols(buf);
        let end = buf.iter().position(|&b| b == NUL)?;

        let frame = buf.split_to(end).freeze();
        buf.advance(1);
        if buf.first() == Some(&b'\n') {
            buf.advance(1);
        }

        if !frame.is_empty() {
            return Some(frame);
        }
    }
}

fn skip_leading_eols(buf: &mut BytesMut) {
    let eols = buf
        .iter()
        .take_while(|&&b| b == b'\n' || b == b'\r')
        .count();
    buf.advance(eols);
}
