//! Streaming frame decoder over an arbitrary byte source.
//!
//! [`FrameStream`] adapts a blocking `io::Read` into a lazy sequence
//! of frames. It is the replay path for the append-only file, where
//! the source is a plain `File` (optionally wrapped in `Read::take`
//! to replay only a prefix of the log).
//!
//! Error handling follows two disjoint classes: IO errors terminate
//! the stream; protocol errors are reported for a single frame, the
//! decoder skips to the next line and continues.

use std::io::Read;

use bytes::{Buf, BytesMut};

use crate::error::StreamError;
use crate::frame::Frame;
use crate::parse::parse_frame;

/// Read chunk size. AOF records are small command arrays; 8 KB keeps
/// syscall count low without holding large buffers per stream.
const READ_CHUNK: usize = 8 * 1024;

/// A lazy stream of frames decoded from a byte source.
pub struct FrameStream<R> {
    reader: R,
    buf: BytesMut,
    eof: bool,
}

impl<R: Read> FrameStream<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            buf: BytesMut::with_capacity(READ_CHUNK),
            eof: false,
        }
    }

    /// Decodes the next frame from the source.
    ///
    /// Returns `Ok(None)` at end of input. A trailing partial frame
    /// (the producer crashed mid-write) is dropped silently — that is
    /// the expected crash-recovery behavior. A malformed frame yields
    /// `Err(StreamError::Protocol(..))` and leaves the stream usable;
    /// an IO error yields `Err(StreamError::Io(..))` and ends it.
    pub fn next_frame(&mut self) -> Result<Option<Frame>, StreamError> {
        loop {
            match parse_frame(&self.buf) {
                Ok(Some((frame, consumed))) => {
                    self.buf.advance(consumed);
                    return Ok(Some(frame));
                }
                Ok(None) => {
                    if self.eof {
                        // clean EOF, or a truncated trailing frame
                        return Ok(None);
                    }
                    self.fill()?;
                }
                Err(e) => {
                    self.resync();
                    return Err(StreamError::Protocol(e));
                }
            }
        }
    }

    /// Reads one chunk from the source into the buffer.
    fn fill(&mut self) -> Result<(), std::io::Error> {
        let mut chunk = [0u8; READ_CHUNK];
        let n = self.reader.read(&mut chunk)?;
        if n == 0 {
            self.eof = true;
        } else {
            self.buf.extend_from_slice(&chunk[..n]);
        }
        Ok(())
    }

    /// Skips buffered input up to and including the next `\n`, resetting
    /// the decoder to a header boundary after a protocol error. If no
    /// newline is buffered the whole buffer is dropped.
    fn resync(&mut self) {
        match memchr::memchr(b'\n', &self.buf) {
            Some(pos) => self.buf.advance(pos + 1),
            None => self.buf.clear(),
        }
    }
}

impl<R: Read> Iterator for FrameStream<R> {
    type Item = Result<Frame, StreamError>;

    /// Iterator view of the stream. Ends at EOF; an IO error is
    /// yielded once and callers are expected to stop there. Protocol
    /// errors are yielded per frame and iteration may continue.
    fn next(&mut self) -> Option<Self::Item> {
        match self.next_frame() {
            Ok(Some(frame)) => Some(Ok(frame)),
            Ok(None) => None,
            Err(e) => Some(Err(e)),
        }
    }
}
