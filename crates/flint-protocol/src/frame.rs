//! RESP frame types.
//!
//! The [`Frame`] enum represents a single parsed RESP value. Bulk
//! strings use `Bytes` for reference-counted storage that avoids
//! copies when moving payloads between the parser, the engine, and
//! the append-only file.

use bytes::Bytes;

/// A single RESP protocol frame, the unit of request and reply.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    /// Simple string response, e.g. `+OK\r\n`.
    /// Used for short, non-binary status replies.
    Simple(String),

    /// Error response, e.g. `-ERR unknown command\r\n`.
    Error(String),

    /// 64-bit signed integer, e.g. `:42\r\n`.
    Integer(i64),

    /// Bulk (binary-safe) string, e.g. `$5\r\nhello\r\n`.
    /// `None` is the null bulk, `$-1\r\n`.
    Bulk(Option<Bytes>),

    /// Ordered array of frames, e.g. `*2\r\n+a\r\n+b\r\n`.
    /// `None` is the null array `*-1\r\n`; `Some(vec![])` is the
    /// empty array `*0\r\n`. The two are distinct on the wire and in
    /// meaning — EXEC uses the null array to signal an aborted
    /// transaction.
    Array(Option<Vec<Frame>>),
}

impl Frame {
    /// Builds a bulk string frame from anything byte-like.
    pub fn bulk(data: impl Into<Bytes>) -> Frame {
        Frame::Bulk(Some(data.into()))
    }

    /// The null bulk string, `$-1\r\n`.
    pub fn null_bulk() -> Frame {
        Frame::Bulk(None)
    }

    /// The null array, `*-1\r\n`.
    pub fn null_array() -> Frame {
        Frame::Array(None)
    }

    /// Builds an array frame from a list of element frames.
    pub fn array(items: Vec<Frame>) -> Frame {
        Frame::Array(Some(items))
    }

    /// Builds the canonical command form: an array of bulk strings.
    pub fn command(parts: Vec<Bytes>) -> Frame {
        Frame::Array(Some(parts.into_iter().map(|p| Frame::Bulk(Some(p))).collect()))
    }

    /// Returns `true` for error frames.
    pub fn is_error(&self) -> bool {
        matches!(self, Frame::Error(_))
    }

    /// Extracts the command line from an array-of-bulks frame.
    ///
    /// Returns `None` if the frame is not an array, the array is null
    /// or empty, or any element is not a bulk/simple string. Simple
    /// strings are accepted because inline commands and hand-written
    /// clients produce them.
    pub fn as_command(&self) -> Option<Vec<Bytes>> {
        let Frame::Array(Some(items)) = self else {
            return None;
        };
        if items.is_empty() {
            return None;
        }
        let mut parts = Vec::with_capacity(items.len());
        for item in items {
            match item {
                Frame::Bulk(Some(data)) => parts.push(data.clone()),
                Frame::Simple(s) => parts.push(Bytes::copy_from_slice(s.as_bytes())),
                _ => return None,
            }
        }
        Some(parts)
    }
}
