//! Protocol error types for RESP parsing.

use thiserror::Error;

/// Errors that can occur when parsing the RESP wire format.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// The input buffer doesn't contain a complete frame yet.
    /// The caller should read more data and try again.
    #[error("incomplete frame: need more data")]
    Incomplete,

    /// A nested element started with a byte that isn't a RESP type
    /// prefix. Only top-level frames may fall back to inline commands.
    #[error("invalid type prefix: {0:#04x}")]
    InvalidPrefix(u8),

    /// Failed to parse an integer value from the frame content.
    #[error("invalid integer encoding")]
    InvalidInteger,

    /// A bulk string or array declared an invalid length.
    #[error("invalid frame length: {0}")]
    InvalidFrameLength(i64),

    /// A bulk string body was not terminated by CRLF.
    #[error("bulk string missing CRLF terminator")]
    MissingCrlf,

    /// A bulk string declared a length above the 512 MB cap.
    #[error("bulk string too large: {0} bytes")]
    BulkStringTooLarge(usize),

    /// An array declared more elements than the parser accepts.
    #[error("too many array elements: {0}")]
    TooManyElements(usize),

    /// Arrays nested deeper than the parser accepts.
    #[error("frame nesting exceeds {0} levels")]
    NestingTooDeep(usize),

    /// A simple string or error frame contained invalid UTF-8.
    #[error("invalid utf-8 in {0} frame")]
    InvalidUtf8(&'static str),
}

/// Errors yielded by [`crate::FrameStream`].
///
/// The two classes behave differently: an `Io` error terminates the
/// stream, while a `Protocol` error applies to a single frame — the
/// decoder resets to the next line and the stream stays usable.
#[derive(Debug, Error)]
pub enum StreamError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),
}
