//! flint-protocol: RESP wire protocol implementation.
//!
//! Provides incremental parsing and direct-to-buffer serialization of
//! the text-based request-reply protocol spoken by flint clients and
//! replayed from the append-only file.
//!
//! # quick start
//!
//! ```
//! use bytes::BytesMut;
//! use flint_protocol::{parse_frame, Frame};
//!
//! // parse a simple string
//! let (frame, consumed) = parse_frame(b"+OK\r\n").unwrap().unwrap();
//! assert_eq!(frame, Frame::Simple("OK".into()));
//! assert_eq!(consumed, 5);
//!
//! // serialize a frame
//! let mut buf = BytesMut::new();
//! frame.serialize(&mut buf);
//! assert_eq!(&buf[..], b"+OK\r\n");
//! ```

pub mod error;
pub mod frame;
pub mod parse;
mod serialize;
pub mod stream;

pub use error::{ProtocolError, StreamError};
pub use frame::Frame;
pub use parse::parse_frame;
pub use stream::FrameStream;
