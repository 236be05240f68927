//! Incremental RESP parser.
//!
//! Operates on buffered byte slices. The caller is responsible for
//! reading data from the network (or a file) into a buffer — this
//! parser is purely synchronous. A `Cursor<&[u8]>` tracks the position
//! through the input without consuming it, so the caller can retry the
//! same buffer once more data arrives.
//!
//! The parser does a single pass that builds `Frame` values directly,
//! returning `Incomplete` when the buffer doesn't yet hold a full
//! frame.
//!
//! # Inline commands
//!
//! A top-level frame whose first byte is not one of `+ - : $ *` is
//! parsed as a legacy inline command: the CRLF-terminated line is
//! split on spaces and returned as an array of bulk strings. Nested
//! elements never take this fallback — inside an array a non-prefix
//! byte is a protocol error.

use std::io::Cursor;

use bytes::Bytes;

use crate::error::ProtocolError;
use crate::frame::Frame;

/// Maximum nesting depth for arrays. Prevents stack overflow from
/// malicious or malformed deeply-nested frames.
const MAX_NESTING_DEPTH: usize = 64;

/// Maximum number of elements in an array. Prevents memory
/// amplification where tiny elements create disproportionately large
/// Vec allocations.
const MAX_ARRAY_ELEMENTS: usize = 1_048_576;

/// Maximum length of a bulk string in bytes (512 MB).
const MAX_BULK_LEN: i64 = 512 * 1024 * 1024;

/// Cap for Vec::with_capacity in array parsing. A declared count of 1M
/// elements would otherwise pre-allocate tens of megabytes before any
/// child data is parsed.
const PREALLOC_CAP: usize = 1024;

/// Parses one frame from the front of `buf`.
///
/// Returns `Ok(Some((frame, consumed)))` if a complete frame was parsed,
/// `Ok(None)` if the buffer doesn't contain enough data yet,
/// or `Err(...)` if the data is malformed.
#[inline]
pub fn parse_frame(buf: &[u8]) -> Result<Option<(Frame, usize)>, ProtocolError> {
    if buf.is_empty() {
        return Ok(None);
    }

    let mut cursor = Cursor::new(buf);

    match try_parse(&mut cursor, 0) {
        Ok(frame) => {
            let consumed = cursor.position() as usize;
            Ok(Some((frame, consumed)))
        }
        Err(ProtocolError::Incomplete) => Ok(None),
        Err(e) => Err(e),
    }
}

/// Parses a complete frame from the cursor position, returning
/// `Incomplete` if the buffer doesn't contain enough data.
fn try_parse(cursor: &mut Cursor<&[u8]>, depth: usize) -> Result<Frame, ProtocolError> {
    let prefix = peek_byte(cursor)?;

    match prefix {
        b'+' => {
            advance(cursor, 1);
            let line = read_line(cursor)?;
            let s = std::str::from_utf8(line)
                .map_err(|_| ProtocolError::InvalidUtf8("simple string"))?;
            Ok(Frame::Simple(s.to_owned()))
        }
        b'-' => {
            advance(cursor, 1);
            let line = read_line(cursor)?;
            let s = std::str::from_utf8(line)
                .map_err(|_| ProtocolError::InvalidUtf8("error"))?;
            Ok(Frame::Error(s.to_owned()))
        }
        b':' => {
            advance(cursor, 1);
            let val = read_integer_line(cursor)?;
            Ok(Frame::Integer(val))
        }
        b'$' => {
            advance(cursor, 1);
            let len = read_integer_line(cursor)?;
            if len == -1 {
                // null bulk consumes no body bytes
                return Ok(Frame::Bulk(None));
            }
            if len < 0 {
                return Err(ProtocolError::InvalidFrameLength(len));
            }
            if len > MAX_BULK_LEN {
                return Err(ProtocolError::BulkStringTooLarge(len as usize));
            }
            let len = len as usize;

            // need `len` bytes of body + \r\n
            if remaining(cursor) < len + 2 {
                return Err(ProtocolError::Incomplete);
            }

            let pos = cursor.position() as usize;

            // verify trailing \r\n (scope the borrow so we can mutate cursor after)
            {
                let buf = cursor.get_ref();
                if buf[pos + len] != b'\r' || buf[pos + len + 1] != b'\n' {
                    return Err(ProtocolError::MissingCrlf);
                }
            }

            cursor.set_position((pos + len + 2) as u64);
            let data = Bytes::copy_from_slice(&cursor.get_ref()[pos..pos + len]);
            Ok(Frame::Bulk(Some(data)))
        }
        b'*' => {
            advance(cursor, 1);
            let next_depth = depth + 1;
            if next_depth > MAX_NESTING_DEPTH {
                return Err(ProtocolError::NestingTooDeep(MAX_NESTING_DEPTH));
            }

            let count = read_integer_line(cursor)?;
            if count == -1 {
                return Ok(Frame::Array(None));
            }
            if count < 0 {
                return Err(ProtocolError::InvalidFrameLength(count));
            }
            if count as usize > MAX_ARRAY_ELEMENTS {
                return Err(ProtocolError::TooManyElements(count as usize));
            }

            let count = count as usize;
            let mut frames = Vec::with_capacity(count.min(PREALLOC_CAP));
            for _ in 0..count {
                frames.push(try_parse(cursor, next_depth)?);
            }
            Ok(Frame::Array(Some(frames)))
        }
        other => {
            if depth > 0 {
                return Err(ProtocolError::InvalidPrefix(other));
            }
            parse_inline(cursor)
        }
    }
}

/// Parses an inline command line into an array of bulk strings.
///
/// The whole CRLF-terminated line is split on spaces; runs of spaces
/// collapse (empty tokens are dropped). A blank line yields an empty
/// array, which the connection layer ignores.
fn parse_inline(cursor: &mut Cursor<&[u8]>) -> Result<Frame, ProtocolError> {
    let line = read_line(cursor)?;
    let parts = line
        .split(|&b| b == b' ')
        .filter(|part| !part.is_empty())
        .map(|part| Frame::Bulk(Some(Bytes::copy_from_slice(part))))
        .collect();
    Ok(Frame::Array(Some(parts)))
}

// ---------------------------------------------------------------------------
// low-level cursor helpers
// ---------------------------------------------------------------------------

fn peek_byte(cursor: &Cursor<&[u8]>) -> Result<u8, ProtocolError> {
    let pos = cursor.position() as usize;
    if pos >= cursor.get_ref().len() {
        return Err(ProtocolError::Incomplete);
    }
    Ok(cursor.get_ref()[pos])
}

fn advance(cursor: &mut Cursor<&[u8]>, n: usize) {
    cursor.set_position(cursor.position() + n as u64);
}

fn remaining(cursor: &Cursor<&[u8]>) -> usize {
    let len = cursor.get_ref().len();
    let pos = cursor.position() as usize;
    len.saturating_sub(pos)
}

/// Returns the slice of bytes up to (but not including) the next `\r\n`,
/// and advances the cursor past the `\r\n`.
fn read_line<'a>(cursor: &mut Cursor<&'a [u8]>) -> Result<&'a [u8], ProtocolError> {
    let buf = *cursor.get_ref();
    let start = cursor.position() as usize;

    // SIMD-accelerated scan for \r, then verify \n follows
    let mut pos = start;
    while let Some(offset) = memchr::memchr(b'\r', &buf[pos..]) {
        let cr = pos + offset;
        if cr + 1 < buf.len() && buf[cr + 1] == b'\n' {
            cursor.set_position((cr + 2) as u64);
            return Ok(&buf[start..cr]);
        }
        // bare \r without \n — keep scanning past it
        pos = cr + 1;
    }

    Err(ProtocolError::Incomplete)
}

/// Reads a line and parses it as an i64.
fn read_integer_line(cursor: &mut Cursor<&[u8]>) -> Result<i64, ProtocolError> {
    let line = read_line(cursor)?;
    parse_i64_bytes(line)
}

/// Parses an i64 directly from a byte slice without allocating.
///
/// Negative numbers are accumulated in the negative direction so that
/// `i64::MIN` is representable without overflow.
pub(crate) fn parse_i64_bytes(buf: &[u8]) -> Result<i64, ProtocolError> {
    if buf.is_empty() {
        return Err(ProtocolError::InvalidInteger);
    }

    let (negative, digits) = if buf[0] == b'-' {
        (true, &buf[1..])
    } else {
        (false, buf)
    };

    if digits.is_empty() {
        return Err(ProtocolError::InvalidInteger);
    }

    let mut n: i64 = 0;
    for &b in digits {
        if !b.is_ascii_digit() {
            return Err(ProtocolError::InvalidInteger);
        }
        let digit = (b - b'0') as i64;
        n = if negative {
            n.checked_mul(10).and_then(|n| n.checked_sub(digit))
        } else {
            n.checked_mul(10).and_then(|n| n.checked_add(digit))
        }
        .ok_or(ProtocolError::InvalidInteger)?;
    }
    Ok(n)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn must_parse(input: &[u8]) -> Frame {
        let (frame, consumed) = parse_frame(input)
            .expect("parse should not error")
            .expect("parse should return a frame");
        assert_eq!(consumed, input.len(), "should consume entire input");
        frame
    }

    #[test]
    fn simple_string() {
        assert_eq!(must_parse(b"+OK\r\n"), Frame::Simple("OK".into()));
        assert_eq!(
            must_parse(b"+hello world\r\n"),
            Frame::Simple("hello world".into())
        );
    }

    #[test]
    fn simple_error() {
        assert_eq!(
            must_parse(b"-ERR unknown command\r\n"),
            Frame::Error("ERR unknown command".into())
        );
    }

    #[test]
    fn integer() {
        assert_eq!(must_parse(b":42\r\n"), Frame::Integer(42));
        assert_eq!(must_parse(b":0\r\n"), Frame::Integer(0));
        assert_eq!(must_parse(b":-1\r\n"), Frame::Integer(-1));
        assert_eq!(
            must_parse(b":9223372036854775807\r\n"),
            Frame::Integer(i64::MAX)
        );
        assert_eq!(
            must_parse(b":-9223372036854775808\r\n"),
            Frame::Integer(i64::MIN)
        );
    }

    #[test]
    fn bulk_string() {
        assert_eq!(must_parse(b"$5\r\nhello\r\n"), Frame::bulk("hello"));
        assert_eq!(must_parse(b"$0\r\n\r\n"), Frame::bulk(""));
    }

    #[test]
    fn bulk_string_with_binary() {
        let input = b"$4\r\n\x00\x01\r\n\r\n";
        assert_eq!(
            must_parse(input),
            Frame::Bulk(Some(Bytes::copy_from_slice(&[0, 1, b'\r', b'\n'])))
        );
    }

    #[test]
    fn null_bulk() {
        assert_eq!(must_parse(b"$-1\r\n"), Frame::Bulk(None));
    }

    #[test]
    fn null_and_empty_array() {
        assert_eq!(must_parse(b"*-1\r\n"), Frame::Array(None));
        assert_eq!(must_parse(b"*0\r\n"), Frame::array(vec![]));
    }

    #[test]
    fn array_of_bulks() {
        let input = b"*2\r\n$3\r\nGET\r\n$5\r\nmykey\r\n";
        assert_eq!(
            must_parse(input),
            Frame::array(vec![Frame::bulk("GET"), Frame::bulk("mykey")])
        );
    }

    #[test]
    fn nested_array() {
        let input = b"*2\r\n*2\r\n:1\r\n:2\r\n*1\r\n:3\r\n";
        assert_eq!(
            must_parse(input),
            Frame::array(vec![
                Frame::array(vec![Frame::Integer(1), Frame::Integer(2)]),
                Frame::array(vec![Frame::Integer(3)]),
            ])
        );
    }

    #[test]
    fn array_with_null_bulk() {
        let input = b"*3\r\n+OK\r\n$-1\r\n:1\r\n";
        assert_eq!(
            must_parse(input),
            Frame::array(vec![
                Frame::Simple("OK".into()),
                Frame::Bulk(None),
                Frame::Integer(1),
            ])
        );
    }

    #[test]
    fn inline_command() {
        assert_eq!(
            must_parse(b"SET k v\r\n"),
            Frame::array(vec![Frame::bulk("SET"), Frame::bulk("k"), Frame::bulk("v")])
        );
    }

    #[test]
    fn inline_command_collapses_spaces() {
        assert_eq!(
            must_parse(b"PING  \r\n"),
            Frame::array(vec![Frame::bulk("PING")])
        );
    }

    #[test]
    fn blank_inline_line_is_empty_array() {
        // blank line must consume its CRLF so the caller makes progress
        assert_eq!(must_parse(b"\r\n"), Frame::array(vec![]));
    }

    #[test]
    fn inline_not_allowed_nested() {
        let err = parse_frame(b"*1\r\nGET k\r\n").unwrap_err();
        assert_eq!(err, ProtocolError::InvalidPrefix(b'G'));
    }

    #[test]
    fn incomplete_returns_none() {
        assert_eq!(parse_frame(b"").unwrap(), None);
        assert_eq!(parse_frame(b"+OK").unwrap(), None);
        assert_eq!(parse_frame(b"+OK\r").unwrap(), None);
        assert_eq!(parse_frame(b"$5\r\nhel").unwrap(), None);
        assert_eq!(parse_frame(b"$5\r\nhello\r").unwrap(), None);
        assert_eq!(parse_frame(b"*2\r\n+OK\r\n").unwrap(), None);
        assert_eq!(parse_frame(b"INCOMPLETE INLINE").unwrap(), None);
    }

    #[test]
    fn invalid_integer() {
        let err = parse_frame(b":abc\r\n").unwrap_err();
        assert_eq!(err, ProtocolError::InvalidInteger);
    }

    #[test]
    fn negative_lengths_rejected() {
        assert!(matches!(
            parse_frame(b"$-2\r\n").unwrap_err(),
            ProtocolError::InvalidFrameLength(-2)
        ));
        assert!(matches!(
            parse_frame(b"*-2\r\n").unwrap_err(),
            ProtocolError::InvalidFrameLength(-2)
        ));
    }

    #[test]
    fn bulk_body_must_end_with_crlf() {
        let err = parse_frame(b"$5\r\nhelloXX").unwrap_err();
        assert_eq!(err, ProtocolError::MissingCrlf);
    }

    #[test]
    fn parse_consumes_exact_bytes() {
        // buffer contains a full frame plus the start of the next one
        let buf = b"+OK\r\n$3\r\nfoo";
        let (frame, consumed) = parse_frame(buf).unwrap().unwrap();
        assert_eq!(frame, Frame::Simple("OK".into()));
        assert_eq!(consumed, 5);
    }

    #[test]
    fn deeply_nested_array_rejected() {
        let mut buf = Vec::new();
        for _ in 0..65 {
            buf.extend_from_slice(b"*1\r\n");
        }
        buf.extend_from_slice(b":1\r\n");

        let err = parse_frame(&buf).unwrap_err();
        assert!(
            matches!(err, ProtocolError::NestingTooDeep(64)),
            "expected NestingTooDeep, got {err:?}"
        );
    }

    #[test]
    fn nesting_at_limit_accepted() {
        let mut buf = Vec::new();
        for _ in 0..64 {
            buf.extend_from_slice(b"*1\r\n");
        }
        buf.extend_from_slice(b":1\r\n");

        let result = parse_frame(&buf);
        assert!(result.is_ok(), "64 levels of nesting should be accepted");
        assert!(result.unwrap().is_some());
    }

    #[test]
    fn parse_i64_bytes_bounds() {
        assert_eq!(parse_i64_bytes(b"0").unwrap(), 0);
        assert_eq!(parse_i64_bytes(b"-1").unwrap(), -1);
        assert_eq!(parse_i64_bytes(b"9223372036854775807").unwrap(), i64::MAX);
        assert_eq!(parse_i64_bytes(b"-9223372036854775808").unwrap(), i64::MIN);
        assert!(parse_i64_bytes(b"").is_err());
        assert!(parse_i64_bytes(b"-").is_err());
        assert!(parse_i64_bytes(b"12a").is_err());
        assert!(parse_i64_bytes(b"9223372036854775808").is_err());
    }
}
