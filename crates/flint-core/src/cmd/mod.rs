//! Command handlers, grouped by value kind.
//!
//! Each module registers its rows into the [`Registry`]; handlers
//! operate against a single [`Db`] and always return a reply frame —
//! user-visible failures are error frames, never `Err`.

pub mod hashes;
pub mod keys;
pub mod lists;
pub mod marshal;
pub mod sets;
pub mod strings;
pub mod tx;
pub mod zsets;

use bytes::Bytes;
use flint_protocol::Frame;

use crate::registry::Registry;

/// Registers every standard command.
pub fn register_all(registry: &mut Registry) {
    keys::register(registry);
    strings::register(registry);
    lists::register(registry);
    hashes::register(registry);
    sets::register(registry);
    zsets::register(registry);
}

// ---------------------------------------------------------------------------
// reply constructors
// ---------------------------------------------------------------------------

pub(crate) fn ok() -> Frame {
    Frame::Simple("OK".into())
}

pub(crate) fn err(msg: impl Into<String>) -> Frame {
    Frame::Error(msg.into())
}

pub(crate) fn wrong_type() -> Frame {
    err("WRONGTYPE Operation against a key holding the wrong kind of value")
}

pub(crate) fn arg_num_err(cmd: &str) -> Frame {
    err(format!("ERR wrong number of arguments for '{cmd}' command"))
}

pub(crate) fn syntax_err() -> Frame {
    err("ERR syntax error")
}

pub(crate) fn not_int_err() -> Frame {
    err("ERR value is not an integer or out of range")
}

pub(crate) fn not_float_err() -> Frame {
    err("ERR value is not a valid float")
}

// ---------------------------------------------------------------------------
// argument conversions
// ---------------------------------------------------------------------------

/// Converts a binary argument into a key/member string.
pub(crate) fn arg_str(arg: &Bytes) -> String {
    String::from_utf8_lossy(arg).into_owned()
}

/// Parses an integer argument, or the canonical error reply.
pub(crate) fn parse_int(arg: &Bytes) -> Result<i64, Frame> {
    std::str::from_utf8(arg)
        .ok()
        .and_then(|s| s.parse::<i64>().ok())
        .ok_or_else(not_int_err)
}

/// Parses a float argument, or the canonical error reply.
pub(crate) fn parse_float(arg: &Bytes) -> Result<f64, Frame> {
    std::str::from_utf8(arg)
        .ok()
        .and_then(|s| s.parse::<f64>().ok())
        .filter(|f| !f.is_nan())
        .ok_or_else(not_float_err)
}

/// Formats a score the way clients expect: shortest representation,
/// no trailing zeros, `inf`/`-inf` for the infinities.
pub(crate) fn format_float(value: f64) -> String {
    if value == f64::INFINITY {
        "inf".into()
    } else if value == f64::NEG_INFINITY {
        "-inf".into()
    } else {
        format!("{value}")
    }
}

/// Wraps a list of byte strings as an array-of-bulks reply.
pub(crate) fn bulk_array(items: impl IntoIterator<Item = Bytes>) -> Frame {
    Frame::Array(Some(
        items.into_iter().map(|b| Frame::Bulk(Some(b))).collect(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_int_rejects_junk() {
        assert_eq!(parse_int(&Bytes::from("42")).unwrap(), 42);
        assert_eq!(parse_int(&Bytes::from("-7")).unwrap(), -7);
        assert!(parse_int(&Bytes::from("4.2")).is_err());
        assert!(parse_int(&Bytes::from("abc")).is_err());
    }

    #[test]
    fn parse_float_accepts_infinities() {
        assert_eq!(parse_float(&Bytes::from("1.5")).unwrap(), 1.5);
        assert_eq!(parse_float(&Bytes::from("inf")).unwrap(), f64::INFINITY);
        assert_eq!(parse_float(&Bytes::from("-inf")).unwrap(), f64::NEG_INFINITY);
        assert!(parse_float(&Bytes::from("nan")).is_err());
        assert!(parse_float(&Bytes::from("x")).is_err());
    }

    #[test]
    fn format_float_is_shortest_form() {
        assert_eq!(format_float(10.0), "10");
        assert_eq!(format_float(1.5), "1.5");
        assert_eq!(format_float(-0.25), "-0.25");
        assert_eq!(format_float(f64::INFINITY), "inf");
        assert_eq!(format_float(f64::NEG_INFINITY), "-inf");
    }
}
