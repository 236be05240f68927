//! Data type representations for stored values.
//!
//! Each variant maps to one of the five value kinds a keyspace entry
//! can hold. Plain byte strings use `Bytes` for cheap cloning; the
//! collection kinds own their container types.

pub mod border;
pub mod list;
pub mod skiplist;
pub mod sorted_set;

use std::collections::{HashMap, HashSet};

use bytes::Bytes;

pub use border::ScoreBorder;
pub use list::List;
pub use sorted_set::SortedSet;

/// A stored value in the keyspace.
///
/// Exactly five kinds; handlers request a specific variant and reply
/// WRONGTYPE on mismatch.
#[derive(Debug, Clone)]
pub enum Value {
    /// Binary-safe string data.
    Bytes(Bytes),

    /// Ordered list of binary-safe elements, indexable from both ends.
    List(List),

    /// Field → value mapping. Insertion order is not observable.
    Hash(HashMap<String, Bytes>),

    /// Unordered collection of unique members.
    Set(HashSet<String>),

    /// Unique members ordered by (score, member).
    ZSet(SortedSet),
}

impl Value {
    /// Returns the type name, matching the TYPE command output.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Bytes(_) => "string",
            Value::List(_) => "list",
            Value::Hash(_) => "hash",
            Value::Set(_) => "set",
            Value::ZSet(_) => "zset",
        }
    }
}

/// Resolves a possibly-negative index against a collection length.
///
/// Negative indices count back from the end (-1 = last element).
/// Returns `None` when the resolved index falls outside `0..len`.
pub fn resolve_index(index: i64, len: usize) -> Option<usize> {
    let len = len as i64;
    let resolved = if index < 0 { len + index } else { index };
    if resolved < 0 || resolved >= len {
        None
    } else {
        Some(resolved as usize)
    }
}

/// Converts redis-style (start, stop) indices (inclusive, possibly
/// negative) to a clamped half-open `start..end` range over `len`
/// elements. Returns an empty range when the window is inverted or
/// entirely out of bounds.
pub fn resolve_range(start: i64, stop: i64, len: usize) -> std::ops::Range<usize> {
    let len = len as i64;
    if len == 0 {
        return 0..0;
    }
    let s = if start < 0 { (len + start).max(0) } else { start };
    let e = if stop < 0 { len + stop } else { stop.min(len - 1) };
    if s > e || s >= len || e < 0 {
        return 0..0;
    }
    (s as usize)..((e + 1) as usize)
}
