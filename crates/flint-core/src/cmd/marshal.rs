//! Serialising live values back into commands.
//!
//! The AOF rewriter and the transaction undo log both need a command
//! line that reconstructs a value from scratch: one `SET`/`RPUSH`/
//! `SADD`/`HMSET`/`ZADD` per key, plus `PEXPIREAT` when a deadline is
//! set.

use bytes::Bytes;

use crate::db::Db;
use crate::types::Value;
use crate::CmdLine;

fn bytes_of(s: &str) -> Bytes {
    Bytes::copy_from_slice(s.as_bytes())
}

/// Builds the single command that recreates `value` under `key`.
pub fn entity_to_cmd(key: &str, value: &Value) -> CmdLine {
    match value {
        Value::Bytes(data) => vec![Bytes::from_static(b"SET"), bytes_of(key), data.clone()],
        Value::List(list) => {
            let mut line = Vec::with_capacity(2 + list.len());
            line.push(Bytes::from_static(b"RPUSH"));
            line.push(bytes_of(key));
            line.extend(list.iter().cloned());
            line
        }
        Value::Set(members) => {
            let mut line = Vec::with_capacity(2 + members.len());
            line.push(Bytes::from_static(b"SADD"));
            line.push(bytes_of(key));
            line.extend(members.iter().map(|m| bytes_of(m)));
            line
        }
        Value::Hash(fields) => {
            let mut line = Vec::with_capacity(2 + fields.len() * 2);
            line.push(Bytes::from_static(b"HMSET"));
            line.push(bytes_of(key));
            for (field, value) in fields {
                line.push(bytes_of(field));
                line.push(value.clone());
            }
            line
        }
        Value::ZSet(set) => {
            let mut line = Vec::with_capacity(2 + set.len() as usize * 2);
            line.push(Bytes::from_static(b"ZADD"));
            line.push(bytes_of(key));
            set.for_each(0, set.len(), false, |member, score| {
                line.push(bytes_of(&super::format_float(score)));
                line.push(bytes_of(member));
                true
            });
            line
        }
    }
}

/// Builds `PEXPIREAT key <ms>` for an absolute deadline.
pub fn expire_cmd(key: &str, at_ms: u64) -> CmdLine {
    vec![
        Bytes::from_static(b"PEXPIREAT"),
        bytes_of(key),
        bytes_of(&at_ms.to_string()),
    ]
}

/// Builds the command that restores a key's current TTL state:
/// `PEXPIREAT` when a deadline is set, `PERSIST` otherwise.
pub fn ttl_to_cmd(db: &Db, key: &str) -> CmdLine {
    match db.ttl_ms(key) {
        Some(at_ms) => expire_cmd(key, at_ms),
        None => vec![Bytes::from_static(b"PERSIST"), bytes_of(key)],
    }
}
