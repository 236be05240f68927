//! Key extractors and undo-log generators shared by the command
//! modules.
//!
//! Extractors map a command's arguments to its `(write, read)` key
//! sets for lock planning. Undo generators snapshot just enough state
//! — a whole key, a few hash fields, a few members — to reverse the
//! command if a transaction has to roll back.

use bytes::Bytes;

use super::marshal;
use crate::db::Db;
use crate::types::Value;
use crate::CmdLine;

// ---------------------------------------------------------------------------
// key extractors
// ---------------------------------------------------------------------------

pub fn read_first_key(args: &[Bytes]) -> (Vec<String>, Vec<String>) {
    match args.first() {
        Some(key) => (Vec::new(), vec![super::arg_str(key)]),
        None => (Vec::new(), Vec::new()),
    }
}

pub fn write_first_key(args: &[Bytes]) -> (Vec<String>, Vec<String>) {
    match args.first() {
        Some(key) => (vec![super::arg_str(key)], Vec::new()),
        None => (Vec::new(), Vec::new()),
    }
}

pub fn write_all_keys(args: &[Bytes]) -> (Vec<String>, Vec<String>) {
    (args.iter().map(super::arg_str).collect(), Vec::new())
}

pub fn read_all_keys(args: &[Bytes]) -> (Vec<String>, Vec<String>) {
    (Vec::new(), args.iter().map(super::arg_str).collect())
}

pub fn no_keys(_args: &[Bytes]) -> (Vec<String>, Vec<String>) {
    (Vec::new(), Vec::new())
}

/// RENAME/RENAMENX: write the destination, read the source.
pub fn rename_keys(args: &[Bytes]) -> (Vec<String>, Vec<String>) {
    if args.len() < 2 {
        return (Vec::new(), Vec::new());
    }
    (
        vec![super::arg_str(&args[1])],
        vec![super::arg_str(&args[0])],
    )
}

/// Store variants (SINTERSTORE et al): write the destination, read
/// the sources.
pub fn store_keys(args: &[Bytes]) -> (Vec<String>, Vec<String>) {
    match args.split_first() {
        Some((dest, sources)) => (
            vec![super::arg_str(dest)],
            sources.iter().map(super::arg_str).collect(),
        ),
        None => (Vec::new(), Vec::new()),
    }
}

// ---------------------------------------------------------------------------
// undo generators
// ---------------------------------------------------------------------------

/// Restores a set of keys to their exact current state: delete
/// whatever the command left behind, then replay a reconstruction
/// command and the TTL command for keys that existed.
pub fn rollback_given_keys<'a>(db: &Db, keys: impl IntoIterator<Item = &'a str>) -> Vec<CmdLine> {
    let mut undo = Vec::new();
    for key in keys {
        match db.get_entity(key) {
            None => undo.push(crate::cmd_line(&["DEL", key])),
            Some(value) => {
                undo.push(crate::cmd_line(&["DEL", key]));
                undo.push(marshal::entity_to_cmd(key, &value));
                undo.push(marshal::ttl_to_cmd(db, key));
            }
        }
    }
    undo
}

/// Whole-key snapshot of the first argument.
pub fn rollback_first_key(db: &Db, args: &[Bytes]) -> Vec<CmdLine> {
    match args.first() {
        Some(key) => rollback_given_keys(db, [super::arg_str(key).as_str()]),
        None => Vec::new(),
    }
}

/// Whole-key snapshot of every argument (DEL undo).
pub fn rollback_all_keys(db: &Db, args: &[Bytes]) -> Vec<CmdLine> {
    let keys: Vec<String> = args.iter().map(super::arg_str).collect();
    rollback_given_keys(db, keys.iter().map(String::as_str))
}

/// Snapshot of both keys touched by RENAME/RENAMENX.
pub fn rollback_rename(db: &Db, args: &[Bytes]) -> Vec<CmdLine> {
    if args.len() < 2 {
        return Vec::new();
    }
    let src = super::arg_str(&args[0]);
    let dest = super::arg_str(&args[1]);
    rollback_given_keys(db, [src.as_str(), dest.as_str()])
}

/// TTL-only undo for the expire family: re-arm the previous deadline
/// or strip the one the command added.
pub fn undo_expire(db: &Db, args: &[Bytes]) -> Vec<CmdLine> {
    match args.first() {
        Some(key) => vec![marshal::ttl_to_cmd(db, &super::arg_str(key))],
        None => Vec::new(),
    }
}

/// Field-level undo for HSET/HDEL: `args` is key followed by field
/// (or field-value) arguments at the given stride.
fn rollback_hash_fields(db: &Db, key: &str, fields: impl Iterator<Item = String>) -> Vec<CmdLine> {
    let current = db.with(key, |value| match value {
        Value::Hash(map) => Some(map.clone()),
        _ => None,
    });
    let map = match current {
        None => return vec![crate::cmd_line(&["DEL", key])],
        // wrong type: the command will fail, nothing to undo
        Some(None) => return Vec::new(),
        Some(Some(map)) => map,
    };

    let mut undo = Vec::new();
    for field in fields {
        match map.get(&field) {
            None => undo.push(crate::cmd_line(&["HDEL", key, &field])),
            Some(value) => undo.push(vec![
                Bytes::from_static(b"HSET"),
                Bytes::copy_from_slice(key.as_bytes()),
                Bytes::copy_from_slice(field.as_bytes()),
                value.clone(),
            ]),
        }
    }
    undo
}

/// Undo for HSET (key field value [field value ...]).
pub fn undo_hset(db: &Db, args: &[Bytes]) -> Vec<CmdLine> {
    if args.len() < 3 {
        return Vec::new();
    }
    let key = super::arg_str(&args[0]);
    let fields = args[1..].chunks(2).map(|pair| super::arg_str(&pair[0]));
    rollback_hash_fields(db, &key, fields)
}

/// Undo for HDEL and HSETNX/HINCRBY-style single-field commands
/// (key field [field ...]).
pub fn undo_hash_fields(db: &Db, args: &[Bytes]) -> Vec<CmdLine> {
    if args.len() < 2 {
        return Vec::new();
    }
    let key = super::arg_str(&args[0]);
    let fields = args[1..].iter().map(super::arg_str);
    rollback_hash_fields(db, &key, fields)
}

/// Member-level undo for SADD/SREM (key member [member ...]).
pub fn undo_set_members(db: &Db, args: &[Bytes]) -> Vec<CmdLine> {
    if args.len() < 2 {
        return Vec::new();
    }
    let key = super::arg_str(&args[0]);

    let current = db.with(&key, |value| match value {
        Value::Set(members) => Some(members.clone()),
        _ => None,
    });
    let members = match current {
        None => return vec![crate::cmd_line(&["DEL", &key])],
        Some(None) => return Vec::new(),
        Some(Some(members)) => members,
    };

    let mut undo = Vec::new();
    for member in args[1..].iter().map(super::arg_str) {
        if members.contains(&member) {
            undo.push(crate::cmd_line(&["SADD", &key, &member]));
        } else {
            undo.push(crate::cmd_line(&["SREM", &key, &member]));
        }
    }
    undo
}

/// Member-level undo for sorted-set mutations: restore each member's
/// score or remove members the command added.
pub fn rollback_zset_members(
    db: &Db,
    key: &str,
    members: impl Iterator<Item = String>,
) -> Vec<CmdLine> {
    let current = db.with(key, |value| match value {
        Value::ZSet(set) => Some(set.clone()),
        _ => None,
    });
    let set = match current {
        None => return vec![crate::cmd_line(&["DEL", key])],
        Some(None) => return Vec::new(),
        Some(Some(set)) => set,
    };

    let mut undo = Vec::new();
    for member in members {
        match set.score(&member) {
            None => undo.push(crate::cmd_line(&["ZREM", key, &member])),
            Some(score) => undo.push(crate::cmd_line(&[
                "ZADD",
                key,
                &super::format_float(score),
                &member,
            ])),
        }
    }
    undo
}

/// Undo for ZADD (key score member [score member ...]).
pub fn undo_zadd(db: &Db, args: &[Bytes]) -> Vec<CmdLine> {
    if args.len() < 3 {
        return Vec::new();
    }
    let key = super::arg_str(&args[0]);
    let members = args[1..].chunks(2).filter_map(|pair| {
        (pair.len() == 2).then(|| super::arg_str(&pair[1]))
    });
    rollback_zset_members(db, &key, members)
}

/// Undo for ZREM (key member [member ...]).
pub fn undo_zrem(db: &Db, args: &[Bytes]) -> Vec<CmdLine> {
    if args.len() < 2 {
        return Vec::new();
    }
    let key = super::arg_str(&args[0]);
    let members = args[1..].iter().map(super::arg_str);
    rollback_zset_members(db, &key, members)
}
