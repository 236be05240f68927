//! Hash commands.

use std::collections::HashMap;

use bytes::Bytes;
use flint_protocol::Frame;

use super::tx;
use super::{arg_num_err, arg_str, err, ok, parse_float, parse_int, wrong_type};
use crate::db::Db;
use crate::registry::{CommandError, Registry};
use crate::types::Value;

type Hash = HashMap<String, Bytes>;

pub fn register(registry: &mut Registry) {
    registry.register("hset", hset, Some(tx::write_first_key), Some(tx::undo_hset), -4);
    registry.register("hsetnx", hsetnx, Some(tx::write_first_key), Some(tx::undo_hash_fields), 4);
    registry.register("hget", hget, Some(tx::read_first_key), None, 3);
    registry.register("hexists", hexists, Some(tx::read_first_key), None, 3);
    registry.register("hdel", hdel, Some(tx::write_first_key), Some(tx::undo_hash_fields), -3);
    registry.register("hlen", hlen, Some(tx::read_first_key), None, 2);
    registry.register("hmget", hmget, Some(tx::read_first_key), None, -3);
    registry.register("hmset", hmset, Some(tx::write_first_key), Some(tx::undo_hset), -4);
    registry.register("hkeys", hkeys, Some(tx::read_first_key), None, 2);
    registry.register("hvals", hvals, Some(tx::read_first_key), None, 2);
    registry.register("hgetall", hgetall, Some(tx::read_first_key), None, 2);
    registry.register("hincrby", hincrby, Some(tx::write_first_key), Some(tx::undo_hash_fields), 4);
    registry.register(
        "hincrbyfloat",
        hincrbyfloat,
        Some(tx::write_first_key),
        Some(tx::undo_hash_fields),
        4,
    );
}

fn with_hash<T>(db: &Db, key: &str, f: impl FnOnce(&Hash) -> T) -> Result<Option<T>, Frame> {
    match db.with(key, |value| match value {
        Value::Hash(map) => Ok(f(map)),
        _ => Err(wrong_type()),
    }) {
        None => Ok(None),
        Some(Ok(t)) => Ok(Some(t)),
        Some(Err(reply)) => Err(reply),
    }
}

fn with_hash_mut<T>(
    db: &Db,
    key: &str,
    create: bool,
    f: impl FnOnce(&mut Hash) -> T,
) -> Result<Option<T>, Frame> {
    let mut f = Some(f);
    let attempt = db.with_mut(key, |value| match value {
        Value::Hash(map) => Ok((f.take().expect("closure used once"))(map)),
        _ => Err(wrong_type()),
    });
    match attempt {
        Some(Ok(t)) => Ok(Some(t)),
        Some(Err(reply)) => Err(reply),
        None if !create => Ok(None),
        None => {
            db.put(key.to_owned(), Value::Hash(Hash::new()));
            match db.with_mut(key, |value| match value {
                Value::Hash(map) => (f.take().expect("closure used once"))(map),
                _ => unreachable!("hash was just installed"),
            }) {
                Some(t) => Ok(Some(t)),
                None => unreachable!("hash was just installed"),
            }
        }
    }
}

fn drop_if_empty(db: &Db, key: &str) {
    let empty = db
        .with(key, |value| matches!(value, Value::Hash(map) if map.is_empty()))
        .unwrap_or(false);
    if empty {
        db.remove(key);
    }
}

fn log(db: &Db, name: &'static [u8], args: &[Bytes]) {
    let mut line = vec![Bytes::from_static(name)];
    line.extend_from_slice(args);
    db.add_aof(line);
}

fn hset(db: &Db, args: &[Bytes]) -> Result<Frame, CommandError> {
    if (args.len() - 1) % 2 != 0 {
        return Ok(arg_num_err("hset"));
    }
    let key = arg_str(&args[0]);

    let added = with_hash_mut(db, &key, true, |map| {
        let mut added = 0;
        for pair in args[1..].chunks(2) {
            if map.insert(arg_str(&pair[0]), pair[1].clone()).is_none() {
                added += 1;
            }
        }
        added
    });
    Ok(match added {
        Ok(added) => {
            db.bump_version([key.as_str()]);
            log(db, b"HSET", args);
            Frame::Integer(added.unwrap_or(0))
        }
        Err(reply) => reply,
    })
}

fn hsetnx(db: &Db, args: &[Bytes]) -> Result<Frame, CommandError> {
    let key = arg_str(&args[0]);
    let field = arg_str(&args[1]);
    let value = args[2].clone();

    let inserted = with_hash_mut(db, &key, true, |map| match map.entry(field) {
        std::collections::hash_map::Entry::Occupied(_) => false,
        std::collections::hash_map::Entry::Vacant(slot) => {
            slot.insert(value);
            true
        }
    });
    Ok(match inserted {
        Ok(Some(true)) => {
            db.bump_version([key.as_str()]);
            log(db, b"HSETNX", args);
            Frame::Integer(1)
        }
        Ok(_) => Frame::Integer(0),
        Err(reply) => reply,
    })
}

fn hget(db: &Db, args: &[Bytes]) -> Result<Frame, CommandError> {
    let key = arg_str(&args[0]);
    let field = arg_str(&args[1]);
    Ok(match with_hash(db, &key, |map| map.get(&field).cloned()) {
        Ok(Some(Some(value))) => Frame::Bulk(Some(value)),
        Ok(_) => Frame::Bulk(None),
        Err(reply) => reply,
    })
}

fn hexists(db: &Db, args: &[Bytes]) -> Result<Frame, CommandError> {
    let key = arg_str(&args[0]);
    let field = arg_str(&args[1]);
    Ok(match with_hash(db, &key, |map| map.contains_key(&field)) {
        Ok(found) => Frame::Integer(i64::from(found.unwrap_or(false))),
        Err(reply) => reply,
    })
}

fn hdel(db: &Db, args: &[Bytes]) -> Result<Frame, CommandError> {
    let key = arg_str(&args[0]);

    let removed = with_hash_mut(db, &key, false, |map| {
        args[1..]
            .iter()
            .filter(|field| map.remove(&arg_str(field)).is_some())
            .count()
    });
    Ok(match removed {
        Ok(Some(removed)) if removed > 0 => {
            drop_if_empty(db, &key);
            db.bump_version([key.as_str()]);
            log(db, b"HDEL", args);
            Frame::Integer(removed as i64)
        }
        Ok(_) => Frame::Integer(0),
        Err(reply) => reply,
    })
}

fn hlen(db: &Db, args: &[Bytes]) -> Result<Frame, CommandError> {
    let key = arg_str(&args[0]);
    Ok(match with_hash(db, &key, Hash::len) {
        Ok(len) => Frame::Integer(len.unwrap_or(0) as i64),
        Err(reply) => reply,
    })
}

fn hmget(db: &Db, args: &[Bytes]) -> Result<Frame, CommandError> {
    let key = arg_str(&args[0]);
    let values = with_hash(db, &key, |map| {
        args[1..]
            .iter()
            .map(|field| match map.get(&arg_str(field)) {
                Some(value) => Frame::Bulk(Some(value.clone())),
                None => Frame::Bulk(None),
            })
            .collect::<Vec<_>>()
    });
    Ok(match values {
        Ok(Some(values)) => Frame::Array(Some(values)),
        Ok(None) => Frame::Array(Some(vec![Frame::Bulk(None); args.len() - 1])),
        Err(reply) => reply,
    })
}

fn hmset(db: &Db, args: &[Bytes]) -> Result<Frame, CommandError> {
    if (args.len() - 1) % 2 != 0 {
        return Ok(arg_num_err("hmset"));
    }
    let key = arg_str(&args[0]);
    let outcome = with_hash_mut(db, &key, true, |map| {
        for pair in args[1..].chunks(2) {
            map.insert(arg_str(&pair[0]), pair[1].clone());
        }
    });
    Ok(match outcome {
        Ok(_) => {
            db.bump_version([key.as_str()]);
            log(db, b"HMSET", args);
            ok()
        }
        Err(reply) => reply,
    })
}

fn hkeys(db: &Db, args: &[Bytes]) -> Result<Frame, CommandError> {
    let key = arg_str(&args[0]);
    let fields = with_hash(db, &key, |map| {
        map.keys()
            .map(|field| Bytes::copy_from_slice(field.as_bytes()))
            .collect::<Vec<_>>()
    });
    Ok(match fields {
        Ok(fields) => super::bulk_array(fields.unwrap_or_default()),
        Err(reply) => reply,
    })
}

fn hvals(db: &Db, args: &[Bytes]) -> Result<Frame, CommandError> {
    let key = arg_str(&args[0]);
    let values = with_hash(db, &key, |map| map.values().cloned().collect::<Vec<_>>());
    Ok(match values {
        Ok(values) => super::bulk_array(values.unwrap_or_default()),
        Err(reply) => reply,
    })
}

fn hgetall(db: &Db, args: &[Bytes]) -> Result<Frame, CommandError> {
    let key = arg_str(&args[0]);
    let pairs = with_hash(db, &key, |map| {
        let mut out = Vec::with_capacity(map.len() * 2);
        for (field, value) in map {
            out.push(Bytes::copy_from_slice(field.as_bytes()));
            out.push(value.clone());
        }
        out
    });
    Ok(match pairs {
        Ok(pairs) => super::bulk_array(pairs.unwrap_or_default()),
        Err(reply) => reply,
    })
}

fn hincrby(db: &Db, args: &[Bytes]) -> Result<Frame, CommandError> {
    let key = arg_str(&args[0]);
    let field = arg_str(&args[1]);
    let delta = match parse_int(&args[2]) {
        Ok(n) => n,
        Err(reply) => return Ok(reply),
    };

    let outcome = with_hash_mut(db, &key, true, |map| {
        let current: i64 = match map.get(&field) {
            None => 0,
            Some(data) => match std::str::from_utf8(data).ok().and_then(|s| s.parse().ok()) {
                Some(n) => n,
                None => return Err(err("ERR hash value is not an integer")),
            },
        };
        let Some(next) = current.checked_add(delta) else {
            return Err(err("ERR increment or decrement would overflow"));
        };
        map.insert(field.clone(), Bytes::from(next.to_string()));
        Ok(next)
    });
    Ok(match outcome {
        Ok(Some(Ok(next))) => {
            db.bump_version([key.as_str()]);
            log(db, b"HINCRBY", args);
            Frame::Integer(next)
        }
        Ok(Some(Err(reply))) => reply,
        Ok(None) => unreachable!("create was requested"),
        Err(reply) => reply,
    })
}

fn hincrbyfloat(db: &Db, args: &[Bytes]) -> Result<Frame, CommandError> {
    let key = arg_str(&args[0]);
    let field = arg_str(&args[1]);
    let delta = match parse_float(&args[2]) {
        Ok(f) => f,
        Err(reply) => return Ok(reply),
    };

    let outcome = with_hash_mut(db, &key, true, |map| {
        let current = match map.get(&field) {
            None => 0.0,
            Some(data) => match std::str::from_utf8(data).ok().and_then(|s| s.parse().ok()) {
                Some(f) => f,
                None => return Err(err("ERR hash value is not a float")),
            },
        };
        let next = current + delta;
        if next.is_nan() || next.is_infinite() {
            return Err(err("ERR increment would produce NaN or Infinity"));
        }
        let formatted = Bytes::from(super::format_float(next));
        map.insert(field.clone(), formatted.clone());
        Ok(formatted)
    });
    Ok(match outcome {
        Ok(Some(Ok(formatted))) => {
            db.bump_version([key.as_str()]);
            // log the resulting value so replay stays drift-free
            db.add_aof(vec![
                Bytes::from_static(b"HSET"),
                args[0].clone(),
                args[1].clone(),
                formatted.clone(),
            ]);
            Frame::Bulk(Some(formatted))
        }
        Ok(Some(Err(reply))) => reply,
        Ok(None) => unreachable!("create was requested"),
        Err(reply) => reply,
    })
}
