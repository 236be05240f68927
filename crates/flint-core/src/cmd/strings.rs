//! String commands.

use bytes::{Bytes, BytesMut};
use flint_protocol::Frame;

use super::tx;
use super::{arg_str, err, marshal, not_int_err, ok, parse_float, parse_int, syntax_err, wrong_type};
use crate::db::Db;
use crate::registry::{CommandError, Registry};
use crate::time;
use crate::types::Value;

pub fn register(registry: &mut Registry) {
    registry.register("get", get, Some(tx::read_first_key), None, 2);
    registry.register("set", set, Some(tx::write_first_key), Some(tx::rollback_first_key), -3);
    registry.register("setnx", setnx, Some(tx::write_first_key), Some(tx::rollback_first_key), 3);
    registry.register("setex", setex, Some(tx::write_first_key), Some(tx::rollback_first_key), 4);
    registry.register("psetex", psetex, Some(tx::write_first_key), Some(tx::rollback_first_key), 4);
    registry.register("getset", getset, Some(tx::write_first_key), Some(tx::rollback_first_key), 3);
    registry.register("mget", mget, Some(tx::read_all_keys), None, -2);
    registry.register("mset", mset, Some(mset_keys), Some(undo_mset), -3);
    registry.register("msetnx", msetnx, Some(mset_keys), Some(undo_mset), -3);
    registry.register("incr", incr, Some(tx::write_first_key), Some(tx::rollback_first_key), 2);
    registry.register("incrby", incrby, Some(tx::write_first_key), Some(tx::rollback_first_key), 3);
    registry.register("decr", decr, Some(tx::write_first_key), Some(tx::rollback_first_key), 2);
    registry.register("decrby", decrby, Some(tx::write_first_key), Some(tx::rollback_first_key), 3);
    registry.register(
        "incrbyfloat",
        incrbyfloat,
        Some(tx::write_first_key),
        Some(tx::rollback_first_key),
        3,
    );
    registry.register("append", append, Some(tx::write_first_key), Some(tx::rollback_first_key), 3);
    registry.register("strlen", strlen, Some(tx::read_first_key), None, 2);
    registry.register("getrange", getrange, Some(tx::read_first_key), None, 4);
    registry.register("setrange", setrange, Some(tx::write_first_key), Some(tx::rollback_first_key), 4);
}

/// Reads a key expecting a string value.
fn get_bytes(db: &Db, key: &str) -> Result<Option<Bytes>, Frame> {
    match db.with(key, |value| match value {
        Value::Bytes(data) => Ok(data.clone()),
        _ => Err(wrong_type()),
    }) {
        None => Ok(None),
        Some(Ok(data)) => Ok(Some(data)),
        Some(Err(reply)) => Err(reply),
    }
}

fn get(db: &Db, args: &[Bytes]) -> Result<Frame, CommandError> {
    let key = arg_str(&args[0]);
    Ok(match get_bytes(db, &key) {
        Ok(Some(data)) => Frame::Bulk(Some(data)),
        Ok(None) => Frame::Bulk(None),
        Err(reply) => reply,
    })
}

/// Write policy parsed from SET flags.
#[derive(PartialEq)]
enum SetPolicy {
    Upsert,
    IfAbsent,
    IfExists,
}

fn set(db: &Db, args: &[Bytes]) -> Result<Frame, CommandError> {
    let key = arg_str(&args[0]);
    let value = args[1].clone();

    let mut policy = SetPolicy::Upsert;
    let mut ttl_ms: Option<i64> = None;

    let mut rest = args[2..].iter();
    while let Some(flag) = rest.next() {
        match flag.to_ascii_uppercase().as_slice() {
            b"NX" if policy == SetPolicy::Upsert => policy = SetPolicy::IfAbsent,
            b"XX" if policy == SetPolicy::Upsert => policy = SetPolicy::IfExists,
            b"EX" | b"PX" if ttl_ms.is_none() => {
                let Some(amount) = rest.next() else {
                    return Ok(syntax_err());
                };
                let amount = match parse_int(amount) {
                    Ok(n) if n > 0 => n,
                    Ok(_) => return Ok(err("ERR invalid expire time in 'set' command")),
                    Err(reply) => return Ok(reply),
                };
                let unit = if flag.eq_ignore_ascii_case(b"EX") { 1000 } else { 1 };
                ttl_ms = Some(amount.saturating_mul(unit));
            }
            _ => return Ok(syntax_err()),
        }
    }

    let written = match policy {
        SetPolicy::Upsert => {
            db.put(key.clone(), Value::Bytes(value));
            true
        }
        SetPolicy::IfAbsent => db.put_if_absent(key.clone(), Value::Bytes(value)),
        SetPolicy::IfExists => db.put_if_exists(key.clone(), Value::Bytes(value)),
    };

    if !written {
        return Ok(Frame::Bulk(None));
    }
    db.bump_version([key.as_str()]);

    if let Some(ttl) = ttl_ms {
        let at_ms = time::unix_ms().saturating_add_signed(ttl);
        db.expire_at_ms(&key, at_ms);
        db.add_aof(vec![
            Bytes::from_static(b"SET"),
            args[0].clone(),
            args[1].clone(),
        ]);
        db.add_aof(marshal::expire_cmd(&key, at_ms));
    } else {
        // no EX/PX: the stored value carries no deadline, on the
        // NX/XX paths too, matching the logged plain SET
        db.persist(&key);
        db.add_aof(vec![
            Bytes::from_static(b"SET"),
            args[0].clone(),
            args[1].clone(),
        ]);
    }
    Ok(ok())
}

fn setnx(db: &Db, args: &[Bytes]) -> Result<Frame, CommandError> {
    let key = arg_str(&args[0]);
    let inserted = db.put_if_absent(key.clone(), Value::Bytes(args[1].clone()));
    if inserted {
        db.bump_version([key.as_str()]);
        db.add_aof(vec![
            Bytes::from_static(b"SETNX"),
            args[0].clone(),
            args[1].clone(),
        ]);
    }
    Ok(Frame::Integer(i64::from(inserted)))
}

/// Shared body of SETEX/PSETEX.
fn set_with_ttl(db: &Db, args: &[Bytes], unit_ms: i64, cmd: &str) -> Frame {
    let key = arg_str(&args[0]);
    let amount = match parse_int(&args[1]) {
        Ok(n) if n > 0 => n,
        Ok(_) => return err(format!("ERR invalid expire time in '{cmd}' command")),
        Err(reply) => return reply,
    };
    db.put(key.clone(), Value::Bytes(args[2].clone()));
    let at_ms = time::unix_ms().saturating_add_signed(amount.saturating_mul(unit_ms));
    db.expire_at_ms(&key, at_ms);
    db.bump_version([key.as_str()]);

    db.add_aof(vec![
        Bytes::from_static(b"SET"),
        args[0].clone(),
        args[2].clone(),
    ]);
    db.add_aof(marshal::expire_cmd(&key, at_ms));
    ok()
}

fn setex(db: &Db, args: &[Bytes]) -> Result<Frame, CommandError> {
    Ok(set_with_ttl(db, args, 1000, "setex"))
}

fn psetex(db: &Db, args: &[Bytes]) -> Result<Frame, CommandError> {
    Ok(set_with_ttl(db, args, 1, "psetex"))
}

fn getset(db: &Db, args: &[Bytes]) -> Result<Frame, CommandError> {
    let key = arg_str(&args[0]);
    let old = match get_bytes(db, &key) {
        Ok(old) => old,
        Err(reply) => return Ok(reply),
    };
    db.put(key.clone(), Value::Bytes(args[1].clone()));
    db.bump_version([key.as_str()]);
    db.add_aof(vec![
        Bytes::from_static(b"SET"),
        args[0].clone(),
        args[1].clone(),
    ]);
    Ok(Frame::Bulk(old))
}

fn mget(db: &Db, args: &[Bytes]) -> Result<Frame, CommandError> {
    let values = args
        .iter()
        .map(|arg| match get_bytes(db, &arg_str(arg)) {
            Ok(Some(data)) => Frame::Bulk(Some(data)),
            // missing and wrong-type keys both read as nil
            _ => Frame::Bulk(None),
        })
        .collect();
    Ok(Frame::Array(Some(values)))
}

fn mset_keys(args: &[Bytes]) -> (Vec<String>, Vec<String>) {
    (
        args.chunks(2).map(|pair| arg_str(&pair[0])).collect(),
        Vec::new(),
    )
}

fn undo_mset(db: &Db, args: &[Bytes]) -> Vec<crate::CmdLine> {
    let keys: Vec<String> = args.chunks(2).map(|pair| arg_str(&pair[0])).collect();
    tx::rollback_given_keys(db, keys.iter().map(String::as_str))
}

fn mset(db: &Db, args: &[Bytes]) -> Result<Frame, CommandError> {
    if args.len() % 2 != 0 {
        return Ok(super::arg_num_err("mset"));
    }
    for pair in args.chunks(2) {
        let key = arg_str(&pair[0]);
        db.put(key.clone(), Value::Bytes(pair[1].clone()));
        db.bump_version([key.as_str()]);
    }
    let mut line = vec![Bytes::from_static(b"MSET")];
    line.extend_from_slice(args);
    db.add_aof(line);
    Ok(ok())
}

fn msetnx(db: &Db, args: &[Bytes]) -> Result<Frame, CommandError> {
    if args.len() % 2 != 0 {
        return Ok(super::arg_num_err("msetnx"));
    }
    // all-or-nothing: any existing key vetoes the whole write
    let any_exists = args
        .chunks(2)
        .any(|pair| db.exists(&arg_str(&pair[0])));
    if any_exists {
        return Ok(Frame::Integer(0));
    }
    for pair in args.chunks(2) {
        let key = arg_str(&pair[0]);
        db.put(key.clone(), Value::Bytes(pair[1].clone()));
        db.bump_version([key.as_str()]);
    }
    let mut line = vec![Bytes::from_static(b"MSETNX")];
    line.extend_from_slice(args);
    db.add_aof(line);
    Ok(Frame::Integer(1))
}

/// Shared body of the integer increment family.
fn incr_by(db: &Db, args: &[Bytes], delta: i64, name: &'static [u8]) -> Frame {
    let key = arg_str(&args[0]);
    let current = match get_bytes(db, &key) {
        Ok(current) => current,
        Err(reply) => return reply,
    };

    let current = match current {
        None => 0,
        Some(data) => match std::str::from_utf8(&data).ok().and_then(|s| s.parse::<i64>().ok()) {
            Some(n) => n,
            None => return not_int_err(),
        },
    };
    let Some(next) = current.checked_add(delta) else {
        return err("ERR increment or decrement would overflow");
    };

    let updated = Bytes::from(next.to_string());
    // in-place update keeps the TTL, unlike put()
    let existed = db
        .with_mut(&key, |value| *value = Value::Bytes(updated.clone()))
        .is_some();
    if !existed {
        db.put(key.clone(), Value::Bytes(updated));
    }
    db.bump_version([key.as_str()]);

    let mut line = vec![Bytes::from_static(name)];
    line.extend_from_slice(args);
    db.add_aof(line);
    Frame::Integer(next)
}

fn incr(db: &Db, args: &[Bytes]) -> Result<Frame, CommandError> {
    Ok(incr_by(db, args, 1, b"INCR"))
}

fn decr(db: &Db, args: &[Bytes]) -> Result<Frame, CommandError> {
    Ok(incr_by(db, args, -1, b"DECR"))
}

fn incrby(db: &Db, args: &[Bytes]) -> Result<Frame, CommandError> {
    Ok(match parse_int(&args[1]) {
        Ok(delta) => incr_by(db, args, delta, b"INCRBY"),
        Err(reply) => reply,
    })
}

fn decrby(db: &Db, args: &[Bytes]) -> Result<Frame, CommandError> {
    Ok(match parse_int(&args[1]) {
        Ok(delta) => match delta.checked_neg() {
            Some(neg) => incr_by(db, args, neg, b"DECRBY"),
            None => err("ERR increment or decrement would overflow"),
        },
        Err(reply) => reply,
    })
}

fn incrbyfloat(db: &Db, args: &[Bytes]) -> Result<Frame, CommandError> {
    let key = arg_str(&args[0]);
    let delta = match parse_float(&args[1]) {
        Ok(delta) => delta,
        Err(reply) => return Ok(reply),
    };

    let current = match get_bytes(db, &key) {
        Ok(current) => current,
        Err(reply) => return Ok(reply),
    };
    let current = match current {
        None => 0.0,
        Some(data) => match std::str::from_utf8(&data).ok().and_then(|s| s.parse::<f64>().ok()) {
            Some(f) => f,
            None => return Ok(super::not_float_err()),
        },
    };

    let next = current + delta;
    if next.is_nan() || next.is_infinite() {
        return Ok(err("ERR increment would produce NaN or Infinity"));
    }

    let formatted = Bytes::from(super::format_float(next));
    let existed = db
        .with_mut(&key, |value| *value = Value::Bytes(formatted.clone()))
        .is_some();
    if !existed {
        db.put(key.clone(), Value::Bytes(formatted.clone()));
    }
    db.bump_version([key.as_str()]);

    // log the result, not the delta — replay must not re-accumulate
    // float rounding
    db.add_aof(vec![
        Bytes::from_static(b"SET"),
        args[0].clone(),
        formatted.clone(),
    ]);
    Ok(Frame::Bulk(Some(formatted)))
}

fn append(db: &Db, args: &[Bytes]) -> Result<Frame, CommandError> {
    let key = arg_str(&args[0]);
    let current = match get_bytes(db, &key) {
        Ok(current) => current,
        Err(reply) => return Ok(reply),
    };

    let mut combined = BytesMut::from(current.as_deref().unwrap_or_default());
    combined.extend_from_slice(&args[1]);
    let len = combined.len();
    let combined = combined.freeze();

    let existed = db
        .with_mut(&key, |value| *value = Value::Bytes(combined.clone()))
        .is_some();
    if !existed {
        db.put(key.clone(), Value::Bytes(combined));
    }
    db.bump_version([key.as_str()]);

    db.add_aof(vec![
        Bytes::from_static(b"APPEND"),
        args[0].clone(),
        args[1].clone(),
    ]);
    Ok(Frame::Integer(len as i64))
}

fn strlen(db: &Db, args: &[Bytes]) -> Result<Frame, CommandError> {
    let key = arg_str(&args[0]);
    Ok(match get_bytes(db, &key) {
        Ok(Some(data)) => Frame::Integer(data.len() as i64),
        Ok(None) => Frame::Integer(0),
        Err(reply) => reply,
    })
}

fn getrange(db: &Db, args: &[Bytes]) -> Result<Frame, CommandError> {
    let key = arg_str(&args[0]);
    let (start, stop) = match (parse_int(&args[1]), parse_int(&args[2])) {
        (Ok(s), Ok(e)) => (s, e),
        (Err(reply), _) | (_, Err(reply)) => return Ok(reply),
    };

    let data = match get_bytes(db, &key) {
        Ok(Some(data)) => data,
        Ok(None) => return Ok(Frame::bulk("")),
        Err(reply) => return Ok(reply),
    };

    let window = crate::types::resolve_range(start, stop, data.len());
    Ok(Frame::Bulk(Some(data.slice(window))))
}

fn setrange(db: &Db, args: &[Bytes]) -> Result<Frame, CommandError> {
    let key = arg_str(&args[0]);
    let offset = match parse_int(&args[1]) {
        Ok(n) if n >= 0 => n as usize,
        Ok(_) => return Ok(err("ERR offset is out of range")),
        Err(reply) => return Ok(reply),
    };
    let patch = &args[2];

    let current = match get_bytes(db, &key) {
        Ok(current) => current,
        Err(reply) => return Ok(reply),
    };

    let mut buf = BytesMut::from(current.as_deref().unwrap_or_default());
    if buf.len() < offset + patch.len() {
        buf.resize(offset + patch.len(), 0);
    }
    buf[offset..offset + patch.len()].copy_from_slice(patch);
    let len = buf.len();
    let updated = buf.freeze();

    let existed = db
        .with_mut(&key, |value| *value = Value::Bytes(updated.clone()))
        .is_some();
    if !existed {
        db.put(key.clone(), Value::Bytes(updated));
    }
    db.bump_version([key.as_str()]);

    let mut line = vec![Bytes::from_static(b"SETRANGE")];
    line.extend_from_slice(args);
    db.add_aof(line);
    Ok(Frame::Integer(len as i64))
}
