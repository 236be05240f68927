//! List commands.

use bytes::Bytes;
use flint_protocol::Frame;

use super::tx;
use super::{arg_str, err, parse_int, wrong_type};
use crate::db::Db;
use crate::registry::{CommandError, Registry};
use crate::types::{resolve_index, resolve_range, List, Value};

pub fn register(registry: &mut Registry) {
    registry.register("lpush", lpush, Some(tx::write_first_key), Some(tx::rollback_first_key), -3);
    registry.register("lpushx", lpushx, Some(tx::write_first_key), Some(tx::rollback_first_key), -3);
    registry.register("rpush", rpush, Some(tx::write_first_key), Some(tx::rollback_first_key), -3);
    registry.register("rpushx", rpushx, Some(tx::write_first_key), Some(tx::rollback_first_key), -3);
    registry.register("lpop", lpop, Some(tx::write_first_key), Some(tx::rollback_first_key), 2);
    registry.register("rpop", rpop, Some(tx::write_first_key), Some(tx::rollback_first_key), 2);
    registry.register("rpoplpush", rpoplpush, Some(rpoplpush_keys), Some(undo_rpoplpush), 3);
    registry.register("lrem", lrem, Some(tx::write_first_key), Some(tx::rollback_first_key), 4);
    registry.register("llen", llen, Some(tx::read_first_key), None, 2);
    registry.register("lindex", lindex, Some(tx::read_first_key), None, 3);
    registry.register("lset", lset, Some(tx::write_first_key), Some(tx::rollback_first_key), 4);
    registry.register("lrange", lrange, Some(tx::read_first_key), None, 4);
}

/// Reads a key expecting a list. `Ok(None)` means absent.
fn with_list<T>(db: &Db, key: &str, f: impl FnOnce(&List) -> T) -> Result<Option<T>, Frame> {
    match db.with(key, |value| match value {
        Value::List(list) => Ok(f(list)),
        _ => Err(wrong_type()),
    }) {
        None => Ok(None),
        Some(Ok(t)) => Ok(Some(t)),
        Some(Err(reply)) => Err(reply),
    }
}

/// Mutates the list at `key`, creating it when `create` is set.
/// `Ok(None)` means the key was absent and creation was not requested.
fn with_list_mut<T>(
    db: &Db,
    key: &str,
    create: bool,
    f: impl FnOnce(&mut List) -> T,
) -> Result<Option<T>, Frame> {
    let mut f = Some(f);
    let attempt = db.with_mut(key, |value| match value {
        Value::List(list) => Ok((f.take().expect("closure used once"))(list)),
        _ => Err(wrong_type()),
    });
    match attempt {
        Some(Ok(t)) => Ok(Some(t)),
        Some(Err(reply)) => Err(reply),
        None if !create => Ok(None),
        None => {
            db.put(key.to_owned(), Value::List(List::new()));
            match db.with_mut(key, |value| match value {
                Value::List(list) => (f.take().expect("closure used once"))(list),
                _ => unreachable!("list was just installed"),
            }) {
                Some(t) => Ok(Some(t)),
                None => unreachable!("list was just installed"),
            }
        }
    }
}

/// Drops a list key once its last element is gone.
fn drop_if_empty(db: &Db, key: &str) {
    let empty = db
        .with(key, |value| matches!(value, Value::List(list) if list.is_empty()))
        .unwrap_or(false);
    if empty {
        db.remove(key);
    }
}

fn push(db: &Db, args: &[Bytes], front: bool, require_exists: bool, name: &'static [u8]) -> Frame {
    let key = arg_str(&args[0]);
    let result = with_list_mut(db, &key, !require_exists, |list| {
        for value in &args[1..] {
            if front {
                list.push_front(value.clone());
            } else {
                list.push_back(value.clone());
            }
        }
        list.len()
    });
    match result {
        Ok(Some(len)) => {
            db.bump_version([key.as_str()]);
            let mut line = vec![Bytes::from_static(name)];
            line.extend_from_slice(args);
            db.add_aof(line);
            Frame::Integer(len as i64)
        }
        Ok(None) => Frame::Integer(0),
        Err(reply) => reply,
    }
}

fn lpush(db: &Db, args: &[Bytes]) -> Result<Frame, CommandError> {
    Ok(push(db, args, true, false, b"LPUSH"))
}

fn lpushx(db: &Db, args: &[Bytes]) -> Result<Frame, CommandError> {
    Ok(push(db, args, true, true, b"LPUSHX"))
}

fn rpush(db: &Db, args: &[Bytes]) -> Result<Frame, CommandError> {
    Ok(push(db, args, false, false, b"RPUSH"))
}

fn rpushx(db: &Db, args: &[Bytes]) -> Result<Frame, CommandError> {
    Ok(push(db, args, false, true, b"RPUSHX"))
}

fn pop(db: &Db, args: &[Bytes], front: bool, name: &'static [u8]) -> Frame {
    let key = arg_str(&args[0]);
    let result = with_list_mut(db, &key, false, |list| {
        if front {
            list.pop_front()
        } else {
            list.pop_back()
        }
    });
    match result {
        Ok(Some(Some(value))) => {
            drop_if_empty(db, &key);
            db.bump_version([key.as_str()]);
            let mut line = vec![Bytes::from_static(name)];
            line.extend_from_slice(args);
            db.add_aof(line);
            Frame::Bulk(Some(value))
        }
        Ok(_) => Frame::Bulk(None),
        Err(reply) => reply,
    }
}

fn lpop(db: &Db, args: &[Bytes]) -> Result<Frame, CommandError> {
    Ok(pop(db, args, true, b"LPOP"))
}

fn rpop(db: &Db, args: &[Bytes]) -> Result<Frame, CommandError> {
    Ok(pop(db, args, false, b"RPOP"))
}

fn rpoplpush_keys(args: &[Bytes]) -> (Vec<String>, Vec<String>) {
    if args.len() < 2 {
        return (Vec::new(), Vec::new());
    }
    (vec![arg_str(&args[0]), arg_str(&args[1])], Vec::new())
}

fn undo_rpoplpush(db: &Db, args: &[Bytes]) -> Vec<crate::CmdLine> {
    if args.len() < 2 {
        return Vec::new();
    }
    let src = arg_str(&args[0]);
    let dest = arg_str(&args[1]);
    tx::rollback_given_keys(db, [src.as_str(), dest.as_str()])
}

fn rpoplpush(db: &Db, args: &[Bytes]) -> Result<Frame, CommandError> {
    let src = arg_str(&args[0]);
    let dest = arg_str(&args[1]);

    // both keys must be lists (or absent) before anything moves
    if let Err(reply) = with_list(db, &dest, |_| ()) {
        return Ok(reply);
    }
    let popped = match with_list_mut(db, &src, false, List::pop_back) {
        Ok(Some(Some(value))) => value,
        Ok(_) => return Ok(Frame::Bulk(None)),
        Err(reply) => return Ok(reply),
    };

    match with_list_mut(db, &dest, true, |list| list.push_front(popped.clone())) {
        Ok(_) => {}
        Err(reply) => return Ok(reply),
    }
    drop_if_empty(db, &src);
    db.bump_version([src.as_str(), dest.as_str()]);

    let mut line = vec![Bytes::from_static(b"RPOPLPUSH")];
    line.extend_from_slice(args);
    db.add_aof(line);
    Ok(Frame::Bulk(Some(popped)))
}

fn lrem(db: &Db, args: &[Bytes]) -> Result<Frame, CommandError> {
    let key = arg_str(&args[0]);
    let count = match parse_int(&args[1]) {
        Ok(n) => n,
        Err(reply) => return Ok(reply),
    };
    let target = args[2].clone();

    let removed = match with_list_mut(db, &key, false, |list| list.remove_by_value(&target, count))
    {
        Ok(Some(removed)) => removed,
        Ok(None) => 0,
        Err(reply) => return Ok(reply),
    };

    if removed > 0 {
        drop_if_empty(db, &key);
        db.bump_version([key.as_str()]);
        let mut line = vec![Bytes::from_static(b"LREM")];
        line.extend_from_slice(args);
        db.add_aof(line);
    }
    Ok(Frame::Integer(removed as i64))
}

fn llen(db: &Db, args: &[Bytes]) -> Result<Frame, CommandError> {
    let key = arg_str(&args[0]);
    Ok(match with_list(db, &key, List::len) {
        Ok(len) => Frame::Integer(len.unwrap_or(0) as i64),
        Err(reply) => reply,
    })
}

fn lindex(db: &Db, args: &[Bytes]) -> Result<Frame, CommandError> {
    let key = arg_str(&args[0]);
    let index = match parse_int(&args[1]) {
        Ok(n) => n,
        Err(reply) => return Ok(reply),
    };

    let found = with_list(db, &key, |list| {
        resolve_index(index, list.len()).and_then(|i| list.get(i).cloned())
    });
    Ok(match found {
        Ok(Some(Some(value))) => Frame::Bulk(Some(value)),
        Ok(_) => Frame::Bulk(None),
        Err(reply) => reply,
    })
}

fn lset(db: &Db, args: &[Bytes]) -> Result<Frame, CommandError> {
    let key = arg_str(&args[0]);
    let index = match parse_int(&args[1]) {
        Ok(n) => n,
        Err(reply) => return Ok(reply),
    };
    let value = args[2].clone();

    let outcome = with_list_mut(db, &key, false, |list| {
        match resolve_index(index, list.len()) {
            Some(i) => list.set(i, value.clone()),
            None => false,
        }
    });
    Ok(match outcome {
        Ok(None) => err("ERR no such key"),
        Ok(Some(false)) => err("ERR index out of range"),
        Ok(Some(true)) => {
            db.bump_version([key.as_str()]);
            let mut line = vec![Bytes::from_static(b"LSET")];
            line.extend_from_slice(args);
            db.add_aof(line);
            super::ok()
        }
        Err(reply) => reply,
    })
}

fn lrange(db: &Db, args: &[Bytes]) -> Result<Frame, CommandError> {
    let key = arg_str(&args[0]);
    let (start, stop) = match (parse_int(&args[1]), parse_int(&args[2])) {
        (Ok(s), Ok(e)) => (s, e),
        (Err(reply), _) | (_, Err(reply)) => return Ok(reply),
    };

    let items = with_list(db, &key, |list| {
        list.range(resolve_range(start, stop, list.len()))
    });
    Ok(match items {
        Ok(items) => super::bulk_array(items.unwrap_or_default()),
        Err(reply) => reply,
    })
}
