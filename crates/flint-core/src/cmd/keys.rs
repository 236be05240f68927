//! Generic key commands: existence, expiry, rename, TYPE, KEYS.

use bytes::Bytes;
use flint_protocol::Frame;

use super::tx;
use super::{arg_num_err, arg_str, err, ok, parse_int};
use crate::db::Db;
use crate::registry::{CommandError, Registry};
use crate::time;
use crate::types::Value;

pub fn register(registry: &mut Registry) {
    registry.register("ping", ping, None, None, -1);
    registry.register("del", del, Some(tx::write_all_keys), Some(tx::rollback_all_keys), -2);
    registry.register("exists", exists, Some(tx::read_all_keys), None, -2);
    registry.register("type", type_of, Some(tx::read_first_key), None, 2);
    registry.register("keys", keys, None, None, 2);
    registry.register("rename", rename, Some(tx::rename_keys), Some(tx::rollback_rename), 3);
    registry.register("renamenx", renamenx, Some(tx::rename_keys), Some(tx::rollback_rename), 3);
    registry.register("expire", expire, Some(tx::write_first_key), Some(tx::undo_expire), 3);
    registry.register("expireat", expireat, Some(tx::write_first_key), Some(tx::undo_expire), 3);
    registry.register("pexpire", pexpire, Some(tx::write_first_key), Some(tx::undo_expire), 3);
    registry.register("pexpireat", pexpireat, Some(tx::write_first_key), Some(tx::undo_expire), 3);
    registry.register("ttl", ttl, Some(tx::read_first_key), None, 2);
    registry.register("pttl", pttl, Some(tx::read_first_key), None, 2);
    registry.register("persist", persist, Some(tx::write_first_key), Some(tx::undo_expire), 2);
    registry.register("flushdb", flushdb, None, None, -1);
}

fn line_with(name: &'static [u8], args: &[Bytes]) -> crate::CmdLine {
    let mut line = Vec::with_capacity(1 + args.len());
    line.push(Bytes::from_static(name));
    line.extend_from_slice(args);
    line
}

fn ping(_db: &Db, args: &[Bytes]) -> Result<Frame, CommandError> {
    Ok(match args {
        [] => Frame::Simple("PONG".into()),
        [msg] => Frame::Bulk(Some(msg.clone())),
        _ => arg_num_err("ping"),
    })
}

fn del(db: &Db, args: &[Bytes]) -> Result<Frame, CommandError> {
    let mut deleted = 0i64;
    for key in args.iter().map(arg_str) {
        if db.remove(&key) {
            db.bump_version([key.as_str()]);
            deleted += 1;
        }
    }
    if deleted > 0 {
        db.add_aof(line_with(b"DEL", args));
    }
    Ok(Frame::Integer(deleted))
}

fn exists(db: &Db, args: &[Bytes]) -> Result<Frame, CommandError> {
    let count = args.iter().filter(|arg| db.exists(&arg_str(arg))).count();
    Ok(Frame::Integer(count as i64))
}

fn type_of(db: &Db, args: &[Bytes]) -> Result<Frame, CommandError> {
    let key = arg_str(&args[0]);
    let name = db
        .with(&key, Value::type_name)
        .unwrap_or("none");
    Ok(Frame::Simple(name.into()))
}

fn keys(db: &Db, args: &[Bytes]) -> Result<Frame, CommandError> {
    let pattern = arg_str(&args[0]);
    let mut matched = Vec::new();
    db.for_each(|key, _, _| {
        if glob_match(pattern.as_bytes(), key.as_bytes()) {
            matched.push(Bytes::copy_from_slice(key.as_bytes()));
        }
        true
    });
    Ok(super::bulk_array(matched))
}

fn rename(db: &Db, args: &[Bytes]) -> Result<Frame, CommandError> {
    let src = arg_str(&args[0]);
    let dest = arg_str(&args[1]);

    if src == dest {
        return Ok(if db.exists(&src) {
            ok()
        } else {
            err("ERR no such key")
        });
    }
    let Some(value) = db.get_entity(&src) else {
        return Ok(err("ERR no such key"));
    };
    let deadline = db.ttl_ms(&src);

    // destination is overwritten; the source's TTL moves with the value
    db.put(dest.clone(), value);
    db.remove(&src);
    if let Some(at_ms) = deadline {
        db.expire_at_ms(&dest, at_ms);
    }
    db.bump_version([src.as_str(), dest.as_str()]);
    db.add_aof(line_with(b"RENAME", args));
    Ok(ok())
}

fn renamenx(db: &Db, args: &[Bytes]) -> Result<Frame, CommandError> {
    let src = arg_str(&args[0]);
    let dest = arg_str(&args[1]);

    if db.exists(&dest) {
        return Ok(Frame::Integer(0));
    }
    let Some(value) = db.get_entity(&src) else {
        return Ok(err("ERR no such key"));
    };
    let deadline = db.ttl_ms(&src);

    db.put(dest.clone(), value);
    db.remove(&src);
    if let Some(at_ms) = deadline {
        db.expire_at_ms(&dest, at_ms);
    }
    db.bump_version([src.as_str(), dest.as_str()]);
    db.add_aof(line_with(b"RENAMENX", args));
    Ok(Frame::Integer(1))
}

/// Shared body of the expire family: computes the absolute deadline,
/// arms it, and logs the normalised `PEXPIREAT` so replay after a
/// restart keeps the original deadline.
fn expire_to(db: &Db, key: &str, at_ms: u64) -> Frame {
    if !db.exists(key) {
        return Frame::Integer(0);
    }
    db.expire_at_ms(key, at_ms);
    db.bump_version([key]);
    db.add_aof(super::marshal::expire_cmd(key, at_ms));
    Frame::Integer(1)
}

fn expire(db: &Db, args: &[Bytes]) -> Result<Frame, CommandError> {
    let key = arg_str(&args[0]);
    let seconds = match parse_int(&args[1]) {
        Ok(n) => n,
        Err(reply) => return Ok(reply),
    };
    let at_ms = time::unix_ms().saturating_add_signed(seconds.saturating_mul(1000));
    Ok(expire_to(db, &key, at_ms))
}

fn expireat(db: &Db, args: &[Bytes]) -> Result<Frame, CommandError> {
    let key = arg_str(&args[0]);
    let at_secs = match parse_int(&args[1]) {
        Ok(n) => n,
        Err(reply) => return Ok(reply),
    };
    Ok(expire_to(db, &key, (at_secs.max(0) as u64).saturating_mul(1000)))
}

fn pexpire(db: &Db, args: &[Bytes]) -> Result<Frame, CommandError> {
    let key = arg_str(&args[0]);
    let millis = match parse_int(&args[1]) {
        Ok(n) => n,
        Err(reply) => return Ok(reply),
    };
    let at_ms = time::unix_ms().saturating_add_signed(millis);
    Ok(expire_to(db, &key, at_ms))
}

fn pexpireat(db: &Db, args: &[Bytes]) -> Result<Frame, CommandError> {
    let key = arg_str(&args[0]);
    let at_ms = match parse_int(&args[1]) {
        Ok(n) => n,
        Err(reply) => return Ok(reply),
    };
    Ok(expire_to(db, &key, at_ms.max(0) as u64))
}

fn ttl(db: &Db, args: &[Bytes]) -> Result<Frame, CommandError> {
    let key = arg_str(&args[0]);
    if !db.exists(&key) {
        return Ok(Frame::Integer(-2));
    }
    Ok(match db.ttl_ms(&key) {
        None => Frame::Integer(-1),
        Some(at_ms) => Frame::Integer((time::remaining_ms(at_ms) / 1000) as i64),
    })
}

fn pttl(db: &Db, args: &[Bytes]) -> Result<Frame, CommandError> {
    let key = arg_str(&args[0]);
    if !db.exists(&key) {
        return Ok(Frame::Integer(-2));
    }
    Ok(match db.ttl_ms(&key) {
        None => Frame::Integer(-1),
        Some(at_ms) => Frame::Integer(time::remaining_ms(at_ms) as i64),
    })
}

fn persist(db: &Db, args: &[Bytes]) -> Result<Frame, CommandError> {
    let key = arg_str(&args[0]);
    if !db.exists(&key) {
        return Ok(Frame::Integer(0));
    }
    if !db.persist(&key) {
        return Ok(Frame::Integer(0));
    }
    db.bump_version([key.as_str()]);
    db.add_aof(line_with(b"PERSIST", args));
    Ok(Frame::Integer(1))
}

fn flushdb(db: &Db, args: &[Bytes]) -> Result<Frame, CommandError> {
    db.flush();
    db.add_aof(line_with(b"FLUSHDB", args));
    Ok(ok())
}

/// Glob matcher for KEYS patterns: `*` (any run), `?` (any one byte),
/// `[abc]` / `[a-c]` character classes, `\x` literal escape.
fn glob_match(pattern: &[u8], text: &[u8]) -> bool {
    match pattern.split_first() {
        None => text.is_empty(),
        Some((b'*', rest)) => {
            // try every split point, shortest first
            (0..=text.len()).any(|skip| glob_match(rest, &text[skip..]))
        }
        Some((b'?', rest)) => !text.is_empty() && glob_match(rest, &text[1..]),
        Some((b'[', rest)) => {
            let Some(end) = rest.iter().position(|&b| b == b']') else {
                // unterminated class matches literally
                return text.first() == Some(&b'[') && glob_match(rest, &text[1..]);
            };
            let (class, tail) = (&rest[..end], &rest[end + 1..]);
            let Some((&first, remaining_text)) = text.split_first() else {
                return false;
            };
            class_contains(class, first) && glob_match(tail, remaining_text)
        }
        Some((b'\\', rest)) if !rest.is_empty() => {
            text.first() == Some(&rest[0]) && glob_match(&rest[1..], &text[1..])
        }
        Some((&literal, rest)) => {
            text.first() == Some(&literal) && glob_match(rest, &text[1..])
        }
    }
}

fn class_contains(class: &[u8], byte: u8) -> bool {
    let mut i = 0;
    while i < class.len() {
        if i + 2 < class.len() && class[i + 1] == b'-' {
            if class[i] <= byte && byte <= class[i + 2] {
                return true;
            }
            i += 3;
        } else {
            if class[i] == byte {
                return true;
            }
            i += 1;
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cmd_line;
    use crate::time::unix_ms;

    fn bytes_value(s: &str) -> Value {
        Value::Bytes(Bytes::copy_from_slice(s.as_bytes()))
    }

    #[test]
    fn glob_patterns() {
        assert!(glob_match(b"*", b"anything"));
        assert!(glob_match(b"user:*", b"user:42"));
        assert!(!glob_match(b"user:*", b"session:42"));
        assert!(glob_match(b"h?llo", b"hello"));
        assert!(glob_match(b"h?llo", b"hallo"));
        assert!(!glob_match(b"h?llo", b"hllo"));
        assert!(glob_match(b"h[ae]llo", b"hallo"));
        assert!(!glob_match(b"h[ae]llo", b"hillo"));
        assert!(glob_match(b"k[0-9]", b"k7"));
        assert!(glob_match(b"a\\*b", b"a*b"));
        assert!(!glob_match(b"a\\*b", b"aXb"));
        assert!(glob_match(b"", b""));
        assert!(!glob_match(b"", b"x"));
    }

    #[test]
    fn del_counts_and_logs() {
        let db = Db::new(0);
        db.put("a".into(), bytes_value("1"));
        db.put("b".into(), bytes_value("2"));
        let reply = del(&db, &cmd_line(&["a", "b", "ghost"])).unwrap();
        assert_eq!(reply, Frame::Integer(2));
        assert!(!db.exists("a"));
    }

    #[test]
    fn type_reports_kind_or_none() {
        let db = Db::new(0);
        db.put("s".into(), bytes_value("x"));
        assert_eq!(
            type_of(&db, &cmd_line(&["s"])).unwrap(),
            Frame::Simple("string".into())
        );
        assert_eq!(
            type_of(&db, &cmd_line(&["nope"])).unwrap(),
            Frame::Simple("none".into())
        );
    }

    #[test]
    fn rename_moves_value_and_ttl() {
        let db = Db::new(0);
        db.put("src".into(), bytes_value("v"));
        let deadline = unix_ms() + 60_000;
        db.expire_at_ms("src", deadline);
        // destination has its own ttl that must not survive the overwrite
        db.put("dest".into(), bytes_value("old"));
        db.expire_at_ms("dest", unix_ms() + 5_000);

        assert_eq!(rename(&db, &cmd_line(&["src", "dest"])).unwrap(), ok());
        assert!(!db.exists("src"));
        assert!(matches!(db.get_entity("dest"), Some(Value::Bytes(b)) if b == "v"));
        assert_eq!(db.ttl_ms("dest"), Some(deadline));
    }

    #[test]
    fn rename_missing_source_errors() {
        let db = Db::new(0);
        assert!(rename(&db, &cmd_line(&["nope", "dest"])).unwrap().is_error());
    }

    #[test]
    fn renamenx_refuses_existing_dest() {
        let db = Db::new(0);
        db.put("src".into(), bytes_value("v"));
        db.put("dest".into(), bytes_value("w"));
        assert_eq!(
            renamenx(&db, &cmd_line(&["src", "dest"])).unwrap(),
            Frame::Integer(0)
        );
        assert!(db.exists("src"));
    }

    #[test]
    fn expire_past_deadline_kills_key() {
        let db = Db::new(0);
        db.put("k".into(), bytes_value("v"));
        assert_eq!(
            pexpire(&db, &cmd_line(&["k", "0"])).unwrap(),
            Frame::Integer(1)
        );
        assert!(!db.exists("k"));
    }

    #[test]
    fn expire_missing_key_is_zero() {
        let db = Db::new(0);
        assert_eq!(
            expire(&db, &cmd_line(&["ghost", "10"])).unwrap(),
            Frame::Integer(0)
        );
    }

    #[test]
    fn ttl_reports_all_three_states() {
        let db = Db::new(0);
        assert_eq!(ttl(&db, &cmd_line(&["ghost"])).unwrap(), Frame::Integer(-2));

        db.put("k".into(), bytes_value("v"));
        assert_eq!(ttl(&db, &cmd_line(&["k"])).unwrap(), Frame::Integer(-1));

        db.expire_at_ms("k", unix_ms() + 10_000);
        match ttl(&db, &cmd_line(&["k"])).unwrap() {
            Frame::Integer(secs) => assert!((8..=10).contains(&secs)),
            other => panic!("expected integer, got {other:?}"),
        }
    }

    #[test]
    fn persist_strips_ttl_once() {
        let db = Db::new(0);
        db.put("k".into(), bytes_value("v"));
        db.expire_at_ms("k", unix_ms() + 10_000);
        assert_eq!(persist(&db, &cmd_line(&["k"])).unwrap(), Frame::Integer(1));
        assert_eq!(persist(&db, &cmd_line(&["k"])).unwrap(), Frame::Integer(0));
        assert_eq!(db.ttl_ms("k"), None);
    }

    #[test]
    fn keys_filters_by_pattern() {
        let db = Db::new(0);
        db.put("user:1".into(), bytes_value("a"));
        db.put("user:2".into(), bytes_value("b"));
        db.put("other".into(), bytes_value("c"));

        match keys(&db, &cmd_line(&["user:*"])).unwrap() {
            Frame::Array(Some(items)) => assert_eq!(items.len(), 2),
            other => panic!("expected array, got {other:?}"),
        }
    }
}
