//! Sorted-set commands.

use bytes::Bytes;
use flint_protocol::Frame;

use super::tx;
use super::{arg_str, err, format_float, parse_float, parse_int, syntax_err, wrong_type};
use crate::db::Db;
use crate::registry::{CommandError, Registry};
use crate::types::{ScoreBorder, SortedSet, Value};

pub fn register(registry: &mut Registry) {
    registry.register("zadd", zadd, Some(tx::write_first_key), Some(tx::undo_zadd), -4);
    registry.register("zscore", zscore, Some(tx::read_first_key), None, 3);
    registry.register("zincrby", zincrby, Some(tx::write_first_key), Some(undo_zincrby), 4);
    registry.register("zcard", zcard, Some(tx::read_first_key), None, 2);
    registry.register("zcount", zcount, Some(tx::read_first_key), None, 4);
    registry.register("zrank", zrank, Some(tx::read_first_key), None, 3);
    registry.register("zrevrank", zrevrank, Some(tx::read_first_key), None, 3);
    registry.register("zrange", zrange, Some(tx::read_first_key), None, -4);
    registry.register("zrevrange", zrevrange, Some(tx::read_first_key), None, -4);
    registry.register("zrangebyscore", zrangebyscore, Some(tx::read_first_key), None, -4);
    registry.register("zrevrangebyscore", zrevrangebyscore, Some(tx::read_first_key), None, -4);
    registry.register("zrem", zrem, Some(tx::write_first_key), Some(tx::undo_zrem), -3);
    registry.register(
        "zremrangebyscore",
        zremrangebyscore,
        Some(tx::write_first_key),
        Some(tx::rollback_first_key),
        4,
    );
    registry.register(
        "zremrangebyrank",
        zremrangebyrank,
        Some(tx::write_first_key),
        Some(tx::rollback_first_key),
        4,
    );
}

fn with_zset<T>(db: &Db, key: &str, f: impl FnOnce(&SortedSet) -> T) -> Result<Option<T>, Frame> {
    match db.with(key, |value| match value {
        Value::ZSet(set) => Ok(f(set)),
        _ => Err(wrong_type()),
    }) {
        None => Ok(None),
        Some(Ok(t)) => Ok(Some(t)),
        Some(Err(reply)) => Err(reply),
    }
}

fn with_zset_mut<T>(
    db: &Db,
    key: &str,
    create: bool,
    f: impl FnOnce(&mut SortedSet) -> T,
) -> Result<Option<T>, Frame> {
    let mut f = Some(f);
    let attempt = db.with_mut(key, |value| match value {
        Value::ZSet(set) => Ok((f.take().expect("closure used once"))(set)),
        _ => Err(wrong_type()),
    });
    match attempt {
        Some(Ok(t)) => Ok(Some(t)),
        Some(Err(reply)) => Err(reply),
        None if !create => Ok(None),
        None => {
            db.put(key.to_owned(), Value::ZSet(SortedSet::new()));
            match db.with_mut(key, |value| match value {
                Value::ZSet(set) => (f.take().expect("closure used once"))(set),
                _ => unreachable!("zset was just installed"),
            }) {
                Some(t) => Ok(Some(t)),
                None => unreachable!("zset was just installed"),
            }
        }
    }
}

fn drop_if_empty(db: &Db, key: &str) {
    let empty = db
        .with(key, |value| matches!(value, Value::ZSet(set) if set.is_empty()))
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

/// Renders (member, score) pairs, appending scores when WITHSCORES
/// was given.
fn members_reply(pairs: Vec<(String, f64)>, with_scores: bool) -> Frame {
    let mut items = Vec::with_capacity(pairs.len() * if with_scores { 2 } else { 1 });
    for (member, score) in pairs {
        items.push(Bytes::copy_from_slice(member.as_bytes()));
        if with_scores {
            items.push(Bytes::from(format_float(score)));
        }
    }
    super::bulk_array(items)
}

fn zadd(db: &Db, args: &[Bytes]) -> Result<Frame, CommandError> {
    if (args.len() - 1) % 2 != 0 {
        return Ok(super::arg_num_err("zadd"));
    }
    let key = arg_str(&args[0]);

    // validate every score before mutating anything
    let mut pairs = Vec::with_capacity((args.len() - 1) / 2);
    for chunk in args[1..].chunks(2) {
        let score = match parse_float(&chunk[0]) {
            Ok(score) => score,
            Err(reply) => return Ok(reply),
        };
        pairs.push((score, arg_str(&chunk[1])));
    }

    let added = with_zset_mut(db, &key, true, |set| {
        pairs
            .iter()
            .filter(|(score, member)| set.add(member, *score))
            .count()
    });
    Ok(match added {
        Ok(added) => {
            db.bump_version([key.as_str()]);
            log(db, b"ZADD", args);
            Frame::Integer(added.unwrap_or(0) as i64)
        }
        Err(reply) => reply,
    })
}

fn zscore(db: &Db, args: &[Bytes]) -> Result<Frame, CommandError> {
    let key = arg_str(&args[0]);
    let member = arg_str(&args[1]);
    Ok(match with_zset(db, &key, |set| set.score(&member)) {
        Ok(Some(Some(score))) => Frame::bulk(format_float(score)),
        Ok(_) => Frame::Bulk(None),
        Err(reply) => reply,
    })
}

fn undo_zincrby(db: &Db, args: &[Bytes]) -> Vec<crate::CmdLine> {
    if args.len() < 3 {
        return Vec::new();
    }
    let key = arg_str(&args[0]);
    tx::rollback_zset_members(db, &key, std::iter::once(arg_str(&args[2])))
}

fn zincrby(db: &Db, args: &[Bytes]) -> Result<Frame, CommandError> {
    let key = arg_str(&args[0]);
    let delta = match parse_float(&args[1]) {
        Ok(delta) => delta,
        Err(reply) => return Ok(reply),
    };
    let member = arg_str(&args[2]);

    let next = with_zset_mut(db, &key, true, |set| {
        let next = set.score(&member).unwrap_or(0.0) + delta;
        set.add(&member, next);
        next
    });
    Ok(match next {
        Ok(Some(next)) => {
            db.bump_version([key.as_str()]);
            // log the absolute score so replay cannot drift
            db.add_aof(vec![
                Bytes::from_static(b"ZADD"),
                args[0].clone(),
                Bytes::from(format_float(next)),
                args[2].clone(),
            ]);
            Frame::bulk(format_float(next))
        }
        Ok(None) => unreachable!("create was requested"),
        Err(reply) => reply,
    })
}

fn zcard(db: &Db, args: &[Bytes]) -> Result<Frame, CommandError> {
    let key = arg_str(&args[0]);
    Ok(match with_zset(db, &key, SortedSet::len) {
        Ok(len) => Frame::Integer(len.unwrap_or(0)),
        Err(reply) => reply,
    })
}

fn parse_border(arg: &Bytes) -> Result<ScoreBorder, Frame> {
    ScoreBorder::parse(arg).ok_or_else(|| err("ERR min or max is not a float"))
}

fn zcount(db: &Db, args: &[Bytes]) -> Result<Frame, CommandError> {
    let key = arg_str(&args[0]);
    let (min, max) = match (parse_border(&args[1]), parse_border(&args[2])) {
        (Ok(min), Ok(max)) => (min, max),
        (Err(reply), _) | (_, Err(reply)) => return Ok(reply),
    };
    Ok(match with_zset(db, &key, |set| set.count(&min, &max)) {
        Ok(count) => Frame::Integer(count.unwrap_or(0)),
        Err(reply) => reply,
    })
}

fn rank_reply(db: &Db, args: &[Bytes], desc: bool) -> Frame {
    let key = arg_str(&args[0]);
    let member = arg_str(&args[1]);
    match with_zset(db, &key, |set| set.rank(&member, desc)) {
        Ok(Some(rank)) if rank >= 0 => Frame::Integer(rank),
        Ok(_) => Frame::Bulk(None),
        Err(reply) => reply,
    }
}

fn zrank(db: &Db, args: &[Bytes]) -> Result<Frame, CommandError> {
    Ok(rank_reply(db, args, false))
}

fn zrevrank(db: &Db, args: &[Bytes]) -> Result<Frame, CommandError> {
    Ok(rank_reply(db, args, true))
}

/// Converts inclusive, possibly-negative (start, stop) rank arguments
/// into the half-open window the container takes. `None` means the
/// window is empty.
fn rank_window(start: i64, stop: i64, size: i64) -> Option<(i64, i64)> {
    let start = if start < -size {
        0
    } else if start < 0 {
        size + start
    } else if start >= size {
        return None;
    } else {
        start
    };

    let stop = if stop < -size {
        0
    } else if stop < 0 {
        size + stop + 1
    } else if stop < size {
        stop + 1
    } else {
        size
    };

    Some((start, stop.max(start)))
}

fn range_by_rank(db: &Db, args: &[Bytes], desc: bool) -> Frame {
    let key = arg_str(&args[0]);
    let (start, stop) = match (parse_int(&args[1]), parse_int(&args[2])) {
        (Ok(s), Ok(e)) => (s, e),
        (Err(reply), _) | (_, Err(reply)) => return reply,
    };
    let with_scores = match args.get(3) {
        None => false,
        Some(flag) if flag.eq_ignore_ascii_case(b"WITHSCORES") => true,
        Some(_) => return syntax_err(),
    };

    let pairs = with_zset(db, &key, |set| {
        match rank_window(start, stop, set.len()) {
            Some((lo, hi)) => set.range(lo, hi, desc),
            None => Vec::new(),
        }
    });
    match pairs {
        Ok(pairs) => members_reply(pairs.unwrap_or_default(), with_scores),
        Err(reply) => reply,
    }
}

fn zrange(db: &Db, args: &[Bytes]) -> Result<Frame, CommandError> {
    Ok(range_by_rank(db, args, false))
}

fn zrevrange(db: &Db, args: &[Bytes]) -> Result<Frame, CommandError> {
    Ok(range_by_rank(db, args, true))
}

/// Parses the trailing `[WITHSCORES] [LIMIT offset count]` options of
/// the score-range commands.
fn parse_range_options(args: &[Bytes]) -> Result<(bool, i64, i64), Frame> {
    let mut with_scores = false;
    let mut offset = 0;
    let mut limit = -1;

    let mut rest = args.iter();
    while let Some(option) = rest.next() {
        if option.eq_ignore_ascii_case(b"WITHSCORES") {
            with_scores = true;
        } else if option.eq_ignore_ascii_case(b"LIMIT") {
            let (Some(o), Some(c)) = (rest.next(), rest.next()) else {
                return Err(err("ERR syntax error in LIMIT clause"));
            };
            offset = parse_int(o)?;
            limit = parse_int(c)?;
        } else {
            return Err(syntax_err());
        }
    }
    Ok((with_scores, offset, limit))
}

fn range_by_score(db: &Db, args: &[Bytes], desc: bool) -> Frame {
    let key = arg_str(&args[0]);
    // the reversed form takes its borders as (max, min)
    let (first, second) = (&args[1], &args[2]);
    let (min, max) = if desc {
        match (parse_border(second), parse_border(first)) {
            (Ok(min), Ok(max)) => (min, max),
            (Err(reply), _) | (_, Err(reply)) => return reply,
        }
    } else {
        match (parse_border(first), parse_border(second)) {
            (Ok(min), Ok(max)) => (min, max),
            (Err(reply), _) | (_, Err(reply)) => return reply,
        }
    };

    let (with_scores, offset, limit) = match parse_range_options(&args[3..]) {
        Ok(options) => options,
        Err(reply) => return reply,
    };

    let pairs = with_zset(db, &key, |set| {
        set.range_by_score(&min, &max, offset, limit, desc)
    });
    match pairs {
        Ok(pairs) => members_reply(pairs.unwrap_or_default(), with_scores),
        Err(reply) => reply,
    }
}

fn zrangebyscore(db: &Db, args: &[Bytes]) -> Result<Frame, CommandError> {
    Ok(range_by_score(db, args, false))
}

fn zrevrangebyscore(db: &Db, args: &[Bytes]) -> Result<Frame, CommandError> {
    Ok(range_by_score(db, args, true))
}

fn zrem(db: &Db, args: &[Bytes]) -> Result<Frame, CommandError> {
    let key = arg_str(&args[0]);
    let removed = with_zset_mut(db, &key, false, |set| {
        args[1..]
            .iter()
            .filter(|member| set.remove(&arg_str(member)))
            .count()
    });
    Ok(match removed {
        Ok(Some(removed)) if removed > 0 => {
            drop_if_empty(db, &key);
            db.bump_version([key.as_str()]);
            log(db, b"ZREM", args);
            Frame::Integer(removed as i64)
        }
        Ok(_) => Frame::Integer(0),
        Err(reply) => reply,
    })
}

fn zremrangebyscore(db: &Db, args: &[Bytes]) -> Result<Frame, CommandError> {
    let key = arg_str(&args[0]);
    let (min, max) = match (parse_border(&args[1]), parse_border(&args[2])) {
        (Ok(min), Ok(max)) => (min, max),
        (Err(reply), _) | (_, Err(reply)) => return Ok(reply),
    };

    let removed = with_zset_mut(db, &key, false, |set| set.remove_by_score(&min, &max));
    Ok(match removed {
        Ok(Some(removed)) if removed > 0 => {
            drop_if_empty(db, &key);
            db.bump_version([key.as_str()]);
            log(db, b"ZREMRANGEBYSCORE", args);
            Frame::Integer(removed)
        }
        Ok(_) => Frame::Integer(0),
        Err(reply) => reply,
    })
}

fn zremrangebyrank(db: &Db, args: &[Bytes]) -> Result<Frame, CommandError> {
    let key = arg_str(&args[0]);
    let (start, stop) = match (parse_int(&args[1]), parse_int(&args[2])) {
        (Ok(s), Ok(e)) => (s, e),
        (Err(reply), _) | (_, Err(reply)) => return Ok(reply),
    };

    let removed = with_zset_mut(db, &key, false, |set| {
        match rank_window(start, stop, set.len()) {
            Some((lo, hi)) => set.remove_by_rank(lo, hi),
            None => 0,
        }
    });
    Ok(match removed {
        Ok(Some(removed)) if removed > 0 => {
            drop_if_empty(db, &key);
            db.bump_version([key.as_str()]);
            log(db, b"ZREMRANGEBYRANK", args);
            Frame::Integer(removed)
        }
        Ok(_) => Frame::Integer(0),
        Err(reply) => reply,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cmd_line;

    fn texts(frame: Frame) -> Vec<String> {
        match frame {
            Frame::Array(Some(items)) => items
                .into_iter()
                .map(|f| match f {
                    Frame::Bulk(Some(b)) => String::from_utf8_lossy(&b).into_owned(),
                    other => panic!("expected bulk, got {other:?}"),
                })
                .collect(),
            other => panic!("expected array, got {other:?}"),
        }
    }

    #[test]
    fn zadd_counts_new_members_only() {
        let db = Db::new(0);
        assert_eq!(
            zadd(&db, &cmd_line(&["z", "1", "a", "2", "b"])).unwrap(),
            Frame::Integer(2)
        );
        assert_eq!(
            zadd(&db, &cmd_line(&["z", "9", "a", "3", "c"])).unwrap(),
            Frame::Integer(1)
        );
        assert_eq!(
            zscore(&db, &cmd_line(&["z", "a"])).unwrap(),
            Frame::bulk("9")
        );
    }

    #[test]
    fn zadd_rejects_bad_score_without_mutating() {
        let db = Db::new(0);
        assert!(zadd(&db, &cmd_line(&["z", "1", "a", "junk", "b"]))
            .unwrap()
            .is_error());
        assert!(!db.exists("z"));
    }

    #[test]
    fn zscore_missing_is_null() {
        let db = Db::new(0);
        assert_eq!(
            zscore(&db, &cmd_line(&["ghost", "m"])).unwrap(),
            Frame::Bulk(None)
        );
        zadd(&db, &cmd_line(&["z", "1", "a"])).unwrap();
        assert_eq!(
            zscore(&db, &cmd_line(&["z", "nope"])).unwrap(),
            Frame::Bulk(None)
        );
    }

    #[test]
    fn zincrby_accumulates() {
        let db = Db::new(0);
        assert_eq!(
            zincrby(&db, &cmd_line(&["z", "2.5", "m"])).unwrap(),
            Frame::bulk("2.5")
        );
        assert_eq!(
            zincrby(&db, &cmd_line(&["z", "0.5", "m"])).unwrap(),
            Frame::bulk("3")
        );
    }

    #[test]
    fn rank_both_directions() {
        let db = Db::new(0);
        zadd(&db, &cmd_line(&["z", "1", "a", "2", "b", "3", "c"])).unwrap();
        assert_eq!(zrank(&db, &cmd_line(&["z", "a"])).unwrap(), Frame::Integer(0));
        assert_eq!(zrevrank(&db, &cmd_line(&["z", "a"])).unwrap(), Frame::Integer(2));
        assert_eq!(
            zrank(&db, &cmd_line(&["z", "ghost"])).unwrap(),
            Frame::Bulk(None)
        );
    }

    #[test]
    fn zrange_with_scores_and_ties() {
        let db = Db::new(0);
        zadd(&db, &cmd_line(&["z", "1", "a", "2", "b", "2", "c"])).unwrap();
        assert_eq!(
            texts(zrange(&db, &cmd_line(&["z", "0", "-1", "WITHSCORES"])).unwrap()),
            vec!["a", "1", "b", "2", "c", "2"]
        );
        assert_eq!(
            texts(zrevrange(&db, &cmd_line(&["z", "0", "0"])).unwrap()),
            vec!["c"]
        );
    }

    #[test]
    fn zrange_window_clamping() {
        let db = Db::new(0);
        zadd(&db, &cmd_line(&["z", "1", "a", "2", "b", "3", "c"])).unwrap();
        assert_eq!(
            texts(zrange(&db, &cmd_line(&["z", "-2", "-1"])).unwrap()),
            vec!["b", "c"]
        );
        assert_eq!(
            texts(zrange(&db, &cmd_line(&["z", "5", "9"])).unwrap()),
            Vec::<String>::new()
        );
        assert_eq!(
            texts(zrange(&db, &cmd_line(&["z", "0", "99"])).unwrap()),
            vec!["a", "b", "c"]
        );
    }

    #[test]
    fn zcount_and_zcard() {
        let db = Db::new(0);
        zadd(&db, &cmd_line(&["z", "1", "a", "2", "b", "3", "c"])).unwrap();
        assert_eq!(zcard(&db, &cmd_line(&["z"])).unwrap(), Frame::Integer(3));
        assert_eq!(
            zcount(&db, &cmd_line(&["z", "2", "+inf"])).unwrap(),
            Frame::Integer(2)
        );
        assert_eq!(
            zcount(&db, &cmd_line(&["z", "(1", "3"])).unwrap(),
            Frame::Integer(2)
        );
    }

    #[test]
    fn zrangebyscore_with_limit() {
        let db = Db::new(0);
        zadd(&db, &cmd_line(&["z", "1", "a", "2", "b", "3", "c", "4", "d"])).unwrap();
        assert_eq!(
            texts(zrangebyscore(&db, &cmd_line(&["z", "2", "+inf", "LIMIT", "1", "2"])).unwrap()),
            vec!["c", "d"]
        );
        // reversed form takes (max, min)
        assert_eq!(
            texts(zrevrangebyscore(&db, &cmd_line(&["z", "3", "1"])).unwrap()),
            vec!["c", "b", "a"]
        );
    }

    #[test]
    fn zrem_and_remrange() {
        let db = Db::new(0);
        zadd(&db, &cmd_line(&["z", "1", "a", "2", "b", "3", "c"])).unwrap();
        assert_eq!(
            zrem(&db, &cmd_line(&["z", "a", "ghost"])).unwrap(),
            Frame::Integer(1)
        );
        assert_eq!(
            zremrangebyscore(&db, &cmd_line(&["z", "2", "2"])).unwrap(),
            Frame::Integer(1)
        );
        assert_eq!(
            zremrangebyrank(&db, &cmd_line(&["z", "0", "-1"])).unwrap(),
            Frame::Integer(1)
        );
        // everything is gone, so the key is too
        assert!(!db.exists("z"));
    }

    #[test]
    fn wrong_type_rejected() {
        let db = Db::new(0);
        db.put("s".into(), Value::Bytes(Bytes::from("x")));
        assert!(zadd(&db, &cmd_line(&["s", "1", "a"])).unwrap().is_error());
        assert!(zrange(&db, &cmd_line(&["s", "0", "-1"])).unwrap().is_error());
    }
}
