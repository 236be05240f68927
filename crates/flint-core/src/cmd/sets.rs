//! Set commands.

use std::collections::HashSet;

use bytes::Bytes;
use flint_protocol::Frame;
use rand::prelude::IteratorRandom;
use rand::Rng;

use super::tx;
use super::{arg_str, parse_int, wrong_type};
use crate::db::Db;
use crate::registry::{CommandError, Registry};
use crate::types::Value;

type Set = HashSet<String>;

pub fn register(registry: &mut Registry) {
    registry.register("sadd", sadd, Some(tx::write_first_key), Some(tx::undo_set_members), -3);
    registry.register("srem", srem, Some(tx::write_first_key), Some(tx::undo_set_members), -3);
    registry.register("sismember", sismember, Some(tx::read_first_key), None, 3);
    registry.register("scard", scard, Some(tx::read_first_key), None, 2);
    registry.register("smembers", smembers, Some(tx::read_first_key), None, 2);
    registry.register("srandmember", srandmember, Some(tx::read_first_key), None, -2);
    registry.register("sinter", sinter, Some(tx::read_all_keys), None, -2);
    registry.register("sunion", sunion, Some(tx::read_all_keys), None, -2);
    registry.register("sdiff", sdiff, Some(tx::read_all_keys), None, -2);
    registry.register("sinterstore", sinterstore, Some(tx::store_keys), Some(tx::rollback_first_key), -3);
    registry.register("sunionstore", sunionstore, Some(tx::store_keys), Some(tx::rollback_first_key), -3);
    registry.register("sdiffstore", sdiffstore, Some(tx::store_keys), Some(tx::rollback_first_key), -3);
}

fn with_set<T>(db: &Db, key: &str, f: impl FnOnce(&Set) -> T) -> Result<Option<T>, Frame> {
    match db.with(key, |value| match value {
        Value::Set(members) => Ok(f(members)),
        _ => Err(wrong_type()),
    }) {
        None => Ok(None),
        Some(Ok(t)) => Ok(Some(t)),
        Some(Err(reply)) => Err(reply),
    }
}

fn with_set_mut<T>(
    db: &Db,
    key: &str,
    create: bool,
    f: impl FnOnce(&mut Set) -> T,
) -> Result<Option<T>, Frame> {
    let mut f = Some(f);
    let attempt = db.with_mut(key, |value| match value {
        Value::Set(members) => Ok((f.take().expect("closure used once"))(members)),
        _ => Err(wrong_type()),
    });
    match attempt {
        Some(Ok(t)) => Ok(Some(t)),
        Some(Err(reply)) => Err(reply),
        None if !create => Ok(None),
        None => {
            db.put(key.to_owned(), Value::Set(Set::new()));
            match db.with_mut(key, |value| match value {
                Value::Set(members) => (f.take().expect("closure used once"))(members),
                _ => unreachable!("set was just installed"),
            }) {
                Some(t) => Ok(Some(t)),
                None => unreachable!("set was just installed"),
            }
        }
    }
}

fn drop_if_empty(db: &Db, key: &str) {
    let empty = db
        .with(key, |value| matches!(value, Value::Set(members) if members.is_empty()))
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

fn members_reply(members: impl IntoIterator<Item = String>) -> Frame {
    super::bulk_array(
        members
            .into_iter()
            .map(|m| Bytes::copy_from_slice(m.as_bytes())),
    )
}

fn sadd(db: &Db, args: &[Bytes]) -> Result<Frame, CommandError> {
    let key = arg_str(&args[0]);
    let added = with_set_mut(db, &key, true, |members| {
        args[1..]
            .iter()
            .filter(|member| members.insert(arg_str(member)))
            .count()
    });
    Ok(match added {
        Ok(added) => {
            let added = added.unwrap_or(0);
            if added > 0 {
                db.bump_version([key.as_str()]);
                log(db, b"SADD", args);
            }
            Frame::Integer(added as i64)
        }
        Err(reply) => reply,
    })
}

fn srem(db: &Db, args: &[Bytes]) -> Result<Frame, CommandError> {
    let key = arg_str(&args[0]);
    let removed = with_set_mut(db, &key, false, |members| {
        args[1..]
            .iter()
            .filter(|member| members.remove(&arg_str(member)))
            .count()
    });
    Ok(match removed {
        Ok(Some(removed)) if removed > 0 => {
            drop_if_empty(db, &key);
            db.bump_version([key.as_str()]);
            log(db, b"SREM", args);
            Frame::Integer(removed as i64)
        }
        Ok(_) => Frame::Integer(0),
        Err(reply) => reply,
    })
}

fn sismember(db: &Db, args: &[Bytes]) -> Result<Frame, CommandError> {
    let key = arg_str(&args[0]);
    let member = arg_str(&args[1]);
    Ok(match with_set(db, &key, |members| members.contains(&member)) {
        Ok(found) => Frame::Integer(i64::from(found.unwrap_or(false))),
        Err(reply) => reply,
    })
}

fn scard(db: &Db, args: &[Bytes]) -> Result<Frame, CommandError> {
    let key = arg_str(&args[0]);
    Ok(match with_set(db, &key, Set::len) {
        Ok(len) => Frame::Integer(len.unwrap_or(0) as i64),
        Err(reply) => reply,
    })
}

fn smembers(db: &Db, args: &[Bytes]) -> Result<Frame, CommandError> {
    let key = arg_str(&args[0]);
    Ok(match with_set(db, &key, |members| members.iter().cloned().collect::<Vec<_>>()) {
        Ok(members) => members_reply(members.unwrap_or_default()),
        Err(reply) => reply,
    })
}

fn srandmember(db: &Db, args: &[Bytes]) -> Result<Frame, CommandError> {
    let key = arg_str(&args[0]);
    let count = match args.get(1) {
        None => None,
        Some(arg) => match parse_int(arg) {
            Ok(n) => Some(n),
            Err(reply) => return Ok(reply),
        },
    };

    let snapshot = match with_set(db, &key, |members| members.iter().cloned().collect::<Vec<_>>())
    {
        Ok(Some(members)) => members,
        Ok(None) => {
            return Ok(match count {
                None => Frame::Bulk(None),
                Some(_) => Frame::Array(Some(vec![])),
            })
        }
        Err(reply) => return Ok(reply),
    };

    let mut rng = rand::rng();
    Ok(match count {
        // single random member
        None => {
            let member = snapshot
                .iter()
                .choose(&mut rng)
                .expect("set is non-empty");
            Frame::bulk(Bytes::copy_from_slice(member.as_bytes()))
        }
        // positive count: distinct members, capped at the set size
        Some(n) if n >= 0 => {
            let picked = snapshot.iter().cloned().choose_multiple(&mut rng, n as usize);
            members_reply(picked)
        }
        // negative count: members drawn with repetition
        Some(n) => {
            let picked = (0..n.unsigned_abs())
                .map(|_| snapshot[rng.random_range(0..snapshot.len())].clone())
                .collect::<Vec<_>>();
            members_reply(picked)
        }
    })
}

/// Loads each argument as a set; absent keys read as empty sets.
fn load_sets(db: &Db, keys: &[Bytes]) -> Result<Vec<Set>, Frame> {
    keys.iter()
        .map(|key| {
            with_set(db, &arg_str(key), Clone::clone).map(Option::unwrap_or_default)
        })
        .collect()
}

fn intersect(sets: &[Set]) -> Set {
    let Some((first, rest)) = sets.split_first() else {
        return Set::new();
    };
    first
        .iter()
        .filter(|member| rest.iter().all(|set| set.contains(*member)))
        .cloned()
        .collect()
}

fn union(sets: &[Set]) -> Set {
    let mut out = Set::new();
    for set in sets {
        out.extend(set.iter().cloned());
    }
    out
}

fn difference(sets: &[Set]) -> Set {
    let Some((first, rest)) = sets.split_first() else {
        return Set::new();
    };
    first
        .iter()
        .filter(|member| rest.iter().all(|set| !set.contains(*member)))
        .cloned()
        .collect()
}

fn sinter(db: &Db, args: &[Bytes]) -> Result<Frame, CommandError> {
    Ok(match load_sets(db, args) {
        Ok(sets) => members_reply(intersect(&sets)),
        Err(reply) => reply,
    })
}

fn sunion(db: &Db, args: &[Bytes]) -> Result<Frame, CommandError> {
    Ok(match load_sets(db, args) {
        Ok(sets) => members_reply(union(&sets)),
        Err(reply) => reply,
    })
}

fn sdiff(db: &Db, args: &[Bytes]) -> Result<Frame, CommandError> {
    Ok(match load_sets(db, args) {
        Ok(sets) => members_reply(difference(&sets)),
        Err(reply) => reply,
    })
}

/// Shared body of the STORE variants: computes the result over the
/// source keys and replaces the destination with it. An empty result
/// deletes the destination.
fn store(
    db: &Db,
    args: &[Bytes],
    name: &'static [u8],
    combine: fn(&[Set]) -> Set,
) -> Result<Frame, CommandError> {
    let dest = arg_str(&args[0]);
    let result = match load_sets(db, &args[1..]) {
        Ok(sets) => combine(&sets),
        Err(reply) => return Ok(reply),
    };

    let len = result.len();
    if result.is_empty() {
        if db.remove(&dest) {
            db.bump_version([dest.as_str()]);
        }
    } else {
        db.put(dest.clone(), Value::Set(result));
        db.bump_version([dest.as_str()]);
    }
    log(db, name, args);
    Ok(Frame::Integer(len as i64))
}

fn sinterstore(db: &Db, args: &[Bytes]) -> Result<Frame, CommandError> {
    store(db, args, b"SINTERSTORE", intersect)
}

fn sunionstore(db: &Db, args: &[Bytes]) -> Result<Frame, CommandError> {
    store(db, args, b"SUNIONSTORE", union)
}

fn sdiffstore(db: &Db, args: &[Bytes]) -> Result<Frame, CommandError> {
    store(db, args, b"SDIFFSTORE", difference)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cmd_line;

    fn sorted_members(frame: Frame) -> Vec<String> {
        match frame {
            Frame::Array(Some(items)) => {
                let mut out: Vec<String> = items
                    .into_iter()
                    .map(|f| match f {
                        Frame::Bulk(Some(b)) => String::from_utf8_lossy(&b).into_owned(),
                        other => panic!("expected bulk, got {other:?}"),
                    })
                    .collect();
                out.sort();
                out
            }
            other => panic!("expected array, got {other:?}"),
        }
    }

    #[test]
    fn sadd_counts_new_members() {
        let db = Db::new(0);
        assert_eq!(
            sadd(&db, &cmd_line(&["s", "a", "b"])).unwrap(),
            Frame::Integer(2)
        );
        assert_eq!(
            sadd(&db, &cmd_line(&["s", "b", "c"])).unwrap(),
            Frame::Integer(1)
        );
        assert_eq!(scard(&db, &cmd_line(&["s"])).unwrap(), Frame::Integer(3));
    }

    #[test]
    fn srem_and_drop_empty() {
        let db = Db::new(0);
        sadd(&db, &cmd_line(&["s", "a", "b"])).unwrap();
        assert_eq!(
            srem(&db, &cmd_line(&["s", "a", "b", "ghost"])).unwrap(),
            Frame::Integer(2)
        );
        assert!(!db.exists("s"));
        assert_eq!(srem(&db, &cmd_line(&["s", "x"])).unwrap(), Frame::Integer(0));
    }

    #[test]
    fn sismember_cases() {
        let db = Db::new(0);
        sadd(&db, &cmd_line(&["s", "a"])).unwrap();
        assert_eq!(sismember(&db, &cmd_line(&["s", "a"])).unwrap(), Frame::Integer(1));
        assert_eq!(sismember(&db, &cmd_line(&["s", "z"])).unwrap(), Frame::Integer(0));
        assert_eq!(
            sismember(&db, &cmd_line(&["ghost", "a"])).unwrap(),
            Frame::Integer(0)
        );
    }

    #[test]
    fn smembers_lists_everything() {
        let db = Db::new(0);
        sadd(&db, &cmd_line(&["s", "a", "b"])).unwrap();
        assert_eq!(
            sorted_members(smembers(&db, &cmd_line(&["s"])).unwrap()),
            vec!["a", "b"]
        );
    }

    #[test]
    fn srandmember_shapes() {
        let db = Db::new(0);
        sadd(&db, &cmd_line(&["s", "a", "b", "c"])).unwrap();

        assert!(matches!(
            srandmember(&db, &cmd_line(&["s"])).unwrap(),
            Frame::Bulk(Some(_))
        ));
        // positive count: distinct, capped at the set size
        let picked = sorted_members(srandmember(&db, &cmd_line(&["s", "9"])).unwrap());
        assert_eq!(picked, vec!["a", "b", "c"]);
        // negative count: exactly |count| with repetition allowed
        match srandmember(&db, &cmd_line(&["s", "-5"])).unwrap() {
            Frame::Array(Some(items)) => assert_eq!(items.len(), 5),
            other => panic!("expected array, got {other:?}"),
        }
        // missing key
        assert_eq!(
            srandmember(&db, &cmd_line(&["ghost"])).unwrap(),
            Frame::Bulk(None)
        );
    }

    #[test]
    fn algebra_over_three_sets() {
        let db = Db::new(0);
        sadd(&db, &cmd_line(&["a", "1", "2", "3"])).unwrap();
        sadd(&db, &cmd_line(&["b", "2", "3", "4"])).unwrap();

        assert_eq!(
            sorted_members(sinter(&db, &cmd_line(&["a", "b"])).unwrap()),
            vec!["2", "3"]
        );
        assert_eq!(
            sorted_members(sunion(&db, &cmd_line(&["a", "b"])).unwrap()),
            vec!["1", "2", "3", "4"]
        );
        assert_eq!(
            sorted_members(sdiff(&db, &cmd_line(&["a", "b"])).unwrap()),
            vec!["1"]
        );
        // absent keys read as empty
        assert_eq!(
            sorted_members(sinter(&db, &cmd_line(&["a", "ghost"])).unwrap()),
            Vec::<String>::new()
        );
    }

    #[test]
    fn store_variants_write_destination() {
        let db = Db::new(0);
        sadd(&db, &cmd_line(&["a", "1", "2"])).unwrap();
        sadd(&db, &cmd_line(&["b", "2", "3"])).unwrap();

        assert_eq!(
            sinterstore(&db, &cmd_line(&["dest", "a", "b"])).unwrap(),
            Frame::Integer(1)
        );
        assert_eq!(
            sorted_members(smembers(&db, &cmd_line(&["dest"])).unwrap()),
            vec!["2"]
        );

        // empty result deletes the destination
        assert_eq!(
            sinterstore(&db, &cmd_line(&["dest", "a", "ghost"])).unwrap(),
            Frame::Integer(0)
        );
        assert!(!db.exists("dest"));
    }

    #[test]
    fn wrong_type_rejected() {
        let db = Db::new(0);
        db.put("s".into(), Value::Bytes(Bytes::from("x")));
        assert!(sadd(&db, &cmd_line(&["s", "a"])).unwrap().is_error());
        assert!(sinter(&db, &cmd_line(&["s"])).unwrap().is_error());
    }
}
