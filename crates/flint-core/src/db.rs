//! One logical keyspace: key → value with TTL, versions, and striped
//! locks.
//!
//! Three maps ride together: the data map, the TTL index (absolute
//! unix-millisecond deadlines), and the version map that WATCH reads.
//! `DashMap` provides interior synchronisation for individual map
//! operations; command-level atomicity across maps and keys comes from
//! the striped [`LockMap`] the engine acquires around each handler.
//!
//! Expiration is lazy: any access that consults a key first checks its
//! deadline and removes the entry when it has passed. A long-dead key
//! costs memory until it is touched — acceptable for the target
//! workload, and it keeps the engine free of background scans.

use std::sync::OnceLock;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use crate::locker::LockMap;
use crate::time;
use crate::types::Value;
use crate::CmdLine;

/// Sink for committed mutations, attached once when AOF is enabled.
pub type AofSink = Box<dyn Fn(CmdLine) + Send + Sync>;

/// A single logical database.
pub struct Db {
    index: usize,
    data: DashMap<String, Value>,
    ttl: DashMap<String, u64>,
    versions: DashMap<String, u32>,
    locks: LockMap,
    aof_sink: OnceLock<AofSink>,
}

impl Db {
    pub fn new(index: usize) -> Self {
        Self {
            index,
            data: DashMap::new(),
            ttl: DashMap::new(),
            versions: DashMap::new(),
            locks: LockMap::new(),
            aof_sink: OnceLock::new(),
        }
    }

    /// Position of this keyspace in the engine's DB list.
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn locks(&self) -> &LockMap {
        &self.locks
    }

    /// Removes `key` if its deadline has passed. Returns `true` when
    /// the key is now logically absent because it expired.
    fn expire_if_needed(&self, key: &str) -> bool {
        let expired = match self.ttl.get(key) {
            Some(deadline) => time::is_expired(*deadline),
            None => return false,
        };
        if expired {
            self.data.remove(key);
            self.ttl.remove(key);
        }
        expired
    }

    /// Returns `true` if the key exists and hasn't expired.
    pub fn exists(&self, key: &str) -> bool {
        if self.expire_if_needed(key) {
            return false;
        }
        self.data.contains_key(key)
    }

    /// Runs `f` against the live value for `key`, applying lazy
    /// expiration first. Returns `None` when the key is absent.
    pub fn with<T>(&self, key: &str, f: impl FnOnce(&Value) -> T) -> Option<T> {
        if self.expire_if_needed(key) {
            return None;
        }
        self.data.get(key).map(|entry| f(entry.value()))
    }

    /// Mutable variant of [`Db::with`].
    pub fn with_mut<T>(&self, key: &str, f: impl FnOnce(&mut Value) -> T) -> Option<T> {
        if self.expire_if_needed(key) {
            return None;
        }
        self.data.get_mut(key).map(|mut entry| f(entry.value_mut()))
    }

    /// Clones out the value for `key`. Used by snapshot paths (TYPE,
    /// undo logs, rewrite); hot paths go through [`Db::with`].
    pub fn get_entity(&self, key: &str) -> Option<Value> {
        self.with(key, Value::clone)
    }

    /// Installs a value, overwriting any previous entry. The previous
    /// TTL does not survive: callers that want to keep it re-apply it
    /// explicitly.
    pub fn put(&self, key: String, value: Value) {
        self.ttl.remove(&key);
        self.data.insert(key, value);
    }

    /// Installs a value only when the key is absent (an expired key
    /// counts as absent). Returns `true` on insert.
    pub fn put_if_absent(&self, key: String, value: Value) -> bool {
        self.expire_if_needed(&key);
        match self.data.entry(key) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                slot.insert(value);
                true
            }
        }
    }

    /// Replaces the value only when the key already exists. The TTL is
    /// left in place. Returns `true` on replace.
    pub fn put_if_exists(&self, key: String, value: Value) -> bool {
        if self.expire_if_needed(&key) {
            return false;
        }
        match self.data.entry(key) {
            Entry::Occupied(mut slot) => {
                slot.insert(value);
                true
            }
            Entry::Vacant(_) => false,
        }
    }

    /// Removes a key and its TTL. Returns `true` if a live entry
    /// existed.
    pub fn remove(&self, key: &str) -> bool {
        if self.expire_if_needed(key) {
            return false;
        }
        self.ttl.remove(key);
        self.data.remove(key).is_some()
    }

    /// Removes several keys, returning how many live entries fell.
    pub fn removes<'a>(&self, keys: impl IntoIterator<Item = &'a str>) -> usize {
        keys.into_iter().filter(|key| self.remove(key)).count()
    }

    /// Sets an absolute expiration deadline on a key.
    pub fn expire_at_ms(&self, key: &str, at_ms: u64) {
        self.ttl.insert(key.to_owned(), at_ms);
    }

    /// Clears the expiration on a key. Returns `true` if a deadline
    /// was present.
    pub fn persist(&self, key: &str) -> bool {
        self.ttl.remove(key).is_some()
    }

    /// Returns the absolute deadline for a key, if one is set and the
    /// key is still live.
    pub fn ttl_ms(&self, key: &str) -> Option<u64> {
        if self.expire_if_needed(key) {
            return None;
        }
        self.ttl.get(key).map(|deadline| *deadline)
    }

    /// Visits every live key. The callback receives the key, its
    /// value, and the deadline if one is set; returning `false` stops
    /// the walk. Ordering is unspecified.
    pub fn for_each(&self, mut f: impl FnMut(&str, &Value, Option<u64>) -> bool) {
        for entry in self.data.iter() {
            let deadline = self.ttl.get(entry.key()).map(|d| *d);
            if let Some(at) = deadline {
                if time::is_expired(at) {
                    continue;
                }
            }
            if !f(entry.key(), entry.value(), deadline) {
                break;
            }
        }
    }

    /// Drops every key, TTL, and version.
    pub fn flush(&self) {
        self.data.clear();
        self.ttl.clear();
        self.versions.clear();
    }

    /// Current version of a key; 0 if never written.
    pub fn version(&self, key: &str) -> u32 {
        self.versions.get(key).map(|v| *v).unwrap_or(0)
    }

    /// Bumps the version of each key. Handlers call this at the point
    /// a key is actually mutated; WATCH compares these counters at
    /// EXEC time.
    pub fn bump_version<'a>(&self, keys: impl IntoIterator<Item = &'a str>) {
        for key in keys {
            *self.versions.entry(key.to_owned()).or_insert(0) += 1;
        }
    }

    /// Attaches the AOF sink. Called once at startup, after replay,
    /// so replayed commands never re-log themselves.
    pub fn set_aof_sink(&self, sink: AofSink) {
        let _ = self.aof_sink.set(sink);
    }

    /// Hands a committed mutation to the AOF writer. No-op unless a
    /// sink is attached. Handlers call this while the engine still
    /// holds their stripe locks, which pins AOF record order to commit
    /// order for overlapping key sets.
    pub fn add_aof(&self, line: CmdLine) {
        if let Some(sink) = self.aof_sink.get() {
            sink(line);
        }
    }
}

impl std::fmt::Debug for Db {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Db")
            .field("index", &self.index)
            .field("keys", &self.data.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;

    use super::*;
    use crate::time::unix_ms;

    fn bytes_value(s: &str) -> Value {
        Value::Bytes(Bytes::copy_from_slice(s.as_bytes()))
    }

    #[test]
    fn put_get_remove() {
        let db = Db::new(0);
        db.put("k".into(), bytes_value("v"));
        assert!(db.exists("k"));
        assert!(matches!(db.get_entity("k"), Some(Value::Bytes(b)) if b == "v"));
        assert!(db.remove("k"));
        assert!(!db.remove("k"));
        assert!(db.get_entity("k").is_none());
    }

    #[test]
    fn put_clears_previous_ttl() {
        let db = Db::new(0);
        db.put("k".into(), bytes_value("v1"));
        db.expire_at_ms("k", unix_ms() + 60_000);
        db.put("k".into(), bytes_value("v2"));
        assert_eq!(db.ttl_ms("k"), None);
        assert!(db.exists("k"));
    }

    #[test]
    fn expired_key_is_logically_absent() {
        let db = Db::new(0);
        db.put("k".into(), bytes_value("v"));
        db.expire_at_ms("k", unix_ms().saturating_sub(5));
        assert!(!db.exists("k"));
        assert!(db.get_entity("k").is_none());
        assert_eq!(db.ttl_ms("k"), None);
        // the lazy sweep removed the entry entirely
        assert!(!db.data.contains_key("k"));
    }

    #[test]
    fn put_if_absent_respects_expiry() {
        let db = Db::new(0);
        db.put("k".into(), bytes_value("old"));
        db.expire_at_ms("k", 1);
        // expired key counts as absent
        assert!(db.put_if_absent("k".into(), bytes_value("new")));
        assert!(matches!(db.get_entity("k"), Some(Value::Bytes(b)) if b == "new"));
        assert!(!db.put_if_absent("k".into(), bytes_value("again")));
    }

    #[test]
    fn put_if_exists_keeps_ttl() {
        let db = Db::new(0);
        assert!(!db.put_if_exists("k".into(), bytes_value("v")));
        db.put("k".into(), bytes_value("v"));
        let deadline = unix_ms() + 60_000;
        db.expire_at_ms("k", deadline);
        assert!(db.put_if_exists("k".into(), bytes_value("v2")));
        assert_eq!(db.ttl_ms("k"), Some(deadline));
    }

    #[test]
    fn persist_drops_deadline() {
        let db = Db::new(0);
        db.put("k".into(), bytes_value("v"));
        db.expire_at_ms("k", unix_ms() + 60_000);
        assert!(db.persist("k"));
        assert!(!db.persist("k"));
        assert_eq!(db.ttl_ms("k"), None);
    }

    #[test]
    fn removes_counts_only_live_keys() {
        let db = Db::new(0);
        db.put("a".into(), bytes_value("1"));
        db.put("b".into(), bytes_value("2"));
        db.put("dead".into(), bytes_value("3"));
        db.expire_at_ms("dead", 1);
        let removed = db.removes(["a", "b", "dead", "missing"]);
        assert_eq!(removed, 2);
    }

    #[test]
    fn for_each_skips_expired() {
        let db = Db::new(0);
        db.put("live".into(), bytes_value("1"));
        db.put("dead".into(), bytes_value("2"));
        db.expire_at_ms("dead", 1);

        let mut seen = Vec::new();
        db.for_each(|key, _, _| {
            seen.push(key.to_owned());
            true
        });
        assert_eq!(seen, vec!["live".to_owned()]);
    }

    #[test]
    fn versions_bump_monotonically() {
        let db = Db::new(0);
        assert_eq!(db.version("k"), 0);
        db.bump_version(["k"]);
        db.bump_version(["k"]);
        assert_eq!(db.version("k"), 2);
    }

    #[test]
    fn aof_sink_receives_lines_once_attached() {
        use std::sync::mpsc;

        let db = Db::new(0);
        db.add_aof(crate::cmd_line(&["SET", "k", "v"])); // no sink yet: dropped

        let (tx, rx) = mpsc::channel();
        db.set_aof_sink(Box::new(move |line| {
            tx.send(line).unwrap();
        }));
        db.add_aof(crate::cmd_line(&["SET", "k", "v"]));
        assert_eq!(rx.recv().unwrap(), crate::cmd_line(&["SET", "k", "v"]));
    }
}
