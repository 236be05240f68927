//! The engine: N keyspaces, command dispatch, transactions.
//!
//! A command arrives as a decoded array frame's command line. Dispatch
//! order: AUTH first, then the authentication gate, then engine-level
//! commands (SELECT, MULTI/EXEC/WATCH, pub/sub, FLUSHALL, rewrite),
//! then — inside a transaction — queueing, and finally the registry
//! path: look up the spec, check arity, extract key sets, take the
//! striped locks, run the handler, release.
//!
//! Persistence and pub/sub are consumed through the [`AofBackend`] and
//! [`Hub`] seams so the core never depends on the crates implementing
//! them.

use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use bytes::Bytes;
use flint_protocol::Frame;
use tracing::{error, warn};

use crate::cmd;
use crate::config::Config;
use crate::connection::Connection;
use crate::db::Db;
use crate::registry::Registry;
use crate::CmdLine;

/// The append-only log as the engine sees it.
#[async_trait]
pub trait AofBackend: Send + Sync {
    /// Enqueues a committed command for the writer. Blocks when the
    /// queue is full.
    fn append(&self, db_index: usize, line: &CmdLine);

    /// Runs the online compaction protocol to completion.
    async fn rewrite(&self);

    /// Stops the writer: close the queue, drain, fsync.
    fn close(&self);
}

/// Pub/sub topic routing, keyed by connection id.
pub trait Hub: Send + Sync {
    /// Adds a subscription; returns the connection's channel count
    /// after the add.
    fn subscribe(&self, conn_id: u64, channel: &str) -> usize;

    /// Drops a subscription; returns the remaining channel count.
    fn unsubscribe(&self, conn_id: u64, channel: &str) -> usize;

    /// Delivers a message; returns the number of receivers.
    fn publish(&self, channel: &str, message: &Bytes) -> usize;

    /// Drops every subscription a connection holds.
    fn unsubscribe_all(&self, conn_id: u64);

    /// Channels a connection is currently subscribed to.
    fn channels_of(&self, conn_id: u64) -> Vec<String>;
}

/// The shared engine. Cheap to share via `Arc`; all interior state is
/// concurrency-safe.
pub struct Engine {
    dbs: Vec<Arc<Db>>,
    registry: Registry,
    requirepass: Option<String>,
    hub: OnceLock<Arc<dyn Hub>>,
    aof: OnceLock<Arc<dyn AofBackend>>,
}

impl Engine {
    pub fn new(config: &Config) -> Self {
        Self::with_registry(config, Registry::standard())
    }

    /// Builds an engine over a caller-supplied command table.
    pub fn with_registry(config: &Config, registry: Registry) -> Self {
        let databases = if config.databases == 0 { 16 } else { config.databases };
        Self {
            dbs: (0..databases).map(|i| Arc::new(Db::new(i))).collect(),
            registry,
            requirepass: config.requirepass.clone().filter(|p| !p.is_empty()),
            hub: OnceLock::new(),
            aof: OnceLock::new(),
        }
    }

    pub fn db_count(&self) -> usize {
        self.dbs.len()
    }

    pub fn db_at(&self, index: usize) -> Option<&Arc<Db>> {
        self.dbs.get(index)
    }

    /// Attaches the pub/sub hub. Called once at startup.
    pub fn set_hub(&self, hub: Arc<dyn Hub>) {
        let _ = self.hub.set(hub);
    }

    /// Attaches the AOF backend and wires every keyspace's mutation
    /// sink to it. Called once at startup, after replay.
    pub fn attach_aof(&self, aof: Arc<dyn AofBackend>) {
        for db in &self.dbs {
            let sink = Arc::clone(&aof);
            let index = db.index();
            db.set_aof_sink(Box::new(move |line| sink.append(index, &line)));
        }
        let _ = self.aof.set(aof);
    }

    /// Shuts the persistence layer down.
    pub fn close(&self) {
        if let Some(aof) = self.aof.get() {
            aof.close();
        }
    }

    /// Tells the hub a connection went away.
    pub fn connection_closed(&self, conn_id: u64) {
        if let Some(hub) = self.hub.get() {
            hub.unsubscribe_all(conn_id);
        }
    }

    /// Executes one command line for a connection. Returns the reply
    /// frames to write — usually one, one per channel for the
    /// SUBSCRIBE family, empty when there is nothing to say.
    pub async fn exec(&self, conn: &mut dyn Connection, line: CmdLine) -> Vec<Frame> {
        if line.is_empty() {
            return Vec::new();
        }
        let name = String::from_utf8_lossy(&line[0]).to_ascii_lowercase();

        if name == "auth" {
            return vec![self.auth(conn, &line[1..])];
        }
        if !self.is_authenticated(conn) {
            return vec![cmd::err("NOAUTH Authentication required")];
        }

        match name.as_str() {
            "select" => vec![self.select(conn, &line[1..])],
            "multi" => vec![start_multi(conn)],
            "exec" => vec![self.exec_queued(conn).await],
            "discard" => vec![discard(conn)],
            "watch" => vec![self.watch(conn, &line[1..])],
            "unwatch" => vec![unwatch(conn)],
            "subscribe" => self.subscribe(conn, &line[1..]),
            "unsubscribe" => self.unsubscribe(conn, &line[1..]),
            "publish" => vec![self.publish(&line[1..])],
            "flushall" => vec![self.flush_all()],
            "rewriteaof" => vec![self.rewrite_aof(false).await],
            "bgrewriteaof" => vec![self.rewrite_aof(true).await],
            _ if conn.in_multi() => vec![enqueue(&self.registry, conn, &name, line)],
            _ => vec![self.exec_normal(conn.db_index(), &name, &line).await],
        }
    }

    fn is_authenticated(&self, conn: &mut dyn Connection) -> bool {
        match &self.requirepass {
            None => true,
            Some(pass) => conn.password() == Some(pass.as_str()),
        }
    }

    fn auth(&self, conn: &mut dyn Connection, args: &[Bytes]) -> Frame {
        if args.len() != 1 {
            return cmd::arg_num_err("auth");
        }
        let Some(pass) = &self.requirepass else {
            return cmd::err("ERR Client sent AUTH, but no password is set");
        };
        let presented = cmd::arg_str(&args[0]);
        conn.set_password(presented.clone());
        if &presented != pass {
            return cmd::err("ERR invalid password");
        }
        cmd::ok()
    }

    fn select(&self, conn: &mut dyn Connection, args: &[Bytes]) -> Frame {
        if conn.in_multi() {
            return cmd::err("ERR cannot select database within multi");
        }
        if args.len() != 1 {
            return cmd::arg_num_err("select");
        }
        let Ok(index) = cmd::arg_str(&args[0]).parse::<usize>() else {
            return cmd::err("ERR invalid DB index");
        };
        if index >= self.dbs.len() {
            return cmd::err("ERR DB index is out of range");
        }
        conn.select_db(index);
        cmd::ok()
    }

    fn watch(&self, conn: &mut dyn Connection, args: &[Bytes]) -> Frame {
        if conn.in_multi() {
            return cmd::err("ERR WATCH inside MULTI is not allowed");
        }
        if args.is_empty() {
            return cmd::arg_num_err("watch");
        }
        let Some(db) = self.db_at(conn.db_index()) else {
            return cmd::err("ERR DB index is out of range");
        };
        let db = Arc::clone(db);
        for arg in args {
            let key = cmd::arg_str(arg);
            let version = db.version(&key);
            conn.watching().insert(key, version);
        }
        cmd::ok()
    }

    /// Runs one registered command: arity, keys, locks, handler.
    /// Handlers bump key versions themselves at their mutation
    /// points, so declared-but-untouched write keys (DEL of a missing
    /// key, a failed SET XX) never disturb a WATCH.
    async fn exec_normal(&self, db_index: usize, name: &str, line: &CmdLine) -> Frame {
        let Some(db) = self.db_at(db_index) else {
            return cmd::err("ERR DB index is out of range");
        };
        let Some(spec) = self.registry.get(name) else {
            return cmd::err(format!("ERR unknown command '{name}'"));
        };
        if !spec.arity_ok(line.len()) {
            return cmd::arg_num_err(name);
        }

        let args = &line[1..];
        let (write_keys, read_keys) = spec.keys(args);

        let guards = db
            .locks()
            .rw_locks(
                write_keys.iter().map(String::as_str),
                read_keys.iter().map(String::as_str),
            )
            .await;
        let result = (spec.handler)(db, args);
        drop(guards);

        match result {
            Ok(frame) => frame,
            Err(e) => {
                error!(command = name, error = %e, "handler failed");
                cmd::err("ERR unknown error")
            }
        }
    }

    /// EXEC: runs the queued transaction.
    async fn exec_queued(&self, conn: &mut dyn Connection) -> Frame {
        if !conn.in_multi() {
            return cmd::err("ERR EXEC without MULTI");
        }
        conn.set_multi(false);
        let lines = std::mem::take(conn.queued());
        let syntax_errors = std::mem::take(conn.tx_errors());
        let watching = std::mem::take(conn.watching());

        if !syntax_errors.is_empty() {
            return cmd::err("EXECABORT Transaction discarded because of previous errors.");
        }
        if lines.is_empty() {
            return Frame::array(vec![]);
        }
        let Some(db) = self.db_at(conn.db_index()) else {
            return cmd::err("ERR DB index is out of range");
        };
        self.exec_multi(db, &watching, &lines).await
    }

    /// Atomic execution of a validated batch: lock everything, check
    /// watch versions, run each command collecting undo logs, roll
    /// back on internal failure.
    async fn exec_multi(
        &self,
        db: &Arc<Db>,
        watching: &std::collections::HashMap<String, u32>,
        lines: &[CmdLine],
    ) -> Frame {
        let mut specs = Vec::with_capacity(lines.len());
        let mut write_keys: Vec<String> = Vec::new();
        let mut read_keys: Vec<String> = Vec::new();
        for line in lines {
            let name = String::from_utf8_lossy(&line[0]).to_ascii_lowercase();
            let Some(spec) = self.registry.get(&name) else {
                // queue-time validation makes this unreachable in
                // practice; refuse rather than half-run the batch
                return cmd::err(format!("ERR unknown command '{name}'"));
            };
            let (write, read) = spec.keys(&line[1..]);
            write_keys.extend(write);
            read_keys.extend(read);
            specs.push(spec);
        }
        read_keys.extend(watching.keys().cloned());

        let guards = db
            .locks()
            .rw_locks(
                write_keys.iter().map(String::as_str),
                read_keys.iter().map(String::as_str),
            )
            .await;

        // a watched key whose version moved aborts the transaction
        for (key, recorded) in watching {
            if db.version(key) != *recorded {
                return Frame::Array(None);
            }
        }

        let mut results = Vec::with_capacity(lines.len());
        let mut undo_stack: Vec<Vec<CmdLine>> = Vec::with_capacity(lines.len());
        for (spec, line) in specs.iter().zip(lines) {
            let args = &line[1..];
            let undo = spec.undo_fn.map(|f| f(db, args)).unwrap_or_default();
            undo_stack.push(undo);

            match (spec.handler)(db, args) {
                // error replies count as results; the batch continues
                Ok(frame) => results.push(frame),
                Err(e) => {
                    warn!(command = spec.name, error = %e, "transaction handler failed, rolling back");
                    for undo in undo_stack.iter().rev() {
                        for undo_line in undo {
                            self.apply_undo(db, undo_line);
                        }
                    }
                    drop(guards);
                    return cmd::err("ERR transaction failed and was rolled back");
                }
            }
        }
        drop(guards);
        Frame::Array(Some(results))
    }

    /// Replays one undo command under the locks EXEC already holds.
    fn apply_undo(&self, db: &Arc<Db>, line: &CmdLine) {
        let Some(first) = line.first() else { return };
        let name = String::from_utf8_lossy(first).to_ascii_lowercase();
        let Some(spec) = self.registry.get(&name) else {
            warn!(command = %name, "undo references unknown command");
            return;
        };
        if let Err(e) = (spec.handler)(db, &line[1..]) {
            warn!(command = %name, error = %e, "undo replay failed");
        }
    }

    fn subscribe(&self, conn: &mut dyn Connection, args: &[Bytes]) -> Vec<Frame> {
        if args.is_empty() {
            return vec![cmd::arg_num_err("subscribe")];
        }
        let Some(hub) = self.hub.get() else {
            return vec![cmd::err("ERR pub/sub is not available")];
        };
        args.iter()
            .map(|arg| {
                let channel = cmd::arg_str(arg);
                let count = hub.subscribe(conn.id(), &channel);
                Frame::array(vec![
                    Frame::bulk("subscribe"),
                    Frame::bulk(channel),
                    Frame::Integer(count as i64),
                ])
            })
            .collect()
    }

    fn unsubscribe(&self, conn: &mut dyn Connection, args: &[Bytes]) -> Vec<Frame> {
        let Some(hub) = self.hub.get() else {
            return vec![cmd::err("ERR pub/sub is not available")];
        };
        let channels: Vec<String> = if args.is_empty() {
            hub.channels_of(conn.id())
        } else {
            args.iter().map(cmd::arg_str).collect()
        };

        if channels.is_empty() {
            return vec![Frame::array(vec![
                Frame::bulk("unsubscribe"),
                Frame::Bulk(None),
                Frame::Integer(0),
            ])];
        }
        channels
            .into_iter()
            .map(|channel| {
                let remaining = hub.unsubscribe(conn.id(), &channel);
                Frame::array(vec![
                    Frame::bulk("unsubscribe"),
                    Frame::bulk(channel),
                    Frame::Integer(remaining as i64),
                ])
            })
            .collect()
    }

    fn publish(&self, args: &[Bytes]) -> Frame {
        if args.len() != 2 {
            return cmd::arg_num_err("publish");
        }
        let count = match self.hub.get() {
            Some(hub) => hub.publish(&cmd::arg_str(&args[0]), &args[1]),
            None => 0,
        };
        Frame::Integer(count as i64)
    }

    fn flush_all(&self) -> Frame {
        for db in &self.dbs {
            db.flush();
        }
        if let Some(aof) = self.aof.get() {
            aof.append(0, &crate::cmd_line(&["FLUSHALL"]));
        }
        cmd::ok()
    }

    async fn rewrite_aof(&self, background: bool) -> Frame {
        let Some(aof) = self.aof.get() else {
            return cmd::err("ERR append only file is not enabled");
        };
        if background {
            let aof = Arc::clone(aof);
            tokio::spawn(async move {
                aof.rewrite().await;
            });
        } else {
            aof.rewrite().await;
        }
        Frame::Simple("Background append only file rewriting started".into())
    }
}

fn start_multi(conn: &mut dyn Connection) -> Frame {
    if conn.in_multi() {
        return cmd::err("ERR MULTI calls can not be nested");
    }
    conn.set_multi(true);
    cmd::ok()
}

fn discard(conn: &mut dyn Connection) -> Frame {
    if !conn.in_multi() {
        return cmd::err("ERR DISCARD without MULTI");
    }
    conn.queued().clear();
    conn.tx_errors().clear();
    conn.watching().clear();
    conn.set_multi(false);
    cmd::ok()
}

fn unwatch(conn: &mut dyn Connection) -> Frame {
    conn.watching().clear();
    cmd::ok()
}

/// Queues a command inside MULTI. Unknown names and arity mistakes
/// are remembered so EXEC refuses the whole transaction.
fn enqueue(registry: &Registry, conn: &mut dyn Connection, name: &str, line: CmdLine) -> Frame {
    match registry.get(name) {
        None => {
            let msg = format!("ERR unknown command '{name}'");
            conn.tx_errors().push(msg.clone());
            cmd::err(msg)
        }
        Some(spec) if !spec.arity_ok(line.len()) => {
            let msg = format!("ERR wrong number of arguments for '{name}' command");
            conn.tx_errors().push(msg.clone());
            cmd::err(msg)
        }
        Some(_) => {
            conn.queued().push(line);
            Frame::Simple("QUEUED".into())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cmd_line;
    use crate::connection::FakeConn;
    use crate::registry::CommandError;
    use crate::types::Value;

    fn engine() -> Engine {
        Engine::new(&Config::default())
    }

    async fn one(engine: &Engine, conn: &mut FakeConn, parts: &[&str]) -> Frame {
        let mut replies = engine.exec(conn, cmd_line(parts)).await;
        assert_eq!(replies.len(), 1, "expected exactly one reply");
        replies.pop().unwrap()
    }

    #[tokio::test]
    async fn set_get_round_trip() {
        let engine = engine();
        let mut conn = FakeConn::new();
        assert_eq!(one(&engine, &mut conn, &["SET", "k", "v"]).await, cmd::ok());
        assert_eq!(
            one(&engine, &mut conn, &["GET", "k"]).await,
            Frame::bulk("v")
        );
    }

    #[tokio::test]
    async fn unknown_command_and_arity() {
        let engine = engine();
        let mut conn = FakeConn::new();
        assert_eq!(
            one(&engine, &mut conn, &["NOPE"]).await,
            cmd::err("ERR unknown command 'nope'")
        );
        assert_eq!(
            one(&engine, &mut conn, &["GET"]).await,
            cmd::arg_num_err("get")
        );
    }

    #[tokio::test]
    async fn select_scopes_keys() {
        let engine = engine();
        let mut conn = FakeConn::new();
        one(&engine, &mut conn, &["SET", "k", "zero"]).await;
        assert_eq!(one(&engine, &mut conn, &["SELECT", "1"]).await, cmd::ok());
        assert_eq!(
            one(&engine, &mut conn, &["GET", "k"]).await,
            Frame::Bulk(None)
        );
        assert!(one(&engine, &mut conn, &["SELECT", "99"]).await.is_error());
        assert!(one(&engine, &mut conn, &["SELECT", "x"]).await.is_error());
    }

    #[tokio::test]
    async fn auth_gate() {
        let config = Config {
            requirepass: Some("sekrit".into()),
            ..Config::default()
        };
        let engine = Engine::new(&config);
        let mut conn = FakeConn::new();

        assert_eq!(
            one(&engine, &mut conn, &["GET", "k"]).await,
            cmd::err("NOAUTH Authentication required")
        );
        assert_eq!(
            one(&engine, &mut conn, &["AUTH", "wrong"]).await,
            cmd::err("ERR invalid password")
        );
        assert_eq!(one(&engine, &mut conn, &["AUTH", "sekrit"]).await, cmd::ok());
        assert_eq!(
            one(&engine, &mut conn, &["GET", "k"]).await,
            Frame::Bulk(None)
        );
    }

    #[tokio::test]
    async fn auth_without_requirepass_is_an_error() {
        let engine = engine();
        let mut conn = FakeConn::new();
        assert_eq!(
            one(&engine, &mut conn, &["AUTH", "pw"]).await,
            cmd::err("ERR Client sent AUTH, but no password is set")
        );
    }

    #[tokio::test]
    async fn multi_queues_and_executes() {
        let engine = engine();
        let mut conn = FakeConn::new();
        assert_eq!(one(&engine, &mut conn, &["MULTI"]).await, cmd::ok());
        assert_eq!(
            one(&engine, &mut conn, &["SET", "k", "1"]).await,
            Frame::Simple("QUEUED".into())
        );
        assert_eq!(
            one(&engine, &mut conn, &["INCR", "k"]).await,
            Frame::Simple("QUEUED".into())
        );
        assert_eq!(
            one(&engine, &mut conn, &["EXEC"]).await,
            Frame::array(vec![cmd::ok(), Frame::Integer(2)])
        );
        assert_eq!(
            one(&engine, &mut conn, &["GET", "k"]).await,
            Frame::bulk("2")
        );
    }

    #[tokio::test]
    async fn exec_without_multi_and_nested_multi() {
        let engine = engine();
        let mut conn = FakeConn::new();
        assert!(one(&engine, &mut conn, &["EXEC"]).await.is_error());
        one(&engine, &mut conn, &["MULTI"]).await;
        assert!(one(&engine, &mut conn, &["MULTI"]).await.is_error());
    }

    #[tokio::test]
    async fn discard_clears_the_queue() {
        let engine = engine();
        let mut conn = FakeConn::new();
        one(&engine, &mut conn, &["MULTI"]).await;
        one(&engine, &mut conn, &["SET", "k", "1"]).await;
        assert_eq!(one(&engine, &mut conn, &["DISCARD"]).await, cmd::ok());
        assert_eq!(
            one(&engine, &mut conn, &["GET", "k"]).await,
            Frame::Bulk(None)
        );
    }

    #[tokio::test]
    async fn queued_syntax_error_aborts_exec() {
        let engine = engine();
        let mut conn = FakeConn::new();
        one(&engine, &mut conn, &["MULTI"]).await;
        one(&engine, &mut conn, &["SET", "k", "1"]).await;
        assert!(one(&engine, &mut conn, &["BOGUSCMD"]).await.is_error());
        let reply = one(&engine, &mut conn, &["EXEC"]).await;
        assert!(matches!(&reply, Frame::Error(msg) if msg.starts_with("EXECABORT")));
        assert_eq!(
            one(&engine, &mut conn, &["GET", "k"]).await,
            Frame::Bulk(None)
        );
    }

    #[tokio::test]
    async fn runtime_error_reply_does_not_abort() {
        let engine = engine();
        let mut conn = FakeConn::new();
        one(&engine, &mut conn, &["LPUSH", "l", "x"]).await;

        one(&engine, &mut conn, &["MULTI"]).await;
        one(&engine, &mut conn, &["INCR", "l"]).await; // wrong type at runtime
        one(&engine, &mut conn, &["SET", "k", "v"]).await;
        match one(&engine, &mut conn, &["EXEC"]).await {
            Frame::Array(Some(replies)) => {
                assert!(replies[0].is_error());
                assert_eq!(replies[1], cmd::ok());
            }
            other => panic!("expected array, got {other:?}"),
        }
        assert_eq!(
            one(&engine, &mut conn, &["GET", "k"]).await,
            Frame::bulk("v")
        );
    }

    #[tokio::test]
    async fn watch_conflict_aborts_with_null_array() {
        let engine = engine();
        let mut watcher = FakeConn::new();
        let mut writer = FakeConn::new();

        one(&engine, &mut watcher, &["SET", "k", "1"]).await;
        assert_eq!(one(&engine, &mut watcher, &["WATCH", "k"]).await, cmd::ok());

        // another connection writes the watched key
        one(&engine, &mut writer, &["SET", "k", "2"]).await;

        one(&engine, &mut watcher, &["MULTI"]).await;
        one(&engine, &mut watcher, &["SET", "k", "3"]).await;
        assert_eq!(one(&engine, &mut watcher, &["EXEC"]).await, Frame::Array(None));
        assert_eq!(
            one(&engine, &mut watcher, &["GET", "k"]).await,
            Frame::bulk("2")
        );
    }

    #[tokio::test]
    async fn watch_without_conflict_commits() {
        let engine = engine();
        let mut conn = FakeConn::new();
        one(&engine, &mut conn, &["SET", "k", "1"]).await;
        one(&engine, &mut conn, &["WATCH", "k"]).await;
        one(&engine, &mut conn, &["MULTI"]).await;
        one(&engine, &mut conn, &["SET", "k", "2"]).await;
        assert_eq!(
            one(&engine, &mut conn, &["EXEC"]).await,
            Frame::array(vec![cmd::ok()])
        );
    }

    #[tokio::test]
    async fn noop_writes_do_not_disturb_watch() {
        let engine = engine();
        let mut watcher = FakeConn::new();
        let mut writer = FakeConn::new();

        one(&engine, &mut writer, &["RPUSH", "somelist", "x"]).await;
        one(&engine, &mut watcher, &["WATCH", "missing", "somelist"]).await;

        // declared write keys, but none of these mutates anything
        assert_eq!(
            one(&engine, &mut writer, &["DEL", "missing"]).await,
            Frame::Integer(0)
        );
        assert_eq!(
            one(&engine, &mut writer, &["SET", "missing", "v", "XX"]).await,
            Frame::Bulk(None)
        );
        assert_eq!(
            one(&engine, &mut writer, &["LPUSHX", "missing", "v"]).await,
            Frame::Integer(0)
        );
        assert!(one(&engine, &mut writer, &["INCR", "somelist"]).await.is_error());

        one(&engine, &mut watcher, &["MULTI"]).await;
        one(&engine, &mut watcher, &["SET", "other", "1"]).await;
        assert_eq!(
            one(&engine, &mut watcher, &["EXEC"]).await,
            Frame::array(vec![cmd::ok()])
        );
    }

    #[tokio::test]
    async fn watch_inside_multi_is_rejected() {
        let engine = engine();
        let mut conn = FakeConn::new();
        one(&engine, &mut conn, &["MULTI"]).await;
        assert!(one(&engine, &mut conn, &["WATCH", "k"]).await.is_error());
        assert!(one(&engine, &mut conn, &["SELECT", "1"]).await.is_error());
    }

    fn failing_write(db: &Db, args: &[Bytes]) -> Result<Frame, CommandError> {
        // mutate first, then fail: the undo log must cover the damage
        let key = cmd::arg_str(&args[0]);
        db.put(key, Value::Bytes(Bytes::from_static(b"poisoned")));
        Err(CommandError::Internal("injected failure".into()))
    }

    #[tokio::test]
    async fn internal_error_rolls_back_the_transaction() {
        let mut registry = Registry::standard();
        registry.register(
            "failwrite",
            failing_write,
            Some(crate::cmd::tx::write_first_key),
            Some(crate::cmd::tx::rollback_first_key),
            2,
        );
        let engine = Engine::with_registry(&Config::default(), registry);
        let mut conn = FakeConn::new();

        one(&engine, &mut conn, &["SET", "safe", "before"]).await;

        one(&engine, &mut conn, &["MULTI"]).await;
        one(&engine, &mut conn, &["SET", "safe", "changed"]).await;
        one(&engine, &mut conn, &["SET", "fresh", "new"]).await;
        one(&engine, &mut conn, &["FAILWRITE", "victim"]).await;
        let reply = one(&engine, &mut conn, &["EXEC"]).await;
        assert!(reply.is_error());

        // the keyspace equals its pre-EXEC state
        assert_eq!(
            one(&engine, &mut conn, &["GET", "safe"]).await,
            Frame::bulk("before")
        );
        assert_eq!(
            one(&engine, &mut conn, &["GET", "fresh"]).await,
            Frame::Bulk(None)
        );
        assert_eq!(
            one(&engine, &mut conn, &["GET", "victim"]).await,
            Frame::Bulk(None)
        );
    }

    #[tokio::test]
    async fn flushall_wipes_every_db() {
        let engine = engine();
        let mut conn = FakeConn::new();
        one(&engine, &mut conn, &["SET", "a", "1"]).await;
        one(&engine, &mut conn, &["SELECT", "2"]).await;
        one(&engine, &mut conn, &["SET", "b", "2"]).await;
        assert_eq!(one(&engine, &mut conn, &["FLUSHALL"]).await, cmd::ok());
        assert_eq!(one(&engine, &mut conn, &["GET", "b"]).await, Frame::Bulk(None));
        one(&engine, &mut conn, &["SELECT", "0"]).await;
        assert_eq!(one(&engine, &mut conn, &["GET", "a"]).await, Frame::Bulk(None));
    }

    #[tokio::test]
    async fn rewrite_without_aof_is_an_error() {
        let engine = engine();
        let mut conn = FakeConn::new();
        assert!(one(&engine, &mut conn, &["BGREWRITEAOF"]).await.is_error());
    }

    #[tokio::test]
    async fn empty_command_line_is_ignored() {
        let engine = engine();
        let mut conn = FakeConn::new();
        assert!(engine.exec(&mut conn, Vec::new()).await.is_empty());
    }
}
