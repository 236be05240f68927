//! The command table.
//!
//! Every keyspace command is one row: a handler, a key extractor for
//! lock planning, an undo generator for transactions, and an arity.
//! The engine knows nothing about individual commands — adding one is
//! an addition to this table, not an engine change.

use std::collections::HashMap;

use bytes::Bytes;
use flint_protocol::Frame;
use thiserror::Error;

use crate::db::Db;
use crate::CmdLine;

/// Internal handler fault. User-visible failures (wrong type, bad
/// arguments) are `Ok(Frame::Error(..))` replies; an `Err` here means
/// the handler itself broke and, inside EXEC, triggers undo replay.
#[derive(Debug, Error)]
pub enum CommandError {
    #[error("internal error: {0}")]
    Internal(String),
}

/// Executes a command against one keyspace. `args` excludes the
/// command name.
pub type Handler = fn(&Db, &[Bytes]) -> Result<Frame, CommandError>;

/// Extracts `(write_keys, read_keys)` from the arguments, for lock
/// ordering and WATCH bookkeeping.
pub type KeysFn = fn(&[Bytes]) -> (Vec<String>, Vec<String>);

/// Produces the command lines that undo this command against the
/// current state. Called before execution inside EXEC.
pub type UndoFn = fn(&Db, &[Bytes]) -> Vec<CmdLine>;

/// One registry row.
pub struct CommandSpec {
    pub name: &'static str,
    pub handler: Handler,
    pub keys_fn: Option<KeysFn>,
    pub undo_fn: Option<UndoFn>,
    /// Expected token count including the name; negative `-n` means
    /// "at least n".
    pub arity: i32,
}

impl CommandSpec {
    /// Checks a command line's token count against the declared arity.
    pub fn arity_ok(&self, argc: usize) -> bool {
        let argc = argc as i32;
        if self.arity >= 0 {
            argc == self.arity
        } else {
            argc >= -self.arity
        }
    }

    /// Extracts the write/read key sets for a command line's args.
    pub fn keys(&self, args: &[Bytes]) -> (Vec<String>, Vec<String>) {
        match self.keys_fn {
            Some(f) => f(args),
            None => (Vec::new(), Vec::new()),
        }
    }
}

/// Command name → spec. Names are stored lowercase; lookups take the
/// already-lowercased name.
pub struct Registry {
    table: HashMap<&'static str, CommandSpec>,
}

impl Registry {
    /// An empty registry. Most callers want [`Registry::standard`].
    pub fn new() -> Self {
        Self {
            table: HashMap::new(),
        }
    }

    /// The full flint command table.
    pub fn standard() -> Self {
        let mut registry = Self::new();
        crate::cmd::register_all(&mut registry);
        registry
    }

    pub fn register(
        &mut self,
        name: &'static str,
        handler: Handler,
        keys_fn: Option<KeysFn>,
        undo_fn: Option<UndoFn>,
        arity: i32,
    ) {
        debug_assert!(
            name.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit()),
            "registry names are lowercase"
        );
        self.table.insert(
            name,
            CommandSpec {
                name,
                handler,
                keys_fn,
                undo_fn,
                arity,
            },
        );
    }

    pub fn get(&self, name_lower: &str) -> Option<&CommandSpec> {
        self.table.get(name_lower)
    }

    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::standard()
    }
}
