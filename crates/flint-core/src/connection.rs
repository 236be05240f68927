//! The connection seam between the engine and the network layer.
//!
//! The engine never touches sockets. Everything it needs from a client
//! connection — selected DB, presented password, transaction state,
//! watched keys — comes through this trait. The server crate
//! implements it for real clients; [`FakeConn`] implements it for AOF
//! replay, where only the DB index matters.

use std::collections::HashMap;

use crate::CmdLine;

/// Per-connection state the engine reads and writes during dispatch.
pub trait Connection: Send {
    /// Stable identity for pub/sub bookkeeping.
    fn id(&self) -> u64;

    fn select_db(&mut self, index: usize);
    fn db_index(&self) -> usize;

    /// Remembers the password presented via AUTH.
    fn set_password(&mut self, password: String);
    fn password(&self) -> Option<&str>;

    /// Whether the connection is between MULTI and EXEC/DISCARD.
    fn in_multi(&self) -> bool;
    fn set_multi(&mut self, on: bool);

    /// The transaction queue: command lines buffered since MULTI.
    fn queued(&mut self) -> &mut Vec<CmdLine>;

    /// Syntax errors collected while queueing; a non-empty list makes
    /// EXEC abort.
    fn tx_errors(&mut self) -> &mut Vec<String>;

    /// Watched key versions, recorded at WATCH time: key → version.
    fn watching(&mut self) -> &mut HashMap<String, u32>;
}

/// The synthetic connection used when replaying the append-only file.
/// Only the DB index does anything; SELECT frames in the log steer it.
#[derive(Debug, Default)]
pub struct FakeConn {
    db_index: usize,
    password: Option<String>,
    in_multi: bool,
    queued: Vec<CmdLine>,
    tx_errors: Vec<String>,
    watching: HashMap<String, u32>,
}

impl FakeConn {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Connection for FakeConn {
    fn id(&self) -> u64 {
        0
    }

    fn select_db(&mut self, index: usize) {
        self.db_index = index;
    }

    fn db_index(&self) -> usize {
        self.db_index
    }

    fn set_password(&mut self, password: String) {
        self.password = Some(password);
    }

    fn password(&self) -> Option<&str> {
        self.password.as_deref()
    }

    fn in_multi(&self) -> bool {
        self.in_multi
    }

    fn set_multi(&mut self, on: bool) {
        self.in_multi = on;
    }

    fn queued(&mut self) -> &mut Vec<CmdLine> {
        &mut self.queued
    }

    fn tx_errors(&mut self) -> &mut Vec<String> {
        &mut self.tx_errors
    }

    fn watching(&mut self) -> &mut HashMap<String, u32> {
        &mut self.watching
    }
}
