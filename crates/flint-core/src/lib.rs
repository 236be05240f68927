//! flint-core: the storage engine.
//!
//! Owns the value containers, the logical keyspaces with TTL and
//! per-key striped locking, the command registry, and the engine that
//! dispatches commands and runs MULTI/EXEC transactions. Persistence
//! and the network surface live in their own crates and talk to the
//! engine through the seams defined here ([`AofBackend`], [`Hub`],
//! [`Connection`]).

pub mod cmd;
pub mod config;
pub mod connection;
pub mod db;
pub mod engine;
pub mod locker;
pub mod registry;
pub mod time;
pub mod types;

use bytes::Bytes;

pub use config::Config;
pub use connection::{Connection, FakeConn};
pub use db::Db;
pub use engine::{AofBackend, Engine, Hub};
pub use registry::Registry;
pub use types::Value;

/// One command line: the name followed by its arguments, all
/// binary-safe. This is the unit queued in transactions, appended to
/// the AOF, and handed to handlers (minus the name).
pub type CmdLine = Vec<Bytes>;

/// Builds a command line from string parts.
pub fn cmd_line(parts: &[&str]) -> CmdLine {
    parts
        .iter()
        .map(|p| Bytes::copy_from_slice(p.as_bytes()))
        .collect()
}
