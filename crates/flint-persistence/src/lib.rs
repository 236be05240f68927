//! flint-persistence: the append-only file.
//!
//! A bounded queue decouples command execution from disk: handlers
//! enqueue committed mutations, a dedicated writer thread drains the
//! queue into the log, interleaving `SELECT` frames whenever the
//! record's keyspace differs from the writer's current one. Startup
//! replays the log through the frame decoder before the server accepts
//! connections, and the rewriter compacts it online without blocking
//! writes.

pub mod aof;
mod loader;
mod rewrite;

pub use aof::Aof;
