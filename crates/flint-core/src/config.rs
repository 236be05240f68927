//! Server configuration.
//!
//! Loaded once at startup and threaded through constructors; nothing
//! here mutates after the engine is built.

use std::path::PathBuf;

/// Recognised configuration options.
#[derive(Debug, Clone)]
pub struct Config {
    /// Address to bind the listener to.
    pub bind: String,
    /// TCP port.
    pub port: u16,
    /// Number of logical keyspaces, selectable with SELECT 0..N-1.
    pub databases: usize,
    /// Whether mutations are appended to the AOF.
    pub append_only: bool,
    /// Path of the append-only file.
    pub append_filename: PathBuf,
    /// Shared-secret for AUTH. `None` disables authentication.
    pub requirepass: Option<String>,
    /// Connections beyond this limit are refused.
    pub max_clients: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1".into(),
            port: 6389,
            databases: 16,
            append_only: false,
            append_filename: PathBuf::from("flint.aof"),
            requirepass: None,
            max_clients: 10_000,
        }
    }
}

impl Config {
    /// Normalises degenerate values: zero databases falls back to the
    /// default of 16, an empty password means "no auth".
    pub fn normalise(mut self) -> Self {
        if self.databases == 0 {
            self.databases = 16;
        }
        if matches!(self.requirepass.as_deref(), Some("")) {
            self.requirepass = None;
        }
        self
    }
}
