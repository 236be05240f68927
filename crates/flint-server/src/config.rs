//! Command-line options.

use clap::Parser;
use flint_core::Config;

/// An in-memory key-value server with append-only persistence.
#[derive(Debug, Parser)]
#[command(name = "flint-server", version)]
pub struct Options {
    /// Address to bind.
    #[arg(long, default_value = "127.0.0.1")]
    pub bind: String,

    /// TCP port to listen on.
    #[arg(long, default_value_t = 6389)]
    pub port: u16,

    /// Number of logical databases.
    #[arg(long, default_value_t = 16)]
    pub databases: usize,

    /// Enable the append-only file.
    #[arg(long)]
    pub appendonly: bool,

    /// Path of the append-only file.
    #[arg(long, default_value = "flint.aof")]
    pub appendfilename: std::path::PathBuf,

    /// Require clients to AUTH with this password.
    #[arg(long)]
    pub requirepass: Option<String>,

    /// Maximum number of simultaneous client connections.
    #[arg(long, default_value_t = 10_000)]
    pub maxclients: usize,
}

impl Options {
    pub fn into_config(self) -> Config {
        Config {
            bind: self.bind,
            port: self.port,
            databases: self.databases,
            append_only: self.appendonly,
            append_filename: self.appendfilename,
            requirepass: self.requirepass,
            max_clients: self.maxclients,
        }
        .normalise()
    }
}
