//! Online log compaction.
//!
//! Three phases, with the pause lock held only at the edges:
//!
//! 1. *Start*: pause appends, fsync, record the log size `S` and the
//!    writer's current DB `D`, open a temp file, resume appends. New
//!    writes keep landing in the live log past offset `S`.
//! 2. *Do*: replay the live log up to `S` into a private engine
//!    snapshot, then dump every keyspace into the temp file as one
//!    reconstruction command per key plus `PEXPIREAT` for deadlines.
//! 3. *Finish*: pause appends again, copy the live log's tail (the
//!    writes that happened during phase 2) into the temp file — with a
//!    `SELECT D` in front so the tail replays against the right
//!    keyspace — rename the temp file over the live log, reopen, and
//!    re-announce the writer's current DB in the fresh log.
//!
//! Replaying the rewritten log yields the same keyspaces, TTLs, and
//! selected DB as the old log plus everything appended meanwhile; the
//! pause lock serialises the rename against concurrent appends, so
//! tail records land exactly once.

use std::fs::File;
use std::io::{self, Seek, SeekFrom, Write};

use flint_core::cmd::marshal;
use flint_core::cmd_line;
use flint_protocol::Frame;
use tempfile::NamedTempFile;
use tracing::{error, info, warn};

use crate::aof::{open_for_append, Aof};

/// Context carried across the rewrite phases.
struct RewriteCtx {
    tmp: NamedTempFile,
    /// Size of the live log at start; everything past it is "the tail".
    file_size: u64,
    /// The writer's selected DB at start.
    db_index: usize,
}

impl Aof {
    /// Runs the full rewrite protocol, logging and abandoning the
    /// attempt on any IO failure (the live log is untouched until the
    /// final rename).
    pub(crate) async fn run_rewrite(&self) {
        let mut ctx = match self.start_rewrite() {
            Ok(ctx) => ctx,
            Err(e) => {
                warn!("aof rewrite start failed: {e}");
                return;
            }
        };
        if let Err(e) = self.do_rewrite(&mut ctx).await {
            error!("aof rewrite failed: {e}");
            return;
        }
        if let Err(e) = self.finish_rewrite(ctx) {
            error!("aof rewrite finish failed: {e}");
            return;
        }
        info!("aof rewrite complete");
    }

    fn start_rewrite(&self) -> io::Result<RewriteCtx> {
        let _pause = self.pause.write();
        let state = self.state.lock();

        let Some(file) = state.file.as_ref() else {
            return Err(io::Error::new(
                io::ErrorKind::NotConnected,
                "aof writer is not running",
            ));
        };
        file.sync_all()?;
        let file_size = file.metadata()?.len();
        let tmp = NamedTempFile::new()?;

        Ok(RewriteCtx {
            tmp,
            file_size,
            db_index: state.current_db.unwrap_or(0),
        })
    }

    async fn do_rewrite(&self, ctx: &mut RewriteCtx) -> io::Result<()> {
        // rebuild the state as of the start offset in a private engine
        let snapshot = self.make_snapshot_engine();
        self.load(&snapshot, Some(ctx.file_size)).await;

        let out = ctx.tmp.as_file_mut();
        for index in 0..self.databases() {
            let Some(db) = snapshot.db_at(index) else {
                break;
            };
            write_frame(out, Frame::command(cmd_line(&["SELECT", &index.to_string()])))?;

            let mut write_error = None;
            db.for_each(|key, value, deadline| {
                let rebuild = Frame::command(marshal::entity_to_cmd(key, value));
                if let Err(e) = write_frame(out, rebuild) {
                    write_error = Some(e);
                    return false;
                }
                if let Some(at_ms) = deadline {
                    let expire = Frame::command(marshal::expire_cmd(key, at_ms));
                    if let Err(e) = write_frame(out, expire) {
                        write_error = Some(e);
                        return false;
                    }
                }
                true
            });
            if let Some(e) = write_error {
                return Err(e);
            }
        }
        Ok(())
    }

    fn finish_rewrite(&self, mut ctx: RewriteCtx) -> io::Result<()> {
        let _pause = self.pause.write();
        let mut state = self.state.lock();

        // the tail replays against the DB selected when the rewrite
        // started, so announce it before copying
        let out = ctx.tmp.as_file_mut();
        write_frame(
            out,
            Frame::command(cmd_line(&["SELECT", &ctx.db_index.to_string()])),
        )?;

        let mut live = File::open(self.path())?;
        live.seek(SeekFrom::Start(ctx.file_size))?;
        io::copy(&mut live, out)?;
        out.sync_all()?;

        // atomically replace the live log and reopen for appending
        ctx.tmp.persist(self.path()).map_err(|e| e.error)?;
        let file = open_for_append(self.path())?;
        state.file = Some(file);

        // the new log's selected DB is whatever the tail left it at;
        // restore the writer's actual current DB on top
        let current = state.current_db.unwrap_or(0);
        state.current_db = Some(current);
        if let Some(file) = state.file.as_mut() {
            write_frame(file, Frame::command(cmd_line(&["SELECT", &current.to_string()])))?;
        }
        Ok(())
    }
}

fn write_frame(out: &mut File, frame: Frame) -> io::Result<()> {
    out.write_all(&frame.to_bytes())
}
