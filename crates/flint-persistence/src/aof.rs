//! The AOF handler: bounded queue, writer thread, pause lock.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::JoinHandle;

use async_trait::async_trait;
use crossbeam_channel::{Receiver, Sender};
use flint_core::engine::AofBackend;
use flint_core::{cmd_line, CmdLine, Engine};
use flint_protocol::Frame;
use parking_lot::{Mutex, RwLock};
use tracing::{info, warn};

/// Queue capacity. Producers block when the writer falls this far
/// behind, which is the backpressure mechanism.
const AOF_QUEUE_SIZE: usize = 1 << 16;

/// One queued mutation.
struct Payload {
    db_index: usize,
    line: CmdLine,
}

/// The live log file plus the writer's notion of the selected DB.
/// `file` is `None` until [`Aof::start`] opens the log for appending.
/// `current_db` starts as `None` so the first record after (re)open
/// always emits a `SELECT` — a reopened log may end on any keyspace.
pub(crate) struct AofState {
    pub(crate) file: Option<File>,
    pub(crate) current_db: Option<usize>,
}

/// Builds the private engine snapshot the rewriter replays into.
pub type EngineMaker = Box<dyn Fn() -> Engine + Send + Sync>;

/// Append-only persistence handler.
///
/// Shared by the engine (through [`AofBackend`]), the writer thread,
/// and the rewriter. Lock order is always pause → state.
pub struct Aof {
    path: PathBuf,
    databases: usize,
    /// Writers hold the read side per record; the rewriter takes the
    /// write side to pause appends during its start/finish phases.
    pub(crate) pause: Arc<RwLock<()>>,
    pub(crate) state: Arc<Mutex<AofState>>,
    tx: Mutex<Option<Sender<Payload>>>,
    writer: Mutex<Option<JoinHandle<()>>>,
    engine_maker: EngineMaker,
}

impl Aof {
    /// Creates a handler for the log at `path`. Nothing is opened or
    /// spawned yet: call [`Aof::load`] to replay, then [`Aof::start`]
    /// to begin appending.
    pub fn new(path: impl Into<PathBuf>, databases: usize, engine_maker: EngineMaker) -> Self {
        Self {
            path: path.into(),
            databases,
            pause: Arc::new(RwLock::new(())),
            state: Arc::new(Mutex::new(AofState {
                file: None,
                current_db: None,
            })),
            tx: Mutex::new(None),
            writer: Mutex::new(None),
            engine_maker,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub(crate) fn databases(&self) -> usize {
        self.databases
    }

    pub(crate) fn make_snapshot_engine(&self) -> Engine {
        (self.engine_maker)()
    }

    /// Opens the log for appending and spawns the writer thread.
    pub fn start(&self) -> std::io::Result<()> {
        let file = open_for_append(&self.path)?;
        {
            let mut state = self.state.lock();
            state.file = Some(file);
            state.current_db = None;
        }

        let (tx, rx) = crossbeam_channel::bounded(AOF_QUEUE_SIZE);
        *self.tx.lock() = Some(tx);

        let pause = Arc::clone(&self.pause);
        let state = Arc::clone(&self.state);
        let handle = std::thread::Builder::new()
            .name("flint-aof".into())
            .spawn(move || drain_queue(rx, pause, state))
            .expect("spawn aof writer thread");
        *self.writer.lock() = Some(handle);

        info!(path = %self.path.display(), "aof writer started");
        Ok(())
    }
}

pub(crate) fn open_for_append(path: &Path) -> std::io::Result<File> {
    OpenOptions::new().create(true).append(true).open(path)
}

/// Writer loop: consumes the queue until every sender is gone, then
/// fsyncs and exits. Each record is written under the pause lock's
/// read side; a failed write is logged and skipped so producers never
/// wedge behind a sick disk.
fn drain_queue(rx: Receiver<Payload>, pause: Arc<RwLock<()>>, state: Arc<Mutex<AofState>>) {
    for payload in rx {
        let _pause = pause.read();
        let mut state = state.lock();
        write_record(&mut state, payload.db_index, &payload.line);
    }

    let state = state.lock();
    if let Some(file) = &state.file {
        if let Err(e) = file.sync_all() {
            warn!("aof final fsync failed: {e}");
        }
    }
}

/// Appends one record, emitting a `SELECT` first when the record
/// belongs to a different keyspace than the previous one.
pub(crate) fn write_record(state: &mut AofState, db_index: usize, line: &CmdLine) {
    let Some(file) = state.file.as_mut() else {
        return;
    };

    if state.current_db != Some(db_index) {
        let select = Frame::command(cmd_line(&["SELECT", &db_index.to_string()]));
        if let Err(e) = file.write_all(&select.to_bytes()) {
            warn!("aof select write failed, record skipped: {e}");
            return;
        }
        state.current_db = Some(db_index);
    }

    let record = Frame::command(line.clone());
    if let Err(e) = file.write_all(&record.to_bytes()) {
        warn!("aof record write failed: {e}");
    }
}

#[async_trait]
impl AofBackend for Aof {
    fn append(&self, db_index: usize, line: &CmdLine) {
        let sender = self.tx.lock().clone();
        if let Some(sender) = sender {
            // blocks when the queue is full; returns Err only after
            // close(), when dropping the record is correct
            let _ = sender.send(Payload {
                db_index,
                line: line.clone(),
            });
        }
    }

    async fn rewrite(&self) {
        self.run_rewrite().await;
    }

    fn close(&self) {
        let sender = self.tx.lock().take();
        drop(sender);
        if let Some(handle) = self.writer.lock().take() {
            if handle.join().is_err() {
                warn!("aof writer thread panicked");
            }
        }
        info!("aof writer stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flint_core::Config;
    use flint_protocol::FrameStream;

    fn test_aof(path: &Path) -> Aof {
        let config = Config::default();
        Aof::new(
            path,
            16,
            Box::new(move || Engine::new(&config)),
        )
    }

    fn read_all(path: &Path) -> Vec<Vec<String>> {
        let file = File::open(path).unwrap();
        FrameStream::new(file)
            .map(|frame| {
                frame
                    .unwrap()
                    .as_command()
                    .unwrap()
                    .iter()
                    .map(|b| String::from_utf8_lossy(b).into_owned())
                    .collect()
            })
            .collect()
    }

    #[test]
    fn writer_interleaves_select_frames() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.aof");

        let aof = test_aof(&path);
        aof.start().unwrap();
        aof.append(0, &cmd_line(&["SET", "a", "1"]));
        aof.append(2, &cmd_line(&["SET", "b", "2"]));
        aof.append(2, &cmd_line(&["SET", "c", "3"]));
        aof.append(0, &cmd_line(&["DEL", "a"]));
        aof.close();

        assert_eq!(
            read_all(&path),
            vec![
                vec!["SELECT", "0"],
                vec!["SET", "a", "1"],
                vec!["SELECT", "2"],
                vec!["SET", "b", "2"],
                vec!["SET", "c", "3"],
                vec!["SELECT", "0"],
                vec!["DEL", "a"],
            ]
        );
    }

    #[test]
    fn append_after_close_is_dropped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.aof");

        let aof = test_aof(&path);
        aof.start().unwrap();
        aof.append(0, &cmd_line(&["SET", "a", "1"]));
        aof.close();
        aof.append(0, &cmd_line(&["SET", "b", "2"]));

        assert_eq!(
            read_all(&path),
            vec![vec!["SELECT", "0"], vec!["SET", "a", "1"]]
        );
    }

    #[test]
    fn append_without_start_is_a_noop() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.aof");
        let aof = test_aof(&path);
        aof.append(0, &cmd_line(&["SET", "a", "1"]));
        assert!(!path.exists());
    }
}
