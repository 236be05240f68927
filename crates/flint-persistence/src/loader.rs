//! Log replay.

use std::fs::File;
use std::io::{BufReader, ErrorKind, Read};

use flint_core::{Engine, FakeConn};
use flint_protocol::{FrameStream, StreamError};
use tracing::{error, info, warn};

use crate::aof::Aof;

impl Aof {
    /// Replays the log into `engine`, executing each array frame
    /// against a synthetic connection whose only live state is the DB
    /// index (`SELECT` frames steer it).
    ///
    /// `max_bytes` limits replay to a prefix of the log — the rewriter
    /// uses this to reproduce the state as of its start offset. Bad
    /// records are logged and skipped; an IO error ends the load. A
    /// missing log file simply means a fresh server.
    ///
    /// Replay must run before [`Aof::start`]: with no writer attached,
    /// replayed commands cannot append themselves back into the log.
    pub async fn load(&self, engine: &Engine, max_bytes: Option<u64>) {
        let file = match File::open(self.path()) {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::NotFound => return,
            Err(e) => {
                warn!(path = %self.path().display(), "aof open failed: {e}");
                return;
            }
        };

        let reader: Box<dyn Read + Send> = match max_bytes {
            Some(limit) => Box::new(file.take(limit)),
            None => Box::new(file),
        };
        let mut stream = FrameStream::new(BufReader::new(reader));

        let mut conn = FakeConn::new();
        let mut replayed = 0u64;
        loop {
            match stream.next_frame() {
                Ok(Some(frame)) => {
                    let Some(line) = frame.as_command() else {
                        error!("aof record is not a command array, skipped");
                        continue;
                    };
                    for reply in engine.exec(&mut conn, line).await {
                        if reply.is_error() {
                            error!(?reply, "aof replay command failed");
                        }
                    }
                    replayed += 1;
                }
                Ok(None) => break,
                Err(StreamError::Protocol(e)) => {
                    error!("skipping malformed aof record: {e}");
                }
                Err(StreamError::Io(e)) => {
                    error!("aof read failed, stopping replay: {e}");
                    break;
                }
            }
        }
        info!(records = replayed, "aof replay finished");
    }
}
