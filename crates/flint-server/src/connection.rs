//! Per-connection handler.
//!
//! Reads frames from the socket, runs them through the engine, and
//! writes replies back. Supports pipelining (every complete frame in a
//! read is executed before the batched reply is flushed) and pub/sub
//! pushes (a `select!` multiplexes socket reads with the connection's
//! push channel).

use std::collections::HashMap;
use std::sync::Arc;

use bytes::{Buf, BytesMut};
use flint_core::{CmdLine, Connection, Engine};
use flint_protocol::{parse_frame, Frame};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tracing::debug;

use crate::pubsub::PubSub;

/// Initial read buffer capacity; covers ordinary commands without
/// reallocating.
const BUF_CAPACITY: usize = 4096;

/// Read buffer cap. A client that streams an incomplete frame past
/// this is disconnected rather than allowed to consume unbounded
/// memory.
const MAX_BUF_SIZE: usize = 64 * 1024 * 1024;

/// Engine-facing state for one client socket.
struct ClientState {
    id: u64,
    db_index: usize,
    password: Option<String>,
    in_multi: bool,
    queued: Vec<CmdLine>,
    tx_errors: Vec<String>,
    watching: HashMap<String, u32>,
}

impl ClientState {
    fn new(id: u64) -> Self {
        Self {
            id,
            db_index: 0,
            password: None,
            in_multi: false,
            queued: Vec::new(),
            tx_errors: Vec::new(),
            watching: HashMap::new(),
        }
    }
}

impl Connection for ClientState {
    fn id(&self) -> u64 {
        self.id
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

/// Drives one client connection to completion.
pub async fn handle(
    mut stream: TcpStream,
    engine: Arc<Engine>,
    hub: Arc<PubSub>,
    conn_id: u64,
) -> std::io::Result<()> {
    let (push_tx, mut push_rx) = mpsc::unbounded_channel();
    hub.register(conn_id, push_tx);

    let mut state = ClientState::new(conn_id);
    let mut buf = BytesMut::with_capacity(BUF_CAPACITY);
    let mut out = BytesMut::with_capacity(BUF_CAPACITY);

    let result = loop {
        tokio::select! {
            read = stream.read_buf(&mut buf) => {
                match read {
                    Ok(0) => break Ok(()),
                    Ok(_) => {}
                    Err(e) => break Err(e),
                }

                if buf.len() > MAX_BUF_SIZE {
                    let mut err = BytesMut::new();
                    Frame::Error("ERR max buffer size exceeded, closing connection".into())
                        .serialize(&mut err);
                    let _ = stream.write_all(&err).await;
                    break Ok(());
                }

                out.clear();
                process_buffer(&engine, &mut state, &mut buf, &mut out).await;
                if !out.is_empty() {
                    if let Err(e) = stream.write_all(&out).await {
                        break Err(e);
                    }
                }
            }
            pushed = push_rx.recv() => {
                // the hub never closes the sender while we're registered
                let Some(frame) = pushed else { break Ok(()) };
                out.clear();
                frame.serialize(&mut out);
                if let Err(e) = stream.write_all(&out).await {
                    break Err(e);
                }
            }
        }
    };

    hub.unregister(conn_id);
    engine.connection_closed(conn_id);
    debug!(conn_id, "connection closed");
    result
}

/// Parses and executes every complete frame in the buffer, batching
/// the serialized replies into `out`. A malformed frame produces an
/// error reply and the decoder resyncs at the next line.
async fn process_buffer(
    engine: &Engine,
    state: &mut ClientState,
    buf: &mut BytesMut,
    out: &mut BytesMut,
) {
    loop {
        match parse_frame(buf) {
            Ok(Some((frame, consumed))) => {
                buf.advance(consumed);
                let Some(line) = frame.as_command() else {
                    // blank inline lines parse as empty arrays; skip
                    if !matches!(frame, Frame::Array(Some(ref items)) if items.is_empty()) {
                        Frame::Error("ERR protocol error: expected command array".into())
                            .serialize(out);
                    }
                    continue;
                };
                for reply in engine.exec(state, line).await {
                    reply.serialize(out);
                }
            }
            Ok(None) => break,
            Err(e) => {
                Frame::Error(format!("ERR protocol error: {e}")).serialize(out);
                resync(buf);
            }
        }
    }
}

/// Skips buffered input up to and including the next newline so the
/// decoder restarts at a header boundary.
fn resync(buf: &mut BytesMut) {
    match memchr_newline(buf) {
        Some(pos) => buf.advance(pos + 1),
        None => buf.clear(),
    }
}

fn memchr_newline(buf: &[u8]) -> Option<usize> {
    buf.iter().position(|&b| b == b'\n')
}
