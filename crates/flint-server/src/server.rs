//! Listener setup and the accept loop.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use bytes::BytesMut;
use flint_core::{Config, Engine};
use flint_persistence::Aof;
use flint_protocol::Frame;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpListener;
use tracing::{error, info, warn};

use crate::connection;
use crate::pubsub::PubSub;

/// A bound, fully wired server: engine built, AOF replayed and
/// started, pub/sub attached. Call [`Server::serve`] to accept
/// clients.
pub struct Server {
    listener: TcpListener,
    engine: Arc<Engine>,
    hub: Arc<PubSub>,
    max_clients: usize,
}

impl Server {
    /// Builds the engine, replays the append-only file when enabled,
    /// and binds the listener.
    pub async fn bind(config: Config) -> std::io::Result<Server> {
        let config = config.normalise();
        let engine = Arc::new(Engine::new(&config));

        let hub = Arc::new(PubSub::new());
        engine.set_hub(Arc::clone(&hub) as Arc<dyn flint_core::Hub>);

        if config.append_only {
            let maker_config = config.clone();
            let aof = Arc::new(Aof::new(
                &config.append_filename,
                config.databases,
                Box::new(move || Engine::new(&maker_config)),
            ));
            // replay before the writer starts so nothing re-logs itself
            aof.load(&engine, None).await;
            aof.start()?;
            engine.attach_aof(aof);
            info!(path = %config.append_filename.display(), "append-only file enabled");
        }

        let listener = TcpListener::bind((config.bind.as_str(), config.port)).await?;
        info!(addr = %listener.local_addr()?, databases = config.databases, "listening");

        Ok(Server {
            listener,
            engine,
            hub,
            max_clients: config.max_clients,
        })
    }

    pub fn local_addr(&self) -> std::io::Result<std::net::SocketAddr> {
        self.listener.local_addr()
    }

    pub fn engine(&self) -> &Arc<Engine> {
        &self.engine
    }

    /// Accepts connections until the listener fails, handing each to
    /// its own task.
    pub async fn serve(self) -> std::io::Result<()> {
        let active = Arc::new(AtomicUsize::new(0));
        let next_id = AtomicU64::new(1);

        loop {
            let (mut stream, peer) = self.listener.accept().await?;

            if active.load(Ordering::Relaxed) >= self.max_clients {
                warn!(%peer, "connection refused: maxclients reached");
                let mut out = BytesMut::new();
                Frame::Error("ERR max number of clients reached".into()).serialize(&mut out);
                let _ = stream.write_all(&out).await;
                continue;
            }

            let conn_id = next_id.fetch_add(1, Ordering::Relaxed);
            let engine = Arc::clone(&self.engine);
            let hub = Arc::clone(&self.hub);
            let active = Arc::clone(&active);
            active.fetch_add(1, Ordering::Relaxed);

            tokio::spawn(async move {
                if let Err(e) = connection::handle(stream, engine, hub, conn_id).await {
                    error!(%peer, "connection error: {e}");
                }
                active.fetch_sub(1, Ordering::Relaxed);
            });
        }
    }
}

/// Binds and serves until ctrl-c, then shuts the persistence layer
/// down cleanly.
pub async fn run(config: Config) -> std::io::Result<()> {
    let server = Server::bind(config).await?;
    let engine = Arc::clone(server.engine());

    tokio::select! {
        result = server.serve() => result,
        _ = tokio::signal::ctrl_c() => {
            info!("shutting down");
            engine.close();
            Ok(())
        }
    }
}
