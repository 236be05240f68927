use clap::Parser;
use flint_server::config::Options;
use tracing::error;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "flint=info".into()),
        )
        .init();

    let config = Options::parse().into_config();
    if let Err(e) = flint_server::server::run(config).await {
        error!("server failed: {e}");
        std::process::exit(1);
    }
}
