use std::path::Path;

use poem::{Server, listener::TcpListener};
use tracing_error::ErrorLayer;
use tracing_subscriber::{EnvFilter, fmt::SubscriberBuilder, prelude::*};
use video_progress_sync::{config::Config, progress_api, storage};

type ProgressSyncResult<T> = anyhow::Result<T>;

#[tokio::main]
async fn main() -> ProgressSyncResult<()> {
    // Respect RUST_LOG if set, default to info for our crate and warn for deps.
    let default_filter = format!(
        "{}=info,poem=info,sea_orm=warn,reqwest=warn",
        env!("CARGO_PKG_NAME")
    );
    let env_filter = std::env::var("RUST_LOG").unwrap_or(default_filter);
    SubscriberBuilder::default()
        .with_env_filter(EnvFilter::new(env_filter))
        .with_target(false)
        .with_level(true)
        .pretty()
        .finish()
        .with(ErrorLayer::default())
        .init();
    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        "starting video progress sync"
    );
    if Path::new(".env.local").exists() {
        dotenvy::from_filename(".env.local")?;
    } else if Path::new(".env").exists() {
        dotenvy::from_filename(".env")?;
    };
    let config = Config::load()?;
    if let Err(e) = config.validate() {
        return Err(anyhow::anyhow!(e));
    }

    let store = storage::open(&config).await?;
    run_poem(store, &config).await
}

async fn run_poem(
    store: std::sync::Arc<dyn storage::ProgressStore>,
    config: &Config,
) -> ProgressSyncResult<()> {
    let server_url = format!("http://{}", config.bind_addr);
    let app = progress_api::build_app(store, config.rate_limit_per_minute, &server_url);

    tracing::info!(
        bind_addr = %config.bind_addr,
        rate_limit_per_minute = config.rate_limit_per_minute,
        "starting HTTP server"
    );
    Server::new(TcpListener::bind(config.bind_addr.clone()))
        .run(app)
        .await?;
    Ok(())
}
