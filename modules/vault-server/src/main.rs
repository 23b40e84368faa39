use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use vault_server::config::{load_config, AppConfig};
use vault_server::ingest::FsMediaIngestor;
use vault_server::routes::{build_router, AppState};
use vault_watchers::{
    BroadcastNotifier, FetcherConfig, HttpFetcher, ParserFactory, PgWatcherStore, WatcherService,
};

#[derive(Parser)]
#[command(name = "vault-watcher-server", about = "Media vault source watchers")]
struct Cli {
    /// Path to config TOML file
    #[arg(long, default_value = "./config/vault-watcher.toml")]
    config: PathBuf,

    /// Emit logs as JSON lines
    #[arg(long)]
    json_logs: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if cli.json_logs {
        tracing_subscriber::fmt().with_env_filter(filter).json().init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    tracing::info!(config = %cli.config.display(), "Starting vault-watcher-server");
    let file_config = load_config(&cli.config)?;
    let config = AppConfig::from_env()?;

    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(10)
        .connect(&config.database_url)
        .await?;
    sqlx::migrate!("../../migrations").run(&pool).await?;
    tracing::info!("Migrations complete");

    let fetcher = HttpFetcher::new(FetcherConfig {
        user_agent: file_config.watchers.user_agent.clone(),
        timeout: file_config.watchers.fetch_timeout(),
    })?;
    let ingestor = FsMediaIngestor::new(pool.clone(), file_config.media.dir.clone());
    let factory = ParserFactory::new(Arc::new(fetcher), Arc::new(ingestor))
        .with_courtesy_delay(file_config.watchers.courtesy_delay());

    let notifier = BroadcastNotifier::new(256);
    let service = Arc::new(WatcherService::new(
        config.vault_id.clone(),
        Arc::new(PgWatcherStore::new(pool, config.vault_id.clone())),
        Arc::new(notifier.clone()),
        factory,
    ));
    service.init().await?;

    let app = build_router(
        AppState {
            service: service.clone(),
            notifier,
        },
        &file_config.server.allowed_origins,
    );

    let addr = format!("{}:{}", file_config.server.host, file_config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(vault_id = config.vault_id.as_str(), %addr, "Listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            tokio::signal::ctrl_c().await.ok();
            tracing::info!("Shutdown requested");
        })
        .await?;

    service.shutdown().await;
    Ok(())
}
