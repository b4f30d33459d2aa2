use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;

use circuitmap_common::Config;
use circuitmap_import::{
    HttpSegmentation, ImportWorker, Importer, ImporterSettings, PgCatalog, PgJobStore,
};
use circuitmap_links::PgLinkStore;

#[derive(Parser)]
#[command(name = "circuitmap-worker", about = "Imports segmentation skeletons and synapses into the catalog")]
struct Cli {
    /// Apply database migrations before starting
    #[arg(long)]
    migrate: bool,

    /// Drain the queue once and exit instead of polling
    #[arg(long)]
    once: bool,

    /// Emit JSON logs
    #[arg(long, env = "LOG_JSON")]
    json: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("warn,circuitmap=info"));
    if cli.json {
        tracing_subscriber::fmt().with_env_filter(filter).json().init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    let config = Config::from_env()?;
    config.log_redacted();

    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(config.max_concurrent_runs as u32 * 2 + 2)
        .connect(&config.database_url)
        .await
        .context("Failed to connect to database")?;
    tracing::info!("Connected to database");

    if cli.migrate {
        sqlx::migrate!("../../migrations").run(&pool).await?;
        tracing::info!("Migrations complete");
    }

    let links = Arc::new(PgLinkStore::new(pool.clone()).with_timeout(config.fetch_timeout));
    let segmentation = Arc::new(HttpSegmentation::new(
        &config.segmentation_url,
        config.fetch_timeout,
    )?);
    let importer = Arc::new(Importer::new(
        links,
        Arc::new(PgCatalog::new(pool.clone()).with_timeout(config.fetch_timeout)),
        Arc::new(PgJobStore::new(pool.clone()).with_timeout(config.fetch_timeout)),
        segmentation.clone(),
        segmentation,
        ImporterSettings::from(&config),
    ));
    let worker = ImportWorker::new(importer, config.max_concurrent_runs, config.poll_interval);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Shutdown signal received");
            let _ = shutdown_tx.send(true);
        }
    });

    let processed = if cli.once {
        worker.run_once(shutdown_rx).await?
    } else {
        worker.run(shutdown_rx).await?
    };

    tracing::info!(processed, "circuitmap-worker exiting");
    Ok(())
}
