//! Service entry point: loads configuration, connects to Postgres, builds
//! the Model Cache, Tagger, and Worker, starts the HTTP control plane, and
//! launches the periodic scan/idle-unload/TTL-eviction tasks.

use std::sync::Arc;

use anyhow::{Context, Result};

use photo_ai_worker::config::Config;
use photo_ai_worker::db::Database;
use photo_ai_worker::models::ModelCache;
use photo_ai_worker::tagger::Tagger;
use photo_ai_worker::worker::Worker;
use photo_ai_worker::{api, logging, periodic};

const DB_POOL_SIZE: u32 = 8;

fn main() -> Result<()> {
    let config = Config::from_env().unwrap_or_else(|e| {
        eprintln!("invalid configuration: {e:#}");
        std::process::exit(1);
    });

    logging::init(None).context("failed to initialize logging")?;

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to build tokio runtime")?
        .block_on(run(config))
}

async fn run(config: Config) -> Result<()> {
    let config = Arc::new(config);

    let db = Database::connect(&config.database.url, DB_POOL_SIZE).context("failed to connect to database")?;
    {
        let db = db.clone();
        tokio::task::spawn_blocking(move || db.initialize())
            .await
            .context("database initialization task panicked")?
            .context("failed to initialize database schema")?;
    }
    let db = Arc::new(db);

    let models = Arc::new(ModelCache::new(
        std::path::PathBuf::from(&config.paths.models_path),
        config.models.repo_override.clone(),
        config.performance.threads,
        config.models.ttl_secs,
    ));

    let tagger = Arc::new(Tagger::new(
        models.clone(),
        config.tags.min_confidence,
        config.tags.max_per_photo,
    ));

    let worker = Arc::new(
        Worker::new(config.clone(), db.clone(), models.clone(), tagger).context("failed to construct worker")?,
    );

    periodic::spawn_scan_timer(worker.clone(), config.auto_start.scan_interval_secs);
    periodic::spawn_idle_unload_timer(worker.clone(), config.models.idle_unload_minutes);
    periodic::spawn_ttl_eviction_timer(worker.clone(), config.models.ttl_secs);

    if config.auto_start.auto_start {
        if let Err(e) = worker.start() {
            tracing::warn!(error = %e, "auto-start: worker did not start");
        }
    }

    let app = api::router(worker.clone());
    let addr = format!("{}:{}", config.api.host, config.api.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind HTTP listener on {addr}"))?;

    tracing::info!(%addr, "photo-ai-worker listening");
    axum::serve(listener, app).await.context("HTTP server failed")?;

    Ok(())
}
