use std::sync::Arc;

use assembler_pipeline::{
    pipeline::{AssemblerConfig, AssemblerPipeline, DefaultAssemblerServices},
    run_worker_loop,
};
use common::{
    storage::{db::SurrealDbClient, store::StorageManager, types::upload::DEFAULT_LEASE_SECS},
    utils::config::get_config,
};
use metadata_enricher::Enricher;
use progress_broadcaster::Broadcaster;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Runs only the assembler worker loop (section 4.4). Standalone, its
/// `Broadcaster` has no subscribers (those connect to the `server`
/// process), so terminal events are published into the void — harmless,
/// since `Upload`/`CatalogEntry` rows remain the durable source of truth
/// polled by `GET /upload/status/{id}`.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::from_default_env())
        .try_init()
        .ok();

    let config = get_config()?;

    let db = Arc::new(
        SurrealDbClient::new(
            &config.surrealdb_address,
            &config.surrealdb_username,
            &config.surrealdb_password,
            &config.surrealdb_namespace,
            &config.surrealdb_database,
        )
        .await?,
    );
    db.ensure_initialized().await?;

    let storage = Arc::new(StorageManager::new(&config).await?);
    let enricher = Arc::new(Enricher::from_config(&config, Vec::new()));
    let services = Arc::new(DefaultAssemblerServices::new(storage, enricher));
    let assembler_config = AssemblerConfig::from_app_config(&config);
    let broadcaster = Arc::new(Broadcaster::new(config.progress_queue_depth));

    let pipeline = Arc::new(
        AssemblerPipeline::new(db.clone(), assembler_config, services).with_broadcaster(broadcaster),
    );

    info!("starting assembler worker");
    run_worker_loop(db, pipeline, DEFAULT_LEASE_SECS).await
}
