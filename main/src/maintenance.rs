use std::sync::Arc;

use common::{storage::{db::SurrealDbClient, store::StorageManager}, utils::config::get_config};
use maintenance_scheduler::{run_loop, MaintenanceConfig};
use progress_broadcaster::Broadcaster;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Runs only the periodic maintenance jobs (section 4.7): expiry sweep,
/// temp reclamation, catalog stats, disk probe, database compaction.
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
    let broadcaster = Arc::new(Broadcaster::new(config.progress_queue_depth));
    let maintenance_config = MaintenanceConfig::from_app_config(&config);

    info!("starting maintenance scheduler");
    run_loop(db, storage, broadcaster, maintenance_config).await
}
