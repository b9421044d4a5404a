use std::sync::Arc;

use api_router::{api_routes_v1, api_state::ApiState};
use assembler_pipeline::{
    pipeline::{AssemblerConfig, AssemblerPipeline, DefaultAssemblerServices},
    run_worker_loop,
};
use common::{
    storage::{db::SurrealDbClient, store::StorageManager, types::upload::DEFAULT_LEASE_SECS},
    utils::config::get_config,
};
use maintenance_scheduler::{run_loop as run_maintenance_loop, MaintenanceConfig};
use metadata_enricher::Enricher;
use progress_broadcaster::Broadcaster;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use upload_coordinator::UploadCoordinator;

/// Single-process topology: API server, assembler worker, and maintenance
/// scheduler share one `Broadcaster`, so a terminal event published by the
/// assembler worker reaches a client subscribed through this same
/// process's websocket route. This is the supported deployment for live
/// progress through assembly; the split `server`/`assembler-worker` bins
/// trade that for independent scaling (section 5's "parallel workers"
/// scheduling model).
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::from_default_env())
        .try_init()
        .ok();

    let config = Arc::new(get_config()?);
    let http_port = config.http_port;

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
    let coordinator = Arc::new(UploadCoordinator::new(db.clone(), storage.clone(), config.clone()));

    let api_state = ApiState {
        db: db.clone(),
        config: config.clone(),
        storage: storage.clone(),
        coordinator,
        broadcaster: broadcaster.clone(),
    };
    let app = api_routes_v1::<ApiState>().with_state(api_state);

    let enricher = Arc::new(Enricher::from_config(&config, Vec::new()));
    let services = Arc::new(DefaultAssemblerServices::new(storage.clone(), enricher));
    let assembler_config = AssemblerConfig::from_app_config(&config);
    let pipeline = Arc::new(
        AssemblerPipeline::new(db.clone(), assembler_config, services)
            .with_broadcaster(broadcaster.clone()),
    );

    let assembler_db = db.clone();
    tokio::spawn(async move {
        if let Err(err) = run_worker_loop(assembler_db, pipeline, DEFAULT_LEASE_SECS).await {
            error!(error = %err, "assembler worker exited");
        }
    });

    let maintenance_db = db.clone();
    let maintenance_storage = storage.clone();
    let maintenance_broadcaster = broadcaster.clone();
    let maintenance_config = MaintenanceConfig::from_app_config(&config);
    tokio::spawn(run_maintenance_loop(
        maintenance_db,
        maintenance_storage,
        maintenance_broadcaster,
        maintenance_config,
    ));

    info!("starting combined server on 0.0.0.0:{http_port}");
    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{http_port}")).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
