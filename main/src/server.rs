use std::sync::Arc;

use api_router::{api_routes_v1, api_state::ApiState};
use common::{storage::store::StorageManager, utils::config::get_config};
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Runs only the HTTP API (upload endpoints, progress websocket, health
/// probes). Deployed standalone, this process's `Broadcaster` only ever
/// sees events published by its own `UploadCoordinator` calls (initiate,
/// chunk, cancel) — terminal `Completed`/`Failed` events, which the
/// assembler worker publishes, never cross the process boundary. Run the
/// combined `main` binary instead when live progress through assembly is
/// required.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::from_default_env())
        .try_init()
        .ok();

    let config = get_config()?;
    let http_port = config.http_port;

    let storage = Arc::new(StorageManager::new(&config).await?);
    let api_state = ApiState::new(config, storage).await?;

    let app = api_routes_v1::<ApiState>().with_state(api_state);

    info!("starting API server on 0.0.0.0:{http_port}");
    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{http_port}")).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
