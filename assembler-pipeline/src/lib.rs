#![allow(clippy::missing_docs_in_private_items, clippy::result_large_err)]

pub mod headers;
pub mod pipeline;

use std::sync::Arc;

use chrono::Utc;
use common::storage::{db::SurrealDbClient, types::upload::Upload};
pub use pipeline::{AssemblerConfig, AssemblerPipeline, AssemblerTuning};
use tokio::time::{sleep, Duration};
use tracing::{error, info, warn};
use uuid::Uuid;

pub async fn run_worker_loop(
    db: Arc<SurrealDbClient>,
    assembler_pipeline: Arc<AssemblerPipeline>,
    lease_secs: i64,
) -> Result<(), Box<dyn std::error::Error>> {
    let worker_id = format!("assembler-worker-{}", Uuid::new_v4());
    let lease = chrono::Duration::seconds(lease_secs);
    let idle_backoff = Duration::from_millis(500);

    loop {
        match Upload::claim_next_ready(&db, &worker_id, Utc::now(), lease).await {
            Ok(Some(upload)) => {
                let upload_id = upload.id.clone();
                info!(%worker_id, %upload_id, "claimed upload for assembly");
                if let Err(err) = assembler_pipeline.process_upload(upload).await {
                    error!(%worker_id, %upload_id, error = %err, "assembly failed");
                }
            }
            Ok(None) => {
                sleep(idle_backoff).await;
            }
            Err(err) => {
                error!(%worker_id, error = %err, "failed to claim upload for assembly");
                warn!("backing off for 1s after claim error");
                sleep(Duration::from_secs(1)).await;
            }
        }
    }
}
