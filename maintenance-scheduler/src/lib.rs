#![allow(clippy::missing_docs_in_private_items)]

//! Single cooperative loop over the five maintenance jobs (section 4.7),
//! structured like `assembler-pipeline::run_worker_loop`'s sleep-and-poll
//! shape but fanning out over several independent `tokio::time::interval`
//! cadences instead of one. The loop is strictly serial: whichever job's
//! interval ticks first runs to completion before the next `select!` poll,
//! so no two jobs ever touch storage concurrently.

mod jobs;

use std::sync::Arc;

use chrono::Duration as ChronoDuration;
use common::storage::{db::SurrealDbClient, store::StorageManager};
use progress_broadcaster::Broadcaster;
use tokio::time::{interval, Duration, Interval};
use tracing::{error, info};

/// Cadences and thresholds for the five jobs. Defaults mirror section
/// 4.7's table; `retention` and `temp_reclaim_age` are additionally
/// configurable per-deployment via `AppConfig::retention_days`.
#[derive(Debug, Clone)]
pub struct MaintenanceConfig {
    pub expiry_interval: Duration,
    pub retention: ChronoDuration,
    pub temp_reclaim_interval: Duration,
    pub temp_reclaim_age: ChronoDuration,
    pub catalog_stats_interval: Duration,
    pub disk_probe_interval: Duration,
    pub disk_warn_percent: f64,
    pub disk_error_percent: f64,
    pub compaction_interval: Duration,
}

impl Default for MaintenanceConfig {
    fn default() -> Self {
        Self {
            expiry_interval: Duration::from_secs(15 * 60),
            retention: ChronoDuration::hours(24),
            temp_reclaim_interval: Duration::from_secs(60 * 60),
            temp_reclaim_age: ChronoDuration::hours(1),
            catalog_stats_interval: Duration::from_secs(7 * 24 * 60 * 60),
            disk_probe_interval: Duration::from_secs(6 * 60 * 60),
            disk_warn_percent: 80.0,
            disk_error_percent: 90.0,
            compaction_interval: Duration::from_secs(7 * 24 * 60 * 60),
        }
    }
}

impl MaintenanceConfig {
    /// Builds a `MaintenanceConfig` from the process-wide `AppConfig`,
    /// keeping the section 4.7 cadences fixed but taking `retentionDays`
    /// from configuration since it is also the upload-coordinator's
    /// notion of retention.
    #[must_use]
    pub fn from_app_config(config: &common::utils::config::AppConfig) -> Self {
        Self {
            retention: ChronoDuration::days(i64::try_from(config.retention_days).unwrap_or(1)),
            ..Self::default()
        }
    }
}

struct Clock {
    expiry: Interval,
    temp_reclamation: Interval,
    catalog_stats: Interval,
    disk_probe: Interval,
    compaction: Interval,
}

impl Clock {
    fn new(config: &MaintenanceConfig) -> Self {
        Self {
            expiry: interval(config.expiry_interval),
            temp_reclamation: interval(config.temp_reclaim_interval),
            catalog_stats: interval(config.catalog_stats_interval),
            disk_probe: interval(config.disk_probe_interval),
            compaction: interval(config.compaction_interval),
        }
    }
}

/// Runs the maintenance loop forever. Each job's errors are logged and the
/// loop continues to the next tick (section 7: "Maintenance errors are
/// logged and the job retries on next tick").
pub async fn run_loop(
    db: Arc<SurrealDbClient>,
    storage: Arc<StorageManager>,
    broadcaster: Arc<Broadcaster>,
    config: MaintenanceConfig,
) -> ! {
    let mut clock = Clock::new(&config);

    loop {
        tokio::select! {
            _ = clock.expiry.tick() => {
                if let Err(err) = jobs::expiry_sweep(&db, &storage, &broadcaster, &config).await {
                    error!(error = %err, "expiry sweep failed");
                }
            }
            _ = clock.temp_reclamation.tick() => {
                if let Err(err) = jobs::temp_reclamation(&db, &storage, &config).await {
                    error!(error = %err, "temp reclamation failed");
                }
            }
            _ = clock.catalog_stats.tick() => {
                if let Err(err) = jobs::catalog_stats(&db).await {
                    error!(error = %err, "catalog stats job failed");
                }
            }
            _ = clock.disk_probe.tick() => {
                jobs::disk_probe(&storage, config.disk_warn_percent, config.disk_error_percent);
            }
            _ = clock.compaction.tick() => {
                if let Err(err) = jobs::database_compaction(&db).await {
                    error!(error = %err, "database compaction failed");
                }
            }
        }
    }
}

/// Runs the loop until `shutdown` resolves, for orderly shutdown in tests
/// and in `main`'s signal handling. Unlike `run_loop` this can return.
pub async fn run_loop_until(
    db: Arc<SurrealDbClient>,
    storage: Arc<StorageManager>,
    broadcaster: Arc<Broadcaster>,
    config: MaintenanceConfig,
    shutdown: impl std::future::Future<Output = ()>,
) {
    let mut clock = Clock::new(&config);
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            () = &mut shutdown => {
                info!("maintenance scheduler shutting down");
                return;
            }
            _ = clock.expiry.tick() => {
                if let Err(err) = jobs::expiry_sweep(&db, &storage, &broadcaster, &config).await {
                    error!(error = %err, "expiry sweep failed");
                }
            }
            _ = clock.temp_reclamation.tick() => {
                if let Err(err) = jobs::temp_reclamation(&db, &storage, &config).await {
                    error!(error = %err, "temp reclamation failed");
                }
            }
            _ = clock.catalog_stats.tick() => {
                if let Err(err) = jobs::catalog_stats(&db).await {
                    error!(error = %err, "catalog stats job failed");
                }
            }
            _ = clock.disk_probe.tick() => {
                jobs::disk_probe(&storage, config.disk_warn_percent, config.disk_error_percent);
            }
            _ = clock.compaction.tick() => {
                if let Err(err) = jobs::database_compaction(&db).await {
                    error!(error = %err, "database compaction failed");
                }
            }
        }
    }
}
