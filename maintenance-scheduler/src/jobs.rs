//! The five maintenance jobs (section 4.7), each called to completion by
//! the scheduler's cooperative loop on its own cadence. Every job that
//! deletes anything enumerates `Upload::active` first and filters against
//! it, per the section's safety rule: deleting a chunk a live upload still
//! references is a bug, not a race to tolerate.

use std::collections::HashSet;

use chrono::Utc;
use common::{
    error::AppError,
    storage::{
        db::SurrealDbClient,
        store::StorageManager,
        types::{catalog_entry::CatalogEntry, chunk::Chunk, events::Event, upload::Upload},
    },
    utils::config::StorageKind,
};
use progress_broadcaster::Broadcaster;
use sysinfo::Disks;
use tracing::{debug, error, info, warn};

use crate::MaintenanceConfig;

/// Releases scope and deletes the row for every Upload past `expires_at`
/// or stale-terminal beyond `config.retention`. A row that was still
/// in-flight (not already terminal) is first flipped to EXPIRED and its
/// terminal event published, so a subscriber watching the upload sees why
/// it disappeared instead of the channel simply going quiet.
pub async fn expiry_sweep(
    db: &SurrealDbClient,
    storage: &StorageManager,
    broadcaster: &Broadcaster,
    config: &MaintenanceConfig,
) -> Result<(), AppError> {
    let reapable = Upload::reapable(db, Utc::now(), config.retention).await?;
    if reapable.is_empty() {
        debug!("expiry sweep: nothing to reap");
        return Ok(());
    }

    let mut reaped = 0u64;
    for upload in reapable {
        let already_terminal = upload.state.is_terminal();

        if !already_terminal {
            let expired = upload.clone().mark_expired(db).await?;
            broadcaster.publish(Event::Failed {
                upload_id: expired.id.clone(),
                kind: common::error::ErrorKind::Expired.as_str().to_string(),
                detail: "upload expired before assembly completed".to_string(),
            });
        }

        if let Err(err) = storage.delete_prefix(&upload.temp_scope).await {
            warn!(upload_id = %upload.id, error = %err, "expiry sweep: failed to release scope, leaving row for next tick");
            continue;
        }
        Chunk::delete_for_upload(db, &upload.id).await?;
        db.delete_item::<Upload>(&upload.id).await.map_err(AppError::Database)?;
        if !already_terminal {
            broadcaster.remove_channel(&upload.id);
        }
        reaped += 1;
    }

    info!(reaped, "expiry sweep complete");
    Ok(())
}

/// Walks the shared temp root (every object whose path starts with a
/// `StorageManager::new_scope` prefix) and deletes anything outside an
/// active upload's scope. A scope still in `extracted/` past
/// `config.temp_reclaim_age` is also swept, backstopping an assembly that
/// never finished and never released its scope.
pub async fn temp_reclamation(
    db: &SurrealDbClient,
    storage: &StorageManager,
    config: &MaintenanceConfig,
) -> Result<(), AppError> {
    let active_scopes: HashSet<String> = Upload::active(db)
        .await?
        .into_iter()
        .map(|upload| upload.temp_scope)
        .collect();

    let objects = storage.list(Some("uploads")).await.map_err(AppError::ObjectStore)?;
    let cutoff = Utc::now() - config.temp_reclaim_age;

    let mut stale_scopes: HashSet<String> = HashSet::new();
    for object in &objects {
        let path = object.location.to_string();
        let Some(scope) = scope_of(&path) else { continue };

        if !active_scopes.contains(&scope) {
            stale_scopes.insert(scope);
            continue;
        }

        if path.contains("/extracted/") && object.last_modified < cutoff {
            stale_scopes.insert(scope);
        }
    }

    for scope in &stale_scopes {
        storage.delete_prefix(scope).await.map_err(AppError::ObjectStore)?;
    }

    info!(swept_scopes = stale_scopes.len(), "temp reclamation complete");
    Ok(())
}

fn scope_of(object_path: &str) -> Option<String> {
    let mut parts = object_path.splitn(3, '/');
    let root = parts.next()?;
    let upload_id = parts.next()?;
    if root != "uploads" {
        return None;
    }
    Some(format!("{root}/{upload_id}"))
}

/// Rolls up catalog entries by platform and uploads by state, emitting the
/// result as a single structured log line rather than persisting it — there
/// is no dedicated statistics table in this schema to persist it into.
pub async fn catalog_stats(db: &SurrealDbClient) -> Result<(), AppError> {
    let by_platform = CatalogEntry::counts_by_platform(db).await?;
    let by_state = Upload::counts_by_state(db).await?;

    info!(
        platform_counts = ?by_platform,
        upload_state_counts = ?by_state,
        "weekly catalog stats report"
    );
    Ok(())
}

/// Reads free/used bytes on the local storage root and logs at `warn` past
/// 80% used, `error` past 90%. A no-op for the in-memory backend, which has
/// no disk to probe.
pub fn disk_probe(storage: &StorageManager, warn_percent: f64, error_percent: f64) {
    if *storage.backend_kind() != StorageKind::Local {
        debug!("disk probe: in-memory backend, nothing to probe");
        return;
    }

    let Some(base) = storage.local_base_path() else {
        warn!("disk probe: local backend reported no base path");
        return;
    };

    let disks = Disks::new_with_refreshed_list();
    let Some(disk) = disks
        .iter()
        .filter(|disk| base.starts_with(disk.mount_point()))
        .max_by_key(|disk| disk.mount_point().as_os_str().len())
    else {
        warn!(path = %base.display(), "disk probe: no matching mount point found");
        return;
    };

    let total = disk.total_space();
    if total == 0 {
        return;
    }
    let used = total.saturating_sub(disk.available_space());
    #[allow(clippy::cast_precision_loss)]
    let used_percent = (used as f64 / total as f64) * 100.0;

    if used_percent >= error_percent {
        error!(mount = %disk.mount_point().display(), used_percent, "storage root critically full");
    } else if used_percent >= warn_percent {
        warn!(mount = %disk.mount_point().display(), used_percent, "storage root filling up");
    } else {
        debug!(mount = %disk.mount_point().display(), used_percent, "disk probe ok");
    }
}

/// Rebuilds the catalog/upload indexes. This schema has no separate
/// statistics-rows table to collapse, so the compaction job's scope is the
/// index maintenance `SurrealDbClient` already exposes.
pub async fn database_compaction(db: &SurrealDbClient) -> Result<(), AppError> {
    db.rebuild_indexes().await.map_err(AppError::Database)?;
    info!("database compaction (index rebuild) complete");
    Ok(())
}
