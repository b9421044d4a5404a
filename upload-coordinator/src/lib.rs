//! Accepts chunked uploads, tracks per-upload progress, and hands
//! completed uploads off to the assembler by flipping their state to
//! PROCESSING. One `UploadCoordinator` is shared across the API server's
//! request handlers.

use std::sync::Arc;

use bytes::Bytes;
use chrono::{Duration, Utc};
use common::error::AppError;
use common::storage::db::SurrealDbClient;
use common::storage::store::StorageManager;
use common::storage::types::chunk::Chunk;
use common::storage::types::fingerprint::Fingerprint;
use common::storage::types::upload::{Upload, UploadState};
use common::utils::config::AppConfig;
use common::utils::ingest_limits::{validate_initiate_input, IngestValidationError};
use dashmap::DashMap;
use sha2::{Digest, Sha256};
use tokio::sync::Mutex;
use tracing::instrument;

pub struct UploadCoordinator {
    db: Arc<SurrealDbClient>,
    storage: Arc<StorageManager>,
    config: Arc<AppConfig>,
    /// Per-upload guard so concurrent chunk writes for the same upload
    /// serialize instead of racing on `uploaded_chunks_count`.
    guards: DashMap<String, Arc<Mutex<()>>>,
}

#[derive(Debug, Clone)]
pub struct InitiateRequest {
    pub original_name: String,
    pub declared_size: u64,
    pub declared_digest: Option<String>,
    pub chunk_size: Option<u64>,
    pub client_id: Option<String>,
    /// Client-supplied MIME hint. Used verbatim when present; otherwise
    /// sniffed from the sanitized file name.
    pub mime_hint: Option<String>,
}

#[derive(Debug, Clone)]
pub struct InitiateResponse {
    pub upload_id: String,
    pub chunk_size: u64,
    pub total_chunks: u32,
    pub expires_at: chrono::DateTime<Utc>,
    /// `true` when this response describes an upload that already existed
    /// (idempotent replay of a duplicate `initiate` call).
    pub resumed: bool,
}

#[derive(Debug, Clone)]
pub struct ReceiveChunkResponse {
    pub uploaded_chunks_count: u32,
    pub total_chunks: u32,
    pub state: UploadState,
}

impl UploadCoordinator {
    pub fn new(db: Arc<SurrealDbClient>, storage: Arc<StorageManager>, config: Arc<AppConfig>) -> Self {
        Self {
            db,
            storage,
            config,
            guards: DashMap::new(),
        }
    }

    fn guard_for(&self, upload_id: &str) -> Arc<Mutex<()>> {
        self.guards
            .entry(upload_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    #[instrument(skip_all, fields(original_name = %req.original_name, declared_size = req.declared_size))]
    pub async fn initiate(&self, req: InitiateRequest) -> Result<InitiateResponse, AppError> {
        let chunk_size = req.chunk_size.unwrap_or(self.config.chunk_size);
        validate_initiate_input(&self.config, req.declared_size, chunk_size).map_err(
            |err| match err {
                IngestValidationError::PayloadTooLarge(msg) => AppError::OversizeForPlatform(msg),
                IngestValidationError::BadRequest(msg) => AppError::Validation(msg),
            },
        )?;

        let sanitized_name = sanitize_file_name(&req.original_name);

        if let Some(digest) = &req.declared_digest {
            if let Some(existing) =
                common::storage::types::catalog_entry::CatalogEntry::find_by_digest(&self.db, digest)
                    .await?
            {
                return Err(AppError::AlreadyIngested(existing.id));
            }
        }

        let fingerprint = Fingerprint::compute(req.declared_digest.as_deref(), &sanitized_name, req.declared_size);
        if let Some(existing) = fingerprint.find_in_flight_upload(&self.db).await? {
            return Ok(InitiateResponse {
                upload_id: existing.id,
                chunk_size: existing.chunk_size,
                total_chunks: existing.total_chunks,
                expires_at: existing.expires_at,
                resumed: true,
            });
        }

        let detected_platform = platform_registry::classify_by_extension(&sanitized_name);
        if let Some(platform) = detected_platform {
            let cap = platform_registry::max_size(platform);
            if req.declared_size > cap {
                return Err(AppError::OversizeForPlatform(format!(
                    "{} exceeds the {} byte cap for {platform}",
                    req.declared_size, cap
                )));
            }
        } else {
            return Err(AppError::UnsupportedFormat(sanitized_name));
        }

        let total_chunks = req.declared_size.div_ceil(chunk_size).max(1) as u32;
        let expires_at = Utc::now() + Duration::seconds(self.config.upload_timeout_secs as i64);

        let upload = Upload::new(
            req.original_name,
            sanitized_name.clone(),
            req.declared_size,
            req.declared_digest,
            chunk_size,
            total_chunks,
            detected_platform.map(|p| p.as_str().to_string()),
            Some(req.mime_hint.unwrap_or_else(|| {
                mime_guess::from_path(&sanitized_name)
                    .first_or(mime::APPLICATION_OCTET_STREAM)
                    .to_string()
            })),
            StorageManager::new_scope(&uuid::Uuid::new_v4().to_string()),
            expires_at,
            req.client_id,
        );
        self.db.store_item(upload.clone()).await.map_err(AppError::Database)?;

        for index in 0..total_chunks {
            let expected_size = chunk_expected_size(req.declared_size, chunk_size, index, total_chunks);
            let chunk = Chunk::placeholder(
                &upload.id,
                index,
                expected_size,
                StorageManager::chunk_path(&upload.temp_scope, index),
            );
            self.db.store_item(chunk).await.map_err(AppError::Database)?;
        }

        Ok(InitiateResponse {
            upload_id: upload.id,
            chunk_size,
            total_chunks,
            expires_at,
            resumed: false,
        })
    }

    #[instrument(skip_all, fields(upload_id, chunk_index))]
    pub async fn receive_chunk(
        &self,
        upload_id: &str,
        chunk_index: u32,
        data: Bytes,
    ) -> Result<ReceiveChunkResponse, AppError> {
        let guard = self.guard_for(upload_id);
        let _held = guard.lock().await;

        let mut upload = Upload::get_by_id(&self.db, upload_id)
            .await?
            .ok_or_else(|| AppError::NotFound(upload_id.to_string()))?;

        reject_if_not_accepting_chunks(&upload)?;

        let chunk = Chunk::get(&self.db, upload_id, chunk_index)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("{upload_id}/{chunk_index}")))?;

        if data.len() as u64 != chunk.expected_size {
            return Err(AppError::ChunkSizeMismatch(format!(
                "chunk {chunk_index} expected {} bytes, got {}",
                chunk.expected_size,
                data.len()
            )));
        }

        if chunk.received {
            // Already-written chunk: accept only a byte-identical retry.
            let mut hasher = Sha256::new();
            hasher.update(&data);
            let digest = format!("{:x}", hasher.finalize());
            if chunk.digest.as_deref() != Some(digest.as_str()) {
                return Err(AppError::ChunkSizeMismatch(format!(
                    "chunk {chunk_index} already received with a different digest"
                )));
            }
            return Ok(ReceiveChunkResponse {
                uploaded_chunks_count: upload.uploaded_chunks_count,
                total_chunks: upload.total_chunks,
                state: upload.state,
            });
        }

        self.storage
            .write_chunk(&upload.temp_scope, chunk_index, data.clone())
            .await
            .map_err(AppError::ObjectStore)?;

        let mut hasher = Sha256::new();
        hasher.update(&data);
        let digest = format!("{:x}", hasher.finalize());
        chunk.mark_received(&self.db, digest).await?;

        upload.mark_chunk_received(&self.db).await?;

        if upload.uploaded_chunks_count >= upload.total_chunks {
            upload = upload.mark_ready_for_assembly(&self.db).await?;
        }

        Ok(ReceiveChunkResponse {
            uploaded_chunks_count: upload.uploaded_chunks_count,
            total_chunks: upload.total_chunks,
            state: upload.state,
        })
    }

    #[instrument(skip_all, fields(upload_id))]
    pub async fn cancel(&self, upload_id: &str) -> Result<(), AppError> {
        let upload = Upload::get_by_id(&self.db, upload_id)
            .await?
            .ok_or_else(|| AppError::NotFound(upload_id.to_string()))?;

        if upload.state == UploadState::Cancelled {
            return Ok(());
        }
        if upload.state == UploadState::Completed {
            return Err(AppError::AlreadyCompleted(upload_id.to_string()));
        }
        if upload.state.is_terminal() {
            return Err(AppError::Validation(format!(
                "upload {upload_id} is already {:?} and cannot be cancelled",
                upload.state
            )));
        }

        let scope = upload.temp_scope.clone();
        upload.mark_cancelled(&self.db).await?;
        Chunk::delete_for_upload(&self.db, upload_id).await?;
        let _ = self.storage.delete_prefix(&scope).await;
        self.guards.remove(upload_id);

        Ok(())
    }

    pub async fn status(&self, upload_id: &str) -> Result<Upload, AppError> {
        Upload::get_by_id(&self.db, upload_id)
            .await?
            .ok_or_else(|| AppError::NotFound(upload_id.to_string()))
    }
}

fn reject_if_not_accepting_chunks(upload: &Upload) -> Result<(), AppError> {
    match upload.state {
        UploadState::Initiated | UploadState::Uploading => Ok(()),
        UploadState::Cancelled => Err(AppError::Cancelled(upload.id.clone())),
        UploadState::Expired => Err(AppError::Expired(upload.id.clone())),
        UploadState::Processing | UploadState::Completed | UploadState::Failed => {
            Err(AppError::NotAcceptingChunks(upload.id.clone()))
        }
    }
}

fn chunk_expected_size(declared_size: u64, chunk_size: u64, index: u32, total_chunks: u32) -> u64 {
    if index + 1 == total_chunks {
        let remainder = declared_size % chunk_size;
        if remainder == 0 {
            chunk_size
        } else {
            remainder
        }
    } else {
        chunk_size
    }
}

/// Replaces every character outside `[A-Za-z0-9_]` in the stem with `_`,
/// keeping the extension intact. Mirrors the teacher's file-name
/// sanitizer; additionally strips any directory components first so a
/// client-supplied path never escapes the upload's storage scope.
fn sanitize_file_name(original_name: &str) -> String {
    let file_name = std::path::Path::new(original_name)
        .file_name()
        .map(|f| f.to_string_lossy().into_owned())
        .unwrap_or_else(|| "upload".to_string());

    if let Some(idx) = file_name.rfind('.') {
        let (name, ext) = file_name.split_at(idx);
        let sanitized_name: String = name
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
            .collect();
        format!("{sanitized_name}{ext}")
    } else {
        file_name
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::utils::config::StorageKind;

    async fn test_coordinator() -> UploadCoordinator {
        let db = SurrealDbClient::memory("test_ns", &uuid::Uuid::new_v4().to_string())
            .await
            .expect("memory db");
        db.ensure_initialized().await.expect("init schema");

        let config = AppConfig {
            storage: StorageKind::Memory,
            chunk_size: 4,
            max_file_size: 1024,
            ..Default::default()
        };
        let storage = StorageManager::new(&config).await.expect("storage");

        UploadCoordinator::new(Arc::new(db), Arc::new(storage), Arc::new(config))
    }

    #[tokio::test]
    async fn initiate_computes_total_chunks_and_creates_placeholders() {
        let coordinator = test_coordinator().await;
        let response = coordinator
            .initiate(InitiateRequest {
                original_name: "game.nes".into(),
                declared_size: 10,
                declared_digest: None,
                chunk_size: None,
                client_id: None,
                mime_hint: None,
            })
            .await
            .expect("initiate");

        assert_eq!(response.total_chunks, 3); // 4 + 4 + 2
        assert!(!response.resumed);

        let status = coordinator.status(&response.upload_id).await.expect("status");
        assert_eq!(status.state, UploadState::Initiated);
    }

    #[tokio::test]
    async fn receive_chunk_transitions_to_processing_once_all_chunks_arrive() {
        let coordinator = test_coordinator().await;
        let response = coordinator
            .initiate(InitiateRequest {
                original_name: "game.nes".into(),
                declared_size: 6,
                declared_digest: None,
                chunk_size: None,
                client_id: None,
                mime_hint: None,
            })
            .await
            .expect("initiate");

        assert_eq!(response.total_chunks, 2); // 4 + 2

        coordinator
            .receive_chunk(&response.upload_id, 0, Bytes::from_static(b"abcd"))
            .await
            .expect("chunk 0");
        let last = coordinator
            .receive_chunk(&response.upload_id, 1, Bytes::from_static(b"ef"))
            .await
            .expect("chunk 1");

        assert_eq!(last.uploaded_chunks_count, 2);
        assert_eq!(last.state, UploadState::Processing);
    }

    #[tokio::test]
    async fn receive_chunk_rejects_size_mismatch() {
        let coordinator = test_coordinator().await;
        let response = coordinator
            .initiate(InitiateRequest {
                original_name: "game.nes".into(),
                declared_size: 4,
                declared_digest: None,
                chunk_size: None,
                client_id: None,
                mime_hint: None,
            })
            .await
            .expect("initiate");

        let err = coordinator
            .receive_chunk(&response.upload_id, 0, Bytes::from_static(b"ab"))
            .await
            .expect_err("size mismatch should fail");
        assert_eq!(err.kind(), common::error::ErrorKind::ChunkSizeMismatch);
    }

    #[tokio::test]
    async fn cancel_is_idempotent_and_deletes_chunks() {
        let coordinator = test_coordinator().await;
        let response = coordinator
            .initiate(InitiateRequest {
                original_name: "game.nes".into(),
                declared_size: 4,
                declared_digest: None,
                chunk_size: None,
                client_id: None,
                mime_hint: None,
            })
            .await
            .expect("initiate");

        coordinator.cancel(&response.upload_id).await.expect("cancel");
        coordinator.cancel(&response.upload_id).await.expect("cancel again is a no-op");

        let status = coordinator.status(&response.upload_id).await.expect("status");
        assert_eq!(status.state, UploadState::Cancelled);
    }

    #[test]
    fn sanitize_file_name_strips_path_components_and_unsafe_chars() {
        assert_eq!(sanitize_file_name("../../etc/passwd"), "passwd");
        assert_eq!(sanitize_file_name("my game!.nes"), "my_game_.nes");
    }
}
