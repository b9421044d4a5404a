//! Abstracts the content-store, platform classification, and metadata
//! enrichment calls a pipeline run makes behind one trait, so stage tests
//! can inject fakes instead of standing up a real `StorageManager`/
//! `Enricher` pair. Mirrors the teacher's `PipelineServices`/
//! `DefaultPipelineServices` split.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use common::{
    error::AppError,
    storage::store::{ExtractedArchive, StorageManager},
};
use metadata_enricher::{EnrichRequest, Enricher, Metadata};
use platform_registry::PlatformId;

use crate::headers::{self, HeaderInfo};

#[derive(Debug, Clone)]
pub struct AssembledFile {
    pub location: String,
    pub size: u64,
    pub digest: String,
}

#[async_trait]
pub trait AssemblerServices: Send + Sync {
    /// Concatenates the upload's ordered chunks into one object and
    /// digests it in the same pass.
    async fn assemble(&self, scope: &str, total_chunks: u32) -> Result<AssembledFile, AppError>;

    /// Re-digests an object already in the store (used after extraction
    /// replaces the assembled file with an inner archive entry).
    async fn stream_digest(&self, location: &str) -> Result<String, AppError>;

    async fn extract_archive(
        &self,
        scope: &str,
        archive_location: &str,
        max_ratio: u64,
    ) -> Result<ExtractedArchive, AppError>;

    /// Per-platform magic-byte sanity check; never fails outright, so a
    /// storage error here still surfaces as `false` rather than aborting
    /// assembly.
    async fn probe_signature(&self, location: &str, platform: PlatformId) -> bool;

    /// Reads exactly the bytes `platform`'s header parser needs and parses
    /// them. PSX reads a sector at a fixed deep offset; every other family
    /// reads a fixed-length prefix.
    async fn read_header(&self, location: &str, platform: PlatformId) -> Result<HeaderInfo, AppError>;

    async fn enrich(&self, request: EnrichRequest) -> Metadata;

    /// Moves `location` to its permanent catalog path and returns that path.
    async fn finalize(
        &self,
        location: &str,
        platform_id: &str,
        content_digest: &str,
        sanitized_name: &str,
    ) -> Result<String, AppError>;

    /// Best-effort teardown of an upload's temp scope once its artifacts
    /// have either been moved out or the assembly failed.
    async fn release_scope(&self, scope: &str) -> Result<(), AppError>;
}

pub struct DefaultAssemblerServices {
    storage: Arc<StorageManager>,
    enricher: Arc<Enricher>,
}

impl DefaultAssemblerServices {
    pub fn new(storage: Arc<StorageManager>, enricher: Arc<Enricher>) -> Self {
        Self { storage, enricher }
    }

    async fn read_header_bytes(&self, location: &str, platform: PlatformId) -> Result<Bytes, AppError> {
        if platform == PlatformId::Psx {
            return self
                .storage
                .read_range(location, headers::PSX_SECTOR_OFFSET, headers::PSX_SECTOR_LEN)
                .await
                .map_err(AppError::ObjectStore);
        }
        self.storage
            .peek_prefix(location, headers::prefix_len(platform))
            .await
            .map_err(AppError::ObjectStore)
    }
}

#[async_trait]
impl AssemblerServices for DefaultAssemblerServices {
    async fn assemble(&self, scope: &str, total_chunks: u32) -> Result<AssembledFile, AppError> {
        let (size, digest) = self.storage.assemble(scope, total_chunks).await?;
        Ok(AssembledFile {
            location: StorageManager::assembled_path(scope),
            size,
            digest,
        })
    }

    async fn stream_digest(&self, location: &str) -> Result<String, AppError> {
        self.storage.stream_digest(location).await
    }

    async fn extract_archive(
        &self,
        scope: &str,
        archive_location: &str,
        max_ratio: u64,
    ) -> Result<ExtractedArchive, AppError> {
        self.storage.extract_archive(scope, archive_location, max_ratio).await
    }

    async fn probe_signature(&self, location: &str, platform: PlatformId) -> bool {
        self.storage.probe_signature(location, platform).await.unwrap_or(false)
    }

    async fn read_header(&self, location: &str, platform: PlatformId) -> Result<HeaderInfo, AppError> {
        let bytes = self.read_header_bytes(location, platform).await?;
        headers::parse(platform, &bytes)
    }

    async fn enrich(&self, request: EnrichRequest) -> Metadata {
        self.enricher.enrich(request).await
    }

    async fn finalize(
        &self,
        location: &str,
        platform_id: &str,
        content_digest: &str,
        sanitized_name: &str,
    ) -> Result<String, AppError> {
        let final_path = StorageManager::final_path(platform_id, content_digest, sanitized_name);
        self.storage.finalize_object(location, &final_path).await?;
        Ok(final_path)
    }

    async fn release_scope(&self, scope: &str) -> Result<(), AppError> {
        self.storage.delete_prefix(scope).await.map_err(AppError::ObjectStore)
    }
}
