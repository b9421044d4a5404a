use common::{
    error::AppError,
    storage::{db::SurrealDbClient, types::upload::Upload},
};
use metadata_enricher::Metadata;
use platform_registry::PlatformId;
use tracing::error;

use crate::headers::HeaderInfo;

use super::{config::AssemblerConfig, services::AssemblerServices};

/// Carries one upload through the typestate machine. `location` tracks
/// whichever object currently represents "the content": the assembled
/// file until an archive is extracted, then the chosen inner entry.
pub struct PipelineContext<'a> {
    pub upload: Upload,
    pub db: &'a SurrealDbClient,
    pub config: &'a AssemblerConfig,
    pub services: &'a dyn AssemblerServices,

    pub location: Option<String>,
    pub size: Option<u64>,
    pub content_digest: Option<String>,
    pub archive_entry_names: Option<Vec<String>>,
    pub signature_warning: bool,
    pub platform: Option<PlatformId>,
    pub header: Option<HeaderInfo>,
    pub metadata: Option<Metadata>,
    pub final_path: Option<String>,
    /// Set by `persist_catalog` once the new `CatalogEntry` row is written,
    /// so `process_upload` can report it in the terminal `Completed` event.
    pub catalog_entry_id: Option<String>,
}

impl<'a> PipelineContext<'a> {
    pub fn new(
        upload: Upload,
        db: &'a SurrealDbClient,
        config: &'a AssemblerConfig,
        services: &'a dyn AssemblerServices,
    ) -> Self {
        Self {
            upload,
            db,
            config,
            services,
            location: None,
            size: None,
            content_digest: None,
            archive_entry_names: None,
            signature_warning: false,
            platform: None,
            header: None,
            metadata: None,
            final_path: None,
            catalog_entry_id: None,
        }
    }

    pub fn location(&self) -> Result<&str, AppError> {
        self.location
            .as_deref()
            .ok_or_else(|| AppError::InternalError("content location expected to be set".into()))
    }

    pub fn platform(&self) -> Result<PlatformId, AppError> {
        self.platform
            .ok_or_else(|| AppError::InternalError("platform expected to be resolved".into()))
    }

    pub fn content_digest(&self) -> Result<&str, AppError> {
        self.content_digest
            .as_deref()
            .ok_or_else(|| AppError::InternalError("content digest expected to be set".into()))
    }

    pub fn abort(&mut self, err: AppError) -> AppError {
        error!(
            upload_id = %self.upload.id,
            error = %err,
            "assembly pipeline aborted"
        );
        err
    }
}
