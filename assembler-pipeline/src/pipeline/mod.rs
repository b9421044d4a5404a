mod config;
mod context;
mod services;
mod stages;
mod state;

pub use config::{AssemblerConfig, AssemblerTuning};
#[allow(clippy::module_name_repetitions)]
pub use services::{AssembledFile, AssemblerServices, DefaultAssemblerServices};

use std::{
    sync::Arc,
    time::Instant,
};

use common::{
    error::AppError,
    storage::{
        db::SurrealDbClient,
        types::{chunk::Chunk, events::Event, upload::Upload},
    },
};
use progress_broadcaster::Broadcaster;
use tracing::{debug, info, warn};

use self::{context::PipelineContext, state::ready};

#[allow(clippy::module_name_repetitions)]
pub struct AssemblerPipeline {
    db: Arc<SurrealDbClient>,
    config: AssemblerConfig,
    services: Arc<dyn AssemblerServices>,
    broadcaster: Option<Arc<Broadcaster>>,
}

impl AssemblerPipeline {
    pub fn new(db: Arc<SurrealDbClient>, config: AssemblerConfig, services: Arc<dyn AssemblerServices>) -> Self {
        Self { db, config, services, broadcaster: None }
    }

    /// Wires an upload progress broadcaster so terminal pipeline outcomes
    /// (section 4.4 step 11) are fanned out to subscribers, not just
    /// persisted. Omitted entirely in stage unit tests, where nothing
    /// subscribes.
    #[must_use]
    pub fn with_broadcaster(mut self, broadcaster: Arc<Broadcaster>) -> Self {
        self.broadcaster = Some(broadcaster);
        self
    }

    fn publish(&self, event: Event) {
        if let Some(broadcaster) = &self.broadcaster {
            broadcaster.publish(event);
        }
    }

    #[tracing::instrument(skip_all, fields(upload_id = %upload.id))]
    pub async fn process_upload(&self, upload: Upload) -> Result<(), AppError> {
        let mut ctx = PipelineContext::new(upload, self.db.as_ref(), &self.config, self.services.as_ref());
        self.publish(Event::Processing { upload_id: ctx.upload.id.clone() });

        let started = Instant::now();
        match self.drive_pipeline(&mut ctx).await {
            Ok(()) => {
                info!(
                    upload_id = %ctx.upload.id,
                    total_ms = started.elapsed().as_millis() as u64,
                    "assembly pipeline finished"
                );
                Chunk::delete_for_upload(self.db.as_ref(), &ctx.upload.id).await?;
                self.services.release_scope(&ctx.upload.temp_scope).await?;
                self.publish(Event::Completed {
                    upload_id: ctx.upload.id.clone(),
                    entry_id: ctx.catalog_entry_id.clone().unwrap_or_default(),
                });
                Ok(())
            }
            Err(err) => {
                warn!(upload_id = %ctx.upload.id, error = %err, "assembly pipeline failed");
                let already_ingested = matches!(err, AppError::AlreadyIngested(_));
                let kind = err.kind().as_str().to_string();
                let detail = err.to_string();
                ctx.upload = ctx
                    .upload
                    .clone()
                    .mark_failed(self.db.as_ref(), detail.clone())
                    .await?;
                if already_ingested {
                    // Dedup race loser (section 9): the content is safe under the
                    // winning entry, so the scope can be released immediately
                    // instead of waiting on retention like an ordinary failure.
                    self.services.release_scope(&ctx.upload.temp_scope).await?;
                }
                self.publish(Event::Failed { upload_id: ctx.upload.id.clone(), kind, detail });
                Err(err)
            }
        }
    }

    #[tracing::instrument(skip_all, fields(upload_id = %ctx.upload.id))]
    async fn drive_pipeline(&self, ctx: &mut PipelineContext<'_>) -> Result<(), AppError> {
        let machine = ready();

        let machine = stages::assemble_content(machine, ctx).await.map_err(|err| ctx.abort(err))?;
        let machine = stages::verify_size(machine, ctx).await.map_err(|err| ctx.abort(err))?;
        let machine = stages::verify_digest(machine, ctx).await.map_err(|err| ctx.abort(err))?;
        let machine = stages::extract_content(machine, ctx).await.map_err(|err| ctx.abort(err))?;
        let machine = stages::parse_header(machine, ctx).await.map_err(|err| ctx.abort(err))?;
        let machine = stages::enrich_metadata(machine, ctx).await.map_err(|err| ctx.abort(err))?;
        let _machine = stages::persist_catalog(machine, ctx).await.map_err(|err| ctx.abort(err))?;

        debug!(upload_id = %ctx.upload.id, final_path = ?ctx.final_path, "assembly pipeline persisted catalog entry");
        Ok(())
    }
}
