use common::{
    error::AppError,
    storage::types::catalog_entry::CatalogEntry,
};
use metadata_enricher::EnrichRequest;
use platform_registry::PlatformId;
use serde_json::{json, Value};
use state_machines::core::GuardError;
use tracing::{debug, instrument, warn};

use crate::headers::HeaderInfo;

use super::{
    context::PipelineContext,
    state::{
        AssemblyMachine, Assembled, DigestVerified, Enriched, Extracted, HeaderParsed, Persisted,
        Ready, SizeVerified,
    },
};

fn map_guard_error(event: &str, guard: &GuardError) -> AppError {
    AppError::InternalError(format!("invalid assembly pipeline transition during {event}: {guard:?}"))
}

fn strip_extension(name: &str) -> String {
    name.rsplit_once('.').map_or(name, |(stem, _)| stem).to_string()
}

fn header_summary_json(header: &HeaderInfo) -> Value {
    json!({
        "title": header.title,
        "region": header.region,
        "version": header.version,
        "checksumValid": header.checksum_valid,
    })
}

fn metadata_json(metadata: &metadata_enricher::Metadata) -> Value {
    json!({
        "title": metadata.title,
        "altTitles": metadata.alt_titles,
        "year": metadata.year,
        "developer": metadata.developer,
        "publisher": metadata.publisher,
        "genre": metadata.genre,
        "rating": metadata.rating,
        "description": metadata.description,
        "artworkUrls": metadata.artwork_urls,
        "screenshots": metadata.screenshots,
        "confidence": metadata.confidence,
    })
}

#[instrument(level = "trace", skip_all, fields(upload_id = %ctx.upload.id))]
pub async fn assemble_content(
    machine: AssemblyMachine<(), Ready>,
    ctx: &mut PipelineContext<'_>,
) -> Result<AssemblyMachine<(), Assembled>, AppError> {
    let assembled = ctx
        .services
        .assemble(&ctx.upload.temp_scope, ctx.upload.total_chunks)
        .await?;

    debug!(
        upload_id = %ctx.upload.id,
        size = assembled.size,
        digest = %assembled.digest,
        "upload chunks assembled"
    );

    ctx.location = Some(assembled.location);
    ctx.size = Some(assembled.size);
    ctx.content_digest = Some(assembled.digest);

    machine.assemble().map_err(|(_, guard)| map_guard_error("assemble", &guard))
}

#[instrument(level = "trace", skip_all, fields(upload_id = %ctx.upload.id))]
pub async fn verify_size(
    machine: AssemblyMachine<(), Assembled>,
    ctx: &mut PipelineContext<'_>,
) -> Result<AssemblyMachine<(), SizeVerified>, AppError> {
    let actual = ctx
        .size
        .ok_or_else(|| AppError::InternalError("assembled size expected to be set".into()))?;

    if actual != ctx.upload.declared_size {
        return Err(AppError::SizeMismatch(format!(
            "declared {} bytes, assembled {actual} bytes",
            ctx.upload.declared_size
        )));
    }

    machine
        .verify_size()
        .map_err(|(_, guard)| map_guard_error("verify_size", &guard))
}

#[instrument(level = "trace", skip_all, fields(upload_id = %ctx.upload.id))]
pub async fn verify_digest(
    machine: AssemblyMachine<(), SizeVerified>,
    ctx: &mut PipelineContext<'_>,
) -> Result<AssemblyMachine<(), DigestVerified>, AppError> {
    if let Some(declared) = ctx.upload.declared_digest.clone() {
        let actual = ctx.content_digest()?;
        if !actual.eq_ignore_ascii_case(&declared) {
            return Err(AppError::DigestMismatch(format!(
                "declared {declared}, assembled {actual}"
            )));
        }
    }

    machine
        .verify_digest()
        .map_err(|(_, guard)| map_guard_error("verify_digest", &guard))
}

/// Unwraps an archive upload (picking the largest registered-extension
/// entry as the ROM itself), resolves the platform, and probes the
/// resulting bytes for a recognizable signature. Non-archive uploads pass
/// through with their assembled location unchanged.
#[instrument(level = "trace", skip_all, fields(upload_id = %ctx.upload.id))]
pub async fn extract_content(
    machine: AssemblyMachine<(), DigestVerified>,
    ctx: &mut PipelineContext<'_>,
) -> Result<AssemblyMachine<(), Extracted>, AppError> {
    let effective_name = if platform_registry::is_archive(&ctx.upload.sanitized_name) {
        let archive_location = ctx.location()?.to_string();
        let extracted = ctx
            .services
            .extract_archive(
                &ctx.upload.temp_scope,
                &archive_location,
                ctx.config.tuning.archive_bomb_ratio,
            )
            .await?;

        let total_extracted: u64 = extracted.entries.iter().map(|entry| entry.size).sum();
        if total_extracted > ctx.config.tuning.max_extracted_bytes {
            return Err(AppError::ArchiveBomb(format!(
                "extracted {total_extracted} bytes exceeds limit {}",
                ctx.config.tuning.max_extracted_bytes
            )));
        }

        let main_entry = extracted
            .entries
            .iter()
            .filter(|entry| platform_registry::classify_by_extension(&entry.name).is_some())
            .max_by_key(|entry| entry.size)
            .cloned()
            .ok_or_else(|| {
                AppError::NoRecognizedContent("archive contained no recognized platform file".into())
            })?;

        ctx.archive_entry_names = Some(extracted.entries.iter().map(|entry| entry.name.clone()).collect());
        ctx.location = Some(main_entry.location.clone());
        ctx.size = Some(main_entry.size);
        ctx.content_digest = Some(ctx.services.stream_digest(&main_entry.location).await?);
        main_entry.name
    } else {
        ctx.upload.sanitized_name.clone()
    };

    let platform = ctx
        .upload
        .detected_platform
        .as_deref()
        .and_then(PlatformId::parse)
        .or_else(|| platform_registry::classify_by_extension(&effective_name))
        .ok_or_else(|| AppError::UnsupportedFormat(format!("cannot classify {effective_name}")))?;
    ctx.platform = Some(platform);

    let location = ctx.location()?.to_string();
    if !ctx.services.probe_signature(&location, platform).await {
        ctx.signature_warning = true;
        warn!(upload_id = %ctx.upload.id, "signature probe found no recognizable content pattern");
    }

    machine.extract().map_err(|(_, guard)| map_guard_error("extract", &guard))
}

/// Checks for an existing catalog row with the same content digest before
/// doing the (comparatively expensive) header parse. A hit here is the
/// dedup race's loser (section 9): the upload fails `AlreadyIngested`
/// rather than completing against someone else's row.
#[instrument(level = "trace", skip_all, fields(upload_id = %ctx.upload.id))]
pub async fn parse_header(
    machine: AssemblyMachine<(), Extracted>,
    ctx: &mut PipelineContext<'_>,
) -> Result<AssemblyMachine<(), HeaderParsed>, AppError> {
    let digest = ctx.content_digest()?.to_string();
    if CatalogEntry::find_by_digest(ctx.db, &digest).await?.is_some() {
        return Err(AppError::AlreadyIngested(digest));
    }

    let platform = ctx.platform()?;
    let location = ctx.location()?.to_string();
    let header = ctx.services.read_header(&location, platform).await?;
    ctx.header = Some(header);

    machine
        .parse_header()
        .map_err(|(_, guard)| map_guard_error("parse_header", &guard))
}

#[instrument(level = "trace", skip_all, fields(upload_id = %ctx.upload.id))]
pub async fn enrich_metadata(
    machine: AssemblyMachine<(), HeaderParsed>,
    ctx: &mut PipelineContext<'_>,
) -> Result<AssemblyMachine<(), Enriched>, AppError> {
    let platform = ctx.platform()?;
    let header = ctx.header.clone().unwrap_or_default();
    let title = header
        .title
        .clone()
        .unwrap_or_else(|| strip_extension(&ctx.upload.sanitized_name));

    let request = EnrichRequest {
        title,
        platform_id: platform.as_str().to_string(),
        region: header.region.clone(),
        year: None,
        declared_digest: ctx.content_digest.clone(),
    };

    let metadata = ctx.services.enrich(request).await;
    debug!(
        upload_id = %ctx.upload.id,
        confidence = metadata.confidence,
        "metadata enrichment finished"
    );
    ctx.metadata = Some(metadata);

    machine.enrich().map_err(|(_, guard)| map_guard_error("enrich", &guard))
}

#[instrument(level = "trace", skip_all, fields(upload_id = %ctx.upload.id))]
pub async fn persist_catalog(
    machine: AssemblyMachine<(), Enriched>,
    ctx: &mut PipelineContext<'_>,
) -> Result<AssemblyMachine<(), Persisted>, AppError> {
    let platform = ctx.platform()?;
    let digest = ctx.content_digest()?.to_string();
    let location = ctx.location()?.to_string();
    let size = ctx
        .size
        .ok_or_else(|| AppError::InternalError("assembled size expected to be set".into()))?;

    let final_path = ctx
        .services
        .finalize(&location, platform.as_str(), &digest, &ctx.upload.sanitized_name)
        .await?;

    let header_summary = ctx.header.as_ref().map(header_summary_json);
    let metadata_value = ctx.metadata.as_ref().map(metadata_json);

    let entry = CatalogEntry::new(
        digest,
        ctx.upload.sanitized_name.clone(),
        platform.as_str().to_string(),
        final_path.clone(),
        size,
        header_summary,
        metadata_value.clone(),
        ctx.upload.id.clone(),
    );
    ctx.catalog_entry_id = Some(entry.id.clone());
    ctx.db.store_item(entry).await?;

    ctx.final_path = Some(final_path.clone());
    ctx.upload = ctx
        .upload
        .clone()
        .mark_completed(ctx.db, final_path, metadata_value)
        .await?;

    machine
        .persist()
        .map_err(|(_, guard)| map_guard_error("persist", &guard))
}
