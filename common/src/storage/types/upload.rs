use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use surrealdb::opt::PatchOp;

use crate::{error::AppError, storage::db::SurrealDbClient, stored_object};

/// Default lease held by an assembler worker on a claimed upload before
/// another worker is allowed to steal it back (crash recovery).
pub const DEFAULT_LEASE_SECS: i64 = 5 * 60;

/// One row of the `SELECT state, count() ... GROUP BY state` rollup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateCount {
    pub state: UploadState,
    pub count: i64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum UploadState {
    Initiated,
    Uploading,
    Processing,
    Completed,
    Failed,
    Cancelled,
    Expired,
}

impl UploadState {
    pub const fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Completed | Self::Failed | Self::Cancelled | Self::Expired
        )
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Initiated => "INITIATED",
            Self::Uploading => "UPLOADING",
            Self::Processing => "PROCESSING",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
            Self::Cancelled => "CANCELLED",
            Self::Expired => "EXPIRED",
        }
    }
}

stored_object!(Upload, "upload", {
    original_name: String,
    sanitized_name: String,
    declared_size: u64,
    declared_digest: Option<String>,
    chunk_size: u64,
    total_chunks: u32,
    detected_platform: Option<String>,
    mime_hint: Option<String>,
    temp_scope: String,
    state: UploadState,
    uploaded_chunks_count: u32,
    expires_at: DateTime<Utc>,
    processing_error: Option<String>,
    final_path: Option<String>,
    extracted_metadata: Option<serde_json::Value>,
    client_id: Option<String>,
    lease_owner: Option<String>,
    lease_expires_at: Option<DateTime<Utc>>
});

impl Upload {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        original_name: String,
        sanitized_name: String,
        declared_size: u64,
        declared_digest: Option<String>,
        chunk_size: u64,
        total_chunks: u32,
        detected_platform: Option<String>,
        mime_hint: Option<String>,
        temp_scope: String,
        expires_at: DateTime<Utc>,
        client_id: Option<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            created_at: now,
            updated_at: now,
            original_name,
            sanitized_name,
            declared_size,
            declared_digest,
            chunk_size,
            total_chunks,
            detected_platform,
            mime_hint,
            temp_scope,
            state: UploadState::Initiated,
            uploaded_chunks_count: 0,
            expires_at,
            processing_error: None,
            final_path: None,
            extracted_metadata: None,
            client_id,
            lease_owner: None,
            lease_expires_at: None,
        }
    }

    pub async fn get_by_id(db: &SurrealDbClient, id: &str) -> Result<Option<Self>, AppError> {
        let upload: Option<Self> = db.get_item(id).await?;
        Ok(upload)
    }

    /// Marks the upload UPLOADING (from INITIATED) and bumps the chunk
    /// counter; idempotent under concurrent chunk arrivals since the
    /// transition is a no-op once already UPLOADING.
    pub async fn mark_chunk_received(
        &mut self,
        db: &SurrealDbClient,
    ) -> Result<(), AppError> {
        self.uploaded_chunks_count = self.uploaded_chunks_count.saturating_add(1);
        if matches!(self.state, UploadState::Initiated) {
            self.state = UploadState::Uploading;
        }
        self.updated_at = Utc::now();

        let _updated: Option<Self> = db
            .update((Self::table_name(), self.id.as_str()))
            .patch(PatchOp::replace("/state", self.state))
            .patch(PatchOp::replace(
                "/uploaded_chunks_count",
                self.uploaded_chunks_count,
            ))
            .patch(PatchOp::replace(
                "/updated_at",
                surrealdb::sql::Datetime::default(),
            ))
            .await?;

        Ok(())
    }

    /// Flips an upload with all chunks received from UPLOADING to
    /// PROCESSING with no lease yet held, making it visible to
    /// `claim_next_ready`. Idempotent: a no-op if already PROCESSING or
    /// past it.
    pub async fn mark_ready_for_assembly(mut self, db: &SurrealDbClient) -> Result<Self, AppError> {
        if !matches!(self.state, UploadState::Uploading | UploadState::Initiated) {
            return Ok(self);
        }

        self.state = UploadState::Processing;
        self.updated_at = Utc::now();

        let _updated: Option<Self> = db
            .update((Self::table_name(), self.id.as_str()))
            .patch(PatchOp::replace("/state", self.state))
            .patch(PatchOp::replace(
                "/updated_at",
                surrealdb::sql::Datetime::default(),
            ))
            .await?;

        Ok(self)
    }

    /// Hands off to the assembler: stamps a claim lease on an upload
    /// already in PROCESSING so a crashed worker's claim can be reclaimed.
    pub async fn mark_processing(
        mut self,
        db: &SurrealDbClient,
        worker_id: &str,
        lease: chrono::Duration,
    ) -> Result<Self, AppError> {
        self.state = UploadState::Processing;
        self.lease_owner = Some(worker_id.to_string());
        self.lease_expires_at = Some(Utc::now() + lease);
        self.updated_at = Utc::now();

        let _updated: Option<Self> = db
            .update((Self::table_name(), self.id.as_str()))
            .patch(PatchOp::replace("/state", self.state))
            .patch(PatchOp::replace("/lease_owner", self.lease_owner.clone()))
            .patch(PatchOp::replace(
                "/lease_expires_at",
                self.lease_expires_at.map(surrealdb::sql::Datetime::from),
            ))
            .patch(PatchOp::replace(
                "/updated_at",
                surrealdb::sql::Datetime::default(),
            ))
            .await?;

        Ok(self)
    }

    pub async fn mark_completed(
        mut self,
        db: &SurrealDbClient,
        final_path: String,
        extracted_metadata: Option<serde_json::Value>,
    ) -> Result<Self, AppError> {
        self.state = UploadState::Completed;
        self.final_path = Some(final_path);
        self.extracted_metadata = extracted_metadata;
        self.lease_owner = None;
        self.lease_expires_at = None;
        self.updated_at = Utc::now();

        let _updated: Option<Self> = db
            .update((Self::table_name(), self.id.as_str()))
            .patch(PatchOp::replace("/state", self.state))
            .patch(PatchOp::replace("/final_path", self.final_path.clone()))
            .patch(PatchOp::replace(
                "/extracted_metadata",
                self.extracted_metadata.clone(),
            ))
            .patch(PatchOp::replace("/lease_owner", Option::<String>::None))
            .patch(PatchOp::replace(
                "/lease_expires_at",
                Option::<surrealdb::sql::Datetime>::None,
            ))
            .patch(PatchOp::replace(
                "/updated_at",
                surrealdb::sql::Datetime::default(),
            ))
            .await?;

        Ok(self)
    }

    pub async fn mark_failed(
        mut self,
        db: &SurrealDbClient,
        processing_error: String,
    ) -> Result<Self, AppError> {
        self.state = UploadState::Failed;
        self.processing_error = Some(processing_error);
        self.lease_owner = None;
        self.lease_expires_at = None;
        self.updated_at = Utc::now();

        let _updated: Option<Self> = db
            .update((Self::table_name(), self.id.as_str()))
            .patch(PatchOp::replace("/state", self.state))
            .patch(PatchOp::replace(
                "/processing_error",
                self.processing_error.clone(),
            ))
            .patch(PatchOp::replace("/lease_owner", Option::<String>::None))
            .patch(PatchOp::replace(
                "/lease_expires_at",
                Option::<surrealdb::sql::Datetime>::None,
            ))
            .patch(PatchOp::replace(
                "/updated_at",
                surrealdb::sql::Datetime::default(),
            ))
            .await?;

        Ok(self)
    }

    pub async fn mark_cancelled(mut self, db: &SurrealDbClient) -> Result<Self, AppError> {
        self.state = UploadState::Cancelled;
        self.updated_at = Utc::now();

        let _updated: Option<Self> = db
            .update((Self::table_name(), self.id.as_str()))
            .patch(PatchOp::replace("/state", self.state))
            .patch(PatchOp::replace(
                "/updated_at",
                surrealdb::sql::Datetime::default(),
            ))
            .await?;

        Ok(self)
    }

    pub async fn mark_expired(mut self, db: &SurrealDbClient) -> Result<Self, AppError> {
        self.state = UploadState::Expired;
        self.updated_at = Utc::now();

        let _updated: Option<Self> = db
            .update((Self::table_name(), self.id.as_str()))
            .patch(PatchOp::replace("/state", self.state))
            .patch(PatchOp::replace(
                "/updated_at",
                surrealdb::sql::Datetime::default(),
            ))
            .await?;

        Ok(self)
    }

    /// Atomically claims one PROCESSING upload with no live lease, stamping
    /// a fresh lease for `worker_id`. Mirrors a lease-based job queue: a
    /// crashed worker's lease simply expires and another worker reclaims it.
    pub async fn claim_next_ready(
        db: &SurrealDbClient,
        worker_id: &str,
        now: DateTime<Utc>,
        lease: chrono::Duration,
    ) -> Result<Option<Self>, AppError> {
        let mut result = db
            .query(
                "UPDATE type::table($table) SET
                    lease_owner = $worker_id,
                    lease_expires_at = $lease_expires_at
                 WHERE state = 'Processing'
                    AND (lease_expires_at = NONE OR lease_expires_at < $now)
                 LIMIT 1
                 RETURN AFTER",
            )
            .bind(("table", Self::table_name()))
            .bind(("worker_id", worker_id.to_string()))
            .bind(("lease_expires_at", surrealdb::sql::Datetime::from(now + lease)))
            .bind(("now", surrealdb::sql::Datetime::from(now)))
            .await?;

        let claimed: Vec<Self> = result.take(0)?;
        Ok(claimed.into_iter().next())
    }

    /// Uploads eligible for the maintenance scheduler's expiry sweep: a
    /// still-in-flight upload past `expires_at`, or a terminal row stale
    /// beyond `retention`. `expires_at` is stamped once at Initiate off
    /// `upload_timeout_secs` and is meaningless for a row that already
    /// reached a terminal state by some other path, so it only applies to
    /// the non-terminal states.
    pub async fn reapable(
        db: &SurrealDbClient,
        now: DateTime<Utc>,
        retention: chrono::Duration,
    ) -> Result<Vec<Self>, AppError> {
        let stale_before = now - retention;
        let uploads: Vec<Self> = db
            .query(
                "SELECT * FROM type::table($table)
                 WHERE (
                        state != 'Failed' AND state != 'Cancelled'
                        AND state != 'Completed' AND state != 'Expired'
                        AND expires_at < $now
                    )
                    OR (
                        (state = 'Failed' OR state = 'Cancelled'
                            OR state = 'Completed' OR state = 'Expired')
                        AND updated_at < $stale_before
                    )",
            )
            .bind(("table", Self::table_name()))
            .bind(("now", surrealdb::sql::Datetime::from(now)))
            .bind(("stale_before", surrealdb::sql::Datetime::from(stale_before)))
            .await?
            .take(0)?;

        Ok(uploads)
    }

    /// Upload counts grouped by state, for the maintenance scheduler's
    /// weekly catalog stats report.
    pub async fn counts_by_state(db: &SurrealDbClient) -> Result<Vec<StateCount>, AppError> {
        let counts: Vec<StateCount> = db
            .query("SELECT state, count() AS count FROM type::table($table) GROUP BY state")
            .bind(("table", Self::table_name()))
            .await?
            .take(0)?;

        Ok(counts)
    }

    pub async fn active(db: &SurrealDbClient) -> Result<Vec<Self>, AppError> {
        let uploads: Vec<Self> = db
            .query(
                "SELECT * FROM type::table($table)
                 WHERE state != 'Completed'
                    AND state != 'Failed'
                    AND state != 'Cancelled'
                    AND state != 'Expired'",
            )
            .bind(("table", Self::table_name()))
            .await?
            .take(0)?;

        Ok(uploads)
    }
}
