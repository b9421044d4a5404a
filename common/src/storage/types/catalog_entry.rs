use chrono::Utc;

use crate::{error::AppError, storage::db::SurrealDbClient, stored_object};

stored_object!(CatalogEntry, "catalog_entry", {
    content_digest: String,
    sanitized_name: String,
    platform_id: String,
    final_path: String,
    size: u64,
    header_summary: Option<serde_json::Value>,
    metadata: Option<serde_json::Value>,
    source_upload_id: String
});

impl CatalogEntry {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        content_digest: String,
        sanitized_name: String,
        platform_id: String,
        final_path: String,
        size: u64,
        header_summary: Option<serde_json::Value>,
        metadata: Option<serde_json::Value>,
        source_upload_id: String,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            created_at: now,
            updated_at: now,
            content_digest,
            sanitized_name,
            platform_id,
            final_path,
            size,
            header_summary,
            metadata,
            source_upload_id,
        }
    }

    /// Looks up an existing catalog row by content digest. Backed by the
    /// unique index defined in `storage::db::build_indexes`; a hit here is
    /// what turns a duplicate upload into an `AlreadyIngested` short-circuit.
    pub async fn find_by_digest(
        db: &SurrealDbClient,
        content_digest: &str,
    ) -> Result<Option<Self>, AppError> {
        let mut found: Vec<Self> = db
            .query("SELECT * FROM type::table($table) WHERE content_digest = $digest LIMIT 1")
            .bind(("table", Self::table_name()))
            .bind(("digest", content_digest.to_string()))
            .await?
            .take(0)?;

        Ok(found.pop())
    }

    pub async fn get_by_id(db: &SurrealDbClient, id: &str) -> Result<Option<Self>, AppError> {
        let entry: Option<Self> = db.get_item(id).await?;
        Ok(entry)
    }

    /// Catalog entry counts grouped by platform, for the maintenance
    /// scheduler's weekly catalog stats report.
    pub async fn counts_by_platform(db: &SurrealDbClient) -> Result<Vec<PlatformCount>, AppError> {
        let counts: Vec<PlatformCount> = db
            .query("SELECT platform_id, count() AS count FROM type::table($table) GROUP BY platform_id")
            .bind(("table", Self::table_name()))
            .await?
            .take(0)?;

        Ok(counts)
    }
}

/// One row of the `SELECT platform_id, count() ... GROUP BY platform_id` rollup.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct PlatformCount {
    pub platform_id: String,
    pub count: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn find_by_digest_returns_none_when_absent() {
        let db = SurrealDbClient::memory("test_ns", &uuid::Uuid::new_v4().to_string())
            .await
            .expect("memory db");

        let found = CatalogEntry::find_by_digest(&db, "missing").await.expect("query");
        assert!(found.is_none());
    }

    #[tokio::test]
    async fn find_by_digest_returns_match_after_insert() {
        let db = SurrealDbClient::memory("test_ns", &uuid::Uuid::new_v4().to_string())
            .await
            .expect("memory db");

        let entry = CatalogEntry::new(
            "abc123".into(),
            "game.nes".into(),
            "nes".into(),
            "/roms/nes/abc123.nes".into(),
            40,
            None,
            None,
            "upload-1".into(),
        );
        db.store_item(entry.clone()).await.expect("store");

        let found = CatalogEntry::find_by_digest(&db, "abc123")
            .await
            .expect("query")
            .expect("present");
        assert_eq!(found.id, entry.id);
    }
}
