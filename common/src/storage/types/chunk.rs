use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use surrealdb::opt::PatchOp;

use crate::{error::AppError, storage::db::SurrealDbClient, stored_object};

stored_object!(Chunk, "chunk", {
    upload_id: String,
    chunk_index: u32,
    expected_size: u64,
    received: bool,
    digest: Option<String>,
    path: String,
    received_at: Option<DateTime<Utc>>
});

impl Chunk {
    pub fn placeholder(upload_id: &str, chunk_index: u32, expected_size: u64, path: String) -> Self {
        let now = Utc::now();
        Self {
            id: format!("{upload_id}_{chunk_index}"),
            created_at: now,
            updated_at: now,
            upload_id: upload_id.to_string(),
            chunk_index,
            expected_size,
            received: false,
            digest: None,
            path,
            received_at: None,
        }
    }

    pub async fn get(
        db: &SurrealDbClient,
        upload_id: &str,
        chunk_index: u32,
    ) -> Result<Option<Self>, AppError> {
        let chunk: Option<Self> = db.get_item(&format!("{upload_id}_{chunk_index}")).await?;
        Ok(chunk)
    }

    pub async fn mark_received(
        mut self,
        db: &SurrealDbClient,
        digest: String,
    ) -> Result<Self, AppError> {
        self.received = true;
        self.digest = Some(digest);
        self.received_at = Some(Utc::now());
        self.updated_at = Utc::now();

        let _updated: Option<Self> = db
            .update((Self::table_name(), self.id.as_str()))
            .patch(PatchOp::replace("/received", true))
            .patch(PatchOp::replace("/digest", self.digest.clone()))
            .patch(PatchOp::replace(
                "/received_at",
                self.received_at.map(surrealdb::sql::Datetime::from),
            ))
            .patch(PatchOp::replace(
                "/updated_at",
                surrealdb::sql::Datetime::default(),
            ))
            .await?;

        Ok(self)
    }

    pub async fn for_upload(db: &SurrealDbClient, upload_id: &str) -> Result<Vec<Self>, AppError> {
        let chunks: Vec<Self> = db
            .query("SELECT * FROM type::table($table) WHERE upload_id = $upload_id ORDER BY chunk_index ASC")
            .bind(("table", Self::table_name()))
            .bind(("upload_id", upload_id.to_string()))
            .await?
            .take(0)?;

        Ok(chunks)
    }

    pub async fn delete_for_upload(db: &SurrealDbClient, upload_id: &str) -> Result<(), AppError> {
        let _deleted: Vec<Self> = db
            .query("DELETE FROM type::table($table) WHERE upload_id = $upload_id RETURN BEFORE")
            .bind(("table", Self::table_name()))
            .bind(("upload_id", upload_id.to_string()))
            .await?
            .take(0)?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn marking_received_persists_digest_and_flag() {
        let db = SurrealDbClient::memory("test_ns", &uuid::Uuid::new_v4().to_string())
            .await
            .expect("memory db");

        let chunk = Chunk::placeholder("upload-1", 0, 16, "upload-1/0".into());
        db.store_item(chunk.clone()).await.expect("store");

        let chunk = chunk
            .mark_received(&db, "deadbeef".into())
            .await
            .expect("mark received");

        assert!(chunk.received);
        assert_eq!(chunk.digest.as_deref(), Some("deadbeef"));

        let all = Chunk::for_upload(&db, "upload-1").await.expect("list");
        assert_eq!(all.len(), 1);
        assert!(all[0].received);
    }
}
