//! The four upload endpoints (section 6): initiate, chunk receipt, status,
//! cancel. Each mutating call republishes the upload's current state onto
//! the progress broadcaster so subscribers see the same transition the
//! caller just drove.

use axum::{
    body::Bytes,
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use chrono::{DateTime, Utc};
use common::storage::types::{
    chunk::Chunk,
    events::Event,
    upload::UploadState,
};
use serde::{Deserialize, Serialize};
use upload_coordinator::InitiateRequest;

use crate::{api_state::ApiState, error::ApiError};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitiateBody {
    pub file_name: String,
    pub file_size: u64,
    pub file_hash: Option<String>,
    pub chunk_size: Option<u64>,
    pub mime_type: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InitiateReply {
    pub upload_id: String,
    pub total_chunks: u32,
    pub chunk_size: u64,
    pub expires_at: DateTime<Utc>,
}

pub async fn initiate(
    State(state): State<ApiState>,
    Json(body): Json<InitiateBody>,
) -> Result<Json<InitiateReply>, ApiError> {
    let response = state
        .coordinator
        .initiate(InitiateRequest {
            original_name: body.file_name,
            declared_size: body.file_size,
            declared_digest: body.file_hash,
            chunk_size: body.chunk_size,
            client_id: None,
            mime_hint: body.mime_type,
        })
        .await?;

    let snapshot_state = if response.resumed {
        state.coordinator.status(&response.upload_id).await?.state
    } else {
        UploadState::Initiated
    };

    state.broadcaster.publish(Event::Initial {
        upload_id: response.upload_id.clone(),
        state: snapshot_state.as_str().to_string(),
        uploaded_chunks_count: 0,
        total_chunks: response.total_chunks,
    });

    Ok(Json(InitiateReply {
        upload_id: response.upload_id,
        total_chunks: response.total_chunks,
        chunk_size: response.chunk_size,
        expires_at: response.expires_at,
    }))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkReply {
    pub accepted: bool,
    pub complete: bool,
}

pub async fn chunk(
    State(state): State<ApiState>,
    Path((upload_id, index)): Path<(String, u32)>,
    body: Bytes,
) -> Result<Json<ChunkReply>, ApiError> {
    let response = state.coordinator.receive_chunk(&upload_id, index, body).await?;

    state.broadcaster.publish(Event::Progress {
        upload_id: upload_id.clone(),
        uploaded_chunks_count: response.uploaded_chunks_count,
        total_chunks: response.total_chunks,
    });

    let complete = response.uploaded_chunks_count >= response.total_chunks;
    if complete && response.state == UploadState::Processing {
        state.broadcaster.publish(Event::Processing { upload_id });
    }

    Ok(Json(ChunkReply { accepted: true, complete }))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusReply {
    pub upload_id: String,
    pub original_name: String,
    pub state: UploadState,
    pub uploaded_chunks_count: u32,
    pub total_chunks: u32,
    pub chunk_bitmap: Vec<bool>,
    pub final_path: Option<String>,
    pub processing_error: Option<String>,
    pub expires_at: DateTime<Utc>,
}

pub async fn status(
    State(state): State<ApiState>,
    Path(upload_id): Path<String>,
) -> Result<Json<StatusReply>, ApiError> {
    let upload = state.coordinator.status(&upload_id).await?;
    let chunk_bitmap = Chunk::for_upload(&state.db, &upload_id)
        .await?
        .into_iter()
        .map(|chunk| chunk.received)
        .collect();

    Ok(Json(StatusReply {
        upload_id: upload.id,
        original_name: upload.original_name,
        state: upload.state,
        uploaded_chunks_count: upload.uploaded_chunks_count,
        total_chunks: upload.total_chunks,
        chunk_bitmap,
        final_path: upload.final_path,
        processing_error: upload.processing_error,
        expires_at: upload.expires_at,
    }))
}

pub async fn cancel(
    State(state): State<ApiState>,
    Path(upload_id): Path<String>,
) -> Result<StatusCode, ApiError> {
    state.coordinator.cancel(&upload_id).await?;
    state.broadcaster.publish(Event::Cancelled { upload_id: upload_id.clone() });
    state.broadcaster.remove_channel(&upload_id);
    Ok(StatusCode::NO_CONTENT)
}
