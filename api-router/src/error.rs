use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use common::error::{AppError, ErrorKind};
use serde::Serialize;

/// Wraps `AppError` at the HTTP boundary. The stable kind string (section
/// 7) is always present in the body; the human-readable message is
/// suppressed in favor of a generic one whenever the kind is `Internal`,
/// so a `Database`/`Io`/`ObjectStore` error never puts its detail on the
/// wire.
#[derive(Debug)]
pub struct ApiError(AppError);

impl From<AppError> for ApiError {
    fn from(err: AppError) -> Self {
        Self(err)
    }
}

const fn status_for(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::UnsupportedFormat => StatusCode::UNSUPPORTED_MEDIA_TYPE,
        ErrorKind::OversizeForPlatform => StatusCode::PAYLOAD_TOO_LARGE,
        ErrorKind::AlreadyIngested
        | ErrorKind::AlreadyCompleted
        | ErrorKind::Cancelled
        | ErrorKind::NotAcceptingChunks => StatusCode::CONFLICT,
        ErrorKind::NotFound | ErrorKind::Expired => StatusCode::NOT_FOUND,
        ErrorKind::ChunkSizeMismatch
        | ErrorKind::SizeMismatch
        | ErrorKind::DigestMismatch
        | ErrorKind::PathUnsafe => StatusCode::BAD_REQUEST,
        ErrorKind::NoRecognizedContent | ErrorKind::ArchiveBomb => StatusCode::UNPROCESSABLE_ENTITY,
        ErrorKind::ChunkWriteFailed | ErrorKind::AssemblyIo | ErrorKind::Internal => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

#[derive(Serialize)]
struct ErrorBody {
    error: &'static str,
    message: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let kind = self.0.kind();
        let status = status_for(kind);

        if status.is_server_error() {
            tracing::error!(error = %self.0, kind = kind.as_str(), "request failed");
        } else {
            tracing::warn!(kind = kind.as_str(), "request rejected");
        }

        let message = if matches!(kind, ErrorKind::Internal) {
            "internal server error".to_string()
        } else {
            self.0.to_string()
        };

        (status, Json(ErrorBody { error: kind.as_str(), message })).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn already_ingested_maps_to_conflict() {
        let err = ApiError::from(AppError::AlreadyIngested("abc123".into()));
        assert_eq!(err.into_response().status(), StatusCode::CONFLICT);
    }

    #[test]
    fn already_completed_maps_to_conflict() {
        let err = ApiError::from(AppError::AlreadyCompleted("upload-1".into()));
        assert_eq!(err.into_response().status(), StatusCode::CONFLICT);
    }

    #[test]
    fn chunk_size_mismatch_maps_to_bad_request() {
        let err = ApiError::from(AppError::ChunkSizeMismatch("expected 16, got 8".into()));
        assert_eq!(err.into_response().status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn oversize_for_platform_maps_to_payload_too_large() {
        let err = ApiError::from(AppError::OversizeForPlatform("nes max 8MiB".into()));
        assert_eq!(err.into_response().status(), StatusCode::PAYLOAD_TOO_LARGE);
    }

    #[test]
    fn database_error_is_reported_as_internal_without_leaking_detail() {
        let err = ApiError::from(AppError::InternalError("credentials: hunter2".into()));
        assert_eq!(err.0.kind(), ErrorKind::Internal);
        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
