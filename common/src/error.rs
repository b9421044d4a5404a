use thiserror::Error;
use tokio::task::JoinError;

/// Stable, client-facing error kinds (section 7). `to_kind` is the only thing
/// callers across crate boundaries should match on; the `Display` impl
/// carries operator-facing detail that must never leak to an API response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    UnsupportedFormat,
    OversizeForPlatform,
    AlreadyIngested,
    AlreadyCompleted,
    NotFound,
    Expired,
    Cancelled,
    NotAcceptingChunks,
    ChunkSizeMismatch,
    ChunkWriteFailed,
    AssemblyIo,
    SizeMismatch,
    DigestMismatch,
    NoRecognizedContent,
    ArchiveBomb,
    PathUnsafe,
    Internal,
}

impl ErrorKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::UnsupportedFormat => "UnsupportedFormat",
            Self::OversizeForPlatform => "OversizeForPlatform",
            Self::AlreadyIngested => "AlreadyIngested",
            Self::AlreadyCompleted => "AlreadyCompleted",
            Self::NotFound => "NotFound",
            Self::Expired => "Expired",
            Self::Cancelled => "Cancelled",
            Self::NotAcceptingChunks => "NotAcceptingChunks",
            Self::ChunkSizeMismatch => "ChunkSizeMismatch",
            Self::ChunkWriteFailed => "ChunkWriteFailed",
            Self::AssemblyIo => "AssemblyIO",
            Self::SizeMismatch => "SizeMismatch",
            Self::DigestMismatch => "DigestMismatch",
            Self::NoRecognizedContent => "NoRecognizedContent",
            Self::ArchiveBomb => "ArchiveBomb",
            Self::PathUnsafe => "PathUnsafe",
            Self::Internal => "Internal",
        }
    }
}

// Core internal errors
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(#[from] surrealdb::Error),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Validation error: {0}")]
    Validation(String),
    #[error("Task join error: {0}")]
    Join(#[from] JoinError),
    #[error("IoError: {0}")]
    Io(#[from] std::io::Error),
    #[error("Reqwest error: {0}")]
    Reqwest(#[from] reqwest::Error),
    #[error("Object store error: {0}")]
    ObjectStore(#[from] object_store::Error),
    #[error("Anyhow error: {0}")]
    Anyhow(#[from] anyhow::Error),
    #[error("Internal service error: {0}")]
    InternalError(String),

    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),
    #[error("Oversize for platform: {0}")]
    OversizeForPlatform(String),
    #[error("Already ingested: {0}")]
    AlreadyIngested(String),
    #[error("Upload already completed: {0}")]
    AlreadyCompleted(String),
    #[error("Upload expired: {0}")]
    Expired(String),
    #[error("Upload cancelled: {0}")]
    Cancelled(String),
    #[error("Not accepting chunks: {0}")]
    NotAcceptingChunks(String),
    #[error("Chunk size mismatch: {0}")]
    ChunkSizeMismatch(String),
    #[error("Chunk write failed: {0}")]
    ChunkWriteFailed(String),
    #[error("Assembly IO error: {0}")]
    AssemblyIo(String),
    #[error("Size mismatch: {0}")]
    SizeMismatch(String),
    #[error("Digest mismatch: {0}")]
    DigestMismatch(String),
    #[error("No recognized content: {0}")]
    NoRecognizedContent(String),
    #[error("Archive bomb rejected: {0}")]
    ArchiveBomb(String),
    #[error("Unsafe path: {0}")]
    PathUnsafe(String),
}

impl AppError {
    /// Maps to the stable error-kind string surfaced to clients (section 7).
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::UnsupportedFormat(_) => ErrorKind::UnsupportedFormat,
            Self::OversizeForPlatform(_) => ErrorKind::OversizeForPlatform,
            Self::AlreadyIngested(_) => ErrorKind::AlreadyIngested,
            Self::AlreadyCompleted(_) => ErrorKind::AlreadyCompleted,
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::Expired(_) => ErrorKind::Expired,
            Self::Cancelled(_) => ErrorKind::Cancelled,
            Self::NotAcceptingChunks(_) => ErrorKind::NotAcceptingChunks,
            Self::ChunkSizeMismatch(_) => ErrorKind::ChunkSizeMismatch,
            Self::ChunkWriteFailed(_) => ErrorKind::ChunkWriteFailed,
            Self::AssemblyIo(_) => ErrorKind::AssemblyIo,
            Self::SizeMismatch(_) => ErrorKind::SizeMismatch,
            Self::DigestMismatch(_) => ErrorKind::DigestMismatch,
            Self::NoRecognizedContent(_) => ErrorKind::NoRecognizedContent,
            Self::ArchiveBomb(_) => ErrorKind::ArchiveBomb,
            Self::PathUnsafe(_) => ErrorKind::PathUnsafe,
            Self::Database(_)
            | Self::Join(_)
            | Self::Io(_)
            | Self::Reqwest(_)
            | Self::ObjectStore(_)
            | Self::Anyhow(_)
            | Self::InternalError(_)
            | Self::Validation(_) => ErrorKind::Internal,
        }
    }
}
