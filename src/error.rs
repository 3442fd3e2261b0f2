//! Service error taxonomy.
//!
//! Every failure a caller can observe maps to one variant here, and every
//! variant carries a stable machine-readable [`kind`](ServiceError::kind)
//! so clients can branch on it (retry `embedding_service_error`, don't
//! retry `unsupported_format`). The HTTP layer maps kinds to status codes
//! in [`crate::server`].

use std::path::PathBuf;

/// All failures surfaced by the ingestion and chat pipelines.
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    /// The file extension does not correspond to a supported document format.
    #[error("unsupported document format: {0}")]
    UnsupportedFormat(String),

    /// The source file does not exist.
    #[error("file not found: {}", .0.display())]
    FileNotFound(PathBuf),

    /// The source file exists but could not be read or parsed.
    #[error("file unreadable: {}: {reason}", .path.display())]
    FileUnreadable { path: PathBuf, reason: String },

    /// The embedding service failed or returned a malformed response.
    /// The whole batch is rejected; no partial results are surfaced.
    #[error("embedding service error: {0}")]
    EmbeddingService(String),

    /// No asset exists with the given id.
    #[error("asset not found: {0}")]
    AssetNotFound(String),

    /// The asset exists but is not queryable (Pending, Failed, or deleted
    /// out from under a thread that still references it).
    #[error("asset not ready: {0}")]
    AssetNotReady(String),

    /// No chat thread exists with the given id.
    #[error("thread not found: {0}")]
    ThreadNotFound(String),

    /// The thread already has a generation in flight.
    #[error("thread busy: {0}")]
    ThreadBusy(String),

    /// The generative model call failed before producing any output.
    #[error("generation failed: {0}")]
    Generation(String),

    /// The generative model stream failed or was cancelled mid-way. The
    /// partial output has been persisted as a truncated agent turn.
    #[error("generation interrupted: {0}")]
    GenerationInterrupted(String),

    /// Storage or other unexpected internal failure.
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl ServiceError {
    /// Stable machine-readable error kind. Part of the wire contract:
    /// clients key retry behavior off these strings.
    pub fn kind(&self) -> &'static str {
        match self {
            ServiceError::UnsupportedFormat(_) => "unsupported_format",
            ServiceError::FileNotFound(_) => "file_not_found",
            ServiceError::FileUnreadable { .. } => "file_unreadable",
            ServiceError::EmbeddingService(_) => "embedding_service_error",
            ServiceError::AssetNotFound(_) => "asset_not_found",
            ServiceError::AssetNotReady(_) => "asset_not_ready",
            ServiceError::ThreadNotFound(_) => "thread_not_found",
            ServiceError::ThreadBusy(_) => "thread_busy",
            ServiceError::Generation(_) => "generation_error",
            ServiceError::GenerationInterrupted(_) => "generation_interrupted",
            ServiceError::Internal(_) => "internal",
        }
    }
}

impl From<sqlx::Error> for ServiceError {
    fn from(e: sqlx::Error) -> Self {
        ServiceError::Internal(anyhow::Error::new(e))
    }
}

pub type Result<T> = std::result::Result<T, ServiceError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_are_stable() {
        assert_eq!(
            ServiceError::UnsupportedFormat(".xyz".into()).kind(),
            "unsupported_format"
        );
        assert_eq!(ServiceError::ThreadBusy("t1".into()).kind(), "thread_busy");
        assert_eq!(
            ServiceError::GenerationInterrupted("stream died".into()).kind(),
            "generation_interrupted"
        );
    }

    #[test]
    fn display_includes_detail() {
        let e = ServiceError::AssetNotReady("abc".into());
        assert!(e.to_string().contains("abc"));
    }
}
