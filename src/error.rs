//! Error taxonomy for the indexing engine.
//!
//! File-local failures (unreadable file, parse fallback, a dropped embedding
//! batch) never halt a reindex cycle; store-level and dimension-level errors
//! do. The orchestration layer works in `anyhow::Result` and downcasts to
//! these variants where the distinction matters.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    /// A single file could not be opened or read. Logged, skipped, counted.
    #[error("Read failure for {path}: {message}")]
    ReadFailure { path: PathBuf, message: String },

    /// The embedding endpoint returned a retryable status.
    #[error("Transient embedding failure: {0}")]
    EmbeddingTransient(String),

    /// Authentication or bad-request from the embedding endpoint.
    #[error("Permanent embedding failure: {0}")]
    EmbeddingPermanent(String),

    /// A chunk-store transaction failed. Fatal for the reindex cycle; the
    /// transactional store guarantees no partial commit happened.
    #[error("Store failure: {0}")]
    Store(#[from] rusqlite::Error),

    /// An index invariant was violated, e.g. an embedding blob whose length
    /// does not match the configured dimension and precision. Indicates a
    /// corrupted cache or a misconfigured model; recover with a force reindex.
    #[error("Index invariant violation: {0}")]
    IndexInvariant(String),

    /// The filesystem watcher for a project failed. The watcher is torn
    /// down; the next startup verification catches up.
    #[error("Watcher failure for {project}: {message}")]
    Watcher { project: String, message: String },
}

impl EngineError {
    pub fn read_failure(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::ReadFailure {
            path: path.into(),
            message: message.into(),
        }
    }

    pub fn invariant(message: impl Into<String>) -> Self {
        Self::IndexInvariant(message.into())
    }

    pub fn watcher(project: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Watcher {
            project: project.into(),
            message: message.into(),
        }
    }

    /// Whether the error may succeed on retry.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::EmbeddingTransient(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = EngineError::read_failure("/src/a.cs", "permission denied");
        assert!(err.to_string().contains("/src/a.cs"));
        assert!(err.to_string().contains("permission denied"));

        let err = EngineError::invariant("expected blob of 4096 bytes, got 12");
        assert!(err.to_string().contains("invariant"));

        let err = EngineError::watcher("shop", "inotify limit reached");
        assert!(err.to_string().contains("shop"));
    }

    #[test]
    fn test_transient_classification() {
        assert!(EngineError::EmbeddingTransient("503".into()).is_transient());
        assert!(!EngineError::EmbeddingPermanent("401".into()).is_transient());
        assert!(!EngineError::invariant("x").is_transient());
    }
}
