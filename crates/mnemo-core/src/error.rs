//! Memory store error types.
//!
//! Used by store implementations, the vector index, and the engines.
//! Nothing here is fatal to the process: every variant leaves the store in
//! a consistent, re-attemptable state.

use thiserror::Error;
use uuid::Uuid;

/// Errors that can occur when using memory store operations.
#[derive(Error, Debug)]
pub enum MemoryError {
    /// Index operation attempted before an embedding exists.
    /// Recoverable by retrying after backfill.
    #[error("Missing embedding for record {0}")]
    MissingEmbedding(Uuid),
    /// The external embedding provider failed or timed out. Surfaced to the
    /// caller on the query path, silently deferred on the ingest path.
    #[error("Embedding provider unavailable: {0}")]
    EmbeddingUnavailable(String),
    /// Malformed merge candidate during consolidation; the cluster is
    /// skipped and the run continues.
    #[error("Validation failed: {0}")]
    ValidationFailed(String),
    /// Lock acquisition failed during consolidation commit; the cluster is
    /// retried on the next run, not within the same run.
    #[error("Concurrency conflict: {0}")]
    ConcurrencyConflict(String),
    /// The archive append failed. Fatal for that cluster: no sources are
    /// archived or removed (archive-before-delete is enforced by ordering).
    #[error("Archive write failed: {0}")]
    ArchiveWriteFailed(String),
    #[error("Not found: {0}")]
    NotFound(Uuid),
    #[error("Database error: {0}")]
    Database(String),
}

/// Convenience alias used across the workspace.
pub type Result<T> = std::result::Result<T, MemoryError>;
