//! # Record and Archive Storage
//!
//! This module defines the storage interfaces of the memory store.
//!
//! ## RecordStore
//!
//! Durable keyed storage for memory records: transactional point writes and
//! range/filter reads. The vector index is maintained separately and is
//! only eventually consistent with the record store.
//!
//! ## ArchiveStore
//!
//! Append-only log of removed/merged records, keyed by original id. The
//! core exposes no update or delete on it; purging archive entries, if
//! ever needed, is an external administrative action.
//!
//! ### Implementations
//!
//! - `InMemoryRecordStore` / `InMemoryArchiveStore` (mnemo-store): testing
//!   and development
//! - `SqliteRecordStore` / `SqliteArchiveStore` (mnemo-store): persistent
//!   storage using SQLite

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::Result;
use crate::types::{ArchiveEntry, MemoryRecord};

/// Trait for storing and retrieving memory records.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Inserts a new record. The id must not already exist.
    async fn insert(&self, record: MemoryRecord) -> Result<()>;

    /// Retrieves a record by id. Returns `None` if not found.
    async fn get(&self, id: Uuid) -> Result<Option<MemoryRecord>>;

    /// Retrieves several records by id. Missing ids are silently skipped;
    /// the result preserves the order of `ids`.
    async fn get_many(&self, ids: &[Uuid]) -> Result<Vec<MemoryRecord>>;

    /// Overwrites an existing record.
    async fn update(&self, record: MemoryRecord) -> Result<()>;

    /// Physically deletes a record. Callers must have durably archived it
    /// first; the store does not check.
    async fn delete(&self, id: Uuid) -> Result<()>;

    /// All records of an owner, archived included, ordered by `created_at`.
    async fn list_by_owner(&self, owner: &str) -> Result<Vec<MemoryRecord>>;

    /// Live (non-archived) records of an owner, ordered by `created_at`.
    async fn list_live(&self, owner: &str) -> Result<Vec<MemoryRecord>>;

    /// Live records still waiting for an embedding, across all owners.
    /// Feeds the backfill sweep.
    async fn list_missing_embedding(&self) -> Result<Vec<MemoryRecord>>;
}

/// Trait for the append-only archive of removed records.
#[async_trait]
pub trait ArchiveStore: Send + Sync {
    /// Appends an entry. A second append for the same `original_id` fails
    /// with `ArchiveWriteFailed`; there is exactly one frozen copy per
    /// removal.
    async fn append(&self, entry: ArchiveEntry) -> Result<()>;

    /// Retrieves the entry for an original record id, if any.
    async fn get(&self, original_id: Uuid) -> Result<Option<ArchiveEntry>>;

    /// Entries of an owner archived at or after `since`, ordered by
    /// `archived_at`.
    async fn list(&self, owner: &str, since: DateTime<Utc>) -> Result<Vec<ArchiveEntry>>;
}
