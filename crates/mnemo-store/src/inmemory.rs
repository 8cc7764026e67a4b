//! # In-Memory Stores
//!
//! In-memory implementations of `RecordStore` and `ArchiveStore`.
//!
//! Fast and dependency-free; data is lost on restart. Used by tests,
//! development setups, and as the reference behavior for the SQLite
//! backend.
//!
//! ## Thread Safety
//!
//! Both stores use `Arc<RwLock<HashMap>>` for safe concurrent access.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use uuid::Uuid;

use mnemo_core::{ArchiveEntry, ArchiveStore, MemoryError, MemoryRecord, RecordStore, Result};

/// In-memory record store for testing and development.
#[derive(Debug, Clone, Default)]
pub struct InMemoryRecordStore {
    records: Arc<RwLock<HashMap<Uuid, MemoryRecord>>>,
}

impl InMemoryRecordStore {
    /// Creates a new empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of records in the store.
    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    /// Returns true if the store is empty.
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl RecordStore for InMemoryRecordStore {
    async fn insert(&self, record: MemoryRecord) -> Result<()> {
        let mut records = self.records.write().await;
        if records.contains_key(&record.id) {
            return Err(MemoryError::ValidationFailed(format!(
                "record {} already exists",
                record.id
            )));
        }
        records.insert(record.id, record);
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<MemoryRecord>> {
        Ok(self.records.read().await.get(&id).cloned())
    }

    async fn get_many(&self, ids: &[Uuid]) -> Result<Vec<MemoryRecord>> {
        let records = self.records.read().await;
        Ok(ids.iter().filter_map(|id| records.get(id).cloned()).collect())
    }

    async fn update(&self, record: MemoryRecord) -> Result<()> {
        let mut records = self.records.write().await;
        if !records.contains_key(&record.id) {
            return Err(MemoryError::NotFound(record.id));
        }
        records.insert(record.id, record);
        Ok(())
    }

    async fn delete(&self, id: Uuid) -> Result<()> {
        self.records.write().await.remove(&id);
        Ok(())
    }

    async fn list_by_owner(&self, owner: &str) -> Result<Vec<MemoryRecord>> {
        let records = self.records.read().await;
        let mut out: Vec<MemoryRecord> = records
            .values()
            .filter(|r| r.owner == owner)
            .cloned()
            .collect();
        out.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(out)
    }

    async fn list_live(&self, owner: &str) -> Result<Vec<MemoryRecord>> {
        let records = self.records.read().await;
        let mut out: Vec<MemoryRecord> = records
            .values()
            .filter(|r| r.owner == owner && !r.archived)
            .cloned()
            .collect();
        out.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(out)
    }

    async fn list_missing_embedding(&self) -> Result<Vec<MemoryRecord>> {
        let records = self.records.read().await;
        let mut out: Vec<MemoryRecord> = records
            .values()
            .filter(|r| !r.archived && r.embedding.is_none())
            .cloned()
            .collect();
        out.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(out)
    }
}

/// In-memory append-only archive store.
#[derive(Debug, Clone, Default)]
pub struct InMemoryArchiveStore {
    entries: Arc<RwLock<HashMap<Uuid, ArchiveEntry>>>,
}

impl InMemoryArchiveStore {
    /// Creates a new empty archive.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of archive entries.
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    /// Returns true if the archive is empty.
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl ArchiveStore for InMemoryArchiveStore {
    async fn append(&self, entry: ArchiveEntry) -> Result<()> {
        let mut entries = self.entries.write().await;
        if entries.contains_key(&entry.original_id) {
            return Err(MemoryError::ArchiveWriteFailed(format!(
                "archive entry for {} already exists",
                entry.original_id
            )));
        }
        entries.insert(entry.original_id, entry);
        Ok(())
    }

    async fn get(&self, original_id: Uuid) -> Result<Option<ArchiveEntry>> {
        Ok(self.entries.read().await.get(&original_id).cloned())
    }

    async fn list(&self, owner: &str, since: DateTime<Utc>) -> Result<Vec<ArchiveEntry>> {
        let entries = self.entries.read().await;
        let mut out: Vec<ArchiveEntry> = entries
            .values()
            .filter(|e| e.record.owner == owner && e.archived_at >= since)
            .cloned()
            .collect();
        out.sort_by(|a, b| {
            a.archived_at
                .cmp(&b.archived_at)
                .then(a.original_id.cmp(&b.original_id))
        });
        Ok(out)
    }
}
