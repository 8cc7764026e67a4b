//! # SQLite Stores
//!
//! SQLite-based implementations of `RecordStore` and `ArchiveStore`.
//!
//! Persistent single-file storage; similarity search stays in the vector
//! index, so embeddings are stored opaquely as little-endian `f32` BLOBs.
//! Timestamps are RFC 3339 strings; open metadata, consolidation lineage
//! and the opaque extraction fields are JSON text columns.
//!
//! ## Database Schema
//!
//! ```sql
//! CREATE TABLE memory_records (
//!     id TEXT PRIMARY KEY,
//!     owner TEXT NOT NULL,
//!     kind TEXT NOT NULL,
//!     category TEXT NOT NULL,
//!     content TEXT NOT NULL,
//!     embedding BLOB,
//!     metadata TEXT NOT NULL,
//!     importance INTEGER NOT NULL,
//!     created_at TEXT NOT NULL,
//!     updated_at TEXT NOT NULL,
//!     last_accessed_at TEXT NOT NULL,
//!     access_count INTEGER NOT NULL,
//!     priority_score REAL NOT NULL,
//!     decay_factor REAL NOT NULL,
//!     archived INTEGER NOT NULL,
//!     consolidated_from TEXT NOT NULL,
//!     consolidation_reason TEXT,
//!     last_consolidated_at TEXT,
//!     entities TEXT,
//!     relationships TEXT
//! );
//!
//! CREATE TABLE archive_entries (
//!     original_id TEXT PRIMARY KEY,
//!     owner TEXT NOT NULL,
//!     record TEXT NOT NULL,
//!     archived_at TEXT NOT NULL,
//!     archived_reason TEXT NOT NULL
//! );
//! ```

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{sqlite::SqliteConnectOptions, Row, SqlitePool};
use tracing::info;
use uuid::Uuid;

use mnemo_core::{
    ArchiveEntry, ArchiveReason, ArchiveStore, MemoryError, MemoryRecord, RecordStore, Result,
};

fn db_err(e: sqlx::Error) -> MemoryError {
    MemoryError::Database(e.to_string())
}

fn decode_err(context: &str, e: impl std::fmt::Display) -> MemoryError {
    MemoryError::Database(format!("failed to decode {context}: {e}"))
}

fn embedding_to_blob(embedding: &[f32]) -> Vec<u8> {
    embedding.iter().flat_map(|f| f.to_le_bytes()).collect()
}

fn blob_to_embedding(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

fn parse_timestamp(s: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| decode_err("timestamp", e))
}

async fn open_pool(database_url: &str) -> Result<SqlitePool> {
    let options = SqliteConnectOptions::new()
        .create_if_missing(true)
        .filename(database_url);
    SqlitePool::connect_with(options).await.map_err(db_err)
}

/// SQLite-backed record store.
#[derive(Clone)]
pub struct SqliteRecordStore {
    pool: SqlitePool,
}

impl SqliteRecordStore {
    /// Opens (creating if missing) the database file and initializes the
    /// `memory_records` schema.
    pub async fn new(database_url: &str) -> Result<Self> {
        let pool = open_pool(database_url).await?;
        let store = Self { pool };
        store.init_schema().await?;
        Ok(store)
    }

    /// Wraps an existing pool, initializing the schema. Lets the record
    /// and archive stores share one database file.
    pub async fn with_pool(pool: SqlitePool) -> Result<Self> {
        let store = Self { pool };
        store.init_schema().await?;
        Ok(store)
    }

    /// Returns the underlying pool, e.g. to build the archive store on the
    /// same file.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn init_schema(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS memory_records (
                id TEXT PRIMARY KEY,
                owner TEXT NOT NULL,
                kind TEXT NOT NULL,
                category TEXT NOT NULL,
                content TEXT NOT NULL,
                embedding BLOB,
                metadata TEXT NOT NULL,
                importance INTEGER NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                last_accessed_at TEXT NOT NULL,
                access_count INTEGER NOT NULL,
                priority_score REAL NOT NULL,
                decay_factor REAL NOT NULL,
                archived INTEGER NOT NULL,
                consolidated_from TEXT NOT NULL,
                consolidation_reason TEXT,
                last_consolidated_at TEXT,
                entities TEXT,
                relationships TEXT
            );

            CREATE INDEX IF NOT EXISTS idx_records_owner ON memory_records(owner);
            CREATE INDEX IF NOT EXISTS idx_records_owner_archived
                ON memory_records(owner, archived);
            CREATE INDEX IF NOT EXISTS idx_records_created_at ON memory_records(created_at);
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    /// Converts a row to a MemoryRecord.
    fn row_to_record(row: &sqlx::sqlite::SqliteRow) -> Result<MemoryRecord> {
        let id: String = row.try_get("id").map_err(db_err)?;
        let owner: String = row.try_get("owner").map_err(db_err)?;
        let kind: String = row.try_get("kind").map_err(db_err)?;
        let category: String = row.try_get("category").map_err(db_err)?;
        let content: String = row.try_get("content").map_err(db_err)?;
        let embedding_blob: Option<Vec<u8>> = row.try_get("embedding").map_err(db_err)?;
        let metadata_json: String = row.try_get("metadata").map_err(db_err)?;
        let importance: i64 = row.try_get("importance").map_err(db_err)?;
        let created_at: String = row.try_get("created_at").map_err(db_err)?;
        let updated_at: String = row.try_get("updated_at").map_err(db_err)?;
        let last_accessed_at: String = row.try_get("last_accessed_at").map_err(db_err)?;
        let access_count: i64 = row.try_get("access_count").map_err(db_err)?;
        let priority_score: f64 = row.try_get("priority_score").map_err(db_err)?;
        let decay_factor: f64 = row.try_get("decay_factor").map_err(db_err)?;
        let archived: i64 = row.try_get("archived").map_err(db_err)?;
        let consolidated_from_json: String =
            row.try_get("consolidated_from").map_err(db_err)?;
        let consolidation_reason: Option<String> =
            row.try_get("consolidation_reason").map_err(db_err)?;
        let last_consolidated_at: Option<String> =
            row.try_get("last_consolidated_at").map_err(db_err)?;
        let entities_json: Option<String> = row.try_get("entities").map_err(db_err)?;
        let relationships_json: Option<String> =
            row.try_get("relationships").map_err(db_err)?;

        let id = Uuid::parse_str(&id).map_err(|e| decode_err("record id", e))?;
        let metadata =
            serde_json::from_str(&metadata_json).map_err(|e| decode_err("metadata", e))?;
        let consolidated_from = serde_json::from_str(&consolidated_from_json)
            .map_err(|e| decode_err("consolidated_from", e))?;
        let entities = entities_json
            .map(|s| serde_json::from_str(&s).map_err(|e| decode_err("entities", e)))
            .transpose()?;
        let relationships = relationships_json
            .map(|s| serde_json::from_str(&s).map_err(|e| decode_err("relationships", e)))
            .transpose()?;
        let last_consolidated_at = last_consolidated_at
            .map(|s| parse_timestamp(&s))
            .transpose()?;

        Ok(MemoryRecord {
            id,
            owner,
            kind,
            category,
            content,
            embedding: embedding_blob.map(|blob| blob_to_embedding(&blob)),
            metadata,
            importance: importance as u8,
            created_at: parse_timestamp(&created_at)?,
            updated_at: parse_timestamp(&updated_at)?,
            last_accessed_at: parse_timestamp(&last_accessed_at)?,
            access_count: access_count as u64,
            priority_score: priority_score as f32,
            decay_factor: decay_factor as f32,
            archived: archived != 0,
            consolidated_from,
            consolidation_reason,
            last_consolidated_at,
            entities,
            relationships,
        })
    }

    fn bind_record_values<'q>(
        query: sqlx::query::Query<'q, sqlx::Sqlite, sqlx::sqlite::SqliteArguments<'q>>,
        record: &'q MemoryRecord,
        embedding_blob: Option<Vec<u8>>,
        metadata_json: String,
        consolidated_from_json: String,
        entities_json: Option<String>,
        relationships_json: Option<String>,
    ) -> sqlx::query::Query<'q, sqlx::Sqlite, sqlx::sqlite::SqliteArguments<'q>> {
        query
            .bind(record.owner.clone())
            .bind(record.kind.clone())
            .bind(record.category.clone())
            .bind(record.content.clone())
            .bind(embedding_blob)
            .bind(metadata_json)
            .bind(record.importance as i64)
            .bind(record.created_at.to_rfc3339())
            .bind(record.updated_at.to_rfc3339())
            .bind(record.last_accessed_at.to_rfc3339())
            .bind(record.access_count as i64)
            .bind(record.priority_score as f64)
            .bind(record.decay_factor as f64)
            .bind(record.archived as i64)
            .bind(consolidated_from_json)
            .bind(record.consolidation_reason.clone())
            .bind(record.last_consolidated_at.map(|t| t.to_rfc3339()))
            .bind(entities_json)
            .bind(relationships_json)
    }

    fn encode_fields(
        record: &MemoryRecord,
    ) -> Result<(Option<Vec<u8>>, String, String, Option<String>, Option<String>)> {
        let embedding_blob = record.embedding.as_deref().map(embedding_to_blob);
        let metadata_json = serde_json::to_string(&record.metadata)
            .map_err(|e| decode_err("metadata", e))?;
        let consolidated_from_json = serde_json::to_string(&record.consolidated_from)
            .map_err(|e| decode_err("consolidated_from", e))?;
        let entities_json = record
            .entities
            .as_ref()
            .map(|v| serde_json::to_string(v).map_err(|e| decode_err("entities", e)))
            .transpose()?;
        let relationships_json = record
            .relationships
            .as_ref()
            .map(|v| serde_json::to_string(v).map_err(|e| decode_err("relationships", e)))
            .transpose()?;
        Ok((
            embedding_blob,
            metadata_json,
            consolidated_from_json,
            entities_json,
            relationships_json,
        ))
    }
}

#[async_trait]
impl RecordStore for SqliteRecordStore {
    async fn insert(&self, record: MemoryRecord) -> Result<()> {
        let (embedding_blob, metadata_json, consolidated_from_json, entities_json, relationships_json) =
            Self::encode_fields(&record)?;

        let query = sqlx::query(
            r#"
            INSERT INTO memory_records (
                id, owner, kind, category, content, embedding, metadata,
                importance, created_at, updated_at, last_accessed_at,
                access_count, priority_score, decay_factor, archived,
                consolidated_from, consolidation_reason, last_consolidated_at,
                entities, relationships
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13,
                      ?14, ?15, ?16, ?17, ?18, ?19, ?20)
            "#,
        )
        .bind(record.id.to_string());

        let query = Self::bind_record_values(
            query,
            &record,
            embedding_blob,
            metadata_json,
            consolidated_from_json,
            entities_json,
            relationships_json,
        );

        match query.execute(&self.pool).await {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(db)) if db.is_unique_violation() => {
                Err(MemoryError::ValidationFailed(format!(
                    "record {} already exists",
                    record.id
                )))
            }
            Err(e) => Err(db_err(e)),
        }
    }

    async fn get(&self, id: Uuid) -> Result<Option<MemoryRecord>> {
        let row = sqlx::query("SELECT * FROM memory_records WHERE id = ?1")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;

        match row {
            Some(r) => Ok(Some(Self::row_to_record(&r)?)),
            None => Ok(None),
        }
    }

    async fn get_many(&self, ids: &[Uuid]) -> Result<Vec<MemoryRecord>> {
        let mut records = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(record) = self.get(*id).await? {
                records.push(record);
            }
        }
        Ok(records)
    }

    async fn update(&self, record: MemoryRecord) -> Result<()> {
        let (embedding_blob, metadata_json, consolidated_from_json, entities_json, relationships_json) =
            Self::encode_fields(&record)?;

        let query = sqlx::query(
            r#"
            UPDATE memory_records SET
                owner = ?2, kind = ?3, category = ?4, content = ?5,
                embedding = ?6, metadata = ?7, importance = ?8,
                created_at = ?9, updated_at = ?10, last_accessed_at = ?11,
                access_count = ?12, priority_score = ?13, decay_factor = ?14,
                archived = ?15, consolidated_from = ?16,
                consolidation_reason = ?17, last_consolidated_at = ?18,
                entities = ?19, relationships = ?20
            WHERE id = ?1
            "#,
        )
        .bind(record.id.to_string());

        let query = Self::bind_record_values(
            query,
            &record,
            embedding_blob,
            metadata_json,
            consolidated_from_json,
            entities_json,
            relationships_json,
        );

        let result = query.execute(&self.pool).await.map_err(db_err)?;
        if result.rows_affected() == 0 {
            return Err(MemoryError::NotFound(record.id));
        }
        Ok(())
    }

    async fn delete(&self, id: Uuid) -> Result<()> {
        sqlx::query("DELETE FROM memory_records WHERE id = ?1")
            .bind(id.to_string())
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(())
    }

    async fn list_by_owner(&self, owner: &str) -> Result<Vec<MemoryRecord>> {
        let rows = sqlx::query(
            "SELECT * FROM memory_records WHERE owner = ?1 ORDER BY created_at, id",
        )
        .bind(owner)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        rows.iter().map(Self::row_to_record).collect()
    }

    async fn list_live(&self, owner: &str) -> Result<Vec<MemoryRecord>> {
        let rows = sqlx::query(
            "SELECT * FROM memory_records WHERE owner = ?1 AND archived = 0 \
             ORDER BY created_at, id",
        )
        .bind(owner)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        rows.iter().map(Self::row_to_record).collect()
    }

    async fn list_missing_embedding(&self) -> Result<Vec<MemoryRecord>> {
        let rows = sqlx::query(
            "SELECT * FROM memory_records WHERE archived = 0 AND embedding IS NULL \
             ORDER BY created_at, id",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        rows.iter().map(Self::row_to_record).collect()
    }
}

/// SQLite-backed append-only archive store.
#[derive(Clone)]
pub struct SqliteArchiveStore {
    pool: SqlitePool,
}

impl SqliteArchiveStore {
    /// Opens (creating if missing) the database file and initializes the
    /// `archive_entries` schema.
    pub async fn new(database_url: &str) -> Result<Self> {
        let pool = open_pool(database_url).await?;
        let store = Self { pool };
        store.init_schema().await?;
        Ok(store)
    }

    /// Wraps an existing pool, initializing the schema.
    pub async fn with_pool(pool: SqlitePool) -> Result<Self> {
        let store = Self { pool };
        store.init_schema().await?;
        Ok(store)
    }

    async fn init_schema(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS archive_entries (
                original_id TEXT PRIMARY KEY,
                owner TEXT NOT NULL,
                record TEXT NOT NULL,
                archived_at TEXT NOT NULL,
                archived_reason TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_archive_owner ON archive_entries(owner);
            CREATE INDEX IF NOT EXISTS idx_archive_archived_at
                ON archive_entries(archived_at);
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    fn row_to_entry(row: &sqlx::sqlite::SqliteRow) -> Result<ArchiveEntry> {
        let original_id: String = row.try_get("original_id").map_err(db_err)?;
        let record_json: String = row.try_get("record").map_err(db_err)?;
        let archived_at: String = row.try_get("archived_at").map_err(db_err)?;
        let reason: String = row.try_get("archived_reason").map_err(db_err)?;

        let original_id =
            Uuid::parse_str(&original_id).map_err(|e| decode_err("archive id", e))?;
        let record: MemoryRecord =
            serde_json::from_str(&record_json).map_err(|e| decode_err("archived record", e))?;
        let archived_reason = ArchiveReason::parse(&reason)
            .ok_or_else(|| decode_err("archive reason", format!("unknown reason {reason:?}")))?;

        Ok(ArchiveEntry {
            original_id,
            record,
            archived_at: parse_timestamp(&archived_at)?,
            archived_reason,
        })
    }
}

#[async_trait]
impl ArchiveStore for SqliteArchiveStore {
    async fn append(&self, entry: ArchiveEntry) -> Result<()> {
        let record_json = serde_json::to_string(&entry.record)
            .map_err(|e| MemoryError::ArchiveWriteFailed(e.to_string()))?;

        let result = sqlx::query(
            r#"
            INSERT INTO archive_entries (
                original_id, owner, record, archived_at, archived_reason
            ) VALUES (?1, ?2, ?3, ?4, ?5)
            "#,
        )
        .bind(entry.original_id.to_string())
        .bind(entry.record.owner.clone())
        .bind(record_json)
        .bind(entry.archived_at.to_rfc3339())
        .bind(entry.archived_reason.as_str())
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => {
                info!(
                    original_id = %entry.original_id,
                    reason = entry.archived_reason.as_str(),
                    "archive entry appended"
                );
                Ok(())
            }
            // Append-only: every failure, duplicate key included, surfaces
            // as ArchiveWriteFailed so consolidation rolls the cluster back.
            Err(e) => Err(MemoryError::ArchiveWriteFailed(e.to_string())),
        }
    }

    async fn get(&self, original_id: Uuid) -> Result<Option<ArchiveEntry>> {
        let row = sqlx::query("SELECT * FROM archive_entries WHERE original_id = ?1")
            .bind(original_id.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;

        match row {
            Some(r) => Ok(Some(Self::row_to_entry(&r)?)),
            None => Ok(None),
        }
    }

    async fn list(&self, owner: &str, since: DateTime<Utc>) -> Result<Vec<ArchiveEntry>> {
        let rows = sqlx::query(
            "SELECT * FROM archive_entries WHERE owner = ?1 AND archived_at >= ?2 \
             ORDER BY archived_at, original_id",
        )
        .bind(owner)
        .bind(since.to_rfc3339())
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        rows.iter().map(Self::row_to_entry).collect()
    }
}
