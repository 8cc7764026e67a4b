//! # Core Types
//!
//! This module defines the central entities of the memory store.
//!
//! ## MemoryRecord
//!
//! A single memory: a short text body plus classification tags, an optional
//! embedding vector, open metadata, and the bookkeeping fields driving
//! relevance scoring (importance, decay, access statistics) and
//! consolidation lineage.
//!
//! ## ArchiveEntry
//!
//! A frozen copy of a `MemoryRecord` taken at the moment of removal,
//! together with when and why it was archived. Archive entries are
//! append-only; see `ArchiveStore`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// A single memory record.
///
/// `embedding` stays `None` until the embedding provider has processed
/// `content`; records without an embedding do not participate in similarity
/// search. `archived` is a soft-delete flag: archived records are excluded
/// from retrieval but only physically removed by a separate purge pass.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MemoryRecord {
    /// Unique identifier, assigned at creation, immutable.
    pub id: Uuid,
    /// Logical memory-space this record belongs to (multi-tenant key).
    pub owner: String,
    /// Free-form classification tag (closed vocabulary by convention).
    pub kind: String,
    /// Free-form classification tag (closed vocabulary by convention).
    pub category: String,
    /// Primary text body; the unit that is embedded and displayed.
    pub content: String,
    /// Vector embedding for semantic search; `None` until backfilled.
    pub embedding: Option<Vec<f32>>,
    /// Open key-value payload. The core never interprets its contents.
    pub metadata: Map<String, Value>,
    /// Author-asserted priority, 1–10.
    pub importance: u8,
    /// When the record was created. Immutable.
    pub created_at: DateTime<Utc>,
    /// When the record was last written.
    pub updated_at: DateTime<Utc>,
    /// When the record was last returned by a retrieval.
    pub last_accessed_at: DateTime<Utc>,
    /// Number of retrieval hits, monotonically increasing.
    pub access_count: u64,
    /// Cached relevance multiplier, recomputed by decay maintenance.
    pub priority_score: f32,
    /// Freshness in [0, 1]; 1.0 = fully fresh, trends toward 0 with disuse.
    pub decay_factor: f32,
    /// Soft-delete flag; archived records are excluded from retrieval.
    pub archived: bool,
    /// Ids of the records this record replaced, empty unless consolidated.
    pub consolidated_from: Vec<Uuid>,
    /// Human-readable justification; set only when `consolidated_from` is non-empty.
    pub consolidation_reason: Option<String>,
    /// Last time consolidation produced or examined this record. Drives the
    /// scan cooldown so the same record is not reprocessed every run.
    pub last_consolidated_at: Option<DateTime<Utc>>,
    /// Optional structured extraction, populated externally, opaque to the core.
    pub entities: Option<Value>,
    /// Optional structured extraction, populated externally, opaque to the core.
    pub relationships: Option<Value>,
}

impl MemoryRecord {
    /// Creates a new `MemoryRecord` with a generated UUID, no embedding,
    /// and fresh scoring defaults (`priority_score` 1.0, `decay_factor` 1.0).
    pub fn new(
        owner: String,
        kind: String,
        category: String,
        content: String,
        metadata: Map<String, Value>,
        importance: u8,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            owner,
            kind,
            category,
            content,
            embedding: None,
            metadata,
            importance,
            created_at: now,
            updated_at: now,
            last_accessed_at: now,
            access_count: 0,
            priority_score: 1.0,
            decay_factor: 1.0,
            archived: false,
            consolidated_from: Vec::new(),
            consolidation_reason: None,
            last_consolidated_at: None,
            entities: None,
            relationships: None,
        }
    }

    /// True when the record is live and has an embedding, i.e. it may
    /// participate in similarity search.
    pub fn is_searchable(&self) -> bool {
        !self.archived && self.embedding.is_some()
    }
}

/// Why a record was archived.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ArchiveReason {
    /// Consumed by a consolidation merge.
    Consolidated,
    /// Decay crossed the expiry threshold.
    Expired,
    /// Explicit caller request.
    Manual,
}

impl ArchiveReason {
    /// Stable string form used in persisted columns and log fields.
    pub fn as_str(&self) -> &'static str {
        match self {
            ArchiveReason::Consolidated => "consolidated",
            ArchiveReason::Expired => "expired",
            ArchiveReason::Manual => "manual",
        }
    }

    /// Parses the stable string form produced by [`as_str`](Self::as_str).
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "consolidated" => Some(ArchiveReason::Consolidated),
            "expired" => Some(ArchiveReason::Expired),
            "manual" => Some(ArchiveReason::Manual),
            _ => None,
        }
    }
}

/// A frozen copy of a record at the moment of its removal from the live set.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ArchiveEntry {
    /// Id of the archived record; the archive store's key.
    pub original_id: Uuid,
    /// The record exactly as it was when archived.
    pub record: MemoryRecord,
    /// When the entry was written.
    pub archived_at: DateTime<Utc>,
    /// Why the record was archived.
    pub archived_reason: ArchiveReason,
}

impl ArchiveEntry {
    /// Freezes `record` into an archive entry stamped now.
    pub fn freeze(record: MemoryRecord, reason: ArchiveReason) -> Self {
        Self {
            original_id: record.id,
            record,
            archived_at: Utc::now(),
            archived_reason: reason,
        }
    }
}
