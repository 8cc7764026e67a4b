//! # mnemo-engine
//!
//! The algorithmic core of the mnemo semantic memory store.
//!
//! ## Modules
//!
//! - [`scoring`] – pure composite-score and decay functions
//! - [`retrieval`] – query orchestration: embed, over-fetch, filter,
//!   score, rank, truncate, async access bump
//! - [`consolidation`] – near-duplicate merging with archive-before-delete
//! - [`backfill`] – best-effort embedding fill queue and worker
//! - [`maintenance`] – joint decay/priority recomputation, expiry, purge
//! - [`service`] – the `MemoryService` facade
//!
//! ## External Interactions
//!
//! - **Embedding provider**: via the `mnemo-embedding` trait
//! - **Vector index**: `mnemo-index` HNSW graph
//! - **Storage**: any `RecordStore`/`ArchiveStore` implementation

pub mod backfill;
pub mod consolidation;
pub mod maintenance;
pub mod retrieval;
pub mod scoring;
pub mod service;

pub use backfill::{spawn_backfill_worker, BackfillQueue};
pub use consolidation::{
    Concatenate, ConsolidationEngine, ConsolidationPhase, ConsolidationReport, LongestContent,
    MergeStrategy, MostRecent,
};
pub use maintenance::{MaintenanceEngine, MaintenanceReport};
pub use retrieval::{RetrievalEngine, RetrievalFilters};
pub use service::MemoryService;
