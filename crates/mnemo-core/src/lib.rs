//! # mnemo-core
//!
//! Core types and traits for the mnemo semantic memory store.
//!
//! ## Modules
//!
//! - [`types`] – MemoryRecord, ArchiveEntry, ArchiveReason
//! - [`error`] – MemoryError taxonomy
//! - [`config`] – per-component configuration structs
//! - [`store`] – RecordStore and ArchiveStore traits
//!
//! ## Quick Start
//!
//! ```rust
//! use mnemo_core::{MemoryRecord, MetadataMap};
//!
//! let record = MemoryRecord::new(
//!     "tenant-a".to_string(),
//!     "note".to_string(),
//!     "ops".to_string(),
//!     "deploy script fails on timeout".to_string(),
//!     MetadataMap::new(),
//!     7,
//! );
//! assert!(record.embedding.is_none());
//! assert_eq!(record.decay_factor, 1.0);
//! ```

pub mod config;
pub mod error;
pub mod store;
pub mod types;

pub use config::{
    ConsolidationConfig, MaintenanceConfig, MemoryConfig, RetrievalConfig, ScoringConfig,
};
pub use error::{MemoryError, Result};
pub use store::{ArchiveStore, RecordStore};
pub use types::{ArchiveEntry, ArchiveReason, MemoryRecord};

/// Open key-value metadata payload carried by every record.
pub type MetadataMap = serde_json::Map<String, serde_json::Value>;
