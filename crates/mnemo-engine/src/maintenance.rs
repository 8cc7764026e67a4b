//! Decay maintenance and garbage collection.
//!
//! `decay_factor` and `priority_score` are always recomputed together in
//! one record write; they are never partially updated. Records whose decay
//! crosses the expiry threshold are archived (reason `"expired"`) with the
//! same archive-before-delete ordering consolidation uses, and a separate
//! purge pass physically deletes archived records once their decay falls
//! below the low-water mark — but only when their archive entry exists.

use std::sync::Arc;

use chrono::Utc;
use tracing::{info, warn};
use uuid::Uuid;

use mnemo_core::{
    ArchiveEntry, ArchiveReason, ArchiveStore, MaintenanceConfig, MemoryError, MemoryRecord,
    RecordStore, Result, ScoringConfig,
};
use mnemo_index::HnswIndex;

use crate::scoring::{decayed, priority_score};

/// Outcome of one decay-maintenance pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MaintenanceReport {
    pub records_updated: usize,
    pub records_expired: usize,
}

/// Decay maintenance, expiry and purge.
pub struct MaintenanceEngine {
    store: Arc<dyn RecordStore>,
    archive: Arc<dyn ArchiveStore>,
    index: Arc<HnswIndex>,
    scoring: ScoringConfig,
    config: MaintenanceConfig,
}

impl MaintenanceEngine {
    pub fn new(
        store: Arc<dyn RecordStore>,
        archive: Arc<dyn ArchiveStore>,
        index: Arc<HnswIndex>,
        scoring: ScoringConfig,
        config: MaintenanceConfig,
    ) -> Self {
        Self {
            store,
            archive,
            index,
            scoring,
            config,
        }
    }

    /// Recomputes decay and priority for every live record of `owner`,
    /// archiving records whose decay crossed the expiry threshold.
    pub async fn run_decay_maintenance(&self, owner: &str) -> Result<MaintenanceReport> {
        let now = Utc::now();
        let live = self.store.list_live(owner).await?;
        let mut report = MaintenanceReport::default();

        for mut record in live {
            let elapsed = now - record.last_accessed_at;
            let new_decay = decayed(record.decay_factor, record.importance, elapsed, &self.scoring);
            let new_priority = priority_score(&record, now, &self.scoring);

            record.decay_factor = new_decay;
            record.priority_score = new_priority;
            record.updated_at = now;

            if new_decay < self.config.expire_threshold {
                match self.archive_record(record, ArchiveReason::Expired).await {
                    Ok(()) => report.records_expired += 1,
                    Err(e) => {
                        // Stays live with its old state; retried next pass.
                        warn!(owner = %owner, error = %e, "maintenance: expiry failed");
                    }
                }
            } else {
                let id = record.id;
                match self.store.update(record).await {
                    Ok(()) => report.records_updated += 1,
                    Err(e) => {
                        warn!(id = %id, error = %e, "maintenance: decay update failed");
                    }
                }
            }
        }

        info!(
            owner = %owner,
            updated = report.records_updated,
            expired = report.records_expired,
            "maintenance: decay pass finished"
        );
        Ok(report)
    }

    /// Archives one record (frozen copy first, then the soft-delete flag,
    /// then index removal).
    pub async fn archive_record(
        &self,
        mut record: MemoryRecord,
        reason: ArchiveReason,
    ) -> Result<()> {
        if record.archived {
            return Err(MemoryError::ValidationFailed(format!(
                "record {} is already archived",
                record.id
            )));
        }

        match self.archive.get(record.id).await? {
            Some(existing) if existing.record.content == record.content => {}
            Some(_) => {
                return Err(MemoryError::ArchiveWriteFailed(format!(
                    "conflicting archive entry for {}",
                    record.id
                )));
            }
            None => {
                self.archive
                    .append(ArchiveEntry::freeze(record.clone(), reason))
                    .await?;
            }
        }

        record.archived = true;
        record.updated_at = Utc::now();
        let id = record.id;
        self.store.update(record).await?;
        self.index.remove(id).await?;
        info!(id = %id, reason = reason.as_str(), "record archived");
        Ok(())
    }

    /// Archives a record by id on explicit caller request.
    pub async fn archive_by_id(&self, id: Uuid, reason: ArchiveReason) -> Result<()> {
        let record = self
            .store
            .get(id)
            .await?
            .ok_or(MemoryError::NotFound(id))?;
        self.archive_record(record, reason).await
    }

    /// Physically deletes archived records of `owner` whose decay is below
    /// the purge low-water mark. A record without a durable archive entry
    /// is never deleted, whatever its flags claim. Returns the number
    /// purged.
    pub async fn purge_archived(&self, owner: &str) -> Result<usize> {
        let records = self.store.list_by_owner(owner).await?;
        let mut purged = 0;
        for record in records {
            if !record.archived || record.decay_factor >= self.config.purge_low_water {
                continue;
            }
            match self.archive.get(record.id).await? {
                Some(_) => {
                    self.store.delete(record.id).await?;
                    purged += 1;
                }
                None => {
                    warn!(
                        id = %record.id,
                        "purge: archived record has no archive entry, keeping"
                    );
                }
            }
        }
        info!(owner = %owner, purged = purged, "purge: finished");
        Ok(purged)
    }
}
