//! Consolidation engine.
//!
//! Periodically merges clusters of near-duplicate memories into one
//! higher-quality record, archiving every source before anything becomes
//! invisible. Each run walks a state machine:
//!
//! `Scanning → Clustering → (per cluster) Merging → Archiving → Committed`
//!
//! with `Aborted` reachable from any state. A cluster either commits
//! fully or leaves no visible effect; archive entries written before a
//! crash are detected as orphans on the next run and their sources stay
//! live.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use mnemo_core::{
    ArchiveEntry, ArchiveReason, ArchiveStore, ConsolidationConfig, MemoryError, MemoryRecord,
    RecordStore, Result,
};
use mnemo_index::HnswIndex;

/// Phases of a consolidation run, used in log fields and abort reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsolidationPhase {
    Scanning,
    Clustering,
    Merging,
    Archiving,
    Committed,
    Aborted,
}

impl ConsolidationPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConsolidationPhase::Scanning => "scanning",
            ConsolidationPhase::Clustering => "clustering",
            ConsolidationPhase::Merging => "merging",
            ConsolidationPhase::Archiving => "archiving",
            ConsolidationPhase::Committed => "committed",
            ConsolidationPhase::Aborted => "aborted",
        }
    }
}

/// Outcome of one consolidation run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConsolidationReport {
    pub clusters_merged: usize,
    pub records_archived: usize,
}

/// Deterministic policy choosing the merged record's content.
///
/// `sources` are ordered by `created_at`, then id; implementations must be
/// pure functions of that slice.
pub trait MergeStrategy: Send + Sync {
    fn name(&self) -> &str;
    fn merge(&self, sources: &[MemoryRecord]) -> String;
}

/// Default strategy: the longest content wins; ties go to the earliest
/// record, then the smallest id. Preserves the most information without
/// fabricating text no embedding has seen.
pub struct LongestContent;

impl MergeStrategy for LongestContent {
    fn name(&self) -> &str {
        "longest-content"
    }

    fn merge(&self, sources: &[MemoryRecord]) -> String {
        sources
            .iter()
            .max_by(|a, b| {
                a.content
                    .len()
                    .cmp(&b.content.len())
                    .then_with(|| b.created_at.cmp(&a.created_at))
                    .then_with(|| b.id.cmp(&a.id))
            })
            .map(|r| r.content.clone())
            .unwrap_or_default()
    }
}

/// The most recently created record's content wins.
pub struct MostRecent;

impl MergeStrategy for MostRecent {
    fn name(&self) -> &str {
        "most-recent"
    }

    fn merge(&self, sources: &[MemoryRecord]) -> String {
        sources
            .iter()
            .max_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| b.id.cmp(&a.id)))
            .map(|r| r.content.clone())
            .unwrap_or_default()
    }
}

/// All contents joined in creation order, separated by blank lines. The
/// merged text is new, so its embedding is left to the backfill worker.
pub struct Concatenate;

impl MergeStrategy for Concatenate {
    fn name(&self) -> &str {
        "concatenate"
    }

    fn merge(&self, sources: &[MemoryRecord]) -> String {
        sources
            .iter()
            .map(|r| r.content.as_str())
            .collect::<Vec<_>>()
            .join("\n\n")
    }
}

/// Union-find over batch indices for transitive similarity grouping.
struct UnionFind {
    parent: Vec<usize>,
}

impl UnionFind {
    fn new(n: usize) -> Self {
        Self {
            parent: (0..n).collect(),
        }
    }

    fn find(&mut self, i: usize) -> usize {
        if self.parent[i] != i {
            let root = self.find(self.parent[i]);
            self.parent[i] = root;
        }
        self.parent[i]
    }

    fn union(&mut self, a: usize, b: usize) {
        let ra = self.find(a);
        let rb = self.find(b);
        if ra != rb {
            self.parent[ra.max(rb)] = ra.min(rb);
        }
    }
}

/// Consolidation engine.
///
/// The only component with transactional discipline: the
/// merge→archive→commit sequence per cluster is serialized against other
/// runs touching the same records via per-record locks acquired in
/// increasing id order.
pub struct ConsolidationEngine {
    store: Arc<dyn RecordStore>,
    archive: Arc<dyn ArchiveStore>,
    index: Arc<HnswIndex>,
    config: ConsolidationConfig,
    strategy: Arc<dyn MergeStrategy>,
    locks: Arc<Mutex<HashMap<Uuid, Arc<Mutex<()>>>>>,
    cancelled: Arc<AtomicBool>,
}

impl ConsolidationEngine {
    /// Creates an engine with the default `LongestContent` merge strategy.
    pub fn new(
        store: Arc<dyn RecordStore>,
        archive: Arc<dyn ArchiveStore>,
        index: Arc<HnswIndex>,
        config: ConsolidationConfig,
    ) -> Self {
        Self::with_strategy(store, archive, index, config, Arc::new(LongestContent))
    }

    /// Creates an engine with a custom merge strategy.
    pub fn with_strategy(
        store: Arc<dyn RecordStore>,
        archive: Arc<dyn ArchiveStore>,
        index: Arc<HnswIndex>,
        config: ConsolidationConfig,
        strategy: Arc<dyn MergeStrategy>,
    ) -> Self {
        Self {
            store,
            archive,
            index,
            config,
            strategy,
            locks: Arc::new(Mutex::new(HashMap::new())),
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Requests cooperative cancellation: the current run stops at the
    /// next between-clusters checkpoint. Clusters already committed stay
    /// committed.
    pub fn request_cancel(&self) {
        self.cancelled.store(true, Ordering::Relaxed);
    }

    /// Runs one consolidation pass for `owner`.
    ///
    /// `batch_size` of 0 uses the configured default. Errors inside a
    /// single cluster are logged and scoped to that cluster; the run keeps
    /// going and the report counts only committed clusters.
    pub async fn run(&self, owner: &str, batch_size: usize) -> Result<ConsolidationReport> {
        self.cancelled.store(false, Ordering::Relaxed);
        let batch_size = if batch_size == 0 {
            self.config.batch_size
        } else {
            batch_size
        };

        self.recover_orphans(owner).await;

        // Scanning: bounded batch of live, embedded, cooled-down records,
        // oldest first.
        let now = Utc::now();
        let cooldown = chrono::Duration::from_std(self.config.cooldown)
            .unwrap_or_else(|_| chrono::Duration::days(1));
        let live = self.store.list_live(owner).await?;
        let mut batch: Vec<MemoryRecord> = live
            .into_iter()
            .filter(|r| r.embedding.is_some())
            .filter(|r| {
                r.last_consolidated_at
                    .map_or(true, |t| now - t >= cooldown)
            })
            .collect();
        batch.truncate(batch_size);
        info!(
            owner = %owner,
            phase = ConsolidationPhase::Scanning.as_str(),
            scanned = batch.len(),
            "consolidation: scanned batch"
        );

        let clusters = self.cluster(&batch).await?;
        info!(
            owner = %owner,
            phase = ConsolidationPhase::Clustering.as_str(),
            clusters = clusters.len(),
            "consolidation: clustered batch"
        );

        let mut report = ConsolidationReport::default();
        let mut consumed: HashSet<Uuid> = HashSet::new();
        let mut conflicted: HashSet<Uuid> = HashSet::new();

        for cluster in clusters {
            if self.cancelled.load(Ordering::Relaxed) {
                info!(owner = %owner, "consolidation: cancelled between clusters");
                break;
            }
            let cluster_ids: Vec<Uuid> = cluster.iter().map(|r| r.id).collect();
            match self.consolidate_cluster(owner, cluster).await {
                Ok(archived) => {
                    report.clusters_merged += 1;
                    report.records_archived += archived;
                    consumed.extend(cluster_ids);
                }
                Err(MemoryError::ConcurrencyConflict(reason)) => {
                    // Retried next run; no cooldown stamp.
                    warn!(
                        owner = %owner,
                        phase = ConsolidationPhase::Aborted.as_str(),
                        reason = %reason,
                        "consolidation: cluster skipped on lock conflict"
                    );
                    conflicted.extend(cluster_ids);
                }
                Err(MemoryError::ValidationFailed(reason)) => {
                    // Cooldown still applies, so a bad cluster cannot
                    // hot-loop across runs.
                    warn!(
                        owner = %owner,
                        phase = ConsolidationPhase::Aborted.as_str(),
                        reason = %reason,
                        "consolidation: cluster skipped on validation failure"
                    );
                }
                Err(e) => {
                    error!(
                        owner = %owner,
                        phase = ConsolidationPhase::Aborted.as_str(),
                        error = %e,
                        "consolidation: cluster failed"
                    );
                    conflicted.extend(cluster_ids);
                }
            }
        }

        self.stamp_cooldown(&batch, &consumed, &conflicted).await;
        self.prune_locks().await;

        info!(
            owner = %owner,
            clusters_merged = report.clusters_merged,
            records_archived = report.records_archived,
            "consolidation: run finished"
        );
        Ok(report)
    }

    /// Groups the batch into clusters of transitively near-duplicate
    /// records using the vector index, restricted to the scanned batch.
    async fn cluster(&self, batch: &[MemoryRecord]) -> Result<Vec<Vec<MemoryRecord>>> {
        if batch.len() < 2 {
            return Ok(Vec::new());
        }
        let index_of: HashMap<Uuid, usize> =
            batch.iter().enumerate().map(|(i, r)| (r.id, i)).collect();
        let mut uf = UnionFind::new(batch.len());

        for (i, record) in batch.iter().enumerate() {
            let Some(embedding) = record.embedding.as_deref() else {
                continue;
            };
            let neighbors = self
                .index
                .search(embedding, self.config.cluster_neighbors)
                .await?;
            for (neighbor_id, similarity) in neighbors {
                if neighbor_id == record.id || similarity < self.config.similarity_threshold {
                    continue;
                }
                if let Some(&j) = index_of.get(&neighbor_id) {
                    uf.union(i, j);
                }
            }
        }

        let mut groups: HashMap<usize, Vec<MemoryRecord>> = HashMap::new();
        for (i, record) in batch.iter().enumerate() {
            groups.entry(uf.find(i)).or_default().push(record.clone());
        }

        let mut clusters: Vec<Vec<MemoryRecord>> = groups
            .into_values()
            .filter(|members| members.len() >= 2)
            .collect();
        for members in &mut clusters {
            members.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        }
        clusters.sort_by(|a, b| {
            a[0].created_at
                .cmp(&b[0].created_at)
                .then(a[0].id.cmp(&b[0].id))
        });
        Ok(clusters)
    }

    /// Merges one cluster: lock, re-validate, merge, archive every source,
    /// then commit. Returns the number of records archived.
    async fn consolidate_cluster(
        &self,
        owner: &str,
        cluster: Vec<MemoryRecord>,
    ) -> Result<usize> {
        let mut ids: Vec<Uuid> = cluster.iter().map(|r| r.id).collect();
        ids.sort();
        let _guards = self.lock_records(&ids).await?;

        // Re-read under lock; a concurrent run may have consumed members.
        let mut sources = self.store.get_many(&ids).await?;
        if sources.len() != ids.len() || sources.iter().any(|r| r.archived) {
            return Err(MemoryError::ConcurrencyConflict(
                "cluster changed before lock acquisition".to_string(),
            ));
        }
        sources.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));

        debug!(
            phase = ConsolidationPhase::Merging.as_str(),
            cluster_size = sources.len(),
            strategy = self.strategy.name(),
            "consolidation: merging cluster"
        );
        let content = self.strategy.merge(&sources);
        if content.trim().is_empty() {
            return Err(MemoryError::ValidationFailed(
                "merged content is empty".to_string(),
            ));
        }
        if sources.iter().any(|r| r.owner != owner) {
            return Err(MemoryError::ValidationFailed(
                "cluster crosses owner boundary".to_string(),
            ));
        }

        let now = Utc::now();
        let base = sources
            .iter()
            .find(|r| r.content == content)
            .unwrap_or(&sources[0]);
        let importance = sources.iter().map(|r| r.importance).max().unwrap_or(5);

        let mut merged = MemoryRecord::new(
            owner.to_string(),
            base.kind.clone(),
            base.category.clone(),
            content.clone(),
            base.metadata.clone(),
            importance,
        );
        // Reuse the base embedding only when the merged content is its
        // content verbatim; otherwise the backfill worker embeds it.
        merged.embedding = if base.content == content {
            base.embedding.clone()
        } else {
            None
        };
        merged.consolidated_from = ids.clone();
        merged.consolidation_reason = Some(format!(
            "merged {} near-duplicate memories (cosine similarity >= {:.2})",
            sources.len(),
            self.config.similarity_threshold
        ));
        merged.last_consolidated_at = Some(now);

        // Archiving: every source gets a durable frozen copy before any
        // visible mutation. An entry left over from a crashed run is
        // accepted when it froze the same content.
        debug!(
            phase = ConsolidationPhase::Archiving.as_str(),
            cluster_size = sources.len(),
            "consolidation: archiving sources"
        );
        for source in &sources {
            match self.archive.get(source.id).await? {
                Some(existing) if existing.record.content == source.content => {
                    debug!(id = %source.id, "consolidation: reusing orphaned archive entry");
                }
                Some(_) => {
                    return Err(MemoryError::ArchiveWriteFailed(format!(
                        "conflicting archive entry for {}",
                        source.id
                    )));
                }
                None => {
                    self.archive
                        .append(ArchiveEntry::freeze(
                            source.clone(),
                            ArchiveReason::Consolidated,
                        ))
                        .await?;
                }
            }
        }

        // Commit: insert the replacement, then retire the sources.
        self.store.insert(merged.clone()).await?;
        if let Some(embedding) = &merged.embedding {
            self.index.insert(merged.id, embedding).await?;
        }
        for mut source in sources {
            source.archived = true;
            source.updated_at = now;
            source.last_consolidated_at = Some(now);
            let source_id = source.id;
            self.store.update(source).await?;
            self.index.remove(source_id).await?;
        }

        info!(
            phase = ConsolidationPhase::Committed.as_str(),
            merged_id = %merged.id,
            sources = ids.len(),
            "consolidation: cluster committed"
        );
        Ok(ids.len())
    }

    /// Acquires per-record locks in increasing id order. Any contention
    /// aborts with `ConcurrencyConflict` rather than waiting, so two runs
    /// can never deadlock across clusters that share a record.
    async fn lock_records(
        &self,
        sorted_ids: &[Uuid],
    ) -> Result<Vec<tokio::sync::OwnedMutexGuard<()>>> {
        let mut guards = Vec::with_capacity(sorted_ids.len());
        for id in sorted_ids {
            let lock = {
                let mut locks = self.locks.lock().await;
                locks
                    .entry(*id)
                    .or_insert_with(|| Arc::new(Mutex::new(())))
                    .clone()
            };
            match lock.try_lock_owned() {
                Ok(guard) => guards.push(guard),
                Err(_) => {
                    return Err(MemoryError::ConcurrencyConflict(format!(
                        "record {id} is locked by another consolidation"
                    )));
                }
            }
        }
        Ok(guards)
    }

    /// Logs archive entries whose sources are still live: leftovers of a
    /// crash between Archiving and Commit. The sources stay live and will
    /// re-cluster; a later merge reuses the frozen copy.
    async fn recover_orphans(&self, owner: &str) {
        let since = chrono::DateTime::<Utc>::MIN_UTC;
        let entries = match self.archive.list(owner, since).await {
            Ok(entries) => entries,
            Err(e) => {
                warn!(owner = %owner, error = %e, "consolidation: orphan scan failed");
                return;
            }
        };
        for entry in entries {
            if entry.archived_reason != ArchiveReason::Consolidated {
                continue;
            }
            match self.store.get(entry.original_id).await {
                Ok(Some(record)) if !record.archived => {
                    warn!(
                        owner = %owner,
                        id = %entry.original_id,
                        "consolidation: orphaned archive entry, source still live"
                    );
                }
                _ => {}
            }
        }
    }

    /// Stamps `last_consolidated_at` on scanned records that were neither
    /// consumed nor deferred by a lock conflict, so the next scan moves on
    /// to other records.
    async fn stamp_cooldown(
        &self,
        batch: &[MemoryRecord],
        consumed: &HashSet<Uuid>,
        conflicted: &HashSet<Uuid>,
    ) {
        let now = Utc::now();
        for record in batch {
            if consumed.contains(&record.id) || conflicted.contains(&record.id) {
                continue;
            }
            match self.store.get(record.id).await {
                Ok(Some(mut fresh)) if !fresh.archived => {
                    fresh.last_consolidated_at = Some(now);
                    fresh.updated_at = now;
                    if let Err(e) = self.store.update(fresh).await {
                        warn!(id = %record.id, error = %e, "consolidation: cooldown stamp failed");
                    }
                }
                Ok(_) => {}
                Err(e) => {
                    warn!(id = %record.id, error = %e, "consolidation: cooldown read failed");
                }
            }
        }
    }

    /// Drops lock-map entries no longer held by anyone.
    async fn prune_locks(&self) {
        let mut locks = self.locks.lock().await;
        locks.retain(|_, lock| Arc::strong_count(lock) > 1);
    }
}
