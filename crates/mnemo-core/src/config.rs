//! Configuration for the memory store.
//!
//! Everything is an explicit struct passed to the component that needs it;
//! there is no ambient/global configuration. Defaults are tuned for short
//! textual memories embedded with ~1k-dimension models.

use std::time::Duration;

/// Parameters of the relevance-scoring model.
#[derive(Debug, Clone)]
pub struct ScoringConfig {
    /// Base decay rate λ per day for importance 1. Effective rate is
    /// `base_decay_rate * (11 - importance) / 10`, so importance 10 decays
    /// ten times slower than importance 1.
    pub base_decay_rate: f32,
    /// Fraction of the remaining freshness restored by one retrieval hit:
    /// `decay' = decay + (1 - decay) * access_restore`.
    pub access_restore: f32,
    /// Weight of the access-frequency boost in the composite score.
    pub access_boost_weight: f32,
    /// Recency fade rate per hour applied inside the access boost.
    pub access_recency_rate: f32,
    /// Apply the cached `priority_score` as a multiplier after the
    /// composite score. Policy knob, not a contract.
    pub apply_priority_score: bool,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            base_decay_rate: 0.02,
            access_restore: 0.25,
            access_boost_weight: 0.2,
            access_recency_rate: 0.01,
            apply_priority_score: true,
        }
    }
}

/// Parameters of the retrieval path.
#[derive(Debug, Clone)]
pub struct RetrievalConfig {
    /// Candidates with similarity below this are discarded after scoring.
    /// 0.0 disables the floor.
    pub similarity_floor: f32,
    /// The index is asked for `k * overfetch_factor` candidates to
    /// compensate for post-filtering loss.
    pub overfetch_factor: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            similarity_floor: 0.0,
            overfetch_factor: 4,
        }
    }
}

/// Parameters of the consolidation engine.
#[derive(Debug, Clone)]
pub struct ConsolidationConfig {
    /// Neighbors at or above this cosine similarity are near-duplicates.
    pub similarity_threshold: f32,
    /// A record examined less than this long ago is skipped by scanning.
    pub cooldown: Duration,
    /// Default scan batch size when the caller does not specify one.
    pub batch_size: usize,
    /// Index neighbors fetched per record during clustering.
    pub cluster_neighbors: usize,
}

impl Default for ConsolidationConfig {
    fn default() -> Self {
        Self {
            similarity_threshold: 0.9,
            cooldown: Duration::from_secs(24 * 60 * 60),
            batch_size: 64,
            cluster_neighbors: 8,
        }
    }
}

/// Parameters of decay maintenance and garbage collection.
#[derive(Debug, Clone)]
pub struct MaintenanceConfig {
    /// Live records whose decay falls below this are archived as expired.
    pub expire_threshold: f32,
    /// Archived records whose decay is below this are physically purged.
    pub purge_low_water: f32,
}

impl Default for MaintenanceConfig {
    fn default() -> Self {
        Self {
            expire_threshold: 0.10,
            purge_low_water: 0.05,
        }
    }
}

/// Top-level configuration threaded through the service facade.
#[derive(Debug, Clone)]
pub struct MemoryConfig {
    pub scoring: ScoringConfig,
    pub retrieval: RetrievalConfig,
    pub consolidation: ConsolidationConfig,
    pub maintenance: MaintenanceConfig,
    /// Timeout applied to every embedding-provider call.
    pub embed_timeout: Duration,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            scoring: ScoringConfig::default(),
            retrieval: RetrievalConfig::default(),
            consolidation: ConsolidationConfig::default(),
            maintenance: MaintenanceConfig::default(),
            embed_timeout: Duration::from_secs(10),
        }
    }
}
