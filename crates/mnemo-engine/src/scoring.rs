//! Relevance scoring.
//!
//! Pure functions combining semantic similarity with importance, freshness
//! (decay) and access statistics into one composite score, plus the decay
//! recomputation used by periodic maintenance. No I/O, no shared state.
//!
//! The composite never goes to zero on zero similarity alone: an
//! exact-keyword match whose embedding has gone stale must still be
//! rankable, so a small smoothing term keeps the similarity factor
//! positive. Callers that want a hard similarity cutoff apply a floor
//! before scoring.

use chrono::{DateTime, Duration, Utc};
use mnemo_core::{MemoryRecord, ScoringConfig};

/// Keeps the similarity factor positive at similarity 0.
const SIMILARITY_SMOOTHING: f32 = 1e-3;

/// Maps the 1–10 importance scale to a multiplier, anchored so that
/// importance 5 is neutral (1.0). Out-of-range input is clamped.
pub fn importance_multiplier(importance: u8) -> f32 {
    0.5 + 0.1 * importance.clamp(1, 10) as f32
}

/// Reward for frequent and recent access: logarithmic in `access_count`,
/// fading exponentially with hours since the last access. Floored at 1.0,
/// so access history can only boost a record, never bury it.
pub fn access_boost(
    access_count: u64,
    last_accessed_at: DateTime<Utc>,
    now: DateTime<Utc>,
    config: &ScoringConfig,
) -> f32 {
    let hours = (now - last_accessed_at).num_seconds().max(0) as f32 / 3600.0;
    let fade = (-config.access_recency_rate * hours).exp();
    1.0 + config.access_boost_weight * ((1 + access_count) as f32).ln() * fade
}

/// Composite relevance score of a candidate for the current query.
///
/// `similarity * decay_factor * importance_multiplier * access_boost`,
/// optionally multiplied by the cached `priority_score`
/// (`config.apply_priority_score`).
pub fn composite_score(
    similarity: f32,
    record: &MemoryRecord,
    now: DateTime<Utc>,
    config: &ScoringConfig,
) -> f32 {
    let base = (similarity + SIMILARITY_SMOOTHING)
        * record.decay_factor
        * importance_multiplier(record.importance)
        * access_boost(record.access_count, record.last_accessed_at, now, config);
    if config.apply_priority_score {
        base * record.priority_score
    } else {
        base
    }
}

/// Effective decay rate λ per day for a given importance: high-importance
/// records decay slower (importance 10 decays at a tenth of the base rate).
pub fn effective_decay_rate(importance: u8, config: &ScoringConfig) -> f32 {
    config.base_decay_rate * (11 - importance.clamp(1, 10)) as f32 / 10.0
}

/// Recomputed decay factor after `elapsed` without access:
/// `decay_factor * exp(-λ(importance) * elapsed_days)`, clamped to [0, 1].
pub fn decayed(
    decay_factor: f32,
    importance: u8,
    elapsed: Duration,
    config: &ScoringConfig,
) -> f32 {
    let days = elapsed.num_seconds().max(0) as f32 / 86_400.0;
    (decay_factor * (-effective_decay_rate(importance, config) * days).exp()).clamp(0.0, 1.0)
}

/// Decay factor after one retrieval hit: a fraction of the lost freshness
/// is restored, nudging the record back toward 1.0.
pub fn refresh_on_access(decay_factor: f32, config: &ScoringConfig) -> f32 {
    (decay_factor + (1.0 - decay_factor) * config.access_restore).clamp(0.0, 1.0)
}

/// Cached relevance multiplier, recomputed by decay maintenance together
/// with the decay factor (never one without the other).
pub fn priority_score(record: &MemoryRecord, now: DateTime<Utc>, config: &ScoringConfig) -> f32 {
    importance_multiplier(record.importance)
        * access_boost(record.access_count, record.last_accessed_at, now, config)
}
