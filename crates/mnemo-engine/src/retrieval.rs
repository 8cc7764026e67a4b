//! Retrieval engine.
//!
//! Orchestrates the query path: embed the query, over-fetch candidates
//! from the vector index, apply hard filters against the record store,
//! score, rank, truncate, and bump access statistics off the response
//! path. External interactions: EmbeddingProvider; HnswIndex.search;
//! RecordStore.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::time::timeout;
use tracing::{debug, info, warn};
use uuid::Uuid;

use mnemo_core::{MemoryError, MemoryRecord, RecordStore, Result, RetrievalConfig, ScoringConfig};
use mnemo_embedding::EmbeddingProvider;
use mnemo_index::HnswIndex;

use crate::scoring::{composite_score, refresh_on_access};

/// Hard filters applied to candidates before scoring.
#[derive(Debug, Clone, Default)]
pub struct RetrievalFilters {
    /// Exact category match.
    pub category: Option<String>,
    /// Only records created at or after this instant.
    pub created_after: Option<DateTime<Utc>>,
    /// Only records created at or before this instant.
    pub created_before: Option<DateTime<Utc>>,
    /// Per-call similarity floor, overriding the configured one.
    pub similarity_floor: Option<f32>,
}

/// Retrieval engine: candidate generation, scoring, ranking, filtering.
pub struct RetrievalEngine {
    store: Arc<dyn RecordStore>,
    index: Arc<HnswIndex>,
    provider: Arc<dyn EmbeddingProvider>,
    config: RetrievalConfig,
    scoring: ScoringConfig,
    embed_timeout: Duration,
}

impl RetrievalEngine {
    pub fn new(
        store: Arc<dyn RecordStore>,
        index: Arc<HnswIndex>,
        provider: Arc<dyn EmbeddingProvider>,
        config: RetrievalConfig,
        scoring: ScoringConfig,
        embed_timeout: Duration,
    ) -> Self {
        Self {
            store,
            index,
            provider,
            config,
            scoring,
            embed_timeout,
        }
    }

    /// Returns up to `k` live records of `owner`, ranked by composite
    /// relevance score (ties broken by `created_at`, most recent first).
    ///
    /// Never returns archived records, regardless of races with concurrent
    /// consolidation: candidates are re-read from the record store after
    /// the index search and filtered on their current state.
    ///
    /// # Errors
    ///
    /// - `ValidationFailed` when `k` is 0.
    /// - `EmbeddingUnavailable` when the provider fails or times out; the
    ///   query is not retried with a zero vector.
    pub async fn retrieve(
        &self,
        owner: &str,
        query_text: &str,
        k: usize,
        filters: &RetrievalFilters,
    ) -> Result<Vec<MemoryRecord>> {
        if k == 0 {
            return Err(MemoryError::ValidationFailed(
                "retrieval requires k > 0".to_string(),
            ));
        }

        info!(
            owner = %owner,
            query_len = query_text.len(),
            k = k,
            "retrieve: starting semantic retrieval"
        );

        let query_embedding = match timeout(self.embed_timeout, self.provider.embed(query_text))
            .await
        {
            Ok(Ok(embedding)) => embedding,
            Ok(Err(e)) => {
                warn!(error = %e, "retrieve: query embedding failed");
                return Err(MemoryError::EmbeddingUnavailable(e.to_string()));
            }
            Err(_) => {
                warn!(
                    timeout_ms = self.embed_timeout.as_millis() as u64,
                    "retrieve: query embedding timed out"
                );
                return Err(MemoryError::EmbeddingUnavailable(format!(
                    "embedding timed out after {}ms",
                    self.embed_timeout.as_millis()
                )));
            }
        };

        // Over-fetch to compensate for post-filtering loss.
        let fetch = k.saturating_mul(self.config.overfetch_factor.max(1));
        let candidates = self.index.search(&query_embedding, fetch).await?;
        debug!(candidates = candidates.len(), fetch = fetch, "retrieve: index candidates");

        let ids: Vec<Uuid> = candidates.iter().map(|(id, _)| *id).collect();
        let similarity_by_id: HashMap<Uuid, f32> = candidates.into_iter().collect();
        let records = self.store.get_many(&ids).await?;

        let now = Utc::now();
        let floor = filters
            .similarity_floor
            .unwrap_or(self.config.similarity_floor);

        let mut scored: Vec<(f32, MemoryRecord)> = Vec::with_capacity(records.len());
        for record in records {
            if record.owner != owner || record.archived {
                continue;
            }
            if let Some(category) = &filters.category {
                if record.category != *category {
                    continue;
                }
            }
            if let Some(after) = filters.created_after {
                if record.created_at < after {
                    continue;
                }
            }
            if let Some(before) = filters.created_before {
                if record.created_at > before {
                    continue;
                }
            }
            let Some(similarity) = similarity_by_id.get(&record.id).copied() else {
                continue;
            };
            if similarity < floor {
                continue;
            }
            let score = composite_score(similarity, &record, now, &self.scoring);
            scored.push((score, record));
        }

        scored.sort_by(|a, b| {
            b.0.total_cmp(&a.0)
                .then_with(|| b.1.created_at.cmp(&a.1.created_at))
        });
        scored.truncate(k);

        let results: Vec<MemoryRecord> = scored.into_iter().map(|(_, record)| record).collect();
        self.spawn_access_bump(results.iter().map(|r| r.id).collect());

        info!(
            owner = %owner,
            k = k,
            returned = results.len(),
            "retrieve: returned ranked records"
        );
        Ok(results)
    }

    /// Applies the access-stat side effects off the response path:
    /// increment `access_count`, stamp `last_accessed_at`, nudge
    /// `decay_factor` toward 1.0. Last write wins; failures are logged and
    /// never affect the already-returned response.
    fn spawn_access_bump(&self, ids: Vec<Uuid>) {
        if ids.is_empty() {
            return;
        }
        let store = self.store.clone();
        let scoring = self.scoring.clone();
        tokio::spawn(async move {
            for id in ids {
                match store.get(id).await {
                    Ok(Some(mut record)) => {
                        let now = Utc::now();
                        record.access_count += 1;
                        record.last_accessed_at = now;
                        record.updated_at = now;
                        record.decay_factor = refresh_on_access(record.decay_factor, &scoring);
                        if let Err(e) = store.update(record).await {
                            warn!(id = %id, error = %e, "access bump update failed");
                        }
                    }
                    Ok(None) => {}
                    Err(e) => {
                        warn!(id = %id, error = %e, "access bump read failed");
                    }
                }
            }
        });
    }
}
