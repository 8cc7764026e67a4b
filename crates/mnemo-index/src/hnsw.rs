//! Hierarchical navigable small-world graph.
//!
//! Incremental ANN index over normalized embeddings. Construction
//! parameters (`m`, `ef_construction`) are fixed at build time; only the
//! search breadth `ef_search` is tunable at runtime, trading recall
//! against latency. Distance metric: cosine similarity, computed as a dot
//! product on vectors normalized at insert time.

use std::cmp::{Ordering, Reverse};
use std::collections::{BinaryHeap, HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};
use std::sync::Arc;

use rand::Rng;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use uuid::Uuid;

use mnemo_core::{MemoryError, Result};

/// Upper bound on sampled layer levels.
const MAX_LEVEL: usize = 16;

/// Construction and search parameters for the HNSW graph.
#[derive(Debug, Clone)]
pub struct HnswConfig {
    /// Max neighbors per node on layers above 0.
    pub m: usize,
    /// Max neighbors per node on layer 0.
    pub m_max0: usize,
    /// Candidate-list breadth while building links.
    pub ef_construction: usize,
    /// Initial search breadth; adjustable later via `set_ef_search`.
    pub ef_search: usize,
    /// Multiplier for the exponential level distribution.
    pub level_multiplier: f64,
}

impl Default for HnswConfig {
    fn default() -> Self {
        let m = 16;
        Self {
            m,
            m_max0: m * 2,
            ef_construction: 200,
            ef_search: 64,
            level_multiplier: 1.0 / (m as f64).ln(),
        }
    }
}

/// A candidate ordered by similarity, ties broken by id for determinism.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Scored {
    similarity: f32,
    id: Uuid,
}

impl Eq for Scored {}

impl Ord for Scored {
    fn cmp(&self, other: &Self) -> Ordering {
        self.similarity
            .total_cmp(&other.similarity)
            .then_with(|| self.id.cmp(&other.id))
    }
}

impl PartialOrd for Scored {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

struct Node {
    vector: Vec<f32>,
    level: usize,
    /// Adjacency lists, one per layer 0..=level. Links at layer L only
    /// reference nodes whose level is >= L.
    neighbors: Vec<Vec<Uuid>>,
}

#[derive(Default)]
struct Graph {
    nodes: HashMap<Uuid, Node>,
    entry: Option<Uuid>,
    max_level: usize,
}

/// HNSW approximate nearest-neighbor index.
///
/// Shared between ingestion (inserts) and consolidation (removes/inserts)
/// while retrieval searches concurrently; all access goes through an
/// internal `RwLock`, so any number of searches proceed in parallel and
/// writers hold the lock only for the graph mutation itself.
pub struct HnswIndex {
    config: HnswConfig,
    ef_search: AtomicUsize,
    graph: Arc<RwLock<Graph>>,
}

impl HnswIndex {
    /// Creates an empty index with default parameters.
    pub fn new() -> Self {
        Self::with_config(HnswConfig::default())
    }

    /// Creates an empty index with the given parameters.
    pub fn with_config(config: HnswConfig) -> Self {
        let ef_search = config.ef_search.max(1);
        Self {
            config,
            ef_search: AtomicUsize::new(ef_search),
            graph: Arc::new(RwLock::new(Graph::default())),
        }
    }

    /// Adjusts the runtime search breadth.
    pub fn set_ef_search(&self, ef: usize) {
        self.ef_search.store(ef.max(1), AtomicOrdering::Relaxed);
    }

    /// Returns the number of indexed vectors.
    pub async fn len(&self) -> usize {
        self.graph.read().await.nodes.len()
    }

    /// Returns true if nothing is indexed.
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Returns true if `id` is indexed.
    pub async fn contains(&self, id: Uuid) -> bool {
        self.graph.read().await.nodes.contains_key(&id)
    }

    /// Inserts (or replaces) a vector under `id`.
    ///
    /// The vector is L2-normalized; an empty or zero-norm vector is
    /// rejected with `MissingEmbedding` — records without a usable
    /// embedding never enter the index.
    pub async fn insert(&self, id: Uuid, embedding: &[f32]) -> Result<()> {
        let vector = normalize(embedding).ok_or(MemoryError::MissingEmbedding(id))?;
        let level = sample_level(self.config.level_multiplier);

        let mut graph = self.graph.write().await;
        if graph.nodes.contains_key(&id) {
            debug!(id = %id, "index insert replacing existing vector");
            unlink(&mut graph, id);
        }

        let node = Node {
            vector: vector.clone(),
            level,
            neighbors: vec![Vec::new(); level + 1],
        };

        let Some(entry) = graph.entry else {
            graph.nodes.insert(id, node);
            graph.entry = Some(id);
            graph.max_level = level;
            debug!(id = %id, level = level, "index insert: first node");
            return Ok(());
        };

        graph.nodes.insert(id, node);

        // Greedy descent through the layers above the new node's level.
        let entry_sim = similarity_to(&graph, &vector, entry);
        let mut ep = Scored {
            similarity: entry_sim,
            id: entry,
        };
        let top = graph.max_level;
        for layer in ((level + 1)..=top).rev() {
            ep = greedy_search(&graph, &vector, ep, layer);
        }

        // Link into every layer from the node's level down to 0.
        let mut entry_points = vec![ep];
        for layer in (0..=level.min(top)).rev() {
            let found = search_layer(
                &graph,
                &vector,
                &entry_points,
                self.config.ef_construction,
                layer,
            );
            let m_max = if layer == 0 {
                self.config.m_max0
            } else {
                self.config.m
            };

            let selected: Vec<Uuid> = found
                .iter()
                .take(self.config.m)
                .map(|scored| scored.id)
                .collect();

            if let Some(node) = graph.nodes.get_mut(&id) {
                node.neighbors[layer] = selected.clone();
            }

            for neighbor in selected {
                let mut list = match graph.nodes.get(&neighbor) {
                    Some(node) => node.neighbors[layer].clone(),
                    None => continue,
                };
                if !list.contains(&id) {
                    list.push(id);
                }
                let pruned = prune_neighbors(&graph, neighbor, list, m_max);
                if let Some(node) = graph.nodes.get_mut(&neighbor) {
                    node.neighbors[layer] = pruned;
                }
            }

            entry_points = found;
        }

        if level > graph.max_level {
            graph.max_level = level;
            graph.entry = Some(id);
        }

        debug!(id = %id, level = level, size = graph.nodes.len(), "index insert done");
        Ok(())
    }

    /// Removes `id` from the index. Removing an unknown id is a no-op.
    pub async fn remove(&self, id: Uuid) -> Result<()> {
        let mut graph = self.graph.write().await;
        if graph.nodes.contains_key(&id) {
            unlink(&mut graph, id);
            debug!(id = %id, size = graph.nodes.len(), "index remove done");
        } else {
            debug!(id = %id, "index remove: id not indexed");
        }
        Ok(())
    }

    /// Returns up to `k` ids ordered by descending cosine similarity to
    /// `query`. An empty index yields an empty result, not an error.
    pub async fn search(&self, query: &[f32], k: usize) -> Result<Vec<(Uuid, f32)>> {
        if k == 0 {
            return Ok(Vec::new());
        }
        let graph = self.graph.read().await;
        let Some(entry) = graph.entry else {
            info!(k = k, "index search on empty index");
            return Ok(Vec::new());
        };
        let Some(query) = normalize(query) else {
            warn!("index search with zero-norm query vector");
            return Ok(Vec::new());
        };

        let mut ep = Scored {
            similarity: similarity_to(&graph, &query, entry),
            id: entry,
        };
        for layer in (1..=graph.max_level).rev() {
            ep = greedy_search(&graph, &query, ep, layer);
        }

        let ef = self.ef_search.load(AtomicOrdering::Relaxed).max(k);
        let found = search_layer(&graph, &query, &[ep], ef, 0);

        let results: Vec<(Uuid, f32)> = found
            .into_iter()
            .take(k)
            .map(|scored| (scored.id, scored.similarity))
            .collect();

        debug!(k = k, returned = results.len(), "index search returned");
        Ok(results)
    }
}

impl Default for HnswIndex {
    fn default() -> Self {
        Self::new()
    }
}

/// L2-normalizes a vector. Returns `None` for empty or zero-norm input.
fn normalize(v: &[f32]) -> Option<Vec<f32>> {
    if v.is_empty() {
        return None;
    }
    let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if !norm.is_finite() || norm <= f32::EPSILON {
        return None;
    }
    Some(v.iter().map(|x| x / norm).collect())
}

fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

fn similarity_to(graph: &Graph, query: &[f32], id: Uuid) -> f32 {
    graph
        .nodes
        .get(&id)
        .map(|node| dot(query, &node.vector))
        .unwrap_or(f32::MIN)
}

/// Samples a node level from the standard exponential distribution.
fn sample_level(multiplier: f64) -> usize {
    let u: f64 = rand::rng().random();
    let level = (-(1.0 - u).ln() * multiplier).floor();
    (level as usize).min(MAX_LEVEL)
}

/// Moves greedily toward `query` on one layer until no neighbor improves.
fn greedy_search(graph: &Graph, query: &[f32], mut ep: Scored, layer: usize) -> Scored {
    loop {
        let Some(node) = graph.nodes.get(&ep.id) else {
            return ep;
        };
        if layer >= node.neighbors.len() {
            return ep;
        }
        let mut improved = false;
        for &neighbor in &node.neighbors[layer] {
            let similarity = similarity_to(graph, query, neighbor);
            if similarity > ep.similarity {
                ep = Scored {
                    similarity,
                    id: neighbor,
                };
                improved = true;
            }
        }
        if !improved {
            return ep;
        }
    }
}

/// Best-first expansion on one layer, keeping the `ef` closest candidates.
/// Returns candidates sorted by descending similarity.
fn search_layer(
    graph: &Graph,
    query: &[f32],
    entry_points: &[Scored],
    ef: usize,
    layer: usize,
) -> Vec<Scored> {
    let ef = ef.max(1);
    let mut visited: HashSet<Uuid> = HashSet::new();
    let mut candidates: BinaryHeap<Scored> = BinaryHeap::new();
    let mut results: BinaryHeap<Reverse<Scored>> = BinaryHeap::new();

    for ep in entry_points {
        if visited.insert(ep.id) {
            candidates.push(*ep);
            results.push(Reverse(*ep));
            if results.len() > ef {
                results.pop();
            }
        }
    }

    while let Some(current) = candidates.pop() {
        let worst = results
            .peek()
            .map(|r| r.0.similarity)
            .unwrap_or(f32::MIN);
        if results.len() >= ef && current.similarity < worst {
            break;
        }
        let Some(node) = graph.nodes.get(&current.id) else {
            continue;
        };
        if layer >= node.neighbors.len() {
            continue;
        }
        for &neighbor in &node.neighbors[layer] {
            if !visited.insert(neighbor) {
                continue;
            }
            let similarity = similarity_to(graph, query, neighbor);
            let worst = results
                .peek()
                .map(|r| r.0.similarity)
                .unwrap_or(f32::MIN);
            if results.len() < ef || similarity > worst {
                let scored = Scored {
                    similarity,
                    id: neighbor,
                };
                candidates.push(scored);
                results.push(Reverse(scored));
                if results.len() > ef {
                    results.pop();
                }
            }
        }
    }

    let mut out: Vec<Scored> = results.into_iter().map(|r| r.0).collect();
    out.sort_by(|a, b| b.cmp(a));
    out
}

/// Keeps the `m_max` neighbors closest to `center`, dropping the rest.
fn prune_neighbors(graph: &Graph, center: Uuid, list: Vec<Uuid>, m_max: usize) -> Vec<Uuid> {
    if list.len() <= m_max {
        return list;
    }
    let Some(center_node) = graph.nodes.get(&center) else {
        return list;
    };
    let mut scored: Vec<Scored> = list
        .into_iter()
        .filter_map(|id| {
            graph.nodes.get(&id).map(|node| Scored {
                similarity: dot(&center_node.vector, &node.vector),
                id,
            })
        })
        .collect();
    scored.sort_by(|a, b| b.cmp(a));
    scored.truncate(m_max);
    scored.into_iter().map(|s| s.id).collect()
}

/// Removes a node and every link pointing at it, then re-elects the entry
/// point if needed. Pruning can leave asymmetric links, so all adjacency
/// lists at the node's layers are scanned.
fn unlink(graph: &mut Graph, id: Uuid) {
    let Some(removed) = graph.nodes.remove(&id) else {
        return;
    };
    for node in graph.nodes.values_mut() {
        let top = node.level.min(removed.level);
        for layer in 0..=top {
            node.neighbors[layer].retain(|&other| other != id);
        }
    }
    if graph.entry == Some(id) {
        let new_entry = graph
            .nodes
            .iter()
            .max_by_key(|(node_id, node)| (node.level, **node_id))
            .map(|(node_id, node)| (*node_id, node.level));
        match new_entry {
            Some((entry_id, level)) => {
                graph.entry = Some(entry_id);
                graph.max_level = level;
            }
            None => {
                graph.entry = None;
                graph.max_level = 0;
            }
        }
    }
}
