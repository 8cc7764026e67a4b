//! # mnemo-index
//!
//! Approximate nearest-neighbor index for the mnemo memory store.
//!
//! Provides `HnswIndex`, a hierarchical navigable small-world graph over
//! L2-normalized embedding vectors with cosine similarity. Built
//! incrementally as records are written; safe for concurrent
//! insert/remove/search.

pub mod hnsw;

pub use hnsw::{HnswConfig, HnswIndex};
