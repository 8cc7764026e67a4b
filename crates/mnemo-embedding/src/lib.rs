//! # Text Embeddings
//!
//! This crate defines the embedding provider interface consumed by the
//! memory store. Embedding generation itself is an external collaborator;
//! the core only sees fixed-length float vectors.

use async_trait::async_trait;

mod config;
pub use config::{EmbeddingConfig, EnvEmbeddingConfig};

/// Provider of text embeddings.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Generates an embedding vector for a single text string.
    async fn embed(&self, text: &str) -> Result<Vec<f32>, anyhow::Error>;

    /// Generates embedding vectors for multiple texts in a single API call.
    /// This is more efficient than calling `embed` multiple times.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, anyhow::Error>;
}
