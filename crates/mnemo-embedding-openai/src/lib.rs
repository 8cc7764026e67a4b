//! # OpenAI Embedding Provider
//!
//! Implementation of the `EmbeddingProvider` trait against OpenAI's
//! embeddings API (or any OpenAI-compatible endpoint via a base URL).
//!
//! Requires an API key (directly or via OPENAI_API_KEY) and a model name;
//! `text-embedding-3-small` (1536 dimensions) is the default.

use async_openai::{types::CreateEmbeddingRequestArgs, Client};
use async_trait::async_trait;
use mnemo_embedding::EmbeddingProvider;
use tracing::{debug, info, instrument, warn};

/// Hard ceiling on a single embeddings request, independent of the store's
/// own configurable embed timeout.
const REQUEST_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(30);
const BATCH_REQUEST_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(60);

/// OpenAI embedding provider. Holds the async-openai client and model name.
#[derive(Debug, Clone)]
pub struct OpenAiEmbedding {
    client: Client<async_openai::config::OpenAIConfig>,
    /// Embedding model name (e.g. "text-embedding-3-small").
    model: String,
}

impl OpenAiEmbedding {
    /// Creates a new OpenAI embedding provider.
    ///
    /// # Arguments
    ///
    /// * `api_key` - OpenAI API key. If empty, OPENAI_API_KEY is used.
    /// * `model` - The embedding model to use.
    pub fn new(api_key: String, model: String) -> Self {
        Self::new_with_base_url(api_key, model, None)
    }

    /// Creates a provider pointing at an OpenAI-compatible endpoint.
    ///
    /// When `base_url` is `Some`, requests are sent there instead of the
    /// default OpenAI API.
    pub fn new_with_base_url(api_key: String, model: String, base_url: Option<&str>) -> Self {
        let api_key = if api_key.is_empty() {
            std::env::var("OPENAI_API_KEY").unwrap_or_default()
        } else {
            api_key
        };

        let mut openai_config = async_openai::config::OpenAIConfig::new().with_api_key(api_key);
        if let Some(url) = base_url.filter(|s| !s.is_empty()) {
            openai_config = openai_config.with_api_base(url);
        }
        let client = Client::with_config(openai_config);

        Self { client, model }
    }

    /// Creates a provider with the default model (`text-embedding-3-small`).
    pub fn with_api_key(api_key: String) -> Self {
        Self::new(api_key, "text-embedding-3-small".to_string())
    }

    /// Sets a different embedding model.
    pub fn with_model(mut self, model: String) -> Self {
        self.model = model;
        self
    }

    /// Returns the embedding model name (for tests and diagnostics).
    pub fn model(&self) -> &str {
        &self.model
    }
}

#[async_trait]
impl EmbeddingProvider for OpenAiEmbedding {
    /// Generates an embedding vector for a single text string.
    ///
    /// # Errors
    ///
    /// Returns an error if the API key is invalid, the request fails or
    /// times out, or the response carries no embedding data.
    #[instrument(skip(self, text), fields(model = %self.model, text_len = text.len()))]
    async fn embed(&self, text: &str) -> Result<Vec<f32>, anyhow::Error> {
        info!(model = %self.model, text_len = text.len(), "OpenAI embed request");

        let request = CreateEmbeddingRequestArgs::default()
            .model(self.model.clone())
            .input(vec![text])
            .build()?;

        let embeddings = self.client.embeddings();
        let response = match tokio::time::timeout(REQUEST_TIMEOUT, embeddings.create(request)).await
        {
            Ok(Ok(r)) => {
                debug!("OpenAI embed response received");
                r
            }
            Ok(Err(e)) => {
                warn!(error = %e, "OpenAI embed request failed");
                return Err(e.into());
            }
            Err(_) => {
                warn!(
                    timeout_secs = REQUEST_TIMEOUT.as_secs(),
                    "OpenAI embed request timed out"
                );
                return Err(anyhow::anyhow!(
                    "OpenAI embed request timed out after {} seconds",
                    REQUEST_TIMEOUT.as_secs()
                ));
            }
        };

        let embedding = match response.data.first() {
            Some(item) => item.embedding.clone(),
            None => {
                warn!("OpenAI embed response has no embedding data");
                return Err(anyhow::anyhow!("No embedding in response"));
            }
        };

        info!(dimension = embedding.len(), "OpenAI embed done");
        Ok(embedding)
    }

    /// Generates embedding vectors for multiple texts in one API call.
    ///
    /// The response must carry one embedding per input, in input order.
    #[instrument(skip(self, texts), fields(model = %self.model, batch_size = texts.len()))]
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, anyhow::Error> {
        if texts.is_empty() {
            debug!("OpenAI embed_batch empty input, skipping");
            return Ok(vec![]);
        }

        info!(model = %self.model, batch_size = texts.len(), "OpenAI embed_batch request");

        let inputs: Vec<&str> = texts.iter().map(|s| s.as_str()).collect();
        let request = CreateEmbeddingRequestArgs::default()
            .model(self.model.clone())
            .input(inputs)
            .build()?;

        let embeddings = self.client.embeddings();
        let response =
            match tokio::time::timeout(BATCH_REQUEST_TIMEOUT, embeddings.create(request)).await {
                Ok(Ok(r)) => r,
                Ok(Err(e)) => {
                    warn!(error = %e, "OpenAI embed_batch request failed");
                    return Err(e.into());
                }
                Err(_) => {
                    warn!(
                        timeout_secs = BATCH_REQUEST_TIMEOUT.as_secs(),
                        "OpenAI embed_batch request timed out"
                    );
                    return Err(anyhow::anyhow!(
                        "OpenAI embed_batch request timed out after {} seconds",
                        BATCH_REQUEST_TIMEOUT.as_secs()
                    ));
                }
            };

        if response.data.len() != texts.len() {
            warn!(
                expected = texts.len(),
                got = response.data.len(),
                "OpenAI embed_batch returned wrong number of embeddings"
            );
            return Err(anyhow::anyhow!(
                "Expected {} embeddings, got {}",
                texts.len(),
                response.data.len()
            ));
        }

        let mut result: Vec<(u32, Vec<f32>)> = response
            .data
            .into_iter()
            .map(|item| (item.index, item.embedding))
            .collect();
        result.sort_by_key(|(index, _)| *index);

        info!(batch_size = result.len(), "OpenAI embed_batch done");
        Ok(result.into_iter().map(|(_, embedding)| embedding).collect())
    }
}
