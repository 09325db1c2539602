//! OpenAI embeddings backend.

use async_trait::async_trait;
use async_openai::{
    config::OpenAIConfig,
    types::{CreateEmbeddingRequest, EmbeddingInput},
    Client,
};
use tracing::debug;

use mnemos_core::error::{MnemosError, MnemosResult};
use mnemos_core::traits::{ensure_dimension, Embedder, EmbedderConfig, EmbeddingPurpose};

/// OpenAI embedding provider.
pub struct OpenAIEmbedder {
    client: Client<OpenAIConfig>,
    config: EmbedderConfig,
}

impl OpenAIEmbedder {
    pub fn new(config: EmbedderConfig) -> MnemosResult<Self> {
        let api_key = config
            .api_key
            .clone()
            .or_else(|| std::env::var("OPENAI_API_KEY").ok())
            .filter(|key| !key.trim().is_empty())
            .ok_or_else(|| {
                MnemosError::Configuration("OpenAI API key not found. Set OPENAI_API_KEY environment variable or provide api_key in config.".to_string())
            })?;
        config
            .validate()
            .map_err(|message| MnemosError::Configuration(message.to_string()))?;

        let openai_config = match config.base_url {
            Some(ref base_url) => OpenAIConfig::new()
                .with_api_key(api_key)
                .with_api_base(base_url),
            None => OpenAIConfig::new().with_api_key(api_key),
        };

        Ok(Self {
            client: Client::with_config(openai_config),
            config,
        })
    }

    /// Only the third-generation models accept a `dimensions` override.
    fn requested_dimensions(&self) -> Option<u32> {
        self.config
            .model
            .starts_with("text-embedding-3")
            .then_some(self.config.embedding_dims as u32)
    }

    fn request(&self, input: EmbeddingInput) -> CreateEmbeddingRequest {
        CreateEmbeddingRequest {
            model: self.config.model.clone(),
            input,
            dimensions: self.requested_dimensions(),
            ..Default::default()
        }
    }

    fn check_dimension(&self, embedding: Vec<f32>) -> MnemosResult<Vec<f32>> {
        ensure_dimension(&self.config.model, self.config.embedding_dims, embedding)
    }
}

#[async_trait]
impl Embedder for OpenAIEmbedder {
    async fn embed(
        &self,
        text: &str,
        purpose: Option<EmbeddingPurpose>,
    ) -> MnemosResult<Vec<f32>> {
        debug!(model = %self.config.model, ?purpose, chars = text.len(), "Embedding text");
        let response = self
            .client
            .embeddings()
            .create(self.request(EmbeddingInput::String(text.to_string())))
            .await
            .map_err(|e| MnemosError::embedding(format!("OpenAI embedding error: {}", e)))?;

        let embedding = response
            .data
            .into_iter()
            .next()
            .ok_or_else(|| MnemosError::embedding("No embedding returned"))?;
        self.check_dimension(embedding.embedding)
    }

    async fn embed_batch(
        &self,
        texts: &[String],
        _purpose: Option<EmbeddingPurpose>,
    ) -> MnemosResult<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let response = self
            .client
            .embeddings()
            .create(self.request(EmbeddingInput::StringArray(texts.to_vec())))
            .await
            .map_err(|e| MnemosError::embedding(format!("OpenAI embedding error: {}", e)))?;

        let mut data = response.data;
        if data.len() != texts.len() {
            return Err(MnemosError::embedding(format!(
                "Requested {} embeddings, received {}",
                texts.len(),
                data.len()
            )));
        }
        data.sort_by_key(|e| e.index);
        data.into_iter()
            .map(|e| self.check_dimension(e.embedding))
            .collect()
    }

    fn dimension(&self) -> usize {
        self.config.embedding_dims
    }

    fn model_name(&self) -> &str {
        &self.config.model
    }
}
