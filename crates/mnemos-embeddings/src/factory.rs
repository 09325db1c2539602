//! Factory for creating embedding providers.

use std::sync::Arc;

use mnemos_core::config::EmbedderProviderConfig;
use mnemos_core::error::MnemosResult;
use mnemos_core::traits::{Embedder, EmbedderConfig, EmbedderProvider};

use crate::openai::OpenAIEmbedder;

/// Factory for creating embedding providers.
pub struct EmbedderFactory;

impl EmbedderFactory {
    pub fn create(
        provider: EmbedderProvider,
        config: EmbedderConfig,
    ) -> MnemosResult<Arc<dyn Embedder>> {
        match provider {
            EmbedderProvider::OpenAI => Ok(Arc::new(OpenAIEmbedder::new(config)?)),
        }
    }

    /// Create an embedder from the engine configuration section.
    pub fn from_config(config: &EmbedderProviderConfig) -> MnemosResult<Arc<dyn Embedder>> {
        Self::create(config.provider, config.config.clone())
    }

    /// Create an OpenAI embedder with a specific model.
    pub fn openai_with_model(
        model: impl Into<String>,
        dims: usize,
    ) -> MnemosResult<Arc<dyn Embedder>> {
        let config = EmbedderConfig {
            model: model.into(),
            embedding_dims: dims,
            ..Default::default()
        };
        Self::create(EmbedderProvider::OpenAI, config)
    }
}
