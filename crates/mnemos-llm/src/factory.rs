//! Factory for creating reasoning-engine backends.

use std::sync::Arc;

use mnemos_core::config::{LlmProvider, LlmProviderConfig};
use mnemos_core::error::MnemosResult;
use mnemos_core::traits::{Llm, LlmConfig};
use tracing::info;

use crate::anthropic::AnthropicLlm;
use crate::openai::OpenAILlm;

/// Factory for creating reasoning-engine backends.
pub struct LlmFactory;

impl LlmFactory {
    /// Create a backend for `provider`.
    pub fn create(provider: LlmProvider, config: LlmConfig) -> MnemosResult<Arc<dyn Llm>> {
        let llm: Arc<dyn Llm> = match provider {
            LlmProvider::OpenAI => Arc::new(OpenAILlm::new(config)?),
            LlmProvider::Anthropic => Arc::new(AnthropicLlm::new(config)?),
        };
        info!(provider = ?provider, model = llm.model_name(), "Reasoning engine ready");
        Ok(llm)
    }

    /// Create a backend from a provider section of the engine configuration.
    pub fn from_config(config: &LlmProviderConfig) -> MnemosResult<Arc<dyn Llm>> {
        Self::create(config.provider, config.config.clone())
    }

    pub fn openai_with_model(model: impl Into<String>) -> MnemosResult<Arc<dyn Llm>> {
        let config = LlmConfig {
            model: model.into(),
            ..Default::default()
        };
        Self::create(LlmProvider::OpenAI, config)
    }

    pub fn anthropic_with_model(model: impl Into<String>) -> MnemosResult<Arc<dyn Llm>> {
        let config = LlmConfig {
            model: model.into(),
            ..Default::default()
        };
        Self::create(LlmProvider::Anthropic, config)
    }
}
