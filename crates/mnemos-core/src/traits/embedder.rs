//! Text embedding seam used by retrieval and the semantic dedup tier.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{MnemosError, MnemosResult};

/// Why a text is embedded. Asymmetric models encode stored claims and
/// incoming queries differently; symmetric models ignore this.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EmbeddingPurpose {
    /// A pattern about to be written or matched for dedup.
    #[default]
    Store,
    /// A user query looking up working memory.
    Query,
}

#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, text: &str, purpose: Option<EmbeddingPurpose>)
        -> MnemosResult<Vec<f32>>;

    /// Embed several texts, output order matching input order.
    async fn embed_batch(
        &self,
        texts: &[String],
        purpose: Option<EmbeddingPurpose>,
    ) -> MnemosResult<Vec<Vec<f32>>> {
        let mut out = Vec::with_capacity(texts.len());
        for text in texts {
            out.push(self.embed(text, purpose).await?);
        }
        Ok(out)
    }

    /// Vector length every returned embedding has.
    fn dimension(&self) -> usize;

    fn model_name(&self) -> &str;
}

/// Fail unless `embedding` has exactly `expected` components.
///
/// Stored vectors of mixed length would make cosine scans meaningless.
pub fn ensure_dimension(
    model: &str,
    expected: usize,
    embedding: Vec<f32>,
) -> MnemosResult<Vec<f32>> {
    if embedding.len() != expected {
        return Err(MnemosError::embedding(format!(
            "Model {} returned {} dimensions, expected {}",
            model,
            embedding.len(),
            expected
        )));
    }
    Ok(embedding)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbedderConfig {
    pub model: String,
    pub embedding_dims: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
}

impl EmbedderConfig {
    pub fn validate(&self) -> Result<(), &'static str> {
        if self.model.trim().is_empty() {
            return Err("model must not be empty");
        }
        if self.embedding_dims == 0 {
            return Err("embedding_dims must be at least 1");
        }
        Ok(())
    }
}

impl Default for EmbedderConfig {
    fn default() -> Self {
        Self {
            model: "text-embedding-3-small".to_string(),
            embedding_dims: 1536,
            api_key: None,
            base_url: None,
        }
    }
}

/// Embedding backends selectable from configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum EmbedderProvider {
    #[default]
    OpenAI,
}
