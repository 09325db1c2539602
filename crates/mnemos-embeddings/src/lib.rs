//! mnemos-embeddings - embedding backends for mnemos.
//!
//! # Example
//!
//! ```ignore
//! use mnemos_embeddings::EmbedderFactory;
//!
//! let embedder = EmbedderFactory::openai_with_model("text-embedding-3-large", 3072)?;
//! ```

mod factory;
mod openai;

pub use factory::EmbedderFactory;
pub use openai::OpenAIEmbedder;

pub use mnemos_core::traits::{Embedder, EmbedderConfig, EmbedderProvider, EmbeddingPurpose};
