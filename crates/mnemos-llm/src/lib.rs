//! mnemos-llm - reasoning-engine backends for mnemos.
//!
//! Both backends speak their provider's native tool-calling protocol and
//! map it onto the provider-neutral [`Llm`] trait from `mnemos-core`.
//!
//! # Supported Providers
//!
//! - **OpenAI** - chat completions, including any OpenAI-compatible endpoint
//!   set through `base_url`
//! - **Anthropic** - messages API
//!
//! # Example
//!
//! ```ignore
//! use mnemos_llm::LlmFactory;
//!
//! let llm = LlmFactory::openai_with_model("gpt-4.1-mini")?;
//! let llm = LlmFactory::anthropic_with_model("claude-sonnet-4-5")?;
//! ```

mod anthropic;
mod factory;
mod http;
mod openai;

pub use anthropic::AnthropicLlm;
pub use factory::LlmFactory;
pub use openai::OpenAILlm;

pub use mnemos_core::config::{LlmProvider, LlmProviderConfig};
pub use mnemos_core::traits::{GenerationOptions, Llm, LlmConfig, LlmResponse, ResponseFormat};
