//! Core traits for mnemos collaborators.

mod collaborators;
mod embedder;
mod llm;
mod lock;
mod pattern_store;
mod tool;
mod turn_store;

pub use collaborators::*;
pub use embedder::*;
pub use llm::*;
pub use lock::*;
pub use pattern_store::*;
pub use tool::*;
pub use turn_store::*;
