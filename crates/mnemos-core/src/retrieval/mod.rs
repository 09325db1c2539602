//! Retrieval and MMR reranking of patterns into a working set.

mod config;
mod engine;
mod mmr;
mod prefilter;
mod similarity;

pub use config::RetrievalConfig;
pub use engine::{RankedPattern, RetrievalOutcome, Retriever, DEGRADED_NOTICE};
pub use mmr::{mmr_order, redundancy, MmrInput};
pub use prefilter::{should_skip, SkipReason};
pub use similarity::cosine_similarity;
