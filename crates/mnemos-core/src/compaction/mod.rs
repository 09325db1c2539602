//! Compaction engine: turns buffered conversation into durable patterns.

mod config;
mod engine;
mod json_parser;
mod prompts;
mod scheduler;

pub use config::{
    CompactionConfig, COMPACTION_LOCK_KEY, DEFAULT_IMPLICIT_SIGNAL_FACTOR,
    DEFAULT_NUMERIC_CONFLICT_EPSILON,
};
pub use engine::{
    CompactionEngine, CompactionOutcome, CompactionReport, CompactionTrigger, COMPACTION_SOURCE,
};
pub use json_parser::{
    extract_json, parse_extraction, Contradiction, ExtractedPattern, Extraction, Reinforcement,
    Supersession,
};
pub use prompts::{build_extraction_message, extraction_system_prompt};
pub use scheduler::{sweep, CompactionScheduler, SweepResult};
