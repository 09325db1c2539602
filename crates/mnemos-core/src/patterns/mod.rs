//! Pattern canonicalization, numeric facts and tiered deduplication.

mod canonical;
mod dedup;
mod numeric;

pub use canonical::{canonical_hash, normalize};
pub use dedup::{DedupSettings, PatternWriter, Provenance, UpsertOutcome};
pub use numeric::{extract_numeric_facts, numeric_conflict, NumericFact, QuantityKind};
