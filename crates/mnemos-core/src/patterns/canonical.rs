//! Canonical form and content hash for exact-duplicate detection.

use sha2::{Digest, Sha256};

/// Case-fold, trim, collapse whitespace and drop trailing sentence
/// punctuation.
pub fn normalize(content: &str) -> String {
    let collapsed = content
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase();
    collapsed
        .trim_end_matches(['.', '!', '?', ';', ','])
        .trim_end()
        .to_string()
}

/// SHA-256 of the normalized content, hex encoded.
pub fn canonical_hash(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(normalize(content).as_bytes());
    hex::encode(hasher.finalize())
}
