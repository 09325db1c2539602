//! Maximal Marginal Relevance ordering.
//!
//! Candidate-to-candidate similarity is approximated as the product of each
//! candidate's similarity to the query. Two items that both match the query
//! strongly are treated as likely redundant. Swap [`redundancy`] for a true
//! pairwise measure if embeddings are carried through.

/// The two numbers MMR needs per candidate.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MmrInput {
    /// Ranking relevance, usually similarity weighted by confidence.
    pub relevance: f32,
    /// Raw similarity to the query.
    pub query_similarity: f32,
}

/// Approximate similarity between two candidates.
pub fn redundancy(a: &MmrInput, b: &MmrInput) -> f32 {
    a.query_similarity * b.query_similarity
}

fn marginal_score(candidate: &MmrInput, selected: &[MmrInput], lambda: f32) -> f32 {
    let max_sim = selected
        .iter()
        .map(|s| redundancy(candidate, s))
        .fold(0.0f32, f32::max);
    lambda * candidate.relevance - (1.0 - lambda) * max_sim
}

/// Order every candidate by MMR and return their indices.
///
/// Seeds with the highest-relevance candidate, then repeatedly picks the
/// candidate maximizing `λ·relevance − (1−λ)·max_similarity_to_selected`.
/// Ties keep input order.
pub fn mmr_order(candidates: &[MmrInput], lambda: f32) -> Vec<usize> {
    let mut remaining: Vec<usize> = (0..candidates.len()).collect();
    let mut order = Vec::with_capacity(candidates.len());
    let mut selected: Vec<MmrInput> = Vec::with_capacity(candidates.len());

    while !remaining.is_empty() {
        let mut best_pos = 0;
        let mut best_score = f32::NEG_INFINITY;
        for (pos, &idx) in remaining.iter().enumerate() {
            let score = if selected.is_empty() {
                candidates[idx].relevance
            } else {
                marginal_score(&candidates[idx], &selected, lambda)
            };
            if score > best_score {
                best_score = score;
                best_pos = pos;
            }
        }
        let chosen = remaining.remove(best_pos);
        selected.push(candidates[chosen]);
        order.push(chosen);
    }

    order
}
