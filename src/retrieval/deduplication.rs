//! Candidate deduplication by passage text

use crate::retrieval::Candidate;
use ahash::AHashSet;

/// Drop candidates whose text was already seen, keeping first-seen order
///
/// # Arguments
/// * `candidates` - Candidates in descending-similarity order
///
/// # Returns
/// Textually distinct candidates, still in similarity order
pub fn deduplicate_candidates(candidates: Vec<Candidate>) -> Vec<Candidate> {
    let mut seen: AHashSet<String> = AHashSet::with_capacity(candidates.len());

    candidates
        .into_iter()
        .filter(|candidate| seen.insert(candidate.text.clone()))
        .collect()
}
