//! Per-method, per-query min-max score normalization

use super::{RetrievalMethod, ScoredCandidate};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedCandidate {
    pub chunk_id: String,
    /// In [0, 1]
    pub normalized_score: f32,
    pub method: RetrievalMethod,
}

/// Rescale one method's candidates to [0, 1] using only the scores in
/// `candidates`. The best candidate maps to 1.0; when every raw score is
/// equal all of them map to 1.0. Order is preserved.
pub fn min_max_normalize(candidates: &[ScoredCandidate]) -> Vec<NormalizedCandidate> {
    let (min, max) = candidates.iter().fold(
        (f32::INFINITY, f32::NEG_INFINITY),
        |(lo, hi), c| (lo.min(c.raw_score), hi.max(c.raw_score)),
    );
    let range = max - min;

    candidates
        .iter()
        .map(|c| {
            let normalized_score = if range > f32::EPSILON {
                ((c.raw_score - min) / range).clamp(0.0, 1.0)
            } else {
                1.0
            };
            NormalizedCandidate {
                chunk_id: c.chunk_id.clone(),
                normalized_score,
                method: c.method,
            }
        })
        .collect()
}
