//! Weighted-sum and Reciprocal Rank Fusion of per-method rankings

use super::normalize::{min_max_normalize, NormalizedCandidate};
use super::{FusionStrategy, RetrievalMethod, ScoredCandidate};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use thiserror::Error;

/// Tolerance for the weights-sum-to-one check
pub const WEIGHT_SUM_TOLERANCE: f32 = 1e-6;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum FusionError {
    #[error("Invalid weight configuration: weights must sum to 1.0, got {0}")]
    WeightSum(f32),

    #[error("Invalid weight configuration: {method} weight must be a non-negative number, got {value}")]
    InvalidWeight { method: RetrievalMethod, value: f32 },

    #[error("Invalid RRF constant: {0}")]
    InvalidRrfK(f32),
}

/// Per-method weights for the weighted-sum strategy, validated on construction
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FusionWeights {
    lexical_tf: f32,
    lexical_prob: f32,
    dense: f32,
}

impl FusionWeights {
    pub fn new(lexical_tf: f32, lexical_prob: f32, dense: f32) -> Result<Self, FusionError> {
        let weights = Self {
            lexical_tf,
            lexical_prob,
            dense,
        };

        for method in RetrievalMethod::ALL {
            let value = weights.weight(method);
            if !value.is_finite() || value < 0.0 {
                return Err(FusionError::InvalidWeight { method, value });
            }
        }

        let sum = lexical_tf + lexical_prob + dense;
        if (sum - 1.0).abs() > WEIGHT_SUM_TOLERANCE {
            return Err(FusionError::WeightSum(sum));
        }

        Ok(weights)
    }

    /// All weight on one method
    pub fn single(method: RetrievalMethod) -> Self {
        let mut weights = Self {
            lexical_tf: 0.0,
            lexical_prob: 0.0,
            dense: 0.0,
        };
        match method {
            RetrievalMethod::LexicalTf => weights.lexical_tf = 1.0,
            RetrievalMethod::LexicalProb => weights.lexical_prob = 1.0,
            RetrievalMethod::Dense => weights.dense = 1.0,
        }
        weights
    }

    pub fn weight(&self, method: RetrievalMethod) -> f32 {
        match method {
            RetrievalMethod::LexicalTf => self.lexical_tf,
            RetrievalMethod::LexicalProb => self.lexical_prob,
            RetrievalMethod::Dense => self.dense,
        }
    }
}

impl Default for FusionWeights {
    fn default() -> Self {
        Self {
            lexical_tf: 0.3,
            lexical_prob: 0.4,
            dense: 0.3,
        }
    }
}

/// Configuration for fusion algorithm
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FusionConfig {
    pub strategy: FusionStrategy,
    /// RRF K constant (typically 60)
    pub rrf_k: f32,
    pub weights: FusionWeights,
}

impl FusionConfig {
    pub fn new(
        strategy: FusionStrategy,
        rrf_k: f32,
        weights: FusionWeights,
    ) -> Result<Self, FusionError> {
        if !rrf_k.is_finite() || rrf_k < 0.0 {
            return Err(FusionError::InvalidRrfK(rrf_k));
        }
        Ok(Self {
            strategy,
            rrf_k,
            weights,
        })
    }

    pub fn with_strategy(mut self, strategy: FusionStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn with_weights(mut self, weights: FusionWeights) -> Self {
        self.weights = weights;
        self
    }
}

impl Default for FusionConfig {
    fn default() -> Self {
        Self {
            strategy: FusionStrategy::Weighted,
            rrf_k: 60.0,
            weights: FusionWeights::default(),
        }
    }
}

/// One chunk after fusion, and after boosting once the booster has run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FusedResult {
    pub chunk_id: String,
    /// Unboosted fused score
    pub fused_score: f32,
    pub contributing_methods: BTreeSet<RetrievalMethod>,
    /// Product of the multipliers of every boost rule that fired
    pub boost_applied: f32,
    pub boost_rules: Vec<String>,
    /// Ranking score: `fused_score * boost_applied`
    pub score: f32,
}

impl FusedResult {
    fn new(chunk_id: String, fused_score: f32, contributing_methods: BTreeSet<RetrievalMethod>) -> Self {
        Self {
            chunk_id,
            fused_score,
            contributing_methods,
            boost_applied: 1.0,
            boost_rules: Vec::new(),
            score: fused_score,
        }
    }
}

/// Descending by score, chunk id ascending on ties
pub(crate) fn sort_results(results: &mut [FusedResult]) {
    results.sort_by(|a, b| {
        b.score
            .total_cmp(&a.score)
            .then_with(|| a.chunk_id.cmp(&b.chunk_id))
    });
}

#[derive(Default)]
struct Accumulator {
    score: f32,
    methods: BTreeSet<RetrievalMethod>,
}

fn collect(accumulated: BTreeMap<&str, Accumulator>) -> Vec<FusedResult> {
    let mut results: Vec<FusedResult> = accumulated
        .into_iter()
        .map(|(id, acc)| FusedResult::new(id.to_string(), acc.score, acc.methods))
        .collect();
    sort_results(&mut results);
    results
}

/// `fused = Σ weight(method) * normalized_score`; a method that did not
/// retrieve a chunk contributes 0 for it
pub fn weighted_fusion(
    lists: &[Vec<NormalizedCandidate>],
    weights: &FusionWeights,
) -> Vec<FusedResult> {
    let mut accumulated: BTreeMap<&str, Accumulator> = BTreeMap::new();

    for list in lists {
        for candidate in list {
            let acc = accumulated.entry(candidate.chunk_id.as_str()).or_default();
            acc.score += weights.weight(candidate.method) * candidate.normalized_score;
            acc.methods.insert(candidate.method);
        }
    }

    collect(accumulated)
}

/// `fused = Σ 1 / (k + rank)` with 1-based rank inside each method's list
pub fn reciprocal_rank_fusion(lists: &[Vec<ScoredCandidate>], rrf_k: f32) -> Vec<FusedResult> {
    let mut accumulated: BTreeMap<&str, Accumulator> = BTreeMap::new();

    for list in lists {
        for (rank, candidate) in list.iter().enumerate() {
            let acc = accumulated.entry(candidate.chunk_id.as_str()).or_default();
            acc.score += 1.0 / (rrf_k + rank as f32 + 1.0);
            acc.methods.insert(candidate.method);
        }
    }

    collect(accumulated)
}

/// Normalize each method's ranking and merge with the configured strategy.
/// The merge set is the union of all lists.
pub fn fuse(
    per_method: &BTreeMap<RetrievalMethod, Vec<ScoredCandidate>>,
    config: &FusionConfig,
) -> Vec<FusedResult> {
    match config.strategy {
        FusionStrategy::Weighted => {
            let normalized: Vec<Vec<NormalizedCandidate>> = per_method
                .values()
                .map(|candidates| min_max_normalize(candidates))
                .collect();
            weighted_fusion(&normalized, &config.weights)
        }
        FusionStrategy::Rrf => {
            let lists: Vec<Vec<ScoredCandidate>> = per_method.values().cloned().collect();
            reciprocal_rank_fusion(&lists, config.rrf_k)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ranked(method: RetrievalMethod, entries: &[(&str, f32)]) -> Vec<ScoredCandidate> {
        entries
            .iter()
            .map(|(id, s)| ScoredCandidate::new(*id, *s, method))
            .collect()
    }

    fn per_method() -> BTreeMap<RetrievalMethod, Vec<ScoredCandidate>> {
        let mut map = BTreeMap::new();
        map.insert(
            RetrievalMethod::LexicalTf,
            ranked(RetrievalMethod::LexicalTf, &[("a", 0.9), ("b", 0.5), ("c", 0.1)]),
        );
        map.insert(
            RetrievalMethod::LexicalProb,
            ranked(RetrievalMethod::LexicalProb, &[("b", 8.0), ("a", 4.0)]),
        );
        map.insert(
            RetrievalMethod::Dense,
            ranked(RetrievalMethod::Dense, &[("d", 0.8), ("b", 0.6)]),
        );
        map
    }

    #[test]
    fn test_weight_validation() {
        assert!(FusionWeights::new(0.3, 0.4, 0.3).is_ok());
        assert!(FusionWeights::new(0.5, 0.5, 0.0).is_ok());
        assert!(matches!(
            FusionWeights::new(0.5, 0.4, 0.3),
            Err(FusionError::WeightSum(_))
        ));
        assert!(matches!(
            FusionWeights::new(1.2, -0.2, 0.0),
            Err(FusionError::InvalidWeight {
                method: RetrievalMethod::LexicalProb,
                ..
            })
        ));
        assert!(FusionWeights::new(f32::NAN, 0.5, 0.5).is_err());
        assert!(FusionConfig::new(FusionStrategy::Rrf, -1.0, FusionWeights::default()).is_err());
    }

    #[test]
    fn test_weighted_union_and_contributors() {
        let config = FusionConfig::default();
        let fused = fuse(&per_method(), &config);

        let ids: Vec<&str> = fused.iter().map(|r| r.chunk_id.as_str()).collect();
        assert_eq!(ids.len(), 4);
        assert_eq!(ids[0], "b");

        let b = &fused[0];
        assert_eq!(b.contributing_methods.len(), 3);
        // tf: (0.5-0.1)/0.8 = 0.5, prob: 1.0, dense: 0.0
        assert!((b.fused_score - (0.3 * 0.5 + 0.4 * 1.0)).abs() < 1e-6);
        assert_eq!(b.score, b.fused_score);
        assert_eq!(b.boost_applied, 1.0);

        let d = fused.iter().find(|r| r.chunk_id == "d").unwrap();
        assert_eq!(
            d.contributing_methods,
            BTreeSet::from([RetrievalMethod::Dense])
        );
    }

    #[test]
    fn test_rrf_uses_one_based_rank() {
        let config = FusionConfig::default().with_strategy(FusionStrategy::Rrf);
        let fused = fuse(&per_method(), &config);

        let b = fused.iter().find(|r| r.chunk_id == "b").unwrap();
        let expected = 1.0 / 62.0 + 1.0 / 61.0 + 1.0 / 62.0;
        assert!((b.fused_score - expected).abs() < 1e-7);
        assert_eq!(fused[0].chunk_id, "b");

        let c = fused.iter().find(|r| r.chunk_id == "c").unwrap();
        assert!((c.fused_score - 1.0 / 63.0).abs() < 1e-7);
    }

    #[test]
    fn test_ties_break_by_chunk_id() {
        let mut map = BTreeMap::new();
        map.insert(
            RetrievalMethod::LexicalTf,
            ranked(RetrievalMethod::LexicalTf, &[("z", 0.5), ("m", 0.5), ("a", 0.5)]),
        );
        let fused = fuse(&map, &FusionConfig::default());
        let ids: Vec<&str> = fused.iter().map(|r| r.chunk_id.as_str()).collect();
        assert_eq!(ids, vec!["a", "m", "z"]);
    }

    #[test]
    fn test_increasing_weight_never_demotes_exclusive_chunk() {
        let mut map = BTreeMap::new();
        map.insert(
            RetrievalMethod::LexicalTf,
            ranked(RetrievalMethod::LexicalTf, &[("tf_only", 0.9), ("shared", 0.8)]),
        );
        map.insert(
            RetrievalMethod::Dense,
            ranked(RetrievalMethod::Dense, &[("shared", 0.7), ("dense_only", 0.65), ("tail", 0.1)]),
        );

        let mut previous_score = f32::NEG_INFINITY;
        let mut was_ahead = false;
        for step in 0..=10 {
            let dense = step as f32 / 10.0;
            let weights = FusionWeights::new(1.0 - dense, 0.0, dense).unwrap();
            let fused = fuse(&map, &FusionConfig::default().with_weights(weights));

            let position = |id: &str| fused.iter().position(|r| r.chunk_id == id).unwrap();
            let score = fused[position("dense_only")].fused_score;
            assert!(score >= previous_score, "score fell at dense weight {}", dense);

            let ahead = position("dense_only") < position("tf_only");
            assert!(!was_ahead || ahead, "rank fell at dense weight {}", dense);

            previous_score = score;
            was_ahead = ahead;
        }
        assert!(was_ahead);
    }

    #[test]
    fn test_single_method_weight() {
        let weights = FusionWeights::single(RetrievalMethod::Dense);
        assert_eq!(weights.weight(RetrievalMethod::Dense), 1.0);
        assert_eq!(weights.weight(RetrievalMethod::LexicalTf), 0.0);
    }
}
