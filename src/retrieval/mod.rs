//! Hybrid retrieval: fan-out to three methods, normalize, fuse, boost
//!
//! This module implements the query path. Each [`Retriever`] produces raw
//! [`ScoredCandidate`]s on its own scale; scores are min-max normalized per
//! method and query, fused by weighted sum or Reciprocal Rank Fusion, and
//! finally adjusted by the data-driven boost rules.

mod boost;
mod fusion;
mod generation;
mod hybrid;
mod normalize;
mod response;
mod retriever;

pub use boost::QualityBooster;
pub use fusion::{
    fuse, reciprocal_rank_fusion, weighted_fusion, FusedResult, FusionConfig, FusionError,
    FusionWeights,
};
pub use generation::{IndexBuilder, IndexGeneration, IndexRegistry};
pub use hybrid::{HybridSearcher, SearchSettings};
pub use normalize::{min_max_normalize, NormalizedCandidate};
pub use response::{MethodStatus, ResultItem, SearchResponse};
pub use retriever::{DenseRetriever, MethodRetriever, Retriever, RetrieverError};

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// One of the three independent retrieval methods
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum RetrievalMethod {
    /// TF-IDF cosine similarity
    LexicalTf,
    /// BM25
    LexicalProb,
    /// Embedding nearest neighbours
    Dense,
}

impl RetrievalMethod {
    pub const ALL: [RetrievalMethod; 3] = [
        RetrievalMethod::LexicalTf,
        RetrievalMethod::LexicalProb,
        RetrievalMethod::Dense,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            RetrievalMethod::LexicalTf => "lexical_tf",
            RetrievalMethod::LexicalProb => "lexical_prob",
            RetrievalMethod::Dense => "dense",
        }
    }
}

impl fmt::Display for RetrievalMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RetrievalMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "lexical_tf" | "tfidf" => Ok(RetrievalMethod::LexicalTf),
            "lexical_prob" | "bm25" => Ok(RetrievalMethod::LexicalProb),
            "dense" | "semantic" => Ok(RetrievalMethod::Dense),
            other => Err(format!(
                "unknown retrieval method '{}', expected lexical_tf, lexical_prob or dense",
                other
            )),
        }
    }
}

/// Which methods a request runs
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchMethod {
    #[default]
    Hybrid,
    LexicalTf,
    LexicalProb,
    Dense,
}

impl SearchMethod {
    pub fn methods(&self) -> Vec<RetrievalMethod> {
        match self {
            SearchMethod::Hybrid => RetrievalMethod::ALL.to_vec(),
            SearchMethod::LexicalTf => vec![RetrievalMethod::LexicalTf],
            SearchMethod::LexicalProb => vec![RetrievalMethod::LexicalProb],
            SearchMethod::Dense => vec![RetrievalMethod::Dense],
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SearchMethod::Hybrid => "hybrid",
            SearchMethod::LexicalTf => "lexical_tf",
            SearchMethod::LexicalProb => "lexical_prob",
            SearchMethod::Dense => "dense",
        }
    }
}

impl FromStr for SearchMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "hybrid" => Ok(SearchMethod::Hybrid),
            other => match other.parse::<RetrievalMethod>()? {
                RetrievalMethod::LexicalTf => Ok(SearchMethod::LexicalTf),
                RetrievalMethod::LexicalProb => Ok(SearchMethod::LexicalProb),
                RetrievalMethod::Dense => Ok(SearchMethod::Dense),
            },
        }
    }
}

/// How per-method rankings are merged
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FusionStrategy {
    /// Weighted sum of normalized scores
    #[default]
    Weighted,
    /// Reciprocal Rank Fusion
    Rrf,
}

impl FusionStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            FusionStrategy::Weighted => "weighted",
            FusionStrategy::Rrf => "rrf",
        }
    }
}

impl FromStr for FusionStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "weighted" => Ok(FusionStrategy::Weighted),
            "rrf" => Ok(FusionStrategy::Rrf),
            other => Err(format!(
                "unknown fusion strategy '{}', expected weighted or rrf",
                other
            )),
        }
    }
}

/// A chunk returned by one method with its raw, method-specific score
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredCandidate {
    pub chunk_id: String,
    pub raw_score: f32,
    pub method: RetrievalMethod,
}

impl ScoredCandidate {
    pub fn new(chunk_id: impl Into<String>, raw_score: f32, method: RetrievalMethod) -> Self {
        Self {
            chunk_id: chunk_id.into(),
            raw_score,
            method,
        }
    }
}

/// What one method produced for one query
#[derive(Debug, Clone, PartialEq)]
pub enum MethodOutcome {
    /// Ranked candidates, best first
    Candidates(Vec<ScoredCandidate>),
    /// The query had no term the index knows
    NoMatchableTerms,
    /// The index was built from zero chunks
    EmptyCorpus,
}

impl MethodOutcome {
    pub fn candidates(&self) -> &[ScoredCandidate] {
        match self {
            MethodOutcome::Candidates(c) => c,
            MethodOutcome::NoMatchableTerms | MethodOutcome::EmptyCorpus => &[],
        }
    }
}

/// Search query as received from the API layer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchRequest {
    /// Query text
    pub query: String,

    /// Methods to run
    #[serde(default)]
    pub method: SearchMethod,

    /// Maximum number of results
    #[serde(default = "default_top_k")]
    pub top_k: usize,

    /// Fusion strategy, configured default when absent
    #[serde(default)]
    pub fusion_strategy: Option<FusionStrategy>,
}

fn default_top_k() -> usize {
    10
}

impl SearchRequest {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            method: SearchMethod::Hybrid,
            top_k: default_top_k(),
            fusion_strategy: None,
        }
    }

    pub fn with_method(mut self, method: SearchMethod) -> Self {
        self.method = method;
        self
    }

    pub fn with_top_k(mut self, top_k: usize) -> Self {
        self.top_k = top_k;
        self
    }

    pub fn with_fusion(mut self, strategy: FusionStrategy) -> Self {
        self.fusion_strategy = Some(strategy);
        self
    }
}
