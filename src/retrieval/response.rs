//! Response types returned to the API layer

use super::{FusionStrategy, RetrievalMethod};
use crate::corpus::ChunkMetadata;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// What happened to one requested method for one query
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum MethodStatus {
    /// Returned this many candidates
    Ok { candidates: usize },
    NoMatchableTerms,
    EmptyCorpus,
    TimedOut { after_ms: u64 },
    Unavailable { reason: String },
}

impl MethodStatus {
    /// Timed out or unavailable
    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            MethodStatus::TimedOut { .. } | MethodStatus::Unavailable { .. }
        )
    }
}

impl fmt::Display for MethodStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MethodStatus::Ok { candidates } => write!(f, "ok({})", candidates),
            MethodStatus::NoMatchableTerms => f.write_str("no_matchable_terms"),
            MethodStatus::EmptyCorpus => f.write_str("empty_corpus"),
            MethodStatus::TimedOut { after_ms } => write!(f, "timed_out({}ms)", after_ms),
            MethodStatus::Unavailable { reason } => write!(f, "unavailable({})", reason),
        }
    }
}

/// One ranked passage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultItem {
    pub chunk_id: String,
    pub content: String,
    /// Final ranking score (fused score times boost factor)
    pub score: f32,
    pub metadata: ChunkMetadata,
    pub contributing_methods: BTreeSet<RetrievalMethod>,
    pub boost_factor: f32,
    /// Names of the boost rules that fired
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub boost_rules: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResponse {
    pub query: String,
    pub method: String,
    pub results: Vec<ResultItem>,
    pub total_results: usize,
    pub processing_time_seconds: f64,
    pub fusion_strategy: FusionStrategy,
    /// Methods that produced at least one candidate
    pub methods_used: Vec<RetrievalMethod>,
    pub method_statuses: BTreeMap<RetrievalMethod, MethodStatus>,
}
