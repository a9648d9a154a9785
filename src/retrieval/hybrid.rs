//! Hybrid search: fan out to the requested methods, fuse, boost

use super::boost::QualityBooster;
use super::fusion::{fuse, FusionConfig, FusionWeights};
use super::generation::{IndexGeneration, IndexRegistry};
use super::response::{MethodStatus, ResultItem, SearchResponse};
use super::retriever::{Retriever, RetrieverError};
use super::{MethodOutcome, RetrievalMethod, ScoredCandidate, SearchRequest};
use crate::config::{Config, RetrievalConfig};
use crate::error::{MethodFailure, RegsearchError, Result};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

/// Query-time settings, validated once at startup
#[derive(Debug, Clone)]
pub struct SearchSettings {
    pub retrieval: RetrievalConfig,
    pub fusion: FusionConfig,
}

impl SearchSettings {
    pub fn new(retrieval: RetrievalConfig, fusion: FusionConfig) -> Self {
        Self { retrieval, fusion }
    }

    pub fn from_config(config: &Config) -> Result<Self> {
        let w = &config.fusion.weights;
        let weights = FusionWeights::new(w.lexical_tf, w.lexical_prob, w.dense).map_err(|e| {
            RegsearchError::InvalidConfigValue {
                path: "fusion.weights".to_string(),
                message: e.to_string(),
            }
        })?;
        let fusion = FusionConfig::new(config.fusion.strategy, config.fusion.rrf_k, weights)
            .map_err(|e| RegsearchError::InvalidConfigValue {
                path: "fusion.rrf_k".to_string(),
                message: e.to_string(),
            })?;

        Ok(Self::new(config.retrieval.clone(), fusion))
    }
}

/// Hybrid searcher over the registry's current generation
pub struct HybridSearcher {
    registry: Arc<IndexRegistry>,
    booster: QualityBooster,
    settings: SearchSettings,
}

impl HybridSearcher {
    pub fn new(registry: Arc<IndexRegistry>, booster: QualityBooster, settings: SearchSettings) -> Self {
        Self {
            registry,
            booster,
            settings,
        }
    }

    pub fn registry(&self) -> &Arc<IndexRegistry> {
        &self.registry
    }

    /// Run one query
    ///
    /// Method failures and timeouts are reported in `method_statuses`; only
    /// when every requested method fails does the query itself fail.
    pub async fn search(&self, request: &SearchRequest) -> Result<SearchResponse> {
        let started = Instant::now();

        let query = request.query.trim();
        if query.is_empty() {
            return Err(RegsearchError::InvalidQuery(
                "Query text cannot be empty".to_string(),
            ));
        }
        if request.top_k == 0 {
            return Err(RegsearchError::InvalidQuery(
                "top_k must be greater than 0".to_string(),
            ));
        }

        // Pinned for the whole query; a concurrent publish does not affect it
        let generation = self.registry.current().await;
        let methods = request.method.methods();

        let outcomes = self.fan_out(&generation, query, &methods).await;

        let mut per_method: BTreeMap<RetrievalMethod, Vec<ScoredCandidate>> = BTreeMap::new();
        let mut method_statuses = BTreeMap::new();
        let mut failures = Vec::new();

        for (method, outcome) in outcomes {
            let status = match outcome {
                Ok(MethodOutcome::Candidates(candidates)) if !candidates.is_empty() => {
                    let status = MethodStatus::Ok {
                        candidates: candidates.len(),
                    };
                    per_method.insert(method, candidates);
                    status
                }
                Ok(MethodOutcome::Candidates(_)) | Ok(MethodOutcome::NoMatchableTerms) => {
                    MethodStatus::NoMatchableTerms
                }
                Ok(MethodOutcome::EmptyCorpus) => MethodStatus::EmptyCorpus,
                Err(RetrieverError::TimedOut(after)) => {
                    tracing::warn!("{} timed out after {:?}, continuing without it", method, after);
                    failures.push(MethodFailure {
                        method,
                        reason: format!("timed out after {:?}", after),
                    });
                    MethodStatus::TimedOut {
                        after_ms: after.as_millis() as u64,
                    }
                }
                Err(e) => {
                    tracing::warn!("{} unavailable: {}", method, e);
                    failures.push(MethodFailure {
                        method,
                        reason: e.to_string(),
                    });
                    MethodStatus::Unavailable {
                        reason: e.to_string(),
                    }
                }
            };
            tracing::debug!("{}: {}", method, status);
            method_statuses.insert(method, status);
        }

        if failures.len() == methods.len() {
            return Err(RegsearchError::RetrievalUnavailable { failures });
        }

        let fusion = self.fusion_config(request, &methods);
        let fused = fuse(&per_method, &fusion);
        let mut boosted = self
            .booster
            .apply(query, fused, fusion.strategy, generation.corpus());
        boosted.truncate(request.top_k);

        let corpus = generation.corpus();
        let results: Vec<ResultItem> = boosted
            .into_iter()
            .filter_map(|result| {
                let chunk = corpus.get(&result.chunk_id)?;
                Some(ResultItem {
                    content: chunk.text.clone(),
                    metadata: chunk.metadata.clone(),
                    chunk_id: result.chunk_id,
                    score: result.score,
                    contributing_methods: result.contributing_methods,
                    boost_factor: result.boost_applied,
                    boost_rules: result.boost_rules,
                })
            })
            .collect();

        let methods_used: Vec<RetrievalMethod> = per_method.keys().copied().collect();

        tracing::debug!(
            "Query answered with {} results from {:?} in {:?}",
            results.len(),
            methods_used,
            started.elapsed()
        );

        Ok(SearchResponse {
            query: request.query.clone(),
            method: request.method.as_str().to_string(),
            total_results: results.len(),
            results,
            processing_time_seconds: started.elapsed().as_secs_f64(),
            fusion_strategy: fusion.strategy,
            methods_used,
            method_statuses,
        })
    }

    /// A single-method request puts all weight on that method; hybrid
    /// requests use the configured weights unchanged
    fn fusion_config(&self, request: &SearchRequest, methods: &[RetrievalMethod]) -> FusionConfig {
        let mut fusion = self.settings.fusion;
        if let Some(strategy) = request.fusion_strategy {
            fusion = fusion.with_strategy(strategy);
        }
        if let [only] = methods {
            fusion = fusion.with_weights(FusionWeights::single(*only));
        }
        fusion
    }

    /// Query every method in parallel, each on a blocking thread under its
    /// own timeout. A timed-out method is abandoned, not awaited.
    async fn fan_out(
        &self,
        generation: &IndexGeneration,
        query: &str,
        methods: &[RetrievalMethod],
    ) -> Vec<(RetrievalMethod, std::result::Result<MethodOutcome, RetrieverError>)> {
        let handles: Vec<_> = methods
            .iter()
            .map(|&method| {
                let retriever = generation.retriever(method).cloned();
                let text = query.to_string();
                let top_n = self.settings.retrieval.top_n(method);
                let limit = self.settings.retrieval.timeout(method);

                let handle = tokio::spawn(async move {
                    let Some(retriever) = retriever else {
                        return Err(RetrieverError::TaskFailed(format!(
                            "no {} retriever loaded",
                            method
                        )));
                    };
                    let task =
                        tokio::task::spawn_blocking(move || retriever.query(&text, top_n));
                    match tokio::time::timeout(limit, task).await {
                        Ok(Ok(outcome)) => outcome,
                        Ok(Err(e)) => Err(RetrieverError::TaskFailed(e.to_string())),
                        Err(_) => Err(RetrieverError::TimedOut(limit)),
                    }
                });
                (method, handle)
            })
            .collect();

        let mut outcomes = Vec::with_capacity(handles.len());
        for (method, handle) in handles {
            let outcome = handle
                .await
                .unwrap_or_else(|e| Err(RetrieverError::TaskFailed(e.to_string())));
            outcomes.push((method, outcome));
        }
        outcomes
    }
}
