use crate::config::{Config, SCHEMA_VERSION};
use crate::error::{RegsearchError, Result, ValidationError};
use crate::patterns::BoostRuleSet;
use crate::retrieval::{FusionConfig, FusionWeights, RetrievalMethod};

/// Configuration validator
///
/// Collects every problem before failing, so one run reports them all.
pub struct ConfigValidator;

impl ConfigValidator {
    /// Validate the configuration
    pub fn validate(config: &Config) -> Result<()> {
        let mut errors = Vec::new();

        Self::validate_schema_version(config, &mut errors);
        Self::validate_paths(config, &mut errors);
        Self::validate_analysis(config, &mut errors);
        Self::validate_lexical(config, &mut errors);
        Self::validate_embedding(config, &mut errors);
        Self::validate_retrieval(config, &mut errors);
        Self::validate_fusion(config, &mut errors);
        Self::validate_boosting(config, &mut errors);

        if errors.is_empty() {
            Ok(())
        } else {
            Err(RegsearchError::ConfigValidation { errors })
        }
    }

    fn validate_schema_version(config: &Config, errors: &mut Vec<ValidationError>) {
        let version = &config.meta.schema_version;
        if version != SCHEMA_VERSION {
            errors.push(ValidationError::new(
                "_meta.schema_version",
                format!("Unsupported schema version: {}", version),
            ));
        }
    }

    fn validate_paths(config: &Config, errors: &mut Vec<ValidationError>) {
        // Existence is checked when the corpus and artifacts are opened
        if config.corpus.path.as_os_str().is_empty() {
            errors.push(ValidationError::new(
                "corpus.path",
                "Corpus path cannot be empty",
            ));
        }
        if config.artifacts.dir.as_os_str().is_empty() {
            errors.push(ValidationError::new(
                "artifacts.dir",
                "Artifacts directory cannot be empty",
            ));
        }
    }

    fn validate_analysis(config: &Config, errors: &mut Vec<ValidationError>) {
        let ngram_max = config.analysis.ngram_max;
        if !(1..=2).contains(&ngram_max) {
            errors.push(ValidationError::new(
                "analysis.ngram_max",
                format!("N-gram window must be 1 or 2, got {}", ngram_max),
            ));
        }
        if config.analysis.max_token_len == 0 {
            errors.push(ValidationError::new(
                "analysis.max_token_len",
                "Maximum token length must be greater than 0",
            ));
        }
    }

    fn validate_lexical(config: &Config, errors: &mut Vec<ValidationError>) {
        let tfidf = &config.tfidf;
        if tfidf.min_df == 0 {
            errors.push(ValidationError::new(
                "tfidf.min_df",
                "min_df must be at least 1",
            ));
        }
        if !(tfidf.max_df_ratio > 0.0 && tfidf.max_df_ratio <= 1.0) {
            errors.push(ValidationError::new(
                "tfidf.max_df_ratio",
                format!("max_df_ratio must be in (0, 1], got {}", tfidf.max_df_ratio),
            ));
        }

        let bm25 = &config.bm25;
        if !(bm25.k1.is_finite() && bm25.k1 >= 0.0) {
            errors.push(ValidationError::new(
                "bm25.k1",
                format!("k1 must be non-negative, got {}", bm25.k1),
            ));
        }
        if !(0.0..=1.0).contains(&bm25.b) {
            errors.push(ValidationError::new(
                "bm25.b",
                format!("b must be between 0.0 and 1.0, got {}", bm25.b),
            ));
        }
        if !(0.0..=1.0).contains(&bm25.min_score_ratio) {
            errors.push(ValidationError::new(
                "bm25.min_score_ratio",
                format!(
                    "min_score_ratio must be between 0.0 and 1.0, got {}",
                    bm25.min_score_ratio
                ),
            ));
        }
    }

    fn validate_embedding(config: &Config, errors: &mut Vec<ValidationError>) {
        if config.embedding.batch_size == 0 {
            errors.push(ValidationError::new(
                "embedding.batch_size",
                "Batch size must be greater than 0",
            ));
        }

        if config.embedding.model.is_empty() {
            errors.push(ValidationError::new(
                "embedding.model",
                "Model name cannot be empty",
            ));
        }
    }

    fn validate_retrieval(config: &Config, errors: &mut Vec<ValidationError>) {
        let retrieval = &config.retrieval;

        for method in RetrievalMethod::ALL {
            if retrieval.top_n(method) == 0 {
                errors.push(ValidationError::new(
                    format!("retrieval.{}_top_n", top_n_key(method)),
                    "Per-method top_n must be greater than 0",
                ));
            }
        }

        if retrieval.lexical_timeout_ms == 0 {
            errors.push(ValidationError::new(
                "retrieval.lexical_timeout_ms",
                "Timeout must be greater than 0",
            ));
        }
        if retrieval.dense_timeout_ms < retrieval.lexical_timeout_ms {
            errors.push(ValidationError::new(
                "retrieval.dense_timeout_ms",
                format!(
                    "Dense timeout ({}ms) must not be shorter than the lexical timeout ({}ms)",
                    retrieval.dense_timeout_ms, retrieval.lexical_timeout_ms
                ),
            ));
        }
        if retrieval.default_top_k == 0 {
            errors.push(ValidationError::new(
                "retrieval.default_top_k",
                "default_top_k must be greater than 0",
            ));
        }
    }

    fn validate_fusion(config: &Config, errors: &mut Vec<ValidationError>) {
        let w = &config.fusion.weights;
        match FusionWeights::new(w.lexical_tf, w.lexical_prob, w.dense) {
            Ok(weights) => {
                if let Err(e) =
                    FusionConfig::new(config.fusion.strategy, config.fusion.rrf_k, weights)
                {
                    errors.push(ValidationError::new("fusion.rrf_k", e.to_string()));
                }
            }
            Err(e) => errors.push(ValidationError::new("fusion.weights", e.to_string())),
        }

        for (name, profile) in &config.profiles {
            if let Some(w) = &profile.weights {
                if let Err(e) = FusionWeights::new(w.lexical_tf, w.lexical_prob, w.dense) {
                    errors.push(ValidationError::new(
                        format!("profiles.{}.weights", name),
                        e.to_string(),
                    ));
                }
            }
        }
    }

    fn validate_boosting(config: &Config, errors: &mut Vec<ValidationError>) {
        // A rules file is compiled when the searcher starts; inline rules here
        if config.boosting.rules_file.is_none() {
            if let Err(e) = BoostRuleSet::from_configs(&config.boosting.rules) {
                errors.push(ValidationError::new("boosting.rules", e.to_string()));
            }
        }

        let floor = &config.boosting.min_score;
        if floor.weighted < 0.0 || floor.rrf < 0.0 {
            errors.push(ValidationError::new(
                "boosting.min_score",
                "Score floors cannot be negative",
            ));
        }
    }
}

fn top_n_key(method: RetrievalMethod) -> &'static str {
    match method {
        RetrievalMethod::LexicalTf => "tfidf",
        RetrievalMethod::LexicalProb => "bm25",
        RetrievalMethod::Dense => "dense",
    }
}
