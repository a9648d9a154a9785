//! Configuration management for regsearch
//!
//! Loaded from TOML, then `REGSEARCH_SECTION__KEY` environment overrides,
//! then an optional named profile, then validated as a whole.

use crate::analysis::{TermAnalyzer, DEFAULT_STOP_WORDS};
use crate::error::{RegsearchError, Result};
use crate::lexical::{Bm25Params, Bm25QualityFilter, TfIdfParams};
use crate::patterns::BoostRuleConfig;
use crate::retrieval::{FusionStrategy, RetrievalMethod};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::time::Duration;

mod validator;

pub use validator::ConfigValidator;

pub const SCHEMA_VERSION: &str = "1.0.0";

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(rename = "_meta")]
    pub meta: MetaConfig,
    pub corpus: CorpusConfig,
    pub artifacts: ArtifactsConfig,
    #[serde(default)]
    pub analysis: AnalysisConfig,
    #[serde(default)]
    pub tfidf: TfIdfParams,
    #[serde(default)]
    pub bm25: Bm25Config,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub fusion: FusionSettings,
    #[serde(default)]
    pub boosting: BoostingConfig,
    #[serde(default)]
    pub profiles: HashMap<String, ProfileOverrides>,
}

/// Metadata about the configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetaConfig {
    pub schema_version: String,
    #[serde(default = "current_timestamp")]
    pub created_at: String,
}

fn current_timestamp() -> String {
    chrono::Utc::now().to_rfc3339()
}

/// Where the ingestion pipeline left the chunk corpus
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorpusConfig {
    pub path: PathBuf,
}

/// Where index artifacts live
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactsConfig {
    pub dir: PathBuf,
}

/// Term analysis shared by both lexical methods
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    pub stop_words: Vec<String>,
    pub ngram_max: usize,
    pub max_token_len: usize,
    /// Query term -> related terms added at query time
    pub expansions: BTreeMap<String, Vec<String>>,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        let expansions = [
            ("monto", &["importe", "soles", "cantidad"][..]),
            ("maximo", &["tope", "limite"][..]),
            ("viaticos", &["viatico", "asignacion"][..]),
            ("pasaje", &["pasajes", "boleto"][..]),
            ("plazo", &["dias", "habiles"][..]),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.iter().map(|s| s.to_string()).collect()))
        .collect();

        Self {
            stop_words: DEFAULT_STOP_WORDS.iter().map(|w| w.to_string()).collect(),
            ngram_max: 2,
            max_token_len: 40,
            expansions,
        }
    }
}

impl AnalysisConfig {
    pub fn analyzer(&self) -> TermAnalyzer {
        TermAnalyzer::new(
            &self.stop_words,
            self.ngram_max,
            self.max_token_len,
            &self.expansions,
        )
    }
}

/// BM25 build constants plus the query-time quality filter
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Bm25Config {
    pub k1: f32,
    pub b: f32,
    pub quality_filter: bool,
    pub min_score_ratio: f32,
    pub drop_single_term_matches: bool,
}

impl Default for Bm25Config {
    fn default() -> Self {
        let params = Bm25Params::default();
        let filter = Bm25QualityFilter::default();
        Self {
            k1: params.k1,
            b: params.b,
            quality_filter: filter.enabled,
            min_score_ratio: filter.min_score_ratio,
            drop_single_term_matches: filter.drop_single_term_matches,
        }
    }
}

impl Bm25Config {
    pub fn params(&self) -> Bm25Params {
        Bm25Params {
            k1: self.k1,
            b: self.b,
        }
    }

    pub fn quality_filter(&self) -> Bm25QualityFilter {
        Bm25QualityFilter {
            enabled: self.quality_filter,
            min_score_ratio: self.min_score_ratio,
            drop_single_term_matches: self.drop_single_term_matches,
        }
    }
}

/// Embedding configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    pub model: String,
    pub batch_size: usize,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            model: crate::embedding::FastEmbedProvider::DEFAULT_MODEL.to_string(),
            batch_size: 32,
        }
    }
}

/// Per-method fan-out limits
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalConfig {
    pub tfidf_top_n: usize,
    pub bm25_top_n: usize,
    pub dense_top_n: usize,
    pub lexical_timeout_ms: u64,
    pub dense_timeout_ms: u64,
    pub default_top_k: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            tfidf_top_n: 30,
            bm25_top_n: 30,
            dense_top_n: 30,
            lexical_timeout_ms: 2_000,
            dense_timeout_ms: 20_000,
            default_top_k: 10,
        }
    }
}

impl RetrievalConfig {
    pub fn top_n(&self, method: RetrievalMethod) -> usize {
        match method {
            RetrievalMethod::LexicalTf => self.tfidf_top_n,
            RetrievalMethod::LexicalProb => self.bm25_top_n,
            RetrievalMethod::Dense => self.dense_top_n,
        }
    }

    pub fn timeout(&self, method: RetrievalMethod) -> Duration {
        match method {
            RetrievalMethod::LexicalTf | RetrievalMethod::LexicalProb => {
                Duration::from_millis(self.lexical_timeout_ms)
            }
            RetrievalMethod::Dense => Duration::from_millis(self.dense_timeout_ms),
        }
    }
}

/// Fusion weights as written in the config file
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WeightsConfig {
    pub lexical_tf: f32,
    pub lexical_prob: f32,
    pub dense: f32,
}

impl Default for WeightsConfig {
    fn default() -> Self {
        Self {
            lexical_tf: 0.3,
            lexical_prob: 0.4,
            dense: 0.3,
        }
    }
}

/// Fusion configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FusionSettings {
    pub strategy: FusionStrategy,
    pub rrf_k: f32,
    pub weights: WeightsConfig,
}

impl Default for FusionSettings {
    fn default() -> Self {
        Self {
            strategy: FusionStrategy::Weighted,
            rrf_k: 60.0,
            weights: WeightsConfig::default(),
        }
    }
}

/// Final-score floor, per strategy since the two scales differ
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoreFloor {
    pub weighted: f32,
    pub rrf: f32,
}

impl Default for ScoreFloor {
    fn default() -> Self {
        Self {
            weighted: 0.05,
            rrf: 0.0,
        }
    }
}

impl ScoreFloor {
    pub fn for_strategy(&self, strategy: FusionStrategy) -> f32 {
        match strategy {
            FusionStrategy::Weighted => self.weighted,
            FusionStrategy::Rrf => self.rrf,
        }
    }
}

/// Post-fusion boosting and pruning
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BoostingConfig {
    /// Rule table file; replaces `rules` when set
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rules_file: Option<PathBuf>,
    pub rules: Vec<BoostRuleConfig>,
    pub min_score: ScoreFloor,
    /// Chunks shorter than this many characters are dropped as fragments
    pub min_content_chars: usize,
}

impl Default for BoostingConfig {
    fn default() -> Self {
        Self {
            rules_file: None,
            rules: BoostRuleConfig::defaults(),
            min_score: ScoreFloor::default(),
            min_content_chars: 20,
        }
    }
}

/// Profile-specific configuration overrides
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProfileOverrides {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fusion_strategy: Option<FusionStrategy>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub weights: Option<WeightsConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub embedding_model: Option<String>,
}

impl Config {
    /// Load configuration from a file
    pub fn load(path: &Path) -> Result<Self> {
        let mut config = Self::read(path)?;
        config.apply_env_overrides();
        ConfigValidator::validate(&config)?;
        Ok(config)
    }

    /// Load configuration with a specific profile applied
    pub fn load_with_profile(path: &Path, profile: &str) -> Result<Self> {
        let mut config = Self::read(path)?;
        config.apply_env_overrides();
        config.apply_profile(profile)?;
        ConfigValidator::validate(&config)?;
        Ok(config)
    }

    fn read(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(RegsearchError::ConfigNotFound {
                path: path.to_path_buf(),
            });
        }

        let content = std::fs::read_to_string(path).map_err(|e| {
            RegsearchError::io(e, format!("Failed to read config file: {:?}", path))
        })?;
        Self::from_toml(&content)
    }

    /// Parse without env overrides or validation
    pub fn from_toml(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Save configuration to a file
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                RegsearchError::io(e, format!("Failed to create config directory: {:?}", parent))
            })?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content).map_err(|e| {
            RegsearchError::io(e, format!("Failed to write config file: {:?}", path))
        })?;
        Ok(())
    }

    /// Apply a profile's overrides to the configuration
    pub fn apply_profile(&mut self, profile: &str) -> Result<()> {
        let overrides = self
            .profiles
            .get(profile)
            .cloned()
            .ok_or_else(|| RegsearchError::InvalidConfigValue {
                path: format!("profiles.{}", profile),
                message: "No such profile".to_string(),
            })?;

        if let Some(strategy) = overrides.fusion_strategy {
            self.fusion.strategy = strategy;
        }
        if let Some(weights) = overrides.weights {
            self.fusion.weights = weights;
        }
        if let Some(model) = overrides.embedding_model {
            self.embedding.model = model;
        }
        tracing::debug!("Applied profile '{}'", profile);
        Ok(())
    }

    /// Apply environment variable overrides
    /// Environment variables in format: REGSEARCH_SECTION__KEY=value
    pub fn apply_env_overrides(&mut self) {
        for (key, value) in std::env::vars() {
            if let Some(config_key) = key.strip_prefix("REGSEARCH_") {
                if let Err(e) = self.set_value_from_env(config_key, &value) {
                    tracing::warn!("Failed to apply env override {}: {}", key, e);
                }
            }
        }
    }

    pub(crate) fn set_value_from_env(&mut self, path: &str, value: &str) -> Result<()> {
        let invalid = |message: String| RegsearchError::InvalidConfigValue {
            path: path.to_string(),
            message,
        };

        match path {
            "CORPUS__PATH" => self.corpus.path = PathBuf::from(value),
            "ARTIFACTS__DIR" => self.artifacts.dir = PathBuf::from(value),
            "EMBEDDING__MODEL" => self.embedding.model = value.to_string(),
            "FUSION__STRATEGY" => self.fusion.strategy = value.parse().map_err(invalid)?,
            "FUSION__RRF_K" => {
                self.fusion.rrf_k = value
                    .parse()
                    .map_err(|_| invalid(format!("Cannot parse '{}' as number", value)))?;
            }
            "RETRIEVAL__DENSE_TIMEOUT_MS" => {
                self.retrieval.dense_timeout_ms = value
                    .parse()
                    .map_err(|_| invalid(format!("Cannot parse '{}' as milliseconds", value)))?;
            }
            "RETRIEVAL__LEXICAL_TIMEOUT_MS" => {
                self.retrieval.lexical_timeout_ms = value
                    .parse()
                    .map_err(|_| invalid(format!("Cannot parse '{}' as milliseconds", value)))?;
            }
            _ => {
                tracing::debug!("Unknown env config key: {}", path);
            }
        }
        Ok(())
    }

    /// Get the default configuration file path
    pub fn default_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir().ok_or_else(|| {
            RegsearchError::Config("Cannot determine config directory".to_string())
        })?;

        Ok(config_dir.join("regsearch").join("config.toml"))
    }

    /// Get the default data directory
    pub fn default_data_dir() -> Result<PathBuf> {
        let home_dir = dirs::home_dir()
            .ok_or_else(|| RegsearchError::Config("Cannot determine home directory".to_string()))?;

        Ok(home_dir.join(".regsearch"))
    }
}

impl Default for Config {
    fn default() -> Self {
        let data_dir = PathBuf::from("~/.regsearch");

        Self {
            meta: MetaConfig {
                schema_version: SCHEMA_VERSION.to_string(),
                created_at: current_timestamp(),
            },
            corpus: CorpusConfig {
                path: data_dir.join("chunks.jsonl"),
            },
            artifacts: ArtifactsConfig {
                dir: data_dir.join("indexes"),
            },
            analysis: AnalysisConfig::default(),
            tfidf: TfIdfParams::default(),
            bm25: Bm25Config::default(),
            embedding: EmbeddingConfig::default(),
            retrieval: RetrievalConfig::default(),
            fusion: FusionSettings::default(),
            boosting: BoostingConfig::default(),
            profiles: HashMap::new(),
        }
    }
}
