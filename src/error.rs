use crate::retrieval::RetrievalMethod;
use std::path::PathBuf;
use thiserror::Error;

/// Main error type for regsearch
#[derive(Error, Debug)]
pub enum RegsearchError {
    /// Configuration related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Configuration validation errors
    #[error("Configuration validation failed: {errors:?}")]
    ConfigValidation { errors: Vec<ValidationError> },

    /// Configuration file not found
    #[error("Configuration file not found: {path}")]
    ConfigNotFound { path: PathBuf },

    /// Invalid configuration value
    #[error("Invalid configuration value at {path}: {message}")]
    InvalidConfigValue { path: String, message: String },

    /// Chunk corpus could not be loaded or is malformed
    #[error("Corpus error: {0}")]
    Corpus(String),

    /// Index artifact missing for a method
    #[error("Index artifact for {method} not found: {path}")]
    ArtifactNotFound {
        method: RetrievalMethod,
        path: PathBuf,
    },

    /// Index artifact unreadable, wrong version or wrong method
    #[error("Invalid index artifact {path}: {message}")]
    ArtifactFormat { path: PathBuf, message: String },

    /// Index was built from a different corpus than the one loaded
    #[error("Corpus fingerprint mismatch for {method}: index built for {found}, corpus is {expected}")]
    FingerprintMismatch {
        method: RetrievalMethod,
        expected: String,
        found: String,
    },

    /// Every requested retrieval method failed for a query
    #[error("All retrieval methods unavailable: {failures:?}")]
    RetrievalUnavailable { failures: Vec<MethodFailure> },

    /// Query rejected before dispatch
    #[error("Invalid query: {0}")]
    InvalidQuery(String),

    /// IO errors
    #[error("IO error: {context}: {source}")]
    Io {
        source: std::io::Error,
        context: String,
    },

    /// TOML deserialization errors
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    /// TOML serialization errors
    #[error("TOML serialization error: {0}")]
    TomlSerialization(#[from] toml::ser::Error),

    /// JSON errors
    #[error("JSON error: {context}: {source}")]
    Json {
        source: serde_json::Error,
        context: String,
    },

    /// Generic errors
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl RegsearchError {
    /// Whether this error is fatal at startup (bad config, missing or mismatched artifacts)
    pub fn is_configuration_error(&self) -> bool {
        matches!(
            self,
            RegsearchError::Config(_)
                | RegsearchError::ConfigValidation { .. }
                | RegsearchError::ConfigNotFound { .. }
                | RegsearchError::InvalidConfigValue { .. }
                | RegsearchError::ArtifactNotFound { .. }
                | RegsearchError::ArtifactFormat { .. }
                | RegsearchError::FingerprintMismatch { .. }
        )
    }

    pub fn io(source: std::io::Error, context: impl Into<String>) -> Self {
        RegsearchError::Io {
            source,
            context: context.into(),
        }
    }

    pub fn json(source: serde_json::Error, context: impl Into<String>) -> Self {
        RegsearchError::Json {
            source,
            context: context.into(),
        }
    }
}

/// Configuration validation error
#[derive(Debug, Clone)]
pub struct ValidationError {
    /// Path to the configuration key that failed validation
    pub path: String,
    /// Error message describing the validation failure
    pub message: String,
}

impl ValidationError {
    pub fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
        }
    }
}

/// A retrieval method that could not contribute to a query, and why
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodFailure {
    pub method: RetrievalMethod,
    pub reason: String,
}

/// Result type for regsearch operations
pub type Result<T> = std::result::Result<T, RegsearchError>;
