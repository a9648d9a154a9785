/// Embedding model capability and the FastEmbed backend
use fastembed::{EmbeddingModel, InitOptions, TextEmbedding};
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EmbeddingError {
    #[error("Embedding model could not be loaded: {0}")]
    InitializationError(String),

    #[error("Embedding failed: {0}")]
    GenerationError(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
}

/// Sentence embedding model seen as a black box `text -> vector`
///
/// FastEmbed in production; the tests plug in deterministic doubles.
pub trait EmbeddingProvider: Send + Sync {
    fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError>;

    /// One vector per input text, in input order
    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError>;

    /// Length of every vector this provider returns
    fn dimension(&self) -> usize;

    fn model_name(&self) -> &str;
}

/// Model names accepted in `embedding.model`, with the FastEmbed variant and
/// output dimension
const SUPPORTED_MODELS: &[(&str, EmbeddingModel, usize)] = &[
    (
        "paraphrase-multilingual-MiniLM-L12-v2",
        EmbeddingModel::ParaphraseMLMiniLML12V2,
        384,
    ),
    ("multilingual-e5-small", EmbeddingModel::MultilingualE5Small, 384),
    ("multilingual-e5-base", EmbeddingModel::MultilingualE5Base, 768),
    ("all-MiniLM-L6-v2", EmbeddingModel::AllMiniLML6V2, 384),
    ("bge-small-en-v1.5", EmbeddingModel::BGESmallENV15, 384),
];

fn lookup(model_name: &str) -> Option<&'static (&'static str, EmbeddingModel, usize)> {
    SUPPORTED_MODELS
        .iter()
        .find(|(name, _, _)| name.eq_ignore_ascii_case(model_name))
}

/// Local sentence embeddings through FastEmbed (ONNX runtime)
///
/// The default multilingual MiniLM handles Spanish administrative text.
/// Weights are fetched into the HuggingFace cache on first use, so the first
/// `new` may take a while and fails offline.
pub struct FastEmbedProvider {
    model: Arc<TextEmbedding>,
    model_name: String,
    dimension: usize,
}

impl FastEmbedProvider {
    pub const DEFAULT_MODEL: &'static str = "paraphrase-multilingual-MiniLM-L12-v2";

    pub fn new(model_name: &str) -> Result<Self, EmbeddingError> {
        let (canonical, variant, dimension) = lookup(model_name).ok_or_else(|| {
            EmbeddingError::InitializationError(format!(
                "Unsupported model: {}. Supported: {}",
                model_name,
                Self::supported_models().join(", ")
            ))
        })?;

        tracing::info!("Loading embedding model {} ({}D)", canonical, dimension);

        let options = InitOptions::new(variant.clone()).with_show_download_progress(false);
        let model = TextEmbedding::try_new(options)
            .map_err(|e| EmbeddingError::InitializationError(e.to_string()))?;

        Ok(Self {
            model: Arc::new(model),
            model_name: canonical.to_string(),
            dimension: *dimension,
        })
    }

    pub fn with_default_model() -> Result<Self, EmbeddingError> {
        Self::new(Self::DEFAULT_MODEL)
    }

    pub fn supported_models() -> Vec<&'static str> {
        SUPPORTED_MODELS.iter().map(|(name, _, _)| *name).collect()
    }

    pub fn model_dimension(model_name: &str) -> Option<usize> {
        lookup(model_name).map(|(_, _, dimension)| *dimension)
    }

    fn check_dimension(&self, embedding: &[f32]) -> Result<(), EmbeddingError> {
        if embedding.len() == self.dimension {
            Ok(())
        } else {
            Err(EmbeddingError::DimensionMismatch {
                expected: self.dimension,
                actual: embedding.len(),
            })
        }
    }
}

impl EmbeddingProvider for FastEmbedProvider {
    fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        self.embed_batch(&[text.to_string()])?
            .pop()
            .ok_or_else(|| EmbeddingError::GenerationError("No embedding returned".to_string()))
    }

    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        // One vector per input: empty passages would silently shift the ordering
        if let Some(pos) = texts.iter().position(|t| t.trim().is_empty()) {
            return Err(EmbeddingError::InvalidInput(format!(
                "Text at position {} is empty",
                pos
            )));
        }

        let embeddings = self
            .model
            .embed(texts.to_vec(), None)
            .map_err(|e| EmbeddingError::GenerationError(e.to_string()))?;

        if embeddings.len() != texts.len() {
            return Err(EmbeddingError::GenerationError(format!(
                "{} embeddings for {} texts",
                embeddings.len(),
                texts.len()
            )));
        }
        for embedding in &embeddings {
            self.check_dimension(embedding)?;
        }

        Ok(embeddings)
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn model_name(&self) -> &str {
        &self.model_name
    }
}
