//! The common capability every retrieval method exposes
use super::{MethodOutcome, RetrievalMethod};
use crate::corpus::CorpusFingerprint;
use crate::embedding::{DenseIndex, DenseIndexError, EmbeddingProvider};
use crate::lexical::{Bm25Index, TfIdfIndex};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Method-local query failure
///
/// Never crosses into fusion: the searcher turns it into a per-method
/// status and carries on with the remaining methods.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RetrieverError {
    #[error("Embedding model unavailable: {0}")]
    EmbeddingUnavailable(String),

    #[error("Query embedding failed: {0}")]
    Embedding(String),

    #[error("Dense search failed: {0}")]
    Dense(String),

    #[error("Timed out after {0:?}")]
    TimedOut(Duration),

    #[error("Retrieval task failed: {0}")]
    TaskFailed(String),
}

/// Read-only query access to one built index
pub trait Retriever: Send + Sync {
    fn method(&self) -> RetrievalMethod;

    /// Fingerprint of the corpus the index was built from
    fn corpus_fingerprint(&self) -> &CorpusFingerprint;

    /// Top `top_n` candidates for `text`, best first
    fn query(&self, text: &str, top_n: usize) -> Result<MethodOutcome, RetrieverError>;
}

/// Dense index plus the model that embeds queries for it
///
/// A missing model does not prevent loading: the retriever is kept and
/// reports itself unavailable at query time. When no model was reachable at
/// build time there is no index at all, with the same effect.
#[derive(Clone)]
pub struct DenseRetriever {
    index: Option<DenseIndex>,
    corpus: CorpusFingerprint,
    provider: Option<Arc<dyn EmbeddingProvider>>,
    unavailable_reason: String,
}

impl DenseRetriever {
    pub fn new(
        index: DenseIndex,
        provider: Arc<dyn EmbeddingProvider>,
    ) -> Result<Self, DenseIndexError> {
        if !index.is_empty() && provider.dimension() != index.dimension() {
            return Err(DenseIndexError::InvalidDimension {
                expected: index.dimension(),
                actual: provider.dimension(),
            });
        }
        if provider.model_name() != index.model() {
            tracing::warn!(
                "Dense index built with '{}' is queried with '{}'",
                index.model(),
                provider.model_name()
            );
        }

        Ok(Self {
            corpus: index.corpus_fingerprint().clone(),
            index: Some(index),
            provider: Some(provider),
            unavailable_reason: String::new(),
        })
    }

    /// Index loaded but no model to embed queries with
    pub fn unavailable(index: DenseIndex, reason: impl Into<String>) -> Self {
        Self {
            corpus: index.corpus_fingerprint().clone(),
            index: Some(index),
            provider: None,
            unavailable_reason: reason.into(),
        }
    }

    /// No dense index exists for `corpus`
    pub fn not_built(corpus: CorpusFingerprint, reason: impl Into<String>) -> Self {
        Self {
            index: None,
            corpus,
            provider: None,
            unavailable_reason: reason.into(),
        }
    }

    pub fn index(&self) -> Option<&DenseIndex> {
        self.index.as_ref()
    }

    pub fn is_available(&self) -> bool {
        self.index.is_some() && self.provider.is_some()
    }

    pub fn unavailable_reason(&self) -> Option<&str> {
        (!self.is_available()).then_some(self.unavailable_reason.as_str())
    }
}

impl std::fmt::Debug for DenseRetriever {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DenseRetriever")
            .field("model", &self.index.as_ref().map(|i| i.model()))
            .field("chunks", &self.corpus.chunk_count)
            .field("available", &self.is_available())
            .finish()
    }
}

impl Retriever for DenseRetriever {
    fn method(&self) -> RetrievalMethod {
        RetrievalMethod::Dense
    }

    fn corpus_fingerprint(&self) -> &CorpusFingerprint {
        &self.corpus
    }

    fn query(&self, text: &str, top_n: usize) -> Result<MethodOutcome, RetrieverError> {
        if self.corpus.chunk_count == 0 {
            return Ok(MethodOutcome::EmptyCorpus);
        }

        let (Some(index), Some(provider)) = (&self.index, &self.provider) else {
            return Err(RetrieverError::EmbeddingUnavailable(
                self.unavailable_reason.clone(),
            ));
        };

        let embedding = provider
            .embed(text)
            .map_err(|e| RetrieverError::Embedding(e.to_string()))?;

        let candidates = index
            .search(&embedding, top_n)
            .map_err(|e| RetrieverError::Dense(e.to_string()))?;

        Ok(MethodOutcome::Candidates(candidates))
    }
}

/// Closed set of retrieval methods
#[derive(Debug, Clone)]
pub enum MethodRetriever {
    LexicalTf(TfIdfIndex),
    LexicalProb(Bm25Index),
    Dense(DenseRetriever),
}

impl MethodRetriever {
    /// Number of indexed chunks
    pub fn len(&self) -> usize {
        match self {
            MethodRetriever::LexicalTf(index) => index.len(),
            MethodRetriever::LexicalProb(index) => index.len(),
            MethodRetriever::Dense(dense) => dense.corpus_fingerprint().chunk_count,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Retriever for MethodRetriever {
    fn method(&self) -> RetrievalMethod {
        match self {
            MethodRetriever::LexicalTf(_) => RetrievalMethod::LexicalTf,
            MethodRetriever::LexicalProb(_) => RetrievalMethod::LexicalProb,
            MethodRetriever::Dense(_) => RetrievalMethod::Dense,
        }
    }

    fn corpus_fingerprint(&self) -> &CorpusFingerprint {
        match self {
            MethodRetriever::LexicalTf(index) => index.corpus_fingerprint(),
            MethodRetriever::LexicalProb(index) => index.corpus_fingerprint(),
            MethodRetriever::Dense(dense) => dense.corpus_fingerprint(),
        }
    }

    fn query(&self, text: &str, top_n: usize) -> Result<MethodOutcome, RetrieverError> {
        match self {
            MethodRetriever::LexicalTf(index) => Ok(index.query(text, top_n)),
            MethodRetriever::LexicalProb(index) => Ok(index.query(text, top_n)),
            MethodRetriever::Dense(dense) => dense.query(text, top_n),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::TermAnalyzer;
    use crate::corpus::{Chunk, ChunkMetadata, Corpus};
    use crate::embedding::EmbeddingError;
    use crate::lexical::TfIdfParams;

    struct ConstantEmbedder(usize);

    impl EmbeddingProvider for ConstantEmbedder {
        fn embed(&self, _text: &str) -> Result<Vec<f32>, EmbeddingError> {
            Ok(vec![1.0; self.0])
        }

        fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
            texts.iter().map(|t| self.embed(t)).collect()
        }

        fn dimension(&self) -> usize {
            self.0
        }

        fn model_name(&self) -> &str {
            "constant"
        }
    }

    fn corpus() -> Corpus {
        Corpus::new(vec![
            Chunk::new("c1", "escala de viáticos", ChunkMetadata::default()),
            Chunk::new("c2", "pasajes aéreos", ChunkMetadata::default()),
        ])
        .unwrap()
    }

    #[test]
    fn test_dense_unavailable_is_method_error() {
        let corpus = corpus();
        let index = DenseIndex::build(&corpus, &ConstantEmbedder(3), 8).unwrap();
        let retriever = MethodRetriever::Dense(DenseRetriever::unavailable(index, "model offline"));

        assert_eq!(retriever.method(), RetrievalMethod::Dense);
        assert_eq!(
            retriever.query("viáticos", 5),
            Err(RetrieverError::EmbeddingUnavailable("model offline".to_string()))
        );
    }

    #[test]
    fn test_dense_empty_corpus_short_circuits() {
        let index = DenseIndex::build(&Corpus::empty(), &ConstantEmbedder(3), 8).unwrap();
        let retriever = DenseRetriever::unavailable(index, "never loaded");
        assert_eq!(retriever.query("viáticos", 5), Ok(MethodOutcome::EmptyCorpus));
    }

    #[test]
    fn test_dense_dimension_checked() {
        let index = DenseIndex::build(&corpus(), &ConstantEmbedder(3), 8).unwrap();
        let result = DenseRetriever::new(index, Arc::new(ConstantEmbedder(5)));
        assert!(matches!(
            result,
            Err(DenseIndexError::InvalidDimension {
                expected: 3,
                actual: 5
            })
        ));
    }

    #[test]
    fn test_lexical_dispatch() {
        let corpus = corpus();
        let retriever = MethodRetriever::LexicalTf(TfIdfIndex::build(
            &corpus,
            TermAnalyzer::with_defaults(),
            TfIdfParams::default(),
        ));

        assert_eq!(retriever.len(), 2);
        assert_eq!(retriever.corpus_fingerprint(), corpus.fingerprint());
        let outcome = retriever.query("pasajes", 5).unwrap();
        assert_eq!(outcome.candidates()[0].chunk_id, "c2");
    }

    #[test]
    fn test_dense_not_built_reports_unavailable() {
        let corpus = corpus();
        let retriever = DenseRetriever::not_built(corpus.fingerprint().clone(), "model offline");

        assert!(!retriever.is_available());
        assert_eq!(retriever.unavailable_reason(), Some("model offline"));
        assert_eq!(retriever.corpus_fingerprint(), corpus.fingerprint());
        assert_eq!(
            retriever.query("viáticos", 5),
            Err(RetrieverError::EmbeddingUnavailable("model offline".to_string()))
        );

        let empty = DenseRetriever::not_built(Corpus::empty().fingerprint().clone(), "model offline");
        assert_eq!(empty.query("viáticos", 5), Ok(MethodOutcome::EmptyCorpus));
    }
}
