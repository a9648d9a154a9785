/// Dense vector index: exact cosine search over an L2-normalized matrix
use super::{EmbeddingError, EmbeddingProvider};
use crate::corpus::{Corpus, CorpusFingerprint};
use crate::lexical::sort_scored;
use crate::retrieval::{RetrievalMethod, ScoredCandidate};
use ndarray::{Array1, Array2, ArrayView1};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DenseIndexError {
    #[error("Embedding failed: {0}")]
    Embedding(#[from] EmbeddingError),

    #[error("Invalid dimension: expected {expected}, got {actual}")]
    InvalidDimension { expected: usize, actual: usize },

    #[error("Corrupt payload: {0}")]
    CorruptPayload(String),
}

/// Persisted form of [`DenseIndex`]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DensePayload {
    pub model: String,
    pub dimension: usize,
    /// Row order of `vectors`
    pub chunk_ids: Vec<String>,
    /// Row-major, `chunk_ids.len() * dimension` values
    pub vectors: Vec<f32>,
}

/// Embedding matrix plus chunk-id ordering
#[derive(Debug, Clone)]
pub struct DenseIndex {
    model: String,
    chunk_ids: Vec<String>,
    matrix: Array2<f32>,
    corpus: CorpusFingerprint,
}

impl DenseIndex {
    /// Embed every chunk in `batch_size` groups and normalize each row
    pub fn build(
        corpus: &Corpus,
        provider: &dyn EmbeddingProvider,
        batch_size: usize,
    ) -> Result<Self, DenseIndexError> {
        let dimension = provider.dimension();
        let chunk_ids: Vec<String> = corpus.chunks().iter().map(|c| c.id.clone()).collect();
        let mut vectors: Vec<f32> = Vec::with_capacity(chunk_ids.len() * dimension);

        for (batch_no, batch) in corpus.chunks().chunks(batch_size.max(1)).enumerate() {
            let texts: Vec<String> = batch.iter().map(|c| c.text.clone()).collect();
            let embeddings = provider.embed_batch(&texts)?;
            if embeddings.len() != texts.len() {
                return Err(DenseIndexError::CorruptPayload(format!(
                    "provider returned {} vectors for {} texts",
                    embeddings.len(),
                    texts.len()
                )));
            }
            for embedding in embeddings {
                if embedding.len() != dimension {
                    return Err(DenseIndexError::InvalidDimension {
                        expected: dimension,
                        actual: embedding.len(),
                    });
                }
                vectors.extend(l2_normalized(embedding));
            }
            tracing::debug!("Embedded batch {} ({} chunks)", batch_no, batch.len());
        }

        tracing::info!(
            "Built dense index: {} chunks, {}D ({})",
            chunk_ids.len(),
            dimension,
            provider.model_name()
        );

        Self::from_payload(
            DensePayload {
                model: provider.model_name().to_string(),
                dimension,
                chunk_ids,
                vectors,
            },
            corpus.fingerprint().clone(),
        )
    }

    /// Restore from a persisted payload
    pub fn from_payload(
        payload: DensePayload,
        corpus: CorpusFingerprint,
    ) -> Result<Self, DenseIndexError> {
        let rows = payload.chunk_ids.len();
        let matrix = Array2::from_shape_vec((rows, payload.dimension), payload.vectors)
            .map_err(|e| DenseIndexError::CorruptPayload(e.to_string()))?;

        Ok(Self {
            model: payload.model,
            chunk_ids: payload.chunk_ids,
            matrix,
            corpus,
        })
    }

    pub fn to_payload(&self) -> DensePayload {
        DensePayload {
            model: self.model.clone(),
            dimension: self.dimension(),
            chunk_ids: self.chunk_ids.clone(),
            vectors: self.matrix.iter().copied().collect(),
        }
    }

    /// Top `top_n` rows by cosine similarity with an (unnormalized) query vector
    pub fn search(
        &self,
        query: &[f32],
        top_n: usize,
    ) -> Result<Vec<ScoredCandidate>, DenseIndexError> {
        if query.len() != self.dimension() {
            return Err(DenseIndexError::InvalidDimension {
                expected: self.dimension(),
                actual: query.len(),
            });
        }
        if self.chunk_ids.is_empty() {
            return Ok(Vec::new());
        }

        let query = Array1::from(l2_normalized(query.to_vec()));
        let similarities = self.matrix.dot(&query);

        let mut scored: Vec<(usize, f32)> = similarities.iter().copied().enumerate().collect();
        sort_scored(&mut scored, &self.chunk_ids);
        scored.truncate(top_n);

        Ok(scored
            .into_iter()
            .map(|(row, score)| {
                ScoredCandidate::new(self.chunk_ids[row].clone(), score, RetrievalMethod::Dense)
            })
            .collect())
    }

    pub fn row(&self, idx: usize) -> Option<ArrayView1<'_, f32>> {
        (idx < self.chunk_ids.len()).then(|| self.matrix.row(idx))
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn dimension(&self) -> usize {
        self.matrix.ncols()
    }

    pub fn corpus_fingerprint(&self) -> &CorpusFingerprint {
        &self.corpus
    }

    pub fn len(&self) -> usize {
        self.chunk_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunk_ids.is_empty()
    }
}

fn l2_normalized(mut vector: Vec<f32>) -> Vec<f32> {
    let norm = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        vector.iter_mut().for_each(|x| *x /= norm);
    }
    vector
}
