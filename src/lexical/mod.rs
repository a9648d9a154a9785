//! Lexical retrieval indices
//!
//! - [`TfIdfIndex`]: cosine similarity over TF-IDF weighted unigrams and bigrams
//! - [`Bm25Index`]: Okapi BM25 with a method-local low-confidence filter
//!
//! Both restore from persisted payloads only after checking that their
//! tables agree in length and every term id is in range.

mod bm25;
mod tfidf;

pub use bm25::{Bm25Index, Bm25Params, Bm25Payload, Bm25QualityFilter};
pub use tfidf::{TfIdfIndex, TfIdfParams, TfIdfPayload};

use crate::retrieval::{RetrievalMethod, ScoredCandidate};
use thiserror::Error;

/// A persisted lexical payload whose tables do not line up
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PayloadError {
    #[error("{field} has {actual} entries, expected {expected}")]
    LengthMismatch {
        field: &'static str,
        expected: usize,
        actual: usize,
    },

    #[error("chunk {chunk} references term id {term} outside a vocabulary of {vocabulary}")]
    TermOutOfRange {
        chunk: usize,
        term: u32,
        vocabulary: usize,
    },
}

pub(crate) fn check_len(
    field: &'static str,
    expected: usize,
    actual: usize,
) -> Result<(), PayloadError> {
    if expected == actual {
        Ok(())
    } else {
        Err(PayloadError::LengthMismatch {
            field,
            expected,
            actual,
        })
    }
}

/// Every (chunk, term id) reference must fall inside the vocabulary
pub(crate) fn check_term_ids<I>(references: I, vocabulary: usize) -> Result<(), PayloadError>
where
    I: IntoIterator<Item = (usize, u32)>,
{
    match references
        .into_iter()
        .find(|&(_, term)| term as usize >= vocabulary)
    {
        Some((chunk, term)) => Err(PayloadError::TermOutOfRange {
            chunk,
            term,
            vocabulary,
        }),
        None => Ok(()),
    }
}

/// Order (doc position, score) pairs by score descending then chunk id
/// ascending, keep the first `top_n`, and tag them with the method
pub(crate) fn rank_top_n(
    mut scored: Vec<(usize, f32)>,
    chunk_ids: &[String],
    top_n: usize,
    method: RetrievalMethod,
) -> Vec<ScoredCandidate> {
    sort_scored(&mut scored, chunk_ids);
    scored.truncate(top_n);
    scored
        .into_iter()
        .map(|(doc, score)| ScoredCandidate::new(chunk_ids[doc].clone(), score, method))
        .collect()
}

pub(crate) fn sort_scored(scored: &mut [(usize, f32)], chunk_ids: &[String]) {
    scored.sort_by(|a, b| {
        b.1.total_cmp(&a.1)
            .then_with(|| chunk_ids[a.0].cmp(&chunk_ids[b.0]))
    });
}
