/// TF-IDF index with cosine similarity scoring
use super::{check_len, check_term_ids, rank_top_n, PayloadError};
use crate::analysis::{AnalyzerSettings, TermAnalyzer};
use crate::corpus::{Corpus, CorpusFingerprint};
use crate::retrieval::{MethodOutcome, RetrievalMethod};
use ahash::HashMap;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Build-time weighting parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TfIdfParams {
    /// Use 1 + ln(tf) instead of raw counts
    pub sublinear_tf: bool,
    /// Drop terms appearing in fewer chunks than this
    pub min_df: usize,
    /// Drop terms appearing in more than this fraction of chunks
    pub max_df_ratio: f32,
}

impl Default for TfIdfParams {
    fn default() -> Self {
        Self {
            sublinear_tf: true,
            min_df: 1,
            max_df_ratio: 1.0,
        }
    }
}

/// Persisted form of [`TfIdfIndex`]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TfIdfPayload {
    pub analyzer: AnalyzerSettings,
    pub params: TfIdfParams,
    /// Vocabulary in term-id order
    pub terms: Vec<String>,
    /// Smoothed idf per term id
    pub idf: Vec<f32>,
    pub chunk_ids: Vec<String>,
    /// L2-normalized sparse vectors, (term id, weight) sorted by term id
    pub doc_vectors: Vec<Vec<(u32, f32)>>,
}

impl TfIdfPayload {
    fn validate(&self) -> Result<(), PayloadError> {
        let vocabulary = self.terms.len();
        check_len("idf", vocabulary, self.idf.len())?;
        check_len("doc_vectors", self.chunk_ids.len(), self.doc_vectors.len())?;
        check_term_ids(
            self.doc_vectors
                .iter()
                .enumerate()
                .flat_map(|(doc, vector)| vector.iter().map(move |&(term, _)| (doc, term))),
            vocabulary,
        )
    }
}

/// In-memory TF-IDF index
///
/// Postings are derived from the document vectors at construction and never
/// persisted.
#[derive(Debug, Clone)]
pub struct TfIdfIndex {
    analyzer: TermAnalyzer,
    corpus: CorpusFingerprint,
    payload: TfIdfPayload,
    vocabulary: HashMap<String, u32>,
    postings: Vec<Vec<(u32, f32)>>,
}

impl TfIdfIndex {
    /// Build from a corpus
    pub fn build(corpus: &Corpus, analyzer: TermAnalyzer, params: TfIdfParams) -> Self {
        let chunk_ids: Vec<String> = corpus.chunks().iter().map(|c| c.id.clone()).collect();

        let doc_counts: Vec<BTreeMap<String, u32>> = corpus
            .chunks()
            .iter()
            .map(|chunk| {
                let mut counts = BTreeMap::new();
                for term in analyzer.terms(&chunk.text) {
                    *counts.entry(term).or_insert(0) += 1;
                }
                counts
            })
            .collect();

        let mut df: BTreeMap<&str, usize> = BTreeMap::new();
        for counts in &doc_counts {
            for term in counts.keys() {
                *df.entry(term.as_str()).or_insert(0) += 1;
            }
        }

        let n_docs = doc_counts.len();
        let max_df = params.max_df_ratio * n_docs as f32;
        let kept: BTreeSet<&str> = df
            .iter()
            .filter(|&(_, &d)| d >= params.min_df && d as f32 <= max_df)
            .map(|(t, _)| *t)
            .collect();

        let terms: Vec<String> = kept.iter().map(|t| t.to_string()).collect();
        let term_ids: HashMap<&str, u32> = kept
            .iter()
            .enumerate()
            .map(|(i, t)| (*t, i as u32))
            .collect();

        let idf: Vec<f32> = terms
            .iter()
            .map(|t| smooth_idf(n_docs, df[t.as_str()]))
            .collect();

        let doc_vectors: Vec<Vec<(u32, f32)>> = doc_counts
            .iter()
            .map(|counts| {
                let weighted: Vec<(u32, f32)> = counts
                    .iter()
                    .filter_map(|(term, &tf)| {
                        term_ids.get(term.as_str()).map(|&id| {
                            let tf = if params.sublinear_tf {
                                1.0 + (tf as f32).ln()
                            } else {
                                tf as f32
                            };
                            (id, tf * idf[id as usize])
                        })
                    })
                    .collect();
                l2_normalize(weighted)
            })
            .collect();

        tracing::info!(
            "Built TF-IDF index: {} chunks, {} terms",
            n_docs,
            terms.len()
        );

        let payload = TfIdfPayload {
            analyzer: analyzer.settings().clone(),
            params,
            terms,
            idf,
            chunk_ids,
            doc_vectors,
        };

        Self::assemble(payload, analyzer, corpus.fingerprint().clone())
    }

    /// Restore from a persisted payload, refusing one whose tables disagree
    pub fn from_payload(
        payload: TfIdfPayload,
        analyzer: TermAnalyzer,
        corpus: CorpusFingerprint,
    ) -> Result<Self, PayloadError> {
        payload.validate()?;
        Ok(Self::assemble(payload, analyzer, corpus))
    }

    fn assemble(mut payload: TfIdfPayload, analyzer: TermAnalyzer, corpus: CorpusFingerprint) -> Self {
        let vocabulary: HashMap<String, u32> = payload
            .terms
            .iter()
            .enumerate()
            .map(|(i, t)| (t.clone(), i as u32))
            .collect();

        let mut postings: Vec<Vec<(u32, f32)>> = vec![Vec::new(); payload.terms.len()];
        for (doc, vector) in payload.doc_vectors.iter_mut().enumerate() {
            vector.sort_by_key(|(term, _)| *term);
            for &(term, weight) in vector.iter() {
                postings[term as usize].push((doc as u32, weight));
            }
        }

        Self {
            analyzer,
            corpus,
            payload,
            vocabulary,
            postings,
        }
    }

    /// Top `top_n` chunks by cosine similarity with the query
    pub fn query(&self, text: &str, top_n: usize) -> MethodOutcome {
        if self.payload.chunk_ids.is_empty() {
            return MethodOutcome::EmptyCorpus;
        }

        let query_vector: Vec<(u32, f32)> = self
            .analyzer
            .query_terms(text)
            .iter()
            .filter_map(|t| self.vocabulary.get(t))
            .map(|&id| (id, self.payload.idf[id as usize]))
            .collect();

        if query_vector.is_empty() {
            return MethodOutcome::NoMatchableTerms;
        }

        let query_vector = l2_normalize(query_vector);
        let mut accumulated = vec![0.0f32; self.payload.chunk_ids.len()];
        for (term, query_weight) in query_vector {
            for &(doc, doc_weight) in &self.postings[term as usize] {
                accumulated[doc as usize] += query_weight * doc_weight;
            }
        }

        let scored: Vec<(usize, f32)> = accumulated
            .into_iter()
            .enumerate()
            .filter(|(_, score)| *score > 0.0)
            .collect();

        if scored.is_empty() {
            return MethodOutcome::NoMatchableTerms;
        }

        MethodOutcome::Candidates(rank_top_n(
            scored,
            &self.payload.chunk_ids,
            top_n,
            RetrievalMethod::LexicalTf,
        ))
    }

    pub fn payload(&self) -> &TfIdfPayload {
        &self.payload
    }

    pub fn corpus_fingerprint(&self) -> &CorpusFingerprint {
        &self.corpus
    }

    pub fn vocabulary_len(&self) -> usize {
        self.payload.terms.len()
    }

    pub fn len(&self) -> usize {
        self.payload.chunk_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.payload.chunk_ids.is_empty()
    }
}

/// ln((1 + n) / (1 + df)) + 1
fn smooth_idf(n_docs: usize, df: usize) -> f32 {
    ((1.0 + n_docs as f32) / (1.0 + df as f32)).ln() + 1.0
}

fn l2_normalize(mut vector: Vec<(u32, f32)>) -> Vec<(u32, f32)> {
    let norm = vector.iter().map(|(_, w)| w * w).sum::<f32>().sqrt();
    if norm > 0.0 {
        for (_, w) in vector.iter_mut() {
            *w /= norm;
        }
    }
    vector
}
