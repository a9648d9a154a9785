/// Okapi BM25 index
use super::{check_len, check_term_ids, sort_scored, PayloadError};
use crate::analysis::{AnalyzerSettings, TermAnalyzer};
use crate::corpus::{Corpus, CorpusFingerprint};
use crate::retrieval::{MethodOutcome, RetrievalMethod, ScoredCandidate};
use ahash::HashMap;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Saturation and length-normalization constants
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bm25Params {
    /// Term-frequency saturation
    pub k1: f32,
    /// Length-normalization strength (0 = none, 1 = full)
    pub b: f32,
}

impl Default for Bm25Params {
    fn default() -> Self {
        Self { k1: 1.5, b: 0.75 }
    }
}

/// Query-time low-confidence filter
///
/// The thresholds are empirical and need per-corpus calibration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bm25QualityFilter {
    pub enabled: bool,
    /// Drop candidates scoring below this fraction of the top score
    pub min_score_ratio: f32,
    /// Drop candidates matching a single term of a multi-term query
    pub drop_single_term_matches: bool,
}

impl Default for Bm25QualityFilter {
    fn default() -> Self {
        Self {
            enabled: true,
            min_score_ratio: 0.1,
            drop_single_term_matches: true,
        }
    }
}

/// Persisted form of [`Bm25Index`]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Bm25Payload {
    pub analyzer: AnalyzerSettings,
    pub params: Bm25Params,
    /// Vocabulary in term-id order
    pub terms: Vec<String>,
    /// Number of chunks containing each term
    pub doc_freq: Vec<u32>,
    pub chunk_ids: Vec<String>,
    /// Token count per chunk
    pub doc_lengths: Vec<u32>,
    /// (term id, frequency) per chunk, sorted by term id
    pub doc_terms: Vec<Vec<(u32, u32)>>,
}

impl Bm25Payload {
    fn validate(&self) -> Result<(), PayloadError> {
        let vocabulary = self.terms.len();
        let chunks = self.chunk_ids.len();
        check_len("doc_freq", vocabulary, self.doc_freq.len())?;
        check_len("doc_lengths", chunks, self.doc_lengths.len())?;
        check_len("doc_terms", chunks, self.doc_terms.len())?;
        check_term_ids(
            self.doc_terms
                .iter()
                .enumerate()
                .flat_map(|(doc, terms)| terms.iter().map(move |&(term, _)| (doc, term))),
            vocabulary,
        )
    }
}

/// In-memory BM25 index
#[derive(Debug, Clone)]
pub struct Bm25Index {
    analyzer: TermAnalyzer,
    corpus: CorpusFingerprint,
    filter: Bm25QualityFilter,
    payload: Bm25Payload,
    vocabulary: HashMap<String, u32>,
    postings: Vec<Vec<(u32, u32)>>,
    avg_doc_len: f32,
}

struct Match {
    doc: usize,
    score: f32,
    matched_terms: usize,
}

impl Bm25Index {
    /// Build from a corpus
    pub fn build(
        corpus: &Corpus,
        analyzer: TermAnalyzer,
        params: Bm25Params,
        filter: Bm25QualityFilter,
    ) -> Self {
        let chunk_ids: Vec<String> = corpus.chunks().iter().map(|c| c.id.clone()).collect();

        let tokenized: Vec<Vec<String>> = corpus
            .chunks()
            .iter()
            .map(|chunk| analyzer.tokens(&chunk.text))
            .collect();

        let mut term_ids: BTreeMap<&str, u32> = BTreeMap::new();
        for tokens in &tokenized {
            for token in tokens {
                term_ids.entry(token.as_str()).or_insert(0);
            }
        }
        for (id, slot) in term_ids.values_mut().enumerate() {
            *slot = id as u32;
        }

        let mut doc_freq = vec![0u32; term_ids.len()];
        let mut doc_terms = Vec::with_capacity(tokenized.len());
        let mut doc_lengths = Vec::with_capacity(tokenized.len());

        for tokens in &tokenized {
            let mut counts: BTreeMap<u32, u32> = BTreeMap::new();
            for token in tokens {
                *counts.entry(term_ids[token.as_str()]).or_insert(0) += 1;
            }
            for term in counts.keys() {
                doc_freq[*term as usize] += 1;
            }
            doc_lengths.push(tokens.len() as u32);
            doc_terms.push(counts.into_iter().collect::<Vec<_>>());
        }

        let terms: Vec<String> = term_ids.keys().map(|t| t.to_string()).collect();

        tracing::info!(
            "Built BM25 index: {} chunks, {} terms (k1={}, b={})",
            chunk_ids.len(),
            terms.len(),
            params.k1,
            params.b
        );

        let payload = Bm25Payload {
            analyzer: analyzer.settings().clone(),
            params,
            terms,
            doc_freq,
            chunk_ids,
            doc_lengths,
            doc_terms,
        };

        Self::assemble(payload, analyzer, filter, corpus.fingerprint().clone())
    }

    /// Restore from a persisted payload, refusing one whose tables disagree
    pub fn from_payload(
        payload: Bm25Payload,
        analyzer: TermAnalyzer,
        filter: Bm25QualityFilter,
        corpus: CorpusFingerprint,
    ) -> Result<Self, PayloadError> {
        payload.validate()?;
        Ok(Self::assemble(payload, analyzer, filter, corpus))
    }

    fn assemble(
        payload: Bm25Payload,
        analyzer: TermAnalyzer,
        filter: Bm25QualityFilter,
        corpus: CorpusFingerprint,
    ) -> Self {
        let vocabulary: HashMap<String, u32> = payload
            .terms
            .iter()
            .enumerate()
            .map(|(i, t)| (t.clone(), i as u32))
            .collect();

        let mut postings: Vec<Vec<(u32, u32)>> = vec![Vec::new(); payload.terms.len()];
        for (doc, terms) in payload.doc_terms.iter().enumerate() {
            for &(term, tf) in terms {
                postings[term as usize].push((doc as u32, tf));
            }
        }

        let total_len: u64 = payload.doc_lengths.iter().map(|&l| l as u64).sum();
        let avg_doc_len = if payload.doc_lengths.is_empty() {
            0.0
        } else {
            total_len as f32 / payload.doc_lengths.len() as f32
        };

        Self {
            analyzer,
            corpus,
            filter,
            payload,
            vocabulary,
            postings,
            avg_doc_len,
        }
    }

    /// Top `top_n` chunks by BM25 score, after the quality filter
    pub fn query(&self, text: &str, top_n: usize) -> MethodOutcome {
        if self.payload.chunk_ids.is_empty() {
            return MethodOutcome::EmptyCorpus;
        }

        let query_terms: Vec<u32> = self
            .analyzer
            .query_tokens(text)
            .iter()
            .filter_map(|t| self.vocabulary.get(t).copied())
            .collect();

        if query_terms.is_empty() {
            return MethodOutcome::NoMatchableTerms;
        }

        let matches = self.score(&query_terms);
        if matches.is_empty() {
            return MethodOutcome::NoMatchableTerms;
        }

        // Expansion terms count as matches but do not make a one-word query multi-term
        let typed_terms: BTreeSet<String> = self
            .analyzer
            .tokens(text)
            .into_iter()
            .filter(|t| self.vocabulary.contains_key(t))
            .collect();
        let kept = self.apply_quality_filter(matches, typed_terms.len());

        let candidates: Vec<ScoredCandidate> = kept
            .into_iter()
            .take(top_n)
            .map(|m| {
                ScoredCandidate::new(
                    self.payload.chunk_ids[m.doc].clone(),
                    m.score,
                    RetrievalMethod::LexicalProb,
                )
            })
            .collect();

        MethodOutcome::Candidates(candidates)
    }

    /// Score every chunk containing at least one query term, best first
    fn score(&self, query_terms: &[u32]) -> Vec<Match> {
        let k1 = self.payload.params.k1;
        let b = self.payload.params.b;
        let n_docs = self.payload.chunk_ids.len() as f32;

        let mut scores = vec![0.0f32; self.payload.chunk_ids.len()];
        let mut matched = vec![0usize; self.payload.chunk_ids.len()];

        for &term in query_terms {
            let df = self.payload.doc_freq[term as usize] as f32;
            let idf = (1.0 + (n_docs - df + 0.5) / (df + 0.5)).ln();

            for &(doc, tf) in &self.postings[term as usize] {
                let doc = doc as usize;
                let tf = tf as f32;
                let len_ratio = if self.avg_doc_len > 0.0 {
                    self.payload.doc_lengths[doc] as f32 / self.avg_doc_len
                } else {
                    1.0
                };
                let saturation = tf * (k1 + 1.0) / (tf + k1 * (1.0 - b + b * len_ratio));
                scores[doc] += idf * saturation;
                matched[doc] += 1;
            }
        }

        let mut ranked: Vec<(usize, f32)> = scores
            .iter()
            .enumerate()
            .filter(|(doc, _)| matched[*doc] > 0)
            .map(|(doc, &score)| (doc, score))
            .collect();
        sort_scored(&mut ranked, &self.payload.chunk_ids);

        ranked
            .into_iter()
            .map(|(doc, score)| Match {
                doc,
                score,
                matched_terms: matched[doc],
            })
            .collect()
    }

    /// Drop low-confidence matches; the top match is always kept
    fn apply_quality_filter(&self, matches: Vec<Match>, typed_term_count: usize) -> Vec<Match> {
        if !self.filter.enabled || matches.is_empty() {
            return matches;
        }

        let top_score = matches[0].score;
        let min_score = top_score * self.filter.min_score_ratio;
        let before = matches.len();

        let kept: Vec<Match> = matches
            .into_iter()
            .enumerate()
            .filter(|(rank, m)| {
                if *rank == 0 {
                    return true;
                }
                if m.score < min_score {
                    return false;
                }
                !(self.filter.drop_single_term_matches
                    && typed_term_count > 1
                    && m.matched_terms <= 1)
            })
            .map(|(_, m)| m)
            .collect();

        if kept.len() < before {
            tracing::debug!(
                "BM25 quality filter dropped {} of {} candidates",
                before - kept.len(),
                before
            );
        }

        kept
    }

    pub fn payload(&self) -> &Bm25Payload {
        &self.payload
    }

    pub fn corpus_fingerprint(&self) -> &CorpusFingerprint {
        &self.corpus
    }

    pub fn avg_doc_len(&self) -> f32 {
        self.avg_doc_len
    }

    pub fn len(&self) -> usize {
        self.payload.chunk_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.payload.chunk_ids.is_empty()
    }
}
