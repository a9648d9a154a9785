//! Term analysis shared by both lexical indices
//!
//! Text goes through tantivy's analyzer chain: split on non-alphanumerics,
//! drop overlong tokens, lowercase, fold accents to ASCII, remove stop
//! words. Unigrams are then optionally joined into bigrams. Corpus text and
//! queries use the exact same chain; an index records its
//! [`AnalyzerSettings`] so a load with different settings can be refused.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashSet};
use tantivy::tokenizer::{
    AsciiFoldingFilter, LowerCaser, RemoveLongFilter, SimpleTokenizer, StopWordFilter,
    TextAnalyzer, TokenStream,
};

/// Spanish function words, already lowercased and accent-folded
pub const DEFAULT_STOP_WORDS: &[&str] = &[
    "a", "al", "algo", "algunas", "algunos", "ante", "antes", "como", "con", "contra", "cual",
    "cuales", "cuando", "de", "del", "desde", "donde", "durante", "e", "el", "ella", "ellas",
    "ellos", "en", "entre", "era", "es", "esa", "esas", "ese", "eso", "esos", "esta", "estan",
    "estas", "este", "esto", "estos", "fue", "ha", "han", "hay", "la", "las", "le", "les", "lo",
    "los", "mas", "me", "mi", "muy", "no", "nos", "o", "para", "pero", "por", "que", "quien",
    "se", "sea", "ser", "si", "sin", "sobre", "son", "su", "sus", "tambien", "te", "tiene",
    "todo", "todos", "u", "un", "una", "unas", "uno", "unos", "y", "ya",
];

/// Settings that change the produced terms; persisted with each lexical index
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalyzerSettings {
    /// Normalized, sorted stop words
    pub stop_words: Vec<String>,
    /// Largest n-gram window (1 or 2)
    pub ngram_max: usize,
    /// Tokens longer than this many bytes are dropped
    pub max_token_len: usize,
}

/// Tokenizer + normalizer + query expander
#[derive(Clone)]
pub struct TermAnalyzer {
    analyzer: TextAnalyzer,
    settings: AnalyzerSettings,
    expansions: BTreeMap<String, Vec<String>>,
}

impl TermAnalyzer {
    pub fn new(
        stop_words: &[String],
        ngram_max: usize,
        max_token_len: usize,
        expansions: &BTreeMap<String, Vec<String>>,
    ) -> Self {
        let mut folder = folding_analyzer(max_token_len);

        let stop_words: BTreeSet<String> = stop_words
            .iter()
            .flat_map(|w| run(&mut folder, w))
            .collect();
        let stop_words: Vec<String> = stop_words.into_iter().collect();

        let analyzer = TextAnalyzer::builder(SimpleTokenizer::default())
            .filter(RemoveLongFilter::limit(max_token_len))
            .filter(LowerCaser)
            .filter(AsciiFoldingFilter)
            .filter(StopWordFilter::remove(stop_words.clone()))
            .build();

        let mut normalized_expansions: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for (term, related) in expansions {
            let Some(key) = run(&mut folder, term).into_iter().next() else {
                continue;
            };
            let entry = normalized_expansions.entry(key).or_default();
            for word in related {
                for token in run(&mut folder, word) {
                    if !entry.contains(&token) {
                        entry.push(token);
                    }
                }
            }
        }

        Self {
            analyzer,
            settings: AnalyzerSettings {
                stop_words,
                ngram_max: ngram_max.clamp(1, 2),
                max_token_len,
            },
            expansions: normalized_expansions,
        }
    }

    pub fn with_defaults() -> Self {
        let stop_words: Vec<String> = DEFAULT_STOP_WORDS.iter().map(|w| w.to_string()).collect();
        Self::new(&stop_words, 2, 40, &BTreeMap::new())
    }

    pub fn settings(&self) -> &AnalyzerSettings {
        &self.settings
    }

    /// Normalized unigrams, stop words removed, in text order
    pub fn tokens(&self, text: &str) -> Vec<String> {
        let mut analyzer = self.analyzer.clone();
        run(&mut analyzer, text)
    }

    /// Unigrams followed by bigrams (when enabled), in text order
    pub fn terms(&self, text: &str) -> Vec<String> {
        let tokens = self.tokens(text);
        self.with_ngrams(tokens)
    }

    /// Distinct query terms: analyzed terms (with n-grams) plus expansion terms,
    /// first occurrence order
    pub fn query_terms(&self, query: &str) -> Vec<String> {
        self.expand_query(query, true)
    }

    /// Like [`TermAnalyzer::query_terms`] but unigrams only
    pub fn query_tokens(&self, query: &str) -> Vec<String> {
        self.expand_query(query, false)
    }

    fn expand_query(&self, query: &str, ngrams: bool) -> Vec<String> {
        let tokens = self.tokens(query);
        let expanded: Vec<String> = tokens
            .iter()
            .filter_map(|t| self.expansions.get(t))
            .flatten()
            .cloned()
            .collect();

        let base = if ngrams {
            self.with_ngrams(tokens)
        } else {
            tokens
        };

        let mut seen = HashSet::new();
        base.into_iter()
            .chain(expanded)
            .filter(|t| seen.insert(t.clone()))
            .collect()
    }

    fn with_ngrams(&self, tokens: Vec<String>) -> Vec<String> {
        if self.settings.ngram_max < 2 || tokens.len() < 2 {
            return tokens;
        }
        let bigrams: Vec<String> = tokens
            .windows(2)
            .map(|pair| format!("{} {}", pair[0], pair[1]))
            .collect();
        let mut terms = tokens;
        terms.extend(bigrams);
        terms
    }
}

impl std::fmt::Debug for TermAnalyzer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TermAnalyzer")
            .field("settings", &self.settings)
            .field("expansions", &self.expansions.len())
            .finish()
    }
}

fn folding_analyzer(max_token_len: usize) -> TextAnalyzer {
    TextAnalyzer::builder(SimpleTokenizer::default())
        .filter(RemoveLongFilter::limit(max_token_len))
        .filter(LowerCaser)
        .filter(AsciiFoldingFilter)
        .build()
}

fn run(analyzer: &mut TextAnalyzer, text: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut stream = analyzer.token_stream(text);
    while stream.advance() {
        tokens.push(stream.token().text.clone());
    }
    tokens
}
