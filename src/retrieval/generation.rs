//! Index generations: build, persist, load and publish
//!
//! A generation is one corpus snapshot plus a retriever per method, all
//! built from that snapshot. Queries clone the current generation's `Arc`
//! when they start; publishing swaps the pointer, so in-flight queries
//! finish against the generation they began with.

use super::retriever::{DenseRetriever, MethodRetriever, Retriever};
use super::RetrievalMethod;
use crate::analysis::{AnalyzerSettings, TermAnalyzer};
use crate::artifact::{artifact_path, IndexArtifact};
use crate::config::Config;
use crate::corpus::{Corpus, CorpusFingerprint};
use crate::embedding::{DenseIndex, DensePayload, EmbeddingProvider};
use crate::error::{RegsearchError, Result};
use crate::lexical::{
    Bm25Index, Bm25Params, Bm25Payload, Bm25QualityFilter, TfIdfIndex, TfIdfParams, TfIdfPayload,
};
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio::task::JoinError;

/// Immutable, fully built set of retrievers over one corpus snapshot
#[derive(Debug)]
pub struct IndexGeneration {
    corpus: Arc<Corpus>,
    retrievers: BTreeMap<RetrievalMethod, Arc<MethodRetriever>>,
    created_at: DateTime<Utc>,
}

impl IndexGeneration {
    /// Assemble a generation; every method must be present and built from `corpus`
    pub fn new(corpus: Arc<Corpus>, retrievers: Vec<MethodRetriever>) -> Result<Self> {
        let mut by_method = BTreeMap::new();

        for retriever in retrievers {
            let method = retriever.method();
            if retriever.corpus_fingerprint() != corpus.fingerprint() {
                return Err(RegsearchError::FingerprintMismatch {
                    method,
                    expected: corpus.fingerprint().to_string(),
                    found: retriever.corpus_fingerprint().to_string(),
                });
            }
            if by_method.insert(method, Arc::new(retriever)).is_some() {
                return Err(RegsearchError::Config(format!(
                    "Retriever for {} supplied twice",
                    method
                )));
            }
        }

        if let Some(missing) = RetrievalMethod::ALL
            .iter()
            .find(|m| !by_method.contains_key(m))
        {
            return Err(RegsearchError::Config(format!(
                "Index generation has no {} retriever",
                missing
            )));
        }

        Ok(Self {
            corpus,
            retrievers: by_method,
            created_at: Utc::now(),
        })
    }

    pub fn corpus(&self) -> &Arc<Corpus> {
        &self.corpus
    }

    pub fn fingerprint(&self) -> &CorpusFingerprint {
        self.corpus.fingerprint()
    }

    pub fn retriever(&self, method: RetrievalMethod) -> Option<&Arc<MethodRetriever>> {
        self.retrievers.get(&method)
    }

    pub fn retrievers(&self) -> impl Iterator<Item = &Arc<MethodRetriever>> {
        self.retrievers.values()
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }
}

/// Holds the generation queries run against
pub struct IndexRegistry {
    current: RwLock<Arc<IndexGeneration>>,
    version: AtomicU64,
}

impl IndexRegistry {
    pub fn new(initial: IndexGeneration) -> Self {
        Self {
            current: RwLock::new(Arc::new(initial)),
            version: AtomicU64::new(1),
        }
    }

    /// Snapshot of the current generation
    pub async fn current(&self) -> Arc<IndexGeneration> {
        self.current.read().await.clone()
    }

    /// Replace the current generation, returning its version number
    pub async fn publish(&self, generation: IndexGeneration) -> u64 {
        let fingerprint = generation.fingerprint().clone();
        let mut current = self.current.write().await;
        *current = Arc::new(generation);
        let version = self.version.fetch_add(1, Ordering::SeqCst) + 1;
        tracing::info!("Published index generation {} ({})", version, fingerprint);
        version
    }

    pub fn version(&self) -> u64 {
        self.version.load(Ordering::SeqCst)
    }
}

/// Builds generations from a corpus, persists them, and loads them back
#[derive(Debug, Clone)]
pub struct IndexBuilder {
    analyzer: TermAnalyzer,
    tfidf: TfIdfParams,
    bm25: Bm25Params,
    bm25_filter: Bm25QualityFilter,
    batch_size: usize,
    artifacts_dir: PathBuf,
}

impl IndexBuilder {
    pub fn new(
        analyzer: TermAnalyzer,
        tfidf: TfIdfParams,
        bm25: Bm25Params,
        bm25_filter: Bm25QualityFilter,
        batch_size: usize,
        artifacts_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            analyzer,
            tfidf,
            bm25,
            bm25_filter,
            batch_size,
            artifacts_dir: artifacts_dir.into(),
        }
    }

    /// Builder settings from configuration, with `artifacts_dir` already expanded
    pub fn from_config(config: &Config, artifacts_dir: impl Into<PathBuf>) -> Self {
        Self::new(
            config.analysis.analyzer(),
            config.tfidf.clone(),
            config.bm25.params(),
            config.bm25.quality_filter(),
            config.embedding.batch_size,
            artifacts_dir,
        )
    }

    pub fn artifacts_dir(&self) -> &Path {
        &self.artifacts_dir
    }

    pub fn artifact_path(&self, method: RetrievalMethod) -> PathBuf {
        artifact_path(&self.artifacts_dir, method)
    }

    /// Build all three indices concurrently, one blocking task each
    ///
    /// The dense index needs `provider`. Without one, or when embedding the
    /// corpus fails, the lexical indices are still built and the dense
    /// method is marked unavailable.
    pub async fn build(
        &self,
        corpus: Arc<Corpus>,
        provider: Option<Arc<dyn EmbeddingProvider>>,
    ) -> Result<IndexGeneration> {
        tracing::info!("Building indices for corpus {}", corpus.fingerprint());

        let tfidf_task = {
            let corpus = Arc::clone(&corpus);
            let analyzer = self.analyzer.clone();
            let params = self.tfidf.clone();
            tokio::task::spawn_blocking(move || TfIdfIndex::build(&corpus, analyzer, params))
        };

        let bm25_task = {
            let corpus = Arc::clone(&corpus);
            let analyzer = self.analyzer.clone();
            let params = self.bm25.clone();
            let filter = self.bm25_filter.clone();
            tokio::task::spawn_blocking(move || Bm25Index::build(&corpus, analyzer, params, filter))
        };

        let dense_task = provider.clone().map(|provider| {
            let corpus = Arc::clone(&corpus);
            let batch_size = self.batch_size;
            tokio::task::spawn_blocking(move || {
                DenseIndex::build(&corpus, provider.as_ref(), batch_size)
            })
        });
        let dense_task = async move {
            match dense_task {
                Some(task) => Some(task.await),
                None => None,
            }
        };

        let (tfidf, bm25, dense) = tokio::join!(tfidf_task, bm25_task, dense_task);
        let tfidf = tfidf.map_err(|e| build_task_failed(RetrievalMethod::LexicalTf, e))?;
        let bm25 = bm25.map_err(|e| build_task_failed(RetrievalMethod::LexicalProb, e))?;

        let dense = match (provider, dense) {
            (Some(provider), Some(built)) => {
                let built = built
                    .map_err(|e| e.to_string())
                    .and_then(|index| index.map_err(|e| e.to_string()))
                    .and_then(|index| DenseRetriever::new(index, provider).map_err(|e| e.to_string()));
                match built {
                    Ok(dense) => dense,
                    Err(reason) => {
                        tracing::warn!("Dense index build failed, dense retrieval disabled: {}", reason);
                        DenseRetriever::not_built(
                            corpus.fingerprint().clone(),
                            format!("dense index build failed: {}", reason),
                        )
                    }
                }
            }
            _ => {
                tracing::warn!("No embedding model loaded, building lexical indices only");
                DenseRetriever::not_built(corpus.fingerprint().clone(), "embedding model not loaded")
            }
        };

        IndexGeneration::new(
            corpus,
            vec![
                MethodRetriever::LexicalTf(tfidf),
                MethodRetriever::LexicalProb(bm25),
                MethodRetriever::Dense(dense),
            ],
        )
    }

    /// Write one artifact per method
    ///
    /// A dense retriever without an index writes nothing and removes any
    /// dense artifact left from an earlier build.
    pub fn persist(&self, generation: &IndexGeneration) -> Result<()> {
        let fingerprint = generation.fingerprint().clone();

        for retriever in generation.retrievers() {
            let path = self.artifact_path(retriever.method());
            match retriever.as_ref() {
                MethodRetriever::LexicalTf(index) => {
                    let payload = index.payload().clone();
                    let parameters = parameters_json(&payload.params)?;
                    IndexArtifact::new(
                        RetrievalMethod::LexicalTf,
                        fingerprint.clone(),
                        parameters,
                        payload,
                    )
                    .save(&path)?;
                }
                MethodRetriever::LexicalProb(index) => {
                    let payload = index.payload().clone();
                    let parameters = parameters_json(&payload.params)?;
                    IndexArtifact::new(
                        RetrievalMethod::LexicalProb,
                        fingerprint.clone(),
                        parameters,
                        payload,
                    )
                    .save(&path)?;
                }
                MethodRetriever::Dense(dense) => match dense.index() {
                    Some(index) => {
                        let payload = index.to_payload();
                        let parameters = serde_json::json!({
                            "model": payload.model,
                            "dimension": payload.dimension,
                        });
                        IndexArtifact::new(
                            RetrievalMethod::Dense,
                            fingerprint.clone(),
                            parameters,
                            payload,
                        )
                        .save(&path)?;
                    }
                    None => remove_stale(&path)?,
                },
            }
        }
        Ok(())
    }

    /// Load persisted artifacts for `corpus`
    ///
    /// Missing lexical artifacts, corrupt artifacts, fingerprint mismatches
    /// and analyzer mismatches are configuration errors. A missing embedding
    /// provider or dense artifact only makes the dense method unavailable.
    pub fn load(
        &self,
        corpus: Arc<Corpus>,
        provider: Option<Arc<dyn EmbeddingProvider>>,
    ) -> Result<IndexGeneration> {
        let fingerprint = corpus.fingerprint();

        let tfidf_path = self.artifact_path(RetrievalMethod::LexicalTf);
        let tfidf: IndexArtifact<TfIdfPayload> =
            IndexArtifact::load(&tfidf_path, RetrievalMethod::LexicalTf, fingerprint)?;
        self.check_analyzer(RetrievalMethod::LexicalTf, &tfidf.payload.analyzer)?;
        let tfidf = TfIdfIndex::from_payload(tfidf.payload, self.analyzer.clone(), fingerprint.clone())
            .map_err(|e| corrupt_artifact(&tfidf_path, e))?;

        let bm25_path = self.artifact_path(RetrievalMethod::LexicalProb);
        let bm25: IndexArtifact<Bm25Payload> =
            IndexArtifact::load(&bm25_path, RetrievalMethod::LexicalProb, fingerprint)?;
        self.check_analyzer(RetrievalMethod::LexicalProb, &bm25.payload.analyzer)?;
        let bm25 = Bm25Index::from_payload(
            bm25.payload,
            self.analyzer.clone(),
            self.bm25_filter.clone(),
            fingerprint.clone(),
        )
        .map_err(|e| corrupt_artifact(&bm25_path, e))?;

        let dense = self.load_dense(fingerprint, provider)?;

        IndexGeneration::new(
            corpus,
            vec![
                MethodRetriever::LexicalTf(tfidf),
                MethodRetriever::LexicalProb(bm25),
                MethodRetriever::Dense(dense),
            ],
        )
    }

    /// A missing dense artifact only disables the dense method; a stale or
    /// corrupt one is still a configuration error
    fn load_dense(
        &self,
        fingerprint: &CorpusFingerprint,
        provider: Option<Arc<dyn EmbeddingProvider>>,
    ) -> Result<DenseRetriever> {
        let path = self.artifact_path(RetrievalMethod::Dense);
        let dense: IndexArtifact<DensePayload> =
            match IndexArtifact::load(&path, RetrievalMethod::Dense, fingerprint) {
                Ok(artifact) => artifact,
                Err(RegsearchError::ArtifactNotFound { .. }) => {
                    tracing::warn!(
                        "No dense index at {}, dense retrieval disabled",
                        path.display()
                    );
                    return Ok(DenseRetriever::not_built(
                        fingerprint.clone(),
                        "dense index not built",
                    ));
                }
                Err(e) => return Err(e),
            };
        let index = DenseIndex::from_payload(dense.payload, fingerprint.clone())
            .map_err(|e| corrupt_artifact(&path, e))?;

        match provider {
            Some(provider) => DenseRetriever::new(index, provider).map_err(|e| {
                RegsearchError::Config(format!("Embedding model does not fit dense index: {}", e))
            }),
            None => {
                tracing::warn!("No embedding model loaded, dense retrieval disabled");
                Ok(DenseRetriever::unavailable(index, "embedding model not loaded"))
            }
        }
    }

    fn check_analyzer(&self, method: RetrievalMethod, stored: &AnalyzerSettings) -> Result<()> {
        if stored != self.analyzer.settings() {
            return Err(RegsearchError::Config(format!(
                "{} index was built with different analyzer settings; rebuild the indices",
                method
            )));
        }
        Ok(())
    }
}

fn build_task_failed(method: RetrievalMethod, err: JoinError) -> RegsearchError {
    RegsearchError::Other(anyhow::anyhow!("{} build task failed: {}", method, err))
}

fn corrupt_artifact(path: &Path, err: impl std::fmt::Display) -> RegsearchError {
    RegsearchError::ArtifactFormat {
        path: path.to_path_buf(),
        message: err.to_string(),
    }
}

fn remove_stale(path: &Path) -> Result<()> {
    match std::fs::remove_file(path) {
        Ok(()) => {
            tracing::info!("Removed stale artifact {}", path.display());
            Ok(())
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(RegsearchError::io(
            e,
            format!("Failed to remove stale artifact: {}", path.display()),
        )),
    }
}

fn parameters_json<T: serde::Serialize>(params: &T) -> Result<serde_json::Value> {
    serde_json::to_value(params)
        .map_err(|e| RegsearchError::json(e, "Failed to encode index parameters"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::corpus::{Chunk, ChunkMetadata};
    use crate::embedding::EmbeddingError;
    use crate::retrieval::RetrieverError;
    use std::collections::BTreeMap as Map;
    use tempfile::TempDir;

    struct LengthEmbedder;

    impl EmbeddingProvider for LengthEmbedder {
        fn embed(&self, text: &str) -> std::result::Result<Vec<f32>, EmbeddingError> {
            Ok(vec![text.len() as f32, 1.0])
        }

        fn embed_batch(&self, texts: &[String]) -> std::result::Result<Vec<Vec<f32>>, EmbeddingError> {
            texts.iter().map(|t| self.embed(t)).collect()
        }

        fn dimension(&self) -> usize {
            2
        }

        fn model_name(&self) -> &str {
            "length"
        }
    }

    struct BrokenEmbedder;

    impl EmbeddingProvider for BrokenEmbedder {
        fn embed(&self, _text: &str) -> std::result::Result<Vec<f32>, EmbeddingError> {
            Err(EmbeddingError::GenerationError("runtime missing".to_string()))
        }

        fn embed_batch(&self, _texts: &[String]) -> std::result::Result<Vec<Vec<f32>>, EmbeddingError> {
            Err(EmbeddingError::GenerationError("runtime missing".to_string()))
        }

        fn dimension(&self) -> usize {
            2
        }

        fn model_name(&self) -> &str {
            "broken"
        }
    }

    fn corpus(texts: &[&str]) -> Arc<Corpus> {
        Arc::new(
            Corpus::new(
                texts
                    .iter()
                    .enumerate()
                    .map(|(i, t)| Chunk::new(format!("c{}", i), *t, ChunkMetadata::default()))
                    .collect(),
            )
            .unwrap(),
        )
    }

    fn builder(dir: &Path) -> IndexBuilder {
        IndexBuilder::new(
            TermAnalyzer::with_defaults(),
            TfIdfParams::default(),
            Bm25Params::default(),
            Bm25QualityFilter::default(),
            4,
            dir,
        )
    }

    #[tokio::test]
    async fn test_build_persist_load() {
        let temp = TempDir::new().unwrap();
        let builder = builder(temp.path());
        let corpus = corpus(&["escala de viáticos", "pasajes aéreos nacionales"]);

        let generation = builder
            .build(Arc::clone(&corpus), Some(Arc::new(LengthEmbedder)))
            .await
            .unwrap();
        builder.persist(&generation).unwrap();

        for method in RetrievalMethod::ALL {
            assert!(builder.artifact_path(method).exists());
        }

        let loaded = builder
            .load(Arc::clone(&corpus), Some(Arc::new(LengthEmbedder)))
            .unwrap();
        for method in RetrievalMethod::ALL {
            let original = generation.retriever(method).unwrap();
            let restored = loaded.retriever(method).unwrap();
            assert_eq!(
                original.query("pasajes", 5).unwrap(),
                restored.query("pasajes", 5).unwrap()
            );
        }
    }

    #[tokio::test]
    async fn test_load_against_other_corpus_fails() {
        let temp = TempDir::new().unwrap();
        let builder = builder(temp.path());

        let generation = builder
            .build(corpus(&["escala de viáticos"]), Some(Arc::new(LengthEmbedder)))
            .await
            .unwrap();
        builder.persist(&generation).unwrap();

        let err = builder
            .load(corpus(&["otra directiva"]), None)
            .unwrap_err();
        assert!(matches!(err, RegsearchError::FingerprintMismatch { .. }));
        assert!(err.is_configuration_error());
    }

    #[tokio::test]
    async fn test_analyzer_change_refused() {
        let temp = TempDir::new().unwrap();
        let corpus = corpus(&["escala de viáticos"]);

        let generation = builder(temp.path())
            .build(Arc::clone(&corpus), Some(Arc::new(LengthEmbedder)))
            .await
            .unwrap();
        builder(temp.path()).persist(&generation).unwrap();

        let unigram_only = IndexBuilder::new(
            TermAnalyzer::new(&[], 1, 40, &Map::new()),
            TfIdfParams::default(),
            Bm25Params::default(),
            Bm25QualityFilter::default(),
            4,
            temp.path(),
        );
        let err = unigram_only.load(corpus, None).unwrap_err();
        assert!(matches!(err, RegsearchError::Config(_)));
    }

    #[test]
    fn test_missing_artifact_is_configuration_error() {
        let temp = TempDir::new().unwrap();
        let err = builder(temp.path())
            .load(corpus(&["escala"]), None)
            .unwrap_err();
        assert!(matches!(err, RegsearchError::ArtifactNotFound { .. }));
    }

    #[test]
    fn test_generation_rejects_foreign_retriever() {
        let a = corpus(&["escala de viáticos"]);
        let b = corpus(&["pasajes"]);
        let tfidf = TfIdfIndex::build(&b, TermAnalyzer::with_defaults(), TfIdfParams::default());

        let err = IndexGeneration::new(a, vec![MethodRetriever::LexicalTf(tfidf)]).unwrap_err();
        assert!(matches!(
            err,
            RegsearchError::FingerprintMismatch {
                method: RetrievalMethod::LexicalTf,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_publish_swaps_without_touching_snapshots() {
        let temp = TempDir::new().unwrap();
        let builder = builder(temp.path());

        let first = builder
            .build(corpus(&["escala de viáticos"]), Some(Arc::new(LengthEmbedder)))
            .await
            .unwrap();
        let registry = IndexRegistry::new(first);
        let snapshot = registry.current().await;

        let second = builder
            .build(corpus(&["pasajes", "viáticos"]), Some(Arc::new(LengthEmbedder)))
            .await
            .unwrap();
        let version = registry.publish(second).await;

        assert_eq!(version, 2);
        assert_eq!(snapshot.corpus().len(), 1);
        assert_eq!(registry.current().await.corpus().len(), 2);
    }

    #[tokio::test]
    async fn test_failed_dense_build_keeps_lexical_methods() {
        let temp = TempDir::new().unwrap();
        let builder = builder(temp.path());
        let corpus = corpus(&["escala de viáticos", "pasajes aéreos nacionales"]);

        // Left over from an earlier build with a working model
        let earlier = builder
            .build(Arc::clone(&corpus), Some(Arc::new(LengthEmbedder)))
            .await
            .unwrap();
        builder.persist(&earlier).unwrap();
        assert!(builder.artifact_path(RetrievalMethod::Dense).exists());

        let generation = builder
            .build(Arc::clone(&corpus), Some(Arc::new(BrokenEmbedder)))
            .await
            .unwrap();
        let dense = generation.retriever(RetrievalMethod::Dense).unwrap();
        assert!(matches!(
            dense.query("viáticos", 5),
            Err(RetrieverError::EmbeddingUnavailable(_))
        ));
        let bm25 = generation.retriever(RetrievalMethod::LexicalProb).unwrap();
        assert_eq!(bm25.query("pasajes", 5).unwrap().candidates()[0].chunk_id, "c1");

        builder.persist(&generation).unwrap();
        assert!(builder.artifact_path(RetrievalMethod::LexicalTf).exists());
        assert!(builder.artifact_path(RetrievalMethod::LexicalProb).exists());
        assert!(!builder.artifact_path(RetrievalMethod::Dense).exists());

        let loaded = builder
            .load(Arc::clone(&corpus), Some(Arc::new(LengthEmbedder)))
            .unwrap();
        let tfidf = loaded.retriever(RetrievalMethod::LexicalTf).unwrap();
        assert_eq!(tfidf.query("viáticos", 5).unwrap().candidates()[0].chunk_id, "c0");
        assert!(matches!(
            loaded.retriever(RetrievalMethod::Dense).unwrap().query("viáticos", 5),
            Err(RetrieverError::EmbeddingUnavailable(_))
        ));
    }

    #[tokio::test]
    async fn test_build_without_model() {
        let temp = TempDir::new().unwrap();
        let builder = builder(temp.path());

        let generation = builder
            .build(corpus(&["escala de viáticos"]), None)
            .await
            .unwrap();
        builder.persist(&generation).unwrap();

        let loaded = builder.load(corpus(&["escala de viáticos"]), None).unwrap();
        let outcome = loaded
            .retriever(RetrievalMethod::LexicalProb)
            .unwrap()
            .query("viáticos", 5)
            .unwrap();
        assert_eq!(outcome.candidates().len(), 1);
    }

    #[tokio::test]
    async fn test_inconsistent_lexical_artifact_refused_at_load() {
        let temp = TempDir::new().unwrap();
        let builder = builder(temp.path());
        let corpus = corpus(&["viático por comisión", "S/ 320.00 soles para funcionarios"]);

        let generation = builder
            .build(Arc::clone(&corpus), Some(Arc::new(LengthEmbedder)))
            .await
            .unwrap();
        builder.persist(&generation).unwrap();

        let path = builder.artifact_path(RetrievalMethod::LexicalProb);
        let mut artifact: IndexArtifact<Bm25Payload> =
            IndexArtifact::load(&path, RetrievalMethod::LexicalProb, corpus.fingerprint()).unwrap();
        artifact.payload.doc_lengths.pop();
        artifact.save(&path).unwrap();

        let err = builder
            .load(Arc::clone(&corpus), Some(Arc::new(LengthEmbedder)))
            .unwrap_err();
        assert!(matches!(err, RegsearchError::ArtifactFormat { .. }));
        assert!(err.is_configuration_error());
    }
}
