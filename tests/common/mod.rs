//! Shared fixtures for the integration tests
#![allow(dead_code)]

use regsearch::config::Config;
use regsearch::corpus::{Chunk, ChunkMetadata, Corpus};
use regsearch::embedding::{EmbeddingError, EmbeddingProvider};
use regsearch::retrieval::{
    HybridSearcher, IndexBuilder, IndexGeneration, IndexRegistry, QualityBooster, SearchSettings,
};
use std::path::Path;
use std::sync::Arc;

pub const HASHING_DIMENSION: usize = 64;

/// Deterministic bag-of-words embedder: each lowercased word is hashed into
/// one bucket, plus a constant bias component so no text embeds to zero
pub struct HashingEmbedder {
    dimension: usize,
}

impl HashingEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self { dimension }
    }
}

impl EmbeddingProvider for HashingEmbedder {
    fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let mut vector = vec![0.0f32; self.dimension];
        vector[0] = 1.0;
        for word in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
        {
            let hash = blake3::hash(word.to_lowercase().as_bytes());
            let bytes = hash.as_bytes();
            let bucket = u64::from_le_bytes([
                bytes[0], bytes[1], bytes[2], bytes[3], bytes[4], bytes[5], bytes[6], bytes[7],
            ]);
            let index = 1 + (bucket % (self.dimension as u64 - 1)) as usize;
            vector[index] += 1.0;
        }
        Ok(vector)
    }

    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        texts.iter().map(|t| self.embed(t)).collect()
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn model_name(&self) -> &str {
        "hashing-test"
    }
}

/// Loads fine but cannot embed anything, like a model whose runtime is gone
pub struct FailingEmbedder;

impl EmbeddingProvider for FailingEmbedder {
    fn embed(&self, _text: &str) -> Result<Vec<f32>, EmbeddingError> {
        Err(EmbeddingError::GenerationError("onnx runtime unavailable".to_string()))
    }

    fn embed_batch(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        Err(EmbeddingError::GenerationError("onnx runtime unavailable".to_string()))
    }

    fn dimension(&self) -> usize {
        HASHING_DIMENSION
    }

    fn model_name(&self) -> &str {
        "failing-test"
    }
}

pub fn embedder() -> Arc<dyn EmbeddingProvider> {
    Arc::new(HashingEmbedder::new(HASHING_DIMENSION))
}

pub fn chunk(id: &str, text: &str, source: &str, page: u32) -> Chunk {
    Chunk::new(
        id,
        text,
        ChunkMetadata {
            source: source.to_string(),
            page: Some(page),
            section: None,
        },
    )
}

/// A small travel-expense directive split into passages
pub fn directive_corpus() -> Corpus {
    Corpus::new(vec![
        chunk(
            "dir-001",
            "Objeto: la presente directiva regula el otorgamiento de viáticos y pasajes \
             para comisiones de servicio dentro del territorio nacional.",
            "directiva_viaticos.pdf",
            1,
        ),
        chunk(
            "dir-002",
            "Artículo 5. La escala de viáticos fija un monto máximo de S/ 320.00 soles \
             por día para funcionarios y directivos.",
            "directiva_viaticos.pdf",
            3,
        ),
        chunk(
            "dir-003",
            "Para servidores sin cargo directivo el tope diario de viáticos es de \
             S/ 230.00 soles, incluyendo alimentación y hospedaje.",
            "directiva_viaticos.pdf",
            3,
        ),
        chunk(
            "dir-004",
            "La rendición de cuentas se presenta en un plazo de diez días hábiles \
             contados desde la culminación de la comisión de servicio.",
            "directiva_viaticos.pdf",
            5,
        ),
        chunk(
            "dir-005",
            "Los pasajes aéreos se adquieren en clase económica. El boleto debe \
             emitirse con una anticipación no menor de tres días.",
            "directiva_viaticos.pdf",
            6,
        ),
        chunk(
            "dir-006",
            "Numeral 7.2: la devolución de saldos no utilizados se efectúa mediante \
             depósito en la cuenta de la entidad.",
            "directiva_viaticos.pdf",
            7,
        ),
        chunk("dir-007", "Anexo 2", "directiva_viaticos.pdf", 9),
    ])
    .unwrap()
}

/// Default configuration with artifacts written under `dir`
pub fn test_config(dir: &Path) -> Config {
    let mut config = Config::default();
    config.corpus.path = dir.join("chunks.jsonl");
    config.artifacts.dir = dir.join("indexes");
    config
}

/// Build (and persist) a generation for `corpus` with the hashing embedder
pub async fn build_generation(config: &Config, corpus: Corpus) -> IndexGeneration {
    let builder = IndexBuilder::from_config(config, &config.artifacts.dir);
    let generation = builder
        .build(Arc::new(corpus), Some(embedder()))
        .await
        .expect("build generation");
    builder.persist(&generation).expect("persist generation");
    generation
}

pub fn searcher(config: &Config, generation: IndexGeneration) -> HybridSearcher {
    HybridSearcher::new(
        Arc::new(IndexRegistry::new(generation)),
        QualityBooster::from_config(&config.boosting).expect("boost rules"),
        SearchSettings::from_config(config).expect("search settings"),
    )
}

/// Searcher whose dense retriever has no model: artifacts are built and
/// persisted, then reloaded without an embedding provider
pub async fn searcher_without_model(config: &Config, corpus: Corpus) -> HybridSearcher {
    let corpus = Arc::new(corpus);
    let builder = IndexBuilder::from_config(config, &config.artifacts.dir);
    let built = builder
        .build(Arc::clone(&corpus), Some(embedder()))
        .await
        .expect("build generation");
    builder.persist(&built).expect("persist generation");
    let generation = builder.load(corpus, None).expect("load generation");
    searcher(config, generation)
}
