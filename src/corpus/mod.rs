//! Chunk corpus produced by the ingestion pipeline
//!
//! The corpus is an ordered, immutable list of passages. Every index built
//! from it records the corpus fingerprint so that a later load can detect
//! that it is being paired with a different chunk set.

use crate::error::{RegsearchError, Result};
use ahash::{HashMap, HashMapExt};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

/// Source location of a chunk
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkMetadata {
    /// Originating document (file name or title)
    #[serde(default)]
    pub source: String,

    /// Page number within the source, when known
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page: Option<u32>,

    /// Section heading the chunk belongs to, when known
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub section: Option<String>,
}

/// A retrievable passage
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    pub id: String,
    #[serde(alias = "content")]
    pub text: String,
    #[serde(default)]
    pub metadata: ChunkMetadata,
}

impl Chunk {
    pub fn new(id: impl Into<String>, text: impl Into<String>, metadata: ChunkMetadata) -> Self {
        Self {
            id: id.into(),
            text: text.into(),
            metadata,
        }
    }
}

/// Identity of a chunk set: count plus a BLAKE3 digest over ids, texts and metadata
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CorpusFingerprint {
    pub chunk_count: usize,
    pub checksum: String,
}

impl fmt::Display for CorpusFingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let short = self.checksum.get(..12).unwrap_or(&self.checksum);
        write!(f, "{} chunks/{}", self.chunk_count, short)
    }
}

/// Ordered, immutable chunk collection
#[derive(Debug, Clone)]
pub struct Corpus {
    chunks: Vec<Chunk>,
    positions: HashMap<String, usize>,
    fingerprint: CorpusFingerprint,
}

impl Corpus {
    /// Build a corpus, rejecting duplicate chunk ids
    pub fn new(chunks: Vec<Chunk>) -> Result<Self> {
        let mut positions = HashMap::with_capacity(chunks.len());
        for (idx, chunk) in chunks.iter().enumerate() {
            if chunk.id.is_empty() {
                return Err(RegsearchError::Corpus(format!(
                    "Chunk at position {} has an empty id",
                    idx
                )));
            }
            if positions.insert(chunk.id.clone(), idx).is_some() {
                return Err(RegsearchError::Corpus(format!(
                    "Duplicate chunk id: {}",
                    chunk.id
                )));
            }
        }

        let fingerprint = Self::compute_fingerprint(&chunks);

        Ok(Self {
            chunks,
            positions,
            fingerprint,
        })
    }

    pub fn empty() -> Self {
        Self {
            chunks: Vec::new(),
            positions: HashMap::new(),
            fingerprint: Self::compute_fingerprint(&[]),
        }
    }

    /// Load chunks from a JSON array or JSON Lines file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            RegsearchError::io(e, format!("Failed to read corpus file: {}", path.display()))
        })?;

        let chunks = Self::parse(&content)
            .map_err(|e| RegsearchError::json(e, format!("Invalid corpus file {}", path.display())))?;

        let corpus = Self::new(chunks)?;
        tracing::info!(
            "Loaded corpus from {} ({})",
            path.display(),
            corpus.fingerprint
        );
        Ok(corpus)
    }

    fn parse(content: &str) -> std::result::Result<Vec<Chunk>, serde_json::Error> {
        let trimmed = content.trim_start();
        if trimmed.is_empty() {
            return Ok(Vec::new());
        }
        if trimmed.starts_with('[') {
            return serde_json::from_str(trimmed);
        }

        content
            .lines()
            .filter(|line| !line.trim().is_empty())
            .map(serde_json::from_str)
            .collect()
    }

    fn compute_fingerprint(chunks: &[Chunk]) -> CorpusFingerprint {
        let mut hasher = blake3::Hasher::new();
        for chunk in chunks {
            hasher.update(chunk.id.as_bytes());
            hasher.update(&[0]);
            hasher.update(chunk.text.as_bytes());
            hasher.update(&[0]);
            hasher.update(chunk.metadata.source.as_bytes());
            hasher.update(&[0]);
            if let Some(page) = chunk.metadata.page {
                hasher.update(&page.to_le_bytes());
            }
            hasher.update(&[0]);
            if let Some(section) = &chunk.metadata.section {
                hasher.update(section.as_bytes());
            }
            hasher.update(&[0xff]);
        }

        CorpusFingerprint {
            chunk_count: chunks.len(),
            checksum: hasher.finalize().to_hex().to_string(),
        }
    }

    pub fn fingerprint(&self) -> &CorpusFingerprint {
        &self.fingerprint
    }

    pub fn chunks(&self) -> &[Chunk] {
        &self.chunks
    }

    pub fn get(&self, id: &str) -> Option<&Chunk> {
        self.positions.get(id).map(|&idx| &self.chunks[idx])
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }
}
