//! Persisted index artifacts
//!
//! One file per retrieval method: an 8-byte magic tag followed by a
//! zstd-compressed JSON document `{ header, payload }`. The header is
//! validated (format version, method, corpus fingerprint) before the
//! payload is decoded, so a stale or foreign artifact is refused at load
//! instead of producing wrong rankings.

use crate::corpus::CorpusFingerprint;
use crate::error::{RegsearchError, Result};
use crate::retrieval::RetrievalMethod;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Bumped whenever a payload layout changes
pub const ARTIFACT_FORMAT_VERSION: u32 = 1;

const MAGIC: &[u8; 8] = b"RGSIDX\0\x01";
const COMPRESSION_LEVEL: i32 = 3;

/// Self-describing artifact metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtifactHeader {
    pub format_version: u32,
    pub method: RetrievalMethod,
    pub built_at: DateTime<Utc>,
    pub corpus: CorpusFingerprint,
    /// Build parameters, for inspection
    pub parameters: serde_json::Value,
    pub generator: String,
}

/// Header plus method-specific payload
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexArtifact<P> {
    pub header: ArtifactHeader,
    pub payload: P,
}

#[derive(Deserialize)]
struct RawArtifact {
    header: ArtifactHeader,
    payload: serde_json::Value,
}

/// Conventional artifact location for a method inside `dir`
pub fn artifact_path(dir: &Path, method: RetrievalMethod) -> PathBuf {
    dir.join(format!("{}.idx", method.as_str()))
}

impl<P: Serialize + DeserializeOwned> IndexArtifact<P> {
    pub fn new(
        method: RetrievalMethod,
        corpus: CorpusFingerprint,
        parameters: serde_json::Value,
        payload: P,
    ) -> Self {
        Self {
            header: ArtifactHeader {
                format_version: ARTIFACT_FORMAT_VERSION,
                method,
                built_at: Utc::now(),
                corpus,
                parameters,
                generator: format!("regsearch {}", env!("CARGO_PKG_VERSION")),
            },
            payload,
        }
    }

    /// Write atomically (temp file + rename)
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| {
                RegsearchError::io(
                    e,
                    format!("Failed to create artifact directory: {}", parent.display()),
                )
            })?;
        }

        let json = serde_json::to_vec(self).map_err(|e| {
            RegsearchError::json(e, format!("Failed to encode {} artifact", self.header.method))
        })?;
        let compressed = zstd::encode_all(json.as_slice(), COMPRESSION_LEVEL)
            .map_err(|e| RegsearchError::io(e, "Failed to compress artifact"))?;

        let mut bytes = Vec::with_capacity(MAGIC.len() + compressed.len());
        bytes.extend_from_slice(MAGIC);
        bytes.extend_from_slice(&compressed);

        let temp_path = path.with_extension("idx.tmp");
        fs::write(&temp_path, &bytes).map_err(|e| {
            RegsearchError::io(e, format!("Failed to write artifact: {}", temp_path.display()))
        })?;
        fs::rename(&temp_path, path).map_err(|e| {
            RegsearchError::io(e, format!("Failed to publish artifact: {}", path.display()))
        })?;

        tracing::info!(
            "Saved {} artifact to {} ({} bytes)",
            self.header.method,
            path.display(),
            bytes.len()
        );
        Ok(())
    }

    /// Load and validate against the method and corpus it must belong to
    pub fn load(path: &Path, method: RetrievalMethod, corpus: &CorpusFingerprint) -> Result<Self> {
        let raw = read_raw(path, method)?;
        let header = raw.header;

        if header.method != method {
            return Err(RegsearchError::ArtifactFormat {
                path: path.to_path_buf(),
                message: format!("expected a {} index, found {}", method, header.method),
            });
        }

        if &header.corpus != corpus {
            return Err(RegsearchError::FingerprintMismatch {
                method,
                expected: corpus.to_string(),
                found: header.corpus.to_string(),
            });
        }

        let payload: P =
            serde_json::from_value(raw.payload).map_err(|e| RegsearchError::ArtifactFormat {
                path: path.to_path_buf(),
                message: format!("payload does not decode: {}", e),
            })?;

        tracing::info!(
            "Loaded {} artifact built {} ({})",
            method,
            header.built_at.to_rfc3339(),
            header.corpus
        );

        Ok(Self { header, payload })
    }
}

/// Read only the header, for inspection
pub fn read_header(path: &Path, method: RetrievalMethod) -> Result<ArtifactHeader> {
    read_raw(path, method).map(|raw| raw.header)
}

fn read_raw(path: &Path, method: RetrievalMethod) -> Result<RawArtifact> {
    if !path.exists() {
        return Err(RegsearchError::ArtifactNotFound {
            method,
            path: path.to_path_buf(),
        });
    }

    let format_error = |message: String| RegsearchError::ArtifactFormat {
        path: path.to_path_buf(),
        message,
    };

    let bytes = fs::read(path).map_err(|e| {
        RegsearchError::io(e, format!("Failed to read artifact: {}", path.display()))
    })?;

    let body = bytes
        .strip_prefix(MAGIC.as_slice())
        .ok_or_else(|| format_error("missing artifact magic".to_string()))?;

    let json = zstd::decode_all(body).map_err(|e| format_error(format!("bad compression: {}", e)))?;

    let raw: RawArtifact =
        serde_json::from_slice(&json).map_err(|e| format_error(format!("bad header: {}", e)))?;

    if raw.header.format_version != ARTIFACT_FORMAT_VERSION {
        return Err(format_error(format!(
            "format version {} is not supported (expected {})",
            raw.header.format_version, ARTIFACT_FORMAT_VERSION
        )));
    }

    Ok(raw)
}
