//! Regsearch - Hybrid retrieval over regulatory document chunks
//!
//! Builds three independent indices over a chunk corpus (TF-IDF, BM25 and
//! dense embeddings), queries them in parallel, normalizes and fuses their
//! rankings, and applies data-driven boost rules before returning ranked
//! passages with per-method provenance.

pub mod analysis;
pub mod artifact;
pub mod cli;
pub mod config;
pub mod corpus;
pub mod embedding;
pub mod error;
pub mod lexical;
pub mod patterns;
pub mod retrieval;

pub use error::{RegsearchError, Result};
