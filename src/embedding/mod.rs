//! Dense semantic retrieval
//!
//! - [`EmbeddingProvider`]: the external model as a black-box `text -> vector`
//! - [`FastEmbedProvider`]: local multilingual sentence embeddings
//! - [`DenseIndex`]: exact cosine search over an L2-normalized matrix

mod dense_index;
mod provider;

pub use dense_index::{DenseIndex, DenseIndexError, DensePayload};
pub use provider::{EmbeddingError, EmbeddingProvider, FastEmbedProvider};
