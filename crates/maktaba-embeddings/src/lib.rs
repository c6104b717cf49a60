//! Embedding backends for chunks and queries.
//!
//! Dense vectors come from a remote BGE-M3 inference endpoint behind
//! the [`DenseEmbedder`] trait; alternative backends (a process-local
//! model) plug in at the same seam. Sparse vectors for documents are
//! BM25, fitted per book on the book's own chunk set; sparse vectors
//! for queries come back from the remote endpoint alongside the dense
//! side, because a query cannot be scored against a single book's
//! fitted vocabulary.

mod bm25;
mod remote;

use async_trait::async_trait;
use maktaba::config::env_vars::{EMBEDDINGS_API_KEY, EMBEDDINGS_API_URL};
use maktaba::config::{env_required, env_string};
use maktaba::Result;

pub use bm25::Bm25Encoder;
pub use remote::{RemoteEmbedder, DEFAULT_EMBEDDINGS_API_URL};

/// Batch progress callback: called with the total number of texts
/// embedded so far after every batch.
pub type ProgressFn<'a> = dyn Fn(usize) + Send + Sync + 'a;

/// A dense embedding backend.
#[async_trait]
pub trait DenseEmbedder: Send + Sync {
    /// Embed many texts, reporting progress per batch.
    async fn embed(&self, texts: &[String], progress: Option<&ProgressFn<'_>>)
        -> Result<Vec<Vec<f32>>>;
}

/// Build the configured dense embedder from the environment.
pub fn embedder_from_env() -> Result<RemoteEmbedder> {
    let api_key = env_required(EMBEDDINGS_API_KEY)?;
    let api_url =
        env_string(EMBEDDINGS_API_URL).unwrap_or_else(|| DEFAULT_EMBEDDINGS_API_URL.to_string());
    Ok(RemoteEmbedder::new(api_url, api_key))
}
