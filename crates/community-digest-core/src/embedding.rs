//! Embedding capability trait and vector serialization helpers.
//!
//! Concrete providers (OpenAI, Ollama) live in the `community-digest`
//! application crate; this crate only defines the seam and the BLOB
//! encoding shared by every store.

use anyhow::Result;
use async_trait::async_trait;

/// An embedding backend.
///
/// `embed` returns one vector per input text, in input order. Pacing is the
/// caller's job: the sync writer invokes `embed` once per write batch.
///
/// A provider reporting `dims() == 0` makes no external call and returns
/// empty vectors; rows are then stored without an embedding.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Model identifier recorded on every persisted row.
    fn model_name(&self) -> &str;
    fn dims(&self) -> usize;
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;
}

#[async_trait]
impl<E: EmbeddingProvider + ?Sized> EmbeddingProvider for std::sync::Arc<E> {
    fn model_name(&self) -> &str {
        (**self).model_name()
    }
    fn dims(&self) -> usize {
        (**self).dims()
    }
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        (**self).embed(texts).await
    }
}

/// Encode a float vector as little-endian `f32` bytes.
///
/// ```rust
/// use community_digest_core::embedding::{blob_to_vec, vec_to_blob};
///
/// let v = vec![1.0f32, -2.5, 3.125];
/// assert_eq!(vec_to_blob(&v).len(), 12);
/// assert_eq!(blob_to_vec(&vec_to_blob(&v)), v);
/// ```
pub fn vec_to_blob(vec: &[f32]) -> Vec<u8> {
    vec.iter().flat_map(|v| v.to_le_bytes()).collect()
}

/// Decode a BLOB written by [`vec_to_blob`]. Trailing partial words are ignored.
pub fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|w| f32::from_le_bytes([w[0], w[1], w[2], w[3]]))
        .collect()
}
