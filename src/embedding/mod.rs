//! Paper embeddings.
//!
//! Papers and user profiles live in the same vector space, so everything the
//! ranking pipeline compares goes through an [`EmbeddingProvider`]:
//!
//! | `[embedding].provider` | Provider |
//! |------------------------|----------|
//! | `disabled` | [`DisabledProvider`] (every call fails) |
//! | `openai` | [`remote::OpenAIProvider`], any OpenAI-compatible `/embeddings` API |
//! | `ollama` | [`remote::OllamaProvider`], `POST /api/embed` |
//! | `local` | `local::LocalProvider`, fastembed in-process (feature `local-embeddings`) |
//!
//! Vectors are stored as little-endian `f32` BLOBs ([`vec_to_blob`],
//! [`blob_to_vec`]) and compared with [`cosine_similarity`].
//!
//! ```rust
//! # use paper_feed::config::EmbeddingConfig;
//! # use paper_feed::embedding::{create_provider, EmbeddingProvider};
//! let provider = create_provider(&EmbeddingConfig::default()).unwrap();
//! assert_eq!(provider.model_name(), "disabled");
//! ```

#[cfg(feature = "local-embeddings")]
pub mod local;
pub mod remote;

use anyhow::{bail, Result};
use async_trait::async_trait;

use crate::config::EmbeddingConfig;

/// A source of text embeddings.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Model identifier stored next to every vector, e.g. `text-embedding-3-small`.
    fn model_name(&self) -> &str;
    fn dims(&self) -> usize;
    /// One vector per input, in input order.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;
}

pub struct DisabledProvider;

#[async_trait]
impl EmbeddingProvider for DisabledProvider {
    fn model_name(&self) -> &str {
        "disabled"
    }
    fn dims(&self) -> usize {
        0
    }
    async fn embed_batch(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>> {
        bail!("Embedding provider is disabled")
    }
}

pub fn create_provider(config: &EmbeddingConfig) -> Result<Box<dyn EmbeddingProvider>> {
    Ok(match config.provider.as_str() {
        "disabled" => Box::new(DisabledProvider),
        "openai" => Box::new(remote::OpenAIProvider::new(config)?),
        "ollama" => Box::new(remote::OllamaProvider::new(config)?),
        #[cfg(feature = "local-embeddings")]
        "local" => Box::new(local::LocalProvider::new(config)?),
        #[cfg(not(feature = "local-embeddings"))]
        "local" => bail!("Local embedding provider requires --features local-embeddings"),
        other => bail!("Unknown embedding provider: {}", other),
    })
}

/// Little-endian `f32` bytes.
///
/// ```rust
/// use paper_feed::embedding::{blob_to_vec, vec_to_blob};
///
/// let v = vec![0.25f32, -1.0];
/// assert_eq!(vec_to_blob(&v).len(), 8);
/// assert_eq!(blob_to_vec(&vec_to_blob(&v)), v);
/// ```
pub fn vec_to_blob(vec: &[f32]) -> Vec<u8> {
    vec.iter().flat_map(|v| v.to_le_bytes()).collect()
}

/// Inverse of [`vec_to_blob`]; trailing bytes that do not form a full
/// `f32` are ignored.
pub fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect()
}

pub fn norm(v: &[f32]) -> f32 {
    v.iter().map(|x| x * x).sum::<f32>().sqrt()
}

/// Unit-length copy of `v`, or `None` when `v` is (near) zero.
pub fn normalize(v: &[f32]) -> Option<Vec<f32>> {
    let n = norm(v);
    (n >= f32::EPSILON).then(|| v.iter().map(|x| x / n).collect())
}

/// Cosine of the angle between `a` and `b`, in `[-1, 1]`.
///
/// Mismatched lengths, empty input and zero vectors all score `0.0`, so a
/// paper embedded with another model never outranks a real match.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.is_empty() || a.len() != b.len() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let denom = norm(a) * norm(b);
    if denom < f32::EPSILON {
        0.0
    } else {
        dot / denom
    }
}
