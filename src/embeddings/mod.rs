// Embeddings module
// Text chunking, the embedding provider seam and the dimension-checking embedder

#[cfg(test)]
mod tests;

pub mod chunking;
pub mod ollama;

use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

use crate::{RagError, Result};

pub use chunking::{ChunkingConfig, TextChunk, chunk_text, split_text};
pub use ollama::OllamaClient;

/// External capability that turns texts into vectors.
///
/// Implementations must preserve input order and must not retry on failure;
/// errors are surfaced as [`RagError::EmbeddingProvider`].
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Embed every text in one provider call
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    /// Name of the embedding model, for logging
    fn model_name(&self) -> &str;
}

/// Validating front for an [`EmbeddingProvider`].
///
/// Splits large inputs into provider calls of at most `batch_size` texts and
/// checks that every call returns one vector of exactly `dimension` values per text.
#[derive(Clone)]
pub struct Embedder {
    provider: Arc<dyn EmbeddingProvider>,
    dimension: usize,
    batch_size: usize,
}

impl std::fmt::Debug for Embedder {
    #[inline]
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Embedder")
            .field("model", &self.provider.model_name())
            .field("dimension", &self.dimension)
            .field("batch_size", &self.batch_size)
            .finish()
    }
}

impl Embedder {
    #[inline]
    pub fn new(provider: Arc<dyn EmbeddingProvider>, dimension: usize, batch_size: usize) -> Self {
        Self {
            provider,
            dimension,
            batch_size: batch_size.max(1),
        }
    }

    #[inline]
    pub fn dimension(&self) -> usize {
        self.dimension
    }

    #[inline]
    pub fn model_name(&self) -> &str {
        self.provider.model_name()
    }

    /// Embed many texts, preserving order. Used during ingestion.
    #[inline]
    pub async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        debug!(
            "Embedding {} texts with {} in batches of {}",
            texts.len(),
            self.provider.model_name(),
            self.batch_size
        );

        let mut vectors = Vec::with_capacity(texts.len());
        for batch in texts.chunks(self.batch_size) {
            let embeddings = self.provider.embed(batch).await?;
            self.check_batch(batch.len(), &embeddings)?;
            vectors.extend(embeddings);
        }

        Ok(vectors)
    }

    /// Embed a single text. Used at query time.
    #[inline]
    pub async fn embed_one(&self, text: &str) -> Result<Vec<f32>> {
        let mut vectors = self.embed_batch(&[text.to_string()]).await?;
        vectors.pop().ok_or(RagError::EmbeddingCountMismatch {
            expected: 1,
            actual: 0,
        })
    }

    fn check_batch(&self, expected: usize, embeddings: &[Vec<f32>]) -> Result<()> {
        if embeddings.len() != expected {
            return Err(RagError::EmbeddingCountMismatch {
                expected,
                actual: embeddings.len(),
            });
        }

        if let Some(bad) = embeddings.iter().find(|v| v.len() != self.dimension) {
            return Err(RagError::EmbeddingDimensionMismatch {
                expected: self.dimension,
                actual: bad.len(),
            });
        }

        Ok(())
    }
}
