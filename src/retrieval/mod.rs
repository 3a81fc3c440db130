#[cfg(test)]
mod tests;

use serde::Serialize;
use tracing::debug;

use crate::attributes::{AttributeValue, Attributes};
use crate::database::vector_index::{ScoredChunk, VectorIndex};
use crate::embeddings::Embedder;
use crate::{RagError, Result};

pub const DEFAULT_TOP_K: usize = 4;

/// A chunk returned for a query, with the attributes used to cite it
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RetrievedChunk {
    pub text: String,
    /// The chunk's stored attributes plus `source_id` and `chunk_index`
    pub attributes: Attributes,
    pub distance: f32,
}

impl From<ScoredChunk> for RetrievedChunk {
    #[inline]
    fn from(scored: ScoredChunk) -> Self {
        let ScoredChunk { chunk, distance } = scored;
        let mut attributes = chunk.attributes;
        attributes.insert(
            "source_id".to_string(),
            AttributeValue::from(chunk.source_id),
        );
        attributes.insert(
            "chunk_index".to_string(),
            AttributeValue::from(chunk.chunk_index),
        );

        Self {
            text: chunk.content,
            attributes,
            distance,
        }
    }
}

/// Embeds queries and looks up their nearest chunks
#[derive(Debug, Clone)]
pub struct Retriever {
    embedder: Embedder,
    index: VectorIndex,
    default_k: usize,
}

impl Retriever {
    #[inline]
    pub fn new(embedder: Embedder, index: VectorIndex) -> Self {
        Self {
            embedder,
            index,
            default_k: DEFAULT_TOP_K,
        }
    }

    #[inline]
    pub fn with_default_k(mut self, k: usize) -> Self {
        self.default_k = k;
        self
    }

    /// Retrieve the default number of chunks for `query`
    #[inline]
    pub async fn retrieve(&self, query: &str) -> Result<Vec<RetrievedChunk>> {
        self.retrieve_k(query, self.default_k).await
    }

    /// Retrieve up to `k` chunks for `query`, nearest first
    #[inline]
    pub async fn retrieve_k(&self, query: &str, k: usize) -> Result<Vec<RetrievedChunk>> {
        if k == 0 {
            return Err(RagError::InvalidArgument(
                "k must be greater than zero".to_string(),
            ));
        }

        let query_vector = self.embedder.embed_one(query).await?;
        let results = self.index.nearest(&query_vector, k).await?;

        debug!("Retrieved {} chunks for query (k = {})", results.len(), k);
        Ok(results.into_iter().map(RetrievedChunk::from).collect())
    }
}
