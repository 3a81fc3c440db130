// Vector index over the active generation
// Exact cosine k-nearest search, staged writes and the atomic generation swap


use futures::TryStreamExt;
use tracing::{debug, info, warn};

use crate::attributes::Attributes;
use crate::database::sqlite::Database;
use crate::database::sqlite::models::{
    ChunkRow, DistanceMetric, Generation, IndexStatistics, NewChunk, NewDocument,
};
use crate::database::sqlite::queries::{ChunkQueries, DocumentQueries, GenerationQueries};
use crate::{RagError, Result};

/// Seconds without a heartbeat after which a staging generation is treated as abandoned
pub const STALE_GENERATION_SECONDS: i64 = 120;

/// A chunk read back from the active generation
#[derive(Debug, Clone, PartialEq)]
pub struct StoredChunk {
    pub id: i64,
    pub document_id: i64,
    pub source_id: String,
    pub chunk_index: i64,
    pub content: String,
    pub embedding: Vec<f32>,
    pub attributes: Attributes,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScoredChunk {
    pub chunk: StoredChunk,
    /// Cosine distance to the query vector, `1 - cosine_similarity`
    pub distance: f32,
}

/// Persistent chunk vectors with similarity search.
///
/// All writes go into a staging generation that becomes visible to readers only once
/// [`VectorIndex::commit_generation`] swaps it in.
#[derive(Debug, Clone)]
pub struct VectorIndex {
    database: Database,
    dimension: usize,
    metric: DistanceMetric,
}

impl VectorIndex {
    #[inline]
    pub fn new(database: Database, dimension: usize) -> Self {
        Self {
            database,
            dimension,
            metric: DistanceMetric::Cosine,
        }
    }

    #[inline]
    pub fn dimension(&self) -> usize {
        self.dimension
    }

    #[inline]
    pub fn database(&self) -> &Database {
        &self.database
    }

    /// Open a staging generation for a new sync run.
    ///
    /// An abandoned staging generation is failed first and every failed generation is
    /// purged. A live staging generation yields [`RagError::SyncInProgress`].
    #[inline]
    pub async fn begin_generation(&self) -> Result<Generation> {
        let pool = self.database.pool();

        if let Some(staging) = GenerationQueries::get_staging(pool).await? {
            if !staging.is_stale(STALE_GENERATION_SECONDS) {
                return Err(RagError::SyncInProgress);
            }
            warn!(
                "Staging generation {} has not reported for over {} seconds, marking it failed",
                staging.id, STALE_GENERATION_SECONDS
            );
            GenerationQueries::mark_failed(pool, staging.id, "abandoned: heartbeat expired")
                .await?;
        }

        let purged = GenerationQueries::purge_failed(pool).await?;
        if purged > 0 {
            debug!("Purged {} failed generations", purged);
        }

        let generation =
            GenerationQueries::create_staging(pool, self.dimension as i64, self.metric).await?;
        info!(
            "Started staging generation {} (dimension {}, metric {})",
            generation.id, self.dimension, self.metric
        );
        Ok(generation)
    }

    /// Write one document and all of its chunks into a staging generation, atomically
    #[inline]
    pub async fn stage_document(
        &self,
        generation_id: i64,
        document: &NewDocument,
        chunks: &[NewChunk],
    ) -> Result<i64> {
        self.validate_chunks(chunks)?;

        let mut transaction = self.database.pool().begin().await?;

        let document_id = DocumentQueries::insert(&mut *transaction, generation_id, document).await?;
        for chunk in chunks {
            ChunkQueries::insert(&mut *transaction, document_id, chunk).await?;
        }

        transaction.commit().await?;

        debug!(
            "Staged document {} with {} chunks into generation {}",
            document.source_id,
            chunks.len(),
            generation_id
        );
        Ok(document_id)
    }

    /// Refresh a staging generation's heartbeat
    #[inline]
    pub async fn touch(&self, generation_id: i64) -> Result<bool> {
        GenerationQueries::touch(self.database.pool(), generation_id).await
    }

    /// Make a staging generation the one readers see and drop every other generation
    #[inline]
    pub async fn commit_generation(&self, generation_id: i64) -> Result<()> {
        let mut transaction = self.database.pool().begin().await?;
        GenerationQueries::activate(&mut transaction, generation_id).await?;
        transaction.commit().await?;

        info!("Committed generation {}", generation_id);
        Ok(())
    }

    /// Mark a staging generation failed, leaving the active generation untouched
    #[inline]
    pub async fn abort_generation(&self, generation_id: i64, reason: &str) -> Result<()> {
        if GenerationQueries::mark_failed(self.database.pool(), generation_id, reason).await? {
            warn!("Aborted generation {}: {}", generation_id, reason);
        }
        Ok(())
    }

    /// Replace the whole index with `documents` in a single staged generation.
    ///
    /// Either every document is committed or the previous generation stays active.
    #[inline]
    pub async fn replace_all(&self, documents: &[(NewDocument, Vec<NewChunk>)]) -> Result<Generation> {
        let generation = self.begin_generation().await?;

        for (document, chunks) in documents {
            if let Err(e) = self.stage_document(generation.id, document, chunks).await {
                self.abort_generation(generation.id, &e.to_string()).await?;
                return Err(e);
            }
        }

        if let Err(e) = self.commit_generation(generation.id).await {
            self.abort_generation(generation.id, &e.to_string()).await?;
            return Err(e);
        }

        GenerationQueries::get_by_id(self.database.pool(), generation.id)
            .await?
            .ok_or_else(|| RagError::Storage("Committed generation disappeared".to_string()))
    }

    /// The `k` chunks of the active generation closest to `query`, nearest first.
    ///
    /// Ties keep insertion order. An index that has never been committed is empty.
    #[inline]
    pub async fn nearest(&self, query: &[f32], k: usize) -> Result<Vec<ScoredChunk>> {
        if k == 0 {
            return Err(RagError::InvalidArgument(
                "k must be greater than zero".to_string(),
            ));
        }
        if query.len() != self.dimension {
            return Err(RagError::EmbeddingDimensionMismatch {
                expected: self.dimension,
                actual: query.len(),
            });
        }

        // The active pointer and its chunks come from one snapshot
        let mut transaction = self.database.pool().begin().await?;
        let Some(active) = GenerationQueries::get_active(&mut *transaction).await? else {
            debug!("No active generation, returning no results");
            return Ok(Vec::new());
        };
        self.check_compatible(&active)?;

        let mut scored = Vec::new();
        {
            let mut rows = ChunkQueries::stream_for_generation(&mut *transaction, active.id);
            while let Some(row) = rows.try_next().await? {
                let chunk = StoredChunk::try_from(row)?;
                let distance = cosine_distance(query, &chunk.embedding);
                scored.push(ScoredChunk { chunk, distance });
            }
        }
        transaction.commit().await?;

        // Stable sort keeps insertion order among equal distances
        scored.sort_by(|a, b| a.distance.total_cmp(&b.distance));
        scored.truncate(k);

        debug!(
            "Nearest search in generation {} returned {} results",
            active.id,
            scored.len()
        );
        Ok(scored)
    }

    #[inline]
    pub async fn active_generation(&self) -> Result<Option<Generation>> {
        GenerationQueries::get_active(self.database.pool()).await
    }

    #[inline]
    pub async fn statistics(&self) -> Result<IndexStatistics> {
        let mut transaction = self.database.pool().begin().await?;
        let active = GenerationQueries::get_active(&mut *transaction).await?;
        let staging = GenerationQueries::get_staging(&mut *transaction).await?;

        let (document_count, chunk_count) = match &active {
            Some(generation) => (
                DocumentQueries::count_for_generation(&mut *transaction, generation.id).await?,
                ChunkQueries::count_for_generation(&mut *transaction, generation.id).await?,
            ),
            None => (0, 0),
        };
        transaction.commit().await?;

        Ok(IndexStatistics {
            active,
            staging,
            document_count,
            chunk_count,
        })
    }

    fn validate_chunks(&self, chunks: &[NewChunk]) -> Result<()> {
        for (position, chunk) in chunks.iter().enumerate() {
            if chunk.embedding.len() != self.dimension {
                return Err(RagError::EmbeddingDimensionMismatch {
                    expected: self.dimension,
                    actual: chunk.embedding.len(),
                });
            }
            if chunk.chunk_index != position as i64 {
                return Err(RagError::InvalidArgument(format!(
                    "chunk indices must be contiguous from 0, found {} at position {}",
                    chunk.chunk_index, position
                )));
            }
        }
        Ok(())
    }

    fn check_compatible(&self, generation: &Generation) -> Result<()> {
        if generation.dimension != self.dimension as i64 {
            return Err(RagError::InvalidConfiguration(format!(
                "index was built with dimension {} but the embedder produces {}; run a full sync",
                generation.dimension, self.dimension
            )));
        }
        if generation.distance_metric != self.metric.as_str() {
            return Err(RagError::InvalidConfiguration(format!(
                "index was built for the {} metric but {} is in use; run a full sync",
                generation.distance_metric, self.metric
            )));
        }
        Ok(())
    }
}

impl TryFrom<ChunkRow> for StoredChunk {
    type Error = RagError;

    #[inline]
    fn try_from(row: ChunkRow) -> Result<Self> {
        Ok(Self {
            embedding: bytes_to_embedding(&row.embedding)?,
            id: row.id,
            document_id: row.document_id,
            source_id: row.source_id,
            chunk_index: row.chunk_index,
            content: row.content,
            attributes: row.attributes.0,
        })
    }
}

/// `1 - cosine_similarity`. A zero vector is treated as unrelated to everything.
#[inline]
pub fn cosine_distance(a: &[f32], b: &[f32]) -> f32 {
    let (mut dot, mut norm_a, mut norm_b) = (0.0f32, 0.0f32, 0.0f32);
    for (x, y) in a.iter().zip(b) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    if norm_a == 0.0 || norm_b == 0.0 {
        return 1.0;
    }
    1.0 - dot / (norm_a.sqrt() * norm_b.sqrt())
}

/// Serialize an f32 vector to bytes (little-endian) for BLOB storage.
#[inline]
pub fn embedding_to_bytes(embedding: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(embedding.len() * 4);
    for value in embedding {
        bytes.extend_from_slice(&value.to_le_bytes());
    }
    bytes
}

/// Deserialize little-endian bytes back to an f32 vector.
#[inline]
pub fn bytes_to_embedding(bytes: &[u8]) -> Result<Vec<f32>> {
    if bytes.len() % 4 != 0 {
        return Err(RagError::Storage(format!(
            "corrupt embedding blob of {} bytes",
            bytes.len()
        )));
    }
    Ok(bytes
        .chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect())
}
