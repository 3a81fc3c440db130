// Indexer module
// Full-resync ingestion: fetch, chunk, embed and stage documents, then swap generations


use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, watch};
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tokio_util::task::AbortOnDropHandle;
use tracing::{debug, error, info, warn};

use crate::attributes::AttributeValue;
use crate::database::sqlite::models::{NewChunk, NewDocument};
use crate::database::vector_index::VectorIndex;
use crate::embeddings::Embedder;
use crate::embeddings::chunking::{ChunkingConfig, chunk_text};
use crate::sources::{DocumentSource, SourceDocument};
use crate::{RagError, Result};

pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

/// Attribute key under which every chunk records its document's title
pub const SOURCE_TITLE_ATTRIBUTE: &str = "source_title";

/// The step of a sync run where a failure happened
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SyncStage {
    Fetching,
    Staging,
    Chunking,
    Embedding,
    Storing,
    Committing,
}

impl std::fmt::Display for SyncStage {
    #[inline]
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match *self {
            SyncStage::Fetching => write!(f, "fetching documents"),
            SyncStage::Staging => write!(f, "staging a new generation"),
            SyncStage::Chunking => write!(f, "chunking"),
            SyncStage::Embedding => write!(f, "embedding"),
            SyncStage::Storing => write!(f, "storing"),
            SyncStage::Committing => write!(f, "committing the new generation"),
        }
    }
}

/// Counts reported by a committed sync run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct SyncReport {
    pub documents_loaded: usize,
    pub chunks_created: usize,
    /// The generation that became active, or `None` when nothing was fetched and the
    /// index was left untouched
    pub generation_id: Option<i64>,
}

/// Progress of the current or most recent sync run
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncState {
    Idle,
    Fetching,
    Staging,
    Chunking { source_id: String, position: usize, total: usize },
    Embedding { source_id: String, position: usize, total: usize },
    Storing { source_id: String, position: usize, total: usize },
    Committing { generation_id: i64 },
    Committed(SyncReport),
    Failed { stage: Option<SyncStage>, error: String },
}

impl SyncState {
    #[inline]
    pub fn is_finished(&self) -> bool {
        matches!(self, SyncState::Committed(_) | SyncState::Failed { .. })
    }
}

/// Runs full resyncs from a document source into the vector index.
///
/// Each run stages a fresh generation and only swaps it in once every document has been
/// stored, so a failure or cancellation leaves the previously active generation in place.
/// At most one run is in flight per pipeline, and the staging guard in the database
/// extends that across processes.
pub struct SyncPipeline {
    source: Arc<dyn DocumentSource>,
    embedder: Embedder,
    index: VectorIndex,
    chunking: ChunkingConfig,
    heartbeat_interval: Duration,
    run_lock: Mutex<()>,
    state: watch::Sender<SyncState>,
}

impl SyncPipeline {
    #[inline]
    pub fn new(
        source: Arc<dyn DocumentSource>,
        embedder: Embedder,
        index: VectorIndex,
        chunking: ChunkingConfig,
    ) -> Result<Self> {
        chunking.validate()?;
        if embedder.dimension() != index.dimension() {
            return Err(RagError::InvalidConfiguration(format!(
                "embedder produces {} dimensions but the index stores {}",
                embedder.dimension(),
                index.dimension()
            )));
        }

        let (state, _) = watch::channel(SyncState::Idle);
        Ok(Self {
            source,
            embedder,
            index,
            chunking,
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
            run_lock: Mutex::new(()),
            state,
        })
    }

    #[inline]
    pub fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self
    }

    /// Watch the progress of sync runs
    #[inline]
    pub fn subscribe(&self) -> watch::Receiver<SyncState> {
        self.state.subscribe()
    }

    #[inline]
    pub fn state(&self) -> SyncState {
        self.state.borrow().clone()
    }

    #[inline]
    pub async fn run(&self) -> Result<SyncReport> {
        self.run_with_cancellation(CancellationToken::new()).await
    }

    /// Run a full sync, checking `cancel` between documents.
    ///
    /// Returns [`RagError::SyncInProgress`] without touching anything if another run holds
    /// the pipeline or the database.
    #[inline]
    pub async fn run_with_cancellation(&self, cancel: CancellationToken) -> Result<SyncReport> {
        let Ok(_guard) = self.run_lock.try_lock() else {
            warn!("Rejected sync request: a sync is already running");
            return Err(RagError::SyncInProgress);
        };

        info!("Starting full sync from {}", self.source.describe());
        let result = self.run_locked(&cancel).await;

        match &result {
            Ok(report) => {
                info!(
                    "Sync committed: {} documents, {} chunks",
                    report.documents_loaded, report.chunks_created
                );
                self.publish(SyncState::Committed(*report));
            }
            Err(e) => {
                error!("Sync failed: {}", e);
                let stage = match e {
                    RagError::SyncFailed { stage, .. } => Some(*stage),
                    _ => None,
                };
                self.publish(SyncState::Failed {
                    stage,
                    error: e.to_string(),
                });
            }
        }

        result
    }

    async fn run_locked(&self, cancel: &CancellationToken) -> Result<SyncReport> {
        self.publish(SyncState::Fetching);
        let documents = self
            .source
            .fetch()
            .await
            .map_err(|e| sync_failed(SyncStage::Fetching, None, e))?;

        if documents.is_empty() {
            // An empty fetch never clears the index
            warn!("Source returned no documents; keeping the current index");
            return Ok(SyncReport::default());
        }

        self.publish(SyncState::Staging);
        let generation = self.index.begin_generation().await.map_err(|e| match e {
            RagError::SyncInProgress => RagError::SyncInProgress,
            other => sync_failed(SyncStage::Staging, None, other),
        })?;

        // Stops with the run, including when the caller drops this future
        let heartbeat = AbortOnDropHandle::new(self.start_heartbeat_task(generation.id));
        let result = self.stage_and_commit(generation.id, documents, cancel).await;
        heartbeat.abort();

        if let Err(e) = &result {
            if let Err(abort_error) = self
                .index
                .abort_generation(generation.id, &e.to_string())
                .await
            {
                error!(
                    "Failed to mark generation {} as failed: {}",
                    generation.id, abort_error
                );
            }
        }

        result
    }

    async fn stage_and_commit(
        &self,
        generation_id: i64,
        documents: Vec<SourceDocument>,
        cancel: &CancellationToken,
    ) -> Result<SyncReport> {
        let total = documents.len();
        let mut report = SyncReport {
            generation_id: Some(generation_id),
            ..SyncReport::default()
        };

        for (position, document) in documents.into_iter().enumerate() {
            if cancel.is_cancelled() {
                warn!(
                    "Sync cancelled after {} of {} documents",
                    report.documents_loaded, total
                );
                return Err(RagError::Cancelled);
            }

            let document = document.into_new_document();
            let chunks = self
                .process_document(generation_id, &document, position, total)
                .await?;

            report.documents_loaded += 1;
            report.chunks_created += chunks;
        }

        if cancel.is_cancelled() {
            return Err(RagError::Cancelled);
        }

        self.publish(SyncState::Committing { generation_id });
        self.index
            .commit_generation(generation_id)
            .await
            .map_err(|e| sync_failed(SyncStage::Committing, None, e))?;

        Ok(report)
    }

    /// Chunk, embed and stage one document, returning its chunk count
    async fn process_document(
        &self,
        generation_id: i64,
        document: &NewDocument,
        position: usize,
        total: usize,
    ) -> Result<usize> {
        let source_id = document.source_id.clone();
        let fail = |stage: SyncStage| {
            let source_id = source_id.clone();
            move |e: RagError| sync_failed(stage, Some(source_id), e)
        };

        self.publish(SyncState::Chunking {
            source_id: source_id.clone(),
            position,
            total,
        });
        let chunks =
            chunk_text(&document.content, &self.chunking).map_err(fail(SyncStage::Chunking))?;

        self.publish(SyncState::Embedding {
            source_id: source_id.clone(),
            position,
            total,
        });
        let texts: Vec<String> = chunks.iter().map(|c| c.content.clone()).collect();
        let vectors = self
            .embedder
            .embed_batch(&texts)
            .await
            .map_err(fail(SyncStage::Embedding))?;

        if vectors.len() != chunks.len() {
            return Err(fail(SyncStage::Embedding)(RagError::EmbeddingCountMismatch {
                expected: chunks.len(),
                actual: vectors.len(),
            }));
        }

        let mut attributes = BTreeMap::new();
        attributes.insert(
            SOURCE_TITLE_ATTRIBUTE.to_string(),
            AttributeValue::from(document.title.as_str()),
        );

        let new_chunks: Vec<NewChunk> = chunks
            .into_iter()
            .zip(vectors)
            .map(|(chunk, embedding)| NewChunk {
                chunk_index: chunk.chunk_index as i64,
                content: chunk.content,
                embedding,
                attributes: attributes.clone(),
            })
            .collect();

        self.publish(SyncState::Storing {
            source_id: source_id.clone(),
            position,
            total,
        });
        self.index
            .stage_document(generation_id, document, &new_chunks)
            .await
            .map_err(fail(SyncStage::Storing))?;

        debug!(
            "Processed document {} ({}/{}) into {} chunks",
            source_id,
            position + 1,
            total,
            new_chunks.len()
        );
        Ok(new_chunks.len())
    }

    fn publish(&self, state: SyncState) {
        self.state.send_replace(state);
    }

    /// Start heartbeat task to show the staging generation is still being built
    fn start_heartbeat_task(&self, generation_id: i64) -> tokio::task::JoinHandle<()> {
        let index = self.index.clone();
        let interval = self.heartbeat_interval;

        tokio::spawn(async move {
            #[expect(
                clippy::infinite_loop,
                reason = "intended to run until handle is aborted"
            )]
            loop {
                if let Err(e) = index.touch(generation_id).await {
                    error!(
                        "Failed to update heartbeat for generation {}: {}",
                        generation_id, e
                    );
                }
                sleep(interval).await;
            }
        })
    }
}

fn sync_failed(stage: SyncStage, source_id: Option<String>, source: RagError) -> RagError {
    RagError::SyncFailed {
        stage,
        source_id,
        source: Box::new(source),
    }
}
