use thiserror::Error;

use crate::indexer::SyncStage;

pub type Result<T> = std::result::Result<T, RagError>;

#[derive(Error, Debug)]
pub enum RagError {
    #[error("Source fetch error: {0}")]
    SourceFetch(String),

    #[error("Embedding provider error: {0}")]
    EmbeddingProvider(String),

    #[error("Embedding dimension mismatch: expected {expected}, got {actual}")]
    EmbeddingDimensionMismatch { expected: usize, actual: usize },

    #[error("Embedding count mismatch: sent {expected} texts, received {actual} vectors")]
    EmbeddingCountMismatch { expected: usize, actual: usize },

    #[error("Generation error: {0}")]
    Generation(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("A knowledge base sync is already in progress")]
    SyncInProgress,

    #[error("Sync was cancelled")]
    Cancelled,

    #[error("Sync failed while {stage}{}: {source}", document_suffix(.source_id))]
    SyncFailed {
        stage: SyncStage,
        source_id: Option<String>,
        source: Box<RagError>,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Other error: {0}")]
    Other(#[from] anyhow::Error),
}

impl RagError {
    /// The innermost error, looking through `SyncFailed` wrappers.
    #[inline]
    pub fn root_cause(&self) -> &RagError {
        match self {
            RagError::SyncFailed { source, .. } => source.root_cause(),
            other => other,
        }
    }
}

impl From<sqlx::Error> for RagError {
    #[inline]
    fn from(e: sqlx::Error) -> Self {
        RagError::Storage(e.to_string())
    }
}

impl From<sqlx::migrate::MigrateError> for RagError {
    #[inline]
    fn from(e: sqlx::migrate::MigrateError) -> Self {
        RagError::Storage(format!("migration failed: {}", e))
    }
}

fn document_suffix(source_id: &Option<String>) -> String {
    source_id
        .as_deref()
        .map(|id| format!(" (document {})", id))
        .unwrap_or_default()
}

pub mod answer;
pub mod attributes;
pub mod commands;
pub mod config;
pub mod database;
pub mod embeddings;
pub mod indexer;
pub mod retrieval;
pub mod sources;
