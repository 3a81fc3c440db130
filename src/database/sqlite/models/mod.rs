#[cfg(test)]
mod tests;

use chrono::{NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::types::Json;
use sqlx::{FromRow, Type};

use crate::attributes::Attributes;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Type)]
#[sqlx(type_name = "TEXT", rename_all = "lowercase")]
pub enum GenerationStatus {
    Staging,
    Active,
    Failed,
}

impl std::fmt::Display for GenerationStatus {
    #[inline]
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match *self {
            GenerationStatus::Staging => write!(f, "Staging"),
            GenerationStatus::Active => write!(f, "Active"),
            GenerationStatus::Failed => write!(f, "Failed"),
        }
    }
}

/// Vector comparison metric a generation was built for.
///
/// Vectors built under one metric are never compared under another.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DistanceMetric {
    Cosine,
}

impl DistanceMetric {
    #[inline]
    pub fn as_str(&self) -> &'static str {
        match self {
            DistanceMetric::Cosine => "cosine",
        }
    }
}

impl std::fmt::Display for DistanceMetric {
    #[inline]
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct Generation {
    pub id: i64,
    pub status: GenerationStatus,
    pub dimension: i64,
    pub distance_metric: String,
    pub created_at: NaiveDateTime,
    pub heartbeat_at: NaiveDateTime,
    pub committed_at: Option<NaiveDateTime>,
    pub error_message: Option<String>,
}

impl Generation {
    #[inline]
    pub fn is_active(&self) -> bool {
        self.status == GenerationStatus::Active
    }

    #[inline]
    pub fn is_staging(&self) -> bool {
        self.status == GenerationStatus::Staging
    }

    /// A staging generation whose heartbeat is older than `threshold_seconds` was abandoned
    #[inline]
    pub fn is_stale(&self, threshold_seconds: i64) -> bool {
        let age = Utc::now().naive_utc() - self.heartbeat_at;
        self.is_staging() && age.num_seconds() > threshold_seconds
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct DocumentRecord {
    pub id: i64,
    pub generation_id: i64,
    pub source_id: String,
    pub title: String,
    pub content: String,
    pub attributes: Json<Attributes>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewDocument {
    pub source_id: String,
    pub title: String,
    pub content: String,
    pub attributes: Attributes,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewChunk {
    pub chunk_index: i64,
    pub content: String,
    pub embedding: Vec<f32>,
    pub attributes: Attributes,
}

/// A stored chunk joined with its parent's external id, as read for similarity search
#[derive(Debug, Clone, PartialEq, FromRow)]
pub struct ChunkRow {
    pub id: i64,
    pub document_id: i64,
    pub source_id: String,
    pub chunk_index: i64,
    pub content: String,
    pub embedding: Vec<u8>,
    pub attributes: Json<Attributes>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexStatistics {
    pub active: Option<Generation>,
    pub staging: Option<Generation>,
    pub document_count: i64,
    pub chunk_count: i64,
}
