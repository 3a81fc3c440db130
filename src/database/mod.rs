// Database module
// SQLite holds documents, chunk vectors and sync generations; vector_index searches them

pub mod sqlite;
pub mod vector_index;

pub use sqlite::*;
pub use vector_index::{ScoredChunk, StoredChunk, VectorIndex, cosine_distance};
