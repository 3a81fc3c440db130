#[cfg(test)]
mod tests;

use super::models::*;
use chrono::Utc;
use futures::stream::{BoxStream, StreamExt, TryStreamExt};
use sqlx::{Executor, Sqlite, SqliteConnection, SqlitePool};
use tracing::debug;

use crate::database::vector_index::embedding_to_bytes;
use crate::{RagError, Result};

const GENERATION_COLUMNS: &str = "id, status, dimension, distance_metric, created_at, \
                                  heartbeat_at, committed_at, error_message";

fn storage_error(context: &'static str) -> impl Fn(sqlx::Error) -> RagError {
    move |e| RagError::Storage(format!("{}: {}", context, e))
}

pub struct GenerationQueries;

impl GenerationQueries {
    /// Open a new staging generation. Fails with `SyncInProgress` if one already exists.
    #[inline]
    pub async fn create_staging<'e, E>(
        executor: E,
        dimension: i64,
        metric: DistanceMetric,
    ) -> Result<Generation>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        let now = Utc::now().naive_utc();
        let sql = format!(
            "INSERT INTO generations (status, dimension, distance_metric, created_at, heartbeat_at) \
             VALUES ('staging', ?, ?, ?, ?) RETURNING {}",
            GENERATION_COLUMNS
        );

        sqlx::query_as::<_, Generation>(&sql)
            .bind(dimension)
            .bind(metric.as_str())
            .bind(now)
            .bind(now)
            .fetch_one(executor)
            .await
            .map_err(|e| match e {
                sqlx::Error::Database(db) if db.is_unique_violation() => RagError::SyncInProgress,
                other => storage_error("Failed to create staging generation")(other),
            })
    }

    #[inline]
    pub async fn get_by_id(pool: &SqlitePool, id: i64) -> Result<Option<Generation>> {
        let sql = format!("SELECT {} FROM generations WHERE id = ?", GENERATION_COLUMNS);
        sqlx::query_as::<_, Generation>(&sql)
            .bind(id)
            .fetch_optional(pool)
            .await
            .map_err(storage_error("Failed to get generation by id"))
    }

    #[inline]
    pub async fn get_staging<'e, E>(executor: E) -> Result<Option<Generation>>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        let sql = format!(
            "SELECT {} FROM generations WHERE status = 'staging'",
            GENERATION_COLUMNS
        );
        sqlx::query_as::<_, Generation>(&sql)
            .fetch_optional(executor)
            .await
            .map_err(storage_error("Failed to get staging generation"))
    }

    /// The generation readers should see, if any sync has ever committed
    #[inline]
    pub async fn get_active<'e, E>(executor: E) -> Result<Option<Generation>>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        let sql = format!(
            "SELECT {} FROM generations \
             WHERE id = (SELECT generation_id FROM active_generation WHERE slot = 0)",
            GENERATION_COLUMNS
        );
        sqlx::query_as::<_, Generation>(&sql)
            .fetch_optional(executor)
            .await
            .map_err(storage_error("Failed to get active generation"))
    }

    #[inline]
    pub async fn list_all(pool: &SqlitePool) -> Result<Vec<Generation>> {
        let sql = format!("SELECT {} FROM generations ORDER BY id", GENERATION_COLUMNS);
        sqlx::query_as::<_, Generation>(&sql)
            .fetch_all(pool)
            .await
            .map_err(storage_error("Failed to list generations"))
    }

    /// Refresh the heartbeat of a staging generation. Returns false if it is no longer staging.
    #[inline]
    pub async fn touch<'e, E>(executor: E, id: i64) -> Result<bool>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        let result = sqlx::query(
            "UPDATE generations SET heartbeat_at = ? WHERE id = ? AND status = 'staging'",
        )
        .bind(Utc::now().naive_utc())
        .bind(id)
        .execute(executor)
        .await
        .map_err(storage_error("Failed to update generation heartbeat"))?;

        Ok(result.rows_affected() == 1)
    }

    #[inline]
    pub async fn mark_failed<'e, E>(executor: E, id: i64, error_message: &str) -> Result<bool>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        let result = sqlx::query(
            "UPDATE generations SET status = 'failed', error_message = ? \
             WHERE id = ? AND status = 'staging'",
        )
        .bind(error_message)
        .bind(id)
        .execute(executor)
        .await
        .map_err(storage_error("Failed to mark generation as failed"))?;

        Ok(result.rows_affected() == 1)
    }

    /// Delete every failed generation along with its documents and chunks
    #[inline]
    pub async fn purge_failed<'e, E>(executor: E) -> Result<u64>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        let result = sqlx::query("DELETE FROM generations WHERE status = 'failed'")
            .execute(executor)
            .await
            .map_err(storage_error("Failed to purge failed generations"))?;

        Ok(result.rows_affected())
    }

    /// Promote a staging generation to active and drop every other generation.
    ///
    /// Callers run this inside a transaction so readers observe either the old or the new
    /// generation, never a mix.
    #[inline]
    pub async fn activate(conn: &mut SqliteConnection, id: i64) -> Result<()> {
        let now = Utc::now().naive_utc();

        let promoted = sqlx::query(
            "UPDATE generations SET status = 'active', committed_at = ?, heartbeat_at = ? \
             WHERE id = ? AND status = 'staging'",
        )
        .bind(now)
        .bind(now)
        .bind(id)
        .execute(&mut *conn)
        .await
        .map_err(storage_error("Failed to promote generation"))?;

        if promoted.rows_affected() != 1 {
            return Err(RagError::Storage(format!(
                "Generation {} is no longer staging and cannot be committed",
                id
            )));
        }

        sqlx::query(
            "INSERT INTO active_generation (slot, generation_id) VALUES (0, ?) \
             ON CONFLICT (slot) DO UPDATE SET generation_id = excluded.generation_id",
        )
        .bind(id)
        .execute(&mut *conn)
        .await
        .map_err(storage_error("Failed to swap active generation"))?;

        let removed = sqlx::query("DELETE FROM generations WHERE id != ?")
            .bind(id)
            .execute(&mut *conn)
            .await
            .map_err(storage_error("Failed to delete superseded generations"))?;

        debug!(
            "Activated generation {} and removed {} superseded generations",
            id,
            removed.rows_affected()
        );
        Ok(())
    }
}

pub struct DocumentQueries;

impl DocumentQueries {
    #[inline]
    pub async fn insert<'e, E>(
        executor: E,
        generation_id: i64,
        document: &NewDocument,
    ) -> Result<i64>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        let now = Utc::now().naive_utc();
        let id = sqlx::query(
            r#"
            INSERT INTO documents (generation_id, source_id, title, content, attributes, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(generation_id)
        .bind(&document.source_id)
        .bind(&document.title)
        .bind(&document.content)
        .bind(sqlx::types::Json(&document.attributes))
        .bind(now)
        .bind(now)
        .execute(executor)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(db) if db.is_unique_violation() => RagError::Storage(format!(
                "Duplicate source id '{}' in one sync",
                document.source_id
            )),
            other => storage_error("Failed to insert document")(other),
        })?
        .last_insert_rowid();

        Ok(id)
    }

    #[inline]
    pub async fn get_by_source_id(
        pool: &SqlitePool,
        generation_id: i64,
        source_id: &str,
    ) -> Result<Option<DocumentRecord>> {
        sqlx::query_as::<_, DocumentRecord>(
            r#"
            SELECT id, generation_id, source_id, title, content, attributes, created_at, updated_at
            FROM documents WHERE generation_id = ? AND source_id = ?
            "#,
        )
        .bind(generation_id)
        .bind(source_id)
        .fetch_optional(pool)
        .await
        .map_err(storage_error("Failed to get document by source id"))
    }

    #[inline]
    pub async fn list_for_generation(
        pool: &SqlitePool,
        generation_id: i64,
    ) -> Result<Vec<DocumentRecord>> {
        sqlx::query_as::<_, DocumentRecord>(
            r#"
            SELECT id, generation_id, source_id, title, content, attributes, created_at, updated_at
            FROM documents WHERE generation_id = ? ORDER BY id
            "#,
        )
        .bind(generation_id)
        .fetch_all(pool)
        .await
        .map_err(storage_error("Failed to list documents"))
    }

    #[inline]
    pub async fn count_for_generation<'e, E>(executor: E, generation_id: i64) -> Result<i64>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        sqlx::query_scalar("SELECT COUNT(*) FROM documents WHERE generation_id = ?")
            .bind(generation_id)
            .fetch_one(executor)
            .await
            .map_err(storage_error("Failed to count documents"))
    }
}

pub struct ChunkQueries;

impl ChunkQueries {
    #[inline]
    pub async fn insert<'e, E>(executor: E, document_id: i64, chunk: &NewChunk) -> Result<i64>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        let id = sqlx::query(
            r#"
            INSERT INTO chunks (document_id, chunk_index, content, embedding, attributes)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(document_id)
        .bind(chunk.chunk_index)
        .bind(&chunk.content)
        .bind(embedding_to_bytes(&chunk.embedding))
        .bind(sqlx::types::Json(&chunk.attributes))
        .execute(executor)
        .await
        .map_err(storage_error("Failed to insert chunk"))?
        .last_insert_rowid();

        Ok(id)
    }

    /// Every chunk of a generation in insertion order
    #[inline]
    pub async fn list_for_generation(
        pool: &SqlitePool,
        generation_id: i64,
    ) -> Result<Vec<ChunkRow>> {
        sqlx::query_as::<_, ChunkRow>(
            r#"
            SELECT c.id, c.document_id, d.source_id, c.chunk_index, c.content, c.embedding, c.attributes
            FROM chunks c
            JOIN documents d ON d.id = c.document_id
            WHERE d.generation_id = ?
            ORDER BY c.id
            "#,
        )
        .bind(generation_id)
        .fetch_all(pool)
        .await
        .map_err(storage_error("Failed to list chunks"))
    }

    /// Stream every chunk of a generation in insertion order
    #[inline]
    pub fn stream_for_generation<'e, E>(
        executor: E,
        generation_id: i64,
    ) -> BoxStream<'e, Result<ChunkRow>>
    where
        E: Executor<'e, Database = Sqlite> + 'e,
    {
        sqlx::query_as::<_, ChunkRow>(
            r#"
            SELECT c.id, c.document_id, d.source_id, c.chunk_index, c.content, c.embedding, c.attributes
            FROM chunks c
            JOIN documents d ON d.id = c.document_id
            WHERE d.generation_id = ?
            ORDER BY c.id
            "#,
        )
        .bind(generation_id)
        .fetch(executor)
        .map_err(storage_error("Failed to read chunks"))
        .boxed()
    }

    #[inline]
    pub async fn list_for_document(pool: &SqlitePool, document_id: i64) -> Result<Vec<ChunkRow>> {
        sqlx::query_as::<_, ChunkRow>(
            r#"
            SELECT c.id, c.document_id, d.source_id, c.chunk_index, c.content, c.embedding, c.attributes
            FROM chunks c
            JOIN documents d ON d.id = c.document_id
            WHERE c.document_id = ?
            ORDER BY c.chunk_index
            "#,
        )
        .bind(document_id)
        .fetch_all(pool)
        .await
        .map_err(storage_error("Failed to list chunks for document"))
    }

    #[inline]
    pub async fn count_for_generation<'e, E>(executor: E, generation_id: i64) -> Result<i64>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        sqlx::query_scalar(
            r#"
            SELECT COUNT(*) FROM chunks c
            JOIN documents d ON d.id = c.document_id
            WHERE d.generation_id = ?
            "#,
        )
        .bind(generation_id)
        .fetch_one(executor)
        .await
        .map_err(storage_error("Failed to count chunks"))
    }
}
