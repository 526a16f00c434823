//! VideoStore: the SQLite-backed metadata store for video records.
//!
//! Records are created by their owner and only ever mutated by
//! `record_reference`, which the ingest pipeline calls once per successful
//! publish. Concurrent updates to the same record are last-writer-wins.

use crate::{
    errors::{PipelineError, PipelineResult},
    models::{asset::AssetKind, video::Video},
};
use chrono::Utc;
use sqlx::SqlitePool;
use std::sync::Arc;
use uuid::Uuid;

const MIGRATION: &str = include_str!("../../migrations/0001_init.sql");

const VIDEO_COLUMNS: &str =
    "id, user_id, title, description, thumbnail_url, video_url, created_at, updated_at";

#[derive(Clone)]
pub struct VideoStore {
    /// Shared SQLite connection pool.
    pub db: Arc<SqlitePool>,
}

impl VideoStore {
    pub fn new(db: Arc<SqlitePool>) -> Self {
        Self { db }
    }

    /// Apply the embedded schema. Statements are idempotent.
    pub async fn migrate(&self) -> PipelineResult<()> {
        let statements = MIGRATION
            .split(';')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>();

        tracing::info!("Running {} migration statements...", statements.len());

        for stmt in statements {
            tracing::debug!("Executing migration SQL: {}", stmt);
            sqlx::query(stmt).execute(&*self.db).await?;
        }
        Ok(())
    }

    /// Insert a new record owned by `user_id`.
    pub async fn create(
        &self,
        user_id: Uuid,
        title: &str,
        description: Option<&str>,
    ) -> PipelineResult<Video> {
        let now = Utc::now();
        let video = sqlx::query_as::<_, Video>(&format!(
            "INSERT INTO videos ({VIDEO_COLUMNS})
             VALUES (?, ?, ?, ?, NULL, NULL, ?, ?)
             RETURNING {VIDEO_COLUMNS}"
        ))
        .bind(Uuid::new_v4())
        .bind(user_id)
        .bind(title)
        .bind(description)
        .bind(now)
        .bind(now)
        .fetch_one(&*self.db)
        .await?;
        Ok(video)
    }

    /// Fetch a record by id; `None` when it does not exist.
    pub async fn get(&self, id: Uuid) -> PipelineResult<Option<Video>> {
        let video = sqlx::query_as::<_, Video>(&format!(
            "SELECT {VIDEO_COLUMNS} FROM videos WHERE id = ?"
        ))
        .bind(id)
        .fetch_optional(&*self.db)
        .await?;
        Ok(video)
    }

    /// Point the record's reference for `kind` at `url` and return the updated row.
    pub async fn record_reference(
        &self,
        id: Uuid,
        kind: AssetKind,
        url: &str,
    ) -> PipelineResult<Video> {
        let column = kind.reference_column();
        sqlx::query_as::<_, Video>(&format!(
            "UPDATE videos SET {column} = ?, updated_at = ? WHERE id = ?
             RETURNING {VIDEO_COLUMNS}"
        ))
        .bind(url)
        .bind(Utc::now())
        .bind(id)
        .fetch_one(&*self.db)
        .await
        .map_err(|err| match err {
            sqlx::Error::RowNotFound => PipelineError::NotFound(format!("video {id}")),
            other => PipelineError::Metadata(other),
        })
    }
}

#[cfg(test)]
pub(crate) async fn test_store() -> VideoStore {
    use sqlx::sqlite::SqlitePoolOptions;

    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .unwrap();
    let store = VideoStore::new(Arc::new(pool));
    store.migrate().await.unwrap();
    store
}
