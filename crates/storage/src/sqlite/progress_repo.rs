use chrono::{DateTime, Utc};
use tracing::warn;

use lesson_core::model::{LessonId, ProgressRecord};

use super::{SqliteCache, mapping::map_progress_row};
use crate::repository::{CachedProgress, ProgressCache, StorageError};

fn position_json(record: &ProgressRecord) -> Result<Option<String>, StorageError> {
    record
        .last_position()
        .map(|p| {
            serde_json::to_string(p.as_value())
                .map_err(|e| StorageError::Serialization(e.to_string()))
        })
        .transpose()
}

#[async_trait::async_trait]
impl ProgressCache for SqliteCache {
    async fn save(
        &self,
        record: &ProgressRecord,
        cached_at: DateTime<Utc>,
    ) -> Result<(), StorageError> {
        sqlx::query(
            r"
            INSERT INTO lesson_progress (
                lesson_id, course_id, progress_percentage, time_spent_minutes,
                last_position, is_completed, updated_at, cached_at
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            ON CONFLICT(lesson_id) DO UPDATE SET
                course_id = excluded.course_id,
                progress_percentage = excluded.progress_percentage,
                time_spent_minutes = excluded.time_spent_minutes,
                last_position = excluded.last_position,
                is_completed = excluded.is_completed,
                updated_at = excluded.updated_at,
                cached_at = excluded.cached_at
            ",
        )
        .bind(record.lesson_id().as_str())
        .bind(record.course_id().as_str())
        .bind(record.progress_percentage())
        .bind(i64::from(record.time_spent_minutes()))
        .bind(position_json(record)?)
        .bind(record.is_completed())
        .bind(record.updated_at())
        .bind(cached_at)
        .execute(&self.pool)
        .await
        .map_err(|e| StorageError::Connection(e.to_string()))?;

        Ok(())
    }

    async fn load(&self, lesson_id: &LessonId) -> Result<Option<CachedProgress>, StorageError> {
        let row = sqlx::query(
            r"
            SELECT lesson_id, course_id, progress_percentage, time_spent_minutes,
                   last_position, is_completed, updated_at, cached_at
            FROM lesson_progress
            WHERE lesson_id = ?1
            ",
        )
        .bind(lesson_id.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| StorageError::Connection(e.to_string()))?;

        let Some(row) = row else {
            return Ok(None);
        };

        // Corrupt entries count as absent.
        match map_progress_row(&row) {
            Ok(entry) => Ok(Some(entry)),
            Err(error) => {
                warn!(lesson = %lesson_id, %error, "dropping corrupt cache entry");
                Ok(None)
            }
        }
    }

    async fn load_all(&self) -> Result<Vec<CachedProgress>, StorageError> {
        let rows = sqlx::query(
            r"
            SELECT lesson_id, course_id, progress_percentage, time_spent_minutes,
                   last_position, is_completed, updated_at, cached_at
            FROM lesson_progress
            ORDER BY lesson_id ASC
            ",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StorageError::Connection(e.to_string()))?;

        let mut entries = Vec::with_capacity(rows.len());
        for row in rows {
            match map_progress_row(&row) {
                Ok(entry) => entries.push(entry),
                Err(error) => {
                    warn!(%error, "skipping corrupt cache entry");
                }
            }
        }
        Ok(entries)
    }

    async fn remove(&self, lesson_id: &LessonId) -> Result<(), StorageError> {
        sqlx::query("DELETE FROM lesson_progress WHERE lesson_id = ?1")
            .bind(lesson_id.as_str())
            .execute(&self.pool)
            .await
            .map_err(|e| StorageError::Connection(e.to_string()))?;
        Ok(())
    }
}
