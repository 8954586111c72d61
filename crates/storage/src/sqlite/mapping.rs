use chrono::{DateTime, Utc};
use sqlx::Row;
use sqlx::sqlite::SqliteRow;

use lesson_core::model::{CourseId, LastPosition, LessonId, ProgressRecord};

use crate::repository::{CachedProgress, StorageError};

/// Map a `lesson_progress` row into a cached entry.
///
/// Any malformed field (bad JSON in `last_position`, negative minutes, empty
/// lesson id) yields a `Serialization` error; callers treat that row as
/// absent rather than failing the operation.
pub fn map_progress_row(row: &SqliteRow) -> Result<CachedProgress, StorageError> {
    let lesson_id: String = row
        .try_get("lesson_id")
        .map_err(|e| StorageError::Serialization(e.to_string()))?;
    let course_id: String = row
        .try_get("course_id")
        .map_err(|e| StorageError::Serialization(e.to_string()))?;
    let progress_percentage: f64 = row
        .try_get("progress_percentage")
        .map_err(|e| StorageError::Serialization(e.to_string()))?;
    let time_spent_minutes: i64 = row
        .try_get("time_spent_minutes")
        .map_err(|e| StorageError::Serialization(e.to_string()))?;
    let last_position: Option<String> = row
        .try_get("last_position")
        .map_err(|e| StorageError::Serialization(e.to_string()))?;
    let is_completed: bool = row
        .try_get("is_completed")
        .map_err(|e| StorageError::Serialization(e.to_string()))?;
    let updated_at: DateTime<Utc> = row
        .try_get("updated_at")
        .map_err(|e| StorageError::Serialization(e.to_string()))?;
    let cached_at: DateTime<Utc> = row
        .try_get("cached_at")
        .map_err(|e| StorageError::Serialization(e.to_string()))?;

    let time_spent_minutes = u32::try_from(time_spent_minutes)
        .map_err(|_| StorageError::Serialization("negative time_spent_minutes".into()))?;

    let last_position = last_position
        .map(|text| {
            let value = serde_json::from_str(&text)
                .map_err(|e| StorageError::Serialization(e.to_string()))?;
            LastPosition::new(value).map_err(|e| StorageError::Serialization(e.to_string()))
        })
        .transpose()?;

    let record = ProgressRecord::from_persisted(
        LessonId::new(lesson_id),
        CourseId::new(course_id),
        progress_percentage,
        time_spent_minutes,
        last_position,
        is_completed,
        updated_at,
    )
    .map_err(|e| StorageError::Serialization(e.to_string()))?;

    Ok(CachedProgress::new(record, cached_at))
}
