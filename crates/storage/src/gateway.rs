use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use lesson_core::model::{CourseId, LastPosition, LessonId, ProgressError, ProgressRecord};

//
// ─── ERRORS ────────────────────────────────────────────────────────────────────
//

/// Failure modes of the remote progress service.
///
/// A missing server record is not an error: reads return `Ok(None)` and the
/// caller treats it as the all-zero default.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum GatewayError {
    /// Transient connectivity failure (connect error, timeout, 5xx).
    #[error("network error: {0}")]
    Network(String),

    /// The session token was rejected; an outer layer handles re-auth.
    #[error("authentication rejected")]
    Auth,

    /// The server refused the payload (out-of-range percentage, malformed
    /// position). Local clamping should make this unreachable.
    #[error("validation rejected: {0}")]
    Validation(String),
}

//
// ─── WIRE SHAPE ────────────────────────────────────────────────────────────────
//

/// Progress as the remote service reports it.
///
/// Carries no local timestamp; the synchronizer stamps freshness at the moment
/// the response arrives.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteProgress {
    pub course_id: String,
    pub progress_percentage: f64,
    pub time_spent_minutes: u32,
    pub last_position: Option<LastPosition>,
    pub is_completed: bool,
}

impl RemoteProgress {
    /// Build the authoritative in-memory record from a server response.
    ///
    /// # Errors
    ///
    /// Returns `ProgressError` if the lesson id is empty.
    pub fn into_record(
        self,
        lesson_id: LessonId,
        fetched_at: DateTime<Utc>,
    ) -> Result<ProgressRecord, ProgressError> {
        ProgressRecord::from_persisted(
            lesson_id,
            CourseId::new(self.course_id),
            self.progress_percentage,
            self.time_spent_minutes,
            self.last_position,
            self.is_completed,
            fetched_at,
        )
    }

    /// Snapshot of a local record in wire shape, for writes.
    #[must_use]
    pub fn from_record(record: &ProgressRecord) -> Self {
        Self {
            course_id: record.course_id().as_str().to_owned(),
            progress_percentage: record.progress_percentage(),
            time_spent_minutes: record.time_spent_minutes(),
            last_position: record.last_position().cloned(),
            is_completed: record.is_completed(),
        }
    }
}

//
// ─── GATEWAY ───────────────────────────────────────────────────────────────────
//

/// Network I/O against the remote progress service.
///
/// Deliberately dumb: no retries, no backoff, no caching — reconciliation and
/// fallback are the synchronizer's job.
#[async_trait]
pub trait PersistenceGateway: Send + Sync {
    /// Fetch the server-side record for a lesson.
    ///
    /// Returns `Ok(None)` when the server holds no record yet.
    ///
    /// # Errors
    ///
    /// Returns `GatewayError::Network` on connectivity loss and
    /// `GatewayError::Auth` on an invalid session.
    async fn read_progress(
        &self,
        lesson_id: &LessonId,
    ) -> Result<Option<RemoteProgress>, GatewayError>;

    /// Idempotent upsert of a lesson's progress.
    ///
    /// # Errors
    ///
    /// Returns `GatewayError::Network`, `GatewayError::Auth`, or
    /// `GatewayError::Validation`.
    async fn write_progress(&self, record: &ProgressRecord) -> Result<(), GatewayError>;

    /// Mark a lesson completed server-side (100%, completed).
    ///
    /// # Errors
    ///
    /// Same failure modes as `write_progress`.
    async fn complete_progress(&self, lesson_id: &LessonId) -> Result<(), GatewayError>;
}

//
// ─── TESTS ─────────────────────────────────────────────────────────────────────
//

#[cfg(test)]
mod tests {
    use super::*;
    use lesson_core::time::fixed_now;
    use serde_json::json;

    #[test]
    fn wire_shape_uses_snake_case_fields() {
        let remote = RemoteProgress {
            course_id: "c1".into(),
            progress_percentage: 42.5,
            time_spent_minutes: 7,
            last_position: Some(LastPosition::new(json!({"slide": 2})).unwrap()),
            is_completed: false,
        };
        let value = serde_json::to_value(&remote).unwrap();
        assert_eq!(value["progress_percentage"], 42.5);
        assert_eq!(value["time_spent_minutes"], 7);
        assert_eq!(value["last_position"]["slide"], 2);
        assert_eq!(value["is_completed"], false);
    }

    #[test]
    fn null_position_round_trips() {
        let remote: RemoteProgress = serde_json::from_value(json!({
            "course_id": "c1",
            "progress_percentage": 10.0,
            "time_spent_minutes": 1,
            "last_position": null,
            "is_completed": false,
        }))
        .unwrap();
        assert!(remote.last_position.is_none());
    }

    #[test]
    fn into_record_stamps_fetch_time_and_normalizes() {
        let remote = RemoteProgress {
            course_id: "c1".into(),
            progress_percentage: 130.0,
            time_spent_minutes: 9,
            last_position: None,
            is_completed: false,
        };
        let record = remote.into_record(LessonId::new("l1"), fixed_now()).unwrap();
        assert_eq!(record.progress_percentage(), 100.0);
        assert!(record.is_completed());
        assert_eq!(record.updated_at(), fixed_now());
    }

    #[test]
    fn from_record_mirrors_the_domain_snapshot() {
        let mut record =
            ProgressRecord::new(LessonId::new("l1"), CourseId::new("c1"), fixed_now()).unwrap();
        record.apply_update(55.0, None, 4, fixed_now());

        let remote = RemoteProgress::from_record(&record);
        assert_eq!(remote.course_id, "c1");
        assert_eq!(remote.progress_percentage, 55.0);
        assert_eq!(remote.time_spent_minutes, 4);
        assert!(!remote.is_completed);
    }
}
