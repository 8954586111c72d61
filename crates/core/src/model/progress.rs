use chrono::{DateTime, Duration, Utc};
use thiserror::Error;

use crate::model::ids::{CourseId, LessonId};
use crate::model::position::LastPosition;

//
// ─── ERRORS ────────────────────────────────────────────────────────────────────
//

#[derive(Debug, Error, Clone, PartialEq)]
#[non_exhaustive]
pub enum ProgressError {
    #[error("lesson id cannot be empty")]
    EmptyLessonId,

    #[error("completed record must carry 100% progress, got {0}")]
    IncompleteCompletion(f64),
}

//
// ─── PROGRESS RECORD ───────────────────────────────────────────────────────────
//

/// A learner's state within one lesson.
///
/// All mutation funnels through [`apply_update`](Self::apply_update) and
/// [`mark_completed`](Self::mark_completed), which enforce the record's
/// invariants: percentage is clamped to `[0, 100]`, time spent only grows,
/// and completion is monotonic (forces 100% and never reverts).
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressRecord {
    lesson_id: LessonId,
    course_id: CourseId,
    progress_percentage: f64,
    time_spent_minutes: u32,
    last_position: Option<LastPosition>,
    is_completed: bool,
    updated_at: DateTime<Utc>,
}

impl ProgressRecord {
    /// Creates the implicit all-zero record for a lesson seen for the first time.
    ///
    /// # Errors
    ///
    /// Returns `ProgressError::EmptyLessonId` if the lesson id is empty.
    pub fn new(
        lesson_id: LessonId,
        course_id: CourseId,
        now: DateTime<Utc>,
    ) -> Result<Self, ProgressError> {
        if lesson_id.as_str().is_empty() {
            return Err(ProgressError::EmptyLessonId);
        }

        Ok(Self {
            lesson_id,
            course_id,
            progress_percentage: 0.0,
            time_spent_minutes: 0,
            last_position: None,
            is_completed: false,
            updated_at: now,
        })
    }

    /// Rehydrate a record from persisted storage.
    ///
    /// Percentage is re-clamped and a completed record is forced to 100% so a
    /// tampered or drifted row can never violate the in-memory invariants.
    ///
    /// # Errors
    ///
    /// Returns `ProgressError::EmptyLessonId` if the lesson id is empty.
    pub fn from_persisted(
        lesson_id: LessonId,
        course_id: CourseId,
        progress_percentage: f64,
        time_spent_minutes: u32,
        last_position: Option<LastPosition>,
        is_completed: bool,
        updated_at: DateTime<Utc>,
    ) -> Result<Self, ProgressError> {
        let mut record = Self::new(lesson_id, course_id, updated_at)?;
        record.progress_percentage = clamp_percentage(progress_percentage);
        record.time_spent_minutes = time_spent_minutes;
        record.last_position = last_position;
        if is_completed || record.progress_percentage >= 100.0 {
            record.progress_percentage = 100.0;
            record.is_completed = true;
        }
        Ok(record)
    }

    #[must_use]
    pub fn lesson_id(&self) -> &LessonId {
        &self.lesson_id
    }

    #[must_use]
    pub fn course_id(&self) -> &CourseId {
        &self.course_id
    }

    #[must_use]
    pub fn progress_percentage(&self) -> f64 {
        self.progress_percentage
    }

    #[must_use]
    pub fn time_spent_minutes(&self) -> u32 {
        self.time_spent_minutes
    }

    #[must_use]
    pub fn last_position(&self) -> Option<&LastPosition> {
        self.last_position.as_ref()
    }

    #[must_use]
    pub fn is_completed(&self) -> bool {
        self.is_completed
    }

    #[must_use]
    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    /// Apply a progress update from the lesson player.
    ///
    /// - `percentage` is clamped to `[0, 100]`; reaching 100 marks the lesson
    ///   completed, and a completed lesson stays completed even when a later
    ///   update reports less than 100.
    /// - `added_minutes` accumulates into `time_spent_minutes`.
    /// - `position`, when present, replaces the stored resume point.
    pub fn apply_update(
        &mut self,
        percentage: f64,
        position: Option<LastPosition>,
        added_minutes: u32,
        now: DateTime<Utc>,
    ) {
        let clamped = clamp_percentage(percentage);
        if self.is_completed {
            self.progress_percentage = 100.0;
        } else {
            self.progress_percentage = clamped;
            if clamped >= 100.0 {
                self.is_completed = true;
            }
        }

        self.time_spent_minutes = self.time_spent_minutes.saturating_add(added_minutes);
        if position.is_some() {
            self.last_position = position;
        }
        self.updated_at = now;
    }

    /// Force the record into the completed state (100%, completed).
    pub fn mark_completed(&mut self, now: DateTime<Utc>) {
        self.progress_percentage = 100.0;
        self.is_completed = true;
        self.updated_at = now;
    }

    /// Returns true when the record was last touched longer than `threshold` ago.
    #[must_use]
    pub fn is_stale(&self, now: DateTime<Utc>, threshold: Duration) -> bool {
        now.signed_duration_since(self.updated_at) > threshold
    }
}

fn clamp_percentage(value: f64) -> f64 {
    if value.is_nan() { 0.0 } else { value.clamp(0.0, 100.0) }
}

//
// ─── TESTS ─────────────────────────────────────────────────────────────────────
//

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::fixed_now;
    use serde_json::json;

    fn fresh() -> ProgressRecord {
        ProgressRecord::new(LessonId::new("lesson-1"), CourseId::new("course-1"), fixed_now())
            .unwrap()
    }

    #[test]
    fn new_record_is_all_zero() {
        let record = fresh();
        assert_eq!(record.progress_percentage(), 0.0);
        assert_eq!(record.time_spent_minutes(), 0);
        assert!(record.last_position().is_none());
        assert!(!record.is_completed());
    }

    #[test]
    fn empty_lesson_id_is_rejected() {
        let err =
            ProgressRecord::new(LessonId::new(""), CourseId::new("c"), fixed_now()).unwrap_err();
        assert_eq!(err, ProgressError::EmptyLessonId);
    }

    #[test]
    fn update_clamps_out_of_range_percentage() {
        let mut record = fresh();
        record.apply_update(-20.0, None, 0, fixed_now());
        assert_eq!(record.progress_percentage(), 0.0);

        record.apply_update(150.0, None, 0, fixed_now());
        assert_eq!(record.progress_percentage(), 100.0);
    }

    #[test]
    fn nan_percentage_clamps_to_zero() {
        let mut record = fresh();
        record.apply_update(f64::NAN, None, 0, fixed_now());
        assert_eq!(record.progress_percentage(), 0.0);
    }

    #[test]
    fn reaching_100_derives_completion() {
        let mut record = fresh();
        record.apply_update(100.0, None, 0, fixed_now());
        assert!(record.is_completed());
    }

    #[test]
    fn completion_never_reverts() {
        let mut record = fresh();
        record.mark_completed(fixed_now());
        record.apply_update(30.0, None, 0, fixed_now());
        assert!(record.is_completed());
        assert_eq!(record.progress_percentage(), 100.0);
    }

    #[test]
    fn overshooting_update_stores_clamped_completed_record() {
        let mut record = fresh();
        let position = LastPosition::new(json!({"slide": 2})).unwrap();
        record.apply_update(150.0, Some(position.clone()), 0, fixed_now());

        assert_eq!(record.progress_percentage(), 100.0);
        assert!(record.is_completed());
        assert_eq!(record.last_position(), Some(&position));
    }

    #[test]
    fn time_spent_accumulates_and_never_resets() {
        let mut record = fresh();
        record.apply_update(10.0, None, 7, fixed_now());
        record.apply_update(20.0, None, 0, fixed_now());
        record.apply_update(30.0, None, 5, fixed_now());
        assert_eq!(record.time_spent_minutes(), 12);
    }

    #[test]
    fn time_spent_saturates_instead_of_overflowing() {
        let mut record = fresh();
        record.apply_update(1.0, None, u32::MAX, fixed_now());
        record.apply_update(2.0, None, 10, fixed_now());
        assert_eq!(record.time_spent_minutes(), u32::MAX);
    }

    #[test]
    fn missing_position_keeps_previous_resume_point() {
        let mut record = fresh();
        let position = LastPosition::new(json!({"slide": 5})).unwrap();
        record.apply_update(10.0, Some(position.clone()), 0, fixed_now());
        record.apply_update(20.0, None, 0, fixed_now());
        assert_eq!(record.last_position(), Some(&position));
    }

    #[test]
    fn from_persisted_normalizes_completion() {
        let record = ProgressRecord::from_persisted(
            LessonId::new("l"),
            CourseId::new("c"),
            80.0,
            3,
            None,
            true,
            fixed_now(),
        )
        .unwrap();
        assert!(record.is_completed());
        assert_eq!(record.progress_percentage(), 100.0);
    }

    #[test]
    fn from_persisted_reclamps_percentage() {
        let record = ProgressRecord::from_persisted(
            LessonId::new("l"),
            CourseId::new("c"),
            240.0,
            0,
            None,
            false,
            fixed_now(),
        )
        .unwrap();
        assert_eq!(record.progress_percentage(), 100.0);
        assert!(record.is_completed());
    }

    #[test]
    fn staleness_tracks_updated_at() {
        let record = fresh();
        let now = fixed_now() + Duration::seconds(61);
        assert!(record.is_stale(now, Duration::seconds(60)));
        assert!(!record.is_stale(fixed_now() + Duration::seconds(30), Duration::seconds(60)));
    }
}
