use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use lesson_core::model::{LessonId, ProgressRecord};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use thiserror::Error;

/// Errors surfaced by storage adapters.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum StorageError {
    #[error("connection error: {0}")]
    Connection(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}

/// Persisted shape for a locally cached progress record.
///
/// Mirrors the domain `ProgressRecord` plus the moment it was written, so the
/// offline flush can skip entries that are too old to trust.
#[derive(Debug, Clone, PartialEq)]
pub struct CachedProgress {
    pub record: ProgressRecord,
    pub cached_at: DateTime<Utc>,
}

impl CachedProgress {
    #[must_use]
    pub fn new(record: ProgressRecord, cached_at: DateTime<Utc>) -> Self {
        Self { record, cached_at }
    }

    /// Returns true when the entry is older than `max_age` and must not be
    /// pushed to the server during an offline flush.
    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>, max_age: Duration) -> bool {
        now.signed_duration_since(self.cached_at) > max_age
    }
}

/// Contract for the local durable progress cache.
///
/// The cache is a best-effort safety net, not the source of truth: callers
/// swallow and log its failures, and the system stays correct if every entry
/// is lost.
#[async_trait]
pub trait ProgressCache: Send + Sync {
    /// Persist or overwrite the cached record for a lesson.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the entry cannot be stored.
    async fn save(
        &self,
        record: &ProgressRecord,
        cached_at: DateTime<Utc>,
    ) -> Result<(), StorageError>;

    /// Fetch the cached record for a lesson.
    ///
    /// Returns `None` when the entry is absent or corrupted; corruption is
    /// treated as absence, never as an error.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the underlying store cannot be reached.
    async fn load(&self, lesson_id: &LessonId) -> Result<Option<CachedProgress>, StorageError>;

    /// Fetch every cached record, skipping corrupted entries.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the underlying store cannot be reached.
    async fn load_all(&self) -> Result<Vec<CachedProgress>, StorageError>;

    /// Remove the cached record for a lesson after a successful push.
    ///
    /// Removing an absent entry is not an error.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the underlying store cannot be reached.
    async fn remove(&self, lesson_id: &LessonId) -> Result<(), StorageError>;
}

/// Simple in-memory cache implementation for testing and prototyping.
#[derive(Clone, Default)]
pub struct InMemoryCache {
    entries: Arc<Mutex<HashMap<LessonId, CachedProgress>>>,
}

impl InMemoryCache {
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Number of cached entries; handy in tests.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::Connection` if the lock is poisoned.
    pub fn len(&self) -> Result<usize, StorageError> {
        let guard = self
            .entries
            .lock()
            .map_err(|e| StorageError::Connection(e.to_string()))?;
        Ok(guard.len())
    }

    /// Returns true when the cache holds no entries.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::Connection` if the lock is poisoned.
    pub fn is_empty(&self) -> Result<bool, StorageError> {
        Ok(self.len()? == 0)
    }
}

#[async_trait]
impl ProgressCache for InMemoryCache {
    async fn save(
        &self,
        record: &ProgressRecord,
        cached_at: DateTime<Utc>,
    ) -> Result<(), StorageError> {
        let mut guard = self
            .entries
            .lock()
            .map_err(|e| StorageError::Connection(e.to_string()))?;
        guard.insert(
            record.lesson_id().clone(),
            CachedProgress::new(record.clone(), cached_at),
        );
        Ok(())
    }

    async fn load(&self, lesson_id: &LessonId) -> Result<Option<CachedProgress>, StorageError> {
        let guard = self
            .entries
            .lock()
            .map_err(|e| StorageError::Connection(e.to_string()))?;
        Ok(guard.get(lesson_id).cloned())
    }

    async fn load_all(&self) -> Result<Vec<CachedProgress>, StorageError> {
        let guard = self
            .entries
            .lock()
            .map_err(|e| StorageError::Connection(e.to_string()))?;
        let mut entries: Vec<CachedProgress> = guard.values().cloned().collect();
        entries.sort_by(|a, b| a.record.lesson_id().cmp(b.record.lesson_id()));
        Ok(entries)
    }

    async fn remove(&self, lesson_id: &LessonId) -> Result<(), StorageError> {
        let mut guard = self
            .entries
            .lock()
            .map_err(|e| StorageError::Connection(e.to_string()))?;
        guard.remove(lesson_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lesson_core::model::CourseId;
    use lesson_core::time::fixed_now;

    fn build_record(lesson: &str, percentage: f64) -> ProgressRecord {
        let mut record =
            ProgressRecord::new(LessonId::new(lesson), CourseId::new("course-1"), fixed_now())
                .unwrap();
        record.apply_update(percentage, None, 0, fixed_now());
        record
    }

    #[tokio::test]
    async fn save_overwrites_existing_entry() {
        let cache = InMemoryCache::new();
        cache
            .save(&build_record("l1", 10.0), fixed_now())
            .await
            .unwrap();
        cache
            .save(&build_record("l1", 40.0), fixed_now())
            .await
            .unwrap();

        assert_eq!(cache.len().unwrap(), 1);
        let loaded = cache.load(&LessonId::new("l1")).await.unwrap().unwrap();
        assert_eq!(loaded.record.progress_percentage(), 40.0);
    }

    #[tokio::test]
    async fn load_missing_returns_none() {
        let cache = InMemoryCache::new();
        assert!(cache.load(&LessonId::new("nope")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn remove_is_idempotent() {
        let cache = InMemoryCache::new();
        cache
            .save(&build_record("l1", 10.0), fixed_now())
            .await
            .unwrap();
        cache.remove(&LessonId::new("l1")).await.unwrap();
        cache.remove(&LessonId::new("l1")).await.unwrap();
        assert!(cache.is_empty().unwrap());
    }

    #[tokio::test]
    async fn load_all_returns_every_entry() {
        let cache = InMemoryCache::new();
        cache
            .save(&build_record("a", 10.0), fixed_now())
            .await
            .unwrap();
        cache
            .save(&build_record("b", 20.0), fixed_now())
            .await
            .unwrap();

        let all = cache.load_all().await.unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].record.lesson_id().as_str(), "a");
        assert_eq!(all[1].record.lesson_id().as_str(), "b");
    }

    #[test]
    fn expiry_follows_cached_at() {
        let entry = CachedProgress::new(build_record("l1", 10.0), fixed_now());
        let day = Duration::hours(24);
        assert!(entry.is_expired(fixed_now() + Duration::hours(25), day));
        assert!(!entry.is_expired(fixed_now() + Duration::hours(23), day));
    }
}
