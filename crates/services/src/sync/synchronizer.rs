use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use tokio::task::JoinHandle;
use tracing::{debug, warn};

use lesson_core::Clock;
use lesson_core::model::{CourseId, LessonId, ProgressRecord, SyncEvent, SyncSettings};
use storage::gateway::PersistenceGateway;
use storage::repository::ProgressCache;

use super::subscribers::{SubscriberRegistry, Subscription};
use crate::error::SyncError;

/// Where a saved record ended up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveOutcome {
    /// The remote store acknowledged the write.
    Remote,
    /// Offline or the write failed; the record went to the durable local cache.
    CachedLocally,
}

/// Single shared authority for in-memory progress state.
///
/// Owns the canonical record per lesson, fans notifications out to observers,
/// and reconciles online and offline operation. Constructed explicitly and
/// shared by `Arc` — there is no global instance.
///
/// The key ordering rule: [`save_progress`](Self::save_progress) notifies
/// observers *before* any persistence attempt, so the UI is never blocked on
/// network success. Remote reads, when they succeed, overwrite local state
/// unconditionally — the server is authoritative whenever it is reachable.
pub struct ProgressSynchronizer {
    gateway: Arc<dyn PersistenceGateway>,
    cache: Arc<dyn ProgressCache>,
    settings: SyncSettings,
    clock: Clock,
    online: AtomicBool,
    records: Mutex<HashMap<LessonId, ProgressRecord>>,
    subscribers: Arc<SubscriberRegistry>,
}

impl ProgressSynchronizer {
    /// Create a synchronizer that starts online with default settings.
    #[must_use]
    pub fn new(gateway: Arc<dyn PersistenceGateway>, cache: Arc<dyn ProgressCache>) -> Self {
        Self {
            gateway,
            cache,
            settings: SyncSettings::default(),
            clock: Clock::default(),
            online: AtomicBool::new(true),
            records: Mutex::new(HashMap::new()),
            subscribers: Arc::new(SubscriberRegistry::new()),
        }
    }

    #[must_use]
    pub fn with_settings(mut self, settings: SyncSettings) -> Self {
        self.settings = settings;
        self
    }

    #[must_use]
    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    #[must_use]
    pub fn settings(&self) -> &SyncSettings {
        &self.settings
    }

    #[must_use]
    pub fn clock(&self) -> &Clock {
        &self.clock
    }

    pub(crate) fn gateway(&self) -> &Arc<dyn PersistenceGateway> {
        &self.gateway
    }

    pub(crate) fn cache(&self) -> &Arc<dyn ProgressCache> {
        &self.cache
    }

    #[must_use]
    pub fn is_online(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }

    /// Record a network status transition.
    ///
    /// Coming back online immediately flushes offline-saved progress; going
    /// offline only flags state (writes silently start landing in the local
    /// cache).
    pub async fn set_online(&self, online: bool) {
        let was_online = self.online.swap(online, Ordering::SeqCst);
        if online && !was_online {
            self.sync_offline_progress().await;
        }
    }

    /// Register an observer for one lesson. Multiple observers per lesson are
    /// supported; dropping the returned handle unsubscribes.
    pub fn subscribe(
        &self,
        lesson_id: LessonId,
        callback: impl Fn(&ProgressRecord) + Send + Sync + 'static,
    ) -> Subscription {
        self.subscribers.subscribe(lesson_id, callback)
    }

    /// Register an observer on the cross-lesson event bus.
    pub fn subscribe_events(
        &self,
        callback: impl Fn(&SyncEvent) + Send + Sync + 'static,
    ) -> Subscription {
        self.subscribers.subscribe_events(callback)
    }

    /// The single write path into the in-memory cache: stores the record and
    /// invokes every observer for its lesson before returning.
    pub fn notify(&self, record: ProgressRecord) {
        {
            let mut guard = self
                .records
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            guard.insert(record.lesson_id().clone(), record.clone());
        }
        self.subscribers.notify_lesson(&record);
    }

    /// Publish an event on the global bus.
    pub fn publish(&self, event: &SyncEvent) {
        self.subscribers.publish(event);
    }

    /// Synchronous read of the in-memory cache. Never triggers I/O.
    ///
    /// Returns an owned snapshot; mutating it has no effect until it is
    /// handed back through [`save_progress`](Self::save_progress).
    #[must_use]
    pub fn cached_progress(&self, lesson_id: &LessonId) -> Option<ProgressRecord> {
        let guard = self
            .records
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        guard.get(lesson_id).cloned()
    }

    /// Canonical write path used by session controllers.
    ///
    /// Observers are notified first, unconditionally. Then, when online, the
    /// record goes to the remote store; a failed write — or being offline —
    /// falls back to the durable local cache. Failures of the fallback itself
    /// are swallowed and logged: losing the safety net must never crash the
    /// caller.
    pub async fn save_progress(&self, record: ProgressRecord) -> SaveOutcome {
        self.notify(record.clone());
        self.publish(&SyncEvent::LessonProgressUpdated {
            lesson_id: record.lesson_id().clone(),
        });

        if self.is_online() {
            match self.gateway.write_progress(&record).await {
                Ok(()) => return SaveOutcome::Remote,
                Err(error) => {
                    warn!(
                        lesson = %record.lesson_id(),
                        %error,
                        "remote save failed, falling back to local cache"
                    );
                }
            }
        }

        if let Err(error) = self.cache.save(&record, self.clock.now()).await {
            warn!(
                lesson = %record.lesson_id(),
                %error,
                "local cache save failed; record kept in memory only"
            );
        }
        SaveOutcome::CachedLocally
    }

    /// Authoritative pull for one lesson.
    ///
    /// Fails fast with `SyncError::Offline` when offline — no queuing. On
    /// success the server result overwrites any local optimistic state; a
    /// missing server record becomes the all-zero default.
    ///
    /// # Errors
    ///
    /// Returns `SyncError::Offline` when offline, or gateway errors.
    pub async fn force_sync_lesson(
        &self,
        lesson_id: &LessonId,
        course_id: &CourseId,
    ) -> Result<ProgressRecord, SyncError> {
        if !self.is_online() {
            return Err(SyncError::Offline);
        }

        let now = self.clock.now();
        let record = match self.gateway.read_progress(lesson_id).await? {
            Some(remote) => remote.into_record(lesson_id.clone(), now)?,
            None => ProgressRecord::new(lesson_id.clone(), course_id.clone(), now)?,
        };

        self.notify(record.clone());
        Ok(record)
    }

    /// Bulk reconciliation: re-fetch every cached lesson whose record is
    /// staler than the configured threshold, concurrently. One lesson's
    /// failure never aborts the batch.
    pub async fn sync_all(&self) {
        if !self.is_online() {
            return;
        }

        let now = self.clock.now();
        let stale: Vec<LessonId> = {
            let guard = self
                .records
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            guard
                .values()
                .filter(|r| r.is_stale(now, self.settings.stale_after()))
                .map(|r| r.lesson_id().clone())
                .collect()
        };

        let fetches = stale.into_iter().map(|lesson_id| async move {
            match self.gateway.read_progress(&lesson_id).await {
                Ok(Some(remote)) => match remote.into_record(lesson_id.clone(), self.clock.now())
                {
                    Ok(record) => self.notify(record),
                    Err(error) => {
                        warn!(lesson = %lesson_id, %error, "discarding malformed server record");
                    }
                },
                Ok(None) => {}
                Err(error) => {
                    warn!(lesson = %lesson_id, %error, "bulk refresh failed for lesson");
                }
            }
        });
        futures::future::join_all(fetches).await;
    }

    /// Flush offline-saved records to the server after a reconnect.
    ///
    /// Entries older than the offline discard threshold are skipped (not
    /// deleted, not trusted). Emits `OfflineSyncCompleted` or
    /// `OfflineSyncFailed` on the global bus when done.
    pub async fn sync_offline_progress(&self) {
        let entries = match self.cache.load_all().await {
            Ok(entries) => entries,
            Err(error) => {
                warn!(%error, "could not read local cache for offline sync");
                self.publish(&SyncEvent::OfflineSyncFailed { failed: 0 });
                return;
            }
        };

        let now = self.clock.now();
        let max_age = self.settings.offline_max_age();
        let mut pushed = 0_usize;
        let mut failed = 0_usize;

        for entry in entries {
            if entry.is_expired(now, max_age) {
                debug!(
                    lesson = %entry.record.lesson_id(),
                    "skipping expired offline record"
                );
                continue;
            }

            match self.gateway.write_progress(&entry.record).await {
                Ok(()) => {
                    pushed += 1;
                    self.notify(entry.record.clone());
                    if let Err(error) = self.cache.remove(entry.record.lesson_id()).await {
                        warn!(
                            lesson = %entry.record.lesson_id(),
                            %error,
                            "pushed record could not be removed from local cache"
                        );
                    }
                }
                Err(error) => {
                    failed += 1;
                    warn!(
                        lesson = %entry.record.lesson_id(),
                        %error,
                        "offline record push failed"
                    );
                }
            }
        }

        if failed == 0 {
            self.publish(&SyncEvent::OfflineSyncCompleted { pushed });
        } else {
            self.publish(&SyncEvent::OfflineSyncFailed { failed });
        }
    }

    /// Spawn the periodic reconcile loop (`sync_all` every `sync_every`).
    ///
    /// The task holds only a weak reference and exits once the synchronizer
    /// is dropped; abort the returned handle for an earlier stop.
    pub fn spawn_periodic_sync(self: &Arc<Self>) -> JoinHandle<()> {
        let weak = Arc::downgrade(self);
        let every = self.settings.sync_every();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(every);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // The first tick completes immediately.
            interval.tick().await;
            loop {
                interval.tick().await;
                let Some(sync) = weak.upgrade() else { break };
                if sync.is_online() {
                    sync.sync_all().await;
                }
            }
        })
    }

    /// Release all subscriptions and cached state.
    pub fn cleanup(&self) {
        self.subscribers.clear();
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

//
// ─── TESTS ─────────────────────────────────────────────────────────────────────
//
