use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Utc};
use tracing::warn;

use lesson_core::model::{CourseId, LastPosition, LessonId, ProgressRecord, SyncEvent};

use super::state::{FlushState, SessionSnapshot};
use crate::error::SessionError;
use crate::sync::{ProgressSynchronizer, Subscription};

struct SessionState {
    record: ProgressRecord,
    // Wall-clock accounting. Whole minutes are applied to the record as they
    // accumulate; the running remainder carries over between updates.
    anchor: DateTime<Utc>,
    accumulated_secs: i64,
    minutes_applied: u32,
    flush: FlushState,
    loading: bool,
    error: Option<String>,
    last_saved: Option<DateTime<Utc>>,
    closed: bool,
}

/// Consume elapsed wall-clock time and return the whole minutes not yet
/// applied to the record.
fn accrue_minutes(state: &mut SessionState, now: DateTime<Utc>) -> u32 {
    let elapsed = now.signed_duration_since(state.anchor).num_seconds().max(0);
    state.accumulated_secs += elapsed;
    state.anchor = now;

    let total_minutes = u32::try_from(state.accumulated_secs / 60).unwrap_or(u32::MAX);
    let added = total_minutes.saturating_sub(state.minutes_applied);
    state.minutes_applied = total_minutes;
    added
}

struct SessionInner {
    sync: Arc<ProgressSynchronizer>,
    lesson_id: LessonId,
    course_id: CourseId,
    state: Mutex<SessionState>,
    // Flushes run one at a time; concurrent triggers queue here.
    flush_lock: tokio::sync::Mutex<()>,
    // Debounce generation: scheduling bumps it, a sleeper only fires if its
    // generation is still current. Cancel-by-replacement, no task handles.
    generation: AtomicU64,
}

impl SessionInner {
    fn lock_state(&self) -> std::sync::MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn schedule_flush(self: &Arc<Self>) {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let delay = self.sync.settings().save_interval();
        let weak = Arc::downgrade(self);
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let Some(inner) = weak.upgrade() else { return };
            if inner.generation.load(Ordering::SeqCst) != generation {
                return;
            }
            inner.flush().await;
        });
    }

    /// Push the current record through the synchronizer's save path.
    ///
    /// A mutation arriving while the save is in flight re-dirties the state
    /// instead of being folded into this flush, so it is never lost.
    async fn flush(self: &Arc<Self>) {
        let _serialized = self.flush_lock.lock().await;

        let record = {
            let mut guard = self.lock_state();
            if !guard.flush.is_pending() {
                return;
            }
            guard.flush = FlushState::Flushing;
            guard.record.clone()
        };

        self.sync.save_progress(record).await;

        let mut guard = self.lock_state();
        guard.last_saved = Some(self.sync.clock().now());
        guard.error = None;
        if guard.flush == FlushState::Flushing {
            guard.flush = FlushState::Idle;
        }
    }
}

/// One learner's live session within one lesson.
///
/// Owns the working copy of the progress record, measures time spent, and
/// debounces saves through the shared [`ProgressSynchronizer`]. Mutations are
/// synchronous; persistence happens in the background after the configured
/// quiet period, with rapid updates collapsing into one save of the newest
/// state.
pub struct ProgressSession {
    inner: Arc<SessionInner>,
    _subscription: Subscription,
}

impl ProgressSession {
    /// Open a session, pulling the authoritative record when configured and
    /// reachable.
    ///
    /// Offline (or on a failed fetch) the session falls back to the freshest
    /// local copy — in-memory first, then the durable cache — and otherwise
    /// starts from the all-zero record.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::Progress` for an empty lesson id.
    pub async fn start(
        sync: Arc<ProgressSynchronizer>,
        lesson_id: LessonId,
        course_id: CourseId,
    ) -> Result<Self, SessionError> {
        let now = sync.clock().now();
        let mut record = ProgressRecord::new(lesson_id.clone(), course_id.clone(), now)?;
        let mut error = None;

        if sync.settings().sync_on_mount() {
            if sync.is_online() {
                match sync.force_sync_lesson(&lesson_id, &course_id).await {
                    Ok(fresh) => record = fresh,
                    Err(sync_error) => {
                        warn!(
                            lesson = %lesson_id,
                            %sync_error,
                            "initial fetch failed, starting from local state"
                        );
                        error = Some(sync_error.to_string());
                        if let Some(local) = load_local(&sync, &lesson_id).await {
                            record = local;
                        }
                    }
                }
            } else if let Some(local) = load_local(&sync, &lesson_id).await {
                record = local;
            }
        }

        let inner = Arc::new(SessionInner {
            sync: sync.clone(),
            lesson_id: lesson_id.clone(),
            course_id,
            state: Mutex::new(SessionState {
                record,
                anchor: sync.clock().now(),
                accumulated_secs: 0,
                minutes_applied: 0,
                flush: FlushState::Idle,
                loading: false,
                error,
                last_saved: None,
                closed: false,
            }),
            flush_lock: tokio::sync::Mutex::new(()),
            generation: AtomicU64::new(0),
        });

        // Track broadcasts for this lesson (another session, an offline
        // flush, a bulk refresh) — but never clobber unsaved local edits.
        let weak = Arc::downgrade(&inner);
        let subscription = sync.subscribe(lesson_id, move |broadcast| {
            let Some(inner) = weak.upgrade() else { return };
            let mut guard = inner.lock_state();
            if !guard.closed && guard.flush == FlushState::Idle {
                guard.record = broadcast.clone();
            }
        });

        Ok(Self {
            inner,
            _subscription: subscription,
        })
    }

    #[must_use]
    pub fn lesson_id(&self) -> &LessonId {
        &self.inner.lesson_id
    }

    /// Owned view of the current session state.
    #[must_use]
    pub fn snapshot(&self) -> SessionSnapshot {
        let guard = self.inner.lock_state();
        SessionSnapshot {
            record: guard.record.clone(),
            flush: guard.flush,
            loading: guard.loading,
            error: guard.error.clone(),
            last_saved: guard.last_saved,
        }
    }

    /// Returns true when the record holds changes not yet persisted.
    #[must_use]
    pub fn pending_changes(&self) -> bool {
        self.inner.lock_state().flush.is_pending()
    }

    /// Record a progress update from the lesson player.
    ///
    /// Synchronous: the record mutates immediately and observers can read the
    /// new state at once. With auto-save enabled a debounced flush is
    /// (re)scheduled; each call replaces the previous timer, so a burst of
    /// updates produces one save of the final state.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::Closed` after [`close`](Self::close).
    pub fn update_progress(
        &self,
        percentage: f64,
        position: Option<LastPosition>,
    ) -> Result<(), SessionError> {
        let auto_save = self.inner.sync.settings().auto_save();
        {
            let mut guard = self.inner.lock_state();
            if guard.closed {
                return Err(SessionError::Closed);
            }
            let now = self.inner.sync.clock().now();
            let added = accrue_minutes(&mut guard, now);
            guard.record.apply_update(percentage, position, added, now);
            guard.flush = if auto_save {
                FlushState::Scheduled
            } else {
                FlushState::Dirty
            };
        }
        if auto_save {
            self.inner.schedule_flush();
        }
        Ok(())
    }

    /// Flush pending changes immediately, cancelling any scheduled save.
    ///
    /// A no-op when nothing is pending.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::Closed` after [`close`](Self::close).
    pub async fn save_now(&self) -> Result<(), SessionError> {
        {
            let guard = self.inner.lock_state();
            if guard.closed {
                return Err(SessionError::Closed);
            }
            if !guard.flush.is_pending() {
                return Ok(());
            }
        }
        self.inner.generation.fetch_add(1, Ordering::SeqCst);
        self.inner.flush().await;
        Ok(())
    }

    /// Mark the lesson completed and persist right away, bypassing the
    /// debounce.
    ///
    /// When online the dedicated completion endpoint is called first; its
    /// failure is logged but non-fatal, since the regular save that follows
    /// carries the completed record anyway. Publishes `LessonCompleted` on
    /// the global bus.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::Closed` after [`close`](Self::close).
    pub async fn complete_lesson(&self) -> Result<(), SessionError> {
        let record = {
            let mut guard = self.inner.lock_state();
            if guard.closed {
                return Err(SessionError::Closed);
            }
            let now = self.inner.sync.clock().now();
            let added = accrue_minutes(&mut guard, now);
            let percentage = guard.record.progress_percentage();
            guard.record.apply_update(percentage, None, added, now);
            guard.record.mark_completed(now);
            guard.flush = FlushState::Flushing;
            guard.record.clone()
        };
        self.inner.generation.fetch_add(1, Ordering::SeqCst);

        let _serialized = self.inner.flush_lock.lock().await;
        let sync = &self.inner.sync;
        if sync.is_online() {
            if let Err(error) = sync.gateway().complete_progress(&self.inner.lesson_id).await {
                warn!(
                    lesson = %self.inner.lesson_id,
                    %error,
                    "completion endpoint failed, relying on the regular save"
                );
            }
        }
        sync.save_progress(record).await;
        sync.publish(&SyncEvent::LessonCompleted {
            lesson_id: self.inner.lesson_id.clone(),
        });

        let mut guard = self.inner.lock_state();
        guard.last_saved = Some(sync.clock().now());
        guard.error = None;
        if guard.flush == FlushState::Flushing {
            guard.flush = FlushState::Idle;
        }
        Ok(())
    }

    /// Re-fetch the authoritative record, discarding pending local edits.
    ///
    /// The server wins: on success any unsaved changes are dropped and the
    /// scheduled flush is cancelled.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::Closed` after [`close`](Self::close), and
    /// `SessionError::Sync` when offline or when the fetch fails; the failure
    /// also lands in the snapshot's `error` field.
    pub async fn refresh(&self) -> Result<ProgressRecord, SessionError> {
        {
            let mut guard = self.inner.lock_state();
            if guard.closed {
                return Err(SessionError::Closed);
            }
            guard.loading = true;
        }

        let result = self
            .inner
            .sync
            .force_sync_lesson(&self.inner.lesson_id, &self.inner.course_id)
            .await;

        let mut guard = self.inner.lock_state();
        guard.loading = false;
        match result {
            Ok(record) => {
                self.inner.generation.fetch_add(1, Ordering::SeqCst);
                guard.record = record.clone();
                guard.flush = FlushState::Idle;
                guard.error = None;
                Ok(record)
            }
            Err(error) => {
                guard.error = Some(error.to_string());
                Err(SessionError::Sync(error))
            }
        }
    }

    /// End the session: flush pending changes and stop accepting mutations.
    ///
    /// Idempotent; a second call is a no-op.
    ///
    /// # Errors
    ///
    /// Currently infallible; the `Result` reserves room for a failing final
    /// flush to become reportable.
    pub async fn close(&self) -> Result<(), SessionError> {
        let pending = {
            let mut guard = self.inner.lock_state();
            if guard.closed {
                return Ok(());
            }
            guard.closed = true;
            guard.flush.is_pending()
        };
        self.inner.generation.fetch_add(1, Ordering::SeqCst);
        if pending {
            self.inner.flush().await;
        }
        Ok(())
    }
}

impl Drop for ProgressSession {
    fn drop(&mut self) {
        let pending = {
            let mut guard = self.inner.lock_state();
            if guard.closed {
                return;
            }
            guard.closed = true;
            guard.flush.is_pending()
        };
        if !pending {
            return;
        }
        // Best effort: a detached task finishes the save if a runtime is
        // still around.
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let inner = self.inner.clone();
                handle.spawn(async move { inner.flush().await });
            }
            Err(_) => {
                warn!(
                    lesson = %self.inner.lesson_id,
                    "session dropped with unsaved changes outside a runtime"
                );
            }
        }
    }
}

async fn load_local(
    sync: &ProgressSynchronizer,
    lesson_id: &LessonId,
) -> Option<ProgressRecord> {
    if let Some(record) = sync.cached_progress(lesson_id) {
        return Some(record);
    }
    match sync.cache().load(lesson_id).await {
        Ok(Some(entry)) => Some(entry.record),
        Ok(None) => None,
        Err(error) => {
            warn!(lesson = %lesson_id, %error, "durable cache read failed during session start");
            None
        }
    }
}

//
// ─── TESTS ─────────────────────────────────────────────────────────────────────
//
