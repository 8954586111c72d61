use std::collections::HashMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};

use tracing::warn;

use lesson_core::model::{LessonId, ProgressRecord, SyncEvent};

/// Per-lesson observer callback. Receives the full current record, never a diff.
pub type ProgressCallback = Arc<dyn Fn(&ProgressRecord) + Send + Sync>;

/// Global bus callback. Receives every event; observers match on the variant.
pub type EventCallback = Arc<dyn Fn(&SyncEvent) + Send + Sync>;

struct Entry<T> {
    id: u64,
    callback: T,
}

enum SubscriptionKey {
    Lesson(LessonId, u64),
    Global(u64),
}

/// RAII handle for a registered observer; dropping it unsubscribes.
///
/// Holds only a weak reference, so an outliving handle never keeps the
/// registry (and everything behind it) alive.
pub struct Subscription {
    registry: Weak<SubscriberRegistry>,
    key: Option<SubscriptionKey>,
}

impl Drop for Subscription {
    fn drop(&mut self) {
        let Some(key) = self.key.take() else {
            return;
        };
        if let Some(registry) = self.registry.upgrade() {
            registry.remove(&key);
        }
    }
}

/// Fan-out hub for per-lesson observers and the cross-lesson event bus.
///
/// Callbacks run synchronously in registration order. Each invocation is
/// isolated: one panicking observer never prevents the rest from running, and
/// the panic never reaches the notifier.
#[derive(Default)]
pub struct SubscriberRegistry {
    next_id: AtomicU64,
    lessons: Mutex<HashMap<LessonId, Vec<Entry<ProgressCallback>>>>,
    events: Mutex<Vec<Entry<EventCallback>>>,
}

impl SubscriberRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Register a per-lesson observer.
    pub fn subscribe(
        self: &Arc<Self>,
        lesson_id: LessonId,
        callback: impl Fn(&ProgressRecord) + Send + Sync + 'static,
    ) -> Subscription {
        let id = self.next_id();
        let mut guard = self
            .lessons
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        guard.entry(lesson_id.clone()).or_default().push(Entry {
            id,
            callback: Arc::new(callback),
        });
        Subscription {
            registry: Arc::downgrade(self),
            key: Some(SubscriptionKey::Lesson(lesson_id, id)),
        }
    }

    /// Register a global bus observer.
    pub fn subscribe_events(
        self: &Arc<Self>,
        callback: impl Fn(&SyncEvent) + Send + Sync + 'static,
    ) -> Subscription {
        let id = self.next_id();
        let mut guard = self.events.lock().unwrap_or_else(PoisonError::into_inner);
        guard.push(Entry {
            id,
            callback: Arc::new(callback),
        });
        Subscription {
            registry: Arc::downgrade(self),
            key: Some(SubscriptionKey::Global(id)),
        }
    }

    /// Invoke every observer registered for the record's lesson.
    pub fn notify_lesson(&self, record: &ProgressRecord) {
        // Callbacks are cloned out so observers may subscribe/unsubscribe
        // from within a callback without deadlocking.
        let callbacks: Vec<ProgressCallback> = {
            let guard = self
                .lessons
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            guard
                .get(record.lesson_id())
                .map(|entries| entries.iter().map(|e| e.callback.clone()).collect())
                .unwrap_or_default()
        };

        for callback in callbacks {
            if let Err(panic) = catch_unwind(AssertUnwindSafe(|| callback(record))) {
                warn!(
                    lesson = %record.lesson_id(),
                    "progress observer panicked: {panic:?}"
                );
            }
        }
    }

    /// Publish an event to every global observer.
    pub fn publish(&self, event: &SyncEvent) {
        let callbacks: Vec<EventCallback> = {
            let guard = self.events.lock().unwrap_or_else(PoisonError::into_inner);
            guard.iter().map(|e| e.callback.clone()).collect()
        };

        for callback in callbacks {
            if let Err(panic) = catch_unwind(AssertUnwindSafe(|| callback(event))) {
                warn!("event observer panicked: {panic:?}");
            }
        }
    }

    /// Drop every registration.
    pub fn clear(&self) {
        self.lessons
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    /// Number of observers registered for a lesson.
    #[must_use]
    pub fn lesson_subscriber_count(&self, lesson_id: &LessonId) -> usize {
        self.lessons
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(lesson_id)
            .map_or(0, Vec::len)
    }

    fn remove(&self, key: &SubscriptionKey) {
        match key {
            SubscriptionKey::Lesson(lesson_id, id) => {
                let mut guard = self
                    .lessons
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner);
                if let Some(entries) = guard.get_mut(lesson_id) {
                    entries.retain(|e| e.id != *id);
                    if entries.is_empty() {
                        guard.remove(lesson_id);
                    }
                }
            }
            SubscriptionKey::Global(id) => {
                let mut guard = self.events.lock().unwrap_or_else(PoisonError::into_inner);
                guard.retain(|e| e.id != *id);
            }
        }
    }
}

//
// ─── TESTS ─────────────────────────────────────────────────────────────────────
//

#[cfg(test)]
mod tests {
    use super::*;
    use lesson_core::model::CourseId;
    use lesson_core::time::fixed_now;
    use std::sync::atomic::AtomicUsize;

    fn build_record(lesson: &str) -> ProgressRecord {
        ProgressRecord::new(LessonId::new(lesson), CourseId::new("c"), fixed_now()).unwrap()
    }

    #[test]
    fn notifies_subscribers_in_registration_order() {
        let registry = Arc::new(SubscriberRegistry::new());
        let order = Arc::new(Mutex::new(Vec::new()));

        let o1 = order.clone();
        let _s1 = registry.subscribe(LessonId::new("l1"), move |_| {
            o1.lock().unwrap().push(1);
        });
        let o2 = order.clone();
        let _s2 = registry.subscribe(LessonId::new("l1"), move |_| {
            o2.lock().unwrap().push(2);
        });

        registry.notify_lesson(&build_record("l1"));
        assert_eq!(*order.lock().unwrap(), vec![1, 2]);
    }

    #[test]
    fn panicking_subscriber_does_not_break_fanout() {
        let registry = Arc::new(SubscriberRegistry::new());
        let seen = Arc::new(AtomicUsize::new(0));

        let _bad = registry.subscribe(LessonId::new("l1"), |_| {
            panic!("misbehaving observer");
        });
        let seen_clone = seen.clone();
        let _good = registry.subscribe(LessonId::new("l1"), move |_| {
            seen_clone.fetch_add(1, Ordering::SeqCst);
        });

        registry.notify_lesson(&build_record("l1"));
        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn dropping_the_subscription_unsubscribes() {
        let registry = Arc::new(SubscriberRegistry::new());
        let seen = Arc::new(AtomicUsize::new(0));

        let seen_clone = seen.clone();
        let subscription = registry.subscribe(LessonId::new("l1"), move |_| {
            seen_clone.fetch_add(1, Ordering::SeqCst);
        });
        registry.notify_lesson(&build_record("l1"));
        drop(subscription);
        registry.notify_lesson(&build_record("l1"));

        assert_eq!(seen.load(Ordering::SeqCst), 1);
        assert_eq!(registry.lesson_subscriber_count(&LessonId::new("l1")), 0);
    }

    #[test]
    fn other_lessons_are_not_notified() {
        let registry = Arc::new(SubscriberRegistry::new());
        let seen = Arc::new(AtomicUsize::new(0));

        let seen_clone = seen.clone();
        let _s = registry.subscribe(LessonId::new("l1"), move |_| {
            seen_clone.fetch_add(1, Ordering::SeqCst);
        });
        registry.notify_lesson(&build_record("l2"));
        assert_eq!(seen.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn global_bus_reaches_every_event_observer() {
        let registry = Arc::new(SubscriberRegistry::new());
        let seen = Arc::new(AtomicUsize::new(0));

        let s1 = seen.clone();
        let _e1 = registry.subscribe_events(move |_| {
            s1.fetch_add(1, Ordering::SeqCst);
        });
        let s2 = seen.clone();
        let _e2 = registry.subscribe_events(move |_| {
            s2.fetch_add(1, Ordering::SeqCst);
        });

        registry.publish(&SyncEvent::OfflineSyncCompleted { pushed: 2 });
        assert_eq!(seen.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn clear_drops_every_registration() {
        let registry = Arc::new(SubscriberRegistry::new());
        let seen = Arc::new(AtomicUsize::new(0));

        let s1 = seen.clone();
        let _sub = registry.subscribe(LessonId::new("l1"), move |_| {
            s1.fetch_add(1, Ordering::SeqCst);
        });
        registry.clear();
        registry.notify_lesson(&build_record("l1"));
        assert_eq!(seen.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn subscribing_from_a_callback_does_not_deadlock() {
        let registry = Arc::new(SubscriberRegistry::new());
        let registry_clone = registry.clone();
        let late = Arc::new(Mutex::new(None));

        let late_clone = late.clone();
        let _s = registry.subscribe(LessonId::new("l1"), move |_| {
            let sub = registry_clone.subscribe(LessonId::new("l1"), |_| {});
            *late_clone.lock().unwrap() = Some(sub);
        });

        registry.notify_lesson(&build_record("l1"));
        assert_eq!(registry.lesson_subscriber_count(&LessonId::new("l1")), 2);
    }
}
