use crate::model::ids::LessonId;

/// Cross-lesson events published on the synchronizer's global bus.
///
/// Observers subscribe once and match on the variant they care about (a
/// dashboard listens for `LessonCompleted`, a status bar for the offline
/// sync outcomes).
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum SyncEvent {
    /// A lesson was explicitly completed.
    LessonCompleted { lesson_id: LessonId },
    /// A lesson's progress record changed.
    LessonProgressUpdated { lesson_id: LessonId },
    /// Reconnection flushed the durable cache; `pushed` records reached the server.
    OfflineSyncCompleted { pushed: usize },
    /// Reconnection flush ran but `failed` records could not be pushed.
    OfflineSyncFailed { failed: usize },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_carry_their_lesson() {
        let event = SyncEvent::LessonCompleted {
            lesson_id: LessonId::new("l1"),
        };
        match event {
            SyncEvent::LessonCompleted { lesson_id } => assert_eq!(lesson_id.as_str(), "l1"),
            _ => panic!("unexpected variant"),
        }
    }
}
