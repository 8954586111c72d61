use chrono::{DateTime, Utc};

use lesson_core::model::ProgressRecord;

/// Lifecycle of the session's pending save.
///
/// `Idle → Dirty → Scheduled → Flushing → Idle`. A mutation during a flush
/// moves the state back to `Dirty`/`Scheduled` instead of `Idle`, so the
/// change is never lost.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FlushState {
    /// Everything saved; nothing pending.
    #[default]
    Idle,
    /// The record changed since the last save.
    Dirty,
    /// A debounced flush is queued.
    Scheduled,
    /// A flush is writing right now.
    Flushing,
}

impl FlushState {
    /// Returns true when the record holds changes not yet persisted.
    #[must_use]
    pub fn is_pending(self) -> bool {
        self != FlushState::Idle
    }
}

/// Owned point-in-time view of a session, for UI rendering.
///
/// A plain value: holding one never blocks the session.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionSnapshot {
    pub record: ProgressRecord,
    pub flush: FlushState,
    pub loading: bool,
    pub error: Option<String>,
    pub last_saved: Option<DateTime<Utc>>,
}

impl SessionSnapshot {
    /// Returns true when unsaved changes exist.
    #[must_use]
    pub fn pending_changes(&self) -> bool {
        self.flush.is_pending()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_idle_is_not_pending() {
        assert!(!FlushState::Idle.is_pending());
        assert!(FlushState::Dirty.is_pending());
        assert!(FlushState::Scheduled.is_pending());
        assert!(FlushState::Flushing.is_pending());
    }
}
