mod subscribers;
mod synchronizer;

// Public API of the sync subsystem.
pub use crate::error::SyncError;
pub use subscribers::{SubscriberRegistry, Subscription};
pub use synchronizer::{ProgressSynchronizer, SaveOutcome};
