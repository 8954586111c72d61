#![forbid(unsafe_code)]

pub mod error;
pub mod session;
pub mod sync;

pub use lesson_core::Clock;

pub use error::{SessionError, SyncError};
pub use session::{FlushState, ProgressSession, SessionSnapshot};
pub use sync::{ProgressSynchronizer, SaveOutcome, Subscription};
