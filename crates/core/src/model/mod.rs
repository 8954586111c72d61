mod events;
mod ids;
mod position;
mod progress;
mod settings;

pub use events::SyncEvent;
pub use ids::{CourseId, LessonId};
pub use position::{LastPosition, PositionError};
pub use progress::{ProgressError, ProgressRecord};
pub use settings::{SyncSettings, SyncSettingsError};
