use thiserror::Error;

use crate::model::{PositionError, ProgressError, SyncSettingsError};

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Progress(#[from] ProgressError),
    #[error(transparent)]
    Position(#[from] PositionError),
    #[error(transparent)]
    Settings(#[from] SyncSettingsError),
}
