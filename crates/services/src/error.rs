//! Shared error types for the services crate.

use thiserror::Error;

use lesson_core::model::ProgressError;
use storage::gateway::GatewayError;
use storage::repository::StorageError;

/// Errors emitted by `ProgressSynchronizer`.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum SyncError {
    /// The operation needs the network and the synchronizer is offline.
    ///
    /// An expected condition, not a bug: callers surface it as a status
    /// indicator, never as a crash.
    #[error("offline")]
    Offline,
    #[error(transparent)]
    Gateway(#[from] GatewayError),
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Progress(#[from] ProgressError),
}

/// Errors emitted by `ProgressSession`.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum SessionError {
    #[error("session already closed")]
    Closed,
    #[error(transparent)]
    Progress(#[from] ProgressError),
    #[error(transparent)]
    Sync(#[from] SyncError),
}
