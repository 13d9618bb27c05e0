//! Run-level sync failures.
//!
//! Per-file problems never surface here; they are counted in
//! [`SyncStats::failed`](vaultsync_core::models::SyncStats) and reported
//! as warning/error progress events.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("A sync operation is already in progress")]
    Busy,
    #[error("Failed to setup repository: {0}")]
    Setup(String),
    #[error("Failed to pull changes: {0}")]
    Pull(String),
    #[error("Failed to check for changes: {0}")]
    Diff(String),
    #[error("Failed to clear index: {0}")]
    Clear(String),
    #[error("Failed to list documents: {0}")]
    List(String),
    #[error("Failed to process document: {0}")]
    Document(String),
    #[error("Sync cancelled")]
    Cancelled,
    #[error("File not found: {0}")]
    NotFound(String),
    #[error("Not a tracked document: {0}")]
    Untracked(String),
    #[error("Sync task aborted: {0}")]
    Aborted(String),
    #[error("Index store error: {0}")]
    Store(String),
}

impl SyncError {
    /// Machine-readable code used in HTTP error bodies.
    pub fn code(&self) -> &'static str {
        match self {
            SyncError::Busy => "busy",
            SyncError::Setup(_) => "setup_failed",
            SyncError::Pull(_) => "pull_failed",
            SyncError::Diff(_) => "diff_failed",
            SyncError::Clear(_) => "clear_failed",
            SyncError::List(_) => "list_failed",
            SyncError::Document(_) => "document_failed",
            SyncError::Cancelled => "cancelled",
            SyncError::NotFound(_) => "not_found",
            SyncError::Untracked(_) => "bad_request",
            SyncError::Aborted(_) => "aborted",
            SyncError::Store(_) => "store_error",
        }
    }

    pub(crate) fn setup(err: anyhow::Error) -> Self {
        SyncError::Setup(format!("{err:#}"))
    }

    pub(crate) fn pull(err: anyhow::Error) -> Self {
        SyncError::Pull(format!("{err:#}"))
    }

    pub(crate) fn diff(err: anyhow::Error) -> Self {
        SyncError::Diff(format!("{err:#}"))
    }

    pub(crate) fn clear(err: anyhow::Error) -> Self {
        SyncError::Clear(format!("{err:#}"))
    }

    pub(crate) fn list(err: anyhow::Error) -> Self {
        SyncError::List(format!("{err:#}"))
    }

    pub(crate) fn store(err: anyhow::Error) -> Self {
        SyncError::Store(format!("{err:#}"))
    }
}
