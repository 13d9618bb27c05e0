//! Source-of-truth repository abstraction.
//!
//! A [`RepositoryProvider`] materializes the vault locally, lists and reads
//! its markdown files, and reports what changed upstream since the last
//! pull. The git-backed and plain-directory providers live in the
//! application crate; [`memory::InMemoryRepository`] is the test double.

pub mod memory;

use anyhow::Result;
use async_trait::async_trait;

use crate::classify::is_document_path;
use crate::models::{CommitInfo, RemoteDiff, RepositoryInfo};

#[async_trait]
pub trait RepositoryProvider: Send + Sync {
    /// Make the vault available locally: clone when absent, otherwise pull.
    async fn setup(&self) -> Result<()>;

    /// Bring the local copy up to the remote head.
    async fn pull(&self) -> Result<()>;

    /// Repo-relative paths of every in-scope document, sorted.
    async fn list_document_paths(&self) -> Result<Vec<String>>;

    /// Content of `path`, or `None` when the file does not exist.
    async fn read_document(&self, path: &str) -> Result<Option<String>>;

    /// Heads and raw diff entries between the local copy and the remote.
    async fn diff_since_last_sync(&self) -> Result<RemoteDiff>;

    /// Last commit of the local copy, when known.
    async fn last_sync_info(&self) -> Result<Option<CommitInfo>>;

    fn describe(&self) -> RepositoryInfo;

    /// Whether `path` is in scope for indexing, regardless of whether it
    /// exists. Providers with include/exclude rules narrow this.
    fn tracks(&self, path: &str) -> bool {
        is_document_path(path)
    }
}
