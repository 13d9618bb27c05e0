//! In-memory [`RepositoryProvider`] for tests.
//!
//! Holds the "local checkout" as a path → content map. A remote update is
//! staged with [`InMemoryRepository::stage_remote`]: the diff is reported
//! by `diff_since_last_sync` and the file updates land on the next `pull`.
//! A path mapped to `None` is listed but cannot be read.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;

use crate::models::{CommitInfo, RawDiffEntry, RemoteDiff, RepositoryInfo};

use super::RepositoryProvider;

/// A pending upstream commit.
struct StagedRemote {
    head: String,
    entries: Vec<RawDiffEntry>,
    updates: Vec<(String, Option<String>)>,
}

#[derive(Default)]
struct State {
    files: BTreeMap<String, Option<String>>,
    head: String,
    staged: Option<StagedRemote>,
    fail_setup: bool,
    fail_pull: bool,
    fail_diff: bool,
}

#[derive(Default)]
pub struct InMemoryRepository {
    state: Mutex<State>,
    pulls: AtomicUsize,
    setups: AtomicUsize,
}

impl InMemoryRepository {
    pub fn new() -> Self {
        let repo = Self::default();
        repo.lock().head = "0000000".to_string();
        repo
    }

    /// Build a repository whose checkout holds `files`.
    pub fn with_files<I, P, C>(files: I) -> Self
    where
        I: IntoIterator<Item = (P, C)>,
        P: Into<String>,
        C: Into<String>,
    {
        let repo = Self::new();
        for (path, content) in files {
            repo.insert(path, content);
        }
        repo
    }

    pub fn insert(&self, path: impl Into<String>, content: impl Into<String>) {
        self.lock().files.insert(path.into(), Some(content.into()));
    }

    /// List `path` without making it readable.
    pub fn insert_unreadable(&self, path: impl Into<String>) {
        self.lock().files.insert(path.into(), None);
    }

    /// Stage an upstream commit. `updates` are applied by the next `pull`;
    /// `None` deletes the file.
    pub fn stage_remote(
        &self,
        head: impl Into<String>,
        entries: Vec<RawDiffEntry>,
        updates: Vec<(String, Option<String>)>,
    ) {
        self.lock().staged = Some(StagedRemote {
            head: head.into(),
            entries,
            updates,
        });
    }

    pub fn fail_setup(&self, fail: bool) {
        self.lock().fail_setup = fail;
    }

    pub fn fail_pull(&self, fail: bool) {
        self.lock().fail_pull = fail;
    }

    pub fn fail_diff(&self, fail: bool) {
        self.lock().fail_diff = fail;
    }

    pub fn pull_count(&self) -> usize {
        self.pulls.load(Ordering::SeqCst)
    }

    pub fn setup_count(&self) -> usize {
        self.setups.load(Ordering::SeqCst)
    }

    pub fn head(&self) -> String {
        self.lock().head.clone()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn apply_staged(state: &mut State) {
        if let Some(staged) = state.staged.take() {
            for (path, content) in staged.updates {
                match content {
                    Some(content) => {
                        state.files.insert(path, Some(content));
                    }
                    None => {
                        state.files.remove(&path);
                    }
                }
            }
            state.head = staged.head;
        }
    }
}

#[async_trait]
impl RepositoryProvider for InMemoryRepository {
    async fn setup(&self) -> Result<()> {
        self.setups.fetch_add(1, Ordering::SeqCst);
        let mut state = self.lock();
        if state.fail_setup {
            bail!("repository unreachable");
        }
        Self::apply_staged(&mut state);
        Ok(())
    }

    async fn pull(&self) -> Result<()> {
        self.pulls.fetch_add(1, Ordering::SeqCst);
        let mut state = self.lock();
        if state.fail_pull {
            bail!("remote rejected fetch");
        }
        Self::apply_staged(&mut state);
        Ok(())
    }

    async fn list_document_paths(&self) -> Result<Vec<String>> {
        Ok(self
            .lock()
            .files
            .keys()
            .filter(|p| p.ends_with(".md"))
            .cloned()
            .collect())
    }

    async fn read_document(&self, path: &str) -> Result<Option<String>> {
        Ok(self.lock().files.get(path).cloned().flatten())
    }

    async fn diff_since_last_sync(&self) -> Result<RemoteDiff> {
        let state = self.lock();
        if state.fail_diff {
            return Err(anyhow!("could not reach remote"));
        }
        Ok(match &state.staged {
            Some(staged) => RemoteDiff {
                local_head: state.head.clone(),
                remote_head: staged.head.clone(),
                entries: staged.entries.clone(),
            },
            None => RemoteDiff {
                local_head: state.head.clone(),
                remote_head: state.head.clone(),
                entries: Vec::new(),
            },
        })
    }

    async fn last_sync_info(&self) -> Result<Option<CommitInfo>> {
        Ok(Some(CommitInfo {
            commit_id: self.lock().head.clone(),
            commit_date: "1970-01-01T00:00:00+00:00".to_string(),
            commit_message: "in-memory".to_string(),
        }))
    }

    fn describe(&self) -> RepositoryInfo {
        RepositoryInfo {
            url: "memory://vault".to_string(),
            local_path: String::new(),
            branch: "main".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn staged_remote_applies_on_pull() {
        let repo = InMemoryRepository::with_files([("a.md", "old"), ("b.md", "keep")]);
        repo.stage_remote(
            "1111111",
            vec![
                RawDiffEntry::new("M", Some("a.md"), Some("a.md")),
                RawDiffEntry::new("D", Some("b.md"), None),
            ],
            vec![("a.md".into(), Some("new".into())), ("b.md".into(), None)],
        );

        let diff = repo.diff_since_last_sync().await.unwrap();
        assert_ne!(diff.local_head, diff.remote_head);
        assert_eq!(diff.entries.len(), 2);
        assert_eq!(repo.read_document("a.md").await.unwrap().as_deref(), Some("old"));

        repo.pull().await.unwrap();
        assert_eq!(repo.read_document("a.md").await.unwrap().as_deref(), Some("new"));
        assert_eq!(repo.list_document_paths().await.unwrap(), vec!["a.md"]);
        let after = repo.diff_since_last_sync().await.unwrap();
        assert_eq!(after.local_head, after.remote_head);
        assert_eq!(repo.pull_count(), 1);
    }

    #[tokio::test]
    async fn unreadable_files_are_listed() {
        let repo = InMemoryRepository::new();
        repo.insert_unreadable("broken.md");
        assert_eq!(repo.list_document_paths().await.unwrap(), vec!["broken.md"]);
        assert!(repo.read_document("broken.md").await.unwrap().is_none());
        assert!(repo.read_document("missing.md").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn failed_pull_keeps_staged_changes() {
        let repo = InMemoryRepository::with_files([("a.md", "old")]);
        repo.stage_remote("2", vec![], vec![("a.md".into(), Some("new".into()))]);
        repo.fail_pull(true);
        assert!(repo.pull().await.is_err());
        assert_eq!(repo.read_document("a.md").await.unwrap().as_deref(), Some("old"));
    }
}
