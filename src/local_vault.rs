//! Plain-directory vault access.
//!
//! [`VaultFiles`] walks a checkout and reads documents from it; both the
//! git provider and [`LocalVault`] use it. [`LocalVault`] is a
//! [`RepositoryProvider`] over a directory with no version control: pulls
//! are no-ops and it never reports upstream changes, so only full syncs
//! and rebuilds pick up edits.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use globset::{Glob, GlobSet, GlobSetBuilder};
use std::path::{Component, Path, PathBuf};
use walkdir::WalkDir;

use vaultsync_core::classify::is_document_path;
use vaultsync_core::models::{CommitInfo, RemoteDiff, RepositoryInfo};
use vaultsync_core::repository::RepositoryProvider;

use crate::config::RepositoryConfig;

/// Directories never descended into.
const SKIPPED_DIRS: &[&str] = &[".git", ".obsidian", ".trash", "node_modules"];

/// File listing and reading rooted at a vault checkout.
pub struct VaultFiles {
    root: PathBuf,
    include: GlobSet,
    exclude: GlobSet,
}

impl VaultFiles {
    pub fn new(root: impl Into<PathBuf>, include: &[String], exclude: &[String]) -> Result<Self> {
        Ok(Self {
            root: root.into(),
            include: build_globset(include)?,
            exclude: build_globset(exclude)?,
        })
    }

    pub fn from_config(config: &RepositoryConfig) -> Result<Self> {
        Self::new(
            config.local_path.clone(),
            &config.include_globs,
            &config.exclude_globs,
        )
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Sorted repo-relative `/`-separated paths of every in-scope `.md` file.
    pub fn list(&self) -> Result<Vec<String>> {
        if !self.root.exists() {
            bail!("Vault directory does not exist: {}", self.root.display());
        }

        let mut paths = Vec::new();
        let walker = WalkDir::new(&self.root).into_iter().filter_entry(|entry| {
            entry.depth() == 0
                || !(entry.file_type().is_dir()
                    && SKIPPED_DIRS.contains(&entry.file_name().to_string_lossy().as_ref()))
        });

        for entry in walker {
            let entry = entry?;
            if !entry.file_type().is_file() {
                continue;
            }
            let relative = entry.path().strip_prefix(&self.root).unwrap_or(entry.path());
            let rel_str = to_slash_path(relative);

            if self.tracks(&rel_str) {
                paths.push(rel_str);
            }
        }

        paths.sort();
        Ok(paths)
    }

    /// `.md` paths matched by the include globs and not by the excludes.
    pub fn tracks(&self, path: &str) -> bool {
        is_document_path(path) && self.include.is_match(path) && !self.exclude.is_match(path)
    }

    /// Read `path`, `None` if it does not exist.
    ///
    /// Absolute paths and `..` components are rejected.
    pub async fn read(&self, path: &str) -> Result<Option<String>> {
        let full = self.resolve(path)?;
        match tokio::fs::read_to_string(&full).await {
            Ok(content) => Ok(Some(content)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e).with_context(|| format!("Failed to read {}", full.display())),
        }
    }

    fn resolve(&self, path: &str) -> Result<PathBuf> {
        let relative = Path::new(path);
        let escapes = relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
        if path.is_empty() || escapes {
            bail!("Path escapes the vault: {}", path);
        }
        Ok(self.root.join(relative))
    }
}

fn to_slash_path(path: &Path) -> String {
    path.components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern).with_context(|| format!("Invalid glob: {}", pattern))?);
    }
    Ok(builder.build()?)
}

/// A vault directory without version control.
pub struct LocalVault {
    files: VaultFiles,
}

impl LocalVault {
    pub fn new(files: VaultFiles) -> Self {
        Self { files }
    }

    pub fn from_config(config: &RepositoryConfig) -> Result<Self> {
        Ok(Self::new(VaultFiles::from_config(config)?))
    }
}

#[async_trait]
impl RepositoryProvider for LocalVault {
    async fn setup(&self) -> Result<()> {
        if !self.files.root().is_dir() {
            bail!("Vault directory does not exist: {}", self.files.root().display());
        }
        Ok(())
    }

    async fn pull(&self) -> Result<()> {
        Ok(())
    }

    async fn list_document_paths(&self) -> Result<Vec<String>> {
        self.files.list()
    }

    async fn read_document(&self, path: &str) -> Result<Option<String>> {
        self.files.read(path).await
    }

    async fn diff_since_last_sync(&self) -> Result<RemoteDiff> {
        Ok(RemoteDiff {
            local_head: "local".to_string(),
            remote_head: "local".to_string(),
            entries: Vec::new(),
        })
    }

    async fn last_sync_info(&self) -> Result<Option<CommitInfo>> {
        Ok(None)
    }

    fn tracks(&self, path: &str) -> bool {
        self.files.tracks(path)
    }

    fn describe(&self) -> RepositoryInfo {
        RepositoryInfo {
            url: format!("file://{}", self.files.root().display()),
            local_path: self.files.root().display().to_string(),
            branch: "local".to_string(),
        }
    }
}
