//! Git-backed [`RepositoryProvider`].
//!
//! Drives the `git` CLI against a local checkout of the vault:
//!
//! - `setup` clones `url@branch` into `local_path`, or pulls if a checkout
//!   already exists.
//! - `pull` fetches, hard-resets to `origin/<branch>`, and updates
//!   submodules when the vault has any.
//! - `diff_since_last_sync` fetches and reports
//!   `git diff --name-status -M HEAD origin/<branch>`.
//!
//! A token (from the env var named by `repository.token_env`) is spliced
//! into HTTPS clone URLs and scrubbed from any error output.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::process::Command;

use vaultsync_core::models::{CommitInfo, RawDiffEntry, RemoteDiff, RepositoryInfo};
use vaultsync_core::repository::RepositoryProvider;

use crate::config::RepositoryConfig;
use crate::local_vault::VaultFiles;

pub struct GitRepository {
    url: String,
    branch: String,
    local_path: PathBuf,
    token: Option<String>,
    files: VaultFiles,
}

impl GitRepository {
    pub fn from_config(config: &RepositoryConfig) -> Result<Self> {
        let url = config
            .url
            .clone()
            .context("repository.url is required for the git provider")?;
        Ok(Self {
            url,
            branch: config.branch.clone(),
            local_path: config.local_path.clone(),
            token: config.token(),
            files: VaultFiles::from_config(config)?,
        })
    }

    fn is_cloned(&self) -> bool {
        self.local_path.join(".git").exists()
    }

    fn remote_ref(&self) -> String {
        format!("origin/{}", self.branch)
    }

    async fn git(&self, dir: &Path, args: &[&str]) -> Result<String> {
        let output = Command::new("git")
            .args(args)
            .current_dir(dir)
            .env("GIT_TERMINAL_PROMPT", "0")
            .output()
            .await
            .with_context(|| format!("Failed to execute 'git {}'. Is git installed?", args[0]))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            bail!(
                "git {} failed: {}",
                args[0],
                redact(stderr.trim(), self.token.as_deref())
            );
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    async fn clone_repo(&self) -> Result<()> {
        let parent = self
            .local_path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        tokio::fs::create_dir_all(parent)
            .await
            .with_context(|| format!("Failed to create directory: {}", parent.display()))?;

        let url = authenticated_url(&self.url, self.token.as_deref());
        let dest = self.local_path.to_string_lossy().into_owned();
        tracing::info!(url = %self.url, branch = %self.branch, dest = %dest, "cloning vault");
        self.git(
            Path::new("."),
            &[
                "clone",
                "--branch",
                &self.branch,
                "--single-branch",
                "--recurse-submodules",
                &url,
                &dest,
            ],
        )
        .await?;
        Ok(())
    }

    async fn fetch(&self) -> Result<()> {
        self.git(&self.local_path, &["fetch", "origin", &self.branch])
            .await?;
        Ok(())
    }

    async fn rev_parse(&self, rev: &str) -> Result<String> {
        Ok(self
            .git(&self.local_path, &["rev-parse", rev])
            .await?
            .trim()
            .to_string())
    }
}

#[async_trait]
impl RepositoryProvider for GitRepository {
    async fn setup(&self) -> Result<()> {
        if self.is_cloned() {
            self.pull().await
        } else {
            self.clone_repo().await
        }
    }

    async fn pull(&self) -> Result<()> {
        if !self.is_cloned() {
            bail!("Repository not cloned at {}", self.local_path.display());
        }
        self.fetch().await?;
        let remote_ref = self.remote_ref();
        self.git(&self.local_path, &["reset", "--hard", &remote_ref])
            .await?;
        if self.local_path.join(".gitmodules").exists() {
            self.git(
                &self.local_path,
                &["submodule", "update", "--init", "--recursive"],
            )
            .await?;
        }
        tracing::debug!(branch = %self.branch, "pulled latest changes");
        Ok(())
    }

    async fn list_document_paths(&self) -> Result<Vec<String>> {
        self.files.list()
    }

    async fn read_document(&self, path: &str) -> Result<Option<String>> {
        self.files.read(path).await
    }

    async fn diff_since_last_sync(&self) -> Result<RemoteDiff> {
        if !self.is_cloned() {
            bail!("Repository not cloned at {}", self.local_path.display());
        }
        self.fetch().await?;
        let local_head = self.rev_parse("HEAD").await?;
        let remote_head = self.rev_parse(&self.remote_ref()).await?;

        let entries = if local_head == remote_head {
            Vec::new()
        } else {
            let raw = self
                .git(
                    &self.local_path,
                    &["diff", "--name-status", "-M", "-z", &local_head, &remote_head],
                )
                .await?;
            parse_name_status(&raw)
        };

        Ok(RemoteDiff {
            local_head,
            remote_head,
            entries,
        })
    }

    async fn last_sync_info(&self) -> Result<Option<CommitInfo>> {
        if !self.is_cloned() {
            return Ok(None);
        }
        let raw = self
            .git(&self.local_path, &["log", "-1", "--format=%H%x00%cI%x00%s"])
            .await?;
        Ok(parse_commit_line(&raw))
    }

    fn tracks(&self, path: &str) -> bool {
        self.files.tracks(path)
    }

    fn describe(&self) -> RepositoryInfo {
        RepositoryInfo {
            url: self.url.clone(),
            local_path: self.local_path.display().to_string(),
            branch: self.branch.clone(),
        }
    }
}

/// Splice `token` into an HTTPS URL as `https://<token>@host/...`.
///
/// Non-HTTPS URLs and URLs that already carry credentials are returned
/// unchanged.
pub fn authenticated_url(url: &str, token: Option<&str>) -> String {
    match (token, url.strip_prefix("https://")) {
        (Some(token), Some(rest)) if !rest.contains('@') => format!("https://{}@{}", token, rest),
        _ => url.to_string(),
    }
}

fn redact(message: &str, token: Option<&str>) -> String {
    match token {
        Some(token) if !token.is_empty() => message.replace(token, "***"),
        _ => message.to_string(),
    }
}

/// Parse NUL-separated `git diff --name-status -z` output.
///
/// Renames and copies carry two paths (old, new); every other status one.
pub fn parse_name_status(raw: &str) -> Vec<RawDiffEntry> {
    let mut fields = raw.split('\0').filter(|f| !f.is_empty());
    let mut entries = Vec::new();

    while let Some(marker) = fields.next() {
        let marker = marker.trim();
        let entry = match marker.chars().next() {
            Some('R') | Some('C') => {
                let (Some(old), Some(new)) = (fields.next(), fields.next()) else {
                    break;
                };
                RawDiffEntry::new(marker, Some(old), Some(new))
            }
            Some('D') => match fields.next() {
                Some(path) => RawDiffEntry::new(marker, Some(path), None),
                None => break,
            },
            Some('A') => match fields.next() {
                Some(path) => RawDiffEntry::new(marker, None, Some(path)),
                None => break,
            },
            _ => match fields.next() {
                Some(path) => RawDiffEntry::new(marker, Some(path), Some(path)),
                None => break,
            },
        };
        entries.push(entry);
    }
    entries
}

fn parse_commit_line(raw: &str) -> Option<CommitInfo> {
    let mut parts = raw.trim_end_matches('\n').splitn(3, '\0');
    let commit_id = parts.next()?.trim();
    if commit_id.is_empty() {
        return None;
    }
    Some(CommitInfo {
        commit_id: commit_id.to_string(),
        commit_date: parts.next().unwrap_or_default().to_string(),
        commit_message: parts.next().unwrap_or_default().to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_is_spliced_into_https_urls() {
        assert_eq!(
            authenticated_url("https://github.com/o/v.git", Some("tok")),
            "https://tok@github.com/o/v.git"
        );
        assert_eq!(
            authenticated_url("https://github.com/o/v.git", None),
            "https://github.com/o/v.git"
        );
        assert_eq!(
            authenticated_url("git@github.com:o/v.git", Some("tok")),
            "git@github.com:o/v.git"
        );
        assert_eq!(
            authenticated_url("https://me@github.com/o/v.git", Some("tok")),
            "https://me@github.com/o/v.git"
        );
    }

    #[test]
    fn redacts_token() {
        assert_eq!(
            redact("fatal: https://secret@github.com denied", Some("secret")),
            "fatal: https://***@github.com denied"
        );
        assert_eq!(redact("plain", None), "plain");
    }

    #[test]
    fn parses_name_status() {
        let raw = "M\0notes/a.md\0A\0new.md\0D\0gone.md\0R087\0old.md\0moved/new.md\0";
        let entries = parse_name_status(raw);
        assert_eq!(
            entries,
            vec![
                RawDiffEntry::new("M", Some("notes/a.md"), Some("notes/a.md")),
                RawDiffEntry::new("A", None, Some("new.md")),
                RawDiffEntry::new("D", Some("gone.md"), None),
                RawDiffEntry::new("R087", Some("old.md"), Some("moved/new.md")),
            ]
        );
    }

    #[test]
    fn parses_paths_with_spaces_and_tabs() {
        let entries = parse_name_status("M\0Daily Notes/2024\t01.md\0");
        assert_eq!(entries[0].new_path.as_deref(), Some("Daily Notes/2024\t01.md"));
    }

    #[test]
    fn truncated_output_stops_cleanly() {
        assert!(parse_name_status("R100\0only-old.md\0").is_empty());
        assert!(parse_name_status("").is_empty());
    }

    #[test]
    fn parses_commit_line() {
        let info = parse_commit_line("abc123\x002024-01-15T10:30:00+00:00\x00Update notes\n").unwrap();
        assert_eq!(info.commit_id, "abc123");
        assert_eq!(info.commit_date, "2024-01-15T10:30:00+00:00");
        assert_eq!(info.commit_message, "Update notes");
        assert!(parse_commit_line("").is_none());
    }
}
