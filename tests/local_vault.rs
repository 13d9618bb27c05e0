use std::fs;
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;

use vaultsync::local_vault::{LocalVault, VaultFiles};
use vaultsync::reconcile::{Reconciler, SyncSettings};
use vaultsync_core::repository::RepositoryProvider;
use vaultsync_core::store::memory::InMemoryIndex;
use vaultsync_core::store::IndexStore;

fn write(root: &Path, rel: &str, content: &str) {
    let path = root.join(rel);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, content).unwrap();
}

fn vault() -> TempDir {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path();
    write(root, "index.md", "# Home");
    write(root, "daily/2024-01-01.md", "journal");
    write(root, "projects/plan.md", "plan");
    write(root, "projects/draft/wip.md", "wip");
    write(root, "attachments/diagram.png", "png");
    write(root, "notes.txt", "not markdown");
    write(root, ".git/HEAD.md", "ref");
    write(root, ".obsidian/workspace.md", "{}");
    tmp
}

#[test]
fn lists_markdown_and_skips_tool_directories() {
    let tmp = vault();
    let files = VaultFiles::new(tmp.path(), &["**/*.md".into()], &[]).unwrap();

    assert_eq!(
        files.list().unwrap(),
        vec![
            "daily/2024-01-01.md",
            "index.md",
            "projects/draft/wip.md",
            "projects/plan.md",
        ]
    );
}

#[test]
fn include_and_exclude_globs_apply() {
    let tmp = vault();
    let files = VaultFiles::new(
        tmp.path(),
        &["projects/**".into()],
        &["projects/draft/**".into()],
    )
    .unwrap();

    assert_eq!(files.list().unwrap(), vec!["projects/plan.md"]);
}

#[test]
fn invalid_glob_is_rejected() {
    let tmp = vault();
    assert!(VaultFiles::new(tmp.path(), &["[".into()], &[]).is_err());
}

#[test]
fn missing_root_fails_listing() {
    let tmp = TempDir::new().unwrap();
    let files = VaultFiles::new(tmp.path().join("nope"), &["**/*.md".into()], &[]).unwrap();
    assert!(files.list().is_err());
}

#[tokio::test]
async fn read_returns_none_for_missing_files() {
    let tmp = vault();
    let files = VaultFiles::new(tmp.path(), &["**/*.md".into()], &[]).unwrap();

    assert_eq!(files.read("index.md").await.unwrap().as_deref(), Some("# Home"));
    assert_eq!(files.read("ghost.md").await.unwrap(), None);
}

#[tokio::test]
async fn read_rejects_paths_outside_the_vault() {
    let tmp = vault();
    let files = VaultFiles::new(tmp.path().join("daily"), &["**/*.md".into()], &[]).unwrap();

    assert!(files.read("../index.md").await.is_err());
    assert!(files.read("").await.is_err());
}

#[tokio::test]
async fn local_vault_never_reports_changes() {
    let tmp = vault();
    let repo = LocalVault::new(VaultFiles::new(tmp.path(), &["**/*.md".into()], &[]).unwrap());

    repo.setup().await.unwrap();
    repo.pull().await.unwrap();
    let diff = repo.diff_since_last_sync().await.unwrap();
    assert_eq!(diff.local_head, diff.remote_head);
    assert!(diff.entries.is_empty());
    assert!(repo.last_sync_info().await.unwrap().is_none());
    assert_eq!(repo.describe().branch, "local");
}

#[test]
fn tracks_follows_extension_and_globs() {
    let tmp = vault();
    let files = VaultFiles::new(
        tmp.path(),
        &["**/*.md".into()],
        &["projects/draft/**".into()],
    )
    .unwrap();

    assert!(files.tracks("index.md"));
    assert!(files.tracks("projects/plan.md"));
    assert!(!files.tracks("projects/draft/wip.md"));
    assert!(!files.tracks("attachments/diagram.png"));
    assert!(!files.tracks("notes.txt"));
}

#[tokio::test]
async fn reindex_of_excluded_file_is_a_bad_request() {
    let tmp = vault();
    let files = VaultFiles::new(
        tmp.path(),
        &["**/*.md".into()],
        &["projects/draft/**".into()],
    )
    .unwrap();
    let store = Arc::new(InMemoryIndex::new());
    let reconciler = Reconciler::new(
        Arc::new(LocalVault::new(files)),
        Arc::clone(&store),
        SyncSettings::default(),
    );

    let rejected = reconciler.force_reindex("projects/draft/wip.md").await;
    assert!(!rejected.success);
    assert_eq!(rejected.error.unwrap().code, "bad_request");
    assert!(store.list_indexed_paths().await.unwrap().is_empty());

    let accepted = reconciler.force_reindex("projects/plan.md").await;
    assert!(accepted.success);
    assert_eq!(store.list_indexed_paths().await.unwrap(), vec!["projects/plan.md"]);
}
