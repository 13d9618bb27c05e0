use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

fn vsync_binary() -> PathBuf {
    let mut path = std::env::current_exe().unwrap();
    path.pop(); // remove test binary name
    path.pop(); // remove deps/
    path.push("vsync");
    path
}

fn setup_test_env() -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let config_dir = root.join("config");
    fs::create_dir_all(&config_dir).unwrap();

    let vault = root.join("vault");
    fs::create_dir_all(vault.join("daily")).unwrap();
    fs::create_dir_all(vault.join(".obsidian")).unwrap();
    fs::write(
        vault.join("alpha.md"),
        "# Alpha Document\n\nThis is the alpha document about Rust programming.\n\nIt contains information about cargo and crates. #rust",
    )
    .unwrap();
    fs::write(
        vault.join("beta.md"),
        "---\ntitle: Beta\ntags: [python]\n---\nThis document discusses Python and machine learning.",
    )
    .unwrap();
    fs::write(
        vault.join("daily/2024-01-01.md"),
        "Weekly review. Shipped the [[alpha]] parser.",
    )
    .unwrap();
    fs::write(vault.join("notes.txt"), "plain text is not indexed").unwrap();
    fs::write(vault.join(".obsidian/app.md"), "settings").unwrap();

    let config_content = format!(
        r#"[repository]
mode = "local"
local_path = "{root}/vault"

[db]
path = "{root}/data/vsync.sqlite"

[chunking]
max_tokens = 200

[server]
bind = "127.0.0.1:8005"
"#,
        root = root.display()
    );

    let config_path = config_dir.join("vsync.toml");
    fs::write(&config_path, config_content).unwrap();

    (tmp, config_path)
}

fn run_vsync(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let binary = vsync_binary();
    let output = Command::new(&binary)
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .args(args)
        .output()
        .unwrap_or_else(|e| panic!("Failed to run vsync binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    let success = output.status.success();
    (stdout, stderr, success)
}

fn json(stdout: &str) -> serde_json::Value {
    serde_json::from_str(stdout).unwrap_or_else(|e| panic!("not JSON ({}): {}", e, stdout))
}

#[test]
fn test_init_idempotent() {
    let (tmp, config_path) = setup_test_env();

    let (stdout, stderr, success) = run_vsync(&config_path, &["init"]);
    assert!(success, "init failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("initialized"));
    assert!(tmp.path().join("data/vsync.sqlite").exists());

    let (_, _, success) = run_vsync(&config_path, &["init"]);
    assert!(success, "Second init failed (not idempotent)");
}

#[test]
fn test_full_sync_indexes_markdown_only() {
    let (_tmp, config_path) = setup_test_env();

    run_vsync(&config_path, &["init"]);
    let (stdout, stderr, success) = run_vsync(&config_path, &["sync", "--full"]);
    assert!(success, "sync failed: stdout={}, stderr={}", stdout, stderr);

    let outcome = json(&stdout);
    assert_eq!(outcome["success"], true);
    assert_eq!(outcome["stats"]["processed"], 3);
    assert_eq!(outcome["stats"]["failed"], 0);
}

#[test]
fn test_full_sync_no_duplicates() {
    let (_tmp, config_path) = setup_test_env();

    run_vsync(&config_path, &["init"]);
    run_vsync(&config_path, &["sync", "--full"]);
    run_vsync(&config_path, &["sync", "--full"]);

    let (stdout, _, success) = run_vsync(&config_path, &["stats"]);
    assert!(success);
    let stats = json(&stdout);
    assert_eq!(stats["document_count"], 3);
    assert_eq!(stats["chunk_count"], 3);
    assert_eq!(stats["model"], "fts5");
}

#[test]
fn test_incremental_sync_in_local_mode_is_noop() {
    let (_tmp, config_path) = setup_test_env();

    run_vsync(&config_path, &["init"]);
    let (stdout, _, success) = run_vsync(&config_path, &["sync"]);
    assert!(success);

    let outcome = json(&stdout);
    assert_eq!(outcome["message"], "No changes detected");
    assert_eq!(outcome["stats"]["processed"], 0);
}

#[test]
fn test_json_progress_on_stderr() {
    let (_tmp, config_path) = setup_test_env();

    run_vsync(&config_path, &["init"]);
    let (_, stderr, success) =
        run_vsync(&config_path, &["sync", "--full", "--progress", "json"]);
    assert!(success);

    let events: Vec<serde_json::Value> = stderr
        .lines()
        .filter_map(|l| serde_json::from_str(l).ok())
        .filter(|v: &serde_json::Value| v.get("type").is_some())
        .collect();
    assert_eq!(events.first().unwrap()["type"], "status");
    assert_eq!(events.last().unwrap()["type"], "complete");
    assert_eq!(events.last().unwrap()["progress"], 100);
    assert_eq!(
        events.iter().filter(|e| e["type"] == "file_complete").count(),
        3
    );
}

#[test]
fn test_search_keyword() {
    let (_tmp, config_path) = setup_test_env();

    run_vsync(&config_path, &["init"]);
    run_vsync(&config_path, &["sync", "--full"]);

    let (stdout, _, success) = run_vsync(&config_path, &["search", "Rust programming"]);
    assert!(success, "search failed");
    let hits = json(&stdout);
    assert_eq!(hits[0]["path"], "alpha.md");
    assert_eq!(hits[0]["title"], "Alpha Document");
}

#[test]
fn test_search_filters() {
    let (_tmp, config_path) = setup_test_env();

    run_vsync(&config_path, &["init"]);
    run_vsync(&config_path, &["sync", "--full"]);

    let (stdout, _, success) =
        run_vsync(&config_path, &["search", "document", "--tag", "python"]);
    assert!(success);
    let hits = json(&stdout);
    assert_eq!(hits.as_array().unwrap().len(), 1);
    assert_eq!(hits[0]["path"], "beta.md");

    let (stdout, _, success) = run_vsync(&config_path, &["search", "", "--path", "daily/**"]);
    assert!(success);
    let hits = json(&stdout);
    assert_eq!(hits.as_array().unwrap().len(), 1);
    assert_eq!(hits[0]["links"][0], "alpha");
}

#[test]
fn test_search_deterministic() {
    let (_tmp, config_path) = setup_test_env();

    run_vsync(&config_path, &["init"]);
    run_vsync(&config_path, &["sync", "--full"]);

    let (stdout1, _, _) = run_vsync(&config_path, &["search", "document"]);
    let (stdout2, _, _) = run_vsync(&config_path, &["search", "document"]);
    assert_eq!(
        stdout1, stdout2,
        "Search results should be deterministic across runs"
    );
}

#[test]
fn test_search_no_results() {
    let (_tmp, config_path) = setup_test_env();

    run_vsync(&config_path, &["init"]);
    run_vsync(&config_path, &["sync", "--full"]);

    let (_, stderr, success) = run_vsync(&config_path, &["search", "xyznonexistent"]);
    assert!(success);
    assert!(stderr.contains("No results"));
}

#[test]
fn test_cleanup_removes_deleted_files() {
    let (tmp, config_path) = setup_test_env();

    run_vsync(&config_path, &["init"]);
    run_vsync(&config_path, &["sync", "--full"]);
    fs::remove_file(tmp.path().join("vault/beta.md")).unwrap();

    let (stdout, _, success) = run_vsync(&config_path, &["cleanup"]);
    assert!(success);
    let report = json(&stdout);
    assert_eq!(report["removed"], 1);

    let (stdout, _, _) = run_vsync(&config_path, &["stats"]);
    assert_eq!(json(&stdout)["document_count"], 2);
}

#[test]
fn test_rebuild_drops_deleted_files() {
    let (tmp, config_path) = setup_test_env();

    run_vsync(&config_path, &["init"]);
    run_vsync(&config_path, &["sync", "--full"]);
    fs::remove_file(tmp.path().join("vault/alpha.md")).unwrap();

    let (stdout, stderr, success) = run_vsync(&config_path, &["rebuild"]);
    assert!(success, "rebuild failed: {}", stderr);
    assert_eq!(json(&stdout)["stats"]["processed"], 2);

    let (stdout, _, _) = run_vsync(&config_path, &["search", "Rust"]);
    assert_eq!(json(&stdout).as_array().unwrap().len(), 0);
}

#[test]
fn test_reindex_single_file() {
    let (tmp, config_path) = setup_test_env();

    run_vsync(&config_path, &["init"]);
    run_vsync(&config_path, &["sync", "--full"]);
    fs::write(tmp.path().join("vault/beta.md"), "Now about Haskell.").unwrap();

    let (stdout, _, success) = run_vsync(&config_path, &["reindex", "beta.md"]);
    assert!(success);
    assert_eq!(json(&stdout)["chunks"], 1);

    let (stdout, _, _) = run_vsync(&config_path, &["search", "Haskell"]);
    assert_eq!(json(&stdout)[0]["path"], "beta.md");
}

#[test]
fn test_reindex_missing_file_fails() {
    let (_tmp, config_path) = setup_test_env();

    run_vsync(&config_path, &["init"]);
    let (_, stderr, success) = run_vsync(&config_path, &["reindex", "ghost.md"]);
    assert!(!success, "reindex of a missing file should fail");
    assert!(
        stderr.contains("File not found: ghost.md"),
        "Should report not found, got: {}",
        stderr
    );
}

#[test]
fn test_status_reports_local_vault() {
    let (_tmp, config_path) = setup_test_env();

    run_vsync(&config_path, &["init"]);
    run_vsync(&config_path, &["sync", "--full"]);

    let (stdout, _, success) = run_vsync(&config_path, &["status"]);
    assert!(success);
    let status = json(&stdout);
    assert_eq!(status["sync_status"], "ready");
    assert_eq!(status["repository"]["branch"], "local");
    assert_eq!(status["repository"]["total_md_files"], 3);
    assert_eq!(status["index"]["document_count"], 3);
}

#[test]
fn test_git_mode_requires_url() {
    let (tmp, _) = setup_test_env();
    let config_path = tmp.path().join("config/git.toml");
    fs::write(
        &config_path,
        format!("[repository]\nlocal_path = \"{}/vault\"\n", tmp.path().display()),
    )
    .unwrap();

    let (_, stderr, success) = run_vsync(&config_path, &["status"]);
    assert!(!success);
    assert!(stderr.contains("repository.url is required"));
}
