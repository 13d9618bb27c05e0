use tempfile::TempDir;

use vaultsync::sqlite_store::{SqliteIndex, KEYWORD_MODEL};
use vaultsync::{db, migrate};
use vaultsync_core::chunk::chunk_document;
use vaultsync_core::models::{Chunk, SearchQuery};
use vaultsync_core::normalize::normalize;
use vaultsync_core::store::IndexStore;
use vaultsync_core::tokenize::TokenCounter;

async fn open_store() -> (TempDir, SqliteIndex) {
    let tmp = TempDir::new().unwrap();
    let pool = db::connect(&tmp.path().join("data/index.sqlite"))
        .await
        .unwrap();
    migrate::run_migrations(&pool).await.unwrap();
    (tmp, SqliteIndex::new(pool, None))
}

fn chunks(path: &str, raw: &str, max_tokens: usize) -> Vec<Chunk> {
    let counter = TokenCounter::approximate();
    let doc = normalize(path, raw, &counter).unwrap();
    chunk_document(&doc, max_tokens, &counter)
}

async fn index(store: &SqliteIndex, path: &str, raw: &str) {
    store.upsert(path, &chunks(path, raw, 500)).await.unwrap();
}

#[tokio::test]
async fn migrations_are_idempotent() {
    let (_tmp, store) = open_store().await;
    migrate::run_migrations(store.pool()).await.unwrap();
    assert!(store.list_indexed_paths().await.unwrap().is_empty());
}

#[tokio::test]
async fn upsert_replaces_previous_chunks() {
    let (_tmp, store) = open_store().await;
    let long = "One sentence here. Another sentence there.\n\n".repeat(20);

    store
        .upsert("notes/a.md", &chunks("notes/a.md", &long, 20))
        .await
        .unwrap();
    let before = store.stats().await.unwrap();
    assert!(before.chunk_count > 1);

    index(&store, "notes/a.md", "short now").await;

    let after = store.stats().await.unwrap();
    assert_eq!(after.document_count, 1);
    assert_eq!(after.chunk_count, 1);
    let hits = store.search(&SearchQuery::new("sentence", 10)).await.unwrap();
    assert!(hits.is_empty());
}

#[tokio::test]
async fn document_without_chunks_is_still_listed() {
    let (_tmp, store) = open_store().await;

    store.upsert("empty.md", &[]).await.unwrap();

    assert_eq!(store.list_indexed_paths().await.unwrap(), vec!["empty.md"]);
    let stats = store.stats().await.unwrap();
    assert_eq!(stats.document_count, 1);
    assert_eq!(stats.chunk_count, 0);
}

#[tokio::test]
async fn remove_and_clear() {
    let (_tmp, store) = open_store().await;
    index(&store, "a.md", "alpha text").await;
    index(&store, "b.md", "beta text").await;
    index(&store, "c.md", "gamma text").await;

    store.remove("b.md").await.unwrap();
    store.remove("never-indexed.md").await.unwrap();
    assert_eq!(store.list_indexed_paths().await.unwrap(), vec!["a.md", "c.md"]);
    assert!(store
        .search(&SearchQuery::new("beta", 10))
        .await
        .unwrap()
        .is_empty());

    store.clear().await.unwrap();
    assert!(store.list_indexed_paths().await.unwrap().is_empty());
    assert_eq!(store.stats().await.unwrap().chunk_count, 0);
}

#[tokio::test]
async fn keyword_search_ranks_matches() {
    let (_tmp, store) = open_store().await;
    index(&store, "rust.md", "# Rust\n\nRust ownership and borrowing in Rust.").await;
    index(&store, "python.md", "# Python\n\nPython has a garbage collector.").await;

    let hits = store.search(&SearchQuery::new("rust", 10)).await.unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].path, "rust.md");
    assert_eq!(hits[0].title, "Rust");
    assert!(hits[0].score > 0.0);

    // Query syntax is treated as plain words
    let hits = store
        .search(&SearchQuery::new("python AND \"collector", 10))
        .await
        .unwrap();
    assert_eq!(hits.len(), 1);
}

#[tokio::test]
async fn filters_by_path_and_tag() {
    let (_tmp, store) = open_store().await;
    index(&store, "daily/2024-01-01.md", "---\ntags: [journal]\n---\nreview of the week").await;
    index(&store, "daily/2024-01-02.md", "another review #work").await;
    index(&store, "projects/x.md", "project review #work").await;

    let hits = store
        .search(&SearchQuery::new("review", 10).with_path("daily/**"))
        .await
        .unwrap();
    let mut paths: Vec<_> = hits.iter().map(|h| h.path.as_str()).collect();
    paths.sort();
    assert_eq!(paths, vec!["daily/2024-01-01.md", "daily/2024-01-02.md"]);

    let hits = store
        .search(&SearchQuery::new("review", 10).with_tags(vec!["work".into()]))
        .await
        .unwrap();
    assert_eq!(hits.len(), 2);
    assert!(hits.iter().all(|h| h.tags.contains(&"work".to_string())));

    let hits = store
        .search(
            &SearchQuery::new("review", 10)
                .with_path("daily/**")
                .with_tags(vec!["work".into()]),
        )
        .await
        .unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].path, "daily/2024-01-02.md");
}

#[tokio::test]
async fn blank_query_lists_in_path_order() {
    let (_tmp, store) = open_store().await;
    index(&store, "b.md", "beta").await;
    index(&store, "a.md", "alpha").await;

    let hits = store.search(&SearchQuery::new("  ", 10)).await.unwrap();
    let paths: Vec<_> = hits.iter().map(|h| h.path.as_str()).collect();
    assert_eq!(paths, vec!["a.md", "b.md"]);
    assert!(hits.iter().all(|h| h.score == 0.0));

    assert_eq!(store.search(&SearchQuery::new("", 1)).await.unwrap().len(), 1);
    assert!(store.search(&SearchQuery::new("", 0)).await.unwrap().is_empty());
}

#[tokio::test]
async fn stats_rank_tags_and_report_model() {
    let (_tmp, store) = open_store().await;
    index(&store, "a.md", "#rust #async notes").await;
    index(&store, "b.md", "#rust only").await;
    index(&store, "c.md", "no tags").await;

    let stats = store.stats().await.unwrap();

    assert_eq!(stats.document_count, 3);
    assert_eq!(stats.model, KEYWORD_MODEL);
    assert_eq!(stats.top_tags[0].tag, "rust");
    assert_eq!(stats.top_tags[0].count, 2);
    assert_eq!(stats.top_tags[1].tag, "async");
}
