//! Index storage abstraction.
//!
//! The [`IndexStore`] trait is the only way the reconciler touches the
//! search index, so the SQLite store and the in-memory test double are
//! interchangeable.
//!
//! Implementations must be `Send + Sync` to work with async runtimes.

pub mod memory;

use anyhow::Result;
use async_trait::async_trait;
use globset::{Glob, GlobMatcher};

use crate::models::{Chunk, IndexStats, SearchHit, SearchQuery};

/// Abstract search index keyed by document path.
///
/// # Operations
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`upsert`](IndexStore::upsert) | Replace every chunk of a path |
/// | [`remove`](IndexStore::remove) | Drop a path and its chunks |
/// | [`list_indexed_paths`](IndexStore::list_indexed_paths) | Sorted, unique indexed paths |
/// | [`search`](IndexStore::search) | Ranked hits with optional path glob / tag filters |
/// | [`stats`](IndexStore::stats) | Document and chunk counts, top tags, model |
/// | [`clear`](IndexStore::clear) | Empty the index |
#[async_trait]
pub trait IndexStore: Send + Sync {
    /// Replace all chunks stored for `path`.
    ///
    /// Prior chunks are always removed first. If the insert fails the path
    /// is left without chunks, never with the old ones.
    async fn upsert(&self, path: &str, chunks: &[Chunk]) -> Result<()>;

    /// Remove `path`. Removing an unknown path succeeds.
    async fn remove(&self, path: &str) -> Result<()>;

    async fn list_indexed_paths(&self) -> Result<Vec<String>>;

    async fn search(&self, query: &SearchQuery) -> Result<Vec<SearchHit>>;

    async fn stats(&self) -> Result<IndexStats>;

    async fn clear(&self) -> Result<()>;
}

/// Post-retrieval filters shared by store implementations.
pub struct HitFilter {
    path: Option<GlobMatcher>,
    tags: Vec<String>,
}

impl HitFilter {
    pub fn new(query: &SearchQuery) -> Result<Self> {
        let path = match query.path_filter.as_deref().map(str::trim) {
            Some(pattern) if !pattern.is_empty() => Some(Glob::new(pattern)?.compile_matcher()),
            _ => None,
        };
        Ok(Self {
            path,
            tags: query.tags.clone(),
        })
    }

    pub fn is_active(&self) -> bool {
        self.path.is_some() || !self.tags.is_empty()
    }

    pub fn matches(&self, path: &str, tags: &[String]) -> bool {
        if let Some(glob) = &self.path {
            if !glob.is_match(path) {
                return false;
            }
        }
        self.tags.is_empty() || self.tags.iter().any(|wanted| tags.contains(wanted))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn path_glob_and_exact_path() {
        let glob = HitFilter::new(&SearchQuery::new("q", 5).with_path("daily/**")).unwrap();
        assert!(glob.matches("daily/2024-01-01.md", &[]));
        assert!(!glob.matches("notes/a.md", &[]));

        let exact = HitFilter::new(&SearchQuery::new("q", 5).with_path("notes/a.md")).unwrap();
        assert!(exact.matches("notes/a.md", &[]));
        assert!(!exact.matches("notes/ab.md", &[]));
    }

    #[test]
    fn tags_match_any() {
        let filter =
            HitFilter::new(&SearchQuery::new("q", 5).with_tags(vec!["a".into(), "b".into()]))
                .unwrap();
        assert!(filter.matches("x.md", &["b".to_string()]));
        assert!(!filter.matches("x.md", &["c".to_string()]));
    }

    #[test]
    fn inactive_filter_matches_everything() {
        let filter = HitFilter::new(&SearchQuery::new("q", 5)).unwrap();
        assert!(!filter.is_active());
        assert!(filter.matches("anything.md", &[]));
    }

    #[test]
    fn invalid_glob_is_an_error() {
        assert!(HitFilter::new(&SearchQuery::new("q", 5).with_path("a/[b")).is_err());
    }
}
