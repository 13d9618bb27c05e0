//! In-memory [`IndexStore`] for tests and local experiments.
//!
//! Chunks are kept per path in a `BTreeMap` behind `std::sync::RwLock`.
//! Search scores chunks by the fraction of query terms they contain;
//! a blank query lists every chunk that passes the filters.
//!
//! Failures can be injected per path (upsert) or globally (clear) to
//! exercise the reconciler's error handling.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;

use crate::models::{rank_tags, Chunk, IndexStats, SearchHit, SearchQuery};

use super::{HitFilter, IndexStore};

#[derive(Default)]
struct Faults {
    upsert_paths: BTreeSet<String>,
    clear: bool,
}

/// In-memory index keyed by document path.
#[derive(Default)]
pub struct InMemoryIndex {
    docs: RwLock<BTreeMap<String, Vec<Chunk>>>,
    faults: RwLock<Faults>,
}

impl InMemoryIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every later `upsert` of `path` fail after removing its chunks.
    pub fn fail_upserts_for(&self, path: &str) {
        if let Ok(mut faults) = self.faults.write() {
            faults.upsert_paths.insert(path.to_string());
        }
    }

    /// Make every later `clear` fail.
    pub fn fail_clear(&self) {
        if let Ok(mut faults) = self.faults.write() {
            faults.clear = true;
        }
    }

    /// Chunks currently stored for `path`, in index order.
    pub fn chunks_for(&self, path: &str) -> Vec<Chunk> {
        self.docs
            .read()
            .map(|docs| docs.get(path).cloned().unwrap_or_default())
            .unwrap_or_default()
    }

    fn read_docs(&self) -> Result<RwLockReadGuard<'_, BTreeMap<String, Vec<Chunk>>>> {
        self.docs.read().map_err(|_| anyhow!("index lock poisoned"))
    }

    fn write_docs(&self) -> Result<RwLockWriteGuard<'_, BTreeMap<String, Vec<Chunk>>>> {
        self.docs.write().map_err(|_| anyhow!("index lock poisoned"))
    }

    fn upsert_fails(&self, path: &str) -> bool {
        self.faults
            .read()
            .map(|f| f.upsert_paths.contains(path))
            .unwrap_or(false)
    }
}

fn term_score(terms: &[String], content: &str) -> f64 {
    if terms.is_empty() {
        return 0.0;
    }
    let haystack = content.to_lowercase();
    let matched = terms.iter().filter(|t| haystack.contains(t.as_str())).count();
    matched as f64 / terms.len() as f64
}

#[async_trait]
impl IndexStore for InMemoryIndex {
    async fn upsert(&self, path: &str, chunks: &[Chunk]) -> Result<()> {
        let mut docs = self.write_docs()?;
        docs.remove(path);
        if self.upsert_fails(path) {
            bail!("injected upsert failure for {}", path);
        }
        let mut stored = chunks.to_vec();
        stored.sort_by_key(|c| c.index);
        docs.insert(path.to_string(), stored);
        Ok(())
    }

    async fn remove(&self, path: &str) -> Result<()> {
        self.write_docs()?.remove(path);
        Ok(())
    }

    async fn list_indexed_paths(&self) -> Result<Vec<String>> {
        Ok(self.read_docs()?.keys().cloned().collect())
    }

    async fn search(&self, query: &SearchQuery) -> Result<Vec<SearchHit>> {
        let filter = HitFilter::new(query)?;
        let terms: Vec<String> = query
            .query
            .split_whitespace()
            .map(str::to_lowercase)
            .collect();
        let docs = self.read_docs()?;

        let mut hits: Vec<SearchHit> = docs
            .iter()
            .flat_map(|(_, chunks)| chunks.iter())
            .filter(|c| filter.matches(&c.path, &c.tags()))
            .filter_map(|c| {
                if terms.is_empty() {
                    return Some(SearchHit::from_chunk(c, 0.0));
                }
                let score = term_score(&terms, &c.content);
                (score > 0.0).then(|| SearchHit::from_chunk(c, score))
            })
            .collect();

        hits.sort_by(|a, b| {
            b.score
                .total_cmp(&a.score)
                .then_with(|| a.path.cmp(&b.path))
                .then_with(|| a.chunk_index.cmp(&b.chunk_index))
        });
        hits.truncate(query.limit);
        Ok(hits)
    }

    async fn stats(&self) -> Result<IndexStats> {
        let docs = self.read_docs()?;
        let mut tag_counts = BTreeMap::new();
        for chunks in docs.values() {
            if let Some(first) = chunks.first() {
                for tag in first.tags() {
                    *tag_counts.entry(tag).or_insert(0) += 1;
                }
            }
        }
        Ok(IndexStats {
            document_count: docs.len(),
            chunk_count: docs.values().map(Vec::len).sum(),
            top_tags: rank_tags(tag_counts),
            model: "in-memory".to_string(),
        })
    }

    async fn clear(&self) -> Result<()> {
        let fails = self.faults.read().map(|f| f.clear).unwrap_or(false);
        if fails {
            bail!("injected clear failure");
        }
        self.write_docs()?.clear();
        Ok(())
    }
}
