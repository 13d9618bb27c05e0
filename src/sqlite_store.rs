//! SQLite-backed [`IndexStore`].
//!
//! Chunks live in `chunks` with a mirror in the `chunks_fts` FTS5 table.
//! When an embedding provider is configured, each chunk also gets a row
//! in `chunk_vectors` and search switches from BM25 to cosine similarity.
//! Every indexed path has a `documents` row, even when it produced no
//! chunks, so [`IndexStore::list_indexed_paths`] sees it.

use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, Sqlite, SqlitePool, Transaction};
use std::collections::BTreeMap;
use std::sync::Arc;

use vaultsync_core::embedding::{blob_to_vec, cosine_similarity, vec_to_blob, EmbeddingProvider};
use vaultsync_core::models::{rank_tags, Chunk, IndexStats, Metadata, SearchHit, SearchQuery};
use vaultsync_core::store::{HitFilter, IndexStore};

use crate::config::Config;
use crate::{db, embedding, migrate};

/// Model name reported by [`IndexStore::stats`] without embeddings.
pub const KEYWORD_MODEL: &str = "fts5";

pub struct SqliteIndex {
    pool: SqlitePool,
    embedder: Option<Arc<dyn EmbeddingProvider>>,
}

impl SqliteIndex {
    pub fn new(pool: SqlitePool, embedder: Option<Arc<dyn EmbeddingProvider>>) -> Self {
        Self { pool, embedder }
    }

    /// Connect to `db.path`, run migrations, and build the embedder.
    pub async fn open(config: &Config) -> Result<Self> {
        let pool = db::connect(&config.db.path).await?;
        migrate::run_migrations(&pool).await?;
        let embedder = embedding::create_provider(&config.embedding)?;
        Ok(Self::new(pool, embedder))
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn embed_chunks(&self, chunks: &[Chunk]) -> Result<Option<Vec<Vec<f32>>>> {
        let Some(embedder) = &self.embedder else {
            return Ok(None);
        };
        if chunks.is_empty() {
            return Ok(Some(Vec::new()));
        }
        let texts: Vec<String> = chunks.iter().map(|c| c.content.clone()).collect();
        let vectors = embedder.embed(&texts).await?;
        if vectors.len() != chunks.len() {
            anyhow::bail!(
                "embedder returned {} vectors for {} chunks",
                vectors.len(),
                chunks.len()
            );
        }
        Ok(Some(vectors))
    }

    async fn keyword_hits(&self, query: &str, limit: Option<usize>) -> Result<Vec<SearchHit>> {
        let Some(expr) = fts_match_expression(query) else {
            return Ok(Vec::new());
        };

        let sql = format!(
            r#"
            SELECT c.id, c.path, c.chunk_index, c.title, c.content, c.metadata_json,
                   bm25(chunks_fts) AS rank
            FROM chunks_fts
            JOIN chunks c ON c.id = chunks_fts.chunk_id
            WHERE chunks_fts MATCH ?
            ORDER BY rank, c.path, c.chunk_index
            {}
            "#,
            if limit.is_some() { "LIMIT ?" } else { "" }
        );

        let mut q = sqlx::query(&sql).bind(expr);
        if let Some(limit) = limit {
            q = q.bind(limit as i64);
        }
        let rows = q.fetch_all(&self.pool).await?;

        rows.iter()
            .map(|row| {
                let rank: f64 = row.get("rank");
                Ok(SearchHit::from_chunk(&row_to_chunk(row)?, -rank))
            })
            .collect()
    }

    async fn vector_hits(
        &self,
        embedder: &dyn EmbeddingProvider,
        query: &str,
    ) -> Result<Vec<SearchHit>> {
        let query_vec = embedder
            .embed(&[query.to_string()])
            .await?
            .into_iter()
            .next()
            .context("embedder returned no vector for the query")?;

        let rows = sqlx::query(
            r#"
            SELECT c.id, c.path, c.chunk_index, c.title, c.content, c.metadata_json,
                   cv.embedding
            FROM chunk_vectors cv
            JOIN chunks c ON c.id = cv.chunk_id
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        let mut hits = Vec::with_capacity(rows.len());
        for row in &rows {
            let blob: Vec<u8> = row.get("embedding");
            let similarity = cosine_similarity(&query_vec, &blob_to_vec(&blob)) as f64;
            hits.push(SearchHit::from_chunk(&row_to_chunk(row)?, similarity));
        }
        sort_hits(&mut hits);
        Ok(hits)
    }

    async fn listing_hits(&self) -> Result<Vec<SearchHit>> {
        let rows = sqlx::query(
            r#"
            SELECT id, path, chunk_index, title, content, metadata_json
            FROM chunks
            ORDER BY path, chunk_index
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| Ok(SearchHit::from_chunk(&row_to_chunk(row)?, 0.0)))
            .collect()
    }
}

async fn delete_path(tx: &mut Transaction<'_, Sqlite>, path: &str) -> Result<()> {
    sqlx::query("DELETE FROM chunk_vectors WHERE path = ?")
        .bind(path)
        .execute(&mut **tx)
        .await?;
    sqlx::query("DELETE FROM chunks_fts WHERE path = ?")
        .bind(path)
        .execute(&mut **tx)
        .await?;
    sqlx::query("DELETE FROM chunks WHERE path = ?")
        .bind(path)
        .execute(&mut **tx)
        .await?;
    sqlx::query("DELETE FROM documents WHERE path = ?")
        .bind(path)
        .execute(&mut **tx)
        .await?;
    Ok(())
}

#[async_trait]
impl IndexStore for SqliteIndex {
    async fn upsert(&self, path: &str, chunks: &[Chunk]) -> Result<()> {
        let vectors = match self.embed_chunks(chunks).await {
            Ok(vectors) => vectors,
            Err(e) => {
                self.remove(path).await?;
                return Err(e.context(format!("Failed to embed chunks for {}", path)));
            }
        };

        let title = chunks
            .first()
            .map(|c| c.title.clone())
            .unwrap_or_else(|| path.to_string());
        let tags = chunks.first().map(Chunk::tags).unwrap_or_default();
        let links = chunks.first().map(Chunk::links).unwrap_or_default();

        let mut tx = self.pool.begin().await?;
        delete_path(&mut tx, path).await?;

        sqlx::query(
            r#"
            INSERT INTO documents (path, title, tags_json, links_json, chunk_count, indexed_at)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(path)
        .bind(&title)
        .bind(serde_json::to_string(&tags)?)
        .bind(serde_json::to_string(&links)?)
        .bind(chunks.len() as i64)
        .bind(chrono::Utc::now().timestamp())
        .execute(&mut *tx)
        .await?;

        for (i, chunk) in chunks.iter().enumerate() {
            let id = chunk.id();
            sqlx::query(
                r#"
                INSERT INTO chunks (id, path, chunk_index, title, content, metadata_json, hash)
                VALUES (?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&id)
            .bind(path)
            .bind(chunk.index as i64)
            .bind(&chunk.title)
            .bind(&chunk.content)
            .bind(serde_json::to_string(&chunk.metadata)?)
            .bind(chunk.hash())
            .execute(&mut *tx)
            .await?;

            sqlx::query("INSERT INTO chunks_fts (chunk_id, path, content) VALUES (?, ?, ?)")
                .bind(&id)
                .bind(path)
                .bind(&chunk.content)
                .execute(&mut *tx)
                .await?;

            if let Some(vec) = vectors.as_ref().and_then(|v| v.get(i)) {
                sqlx::query("INSERT INTO chunk_vectors (chunk_id, path, embedding) VALUES (?, ?, ?)")
                    .bind(&id)
                    .bind(path)
                    .bind(vec_to_blob(vec))
                    .execute(&mut *tx)
                    .await?;
            }
        }

        tx.commit().await?;
        Ok(())
    }

    async fn remove(&self, path: &str) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        delete_path(&mut tx, path).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn list_indexed_paths(&self) -> Result<Vec<String>> {
        let paths: Vec<String> = sqlx::query_scalar("SELECT path FROM documents ORDER BY path")
            .fetch_all(&self.pool)
            .await?;
        Ok(paths)
    }

    async fn search(&self, query: &SearchQuery) -> Result<Vec<SearchHit>> {
        if query.limit == 0 {
            return Ok(Vec::new());
        }
        let filter = HitFilter::new(query)?;
        let text = query.query.trim();

        let mut hits = if text.is_empty() {
            self.listing_hits().await?
        } else if let Some(embedder) = &self.embedder {
            self.vector_hits(embedder.as_ref(), text).await?
        } else {
            // Filters run after retrieval, so only push the limit down without them
            let limit = (!filter.is_active()).then_some(query.limit);
            self.keyword_hits(text, limit).await?
        };

        if filter.is_active() {
            hits.retain(|hit| filter.matches(&hit.path, &hit.tags));
        }
        hits.truncate(query.limit);
        Ok(hits)
    }

    async fn stats(&self) -> Result<IndexStats> {
        let document_count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM documents")
            .fetch_one(&self.pool)
            .await?;
        let chunk_count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM chunks")
            .fetch_one(&self.pool)
            .await?;

        let tag_rows: Vec<String> = sqlx::query_scalar("SELECT tags_json FROM documents")
            .fetch_all(&self.pool)
            .await?;
        let mut counts: BTreeMap<String, usize> = BTreeMap::new();
        for tags_json in tag_rows {
            let tags: Vec<String> = serde_json::from_str(&tags_json).unwrap_or_default();
            for tag in tags {
                *counts.entry(tag).or_default() += 1;
            }
        }

        Ok(IndexStats {
            document_count: document_count as usize,
            chunk_count: chunk_count as usize,
            top_tags: rank_tags(counts),
            model: self
                .embedder
                .as_ref()
                .map(|e| e.model_name().to_string())
                .unwrap_or_else(|| KEYWORD_MODEL.to_string()),
        })
    }

    async fn clear(&self) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        for table in ["chunk_vectors", "chunks_fts", "chunks", "documents"] {
            sqlx::query(&format!("DELETE FROM {}", table))
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(())
    }
}

fn row_to_chunk(row: &SqliteRow) -> Result<Chunk> {
    let metadata_json: String = row.get("metadata_json");
    let metadata: Metadata = serde_json::from_str(&metadata_json).unwrap_or_default();
    let index: i64 = row.get("chunk_index");
    Ok(Chunk {
        path: row.get("path"),
        title: row.get("title"),
        index: usize::try_from(index).context("negative chunk_index in index")?,
        content: row.get("content"),
        metadata,
    })
}

fn sort_hits(hits: &mut [SearchHit]) {
    hits.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.path.cmp(&b.path))
            .then_with(|| a.chunk_index.cmp(&b.chunk_index))
    });
}

/// Quote each whitespace-separated term and OR them together, so user
/// input never reaches the FTS5 query parser as syntax.
fn fts_match_expression(query: &str) -> Option<String> {
    let terms: Vec<String> = query
        .split_whitespace()
        .map(|term| format!("\"{}\"", term.replace('"', "\"\"")))
        .collect();
    if terms.is_empty() {
        None
    } else {
        Some(terms.join(" OR "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn match_expression_quotes_terms() {
        assert_eq!(
            fts_match_expression("rust  \"async\" AND").as_deref(),
            Some("\"rust\" OR \"\"\"async\"\"\" OR \"AND\"")
        );
        assert_eq!(fts_match_expression("   "), None);
    }
}
