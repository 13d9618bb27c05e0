//! Data types shared by the normalizer, chunker, reconciler, and stores.
//!
//! Nothing here is persisted as-is: a [`Document`] is rebuilt on every
//! processing pass, [`FileChange`]s live for one reconciliation cycle, and
//! [`ProgressEvent`]s are handed to a sink and forgotten.

use std::collections::BTreeMap;

use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

/// Front-matter fields and chunk metadata, keyed in sorted order.
pub type Metadata = BTreeMap<String, Value>;

/// A markdown file after front-matter parsing and markup cleanup.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Document {
    /// Repo-relative, `/`-separated path. Unique within the vault.
    pub path: String,
    /// Never empty.
    pub title: String,
    pub body: String,
    /// Sorted, deduplicated.
    pub tags: Vec<String>,
    /// Wikilink targets, sorted and deduplicated.
    pub links: Vec<String>,
    pub created_at: Option<DateTime<FixedOffset>>,
    pub modified_at: Option<DateTime<FixedOffset>>,
    pub word_count: usize,
    pub token_count: usize,
    /// Raw front matter.
    pub metadata: Metadata,
}

/// A token-bounded slice of a document body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub path: String,
    pub title: String,
    /// Zero-based, contiguous per document.
    pub index: usize,
    pub content: String,
    pub metadata: Metadata,
}

impl Chunk {
    /// Stable identifier, `"{path}#chunk_{index}"`.
    pub fn id(&self) -> String {
        format!("{}#chunk_{}", self.path, self.index)
    }

    /// SHA-256 of the chunk content, lowercase hex.
    pub fn hash(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.content.as_bytes());
        format!("{:x}", hasher.finalize())
    }

    /// Tags copied from the parent document.
    pub fn tags(&self) -> Vec<String> {
        string_list(self.metadata.get("tags"))
    }

    /// Wikilink targets copied from the parent document.
    pub fn links(&self) -> Vec<String> {
        string_list(self.metadata.get("links"))
    }
}

fn string_list(value: Option<&Value>) -> Vec<String> {
    match value {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|v| v.as_str().map(str::to_string))
            .collect(),
        _ => Vec::new(),
    }
}

/// Kind of change a diff entry represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeStatus {
    Added,
    Modified,
    Deleted,
    Renamed,
}

/// One classified change between the indexed commit and the remote head.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileChange {
    pub status: ChangeStatus,
    pub path: String,
    /// Set only for [`ChangeStatus::Renamed`].
    #[serde(skip_serializing_if = "Option::is_none")]
    pub old_path: Option<String>,
}

impl FileChange {
    pub fn added(path: impl Into<String>) -> Self {
        Self {
            status: ChangeStatus::Added,
            path: path.into(),
            old_path: None,
        }
    }

    pub fn modified(path: impl Into<String>) -> Self {
        Self {
            status: ChangeStatus::Modified,
            path: path.into(),
            old_path: None,
        }
    }

    pub fn deleted(path: impl Into<String>) -> Self {
        Self {
            status: ChangeStatus::Deleted,
            path: path.into(),
            old_path: None,
        }
    }

    pub fn renamed(old_path: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            status: ChangeStatus::Renamed,
            path: path.into(),
            old_path: Some(old_path.into()),
        }
    }

    /// Whether the (new) path must be read and indexed after a pull.
    pub fn needs_indexing(&self) -> bool {
        !matches!(self.status, ChangeStatus::Deleted)
    }
}

/// A single line of a repository diff, before classification.
///
/// `marker` is the VCS status letter (`A`, `M`, `D`, `R100`, ...).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawDiffEntry {
    pub marker: String,
    pub old_path: Option<String>,
    pub new_path: Option<String>,
}

impl RawDiffEntry {
    pub fn new(marker: &str, old_path: Option<&str>, new_path: Option<&str>) -> Self {
        Self {
            marker: marker.to_string(),
            old_path: old_path.map(str::to_string),
            new_path: new_path.map(str::to_string),
        }
    }
}

/// What a repository reports when asked for changes since the last sync.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RemoteDiff {
    pub local_head: String,
    pub remote_head: String,
    pub entries: Vec<RawDiffEntry>,
}

/// Counters accumulated over one sync run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SyncStats {
    pub processed: usize,
    pub failed: usize,
    pub deleted: usize,
    pub renamed: usize,
    pub total_chunks: usize,
}

/// Last commit of the local checkout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitInfo {
    pub commit_id: String,
    /// ISO-8601.
    pub commit_date: String,
    pub commit_message: String,
}

/// Where a repository provider reads from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RepositoryInfo {
    pub url: String,
    pub local_path: String,
    pub branch: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TagCount {
    pub tag: String,
    pub count: usize,
}

/// Summary of the index contents.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IndexStats {
    pub document_count: usize,
    pub chunk_count: usize,
    /// At most 20, by count descending then tag ascending.
    pub top_tags: Vec<TagCount>,
    pub model: String,
}

/// Maximum number of tags reported in [`IndexStats::top_tags`].
pub const TOP_TAGS_LIMIT: usize = 20;

/// Rank tag counts the way [`IndexStats::top_tags`] expects.
pub fn rank_tags(counts: BTreeMap<String, usize>) -> Vec<TagCount> {
    let mut ranked: Vec<TagCount> = counts
        .into_iter()
        .map(|(tag, count)| TagCount { tag, count })
        .collect();
    ranked.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.tag.cmp(&b.tag)));
    ranked.truncate(TOP_TAGS_LIMIT);
    ranked
}

/// A search request against an [`IndexStore`](crate::store::IndexStore).
#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize)]
pub struct SearchQuery {
    /// A blank query lists every chunk that passes the filters.
    pub query: String,
    pub limit: usize,
    /// Glob over document paths (`notes/**`, `daily/2024-*.md`, or an exact path).
    #[serde(default)]
    pub path_filter: Option<String>,
    /// Keep hits carrying at least one of these tags.
    #[serde(default)]
    pub tags: Vec<String>,
}

impl SearchQuery {
    pub fn new(query: impl Into<String>, limit: usize) -> Self {
        Self {
            query: query.into(),
            limit,
            ..Default::default()
        }
    }

    pub fn with_path(mut self, pattern: impl Into<String>) -> Self {
        self.path_filter = Some(pattern.into());
        self
    }

    pub fn with_tags(mut self, tags: Vec<String>) -> Self {
        self.tags = tags;
        self
    }
}

/// One ranked search result.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchHit {
    pub id: String,
    pub path: String,
    pub title: String,
    pub chunk_index: usize,
    pub content: String,
    pub score: f64,
    pub tags: Vec<String>,
    pub links: Vec<String>,
    pub created_at: Option<String>,
    pub modified_at: Option<String>,
}

impl SearchHit {
    pub fn from_chunk(chunk: &Chunk, score: f64) -> Self {
        let timestamp = |key: &str| {
            chunk
                .metadata
                .get(key)
                .and_then(Value::as_str)
                .map(str::to_string)
        };
        Self {
            id: chunk.id(),
            path: chunk.path.clone(),
            title: chunk.title.clone(),
            chunk_index: chunk.index,
            content: chunk.content.clone(),
            score,
            tags: chunk.tags(),
            links: chunk.links(),
            created_at: timestamp("created_at"),
            modified_at: timestamp("modified_at"),
        }
    }
}

/// One step of a sync run, as seen by a progress consumer.
///
/// `progress` is a percentage in `0..=100` and never decreases within a
/// run. Serialized with a `"type"` tag for SSE and JSON-lines output.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProgressEvent {
    Status {
        message: String,
        progress: u8,
    },
    Progress {
        message: String,
        progress: u8,
        current: usize,
        total: usize,
        path: String,
        eta: String,
    },
    Error {
        message: String,
        progress: u8,
        #[serde(skip_serializing_if = "Option::is_none")]
        path: Option<String>,
    },
    Warning {
        message: String,
        progress: u8,
        path: String,
    },
    FileComplete {
        message: String,
        progress: u8,
        path: String,
        chunks: usize,
    },
    Complete {
        message: String,
        progress: u8,
        stats: SyncStats,
        elapsed_secs: f64,
    },
}

impl ProgressEvent {
    pub fn status(message: impl Into<String>, progress: u8) -> Self {
        ProgressEvent::Status {
            message: message.into(),
            progress,
        }
    }

    /// A run-ending failure with no file attached.
    pub fn fatal(message: impl Into<String>, progress: u8) -> Self {
        ProgressEvent::Error {
            message: message.into(),
            progress,
            path: None,
        }
    }

    pub fn progress(&self) -> u8 {
        match self {
            ProgressEvent::Status { progress, .. }
            | ProgressEvent::Progress { progress, .. }
            | ProgressEvent::Error { progress, .. }
            | ProgressEvent::Warning { progress, .. }
            | ProgressEvent::FileComplete { progress, .. }
            | ProgressEvent::Complete { progress, .. } => *progress,
        }
    }

    pub fn message(&self) -> &str {
        match self {
            ProgressEvent::Status { message, .. }
            | ProgressEvent::Progress { message, .. }
            | ProgressEvent::Error { message, .. }
            | ProgressEvent::Warning { message, .. }
            | ProgressEvent::FileComplete { message, .. }
            | ProgressEvent::Complete { message, .. } => message,
        }
    }

    /// The serialized `"type"` tag.
    pub fn kind(&self) -> &'static str {
        match self {
            ProgressEvent::Status { .. } => "status",
            ProgressEvent::Progress { .. } => "progress",
            ProgressEvent::Error { .. } => "error",
            ProgressEvent::Warning { .. } => "warning",
            ProgressEvent::FileComplete { .. } => "file_complete",
            ProgressEvent::Complete { .. } => "complete",
        }
    }

    /// True for the last event of a stream: `complete` or a fatal `error`.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ProgressEvent::Complete { .. } | ProgressEvent::Error { path: None, .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunk_id_and_hash_are_stable() {
        let chunk = Chunk {
            path: "notes/a.md".into(),
            title: "A".into(),
            index: 2,
            content: "hello".into(),
            metadata: Metadata::new(),
        };
        assert_eq!(chunk.id(), "notes/a.md#chunk_2");
        assert_eq!(
            chunk.hash(),
            "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824"
        );
    }

    #[test]
    fn rank_tags_orders_by_count_then_name() {
        let mut counts = BTreeMap::new();
        counts.insert("b".to_string(), 2);
        counts.insert("a".to_string(), 2);
        counts.insert("c".to_string(), 5);
        let ranked = rank_tags(counts);
        let names: Vec<&str> = ranked.iter().map(|t| t.tag.as_str()).collect();
        assert_eq!(names, vec!["c", "a", "b"]);
    }

    #[test]
    fn rank_tags_truncates() {
        let counts = (0..30).map(|i| (format!("t{i:02}"), 1)).collect();
        assert_eq!(rank_tags(counts).len(), TOP_TAGS_LIMIT);
    }

    #[test]
    fn progress_event_serializes_with_type_tag() {
        let event = ProgressEvent::FileComplete {
            message: "Indexed a.md".into(),
            progress: 55,
            path: "a.md".into(),
            chunks: 3,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "file_complete");
        assert_eq!(json["chunks"], 3);
        assert_eq!(event.kind(), "file_complete");
    }

    #[test]
    fn fatal_error_is_terminal_but_file_error_is_not() {
        assert!(ProgressEvent::fatal("boom", 5).is_terminal());
        let per_file = ProgressEvent::Error {
            message: "store failed".into(),
            progress: 40,
            path: Some("a.md".into()),
        };
        assert!(!per_file.is_terminal());
    }
}
