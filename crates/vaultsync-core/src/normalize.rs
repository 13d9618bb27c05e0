//! Markdown normalization for Obsidian-style vault files.
//!
//! Turns raw file text into a [`Document`]:
//!
//! 1. Split off a leading `---` YAML front-matter block (absent → empty map).
//! 2. Resolve the title: front-matter `title`, then the first `# ` heading,
//!    then the file stem.
//! 3. Extract tags (front matter + inline `#hashtags`) and wikilink targets
//!    from the raw body.
//! 4. Clean the body: drop `%%comments%%`, embeds, and callout markers;
//!    unwrap wikilinks and markdown links to their text; collapse blank
//!    line runs.
//! 5. Parse `created` / `modified` timestamps, best effort.
//!
//! Malformed front matter is the only failure. A document that fails is
//! skipped by the caller and never partially indexed.
//!
//! # Example
//!
//! ```rust
//! use vaultsync_core::normalize::normalize;
//! use vaultsync_core::tokenize::TokenCounter;
//!
//! let raw = "---\ntags: [rust]\n---\n# Notes\n\nSee [[Other Page|other]] #idea";
//! let doc = normalize("inbox/notes.md", raw, &TokenCounter::approximate()).unwrap();
//! assert_eq!(doc.title, "Notes");
//! assert_eq!(doc.tags, vec!["idea", "rust"]);
//! assert_eq!(doc.links, vec!["Other Page"]);
//! ```

use std::collections::BTreeSet;
use std::sync::LazyLock;

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, Utc};
use regex::{Captures, Regex};
use serde_json::Value;
use thiserror::Error;

use crate::models::{Document, Metadata};
use crate::tokenize::TokenCounter;

/// Why a file could not be turned into a [`Document`].
#[derive(Debug, Error)]
pub enum NormalizeError {
    #[error("invalid front matter in {path}: {reason}")]
    FrontMatter { path: String, reason: String },
}

static COMMENT: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?s)%%.*?%%").unwrap());
static WIKI_EMBED: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"!\[\[[^\]]*\]\]").unwrap());
static MD_IMAGE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"!\[[^\]]*\]\([^)]*\)").unwrap());
static WIKILINK: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\[\[([^\]]+)\]\]").unwrap());
static MD_LINK: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\[([^\]]+)\]\([^)]+\)").unwrap());
static CALLOUT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^[ \t]*>[ \t]*\[![^\]]*\].*$").unwrap());
static BLANK_RUN: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\n\s*\n\s*\n").unwrap());
static HASHTAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)(?:^|\s)#([A-Za-z0-9_/-]+)").unwrap());
static H1: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?m)^#\s+(.+)$").unwrap());

/// Naive date-time layouts tried after RFC 3339, in order.
const DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
];

/// Date-only layouts, tried last. US order wins over day-first.
const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%m/%d/%Y", "%d/%m/%Y"];

/// Parse a vault file into a [`Document`].
pub fn normalize(
    path: &str,
    raw: &str,
    counter: &TokenCounter,
) -> Result<Document, NormalizeError> {
    let raw = raw.strip_prefix('\u{feff}').unwrap_or(raw);
    let (front, body) = split_front_matter(raw);
    let metadata = match front {
        Some(yaml) => parse_front_matter(path, yaml)?,
        None => Metadata::new(),
    };

    let title = resolve_title(path, &metadata, body);
    let tags = extract_tags(&metadata, body);
    let links = extract_links(body);
    let cleaned = clean_body(body);

    let created_at = metadata.get("created").and_then(parse_timestamp_value);
    let modified_at = metadata.get("modified").and_then(parse_timestamp_value);

    Ok(Document {
        path: path.to_string(),
        title,
        word_count: cleaned.split_whitespace().count(),
        token_count: counter.count(&cleaned),
        body: cleaned,
        tags,
        links,
        created_at,
        modified_at,
        metadata,
    })
}

/// Split a leading `---` block from the rest of the text.
///
/// Returns `(None, raw)` when there is no opening fence or the block is
/// never closed.
fn split_front_matter(raw: &str) -> (Option<&str>, &str) {
    let Some(first_end) = raw.find('\n') else {
        return (None, raw);
    };
    if raw[..first_end].trim_end() != "---" {
        return (None, raw);
    }

    let yaml_start = first_end + 1;
    let mut offset = yaml_start;
    for line in raw[yaml_start..].split_inclusive('\n') {
        let fence = line.trim_end();
        if fence == "---" || fence == "..." {
            let yaml = &raw[yaml_start..offset];
            let body = &raw[offset + line.len()..];
            return (Some(yaml), body);
        }
        offset += line.len();
    }
    (None, raw)
}

fn parse_front_matter(path: &str, yaml: &str) -> Result<Metadata, NormalizeError> {
    let invalid = |reason: String| NormalizeError::FrontMatter {
        path: path.to_string(),
        reason,
    };

    if yaml.trim().is_empty() {
        return Ok(Metadata::new());
    }
    let value: serde_yaml::Value = serde_yaml::from_str(yaml).map_err(|e| invalid(e.to_string()))?;
    let mapping = match value {
        serde_yaml::Value::Null => return Ok(Metadata::new()),
        serde_yaml::Value::Mapping(mapping) => mapping,
        other => return Err(invalid(format!("expected a mapping, found {}", yaml_kind(&other)))),
    };

    let mut metadata = Metadata::new();
    for (key, value) in mapping {
        let key = match key {
            serde_yaml::Value::String(s) => s,
            serde_yaml::Value::Number(n) => n.to_string(),
            serde_yaml::Value::Bool(b) => b.to_string(),
            other => return Err(invalid(format!("unsupported key type {}", yaml_kind(&other)))),
        };
        let value = serde_json::to_value(&value).map_err(|e| invalid(e.to_string()))?;
        metadata.insert(key, value);
    }
    Ok(metadata)
}

fn yaml_kind(value: &serde_yaml::Value) -> &'static str {
    match value {
        serde_yaml::Value::Null => "null",
        serde_yaml::Value::Bool(_) => "bool",
        serde_yaml::Value::Number(_) => "number",
        serde_yaml::Value::String(_) => "string",
        serde_yaml::Value::Sequence(_) => "sequence",
        serde_yaml::Value::Mapping(_) => "mapping",
        serde_yaml::Value::Tagged(_) => "tagged value",
    }
}

fn resolve_title(path: &str, metadata: &Metadata, body: &str) -> String {
    let from_meta = match metadata.get("title") {
        Some(Value::String(s)) => Some(s.trim().to_string()),
        Some(Value::Number(n)) => Some(n.to_string()),
        Some(Value::Bool(b)) => Some(b.to_string()),
        _ => None,
    };
    if let Some(title) = from_meta.filter(|t| !t.is_empty()) {
        return title;
    }

    for caps in H1.captures_iter(body) {
        let heading = caps[1].trim();
        if !heading.is_empty() {
            return heading.to_string();
        }
    }

    file_stem(path)
}

/// Last path segment without its extension. Falls back to the whole path.
fn file_stem(path: &str) -> String {
    let name = path.rsplit(['/', '\\']).next().unwrap_or(path);
    let stem = match name.rsplit_once('.') {
        Some((stem, _)) if !stem.is_empty() => stem,
        _ => name,
    };
    if !stem.trim().is_empty() {
        stem.to_string()
    } else if !path.trim().is_empty() {
        path.to_string()
    } else {
        "Untitled".to_string()
    }
}

fn extract_tags(metadata: &Metadata, body: &str) -> Vec<String> {
    let mut tags = BTreeSet::new();

    let mut add = |tag: &str| {
        let tag = tag.trim().trim_start_matches('#');
        if !tag.is_empty() {
            tags.insert(tag.to_string());
        }
    };

    match metadata.get("tags") {
        Some(Value::Array(items)) => {
            for item in items {
                match item {
                    Value::String(s) => add(s),
                    Value::Number(n) => add(&n.to_string()),
                    _ => {}
                }
            }
        }
        Some(Value::String(s)) => add(s),
        _ => {}
    }

    for caps in HASHTAG.captures_iter(body) {
        add(&caps[1]);
    }

    tags.into_iter().collect()
}

fn extract_links(body: &str) -> Vec<String> {
    let links: BTreeSet<String> = WIKILINK
        .captures_iter(body)
        .filter_map(|caps| {
            let target = caps[1].split('|').next().unwrap_or_default().trim();
            (!target.is_empty()).then(|| target.to_string())
        })
        .collect();
    links.into_iter().collect()
}

/// Strip Obsidian markup and normalize blank lines.
pub fn clean_body(body: &str) -> String {
    let text = COMMENT.replace_all(body, "");
    let text = WIKI_EMBED.replace_all(&text, "");
    let text = MD_IMAGE.replace_all(&text, "");
    let text = WIKILINK.replace_all(&text, |caps: &Captures| {
        caps[1].split('|').next().unwrap_or_default().trim().to_string()
    });
    let text = MD_LINK.replace_all(&text, "$1");
    let text = CALLOUT.replace_all(&text, "");
    let text = BLANK_RUN.replace_all(&text, "\n\n");
    text.trim().to_string()
}

fn parse_timestamp_value(value: &Value) -> Option<DateTime<FixedOffset>> {
    match value {
        Value::String(s) => parse_timestamp(s),
        Value::Number(n) => n
            .as_i64()
            .and_then(|secs| DateTime::<Utc>::from_timestamp(secs, 0))
            .map(|dt| dt.fixed_offset()),
        _ => None,
    }
}

/// Best-effort timestamp parsing. Naive values are taken as UTC.
pub fn parse_timestamp(input: &str) -> Option<DateTime<FixedOffset>> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return None;
    }
    let iso = match trimmed.strip_suffix('Z') {
        Some(rest) => format!("{rest}+00:00"),
        None => trimmed.to_string(),
    };

    if let Ok(dt) = DateTime::parse_from_rfc3339(&iso) {
        return Some(dt);
    }
    for fmt in ["%Y-%m-%dT%H:%M:%S%.f%:z", "%Y-%m-%d %H:%M:%S%.f%:z"] {
        if let Ok(dt) = DateTime::parse_from_str(&iso, fmt) {
            return Some(dt);
        }
    }
    for fmt in DATETIME_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(trimmed, fmt) {
            return Some(naive.and_utc().fixed_offset());
        }
    }
    for fmt in DATE_FORMATS {
        if let Ok(date) = NaiveDate::parse_from_str(trimmed, fmt) {
            return date
                .and_hms_opt(0, 0, 0)
                .map(|naive| naive.and_utc().fixed_offset());
        }
    }
    None
}
