//! Repository diff → [`FileChange`] classification.

use crate::models::{ChangeStatus, FileChange, RawDiffEntry, RemoteDiff};

/// Extension of the documents the index tracks.
pub const DOCUMENT_EXTENSION: &str = ".md";

/// Classify the entries of a [`RemoteDiff`].
///
/// Returns nothing when both heads are equal. Entries are kept in the
/// order the repository reported them; only `.md` paths survive.
pub fn classify(diff: &RemoteDiff) -> Vec<FileChange> {
    if diff.local_head == diff.remote_head {
        return Vec::new();
    }
    diff.entries.iter().filter_map(classify_entry).collect()
}

/// Classify one raw diff entry, or `None` if it is out of scope.
///
/// Git markers map as follows: `A` and `C` (copy destination) → Added,
/// `M` and `T` → Modified, `D` → Deleted, `R` → Renamed. Similarity
/// scores such as `R087` are ignored.
pub fn classify_entry(entry: &RawDiffEntry) -> Option<FileChange> {
    let path = entry.new_path.as_deref().or(entry.old_path.as_deref())?;
    if !is_document_path(path) {
        return None;
    }

    let status = match entry.marker.chars().next().map(|c| c.to_ascii_uppercase()) {
        Some('A') | Some('C') => ChangeStatus::Added,
        Some('M') | Some('T') => ChangeStatus::Modified,
        Some('D') => ChangeStatus::Deleted,
        Some('R') => ChangeStatus::Renamed,
        _ => {
            tracing::debug!(marker = %entry.marker, path, "skipping unsupported diff marker");
            return None;
        }
    };

    let change = match status {
        ChangeStatus::Renamed => match entry.old_path.as_deref() {
            Some(old) if old != path => FileChange::renamed(old, path),
            _ => FileChange::added(path),
        },
        ChangeStatus::Added => FileChange::added(path),
        ChangeStatus::Modified => FileChange::modified(path),
        ChangeStatus::Deleted => FileChange::deleted(path),
    };
    Some(change)
}

pub fn is_document_path(path: &str) -> bool {
    path.ends_with(DOCUMENT_EXTENSION)
}
