//! Orphan detection: indexed paths with no file behind them.

use std::collections::BTreeSet;

/// `indexed − repository`, sorted and deduplicated.
pub fn find_orphans<I, R>(indexed: I, repository: R) -> Vec<String>
where
    I: IntoIterator,
    I::Item: AsRef<str>,
    R: IntoIterator,
    R::Item: AsRef<str>,
{
    let present: BTreeSet<String> = repository
        .into_iter()
        .map(|p| p.as_ref().to_string())
        .collect();
    let orphans: BTreeSet<String> = indexed
        .into_iter()
        .map(|p| p.as_ref().to_string())
        .filter(|p| !present.contains(p))
        .collect();
    orphans.into_iter().collect()
}
