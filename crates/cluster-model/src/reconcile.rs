//! Three-way diff between a live key set and a full listing.
//!
//! Gateways, services and sessions are all built incrementally from delta
//! notifications and periodically compared against a bulk listing. Every level
//! uses [`diff_keys`] to decide which entries vanished, which were reconfirmed
//! and which are new; what "vanished" means is up to the caller.

use std::collections::HashSet;
use std::hash::Hash;

/// Result of comparing the keys a registry holds against a listing
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct KeyDiff<K> {
    /// Keys held locally that the listing no longer contains
    pub missing: Vec<K>,
    /// Keys present on both sides
    pub retained: Vec<K>,
    /// Keys in the listing that are not held locally
    pub added: Vec<K>,
}

impl<K> KeyDiff<K> {
    /// Whether the listing matches the local key set exactly
    pub fn is_unchanged(&self) -> bool {
        self.missing.is_empty() && self.added.is_empty()
    }
}

/// Diff `existing` against `listing`.
///
/// `missing` and `retained` follow the order of `existing`; `added` follows the
/// order of `listing`, with duplicates collapsed.
pub fn diff_keys<'a, K, I>(existing: &[K], listing: I) -> KeyDiff<K>
where
    K: Clone + Eq + Hash + 'a,
    I: IntoIterator<Item = &'a K>,
{
    let existing_set: HashSet<&K> = existing.iter().collect();

    let mut listed = HashSet::new();
    let mut added = Vec::new();
    for key in listing {
        if listed.insert(key) && !existing_set.contains(key) {
            added.push(key.clone());
        }
    }

    let (retained, missing): (Vec<K>, Vec<K>) = existing
        .iter()
        .cloned()
        .partition(|key| listed.contains(key));

    KeyDiff {
        missing,
        retained,
        added,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_diff_partitions_keys() {
        let existing = vec!["a", "b", "c"];
        let listing = ["b", "c", "d"];

        let diff = diff_keys(&existing, listing.iter());

        assert_eq!(diff.missing, vec!["a"]);
        assert_eq!(diff.retained, vec!["b", "c"]);
        assert_eq!(diff.added, vec!["d"]);
        assert!(!diff.is_unchanged());
    }

    #[test]
    fn test_diff_collapses_duplicate_listing_entries() {
        let existing: Vec<u64> = vec![];
        let listing = [4, 4, 5];

        let diff = diff_keys(&existing, listing.iter());
        assert_eq!(diff.added, vec![4, 5]);
    }

    #[test]
    fn test_identical_sets_are_unchanged() {
        let existing = vec![1, 2];
        let diff = diff_keys(&existing, [2, 1].iter());

        assert!(diff.is_unchanged());
        assert_eq!(diff.retained, vec![1, 2]);
    }
}
