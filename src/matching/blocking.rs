//! Blocking: which record pairs are worth scoring.
//!
//! Records share a block when their normalized names start with the same
//! character or both contain a high-collision phrase. A name containing such
//! a phrase also joins the block of the name with the phrase removed.

use std::collections::{BTreeMap, BTreeSet};

use crate::normalize::{contains_phrase, strip_phrase, MAYORS_OFFICE_PHRASE, NYC_PHRASE};

/// Phrases that get a dedicated block.
pub const BLOCK_PHRASES: &[&str] = &[NYC_PHRASE, MAYORS_OFFICE_PHRASE];

/// Block keys of one normalized name. Empty names get no block.
#[must_use]
pub fn block_keys(normalized: &str) -> BTreeSet<String> {
    let mut keys = BTreeSet::new();
    if let Some(c) = normalized.chars().next() {
        keys.insert(format!("char:{c}"));
    }
    for phrase in BLOCK_PHRASES {
        if !contains_phrase(normalized, phrase) {
            continue;
        }
        keys.insert(format!("phrase:{phrase}"));
        if let Some(c) = strip_phrase(normalized, phrase).chars().next() {
            keys.insert(format!("char:{c}"));
        }
    }
    keys
}

/// Groups name indexes by block key.
#[must_use]
pub fn build_blocks<'a>(names: impl IntoIterator<Item = &'a str>) -> BTreeMap<String, Vec<usize>> {
    let mut blocks: BTreeMap<String, Vec<usize>> = BTreeMap::new();
    for (idx, name) in names.into_iter().enumerate() {
        for key in block_keys(name) {
            blocks.entry(key).or_default().push(idx);
        }
    }
    blocks
}

/// Distinct `(i, j)` index pairs with `i < j` that share at least one block.
#[must_use]
pub fn candidate_pairs(blocks: &BTreeMap<String, Vec<usize>>) -> Vec<(usize, usize)> {
    let mut pairs = BTreeSet::new();
    for members in blocks.values() {
        for (pos, &i) in members.iter().enumerate() {
            for &j in &members[pos + 1..] {
                if i != j {
                    pairs.insert((i.min(j), i.max(j)));
                }
            }
        }
    }
    pairs.into_iter().collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nyc_prefixed_name_meets_unprefixed_name() {
        let names = ["new york city police department", "police department", "parks department"];
        let blocks = build_blocks(names);
        let pairs = candidate_pairs(&blocks);
        assert!(pairs.contains(&(0, 1)));
        assert!(pairs.contains(&(1, 2)));
    }

    #[test]
    fn phrase_block_groups_mayors_offices() {
        let keys = block_keys("mayors office of media and entertainment");
        assert!(keys.contains("phrase:mayors office"));
        assert!(keys.contains("char:m"));
        assert_eq!(keys.len(), 2);
    }

    #[test]
    fn empty_names_are_not_blocked() {
        assert!(block_keys("").is_empty());
        let blocks = build_blocks(["", "a"]);
        assert!(candidate_pairs(&blocks).is_empty());
    }

    #[test]
    fn pairs_are_distinct_and_ordered() {
        let blocks = build_blocks(["new york city board", "new york city bureau", "board"]);
        let pairs = candidate_pairs(&blocks);
        let unique: BTreeSet<_> = pairs.iter().collect();
        assert_eq!(unique.len(), pairs.len());
        assert!(pairs.iter().all(|(i, j)| i < j));
    }
}
