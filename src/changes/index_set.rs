//! Strictly ascending sets of collection positions

use std::ops::Range;

use serde::{Deserialize, Serialize};

/// An ordered set of non-negative positions, strictly ascending.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "Vec<usize>", into = "Vec<usize>")]
pub struct IndexSet {
    indices: Vec<usize>,
}

impl IndexSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a position. Returns false if it was already present.
    pub fn insert(&mut self, index: usize) -> bool {
        match self.indices.binary_search(&index) {
            Ok(_) => false,
            Err(at) => {
                self.indices.insert(at, index);
                true
            }
        }
    }

    pub fn contains(&self, index: usize) -> bool {
        self.indices.binary_search(&index).is_ok()
    }

    pub fn len(&self) -> usize {
        self.indices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = usize> + '_ {
        self.indices.iter().copied()
    }

    pub fn as_slice(&self) -> &[usize] {
        &self.indices
    }

    /// Groups the positions into maximal contiguous ranges.
    pub fn ranges(&self) -> Vec<Range<usize>> {
        let mut ranges: Vec<Range<usize>> = Vec::new();
        for &index in &self.indices {
            match ranges.last_mut() {
                Some(last) if last.end == index => last.end = index + 1,
                _ => ranges.push(index..index + 1),
            }
        }
        ranges
    }
}

impl FromIterator<usize> for IndexSet {
    fn from_iter<T: IntoIterator<Item = usize>>(iter: T) -> Self {
        let mut indices: Vec<usize> = iter.into_iter().collect();
        indices.sort_unstable();
        indices.dedup();
        Self { indices }
    }
}

impl From<Vec<usize>> for IndexSet {
    fn from(indices: Vec<usize>) -> Self {
        indices.into_iter().collect()
    }
}

impl From<IndexSet> for Vec<usize> {
    fn from(set: IndexSet) -> Self {
        set.indices
    }
}

impl PartialEq<[usize]> for IndexSet {
    fn eq(&self, other: &[usize]) -> bool {
        self.indices == other
    }
}

impl<const N: usize> PartialEq<[usize; N]> for IndexSet {
    fn eq(&self, other: &[usize; N]) -> bool {
        self.indices == other
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_keeps_order_and_uniqueness() {
        let mut set = IndexSet::new();
        assert!(set.insert(5));
        assert!(set.insert(1));
        assert!(set.insert(3));
        assert!(!set.insert(3));
        assert_eq!(set, [1, 3, 5]);
        assert!(set.contains(3));
        assert!(!set.contains(2));
    }

    #[test]
    fn test_ranges() {
        let set: IndexSet = [0, 1, 2, 5, 7, 8].into_iter().collect();
        assert_eq!(set.ranges(), vec![0..3, 5..6, 7..9]);
        assert!(IndexSet::new().ranges().is_empty());
    }

    #[test]
    fn test_serializes_as_plain_array() {
        let set: IndexSet = vec![2, 0].into();
        assert_eq!(serde_json::to_string(&set).unwrap(), "[0,2]");
    }
}
