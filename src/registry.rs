//! Priority-ordered, insertion-ordered registry.
//!
//! Both dispatch components keep their entries in a [`PriorityRegistry`]:
//! buckets keyed by an integer priority, visited in ascending order, with
//! insertion order preserved inside a bucket. Entries carry an explicit key so
//! they can be removed by identity later.

use std::collections::BTreeMap;

use thiserror::Error;

#[derive(Error, Debug, PartialEq)]
pub enum RegistryError {
    #[error("entry already registered at priority {priority}")]
    Duplicate { priority: i32 },

    #[error("entry not found")]
    NotFound,
}

/// A multimap from priority to an insertion-ordered set of keyed entries.
///
/// Removal of an absent key is reported as [`RegistryError::NotFound`] rather
/// than panicking; callers treat it as a bookkeeping condition and continue.
pub struct PriorityRegistry<K, T> {
    buckets: BTreeMap<i32, Vec<(K, T)>>,
}

impl<K, T> Default for PriorityRegistry<K, T> {
    fn default() -> Self {
        Self {
            buckets: BTreeMap::new(),
        }
    }
}

impl<K: PartialEq + Clone, T: Clone> PriorityRegistry<K, T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an entry under `priority`. The same key may appear in different
    /// buckets, but not twice within one.
    pub fn add(&mut self, priority: i32, key: K, value: T) -> Result<(), RegistryError> {
        let bucket = self.buckets.entry(priority).or_default();
        if bucket.iter().any(|(existing, _)| *existing == key) {
            return Err(RegistryError::Duplicate { priority });
        }
        bucket.push((key, value));
        Ok(())
    }

    /// Removes the first entry with `key`, searching buckets in ascending
    /// priority order. Empty buckets are pruned.
    pub fn remove(&mut self, key: &K) -> Result<T, RegistryError> {
        let mut emptied = None;
        let mut removed = None;
        for (priority, bucket) in self.buckets.iter_mut() {
            if let Some(index) = bucket.iter().position(|(existing, _)| existing == key) {
                removed = Some(bucket.remove(index).1);
                if bucket.is_empty() {
                    emptied = Some(*priority);
                }
                break;
            }
        }
        if let Some(priority) = emptied {
            self.buckets.remove(&priority);
        }
        removed.ok_or(RegistryError::NotFound)
    }

    pub fn contains(&self, key: &K) -> bool {
        self.buckets
            .values()
            .any(|bucket| bucket.iter().any(|(existing, _)| existing == key))
    }

    pub fn len(&self) -> usize {
        self.buckets.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }

    /// Clones every group in ascending priority order.
    ///
    /// Dispatch iterates over a snapshot so that removals triggered mid-walk
    /// (a trigger completing, a handler unsubscribing) cannot invalidate the
    /// remaining entries.
    pub fn snapshot(&self) -> Vec<(i32, Vec<(K, T)>)> {
        self.buckets
            .iter()
            .map(|(priority, bucket)| (*priority, bucket.clone()))
            .collect()
    }
}
