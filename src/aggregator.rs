//! Summary: Shared result map populated concurrently by scan and query jobs.
//! Copyright (c) YOAB. All rights reserved.

use std::collections::{BTreeMap, HashMap};
use std::hash::Hash;
use std::mem;
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::item::Item;

/// Mapping from a job's identity to the items that job produced.
///
/// Scan jobs key by segment id, so concurrent inserts touch disjoint
/// entries; query jobs key by partition key and append. Only the map's own
/// bookkeeping is shared, and it is guarded by one mutex.
///
/// `clear()` and `take_all()` are meant for the driver while no jobs are
/// in flight; this is not checked.
pub struct ResultAggregator<K> {
    entries: Mutex<HashMap<K, Vec<Item>>>,
}

impl<K: Eq + Hash + Ord + Clone> ResultAggregator<K> {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<K, Vec<Item>>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Publishes a job's items, replacing any previous entry for `key`.
    pub fn put(&self, key: K, items: Vec<Item>) -> Option<Vec<Item>> {
        self.lock().insert(key, items)
    }

    /// Publishes items, extending any existing entry for `key`.
    pub fn append(&self, key: K, mut items: Vec<Item>) {
        self.lock().entry(key).or_default().append(&mut items);
    }

    /// Returns a copy of the items published under `key`.
    pub fn get(&self, key: &K) -> Option<Vec<Item>> {
        self.lock().get(key).cloned()
    }

    pub fn contains(&self, key: &K) -> bool {
        self.lock().contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    /// Sum of item counts across all entries.
    pub fn total_items(&self) -> usize {
        self.lock().values().map(Vec::len).sum()
    }

    /// Item count per key, ordered by key.
    pub fn counts(&self) -> BTreeMap<K, usize> {
        self.lock()
            .iter()
            .map(|(k, v)| (k.clone(), v.len()))
            .collect()
    }

    /// Moves every entry out, ordered by key, leaving the map empty.
    pub fn take_all(&self) -> BTreeMap<K, Vec<Item>> {
        mem::take(&mut *self.lock()).into_iter().collect()
    }
}

impl<K: Eq + Hash + Ord + Clone> Default for ResultAggregator<K> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    fn items(n: usize) -> Vec<Item> {
        (0..n).map(|i| Item::new(format!("k{i}"), "A")).collect()
    }

    #[test]
    fn test_concurrent_disjoint_puts() {
        let agg = Arc::new(ResultAggregator::<usize>::new());
        let handles: Vec<_> = (0..32)
            .map(|segment| {
                let agg = Arc::clone(&agg);
                thread::spawn(move || {
                    agg.put(segment, items(segment));
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(agg.len(), 32);
        assert_eq!(agg.total_items(), (0..32).sum::<usize>());
        let counts = agg.counts();
        assert_eq!(counts.keys().copied().collect::<Vec<_>>(), (0..32).collect::<Vec<_>>());
    }

    #[test]
    fn test_append_merges_entries() {
        let agg = ResultAggregator::<String>::new();
        agg.append("O#1".into(), items(2));
        agg.append("O#1".into(), items(3));
        assert_eq!(agg.get(&"O#1".to_string()).map(|v| v.len()), Some(5));
    }

    #[test]
    fn test_take_all_empties_and_orders() {
        let agg = ResultAggregator::<usize>::new();
        agg.put(2, items(1));
        agg.put(0, items(2));
        let taken = agg.take_all();
        assert_eq!(taken.keys().copied().collect::<Vec<_>>(), vec![0, 2]);
        assert!(agg.is_empty());
    }

    #[test]
    fn test_put_replaces() {
        let agg = ResultAggregator::<usize>::new();
        assert!(agg.put(0, items(1)).is_none());
        assert_eq!(agg.put(0, items(4)).map(|v| v.len()), Some(1));
        agg.clear();
        assert!(!agg.contains(&0));
    }
}
