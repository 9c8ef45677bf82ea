//! Generic reverse index: derived key -> set of primary keys.
//!
//! Backed by a sharded map of sets. Mutations take the shard lock for one
//! key; readers receive a cloned snapshot of the set, never a live view, so
//! fan-out iteration runs without holding any lock.

use dashmap::DashMap;
use std::collections::HashSet;
use std::hash::Hash;

pub struct ReverseIndex<K, V>
where
    K: Eq + Hash,
    V: Eq + Hash + Copy,
{
    map: DashMap<K, HashSet<V>>,
}

impl<K, V> ReverseIndex<K, V>
where
    K: Eq + Hash,
    V: Eq + Hash + Copy,
{
    pub fn new() -> Self {
        Self { map: DashMap::new() }
    }

    /// Add `value` under `key`. Returns true if it was not already present.
    pub fn insert(&self, key: K, value: V) -> bool {
        self.map.entry(key).or_default().insert(value)
    }

    /// Remove `value` from under `key`, dropping the set once empty.
    /// Returns true if the value was present.
    pub fn remove(&self, key: &K, value: &V) -> bool {
        let mut removed = false;
        if let Some(mut entry) = self.map.get_mut(key) {
            removed = entry.remove(value);
        }
        if removed {
            // Separate step: get_mut guard must drop before remove_if
            self.map.remove_if(key, |_, set| set.is_empty());
        }
        removed
    }

    /// Snapshot of the set under `key`. Empty set when the key is absent.
    pub fn get(&self, key: &K) -> HashSet<V> {
        self.map
            .get(key)
            .map(|entry| entry.value().clone())
            .unwrap_or_default()
    }

    /// Whether `value` is currently indexed under `key`.
    pub fn contains(&self, key: &K, value: &V) -> bool {
        self.map
            .get(key)
            .map(|entry| entry.contains(value))
            .unwrap_or(false)
    }

    /// Number of keys with a non-empty set.
    pub fn key_count(&self) -> usize {
        self.map.len()
    }
}

impl<K, V> Default for ReverseIndex<K, V>
where
    K: Eq + Hash,
    V: Eq + Hash + Copy,
{
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_and_snapshot() {
        let index: ReverseIndex<&str, u64> = ReverseIndex::new();
        assert!(index.insert("USD", 1));
        assert!(index.insert("USD", 2));
        assert!(!index.insert("USD", 1));

        let snapshot = index.get(&"USD");
        assert_eq!(snapshot.len(), 2);
        assert!(snapshot.contains(&1) && snapshot.contains(&2));
        assert!(index.get(&"EUR").is_empty());
    }

    #[test]
    fn remove_drops_empty_sets() {
        let index: ReverseIndex<&str, u64> = ReverseIndex::new();
        index.insert("EUR", 7);
        assert_eq!(index.key_count(), 1);

        assert!(index.remove(&"EUR", &7));
        assert!(!index.remove(&"EUR", &7));
        assert_eq!(index.key_count(), 0);
    }

    #[test]
    fn snapshot_is_detached() {
        let index: ReverseIndex<&str, u64> = ReverseIndex::new();
        index.insert("JPY", 1);

        let snapshot = index.get(&"JPY");
        index.insert("JPY", 2);

        // The earlier snapshot is unaffected by later writes
        assert_eq!(snapshot.len(), 1);
        assert_eq!(index.get(&"JPY").len(), 2);
    }

    #[test]
    fn concurrent_mutation() {
        use std::sync::Arc;

        let index: Arc<ReverseIndex<u64, u64>> = Arc::new(ReverseIndex::new());
        let mut handles = vec![];

        for t in 0..4u64 {
            let index = Arc::clone(&index);
            handles.push(std::thread::spawn(move || {
                for i in 0..250u64 {
                    index.insert(i % 10, t * 1_000 + i);
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }

        let total: usize = (0..10).map(|k| index.get(&k).len()).sum();
        assert_eq!(total, 1_000);
    }
}
