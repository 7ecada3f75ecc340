use std::hash::Hash;

use ahash::{AHashMap, RandomState};
use parking_lot::RwLock;

// ---------------------------------------------------------------------------
// Shard
// ---------------------------------------------------------------------------

/// Cache-line padding to prevent false sharing between shards.
#[repr(align(64))]
pub(crate) struct Shard<K, V> {
    pub(crate) map: RwLock<AHashMap<K, V>>,
}

// ---------------------------------------------------------------------------
// ShardedStore
// ---------------------------------------------------------------------------

/// A thread-safe associative map backed by `N` independently-locked shards.
///
/// Reads use a shared lock, writes use an exclusive lock, both per-shard.
/// There is no lock spanning the whole map: operations on keys that hash to
/// different shards never contend.
///
/// Values are handed out by clone, so in practice `V` is an `Arc` and callers
/// do their real work on the shared value after the shard lock is released.
pub(crate) struct ShardedStore<K, V> {
    shards: Box<[Shard<K, V>]>,
    /// Always `shards.len() - 1`; shards.len() is a power of two.
    shard_mask: usize,
    /// Hasher used only to compute shard indices.
    build_hasher: RandomState,
}

impl<K: Hash + Eq, V: Clone> ShardedStore<K, V> {
    pub(crate) fn new(num_shards: usize) -> Self {
        assert!(num_shards.is_power_of_two());
        let shards = (0..num_shards)
            .map(|_| Shard {
                map: RwLock::new(AHashMap::new()),
            })
            .collect::<Vec<_>>()
            .into_boxed_slice();

        ShardedStore {
            shards,
            shard_mask: num_shards - 1,
            build_hasher: RandomState::new(),
        }
    }

    #[inline]
    fn shard_for(&self, key: &K) -> &Shard<K, V> {
        let h = self.build_hasher.hash_one(key);
        // Use the high bits (better avalanche from ahash).
        &self.shards[((h >> 32) as usize) & self.shard_mask]
    }

    // -----------------------------------------------------------------------
    // Point operations
    // -----------------------------------------------------------------------

    /// Returns a clone of the value for `key`, or `None` if absent.
    pub(crate) fn get(&self, key: &K) -> Option<V> {
        self.shard_for(key).map.read().get(key).cloned()
    }

    /// Inserts `value` for `key`, returning the previous value, if any.
    pub(crate) fn insert(&self, key: K, value: V) -> Option<V> {
        self.shard_for(&key).map.write().insert(key, value)
    }

    /// Returns the value resident for `key`, inserting `make()` first if
    /// there is none.
    ///
    /// When several threads race on an absent key exactly one `make()` result
    /// is stored and every caller gets that same value back.  The key moved
    /// into the map is the first racer's; later racers' keys are dropped.
    pub(crate) fn get_or_insert_with(&self, key: K, make: impl FnOnce() -> V) -> V {
        let shard = self.shard_for(&key);
        if let Some(v) = shard.map.read().get(&key) {
            return v.clone();
        }
        shard.map.write().entry(key).or_insert_with(make).clone()
    }

    /// Removes `key` only if `pred` holds for its current value.
    ///
    /// The check and the removal happen under one exclusive shard lock.
    pub(crate) fn remove_if(&self, key: &K, pred: impl FnOnce(&V) -> bool) -> Option<V> {
        let mut map = self.shard_for(key).map.write();
        match map.get(key) {
            Some(v) if pred(v) => map.remove(key),
            _ => None,
        }
    }

    // -----------------------------------------------------------------------
    // Whole-map operations
    // -----------------------------------------------------------------------

    /// Keeps only the entries for which `keep` returns `true`.
    ///
    /// Shards are locked one at a time.  Returns the number of removed
    /// entries.
    pub(crate) fn retain(&self, mut keep: impl FnMut(&K, &V) -> bool) -> usize {
        let mut removed = 0;
        for shard in self.shards.iter() {
            let mut map = shard.map.write();
            let before = map.len();
            map.retain(|k, v| keep(k, v));
            removed += before - map.len();
        }
        removed
    }

    /// Total number of entries.  Point-in-time per shard only.
    pub(crate) fn len(&self) -> usize {
        self.shards.iter().map(|s| s.map.read().len()).sum()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.shards.iter().all(|s| s.map.read().is_empty())
    }

    /// Counts the entries matching `pred`.  Point-in-time per shard only.
    pub(crate) fn count_where(&self, mut pred: impl FnMut(&V) -> bool) -> usize {
        self.shards
            .iter()
            .map(|s| s.map.read().values().filter(|v| pred(v)).count())
            .sum()
    }

    /// Visits the store one shard at a time.
    ///
    /// For each shard, `select` runs under the shard's read lock and copies
    /// out whatever the caller needs; `visit` then runs on that snapshot with
    /// no lock held, so it may freely call back into the store.  Returning
    /// `false` from `visit` stops the walk.
    pub(crate) fn for_each_shard<T>(
        &self,
        mut select: impl FnMut(&K, &V) -> Option<T>,
        mut visit: impl FnMut(Vec<T>) -> bool,
    ) {
        for shard in self.shards.iter() {
            let snapshot: Vec<T> = shard
                .map
                .read()
                .iter()
                .filter_map(|(k, v)| select(k, v))
                .collect();
            if snapshot.is_empty() {
                continue;
            }
            if !visit(snapshot) {
                return;
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
