//! Bounded (signer, key) cache with time and per-signer count eviction
//!
//! Entries are indexed twice: per signer for lookups, and in insertion order
//! for timeout eviction. Removals that bypass the time index (count eviction,
//! `remove_key`) leave stale index entries behind; they are recognised by
//! sequence number and skipped when drained.

use std::collections::{HashMap, VecDeque};
use std::hash::Hash;

#[derive(Debug, Clone)]
struct PoolEntry<V> {
    time: i64,
    seq: u64,
    value: V,
}

#[derive(Debug, Clone)]
struct IndexEntry<S, K> {
    time: i64,
    seq: u64,
    signer: S,
    key: K,
}

/// What an insert evicted, for logging
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Evicted {
    pub by_timeout: usize,
    pub by_count: usize,
}

#[derive(Debug, Clone)]
pub struct TimedPool<S, K, V> {
    entries: HashMap<S, HashMap<K, PoolEntry<V>>>,
    time_index: VecDeque<IndexEntry<S, K>>,
    next_seq: u64,
    /// Entries older than this are evicted (same unit as the insert times)
    timeout: i64,
    count_limit: usize,
}

impl<S, K, V> TimedPool<S, K, V>
where
    S: Eq + Hash + Clone,
    K: Eq + Hash + Clone,
{
    pub fn new(timeout: i64, count_limit: usize) -> Self {
        Self {
            entries: HashMap::new(),
            time_index: VecDeque::new(),
            next_seq: 0,
            timeout,
            count_limit,
        }
    }

    /// Insert `value` under `(signer, key)` at time `now`, then evict.
    ///
    /// Returns `None` and leaves the pool untouched if the pair already exists.
    pub fn insert(&mut self, signer: S, key: K, value: V, now: i64) -> Option<Evicted> {
        let seq = self.next_seq;
        let signer_entries = self.entries.entry(signer.clone()).or_default();
        if signer_entries.contains_key(&key) {
            return None;
        }
        signer_entries.insert(key.clone(), PoolEntry { time: now, seq, value });
        self.next_seq += 1;
        self.time_index.push_back(IndexEntry {
            time: now,
            seq,
            signer: signer.clone(),
            key,
        });

        let by_timeout = self.evict_timeout(now);
        let by_count = self.evict_count(&signer);
        Some(Evicted {
            by_timeout,
            by_count,
        })
    }

    fn evict_timeout(&mut self, now: i64) -> usize {
        let deadline = now.saturating_sub(self.timeout);
        let mut removed = 0;
        while let Some(front) = self.time_index.front() {
            if front.time >= deadline {
                break;
            }
            let Some(entry) = self.time_index.pop_front() else {
                break;
            };
            if let Some(signer_entries) = self.entries.get_mut(&entry.signer) {
                if signer_entries.get(&entry.key).map(|e| e.seq) == Some(entry.seq) {
                    signer_entries.remove(&entry.key);
                    removed += 1;
                }
                if signer_entries.is_empty() {
                    self.entries.remove(&entry.signer);
                }
            }
        }
        removed
    }

    fn evict_count(&mut self, signer: &S) -> usize {
        let Some(signer_entries) = self.entries.get_mut(signer) else {
            return 0;
        };
        let mut removed = 0;
        while signer_entries.len() > self.count_limit {
            let oldest = signer_entries
                .iter()
                .min_by_key(|(_, e)| (e.time, e.seq))
                .map(|(k, _)| k.clone());
            match oldest {
                Some(key) => {
                    signer_entries.remove(&key);
                    removed += 1;
                }
                None => break,
            }
        }
        removed
    }

    /// Values stored under `key`, across all signers
    pub fn values_for_key<'a>(&'a self, key: &'a K) -> impl Iterator<Item = &'a V> + 'a {
        self.entries
            .values()
            .filter_map(move |signer_entries| signer_entries.get(key).map(|e| &e.value))
    }

    pub fn get(&self, signer: &S, key: &K) -> Option<&V> {
        self.entries.get(signer)?.get(key).map(|e| &e.value)
    }

    /// Insert time of `(signer, key)`
    pub fn insert_time(&self, signer: &S, key: &K) -> Option<i64> {
        self.entries.get(signer)?.get(key).map(|e| e.time)
    }

    /// Remove `key` for every signer, returning how many entries went
    pub fn remove_key(&mut self, key: &K) -> usize {
        let mut removed = 0;
        self.entries.retain(|_, signer_entries| {
            if signer_entries.remove(key).is_some() {
                removed += 1;
            }
            !signer_entries.is_empty()
        });
        removed
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.time_index.clear();
    }

    pub fn signer_count(&self, signer: &S) -> usize {
        self.entries.get(signer).map_or(0, |e| e.len())
    }

    pub fn len(&self) -> usize {
        self.entries.values().map(|e| e.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
