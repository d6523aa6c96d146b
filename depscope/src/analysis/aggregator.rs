//! Dependence aggregation with periodic parallel deduplication.
//!
//! Keys are appended to a plain vector on the hot path. When the vector reaches
//! its high-water mark it is compacted into the global set:
//!
//! ```text
//!  log: [k0 k1 k2 ... kM)
//!        └ chunk 0 ┘└ chunk 1 ┘ ... └ chunk N-1 ┘     N = min(workers, M)
//!             │          │                │
//!         local set  local set        local set        (scoped threads)
//!             └──────────┴───── merge ────┘
//!                          │
//!                  Mutex<HashSet<Key>>
//! ```
//!
//! The dispatcher waits for compaction to finish, so the log and the set are
//! never touched concurrently by anything other than the merge workers.

use std::collections::HashSet;
use std::sync::{Mutex, PoisonError};

use log::debug;

use super::dependence::DependenceKey;

/// Default number of keys buffered before a compaction
pub const DEFAULT_DEDUP_CAPACITY: usize = 1 << 24;

/// Collects dependence keys for one profiling run
pub struct DependenceAggregator {
    log: Vec<DependenceKey>,
    capacity: usize,
    workers: usize,
    distinct: HashSet<DependenceKey>,
    recorded: u64,
    compactions: u64,
}

impl DependenceAggregator {
    #[must_use]
    pub fn new(capacity: usize, workers: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            log: Vec::with_capacity(capacity.min(1 << 16)),
            capacity,
            workers: workers.max(1),
            distinct: HashSet::new(),
            recorded: 0,
            compactions: 0,
        }
    }

    /// Append one key, compacting if the log is full
    #[inline]
    pub fn record(&mut self, key: DependenceKey) {
        self.log.push(key);
        self.recorded += 1;
        if self.log.len() >= self.capacity {
            self.compact();
        }
    }

    /// Merge the log into the distinct set and clear it
    pub fn compact(&mut self) {
        if self.log.is_empty() {
            return;
        }
        let before = self.distinct.len();
        let merged = dedup_parallel_into(&self.log, self.workers, std::mem::take(&mut self.distinct));
        self.distinct = merged;
        debug!(
            "compaction #{}: {} keys -> {} new distinct ({} total)",
            self.compactions + 1,
            self.log.len(),
            self.distinct.len() - before,
            self.distinct.len()
        );
        self.log.clear();
        self.compactions += 1;
    }

    /// Number of distinct keys in the set, not counting the uncompacted log
    #[must_use]
    pub fn distinct(&self) -> usize {
        self.distinct.len()
    }

    /// Keys recorded since creation, duplicates included
    #[must_use]
    pub fn recorded(&self) -> u64 {
        self.recorded
    }

    #[must_use]
    pub fn compactions(&self) -> u64 {
        self.compactions
    }

    /// Keys waiting in the log
    #[must_use]
    pub fn pending(&self) -> usize {
        self.log.len()
    }

    /// Compact and return every distinct key in canonical order
    #[must_use]
    pub fn finish(mut self) -> Vec<DependenceKey> {
        self.compact();
        sorted(self.distinct.into_iter())
    }

    /// Every distinct key seen so far (log included) in canonical order,
    /// without consuming the aggregator
    #[must_use]
    pub fn snapshot_sorted(&self) -> Vec<DependenceKey> {
        let all: HashSet<_> = self.distinct.iter().chain(self.log.iter()).copied().collect();
        sorted(all.into_iter())
    }
}

fn sorted(keys: impl Iterator<Item = DependenceKey>) -> Vec<DependenceKey> {
    let mut keys: Vec<_> = keys.collect();
    keys.sort_unstable();
    keys
}

/// Deduplicate `keys` using up to `workers` threads.
///
/// The result equals `keys.iter().copied().collect::<HashSet<_>>()` for any
/// worker count.
#[must_use]
pub fn dedup_parallel(keys: &[DependenceKey], workers: usize) -> HashSet<DependenceKey> {
    dedup_parallel_into(keys, workers, HashSet::new())
}

fn dedup_parallel_into(
    keys: &[DependenceKey],
    workers: usize,
    global: HashSet<DependenceKey>,
) -> HashSet<DependenceKey> {
    let chunks = workers.max(1).min(keys.len());
    if chunks <= 1 {
        let mut global = global;
        global.extend(keys.iter().copied());
        return global;
    }

    let chunk_len = keys.len().div_ceil(chunks);
    let global = Mutex::new(global);
    std::thread::scope(|scope| {
        for chunk in keys.chunks(chunk_len) {
            let global = &global;
            scope.spawn(move || {
                let local: HashSet<DependenceKey> = chunk.iter().copied().collect();
                // Inserts are idempotent, so a poisoned set is still usable
                let mut set = global.lock().unwrap_or_else(PoisonError::into_inner);
                set.extend(local);
            });
        }
    });
    global.into_inner().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::InstrId;

    fn key(i: u32) -> DependenceKey {
        DependenceKey::new(InstrId(i % 97), InstrId(i % 31), InstrId(i % 31), i % 2 == 0)
    }

    fn single_threaded(keys: &[DependenceKey]) -> HashSet<DependenceKey> {
        keys.iter().copied().collect()
    }

    #[test]
    fn test_parallel_matches_single_threaded() {
        for m in [0usize, 1, 2, 7, 100, 1000, 10_007] {
            let keys: Vec<_> = (0..u32::try_from(m).unwrap()).map(key).collect();
            let expected = single_threaded(&keys);
            for n in [1usize, 2, 3, 8, 56, 20_000] {
                assert_eq!(dedup_parallel(&keys, n), expected, "M={m} N={n}");
            }
        }
    }

    #[test]
    fn test_dedup_idempotent() {
        let keys: Vec<_> = (0..5000).map(key).collect();
        let once = dedup_parallel(&keys, 4);
        let again: Vec<_> = once.iter().copied().collect();
        assert_eq!(dedup_parallel(&again, 4), once);
    }

    #[test]
    fn test_compaction_at_high_water() {
        let mut agg = DependenceAggregator::new(10, 2);
        for i in 0..25 {
            agg.record(key(i % 5));
        }
        assert_eq!(agg.compactions(), 2);
        assert_eq!(agg.pending(), 5);
        assert_eq!(agg.distinct(), 5);
        assert_eq!(agg.recorded(), 25);

        let keys = agg.finish();
        assert_eq!(keys.len(), 5);
        assert!(keys.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_finish_equals_snapshot() {
        let mut agg = DependenceAggregator::new(64, 3);
        for i in 0..200 {
            agg.record(key(i));
        }
        let snapshot = agg.snapshot_sorted();
        assert_eq!(agg.finish(), snapshot);
    }

    #[test]
    fn test_empty_finish() {
        let agg = DependenceAggregator::new(DEFAULT_DEDUP_CAPACITY, 4);
        assert!(agg.finish().is_empty());
    }
}
