//! In-memory versioned backend.

use crate::backend::{BatchOp, KvBackend};
use crate::error::{StorageError, StorageResult};
use parking_lot::RwLock;
use std::collections::BTreeMap;

/// One committed version of a key. `None` is a tombstone.
#[derive(Debug, Clone)]
struct Version {
    seq: u64,
    value: Option<Vec<u8>>,
}

#[derive(Debug, Default)]
struct Inner {
    /// Version chains ordered by `(collection, key)`. Chains are append-only
    /// and sorted by sequence; within one sequence, later entries win.
    chains: BTreeMap<(u32, i64), Vec<Version>>,
    max_seq: u64,
}

impl Inner {
    fn visible<'a>(&'a self, collection: u32, key: i64, snapshot: Option<u64>)
        -> Option<&'a Version> {
        let chain = self.chains.get(&(collection, key))?;
        match snapshot {
            None => chain.last(),
            Some(s) => chain.iter().rev().find(|v| v.seq <= s),
        }
    }
}

/// An in-memory versioned backend.
///
/// Stores all version chains in memory. Suitable for unit tests, integration
/// tests, and ephemeral databases opened without a path.
///
/// # Thread Safety
///
/// All operations take `&self`; the backend is safe to share across threads.
///
/// # Example
///
/// ```rust
/// use strata_storage::{BatchOp, KvBackend, MemoryBackend};
///
/// let backend = MemoryBackend::new();
/// backend.apply(&[BatchOp::put(0, 7, vec![1, 2, 3])], 1).unwrap();
/// assert_eq!(backend.len_at(0, 7, None).unwrap(), Some(3));
/// ```
#[derive(Debug, Default)]
pub struct MemoryBackend {
    inner: RwLock<Inner>,
}

impl MemoryBackend {
    /// Creates a new empty backend.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of keys that ever had a version, across all
    /// collections. Useful for tests and debugging.
    #[must_use]
    pub fn chain_count(&self) -> usize {
        self.inner.read().chains.len()
    }

    fn apply_locked(inner: &mut Inner, batch: &[BatchOp], seq: u64) {
        for op in batch {
            match op {
                BatchOp::Put {
                    collection,
                    key,
                    value,
                } => {
                    inner
                        .chains
                        .entry((*collection, *key))
                        .or_default()
                        .push(Version {
                            seq,
                            value: Some(value.clone()),
                        });
                }
                BatchOp::Erase { collection, key } => {
                    inner
                        .chains
                        .entry((*collection, *key))
                        .or_default()
                        .push(Version { seq, value: None });
                }
                BatchOp::DropCollection { collection } => {
                    let range = (*collection, i64::MIN)..=(*collection, i64::MAX);
                    let live: Vec<i64> = inner
                        .chains
                        .range(range)
                        .filter(|(_, chain)| {
                            chain.last().is_some_and(|v| v.value.is_some())
                        })
                        .map(|((_, key), _)| *key)
                        .collect();
                    for key in live {
                        if let Some(chain) = inner.chains.get_mut(&(*collection, key)) {
                            chain.push(Version { seq, value: None });
                        }
                    }
                }
            }
        }
        inner.max_seq = seq;
    }
}

impl KvBackend for MemoryBackend {
    fn get_at(&self, collection: u32, key: i64, snapshot: Option<u64>)
        -> StorageResult<Option<Vec<u8>>> {
        let inner = self.inner.read();
        Ok(inner
            .visible(collection, key, snapshot)
            .and_then(|v| v.value.clone()))
    }

    fn len_at(&self, collection: u32, key: i64, snapshot: Option<u64>)
        -> StorageResult<Option<u64>> {
        let inner = self.inner.read();
        Ok(inner
            .visible(collection, key, snapshot)
            .and_then(|v| v.value.as_ref().map(|bytes| bytes.len() as u64)))
    }

    fn latest_seq(&self, collection: u32, key: i64) -> StorageResult<u64> {
        let inner = self.inner.read();
        Ok(inner
            .chains
            .get(&(collection, key))
            .and_then(|chain| chain.last())
            .map_or(0, |v| v.seq))
    }

    fn apply(&self, batch: &[BatchOp], seq: u64) -> StorageResult<()> {
        let mut inner = self.inner.write();
        if seq <= inner.max_seq {
            return Err(StorageError::SequenceRegression {
                seq,
                last: inner.max_seq,
            });
        }
        Self::apply_locked(&mut inner, batch, seq);
        Ok(())
    }

    fn scan_keys(
        &self,
        collection: u32,
        start: i64,
        limit: usize,
        snapshot: Option<u64>,
    ) -> StorageResult<Vec<i64>> {
        let inner = self.inner.read();
        let mut keys = Vec::new();
        for ((_, key), chain) in inner.chains.range((collection, start)..=(collection, i64::MAX)) {
            if keys.len() >= limit {
                break;
            }
            let visible = match snapshot {
                None => chain.last(),
                Some(s) => chain.iter().rev().find(|v| v.seq <= s),
            };
            if visible.is_some_and(|v| v.value.is_some()) {
                keys.push(*key);
            }
        }
        Ok(keys)
    }

    fn max_seq(&self) -> StorageResult<u64> {
        Ok(self.inner.read().max_seq)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_is_empty() {
        let backend = MemoryBackend::new();
        assert_eq!(backend.chain_count(), 0);
        assert_eq!(backend.max_seq().unwrap(), 0);
    }

    #[test]
    fn put_then_get() {
        let backend = MemoryBackend::new();
        backend.apply(&[BatchOp::put(0, 1, vec![9, 8, 7])], 1).unwrap();

        assert_eq!(backend.get_at(0, 1, None).unwrap(), Some(vec![9, 8, 7]));
        assert_eq!(backend.len_at(0, 1, None).unwrap(), Some(3));
        assert_eq!(backend.latest_seq(0, 1).unwrap(), 1);
    }

    #[test]
    fn empty_value_is_present() {
        let backend = MemoryBackend::new();
        backend.apply(&[BatchOp::put(0, 1, Vec::new())], 1).unwrap();

        assert_eq!(backend.get_at(0, 1, None).unwrap(), Some(Vec::new()));
        assert_eq!(backend.len_at(0, 1, None).unwrap(), Some(0));
    }

    #[test]
    fn erase_makes_absent() {
        let backend = MemoryBackend::new();
        backend.apply(&[BatchOp::put(0, 1, vec![1])], 1).unwrap();
        backend.apply(&[BatchOp::erase(0, 1)], 2).unwrap();

        assert_eq!(backend.get_at(0, 1, None).unwrap(), None);
        assert_eq!(backend.len_at(0, 1, None).unwrap(), None);
        // The erase still counts as the newest write.
        assert_eq!(backend.latest_seq(0, 1).unwrap(), 2);
    }

    #[test]
    fn snapshot_selects_version() {
        let backend = MemoryBackend::new();
        backend.apply(&[BatchOp::put(0, 1, vec![1])], 1).unwrap();
        backend.apply(&[BatchOp::put(0, 1, vec![2])], 2).unwrap();

        assert_eq!(backend.get_at(0, 1, Some(1)).unwrap(), Some(vec![1]));
        assert_eq!(backend.get_at(0, 1, Some(2)).unwrap(), Some(vec![2]));
        assert_eq!(backend.get_at(0, 1, None).unwrap(), Some(vec![2]));
        // Snapshot before the first write observes absence.
        assert_eq!(backend.get_at(0, 1, Some(0)).unwrap(), None);
    }

    #[test]
    fn last_write_wins_within_batch() {
        let backend = MemoryBackend::new();
        backend
            .apply(
                &[BatchOp::put(0, 1, vec![1]), BatchOp::put(0, 1, vec![2])],
                1,
            )
            .unwrap();
        assert_eq!(backend.get_at(0, 1, None).unwrap(), Some(vec![2]));
        assert_eq!(backend.get_at(0, 1, Some(1)).unwrap(), Some(vec![2]));
    }

    #[test]
    fn sequence_must_advance() {
        let backend = MemoryBackend::new();
        backend.apply(&[BatchOp::put(0, 1, vec![1])], 5).unwrap();
        let result = backend.apply(&[BatchOp::put(0, 2, vec![2])], 5);
        assert!(matches!(
            result,
            Err(StorageError::SequenceRegression { seq: 5, last: 5 })
        ));
    }

    #[test]
    fn scan_is_ascending_and_filtered() {
        let backend = MemoryBackend::new();
        backend
            .apply(
                &[
                    BatchOp::put(0, 36, vec![3]),
                    BatchOp::put(0, 34, vec![1]),
                    BatchOp::put(0, 35, vec![2]),
                    BatchOp::put(1, 34, vec![9]),
                ],
                1,
            )
            .unwrap();
        backend.apply(&[BatchOp::erase(0, 35)], 2).unwrap();

        assert_eq!(backend.scan_keys(0, i64::MIN, usize::MAX, None).unwrap(), vec![34, 36]);
        // The erased key is still visible at the older snapshot.
        assert_eq!(
            backend.scan_keys(0, i64::MIN, usize::MAX, Some(1)).unwrap(),
            vec![34, 35, 36]
        );
        assert_eq!(backend.scan_keys(0, 35, usize::MAX, None).unwrap(), vec![36]);
        assert_eq!(backend.scan_keys(0, i64::MIN, 1, None).unwrap(), vec![34]);
    }

    #[test]
    fn negative_keys_order_numerically() {
        let backend = MemoryBackend::new();
        backend
            .apply(
                &[
                    BatchOp::put(0, 5, vec![1]),
                    BatchOp::put(0, -3, vec![2]),
                    BatchOp::put(0, 0, vec![3]),
                ],
                1,
            )
            .unwrap();
        assert_eq!(
            backend.scan_keys(0, i64::MIN, usize::MAX, None).unwrap(),
            vec![-3, 0, 5]
        );
    }

    #[test]
    fn drop_collection_tombstones_live_keys() {
        let backend = MemoryBackend::new();
        backend
            .apply(
                &[BatchOp::put(0, 1, vec![1]), BatchOp::put(1, 1, vec![2])],
                1,
            )
            .unwrap();
        backend
            .apply(&[BatchOp::DropCollection { collection: 0 }], 2)
            .unwrap();

        assert_eq!(backend.get_at(0, 1, None).unwrap(), None);
        assert_eq!(backend.get_at(1, 1, None).unwrap(), Some(vec![2]));
        assert_eq!(backend.latest_seq(0, 1).unwrap(), 2);
        // The dropped key remains visible at the pre-drop snapshot.
        assert_eq!(backend.get_at(0, 1, Some(1)).unwrap(), Some(vec![1]));
    }
}
