//! Transaction manager.

use crate::error::{StrataError, StrataResult};
use crate::txn::state::Transaction;
use crate::types::{CollectionId, Key, SequenceNumber, TransactionId};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use strata_storage::{BatchOp, KvBackend};
use tracing::{debug, trace};

/// Manages transactions with serializable isolation.
///
/// Concurrency control is optimistic: `begin` captures a snapshot sequence,
/// reads and writes proceed without waiting on other transactions, and
/// `commit` briefly holds the commit lock to validate that no transaction
/// committed since the snapshot wrote any key this one read or writes.
/// Validation failure surfaces as [`StrataError::TransactionConflict`]; the
/// caller retries. Read-only transactions always commit.
///
/// The set of successful commits is equivalent to the serial execution in
/// commit-sequence order: each commit's read set was untouched between its
/// snapshot and its sequence, so it observed exactly the serial prefix.
pub struct TransactionManager {
    /// The versioned store.
    backend: Arc<dyn KvBackend>,
    /// Next transaction ID.
    next_txn_id: AtomicU64,
    /// Highest published commit sequence.
    committed_seq: AtomicU64,
    /// Serializes validation + apply + publish.
    commit_lock: Mutex<()>,
}

impl TransactionManager {
    /// Creates a manager over a backend, restoring the sequence counter
    /// from whatever the backend already holds.
    pub fn new(backend: Arc<dyn KvBackend>) -> StrataResult<Self> {
        let committed = backend.max_seq()?;
        Ok(Self {
            backend,
            next_txn_id: AtomicU64::new(1),
            committed_seq: AtomicU64::new(committed),
            commit_lock: Mutex::new(()),
        })
    }

    /// Begins a new transaction with a snapshot of the committed state.
    pub fn begin(&self) -> Transaction {
        let id = TransactionId::new(self.next_txn_id.fetch_add(1, Ordering::SeqCst));
        let snapshot = SequenceNumber::new(self.committed_seq.load(Ordering::SeqCst));
        trace!(txn = %id, snapshot = %snapshot, "begin");
        Transaction::new(id, snapshot)
    }

    /// Commits a transaction.
    ///
    /// Returns the commit sequence (the snapshot sequence for read-only
    /// transactions). On conflict the transaction is aborted, staging is
    /// released, and the caller must retry with a fresh transaction.
    pub fn commit(&self, txn: &mut Transaction) -> StrataResult<SequenceNumber> {
        txn.ensure_active()?;

        if txn.write_count() == 0 {
            // Snapshot reads are trivially serializable at their snapshot.
            txn.mark_committed();
            return Ok(txn.snapshot_seq());
        }

        let _guard = self.commit_lock.lock();
        let snapshot = txn.snapshot_seq().as_u64();

        let mut conflict = None;
        for &(collection, key) in txn.read_set() {
            if self.backend.latest_seq(collection.as_u32(), key)? > snapshot {
                conflict = Some((collection, key));
                break;
            }
        }
        if conflict.is_none() {
            for (&(collection, key), _) in txn.staged_writes() {
                if self.backend.latest_seq(collection.as_u32(), key)? > snapshot {
                    conflict = Some((collection, key));
                    break;
                }
            }
        }
        if let Some((collection, key)) = conflict {
            debug!(txn = %txn.id(), %collection, key, "commit validation conflict");
            txn.mark_aborted();
            return Err(StrataError::TransactionConflict);
        }

        let batch: Vec<BatchOp> = txn
            .staged_writes()
            .map(|(&(collection, key), write)| match write {
                Some(value) => BatchOp::put(collection.as_u32(), key, value.clone()),
                None => BatchOp::erase(collection.as_u32(), key),
            })
            .collect();

        let seq = self.committed_seq.load(Ordering::SeqCst) + 1;
        self.backend.apply(&batch, seq)?;
        self.committed_seq.store(seq, Ordering::SeqCst);

        debug!(txn = %txn.id(), seq, writes = batch.len(), "committed");
        txn.mark_committed();
        Ok(SequenceNumber::new(seq))
    }

    /// Aborts a transaction, releasing all staged changes. Silent.
    pub fn abort(&self, txn: &mut Transaction) -> StrataResult<()> {
        txn.ensure_active()?;
        trace!(txn = %txn.id(), "abort");
        txn.mark_aborted();
        Ok(())
    }

    /// Applies a batch outside any transaction, as its own serialization
    /// point.
    pub fn autocommit(&self, batch: &[BatchOp]) -> StrataResult<SequenceNumber> {
        let _guard = self.commit_lock.lock();
        let seq = self.committed_seq.load(Ordering::SeqCst) + 1;
        self.backend.apply(batch, seq)?;
        self.committed_seq.store(seq, Ordering::SeqCst);
        Ok(SequenceNumber::new(seq))
    }

    /// Reads a place through a transaction: staged writes shadow the
    /// snapshot ("read your writes").
    pub fn get(
        &self,
        txn: &mut Transaction,
        collection: CollectionId,
        key: Key,
        track: bool,
    ) -> StrataResult<Option<Vec<u8>>> {
        if let Some(staged) = txn.staged(collection, key) {
            return Ok(staged.clone());
        }
        if track {
            txn.record_read(collection, key);
        }
        let snapshot = txn.snapshot_seq().as_u64();
        Ok(self
            .backend
            .get_at(collection.as_u32(), key, Some(snapshot))?)
    }

    /// Returns the current committed sequence number.
    #[must_use]
    pub fn committed_seq(&self) -> SequenceNumber {
        SequenceNumber::new(self.committed_seq.load(Ordering::SeqCst))
    }

    /// The backend this manager drives.
    #[must_use]
    pub(crate) fn backend(&self) -> &Arc<dyn KvBackend> {
        &self.backend
    }
}

impl std::fmt::Debug for TransactionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionManager")
            .field("committed_seq", &self.committed_seq())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strata_storage::MemoryBackend;

    fn create_manager() -> TransactionManager {
        TransactionManager::new(Arc::new(MemoryBackend::new())).unwrap()
    }

    const COL: CollectionId = CollectionId::DEFAULT;

    #[test]
    fn begin_captures_snapshot() {
        let tm = create_manager();
        let txn = tm.begin();
        assert!(txn.is_active());
        assert_eq!(txn.snapshot_seq().as_u64(), 0);
    }

    #[test]
    fn commit_empty_transaction_is_free() {
        let tm = create_manager();
        let mut txn = tm.begin();
        let seq = tm.commit(&mut txn).unwrap();
        assert_eq!(seq, txn.snapshot_seq());
        assert_eq!(tm.committed_seq().as_u64(), 0);
    }

    #[test]
    fn read_your_writes() {
        let tm = create_manager();
        let mut txn = tm.begin();

        txn.stage_put(COL, 1, vec![42]).unwrap();
        assert_eq!(tm.get(&mut txn, COL, 1, true).unwrap(), Some(vec![42]));

        txn.stage_erase(COL, 1).unwrap();
        assert_eq!(tm.get(&mut txn, COL, 1, true).unwrap(), None);
    }

    #[test]
    fn committed_data_visible_to_new_transaction() {
        let tm = create_manager();

        let mut writer = tm.begin();
        writer.stage_put(COL, 1, vec![7]).unwrap();
        let seq = tm.commit(&mut writer).unwrap();
        assert_eq!(seq.as_u64(), 1);

        let mut reader = tm.begin();
        assert_eq!(tm.get(&mut reader, COL, 1, true).unwrap(), Some(vec![7]));
    }

    #[test]
    fn aborted_data_not_visible() {
        let tm = create_manager();

        let mut writer = tm.begin();
        writer.stage_put(COL, 1, vec![7]).unwrap();
        tm.abort(&mut writer).unwrap();

        let mut reader = tm.begin();
        assert_eq!(tm.get(&mut reader, COL, 1, true).unwrap(), None);
    }

    #[test]
    fn snapshot_isolation_reader_sees_old_version() {
        let tm = create_manager();

        let mut setup = tm.begin();
        setup.stage_put(COL, 1, vec![1]).unwrap();
        tm.commit(&mut setup).unwrap();

        let mut reader = tm.begin();

        let mut writer = tm.begin();
        writer.stage_put(COL, 1, vec![2]).unwrap();
        tm.commit(&mut writer).unwrap();

        // The old reader still observes its snapshot.
        assert_eq!(tm.get(&mut reader, COL, 1, true).unwrap(), Some(vec![1]));

        let mut fresh = tm.begin();
        assert_eq!(tm.get(&mut fresh, COL, 1, true).unwrap(), Some(vec![2]));
    }

    #[test]
    fn write_write_conflict_detected() {
        let tm = create_manager();

        let mut first = tm.begin();
        let mut second = tm.begin();
        first.stage_put(COL, 1, vec![1]).unwrap();
        second.stage_put(COL, 1, vec![2]).unwrap();

        tm.commit(&mut first).unwrap();
        let result = tm.commit(&mut second);
        assert!(matches!(result, Err(StrataError::TransactionConflict)));
        assert!(!second.is_active());
    }

    #[test]
    fn read_write_conflict_detected() {
        let tm = create_manager();

        let mut setup = tm.begin();
        setup.stage_put(COL, 1, vec![1]).unwrap();
        tm.commit(&mut setup).unwrap();

        // Reader observes key 1, then writes key 2 based on it.
        let mut reader = tm.begin();
        let _ = tm.get(&mut reader, COL, 1, true).unwrap();
        reader.stage_put(COL, 2, vec![9]).unwrap();

        // Meanwhile someone overwrites key 1.
        let mut writer = tm.begin();
        writer.stage_put(COL, 1, vec![2]).unwrap();
        tm.commit(&mut writer).unwrap();

        let result = tm.commit(&mut reader);
        assert!(matches!(result, Err(StrataError::TransactionConflict)));
    }

    #[test]
    fn untracked_reads_do_not_conflict() {
        let tm = create_manager();

        let mut reader = tm.begin();
        let _ = tm.get(&mut reader, COL, 1, false).unwrap();
        reader.stage_put(COL, 2, vec![1]).unwrap();

        let mut writer = tm.begin();
        writer.stage_put(COL, 1, vec![2]).unwrap();
        tm.commit(&mut writer).unwrap();

        assert!(tm.commit(&mut reader).is_ok());
    }

    #[test]
    fn disjoint_transactions_both_commit() {
        let tm = create_manager();

        let mut first = tm.begin();
        let mut second = tm.begin();
        first.stage_put(COL, 1, vec![1]).unwrap();
        second.stage_put(COL, 2, vec![2]).unwrap();

        let s1 = tm.commit(&mut first).unwrap();
        let s2 = tm.commit(&mut second).unwrap();
        assert!(s2 > s1);
    }

    #[test]
    fn read_only_transactions_always_succeed() {
        let tm = create_manager();

        let mut setup = tm.begin();
        setup.stage_put(COL, 1, vec![1]).unwrap();
        tm.commit(&mut setup).unwrap();

        let mut reader = tm.begin();
        let _ = tm.get(&mut reader, COL, 1, true).unwrap();

        let mut writer = tm.begin();
        writer.stage_put(COL, 1, vec![2]).unwrap();
        tm.commit(&mut writer).unwrap();

        // Despite the overlapping write, a read-only commit succeeds.
        assert!(tm.commit(&mut reader).is_ok());
    }

    #[test]
    fn cannot_commit_twice() {
        let tm = create_manager();
        let mut txn = tm.begin();
        tm.commit(&mut txn).unwrap();
        assert!(tm.commit(&mut txn).is_err());
        assert!(tm.abort(&mut txn).is_err());
    }

    #[test]
    fn autocommit_advances_sequence() {
        let tm = create_manager();
        let seq = tm
            .autocommit(&[BatchOp::put(COL.as_u32(), 1, vec![1])])
            .unwrap();
        assert_eq!(seq.as_u64(), 1);
        assert_eq!(tm.committed_seq().as_u64(), 1);
    }

    #[test]
    fn sequence_restored_from_backend() {
        let backend = Arc::new(MemoryBackend::new());
        backend.apply(&[BatchOp::put(0, 1, vec![1])], 41).unwrap();
        let tm = TransactionManager::new(backend).unwrap();
        assert_eq!(tm.committed_seq().as_u64(), 41);

        let mut txn = tm.begin();
        txn.stage_put(COL, 2, vec![2]).unwrap();
        assert_eq!(tm.commit(&mut txn).unwrap().as_u64(), 42);
    }
}
