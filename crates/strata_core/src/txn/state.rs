//! Transaction state.

use crate::error::{StrataError, StrataResult};
use crate::types::{CollectionId, Key, SequenceNumber, TransactionId};
use std::collections::{BTreeMap, HashSet};
use std::ops::Bound;

/// State of a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    /// Transaction is active and can perform operations.
    Active,
    /// Transaction has been committed.
    Committed,
    /// Transaction has been aborted.
    Aborted,
}

/// One staged write: a value to install or an erase tombstone.
///
/// `clear` is not a third case - clearing a key stages an empty value,
/// which keeps the key present with length 0.
pub type StagedWrite = Option<Vec<u8>>;

/// An active transaction.
///
/// Writes are staged locally and invisible to other readers until commit.
/// Reads record the keys they touched; at commit time the manager verifies
/// that nothing the transaction observed (or writes) was overwritten since
/// its snapshot.
#[derive(Debug)]
pub struct Transaction {
    /// Transaction ID.
    id: TransactionId,
    /// Snapshot sequence; reads observe this point in time.
    snapshot_seq: SequenceNumber,
    /// Current state.
    state: TransactionState,
    /// Staged writes ordered by place, last write per place wins.
    writes: BTreeMap<(CollectionId, Key), StagedWrite>,
    /// Read set for commit validation.
    reads: HashSet<(CollectionId, Key)>,
}

impl Transaction {
    pub(crate) fn new(id: TransactionId, snapshot_seq: SequenceNumber) -> Self {
        Self {
            id,
            snapshot_seq,
            state: TransactionState::Active,
            writes: BTreeMap::new(),
            reads: HashSet::new(),
        }
    }

    /// Returns the transaction ID.
    #[must_use]
    pub fn id(&self) -> TransactionId {
        self.id
    }

    /// Returns the snapshot sequence number.
    #[must_use]
    pub fn snapshot_seq(&self) -> SequenceNumber {
        self.snapshot_seq
    }

    /// Returns the current state.
    #[must_use]
    pub fn state(&self) -> TransactionState {
        self.state
    }

    /// Checks if the transaction is still active.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.state == TransactionState::Active
    }

    /// Stages a value write for a place.
    pub fn stage_put(
        &mut self,
        collection: CollectionId,
        key: Key,
        value: Vec<u8>,
    ) -> StrataResult<()> {
        self.ensure_active()?;
        self.writes.insert((collection, key), Some(value));
        Ok(())
    }

    /// Stages an erase for a place.
    pub fn stage_erase(&mut self, collection: CollectionId, key: Key) -> StrataResult<()> {
        self.ensure_active()?;
        self.writes.insert((collection, key), None);
        Ok(())
    }

    /// Records a read for commit validation.
    pub fn record_read(&mut self, collection: CollectionId, key: Key) {
        self.reads.insert((collection, key));
    }

    /// The staged write for a place, if any.
    ///
    /// `Some(None)` is a staged erase; `None` means the place is unstaged
    /// and reads fall through to the snapshot.
    #[must_use]
    pub fn staged(&self, collection: CollectionId, key: Key) -> Option<&StagedWrite> {
        self.writes.get(&(collection, key))
    }

    /// Staged writes within one collection, in ascending key order.
    pub(crate) fn staged_in_collection(
        &self,
        collection: CollectionId,
    ) -> impl Iterator<Item = (Key, &StagedWrite)> {
        self.writes
            .range((
                Bound::Included((collection, Key::MIN)),
                Bound::Included((collection, Key::MAX)),
            ))
            .map(|((_, key), write)| (*key, write))
    }

    /// All staged writes, in place order.
    pub(crate) fn staged_writes(
        &self,
    ) -> impl Iterator<Item = (&(CollectionId, Key), &StagedWrite)> {
        self.writes.iter()
    }

    /// The read set.
    pub(crate) fn read_set(&self) -> impl Iterator<Item = &(CollectionId, Key)> {
        self.reads.iter()
    }

    /// Returns the number of staged writes.
    #[must_use]
    pub fn write_count(&self) -> usize {
        self.writes.len()
    }

    pub(crate) fn mark_committed(&mut self) {
        self.state = TransactionState::Committed;
    }

    pub(crate) fn mark_aborted(&mut self) {
        self.state = TransactionState::Aborted;
    }

    /// Ensures the transaction is active.
    pub(crate) fn ensure_active(&self) -> StrataResult<()> {
        match self.state {
            TransactionState::Active => Ok(()),
            TransactionState::Committed => Err(StrataError::invalid_operation(
                "transaction already committed",
            )),
            TransactionState::Aborted => Err(StrataError::invalid_operation(
                "transaction already aborted",
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_txn() -> Transaction {
        Transaction::new(TransactionId::new(1), SequenceNumber::new(0))
    }

    #[test]
    fn new_transaction_is_active() {
        let txn = create_txn();
        assert!(txn.is_active());
        assert_eq!(txn.state(), TransactionState::Active);
    }

    #[test]
    fn staged_put_and_erase() {
        let mut txn = create_txn();
        let collection = CollectionId::new(1);

        txn.stage_put(collection, 10, vec![1, 2, 3]).unwrap();
        txn.stage_erase(collection, 11).unwrap();

        assert_eq!(txn.staged(collection, 10), Some(&Some(vec![1, 2, 3])));
        assert_eq!(txn.staged(collection, 11), Some(&None));
        assert_eq!(txn.staged(collection, 12), None);
        assert_eq!(txn.write_count(), 2);
    }

    #[test]
    fn last_staged_write_wins() {
        let mut txn = create_txn();
        let collection = CollectionId::new(1);

        txn.stage_put(collection, 10, vec![1]).unwrap();
        txn.stage_put(collection, 10, vec![2]).unwrap();

        assert_eq!(txn.write_count(), 1);
        assert_eq!(txn.staged(collection, 10), Some(&Some(vec![2])));
    }

    #[test]
    fn staged_in_collection_is_ordered_and_scoped() {
        let mut txn = create_txn();
        let c1 = CollectionId::new(1);
        let c2 = CollectionId::new(2);

        txn.stage_put(c1, 5, vec![]).unwrap();
        txn.stage_put(c1, -3, vec![]).unwrap();
        txn.stage_put(c2, 1, vec![]).unwrap();

        let keys: Vec<Key> = txn.staged_in_collection(c1).map(|(k, _)| k).collect();
        assert_eq!(keys, vec![-3, 5]);
    }

    #[test]
    fn cannot_write_after_finalization() {
        let mut txn = create_txn();
        txn.mark_committed();
        assert!(txn.stage_put(CollectionId::DEFAULT, 1, vec![]).is_err());

        let mut txn = create_txn();
        txn.mark_aborted();
        assert!(txn.stage_erase(CollectionId::DEFAULT, 1).is_err());
    }

    #[test]
    fn read_set_records_places() {
        let mut txn = create_txn();
        txn.record_read(CollectionId::DEFAULT, 1);
        txn.record_read(CollectionId::DEFAULT, 1);
        txn.record_read(CollectionId::DEFAULT, 2);
        assert_eq!(txn.read_set().count(), 2);
    }
}
