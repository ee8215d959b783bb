//! Database facade.

use crate::arena::Arena;
use crate::blobs::{self, BlobsView, MeasureView, WritePayload};
use crate::collections::CollectionRegistry;
use crate::docs::{self, FieldRef, PathsView};
use crate::error::{StrataError, StrataResult};
use crate::gather::{self, GatherField, GatherView};
use crate::graph::{self, Edge, Role};
use crate::soa::{Places, Strided};
use crate::txn::{Transaction, TransactionManager};
use crate::types::{CollectionId, Key, Options, SequenceNumber, LEN_MISSING};
use parking_lot::RwLock;
use std::path::Path;
use std::sync::Arc;
use strata_codec::DocFormat;
use strata_storage::{FileBackend, KvBackend, MemoryBackend};

/// The main database handle.
///
/// `Database` is the entry point for every modality: raw blobs, documents,
/// and graphs all address the same collections through it. The handle is
/// the only long-lived object - arenas and transactions are caller-owned.
///
/// # Opening
///
/// ```rust
/// use strata_core::Database;
///
/// let db = Database::open_in_memory().unwrap();
/// let col = db.collection("users").unwrap();
/// db.put(col, 42, b"payload").unwrap();
/// assert_eq!(db.get(col, 42).unwrap(), Some(b"payload".to_vec()));
/// ```
///
/// Opening with a path persists through the backend's commit log:
///
/// ```rust,ignore
/// let db = Database::open(Path::new("strata.db"))?;
/// ```
pub struct Database {
    manager: TransactionManager,
    collections: CollectionRegistry,
    is_open: RwLock<bool>,
}

impl Database {
    /// Opens a persistent database at `path`.
    pub fn open(path: &Path) -> StrataResult<Self> {
        let backend: Arc<dyn KvBackend> = Arc::new(FileBackend::open(path)?);
        Self::open_with_backend(backend)
    }

    /// Opens a fresh in-memory database.
    pub fn open_in_memory() -> StrataResult<Self> {
        Self::open_with_backend(Arc::new(MemoryBackend::new()))
    }

    /// Opens a database over a pre-built backend.
    ///
    /// This is the plug-in seam: any ordered, versioned backend works.
    pub fn open_with_backend(backend: Arc<dyn KvBackend>) -> StrataResult<Self> {
        let manager = TransactionManager::new(backend)?;
        let collections = CollectionRegistry::open(&manager)?;
        Ok(Self {
            manager,
            collections,
            is_open: RwLock::new(true),
        })
    }

    fn ensure_open(&self) -> StrataResult<()> {
        if *self.is_open.read() {
            Ok(())
        } else {
            Err(StrataError::Uninitialized)
        }
    }

    /// Closes the database. Further operations fail with `Uninitialized`.
    pub fn close(&self) {
        *self.is_open.write() = false;
    }

    /// Whether the database is open.
    #[must_use]
    pub fn is_open(&self) -> bool {
        *self.is_open.read()
    }

    /// The transaction manager (for modality-level helpers).
    #[must_use]
    pub fn manager(&self) -> &TransactionManager {
        &self.manager
    }

    // ------------------------------------------------------------------
    // Collections
    // ------------------------------------------------------------------

    /// Gets or creates a collection handle by name. Idempotent; the empty
    /// name is the always-present default collection.
    pub fn collection(&self, name: &str) -> StrataResult<CollectionId> {
        self.ensure_open()?;
        self.collections.get_or_create(&self.manager, name)
    }

    /// Looks up a collection handle without creating it.
    pub fn find_collection(&self, name: &str) -> StrataResult<Option<CollectionId>> {
        self.ensure_open()?;
        Ok(self.collections.get(name))
    }

    /// Whether a named collection exists.
    pub fn contains_collection(&self, name: &str) -> StrataResult<bool> {
        Ok(self.find_collection(name)?.is_some())
    }

    /// Drops a named collection: all its keys and its registration.
    pub fn drop_collection(&self, name: &str) -> StrataResult<()> {
        self.ensure_open()?;
        self.collections.drop_collection(&self.manager, name)
    }

    /// Removes every key of a collection, keeping it registered.
    pub fn clear_collection(&self, collection: CollectionId) -> StrataResult<()> {
        self.ensure_open()?;
        blobs::clear_collection(&self.manager, collection)
    }

    /// Names of all registered collections, unordered.
    pub fn collection_names(&self) -> StrataResult<Vec<String>> {
        self.ensure_open()?;
        Ok(self.collections.names())
    }

    // ------------------------------------------------------------------
    // Transactions
    // ------------------------------------------------------------------

    /// Begins a transaction with a snapshot of the committed state.
    pub fn begin(&self) -> StrataResult<Transaction> {
        self.ensure_open()?;
        Ok(self.manager.begin())
    }

    /// Commits a transaction, returning its serialization point.
    pub fn commit(&self, txn: &mut Transaction) -> StrataResult<SequenceNumber> {
        self.ensure_open()?;
        self.manager.commit(txn)
    }

    /// Aborts a transaction, releasing all staged changes.
    pub fn abort(&self, txn: &mut Transaction) -> StrataResult<()> {
        self.ensure_open()?;
        self.manager.abort(txn)
    }

    /// Runs a closure in a transaction, retrying it on conflict.
    ///
    /// The closure must be safe to re-run from scratch; staged changes of a
    /// conflicted attempt are discarded before the retry.
    pub fn transaction<T>(
        &self,
        mut body: impl FnMut(&mut Transaction) -> StrataResult<T>,
    ) -> StrataResult<T> {
        self.ensure_open()?;
        loop {
            let mut txn = self.manager.begin();
            let value = match body(&mut txn) {
                Ok(value) => value,
                Err(error) => {
                    if txn.is_active() {
                        self.manager.abort(&mut txn)?;
                    }
                    return Err(error);
                }
            };
            match self.manager.commit(&mut txn) {
                Ok(_) => return Ok(value),
                Err(StrataError::TransactionConflict) => continue,
                Err(error) => return Err(error),
            }
        }
    }

    /// The current committed sequence number.
    #[must_use]
    pub fn committed_seq(&self) -> SequenceNumber {
        self.manager.committed_seq()
    }

    // ------------------------------------------------------------------
    // Batched blob operations
    // ------------------------------------------------------------------

    /// Batched point read into the caller's arena.
    pub fn read<'a>(
        &self,
        txn: Option<&mut Transaction>,
        places: Places<'_>,
        options: &Options,
        arena: &'a mut Arena,
    ) -> StrataResult<BlobsView<'a>> {
        self.ensure_open()?;
        blobs::read(&self.manager, txn, places, options, arena)
    }

    /// Batched write of an SoA payload.
    pub fn write(
        &self,
        txn: Option<&mut Transaction>,
        places: Places<'_>,
        payload: WritePayload<'_>,
        options: &Options,
    ) -> StrataResult<()> {
        self.ensure_open()?;
        blobs::write(&self.manager, txn, places, payload, options)
    }

    /// Batched lengths-only read.
    pub fn measure<'a>(
        &self,
        txn: Option<&Transaction>,
        places: Places<'_>,
        options: &Options,
        arena: &'a mut Arena,
    ) -> StrataResult<MeasureView<'a>> {
        self.ensure_open()?;
        blobs::measure(&self.manager, txn, places, options, arena)
    }

    /// Ascending key scan from `start`, at most `limit` keys.
    pub fn scan<'a>(
        &self,
        txn: Option<&Transaction>,
        collection: CollectionId,
        start: Key,
        limit: usize,
        options: &Options,
        arena: &'a mut Arena,
    ) -> StrataResult<&'a [Key]> {
        self.ensure_open()?;
        blobs::scan(&self.manager, txn, collection, start, limit, options, arena)
    }

    // ------------------------------------------------------------------
    // Single-key conveniences
    // ------------------------------------------------------------------

    /// Writes one value.
    pub fn put(&self, collection: CollectionId, key: Key, value: &[u8]) -> StrataResult<()> {
        self.ensure_open()?;
        let offsets = 0u64;
        let lengths = value.len() as u64;
        let keys = [key];
        blobs::write(
            &self.manager,
            None,
            Places {
                collections: Strided::broadcast(&collection),
                keys: Strided::dense(&keys),
                count: 1,
            },
            WritePayload {
                presence: None,
                offsets: Strided::broadcast(&offsets),
                lengths: Strided::broadcast(&lengths),
                bytes: value,
            },
            &Options::default(),
        )
    }

    /// Reads one value.
    pub fn get(&self, collection: CollectionId, key: Key) -> StrataResult<Option<Vec<u8>>> {
        self.ensure_open()?;
        let snapshot = self.manager.committed_seq().as_u64();
        Ok(self
            .manager
            .backend()
            .get_at(collection.as_u32(), key, Some(snapshot))?)
    }

    /// Removes one key.
    pub fn erase(&self, collection: CollectionId, key: Key) -> StrataResult<()> {
        self.ensure_open()?;
        let offsets = 0u64;
        let lengths = LEN_MISSING;
        let keys = [key];
        blobs::write(
            &self.manager,
            None,
            Places {
                collections: Strided::broadcast(&collection),
                keys: Strided::dense(&keys),
                count: 1,
            },
            WritePayload {
                presence: None,
                offsets: Strided::broadcast(&offsets),
                lengths: Strided::broadcast(&lengths),
                bytes: &[],
            },
            &Options::default(),
        )
    }

    /// Whether a key is present (an empty value counts).
    pub fn contains(&self, collection: CollectionId, key: Key) -> StrataResult<bool> {
        Ok(self.length(collection, key)? != LEN_MISSING)
    }

    /// Length of a value, or `LEN_MISSING` when the key is absent.
    pub fn length(&self, collection: CollectionId, key: Key) -> StrataResult<u64> {
        self.ensure_open()?;
        let snapshot = self.manager.committed_seq().as_u64();
        Ok(self
            .manager
            .backend()
            .len_at(collection.as_u32(), key, Some(snapshot))?
            .unwrap_or(LEN_MISSING))
    }

    // ------------------------------------------------------------------
    // Document modality
    // ------------------------------------------------------------------

    /// Batched document read with optional per-task field selectors.
    pub fn docs_read<'a>(
        &self,
        txn: Option<&mut Transaction>,
        places: Places<'_>,
        fields: Option<Strided<'_, FieldRef<'_>>>,
        format: DocFormat,
        options: &Options,
        arena: &'a mut Arena,
    ) -> StrataResult<BlobsView<'a>> {
        self.ensure_open()?;
        docs::docs_read(&self.manager, txn, places, fields, format, options, arena)
    }

    /// Batched document write, replace or read-modify-write per task.
    pub fn docs_write(
        &self,
        txn: Option<&mut Transaction>,
        places: Places<'_>,
        fields: Option<Strided<'_, FieldRef<'_>>>,
        contents: Strided<'_, Option<&[u8]>>,
        format: DocFormat,
        options: &Options,
    ) -> StrataResult<()> {
        self.ensure_open()?;
        docs::docs_write(&self.manager, txn, places, fields, contents, format, options)
    }

    /// Union of leaf field paths across documents.
    pub fn docs_gist<'a>(
        &self,
        txn: Option<&mut Transaction>,
        places: Places<'_>,
        options: &Options,
        arena: &'a mut Arena,
    ) -> StrataResult<PathsView<'a>> {
        self.ensure_open()?;
        docs::docs_gist(&self.manager, txn, places, options, arena)
    }

    /// Columnar projection of typed fields.
    pub fn docs_gather<'a>(
        &self,
        txn: Option<&mut Transaction>,
        places: Places<'_>,
        fields: &[GatherField<'_>],
        options: &Options,
        arena: &'a mut Arena,
    ) -> StrataResult<GatherView<'a>> {
        self.ensure_open()?;
        gather::docs_gather(&self.manager, txn, places, fields, options, arena)
    }

    // ------------------------------------------------------------------
    // Graph modality
    // ------------------------------------------------------------------

    /// Inserts edges, creating missing endpoint records.
    pub fn graph_upsert(
        &self,
        txn: Option<&mut Transaction>,
        collection: CollectionId,
        edges: &[Edge],
    ) -> StrataResult<()> {
        self.ensure_open()?;
        graph::upsert_edges(&self.manager, txn, collection, edges)
    }

    /// Removes specific edge mirrors from both endpoints.
    pub fn graph_remove_edges(
        &self,
        txn: Option<&mut Transaction>,
        collection: CollectionId,
        edges: &[Edge],
    ) -> StrataResult<()> {
        self.ensure_open()?;
        graph::remove_edges(&self.manager, txn, collection, edges)
    }

    /// Removes vertices and all incident edges.
    pub fn graph_remove_vertices(
        &self,
        txn: Option<&mut Transaction>,
        collection: CollectionId,
        vertices: &[Key],
    ) -> StrataResult<()> {
        self.ensure_open()?;
        graph::remove_vertices(&self.manager, txn, collection, vertices)
    }

    /// Whether a vertex record exists.
    pub fn graph_contains(
        &self,
        txn: Option<&mut Transaction>,
        collection: CollectionId,
        vertex: Key,
    ) -> StrataResult<bool> {
        self.ensure_open()?;
        graph::contains_vertex(&self.manager, txn, collection, vertex)
    }

    /// Adjacency-list size, optionally filtered by role.
    pub fn graph_degree(
        &self,
        txn: Option<&mut Transaction>,
        collection: CollectionId,
        vertex: Key,
        role: Option<Role>,
    ) -> StrataResult<usize> {
        self.ensure_open()?;
        graph::degree(&self.manager, txn, collection, vertex, role)
    }

    /// Edges incident to a vertex, optionally filtered by role.
    pub fn graph_edges_of(
        &self,
        txn: Option<&mut Transaction>,
        collection: CollectionId,
        vertex: Key,
        role: Option<Role>,
    ) -> StrataResult<Vec<Edge>> {
        self.ensure_open()?;
        graph::edges_of(&self.manager, txn, collection, vertex, role)
    }

    /// Edges connecting two vertices.
    pub fn graph_edges_between(
        &self,
        txn: Option<&mut Transaction>,
        collection: CollectionId,
        u: Key,
        v: Key,
    ) -> StrataResult<Vec<Edge>> {
        self.ensure_open()?;
        graph::edges_between(&self.manager, txn, collection, u, v)
    }

    /// Every edge in the graph, each exactly once.
    pub fn graph_edges_all(
        &self,
        txn: Option<&mut Transaction>,
        collection: CollectionId,
    ) -> StrataResult<Vec<Edge>> {
        self.ensure_open()?;
        graph::edges_all(&self.manager, txn, collection)
    }
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("is_open", &self.is_open())
            .field("committed_seq", &self.committed_seq())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_db() -> Database {
        Database::open_in_memory().unwrap()
    }

    #[test]
    fn open_in_memory() {
        let db = create_db();
        assert!(db.is_open());
    }

    #[test]
    fn simple_put_get() {
        let db = create_db();
        let col = db.collection("users").unwrap();

        db.put(col, 7, &[1, 2, 3]).unwrap();
        assert_eq!(db.get(col, 7).unwrap(), Some(vec![1, 2, 3]));
        assert_eq!(db.length(col, 7).unwrap(), 3);
        assert!(db.contains(col, 7).unwrap());
    }

    #[test]
    fn erase_makes_absent() {
        let db = create_db();
        let col = db.collection("users").unwrap();

        db.put(col, 7, &[1]).unwrap();
        db.erase(col, 7).unwrap();
        assert_eq!(db.get(col, 7).unwrap(), None);
        assert!(!db.contains(col, 7).unwrap());
        assert_eq!(db.length(col, 7).unwrap(), LEN_MISSING);
    }

    #[test]
    fn empty_value_is_present() {
        let db = create_db();
        let col = db.collection("users").unwrap();

        db.put(col, 7, &[]).unwrap();
        assert!(db.contains(col, 7).unwrap());
        assert_eq!(db.length(col, 7).unwrap(), 0);
        assert_eq!(db.get(col, 7).unwrap(), Some(Vec::new()));
    }

    #[test]
    fn collection_name_resolution() {
        let db = create_db();
        let c1 = db.collection("users").unwrap();
        let c2 = db.collection("posts").unwrap();
        let c1_again = db.collection("users").unwrap();

        assert_eq!(c1, c1_again);
        assert_ne!(c1, c2);
        assert!(db.contains_collection("users").unwrap());
        assert!(!db.contains_collection("unknown").unwrap());
    }

    #[test]
    fn transaction_isolation_and_commit() {
        let db = create_db();
        let col = db.collection("t").unwrap();

        let mut txn = db.begin().unwrap();
        let keys = [1i64];
        let offsets = 0u64;
        let lengths = 2u64;
        db.write(
            Some(&mut txn),
            Places::in_collection(&col, &keys),
            WritePayload {
                presence: None,
                offsets: Strided::broadcast(&offsets),
                lengths: Strided::broadcast(&lengths),
                bytes: b"tx",
            },
            &Options::default(),
        )
        .unwrap();

        // Invisible outside the transaction.
        assert_eq!(db.get(col, 1).unwrap(), None);

        db.commit(&mut txn).unwrap();
        assert_eq!(db.get(col, 1).unwrap(), Some(b"tx".to_vec()));
    }

    #[test]
    fn transaction_closure_retries() {
        let db = create_db();
        let col = db.collection("t").unwrap();
        db.put(col, 1, &[0]).unwrap();

        let result = db
            .transaction(|txn| {
                let current = db.manager().get(txn, col, 1, true)?.unwrap_or_default();
                txn.stage_put(col, 1, vec![current[0] + 1])?;
                Ok(current[0])
            })
            .unwrap();
        assert_eq!(result, 0);
        assert_eq!(db.get(col, 1).unwrap(), Some(vec![1]));
    }

    #[test]
    fn abort_releases_staging() {
        let db = create_db();
        let col = db.collection("t").unwrap();

        let mut txn = db.begin().unwrap();
        txn.stage_put(col, 1, vec![1]).unwrap();
        db.abort(&mut txn).unwrap();
        assert_eq!(db.get(col, 1).unwrap(), None);
    }

    #[test]
    fn closed_database_rejects_operations() {
        let db = create_db();
        let col = db.collection("t").unwrap();
        db.close();
        assert!(matches!(db.get(col, 1), Err(StrataError::Uninitialized)));
        assert!(matches!(db.begin(), Err(StrataError::Uninitialized)));
    }

    #[test]
    fn cross_collection_isolation() {
        let db = create_db();
        let users = db.collection("users").unwrap();
        let posts = db.collection("posts").unwrap();

        db.put(users, 1, b"u").unwrap();
        db.put(posts, 1, b"p").unwrap();

        assert_eq!(db.get(users, 1).unwrap(), Some(b"u".to_vec()));
        assert_eq!(db.get(posts, 1).unwrap(), Some(b"p".to_vec()));
    }

    #[test]
    fn clear_collection_keeps_registration() {
        let db = create_db();
        let col = db.collection("t").unwrap();
        db.put(col, 1, b"x").unwrap();

        db.clear_collection(col).unwrap();
        assert!(!db.contains(col, 1).unwrap());
        assert!(db.contains_collection("t").unwrap());
    }
}

/// Persistence tests that require a real file system.
#[cfg(test)]
mod persistence_tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn data_and_collections_persist_across_restarts() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("strata.db");

        {
            let db = Database::open(&path).unwrap();
            let users = db.collection("users").unwrap();
            db.put(users, 7, &[1, 2, 3]).unwrap();
        }

        {
            let db = Database::open(&path).unwrap();
            let users = db.find_collection("users").unwrap().expect("users persists");
            assert_eq!(db.get(users, 7).unwrap(), Some(vec![1, 2, 3]));
        }
    }

    #[test]
    fn sequences_continue_after_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("strata.db");

        let first = {
            let db = Database::open(&path).unwrap();
            let col = db.collection("t").unwrap();
            db.put(col, 1, b"a").unwrap();
            db.committed_seq()
        };

        let db = Database::open(&path).unwrap();
        assert_eq!(db.committed_seq(), first);
        let col = db.collection("t").unwrap();
        db.put(col, 2, b"b").unwrap();
        assert!(db.committed_seq() > first);
    }
}
