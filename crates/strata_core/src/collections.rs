//! Collection registry.
//!
//! Collection names live in a reserved system key space
//! (`handle -> name`), so the registry is rebuilt from the store itself on
//! open. Creation and lookup are idempotent on the name.

use crate::error::{StrataError, StrataResult};
use crate::txn::TransactionManager;
use crate::types::CollectionId;
use parking_lot::RwLock;
use std::collections::HashMap;
use strata_storage::BatchOp;
use tracing::debug;

#[derive(Debug, Default)]
struct Registry {
    by_name: HashMap<String, CollectionId>,
    next_id: u32,
}

/// Name-to-handle registry backed by the reserved system key space.
#[derive(Debug)]
pub(crate) struct CollectionRegistry {
    inner: RwLock<Registry>,
}

impl CollectionRegistry {
    /// Rebuilds the registry from the system key space.
    pub(crate) fn open(manager: &TransactionManager) -> StrataResult<Self> {
        let backend = manager.backend();
        let system = CollectionId::SYSTEM.as_u32();
        let mut registry = Registry {
            by_name: HashMap::new(),
            next_id: 1,
        };

        for key in backend.scan_keys(system, i64::MIN, usize::MAX, None)? {
            let Some(name_bytes) = backend.get_at(system, key, None)? else {
                continue;
            };
            let name = String::from_utf8(name_bytes).map_err(|_| {
                StrataError::invalid_operation("corrupt collection name in system key space")
            })?;
            let id = u32::try_from(key).map_err(|_| {
                StrataError::invalid_operation("corrupt collection handle in system key space")
            })?;
            registry.by_name.insert(name, CollectionId::new(id));
            registry.next_id = registry.next_id.max(id + 1);
        }

        Ok(Self {
            inner: RwLock::new(registry),
        })
    }

    /// Gets or creates the handle for a name. Idempotent.
    ///
    /// The empty name is the default collection and is never persisted.
    pub(crate) fn get_or_create(
        &self,
        manager: &TransactionManager,
        name: &str,
    ) -> StrataResult<CollectionId> {
        if name.is_empty() {
            return Ok(CollectionId::DEFAULT);
        }
        if let Some(&id) = self.inner.read().by_name.get(name) {
            return Ok(id);
        }

        let mut registry = self.inner.write();
        if let Some(&id) = registry.by_name.get(name) {
            return Ok(id);
        }

        let id = CollectionId::new(registry.next_id);
        manager.autocommit(&[BatchOp::put(
            CollectionId::SYSTEM.as_u32(),
            i64::from(id.as_u32()),
            name.as_bytes().to_vec(),
        )])?;
        registry.next_id += 1;
        registry.by_name.insert(name.to_string(), id);
        debug!(name, %id, "created collection");
        Ok(id)
    }

    /// Looks up a handle without creating it.
    pub(crate) fn get(&self, name: &str) -> Option<CollectionId> {
        if name.is_empty() {
            return Some(CollectionId::DEFAULT);
        }
        self.inner.read().by_name.get(name).copied()
    }

    /// Drops a named collection: all its keys and its registration.
    pub(crate) fn drop_collection(
        &self,
        manager: &TransactionManager,
        name: &str,
    ) -> StrataResult<()> {
        if name.is_empty() {
            return Err(StrataError::invalid_argument(
                "the default collection cannot be dropped",
            ));
        }
        let mut registry = self.inner.write();
        let Some(&id) = registry.by_name.get(name) else {
            return Err(StrataError::unknown_collection(name));
        };
        manager.autocommit(&[
            BatchOp::DropCollection {
                collection: id.as_u32(),
            },
            BatchOp::erase(CollectionId::SYSTEM.as_u32(), i64::from(id.as_u32())),
        ])?;
        registry.by_name.remove(name);
        debug!(name, %id, "dropped collection");
        Ok(())
    }

    /// Names of all registered collections, unordered.
    pub(crate) fn names(&self) -> Vec<String> {
        self.inner.read().by_name.keys().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use strata_storage::{KvBackend, MemoryBackend};

    fn setup() -> (Arc<MemoryBackend>, TransactionManager) {
        let backend = Arc::new(MemoryBackend::new());
        let manager =
            TransactionManager::new(Arc::clone(&backend) as Arc<dyn KvBackend>).unwrap();
        (backend, manager)
    }

    #[test]
    fn creation_is_idempotent() {
        let (_, manager) = setup();
        let registry = CollectionRegistry::open(&manager).unwrap();

        let col1 = registry.get_or_create(&manager, "col1").unwrap();
        let again = registry.get_or_create(&manager, "col1").unwrap();
        let col2 = registry.get_or_create(&manager, "col2").unwrap();

        assert_eq!(col1, again);
        assert_ne!(col1, col2);
        assert_eq!(registry.get("col1"), Some(col1));
        assert_eq!(registry.get("unknown"), None);
    }

    #[test]
    fn empty_name_is_the_default_collection() {
        let (_, manager) = setup();
        let registry = CollectionRegistry::open(&manager).unwrap();
        assert_eq!(
            registry.get_or_create(&manager, "").unwrap(),
            CollectionId::DEFAULT
        );
        assert_eq!(registry.get(""), Some(CollectionId::DEFAULT));
    }

    #[test]
    fn registry_survives_reopen() {
        let (backend, manager) = setup();
        let registry = CollectionRegistry::open(&manager).unwrap();
        let col1 = registry.get_or_create(&manager, "col1").unwrap();
        drop(registry);

        let manager2 = TransactionManager::new(backend as Arc<dyn KvBackend>).unwrap();
        let reopened = CollectionRegistry::open(&manager2).unwrap();
        assert_eq!(reopened.get("col1"), Some(col1));

        // New collections keep allocating past the restored ids.
        let col2 = reopened.get_or_create(&manager2, "col2").unwrap();
        assert!(col2.as_u32() > col1.as_u32());
    }

    #[test]
    fn drop_removes_keys_and_registration() {
        let (backend, manager) = setup();
        let registry = CollectionRegistry::open(&manager).unwrap();
        let col = registry.get_or_create(&manager, "doomed").unwrap();

        manager
            .autocommit(&[BatchOp::put(col.as_u32(), 7, vec![1])])
            .unwrap();

        registry.drop_collection(&manager, "doomed").unwrap();
        assert_eq!(registry.get("doomed"), None);
        assert_eq!(backend.get_at(col.as_u32(), 7, None).unwrap(), None);

        assert!(matches!(
            registry.drop_collection(&manager, "doomed"),
            Err(StrataError::UnknownCollection { .. })
        ));
    }

    #[test]
    fn default_collection_cannot_be_dropped() {
        let (_, manager) = setup();
        let registry = CollectionRegistry::open(&manager).unwrap();
        assert!(registry.drop_collection(&manager, "").is_err());
    }
}
