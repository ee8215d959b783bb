//! # Strata Storage
//!
//! Ordered, versioned key-value backends for Strata.
//!
//! This crate provides the lowest-level storage abstraction for the engine.
//! Backends are **opaque blob stores** ordered by `(collection, key)` - they
//! keep multiple versions per key, tagged with commit sequences, and do not
//! interpret the bytes they store. The engine owns all value formats.
//!
//! ## Design Principles
//!
//! - Backends store version chains; a snapshot sequence selects what a
//!   reader observes
//! - Batches apply atomically under one commit sequence
//! - Scans return keys in ascending numeric order
//! - Must be `Send + Sync` for concurrent access
//!
//! ## Available Backends
//!
//! - [`MemoryBackend`] - version chains in memory, for tests and ephemeral
//!   databases
//! - [`FileBackend`] - a memory image plus an append-only commit log,
//!   replayed on open
//!
//! ## Example
//!
//! ```rust
//! use strata_storage::{BatchOp, KvBackend, MemoryBackend};
//!
//! let backend = MemoryBackend::new();
//! backend
//!     .apply(&[BatchOp::put(1, 42, b"hello".to_vec())], 1)
//!     .unwrap();
//! assert_eq!(backend.get_at(1, 42, None).unwrap(), Some(b"hello".to_vec()));
//! ```

#![warn(missing_docs)]

mod backend;
mod error;
mod file;
mod memory;

pub use backend::{BatchOp, KvBackend};
pub use error::{StorageError, StorageResult};
pub use file::FileBackend;
pub use memory::MemoryBackend;
