//! # Strata FFI
//!
//! Stable C ABI for the Strata engine.
//!
//! Every batched operation takes one `#[repr(C)]` request struct carrying
//! the database handle, an optional transaction handle, an arena handle,
//! strided SoA input pointers (stride in bytes, 0 broadcasts a single
//! element), and SoA out-pointers.
//!
//! ## Memory ownership
//!
//! - Handles are created and released in pairs: `strata_open` /
//!   `strata_close`, `strata_txn_begin` / `strata_txn_free`,
//!   `strata_arena_new` / `strata_arena_free`
//! - Out-pointers reference arena-owned memory; they stay valid until the
//!   arena is freed or reused by a call without `dont_discard_memory`
//! - Nothing is allocated per value on the way out
//!
//! ## Error handling
//!
//! Functions return [`StrataStatus`]; `strata_last_error()` carries the
//! detailed message for the current thread. `TransactionConflict` is the
//! one status callers handle by retrying. No panic crosses this boundary.

#![warn(missing_docs)]

mod blobs;
mod database;
mod docs;
mod error;
mod graph;
mod transaction;
mod types;

pub use blobs::{
    strata_collection_clear, strata_measure, strata_read, strata_scan, strata_write, StrataMeasure,
    StrataRead, StrataScan, StrataWrite,
};
pub use database::{
    strata_arena_free, strata_arena_new, strata_close, strata_collection, strata_collection_drop,
    strata_open,
};
pub use docs::{
    strata_docs_gather, strata_docs_gist, strata_docs_read, strata_docs_write, StrataDocsGather,
    StrataDocsGist, StrataDocsRead, StrataDocsWrite,
};
pub use error::{strata_clear_error, strata_last_error, StrataStatus};
pub use graph::{
    strata_graph_contains, strata_graph_degree, strata_graph_remove_edges,
    strata_graph_remove_vertices, strata_graph_upsert, StrataGraphEdges,
    StrataGraphRemoveVertices,
};
pub use transaction::{strata_txn_abort, strata_txn_begin, strata_txn_commit, strata_txn_free};
pub use types::{
    StrataArena, StrataDb, StrataDocFormat, StrataFieldType, StrataOptions, StrataRole, StrataTxn,
};
