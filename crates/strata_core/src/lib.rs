//! # Strata Core
//!
//! A transactional, multi-modal key-value engine.
//!
//! One ordered key-value store underlies every modality: named collections
//! of `i64` keys mapping to opaque blobs, with snapshot reads, ascending
//! scans, and serializable optimistic transactions. On top of it sit the
//! document modality (CBOR-stored trees with field-level reads, patches,
//! gists, and columnar gathers) and the graph modality (mirrored adjacency
//! lists with transactional edge and vertex maintenance).
//!
//! All batched entry points speak structure-of-arrays: strided input
//! arrays in, arena-resident joined buffers plus parallel offset/length
//! arrays out. The caller owns the [`Arena`]; the engine only borrows it.

#![warn(missing_docs)]

mod arena;
mod blobs;
mod collections;
mod database;
mod docs;
mod error;
mod gather;
mod graph;
mod soa;
mod txn;
mod types;

pub use arena::{Arena, GrowingTape};
pub use blobs::{BlobsView, MeasureView, WritePayload};
pub use database::Database;
pub use docs::{FieldRef, PathsView};
pub use error::{StrataError, StrataResult};
pub use gather::{FieldType, GatherField, GatherLayout, GatherView};
pub use graph::{Edge, Role};
pub use soa::{bit_get, bit_set, bitmap_bytes, Places, Strided};
pub use txn::{StagedWrite, Transaction, TransactionManager, TransactionState};
pub use types::{
    CollectionId, Key, Options, SequenceNumber, TransactionId, EDGE_ID_ANON, LEN_MISSING,
};

pub use strata_codec::{DocFormat, Value};
