//! Core type definitions for the engine.

use std::fmt;

/// A document key: 64-bit signed, scanned in ascending numeric order.
pub type Key = i64;

/// Length sentinel marking an absent key in batched read outputs.
///
/// Presence and size share one return shape: a present empty value reports
/// length 0, an absent key reports `LEN_MISSING`.
pub const LEN_MISSING: u64 = u64::MAX;

/// Edge-id sentinel for anonymous (unweighted) graph edges.
pub const EDGE_ID_ANON: i64 = i64::MIN;

/// Unique identifier for a transaction.
///
/// Transaction IDs are monotonically increasing and never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TransactionId(pub u64);

impl TransactionId {
    /// Creates a new transaction ID.
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the raw ID value.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "txn:{}", self.0)
    }
}

/// Sequence number ordering commits.
///
/// Commit sequences provide the total order that makes the concurrent
/// history serializable; a snapshot at sequence `s` observes exactly the
/// commits with sequence `<= s`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SequenceNumber(pub u64);

impl SequenceNumber {
    /// Creates a new sequence number.
    #[must_use]
    pub const fn new(seq: u64) -> Self {
        Self(seq)
    }

    /// Returns the raw sequence value.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    /// Returns the next sequence number.
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl fmt::Display for SequenceNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "seq:{}", self.0)
    }
}

/// Identifier for a collection (named key space).
///
/// Collection IDs are stable handles assigned when collections are created.
/// The default collection always exists as [`CollectionId::DEFAULT`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CollectionId(pub u32);

impl CollectionId {
    /// The default (unnamed) collection.
    pub const DEFAULT: CollectionId = CollectionId(0);

    /// The reserved system key space holding collection names.
    pub(crate) const SYSTEM: CollectionId = CollectionId(u32::MAX);

    /// Creates a new collection ID.
    #[must_use]
    pub const fn new(id: u32) -> Self {
        Self(id)
    }

    /// Returns the raw ID value.
    #[must_use]
    pub const fn as_u32(self) -> u32 {
        self.0
    }
}

impl fmt::Display for CollectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "col:{}", self.0)
    }
}

/// Per-call options for the batched operations.
#[derive(Debug, Clone, Copy)]
pub struct Options {
    /// Record keys touched by reads in the transaction's read set, so
    /// commit-time validation enforces serializability. On by default.
    pub track_reads: bool,
    /// Also fold written keys into the read set. Write-set validation
    /// happens regardless; the flag is accepted for callers that want the
    /// symmetric bookkeeping.
    pub watch_writes: bool,
    /// Pin the batch to one captured sequence. Batched reads outside a
    /// transaction always do this; inside one, the snapshot is implied.
    pub snapshot: bool,
    /// Keep previously returned arena memory instead of resetting the
    /// arena at the start of the call.
    pub dont_discard_memory: bool,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            track_reads: true,
            watch_writes: false,
            snapshot: true,
            dont_discard_memory: false,
        }
    }
}
