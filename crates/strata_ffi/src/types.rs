//! Opaque handles, enums, and strided-pointer decoding.

use strata_core::{CollectionId, FieldType, Options, Role};
use strata_codec::DocFormat;

/// Opaque database handle. Created by `strata_open`, released by
/// `strata_close`.
pub enum StrataDb {}

/// Opaque transaction handle. Created by `strata_txn_begin`, released by
/// `strata_txn_free`.
pub enum StrataTxn {}

/// Opaque arena handle. Created by `strata_arena_new`, released by
/// `strata_arena_free`. Out-pointers returned by batched calls reference
/// arena memory and stay valid until the arena is reused or freed.
pub enum StrataArena {}

/// Per-call option flags, mirroring the engine's `Options`.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct StrataOptions {
    /// Record read keys for commit validation.
    pub track_reads: bool,
    /// Fold written keys into the read set as well.
    pub watch_writes: bool,
    /// Pin batched reads to one captured sequence.
    pub snapshot: bool,
    /// Keep previously returned arena memory.
    pub dont_discard_memory: bool,
}

impl StrataOptions {
    /// Engine defaults.
    #[must_use]
    pub fn defaults() -> Self {
        let options = Options::default();
        Self {
            track_reads: options.track_reads,
            watch_writes: options.watch_writes,
            snapshot: options.snapshot,
            dont_discard_memory: options.dont_discard_memory,
        }
    }
}

impl From<StrataOptions> for Options {
    fn from(options: StrataOptions) -> Self {
        Options {
            track_reads: options.track_reads,
            watch_writes: options.watch_writes,
            snapshot: options.snapshot,
            dont_discard_memory: options.dont_discard_memory,
        }
    }
}

/// Document wire formats on the C surface.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StrataDocFormat {
    /// JSON text.
    Json = 0,
    /// RFC 6902 operation list (JSON text).
    JsonPatch = 1,
    /// RFC 7396 merge patch (JSON text).
    JsonMergePatch = 2,
    /// MessagePack.
    Msgpack = 3,
    /// BSON.
    Bson = 4,
    /// CBOR (the internal format).
    Cbor = 5,
    /// UBJSON.
    Ubjson = 6,
    /// Raw binary leaf.
    BinaryLeaf = 7,
}

impl From<StrataDocFormat> for DocFormat {
    fn from(format: StrataDocFormat) -> Self {
        match format {
            StrataDocFormat::Json => DocFormat::Json,
            StrataDocFormat::JsonPatch => DocFormat::JsonPatch,
            StrataDocFormat::JsonMergePatch => DocFormat::JsonMergePatch,
            StrataDocFormat::Msgpack => DocFormat::Msgpack,
            StrataDocFormat::Bson => DocFormat::Bson,
            StrataDocFormat::Cbor => DocFormat::Cbor,
            StrataDocFormat::Ubjson => DocFormat::Ubjson,
            StrataDocFormat::BinaryLeaf => DocFormat::BinaryLeaf,
        }
    }
}

/// Gather column types on the C surface.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StrataFieldType {
    /// All-invalid column.
    Null = 0,
    /// One-byte booleans.
    Bool = 1,
    /// 16-byte UUIDs.
    Uuid = 2,
    /// `i8`.
    I8 = 3,
    /// `i16`.
    I16 = 4,
    /// `i32`.
    I32 = 5,
    /// `i64`.
    I64 = 6,
    /// `u8`.
    U8 = 7,
    /// `u16`.
    U16 = 8,
    /// `u32`.
    U32 = 9,
    /// `u64`.
    U64 = 10,
    /// IEEE 754 binary16.
    F16 = 11,
    /// `f32`.
    F32 = 12,
    /// `f64`.
    F64 = 13,
    /// Variable-length binary.
    Bin = 14,
    /// Variable-length strings.
    Str = 15,
}

impl From<StrataFieldType> for FieldType {
    fn from(ty: StrataFieldType) -> Self {
        match ty {
            StrataFieldType::Null => FieldType::Null,
            StrataFieldType::Bool => FieldType::Bool,
            StrataFieldType::Uuid => FieldType::Uuid,
            StrataFieldType::I8 => FieldType::I8,
            StrataFieldType::I16 => FieldType::I16,
            StrataFieldType::I32 => FieldType::I32,
            StrataFieldType::I64 => FieldType::I64,
            StrataFieldType::U8 => FieldType::U8,
            StrataFieldType::U16 => FieldType::U16,
            StrataFieldType::U32 => FieldType::U32,
            StrataFieldType::U64 => FieldType::U64,
            StrataFieldType::F16 => FieldType::F16,
            StrataFieldType::F32 => FieldType::F32,
            StrataFieldType::F64 => FieldType::F64,
            StrataFieldType::Bin => FieldType::Bin,
            StrataFieldType::Str => FieldType::Str,
        }
    }
}

/// Adjacency roles on the C surface. `Any` is the unfiltered query value.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StrataRole {
    /// Outgoing edges.
    Outgoing = 0,
    /// Incoming edges.
    Incoming = 1,
    /// Undirected edges.
    Undirected = 2,
    /// No filter.
    Any = 3,
}

impl StrataRole {
    pub(crate) fn filter(self) -> Option<Role> {
        match self {
            StrataRole::Outgoing => Some(Role::Outgoing),
            StrataRole::Incoming => Some(Role::Incoming),
            StrataRole::Undirected => Some(Role::Undirected),
            StrataRole::Any => None,
        }
    }
}

/// Reads element `i` of a strided C array; stride 0 broadcasts the first
/// element.
///
/// # Safety
///
/// `ptr` must point to valid memory for every reachable element: one
/// element when `stride` is 0, otherwise `i * stride` bytes past `ptr`
/// must hold a `T`.
pub(crate) unsafe fn strided_get<T: Copy>(ptr: *const T, stride: usize, i: usize) -> T {
    if stride == 0 {
        *ptr
    } else {
        *ptr.cast::<u8>().add(stride * i).cast::<T>()
    }
}

/// Materializes a strided C array of collection handles.
///
/// # Safety
///
/// See [`strided_get`]. A null pointer broadcasts the default collection.
pub(crate) unsafe fn collect_collections(
    ptr: *const u32,
    stride: usize,
    count: usize,
) -> Vec<CollectionId> {
    if ptr.is_null() {
        return vec![CollectionId::DEFAULT; count];
    }
    (0..count)
        .map(|i| CollectionId::new(strided_get(ptr, stride, i)))
        .collect()
}

/// Materializes a strided C array of keys.
///
/// # Safety
///
/// See [`strided_get`]; `ptr` must not be null when `count > 0`.
pub(crate) unsafe fn collect_keys(ptr: *const i64, stride: usize, count: usize) -> Vec<i64> {
    (0..count).map(|i| strided_get(ptr, stride, i)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strided_dense_and_broadcast() {
        let dense = [1i64, 2, 3];
        unsafe {
            assert_eq!(strided_get(dense.as_ptr(), 8, 0), 1);
            assert_eq!(strided_get(dense.as_ptr(), 8, 2), 3);
            // Stride 0 repeats the first element.
            assert_eq!(strided_get(dense.as_ptr(), 0, 2), 1);
        }
    }

    #[test]
    fn strided_wide_stride_skips() {
        // Pairs laid out as (key, ignored); stride of two elements.
        let pairs = [10i64, 0, 20, 0, 30, 0];
        unsafe {
            assert_eq!(strided_get(pairs.as_ptr(), 16, 0), 10);
            assert_eq!(strided_get(pairs.as_ptr(), 16, 1), 20);
            assert_eq!(strided_get(pairs.as_ptr(), 16, 2), 30);
        }
    }

    #[test]
    fn null_collections_broadcast_default() {
        let collections = unsafe { collect_collections(std::ptr::null(), 0, 3) };
        assert_eq!(collections, vec![CollectionId::DEFAULT; 3]);
    }

    #[test]
    fn role_filters() {
        assert_eq!(StrataRole::Any.filter(), None);
        assert_eq!(StrataRole::Outgoing.filter(), Some(Role::Outgoing));
    }
}
