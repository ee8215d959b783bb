//! Batched blob entry points: read, write, scan, measure, clear.

use crate::database::{arena_mut, db_ref};
use crate::error::{clear_last_error, set_last_error, status_of, StrataStatus};
use crate::transaction::txn_mut;
use crate::types::{collect_collections, collect_keys, StrataArena, StrataDb, StrataOptions, StrataTxn};
use strata_core::{CollectionId, Places, Strided, WritePayload};

/// Batched point-read request.
#[repr(C)]
pub struct StrataRead {
    /// Database handle.
    pub db: *mut StrataDb,
    /// Optional transaction handle.
    pub transaction: *mut StrataTxn,
    /// Arena receiving the outputs.
    pub arena: *mut StrataArena,
    /// Per-call options.
    pub options: StrataOptions,

    /// Number of tasks.
    pub tasks_count: usize,
    /// Strided collection handles (null broadcasts the default).
    pub collections: *const u32,
    /// Stride over `collections`, in bytes; 0 repeats one element.
    pub collections_stride: usize,
    /// Strided keys.
    pub keys: *const i64,
    /// Stride over `keys`, in bytes; 0 repeats one element.
    pub keys_stride: usize,

    /// Out: presence bitmap, bit `i % 8` of byte `i / 8`.
    pub presence: *mut *const u8,
    /// Out: per-task offsets into the joined buffer.
    pub offsets: *mut *const u64,
    /// Out: per-task lengths; `u64::MAX` marks absent keys.
    pub lengths: *mut *const u64,
    /// Out: the joined value buffer.
    pub values: *mut *const u8,
}

/// Executes a batched read.
///
/// # Safety
///
/// `request` and every pointer inside it must satisfy the field docs; the
/// out-pointers stay valid until the arena is reused or freed.
#[no_mangle]
pub unsafe extern "C" fn strata_read(request: *mut StrataRead) -> StrataStatus {
    clear_last_error();
    let Some(request) = request.as_mut() else {
        set_last_error("null request");
        return StrataStatus::ArgsWrong;
    };
    let Some(db) = db_ref(request.db) else {
        set_last_error("null database handle");
        return StrataStatus::UninitializedState;
    };
    let Some(arena) = arena_mut(request.arena) else {
        set_last_error("null arena handle");
        return StrataStatus::ArgsWrong;
    };
    if request.keys.is_null() && request.tasks_count > 0 {
        set_last_error("null keys pointer");
        return StrataStatus::ArgsWrong;
    }

    let collections = collect_collections(
        request.collections,
        request.collections_stride,
        request.tasks_count,
    );
    let keys = collect_keys(request.keys, request.keys_stride, request.tasks_count);
    let places = Places {
        collections: Strided::dense(&collections),
        keys: Strided::dense(&keys),
        count: request.tasks_count,
    };

    let txn = txn_mut(request.transaction);
    match db.read(txn, places, &request.options.into(), arena) {
        Ok(view) => {
            if !request.presence.is_null() {
                *request.presence = view.presence().as_ptr();
            }
            if !request.offsets.is_null() {
                *request.offsets = view.offsets().as_ptr();
            }
            if !request.lengths.is_null() {
                *request.lengths = view.lengths().as_ptr();
            }
            if !request.values.is_null() {
                *request.values = view.values().as_ptr();
            }
            StrataStatus::Ok
        }
        Err(error) => status_of(&error),
    }
}

/// Batched write request.
#[repr(C)]
pub struct StrataWrite {
    /// Database handle.
    pub db: *mut StrataDb,
    /// Optional transaction handle; staged when present, auto-committed
    /// atomically otherwise.
    pub transaction: *mut StrataTxn,
    /// Per-call options.
    pub options: StrataOptions,

    /// Number of tasks.
    pub tasks_count: usize,
    /// Strided collection handles (null broadcasts the default).
    pub collections: *const u32,
    /// Stride over `collections`, in bytes.
    pub collections_stride: usize,
    /// Strided keys.
    pub keys: *const i64,
    /// Stride over `keys`, in bytes.
    pub keys_stride: usize,

    /// Optional presence bitmap; a clear bit erases the key.
    pub presence: *const u8,
    /// Strided value offsets into `values`.
    pub offsets: *const u64,
    /// Stride over `offsets`, in bytes.
    pub offsets_stride: usize,
    /// Strided value lengths; `u64::MAX` erases the key.
    pub lengths: *const u64,
    /// Stride over `lengths`, in bytes.
    pub lengths_stride: usize,
    /// The joined value buffer.
    pub values: *const u8,
    /// Length of `values` in bytes.
    pub values_length: usize,
}

/// Executes a batched write.
///
/// # Safety
///
/// `request` and every pointer inside it must satisfy the field docs.
#[no_mangle]
pub unsafe extern "C" fn strata_write(request: *mut StrataWrite) -> StrataStatus {
    clear_last_error();
    let Some(request) = request.as_mut() else {
        set_last_error("null request");
        return StrataStatus::ArgsWrong;
    };
    let Some(db) = db_ref(request.db) else {
        set_last_error("null database handle");
        return StrataStatus::UninitializedState;
    };
    if request.keys.is_null() && request.tasks_count > 0 {
        set_last_error("null keys pointer");
        return StrataStatus::ArgsWrong;
    }

    let collections = collect_collections(
        request.collections,
        request.collections_stride,
        request.tasks_count,
    );
    let keys = collect_keys(request.keys, request.keys_stride, request.tasks_count);
    let offsets: Vec<u64> = if request.offsets.is_null() {
        vec![0; request.tasks_count]
    } else {
        (0..request.tasks_count)
            .map(|i| crate::types::strided_get(request.offsets, request.offsets_stride, i))
            .collect()
    };
    let lengths: Vec<u64> = if request.lengths.is_null() {
        vec![u64::MAX; request.tasks_count]
    } else {
        (0..request.tasks_count)
            .map(|i| crate::types::strided_get(request.lengths, request.lengths_stride, i))
            .collect()
    };
    let values = if request.values.is_null() {
        &[][..]
    } else {
        std::slice::from_raw_parts(request.values, request.values_length)
    };
    let presence_bytes = request.tasks_count.div_ceil(8);
    let presence = if request.presence.is_null() {
        None
    } else {
        Some(std::slice::from_raw_parts(request.presence, presence_bytes))
    };

    let places = Places {
        collections: Strided::dense(&collections),
        keys: Strided::dense(&keys),
        count: request.tasks_count,
    };
    let payload = WritePayload {
        presence,
        offsets: Strided::dense(&offsets),
        lengths: Strided::dense(&lengths),
        bytes: values,
    };

    let txn = txn_mut(request.transaction);
    match db.write(txn, places, payload, &request.options.into()) {
        Ok(()) => StrataStatus::Ok,
        Err(error) => status_of(&error),
    }
}

/// Range-scan request.
#[repr(C)]
pub struct StrataScan {
    /// Database handle.
    pub db: *mut StrataDb,
    /// Optional transaction handle.
    pub transaction: *mut StrataTxn,
    /// Arena receiving the outputs.
    pub arena: *mut StrataArena,
    /// Per-call options.
    pub options: StrataOptions,

    /// Collection to scan.
    pub collection: u32,
    /// First key of the range (inclusive).
    pub start_key: i64,
    /// Maximum number of keys to return.
    pub limit: usize,

    /// Out: ascending present keys.
    pub keys: *mut *const i64,
    /// Out: number of keys returned.
    pub keys_count: *mut usize,
}

/// Executes a range scan.
///
/// # Safety
///
/// `request` and every pointer inside it must satisfy the field docs.
#[no_mangle]
pub unsafe extern "C" fn strata_scan(request: *mut StrataScan) -> StrataStatus {
    clear_last_error();
    let Some(request) = request.as_mut() else {
        set_last_error("null request");
        return StrataStatus::ArgsWrong;
    };
    let Some(db) = db_ref(request.db) else {
        set_last_error("null database handle");
        return StrataStatus::UninitializedState;
    };
    let Some(arena) = arena_mut(request.arena) else {
        set_last_error("null arena handle");
        return StrataStatus::ArgsWrong;
    };

    let txn = txn_mut(request.transaction);
    match db.scan(
        txn.as_deref(),
        CollectionId::new(request.collection),
        request.start_key,
        request.limit,
        &request.options.into(),
        arena,
    ) {
        Ok(keys) => {
            if !request.keys.is_null() {
                *request.keys = keys.as_ptr();
            }
            if !request.keys_count.is_null() {
                *request.keys_count = keys.len();
            }
            StrataStatus::Ok
        }
        Err(error) => status_of(&error),
    }
}

/// Lengths-only read request.
#[repr(C)]
pub struct StrataMeasure {
    /// Database handle.
    pub db: *mut StrataDb,
    /// Optional transaction handle.
    pub transaction: *mut StrataTxn,
    /// Arena receiving the outputs.
    pub arena: *mut StrataArena,
    /// Per-call options.
    pub options: StrataOptions,

    /// Number of tasks.
    pub tasks_count: usize,
    /// Strided collection handles (null broadcasts the default).
    pub collections: *const u32,
    /// Stride over `collections`, in bytes.
    pub collections_stride: usize,
    /// Strided keys.
    pub keys: *const i64,
    /// Stride over `keys`, in bytes.
    pub keys_stride: usize,

    /// Out: presence bitmap.
    pub presence: *mut *const u8,
    /// Out: per-task lengths; `u64::MAX` marks absent keys.
    pub lengths: *mut *const u64,
}

/// Executes a lengths-only read. No value bytes are copied.
///
/// # Safety
///
/// `request` and every pointer inside it must satisfy the field docs.
#[no_mangle]
pub unsafe extern "C" fn strata_measure(request: *mut StrataMeasure) -> StrataStatus {
    clear_last_error();
    let Some(request) = request.as_mut() else {
        set_last_error("null request");
        return StrataStatus::ArgsWrong;
    };
    let Some(db) = db_ref(request.db) else {
        set_last_error("null database handle");
        return StrataStatus::UninitializedState;
    };
    let Some(arena) = arena_mut(request.arena) else {
        set_last_error("null arena handle");
        return StrataStatus::ArgsWrong;
    };
    if request.keys.is_null() && request.tasks_count > 0 {
        set_last_error("null keys pointer");
        return StrataStatus::ArgsWrong;
    }

    let collections = collect_collections(
        request.collections,
        request.collections_stride,
        request.tasks_count,
    );
    let keys = collect_keys(request.keys, request.keys_stride, request.tasks_count);
    let places = Places {
        collections: Strided::dense(&collections),
        keys: Strided::dense(&keys),
        count: request.tasks_count,
    };

    let txn = txn_mut(request.transaction);
    match db.measure(txn.as_deref(), places, &request.options.into(), arena) {
        Ok(view) => {
            if !request.presence.is_null() {
                *request.presence = view.presence().as_ptr();
            }
            if !request.lengths.is_null() {
                *request.lengths = view.lengths().as_ptr();
            }
            StrataStatus::Ok
        }
        Err(error) => status_of(&error),
    }
}

/// Removes every key of a collection, atomically. The collection stays
/// registered.
///
/// # Safety
///
/// `db` must be a valid database handle.
#[no_mangle]
pub unsafe extern "C" fn strata_collection_clear(
    db: *mut StrataDb,
    collection: u32,
) -> StrataStatus {
    clear_last_error();
    let Some(db) = db_ref(db) else {
        set_last_error("null database handle");
        return StrataStatus::UninitializedState;
    };
    match db.clear_collection(CollectionId::new(collection)) {
        Ok(()) => StrataStatus::Ok,
        Err(error) => status_of(&error),
    }
}
