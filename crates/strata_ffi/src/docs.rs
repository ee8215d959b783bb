//! Document modality entry points.

use crate::database::{arena_mut, db_ref};
use crate::error::{clear_last_error, set_last_error, status_of, StrataStatus};
use crate::transaction::txn_mut;
use crate::types::{
    collect_collections, collect_keys, strided_get, StrataArena, StrataDb, StrataDocFormat,
    StrataFieldType, StrataOptions, StrataTxn,
};
use std::ffi::CStr;
use strata_core::{FieldRef, GatherField, Places, Strided};

/// Materializes a strided, nullable C-string field array.
unsafe fn collect_fields<'a>(
    ptr: *const *const std::ffi::c_char,
    stride: usize,
    count: usize,
) -> Result<Option<Vec<FieldRef<'a>>>, ()> {
    if ptr.is_null() {
        return Ok(None);
    }
    let mut fields = Vec::with_capacity(count);
    for i in 0..count {
        let field_ptr = strided_get(ptr, stride, i);
        if field_ptr.is_null() {
            fields.push(None);
        } else {
            match CStr::from_ptr(field_ptr).to_str() {
                Ok(text) => fields.push(Some(text)),
                Err(_) => return Err(()),
            }
        }
    }
    Ok(Some(fields))
}

/// Batched document-read request.
#[repr(C)]
pub struct StrataDocsRead {
    /// Database handle.
    pub db: *mut StrataDb,
    /// Optional transaction handle.
    pub transaction: *mut StrataTxn,
    /// Arena receiving the outputs.
    pub arena: *mut StrataArena,
    /// Per-call options.
    pub options: StrataOptions,
    /// Output format.
    pub format: StrataDocFormat,

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
    /// Strided nullable field selectors: plain names or JSON Pointers. A
    /// null array addresses whole documents.
    pub fields: *const *const std::ffi::c_char,
    /// Stride over `fields`, in bytes.
    pub fields_stride: usize,

    /// Out: presence bitmap of the underlying documents.
    pub presence: *mut *const u8,
    /// Out: per-task offsets into the joined buffer.
    pub offsets: *mut *const u64,
    /// Out: per-task lengths.
    pub lengths: *mut *const u64,
    /// Out: the joined output buffer; JSON entries are NUL-terminated.
    pub values: *mut *const u8,
}

/// Executes a batched document read.
///
/// # Safety
///
/// `request` and every pointer inside it must satisfy the field docs.
#[no_mangle]
pub unsafe extern "C" fn strata_docs_read(request: *mut StrataDocsRead) -> StrataStatus {
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
    let Ok(fields) = collect_fields(request.fields, request.fields_stride, request.tasks_count)
    else {
        set_last_error("invalid UTF-8 in field path");
        return StrataStatus::ArgsWrong;
    };

    let places = Places {
        collections: Strided::dense(&collections),
        keys: Strided::dense(&keys),
        count: request.tasks_count,
    };
    let txn = txn_mut(request.transaction);
    let result = db.docs_read(
        txn,
        places,
        fields.as_deref().map(Strided::dense),
        request.format.into(),
        &request.options.into(),
        arena,
    );
    match result {
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

/// Batched document-write request.
#[repr(C)]
pub struct StrataDocsWrite {
    /// Database handle.
    pub db: *mut StrataDb,
    /// Optional transaction handle.
    pub transaction: *mut StrataTxn,
    /// Per-call options.
    pub options: StrataOptions,
    /// Input format; patch formats apply RFC 6902 / RFC 7396.
    pub format: StrataDocFormat,

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
    /// Strided nullable field selectors; null addresses whole documents.
    pub fields: *const *const std::ffi::c_char,
    /// Stride over `fields`, in bytes.
    pub fields_stride: usize,

    /// Optional presence bitmap; a clear bit erases the document.
    pub presence: *const u8,
    /// Strided content offsets into `values`.
    pub offsets: *const u64,
    /// Stride over `offsets`, in bytes.
    pub offsets_stride: usize,
    /// Strided content lengths; `u64::MAX` erases the document.
    pub lengths: *const u64,
    /// Stride over `lengths`, in bytes.
    pub lengths_stride: usize,
    /// The joined content buffer.
    pub values: *const u8,
    /// Length of `values` in bytes.
    pub values_length: usize,
}

/// Executes a batched document write.
///
/// # Safety
///
/// `request` and every pointer inside it must satisfy the field docs.
#[no_mangle]
pub unsafe extern "C" fn strata_docs_write(request: *mut StrataDocsWrite) -> StrataStatus {
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
    let Ok(fields) = collect_fields(request.fields, request.fields_stride, request.tasks_count)
    else {
        set_last_error("invalid UTF-8 in field path");
        return StrataStatus::ArgsWrong;
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

    let mut contents: Vec<Option<&[u8]>> = Vec::with_capacity(request.tasks_count);
    for i in 0..request.tasks_count {
        let present = presence.map_or(true, |bits| bits[i / 8] >> (i % 8) & 1 == 1);
        let length = if request.lengths.is_null() {
            u64::MAX
        } else {
            strided_get(request.lengths, request.lengths_stride, i)
        };
        if !present || length == u64::MAX {
            contents.push(None);
            continue;
        }
        let offset = if request.offsets.is_null() {
            0
        } else {
            strided_get(request.offsets, request.offsets_stride, i)
        } as usize;
        let Some(end) = offset
            .checked_add(length as usize)
            .filter(|&end| end <= values.len())
        else {
            set_last_error(format!("task {i} addresses bytes beyond the buffer"));
            return StrataStatus::ArgsWrong;
        };
        contents.push(Some(&values[offset..end]));
    }

    let places = Places {
        collections: Strided::dense(&collections),
        keys: Strided::dense(&keys),
        count: request.tasks_count,
    };
    let txn = txn_mut(request.transaction);
    let result = db.docs_write(
        txn,
        places,
        fields.as_deref().map(Strided::dense),
        Strided::dense(&contents),
        request.format.into(),
        &request.options.into(),
    );
    match result {
        Ok(()) => StrataStatus::Ok,
        Err(error) => status_of(&error),
    }
}

/// Gist request: the union of leaf field paths across documents.
#[repr(C)]
pub struct StrataDocsGist {
    /// Database handle.
    pub db: *mut StrataDb,
    /// Optional transaction handle.
    pub transaction: *mut StrataTxn,
    /// Arena receiving the outputs.
    pub arena: *mut StrataArena,
    /// Per-call options.
    pub options: StrataOptions,

    /// Number of documents.
    pub docs_count: usize,
    /// Strided collection handles (null broadcasts the default).
    pub collections: *const u32,
    /// Stride over `collections`, in bytes.
    pub collections_stride: usize,
    /// Strided keys.
    pub keys: *const i64,
    /// Stride over `keys`, in bytes.
    pub keys_stride: usize,

    /// Out: number of distinct paths.
    pub paths_count: *mut usize,
    /// Out: path start offsets into the packed tape.
    pub offsets: *mut *const u64,
    /// Out: packed NUL-terminated path strings.
    pub paths: *mut *const u8,
}

/// Executes a gist.
///
/// # Safety
///
/// `request` and every pointer inside it must satisfy the field docs.
#[no_mangle]
pub unsafe extern "C" fn strata_docs_gist(request: *mut StrataDocsGist) -> StrataStatus {
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
    if request.keys.is_null() && request.docs_count > 0 {
        set_last_error("null keys pointer");
        return StrataStatus::ArgsWrong;
    }

    let collections = collect_collections(
        request.collections,
        request.collections_stride,
        request.docs_count,
    );
    let keys = collect_keys(request.keys, request.keys_stride, request.docs_count);
    let places = Places {
        collections: Strided::dense(&collections),
        keys: Strided::dense(&keys),
        count: request.docs_count,
    };

    let txn = txn_mut(request.transaction);
    match db.docs_gist(txn, places, &request.options.into(), arena) {
        Ok(view) => {
            if !request.paths_count.is_null() {
                *request.paths_count = view.len();
            }
            if !request.offsets.is_null() {
                *request.offsets = view.offsets().as_ptr();
            }
            if !request.paths.is_null() {
                *request.paths = view.bytes().as_ptr();
            }
            StrataStatus::Ok
        }
        Err(error) => status_of(&error),
    }
}

/// Gather request: columnar projection of typed fields.
///
/// The output block packs, in order: validity bitmaps for every field,
/// conversion bitmaps, collision bitmaps, then per-field data regions
/// (scalars, or string offsets immediately followed by string lengths,
/// both `u64`). The per-field block offsets are written to the
/// caller-allocated offset tables.
#[repr(C)]
pub struct StrataDocsGather {
    /// Database handle.
    pub db: *mut StrataDb,
    /// Optional transaction handle.
    pub transaction: *mut StrataTxn,
    /// Arena receiving the outputs.
    pub arena: *mut StrataArena,
    /// Per-call options.
    pub options: StrataOptions,

    /// Number of documents (rows).
    pub docs_count: usize,
    /// Strided collection handles (null broadcasts the default).
    pub collections: *const u32,
    /// Stride over `collections`, in bytes.
    pub collections_stride: usize,
    /// Strided keys.
    pub keys: *const i64,
    /// Stride over `keys`, in bytes.
    pub keys_stride: usize,

    /// Number of fields (columns).
    pub fields_count: usize,
    /// Strided non-null field paths.
    pub fields: *const *const std::ffi::c_char,
    /// Stride over `fields`, in bytes.
    pub fields_stride: usize,
    /// Strided column types.
    pub types: *const StrataFieldType,
    /// Stride over `types`, in bytes.
    pub types_stride: usize,

    /// Out: the contiguous column block.
    pub block: *mut *const u8,
    /// Out: bytes per bitmap.
    pub bitmap_slots: *mut usize,
    /// Out, caller-allocated `fields_count` entries: validity bitmap
    /// offsets into the block.
    pub validity_offsets: *mut usize,
    /// Out, caller-allocated: conversion bitmap offsets.
    pub conversion_offsets: *mut usize,
    /// Out, caller-allocated: collision bitmap offsets.
    pub collision_offsets: *mut usize,
    /// Out, caller-allocated: scalar/offsets-column region offsets.
    pub data_offsets: *mut usize,
    /// Out, caller-allocated: string lengths-column offsets (variable
    /// types only; scalar entries repeat the data offset).
    pub lengths_offsets: *mut usize,
    /// Out: the joined string/binary cell buffer.
    pub joined_strings: *mut *const u8,
    /// Out: length of the joined buffer.
    pub joined_strings_length: *mut usize,
}

/// Executes a gather.
///
/// # Safety
///
/// `request` and every pointer inside it must satisfy the field docs; the
/// offset tables must hold `fields_count` entries when non-null.
#[no_mangle]
pub unsafe extern "C" fn strata_docs_gather(request: *mut StrataDocsGather) -> StrataStatus {
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
    if request.keys.is_null() && request.docs_count > 0 {
        set_last_error("null keys pointer");
        return StrataStatus::ArgsWrong;
    }
    if (request.fields.is_null() || request.types.is_null()) && request.fields_count > 0 {
        set_last_error("null field paths are not allowed");
        return StrataStatus::ArgsWrong;
    }

    let collections = collect_collections(
        request.collections,
        request.collections_stride,
        request.docs_count,
    );
    let keys = collect_keys(request.keys, request.keys_stride, request.docs_count);

    let mut specs: Vec<GatherField<'_>> = Vec::with_capacity(request.fields_count);
    for i in 0..request.fields_count {
        let field_ptr = strided_get(request.fields, request.fields_stride, i);
        if field_ptr.is_null() {
            set_last_error("null field paths are not allowed");
            return StrataStatus::ArgsWrong;
        }
        let Ok(field) = CStr::from_ptr(field_ptr).to_str() else {
            set_last_error("invalid UTF-8 in field path");
            return StrataStatus::ArgsWrong;
        };
        let ty = strided_get(request.types, request.types_stride, i);
        specs.push(GatherField {
            field,
            ty: ty.into(),
        });
    }

    let places = Places {
        collections: Strided::dense(&collections),
        keys: Strided::dense(&keys),
        count: request.docs_count,
    };
    let txn = txn_mut(request.transaction);
    match db.docs_gather(txn, places, &specs, &request.options.into(), arena) {
        Ok(view) => {
            let layout = view.layout();
            if !request.block.is_null() {
                *request.block = view.block().as_ptr();
            }
            if !request.bitmap_slots.is_null() {
                *request.bitmap_slots = layout.bitmap_slots();
            }
            for field in 0..request.fields_count {
                if !request.validity_offsets.is_null() {
                    *request.validity_offsets.add(field) = layout.validity_offset(field);
                }
                if !request.conversion_offsets.is_null() {
                    *request.conversion_offsets.add(field) = layout.conversion_offset(field);
                }
                if !request.collision_offsets.is_null() {
                    *request.collision_offsets.add(field) = layout.collision_offset(field);
                }
                if !request.data_offsets.is_null() {
                    *request.data_offsets.add(field) = layout.data_offset(field);
                }
                if !request.lengths_offsets.is_null() {
                    *request.lengths_offsets.add(field) = if layout.field_type(field).is_variable()
                    {
                        layout.lengths_offset(field)
                    } else {
                        layout.data_offset(field)
                    };
                }
            }
            if !request.joined_strings.is_null() {
                *request.joined_strings = view.joined_strings().as_ptr();
            }
            if !request.joined_strings_length.is_null() {
                *request.joined_strings_length = view.joined_strings().len();
            }
            StrataStatus::Ok
        }
        Err(error) => status_of(&error),
    }
}
