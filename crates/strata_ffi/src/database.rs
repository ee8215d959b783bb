//! Database, collection, and arena handle management.

use crate::error::{clear_last_error, set_last_error, status_of, StrataStatus};
use crate::types::{StrataArena, StrataDb};
use std::ffi::CStr;
use std::path::Path;
use strata_core::{Arena, Database};

pub(crate) unsafe fn db_ref<'a>(handle: *mut StrataDb) -> Option<&'a Database> {
    (handle as *const Database).as_ref()
}

pub(crate) unsafe fn arena_mut<'a>(handle: *mut StrataArena) -> Option<&'a mut Arena> {
    (handle as *mut Arena).as_mut()
}

/// Opens a database.
///
/// A null or empty `path` opens a memory-only database; anything else is a
/// persistent commit log location.
///
/// # Safety
///
/// - `path` must be null or a valid NUL-terminated UTF-8 string
/// - `out_db` must be a valid pointer
#[no_mangle]
pub unsafe extern "C" fn strata_open(
    path: *const std::ffi::c_char,
    out_db: *mut *mut StrataDb,
) -> StrataStatus {
    clear_last_error();
    if out_db.is_null() {
        set_last_error("null output pointer");
        return StrataStatus::ArgsWrong;
    }

    let path_str = if path.is_null() {
        ""
    } else {
        match CStr::from_ptr(path).to_str() {
            Ok(text) => text,
            Err(_) => {
                set_last_error("invalid UTF-8 in path");
                return StrataStatus::ArgsWrong;
            }
        }
    };

    let opened = if path_str.is_empty() {
        Database::open_in_memory()
    } else {
        Database::open(Path::new(path_str))
    };
    match opened {
        Ok(db) => {
            *out_db = Box::into_raw(Box::new(db)) as *mut StrataDb;
            StrataStatus::Ok
        }
        Err(error) => {
            *out_db = std::ptr::null_mut();
            status_of(&error)
        }
    }
}

/// Closes a database and releases its handle.
///
/// # Safety
///
/// `db` must come from `strata_open` and must not be used afterwards.
#[no_mangle]
pub unsafe extern "C" fn strata_close(db: *mut StrataDb) -> StrataStatus {
    clear_last_error();
    if db.is_null() {
        set_last_error("null database handle");
        return StrataStatus::UninitializedState;
    }
    let db = Box::from_raw(db as *mut Database);
    db.close();
    StrataStatus::Ok
}

/// Gets or creates a collection by name. Idempotent; a null or empty name
/// is the default collection.
///
/// # Safety
///
/// - `db` must be a valid database handle
/// - `name` must be null or a valid NUL-terminated UTF-8 string
/// - `out_collection` must be a valid pointer
#[no_mangle]
pub unsafe extern "C" fn strata_collection(
    db: *mut StrataDb,
    name: *const std::ffi::c_char,
    out_collection: *mut u32,
) -> StrataStatus {
    clear_last_error();
    let Some(db) = db_ref(db) else {
        set_last_error("null database handle");
        return StrataStatus::UninitializedState;
    };
    if out_collection.is_null() {
        set_last_error("null output pointer");
        return StrataStatus::ArgsWrong;
    }

    let name_str = if name.is_null() {
        ""
    } else {
        match CStr::from_ptr(name).to_str() {
            Ok(text) => text,
            Err(_) => {
                set_last_error("invalid UTF-8 in collection name");
                return StrataStatus::ArgsWrong;
            }
        }
    };

    match db.collection(name_str) {
        Ok(collection) => {
            *out_collection = collection.as_u32();
            StrataStatus::Ok
        }
        Err(error) => status_of(&error),
    }
}

/// Drops a named collection, deleting all its keys.
///
/// # Safety
///
/// - `db` must be a valid database handle
/// - `name` must be a valid NUL-terminated UTF-8 string
#[no_mangle]
pub unsafe extern "C" fn strata_collection_drop(
    db: *mut StrataDb,
    name: *const std::ffi::c_char,
) -> StrataStatus {
    clear_last_error();
    let Some(db) = db_ref(db) else {
        set_last_error("null database handle");
        return StrataStatus::UninitializedState;
    };
    if name.is_null() {
        set_last_error("null collection name");
        return StrataStatus::ArgsWrong;
    }
    let name_str = match CStr::from_ptr(name).to_str() {
        Ok(text) => text,
        Err(_) => {
            set_last_error("invalid UTF-8 in collection name");
            return StrataStatus::ArgsWrong;
        }
    };
    match db.drop_collection(name_str) {
        Ok(()) => StrataStatus::Ok,
        Err(error) => status_of(&error),
    }
}

/// Creates a request arena.
///
/// # Safety
///
/// `out_arena` must be a valid pointer.
#[no_mangle]
pub unsafe extern "C" fn strata_arena_new(out_arena: *mut *mut StrataArena) -> StrataStatus {
    clear_last_error();
    if out_arena.is_null() {
        set_last_error("null output pointer");
        return StrataStatus::ArgsWrong;
    }
    *out_arena = Box::into_raw(Box::new(Arena::new())) as *mut StrataArena;
    StrataStatus::Ok
}

/// Releases an arena and every output pointer that referenced it.
///
/// # Safety
///
/// `arena` must come from `strata_arena_new` and must not be used
/// afterwards.
#[no_mangle]
pub unsafe extern "C" fn strata_arena_free(arena: *mut StrataArena) -> StrataStatus {
    clear_last_error();
    if arena.is_null() {
        set_last_error("null arena handle");
        return StrataStatus::ArgsWrong;
    }
    drop(Box::from_raw(arena as *mut Arena));
    StrataStatus::Ok
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_memory_and_close() {
        let mut db: *mut StrataDb = std::ptr::null_mut();
        let status = unsafe { strata_open(std::ptr::null(), &mut db) };
        assert!(status.is_ok());
        assert!(!db.is_null());
        assert!(unsafe { strata_close(db) }.is_ok());
    }

    #[test]
    fn collection_round_trip() {
        let mut db: *mut StrataDb = std::ptr::null_mut();
        unsafe { strata_open(std::ptr::null(), &mut db) };

        let name = std::ffi::CString::new("col1").unwrap();
        let mut first = 0u32;
        let mut second = 0u32;
        unsafe {
            assert!(strata_collection(db, name.as_ptr(), &mut first).is_ok());
            assert!(strata_collection(db, name.as_ptr(), &mut second).is_ok());
        }
        assert_eq!(first, second);

        unsafe {
            assert!(strata_collection_drop(db, name.as_ptr()).is_ok());
            strata_close(db);
        }
    }

    #[test]
    fn arena_lifecycle() {
        let mut arena: *mut StrataArena = std::ptr::null_mut();
        assert!(unsafe { strata_arena_new(&mut arena) }.is_ok());
        assert!(!arena.is_null());
        assert!(unsafe { strata_arena_free(arena) }.is_ok());
    }

    #[test]
    fn null_handles_are_reported() {
        assert_eq!(
            unsafe { strata_close(std::ptr::null_mut()) },
            StrataStatus::UninitializedState
        );
        let mut out = 0u32;
        assert_eq!(
            unsafe { strata_collection(std::ptr::null_mut(), std::ptr::null(), &mut out) },
            StrataStatus::UninitializedState
        );
    }
}
