//! Transaction handle management.

use crate::database::db_ref;
use crate::error::{clear_last_error, set_last_error, status_of, StrataStatus};
use crate::types::{StrataDb, StrataTxn};
use strata_core::Transaction;

pub(crate) unsafe fn txn_mut<'a>(handle: *mut StrataTxn) -> Option<&'a mut Transaction> {
    (handle as *mut Transaction).as_mut()
}

/// Begins a transaction with a snapshot of the committed state.
///
/// # Safety
///
/// - `db` must be a valid database handle
/// - `out_txn` must be a valid pointer; release the handle with
///   `strata_txn_free` after commit or abort
#[no_mangle]
pub unsafe extern "C" fn strata_txn_begin(
    db: *mut StrataDb,
    out_txn: *mut *mut StrataTxn,
) -> StrataStatus {
    clear_last_error();
    let Some(db) = db_ref(db) else {
        set_last_error("null database handle");
        return StrataStatus::UninitializedState;
    };
    if out_txn.is_null() {
        set_last_error("null output pointer");
        return StrataStatus::ArgsWrong;
    }
    match db.begin() {
        Ok(txn) => {
            *out_txn = Box::into_raw(Box::new(txn)) as *mut StrataTxn;
            StrataStatus::Ok
        }
        Err(error) => status_of(&error),
    }
}

/// Commits a transaction, writing its serialization point to `out_seq`
/// (which may be null).
///
/// On `TransactionConflict` the staging is already released; free the
/// handle and retry with a fresh transaction.
///
/// # Safety
///
/// - `db` and `txn` must be valid handles
/// - `out_seq` must be null or a valid pointer
#[no_mangle]
pub unsafe extern "C" fn strata_txn_commit(
    db: *mut StrataDb,
    txn: *mut StrataTxn,
    out_seq: *mut u64,
) -> StrataStatus {
    clear_last_error();
    let Some(db) = db_ref(db) else {
        set_last_error("null database handle");
        return StrataStatus::UninitializedState;
    };
    let Some(txn) = txn_mut(txn) else {
        set_last_error("null transaction handle");
        return StrataStatus::ArgsWrong;
    };
    match db.commit(txn) {
        Ok(seq) => {
            if !out_seq.is_null() {
                *out_seq = seq.as_u64();
            }
            StrataStatus::Ok
        }
        Err(error) => status_of(&error),
    }
}

/// Aborts a transaction, releasing all staged changes.
///
/// # Safety
///
/// `db` and `txn` must be valid handles.
#[no_mangle]
pub unsafe extern "C" fn strata_txn_abort(db: *mut StrataDb, txn: *mut StrataTxn) -> StrataStatus {
    clear_last_error();
    let Some(db) = db_ref(db) else {
        set_last_error("null database handle");
        return StrataStatus::UninitializedState;
    };
    let Some(txn) = txn_mut(txn) else {
        set_last_error("null transaction handle");
        return StrataStatus::ArgsWrong;
    };
    match db.abort(txn) {
        Ok(()) => StrataStatus::Ok,
        Err(error) => status_of(&error),
    }
}

/// Releases a transaction handle. An active transaction is dropped with
/// its staging (the silent-abort path).
///
/// # Safety
///
/// `txn` must come from `strata_txn_begin` and must not be used afterwards.
#[no_mangle]
pub unsafe extern "C" fn strata_txn_free(txn: *mut StrataTxn) -> StrataStatus {
    clear_last_error();
    if txn.is_null() {
        set_last_error("null transaction handle");
        return StrataStatus::ArgsWrong;
    }
    drop(Box::from_raw(txn as *mut Transaction));
    StrataStatus::Ok
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::strata_open;

    #[test]
    fn begin_commit_free() {
        let mut db: *mut StrataDb = std::ptr::null_mut();
        unsafe { strata_open(std::ptr::null(), &mut db) };

        let mut txn: *mut StrataTxn = std::ptr::null_mut();
        let mut seq = u64::MAX;
        unsafe {
            assert!(strata_txn_begin(db, &mut txn).is_ok());
            assert!(strata_txn_commit(db, txn, &mut seq).is_ok());
            assert!(strata_txn_free(txn).is_ok());
            crate::database::strata_close(db);
        }
        // A read-only commit lands at its snapshot.
        assert_eq!(seq, 0);
    }

    #[test]
    fn begin_abort_free() {
        let mut db: *mut StrataDb = std::ptr::null_mut();
        unsafe { strata_open(std::ptr::null(), &mut db) };

        let mut txn: *mut StrataTxn = std::ptr::null_mut();
        unsafe {
            assert!(strata_txn_begin(db, &mut txn).is_ok());
            assert!(strata_txn_abort(db, txn).is_ok());
            // Double-finalization is an argument error, not a crash.
            assert_eq!(strata_txn_commit(db, txn, std::ptr::null_mut()), StrataStatus::ArgsWrong);
            assert!(strata_txn_free(txn).is_ok());
            crate::database::strata_close(db);
        }
    }
}
