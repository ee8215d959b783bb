//! Status codes and the thread-local last-error message.

use std::cell::RefCell;
use std::ffi::CString;
use strata_core::StrataError;

/// Status code returned by every FFI function.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StrataStatus {
    /// Operation succeeded.
    Ok = 0,
    /// Database handle was null or closed.
    UninitializedState = 1,
    /// Malformed input arguments.
    ArgsWrong = 2,
    /// Arena or backend allocation exhausted.
    OutOfMemory = 3,
    /// Unsupported format or opcode.
    MissingFeature = 4,
    /// Commit validation failed; retry the transaction.
    TransactionConflict = 5,
    /// Opaque backend failure.
    BackendError = 6,
}

impl StrataStatus {
    /// Returns true if the status indicates success.
    #[must_use]
    pub fn is_ok(self) -> bool {
        self == StrataStatus::Ok
    }
}

/// Maps an engine error onto the C taxonomy and records its message.
pub(crate) fn status_of(error: &StrataError) -> StrataStatus {
    set_last_error(error.to_string());
    match error {
        StrataError::Uninitialized => StrataStatus::UninitializedState,
        StrataError::InvalidArgument { .. }
        | StrataError::UnknownCollection { .. }
        | StrataError::InvalidOperation { .. }
        | StrataError::Codec(_) => StrataStatus::ArgsWrong,
        StrataError::OutOfMemory => StrataStatus::OutOfMemory,
        StrataError::MissingFeature { .. } => StrataStatus::MissingFeature,
        StrataError::TransactionConflict => StrataStatus::TransactionConflict,
        StrataError::Backend(_) => StrataStatus::BackendError,
    }
}

// Thread-local storage for the last error message.
thread_local! {
    static LAST_ERROR: RefCell<Option<CString>> = const { RefCell::new(None) };
}

/// Sets the last error message.
pub(crate) fn set_last_error(message: impl Into<String>) {
    let message = message.into();
    LAST_ERROR.with(|slot| {
        *slot.borrow_mut() = CString::new(message).ok();
    });
}

/// Clears the last error.
pub(crate) fn clear_last_error() {
    LAST_ERROR.with(|slot| {
        *slot.borrow_mut() = None;
    });
}

/// Gets the last error message as a C string.
///
/// Returns null if no error is set. The pointer is valid until the next
/// FFI call on this thread.
#[no_mangle]
pub extern "C" fn strata_last_error() -> *const std::ffi::c_char {
    LAST_ERROR.with(|slot| match slot.borrow().as_ref() {
        Some(message) => message.as_ptr(),
        None => std::ptr::null(),
    })
}

/// Clears the last error message.
#[no_mangle]
pub extern "C" fn strata_clear_error() {
    clear_last_error();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes_are_stable() {
        assert_eq!(StrataStatus::Ok as i32, 0);
        assert_eq!(StrataStatus::TransactionConflict as i32, 5);
        assert!(StrataStatus::Ok.is_ok());
        assert!(!StrataStatus::BackendError.is_ok());
    }

    #[test]
    fn conflict_maps_to_retryable_status() {
        assert_eq!(
            status_of(&StrataError::TransactionConflict),
            StrataStatus::TransactionConflict
        );
        assert_eq!(
            status_of(&StrataError::invalid_argument("x")),
            StrataStatus::ArgsWrong
        );
    }

    #[test]
    fn last_error_round_trip() {
        clear_last_error();
        assert!(strata_last_error().is_null());

        set_last_error("boom");
        let ptr = strata_last_error();
        assert!(!ptr.is_null());
        let message = unsafe { std::ffi::CStr::from_ptr(ptr) };
        assert_eq!(message.to_str().unwrap(), "boom");

        strata_clear_error();
        assert!(strata_last_error().is_null());
    }
}
