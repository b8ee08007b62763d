//! Status codes returned across the ABI.
//!
//! Every vtable slot and fixed export returns an `i32`: `0` is success,
//! anything nonzero is a failure the caller can at minimum treat as
//! "the call did not happen". The distinguished codes below let hosts
//! special-case the conditions that are not really errors (export lookup
//! misses, cancellation) without decoding an exception chain.

/// The call succeeded.
pub const OK: i32 = 0;

/// Generic failure. An exception chain may carry detail out of band.
pub const FAIL: i32 = -1;

/// The dispatch pointer (or a required out-pointer) was null.
pub const NULL_DISPATCH: i32 = -2;

/// `query_interface` was asked for an id the object does not implement.
pub const NO_INTERFACE: i32 = -3;

/// A named export lookup missed. Not an error — the capability is absent.
pub const NOT_FOUND: i32 = -4;

/// The operation observed cancellation before producing a result.
pub const CANCELLED: i32 = -5;

/// An argument failed validation before the implementation ran.
pub const INVALID_ARG: i32 = -6;

/// A buffer or string argument was not valid for its declared encoding.
pub const BAD_ENCODING: i32 = -7;

/// True if `code` means the call succeeded.
#[inline]
pub fn is_ok(code: i32) -> bool {
    code == OK
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ok_is_zero_and_failures_are_negative() {
        assert!(is_ok(OK));
        for code in [FAIL, NULL_DISPATCH, NO_INTERFACE, NOT_FOUND, CANCELLED, INVALID_ARG] {
            assert!(!is_ok(code));
            assert!(code < 0);
        }
    }
}
