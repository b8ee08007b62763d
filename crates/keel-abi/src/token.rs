//! Cancellation tokens.
//!
//! A token is an opaque 128-bit value acting as a *capability*: whoever
//! holds the bytes can cancel the one operation they were registered for.
//! No cancellation object ever crosses the boundary — only these 16 bytes,
//! always passed by reference.

/// Opaque 128-bit cancellation token.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CancelToken(pub [u8; 16]);

impl CancelToken {
    /// The all-zero token, reserved as "no token" in optional positions.
    pub const NIL: CancelToken = CancelToken([0; 16]);

    /// Generate a fresh random token via `getrandom(2)`.
    pub fn fresh() -> Self {
        let mut bytes = [0u8; 16];
        let mut filled = 0usize;
        while filled < bytes.len() {
            let n = unsafe {
                libc::getrandom(
                    bytes[filled..].as_mut_ptr() as *mut libc::c_void,
                    bytes.len() - filled,
                    0,
                )
            };
            if n <= 0 {
                // EINTR or transient failure; retry. getrandom cannot fail
                // persistently on any kernel this targets.
                continue;
            }
            filled += n as usize;
        }
        let token = Self(bytes);
        if token == Self::NIL {
            return Self::fresh();
        }
        token
    }

    pub fn is_nil(&self) -> bool {
        *self == Self::NIL
    }

    /// Read a token from an ABI pointer. Null or nil both yield `None`.
    ///
    /// # Safety
    ///
    /// `ptr`, if non-null, must point to 16 readable bytes.
    pub unsafe fn read(ptr: *const CancelToken) -> Option<CancelToken> {
        if ptr.is_null() {
            return None;
        }
        let token = *ptr;
        if token.is_nil() {
            None
        } else {
            Some(token)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_tokens_are_distinct_and_non_nil() {
        let a = CancelToken::fresh();
        let b = CancelToken::fresh();
        assert!(!a.is_nil());
        assert!(!b.is_nil());
        assert_ne!(a, b);
    }

    #[test]
    fn read_handles_null_and_nil() {
        assert_eq!(unsafe { CancelToken::read(std::ptr::null()) }, None);
        let nil = CancelToken::NIL;
        assert_eq!(unsafe { CancelToken::read(&nil) }, None);
        let t = CancelToken::fresh();
        assert_eq!(unsafe { CancelToken::read(&t) }, Some(t));
    }
}
