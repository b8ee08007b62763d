//! Disposable native memory handles.
//!
//! `DisposableMemory<T>` is the one buffer shape that crosses the ABI: a raw
//! pointer into the process allocator plus an element count, tagged with
//! ownership (`disposable`) and a freed flag that makes disposal idempotent.
//!
//! Ownership is single-owner by convention. A handle with `disposable == 0`
//! is a *borrow* — some other handle (or the other side of the boundary)
//! owns the allocation and `dispose()` is a no-op on it.
//!
//! The handle provides no thread-safety of its own; callers must not mutate
//! one handle from two threads without external synchronization.

use crate::error::AbiError;

/// Owned or borrowed view of `len` elements of `T` in native memory.
///
/// Layout is part of the ABI: `{ptr, len, disposable: u8, freed: u8}`.
/// Element types must be plain data (`Copy`) — drop glue never runs on
/// the pointed-to elements, only on the allocation itself.
#[repr(C)]
#[derive(Debug)]
pub struct DisposableMemory<T: Copy> {
    ptr: *mut T,
    len: usize,
    disposable: u8,
    freed: u8,
}

// A handle is a value with one owner at a time; async payloads move it
// between threads by byte copy (worker to waiter). There is no shared
// access to hand out, hence no `Sync`.
unsafe impl<T: Copy + Send> Send for DisposableMemory<T> {}

/// Byte buffer — the shape every string takes across the boundary
/// (length-tagged UTF-8, never nul-terminated).
pub type MemorySpan = DisposableMemory<u8>;

impl<T: Copy> DisposableMemory<T> {
    /// Allocate `count` elements from the process allocator.
    ///
    /// `count == 0` is rejected with an argument error. Allocator failure
    /// aborts the process — native allocator semantics, not a recoverable
    /// condition.
    pub fn alloc(count: usize, zeroed: bool, disposable: bool) -> Result<Self, AbiError> {
        if count == 0 {
            return Err(AbiError::argument_out_of_range("count"));
        }
        let bytes = count
            .checked_mul(std::mem::size_of::<T>())
            .ok_or_else(|| AbiError::argument_out_of_range("count"))?;
        let ptr = unsafe {
            if zeroed {
                libc::calloc(count, std::mem::size_of::<T>())
            } else {
                libc::malloc(bytes)
            }
        };
        if ptr.is_null() {
            // Out of native memory. Mirrors malloc-failure handling in the
            // host process: nothing sensible can continue.
            std::process::abort();
        }
        Ok(Self {
            ptr: ptr as *mut T,
            len: count,
            disposable: disposable as u8,
            freed: 0,
        })
    }

    /// Wrap memory owned elsewhere. The handle is a borrow: `dispose()`
    /// will not free it.
    ///
    /// # Safety
    ///
    /// `ptr` must point to `len` valid elements of `T` that outlive every
    /// use of the returned handle.
    pub unsafe fn wrap(ptr: *mut T, len: usize) -> Self {
        Self { ptr, len, disposable: 0, freed: 0 }
    }

    /// An empty, already-freed handle. Useful as a null sentinel in
    /// `#[repr(C)]` structs.
    pub const fn empty() -> Self {
        Self {
            ptr: std::ptr::null_mut(),
            len: 0,
            disposable: 0,
            freed: 1,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0 || self.ptr.is_null() || self.freed != 0
    }

    pub fn as_ptr(&self) -> *mut T {
        self.ptr
    }

    pub fn is_disposable(&self) -> bool {
        self.disposable != 0
    }

    /// View of the whole buffer. Empty slice once freed.
    pub fn as_slice(&self) -> &[T] {
        if self.is_empty() {
            return &[];
        }
        unsafe { std::slice::from_raw_parts(self.ptr, self.len) }
    }

    /// Mutable view of the whole buffer. Empty slice once freed.
    pub fn as_slice_mut(&mut self) -> &mut [T] {
        if self.is_empty() {
            return &mut [];
        }
        unsafe { std::slice::from_raw_parts_mut(self.ptr, self.len) }
    }

    /// Bounds-checked sub-view: `offset..offset + len`.
    pub fn slice(&self, offset: usize, len: usize) -> Result<&[T], AbiError> {
        let end = offset
            .checked_add(len)
            .ok_or_else(|| AbiError::argument_out_of_range("len"))?;
        if end > self.len {
            return Err(AbiError::argument_out_of_range("offset"));
        }
        Ok(&self.as_slice()[offset..end])
    }

    /// Free the allocation iff this handle owns it. Idempotent.
    pub fn dispose(&mut self) {
        if self.disposable != 0 {
            self.force_dispose();
        }
    }

    /// Free the allocation regardless of the disposable flag. Idempotent.
    ///
    /// For cleanup of borrow-handles whose true owner is gone (test
    /// harnesses, teardown paths).
    pub fn force_dispose(&mut self) {
        if self.freed != 0 {
            return;
        }
        self.freed = 1;
        if !self.ptr.is_null() {
            unsafe { libc::free(self.ptr as *mut libc::c_void) };
            self.ptr = std::ptr::null_mut();
        }
        self.len = 0;
    }

    /// Move the raw parts out without freeing. The caller becomes the owner.
    pub fn into_raw(mut self) -> (*mut T, usize) {
        let parts = (self.ptr, self.len);
        self.freed = 1;
        self.ptr = std::ptr::null_mut();
        self.len = 0;
        parts
    }
}

impl MemorySpan {
    /// Allocate an owned span holding a copy of `bytes`.
    pub fn from_bytes(bytes: &[u8]) -> Self {
        if bytes.is_empty() {
            return Self::empty();
        }
        // len > 0, so alloc cannot reject it
        let mut span = Self::alloc(bytes.len(), false, true)
            .unwrap_or_else(|_| unreachable!("non-zero count"));
        span.as_slice_mut().copy_from_slice(bytes);
        span
    }

    /// Allocate an owned span holding a copy of `s` as UTF-8 bytes.
    pub fn copy_from_str(s: &str) -> Self {
        Self::from_bytes(s.as_bytes())
    }

    /// Decode the span as UTF-8.
    pub fn to_str(&self) -> Result<&str, AbiError> {
        std::str::from_utf8(self.as_slice())
            .map_err(|_| AbiError::invalid_argument("utf-8 span"))
    }
}

// No Drop impl on purpose: disposal is always explicit (the pointer may be
// owned by the other side of the boundary, and the struct itself is copied
// across by value in several places).

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AbiErrorKind;

    #[test]
    fn alloc_zero_is_rejected() {
        let err = DisposableMemory::<u64>::alloc(0, false, true).unwrap_err();
        assert!(matches!(err.kind, AbiErrorKind::ArgumentOutOfRange { .. }));
    }

    #[test]
    fn spans_move_between_threads_by_value() {
        fn assert_send<T: Send>() {}
        assert_send::<MemorySpan>();

        let span = MemorySpan::copy_from_str("payload");
        let mut span = std::thread::spawn(move || span).join().unwrap();
        assert_eq!(span.to_str().unwrap(), "payload");
        span.dispose();
    }

    #[test]
    fn dispose_is_idempotent() {
        let mut mem = DisposableMemory::<u32>::alloc(8, true, true).unwrap();
        assert_eq!(mem.as_slice(), &[0u32; 8]);
        mem.dispose();
        assert!(mem.is_empty());
        mem.dispose(); // second call must be a no-op
        mem.dispose();
        assert!(mem.as_slice().is_empty());
    }

    #[test]
    fn dispose_skips_borrowed_memory_but_force_dispose_frees_once() {
        let mut backing = DisposableMemory::<u8>::alloc(4, true, true).unwrap();
        let mut borrow = unsafe { DisposableMemory::wrap(backing.as_ptr(), backing.len()) };
        borrow.dispose();
        // Borrow untouched; the real owner still sees its bytes.
        assert_eq!(backing.as_slice().len(), 4);

        // Policy cleanup path: force_dispose frees even a borrow, exactly once.
        let mut orphan = DisposableMemory::<u8>::alloc(4, true, true).unwrap();
        let (ptr, len) = orphan.into_raw();
        let mut wrapper = unsafe { DisposableMemory::wrap(ptr, len) };
        wrapper.force_dispose();
        wrapper.force_dispose();
        assert!(wrapper.is_empty());

        backing.dispose();
    }

    #[test]
    fn slice_is_bounds_checked() {
        let mem = DisposableMemory::<u8>::alloc(16, true, true).unwrap();
        assert!(mem.slice(0, 16).is_ok());
        assert!(mem.slice(8, 8).is_ok());
        assert!(mem.slice(8, 9).is_err());
        assert!(mem.slice(17, 0).is_err());
        assert!(mem.slice(usize::MAX, 2).is_err());
    }

    #[test]
    fn span_string_round_trip() {
        let mut span = MemorySpan::copy_from_str("příliš žluťoučký kůň");
        assert_eq!(span.to_str().unwrap(), "příliš žluťoučký kůň");
        span.dispose();
        assert_eq!(span.to_str().unwrap(), "");
    }
}
