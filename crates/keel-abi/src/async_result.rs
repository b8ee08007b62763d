//! The async-result handle.
//!
//! Every asynchronous operation on the ABI returns a pointer to one of
//! these instead of a language-native future. The header is fixed layout;
//! the operation's success payload occupies the bytes immediately after it,
//! in the same allocation, sized at alloc time from the declared payload
//! type.
//!
//! Completion protocol: the worker writes the payload (or encodes the
//! exception chain), publishes exactly one terminal state with `Release`
//! ordering, then signals the event — in that order. A waiter that saw the
//! event signal and loads the state with `Acquire` therefore observes all
//! payload and exception writes.
//!
//! Ownership transfers to the waiter: whoever waits frees the handle, once.
//! A handle nobody waits on leaks its event fd and exception chain — that
//! is the documented cost of abandoning a call, not something this layer
//! polices.

use std::mem::ManuallyDrop;
use std::sync::atomic::{AtomicU8, Ordering};
use std::time::Duration;

use crate::error::{AbiError, AbiErrorKind};
use crate::event::Event;
use crate::exception::{self, ExceptionRecord};

/// Terminal state of an async operation. Exactly one of the non-pending
/// states holds once the event signals, and it never changes after.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AsyncState {
    Pending = 0,
    Successful = 1,
    Cancelled = 2,
    Faulted = 3,
}

impl AsyncState {
    fn from_raw(raw: u8) -> Self {
        match raw {
            1 => Self::Successful,
            2 => Self::Cancelled,
            3 => Self::Faulted,
            _ => Self::Pending,
        }
    }
}

/// Types that may occupy the trailing payload region.
///
/// # Safety
///
/// Implementors must be `#[repr(C)]` (or a primitive), have alignment at
/// most 8, and stay valid when moved between threads by raw byte copy.
pub unsafe trait AsyncPayload: Send + 'static {}

unsafe impl AsyncPayload for () {}
unsafe impl AsyncPayload for u8 {}
unsafe impl AsyncPayload for u32 {}
unsafe impl AsyncPayload for u64 {}
unsafe impl AsyncPayload for i64 {}
unsafe impl AsyncPayload for crate::version::StandardVersion {}
unsafe impl AsyncPayload for crate::memory::MemorySpan {}

/// Header of one in-flight or completed asynchronous call.
#[repr(C)]
#[derive(Debug)]
pub struct AsyncResult {
    event_fd: libc::c_int,
    state: AtomicU8,
    freed: AtomicU8,
    exception_count: u32,
    exceptions: *mut ExceptionRecord,
    payload_len: usize,
    // payload bytes follow the header in the same allocation
}

impl AsyncResult {
    /// Allocate a pending handle sized for payload type `P`.
    pub fn alloc_for<P: AsyncPayload>() -> *mut AsyncResult {
        const {
            assert!(std::mem::align_of::<AsyncResult>() == 8);
        }
        debug_assert!(std::mem::align_of::<P>() <= 8);
        let payload_len = std::mem::size_of::<P>();
        let total = std::mem::size_of::<AsyncResult>() + payload_len;
        let ptr = unsafe { libc::malloc(total) } as *mut AsyncResult;
        if ptr.is_null() {
            std::process::abort();
        }
        let event = Event::new();
        unsafe {
            ptr.write(AsyncResult {
                event_fd: event.into_raw_fd(),
                state: AtomicU8::new(AsyncState::Pending as u8),
                freed: AtomicU8::new(0),
                exception_count: 0,
                exceptions: std::ptr::null_mut(),
                payload_len,
            });
        }
        ptr
    }

    /// Current state. `Acquire` pairs with the completion `Release`; only
    /// meaningful as terminal once [`AsyncResult::is_signaled`] is true.
    pub fn state(&self) -> AsyncState {
        AsyncState::from_raw(self.state.load(Ordering::Acquire))
    }

    pub fn is_signaled(&self) -> bool {
        self.borrow_event().is_signaled()
    }

    /// Block up to `timeout` for completion.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        self.borrow_event().wait_timeout(timeout)
    }

    /// Block until completion.
    pub fn wait_signal(&self) {
        self.borrow_event().wait();
    }

    /// The raw wait-object handle (for callers bridging into their own
    /// event loop).
    pub fn raw_event_fd(&self) -> libc::c_int {
        self.event_fd
    }

    fn borrow_event(&self) -> ManuallyDrop<Event> {
        // Borrow, don't own: the fd stays open until free().
        ManuallyDrop::new(unsafe { Event::from_raw_fd(self.event_fd) })
    }

    /// Publish a successful completion with its payload. First terminal
    /// state wins; a second completion attempt is a logged no-op.
    ///
    /// # Safety
    ///
    /// `this` must be a live handle allocated with payload type `P`.
    pub unsafe fn complete_success<P: AsyncPayload>(this: *mut AsyncResult, payload: P) {
        debug_assert_eq!(std::mem::size_of::<P>(), (*this).payload_len);
        Self::payload_ptr(this).cast::<P>().write(payload);
        Self::publish(this, AsyncState::Successful);
    }

    /// Publish a fault or cancellation. Cancellation errors become the
    /// CANCELLED terminal state with no exception chain attached; anything
    /// else becomes FAULTED with the full encoded chain.
    ///
    /// # Safety
    ///
    /// `this` must be a live handle.
    pub unsafe fn complete_error(this: *mut AsyncResult, err: &AbiError) {
        if err.kind == AbiErrorKind::Cancelled {
            Self::publish(this, AsyncState::Cancelled);
            return;
        }
        let (count, records) = exception::encode_chain(err);
        (*this).exception_count = count;
        (*this).exceptions = records;
        Self::publish(this, AsyncState::Faulted);
    }

    unsafe fn publish(this: *mut AsyncResult, state: AsyncState) {
        let prev = (*this).state.compare_exchange(
            AsyncState::Pending as u8,
            state as u8,
            Ordering::AcqRel,
            Ordering::Acquire,
        );
        match prev {
            Ok(_) => (*this).borrow_event().signal(),
            Err(existing) => {
                // Double completion: first terminal state wins, by contract.
                log::warn!(
                    "async result completed twice (kept state {existing}, dropped {})",
                    state as u8
                );
            }
        }
    }

    /// Decode the attached exception chain, if any.
    pub fn take_error(&self) -> Option<AbiError> {
        unsafe { exception::decode_chain(self.exception_count, self.exceptions) }
    }

    /// Read the payload out of the trailing region.
    ///
    /// # Safety
    ///
    /// Only valid after the state is `Successful`, observed through the
    /// signal; `P` must be the type the handle was allocated for. Reads
    /// ownership out — call at most once.
    pub unsafe fn read_payload<P: AsyncPayload>(this: *const AsyncResult) -> P {
        debug_assert_eq!(std::mem::size_of::<P>(), (*this).payload_len);
        Self::payload_ptr(this as *mut AsyncResult).cast::<P>().read()
    }

    unsafe fn payload_ptr(this: *mut AsyncResult) -> *mut u8 {
        (this as *mut u8).add(std::mem::size_of::<AsyncResult>())
    }

    /// Free the handle: event fd, exception chain, and the allocation.
    /// Idempotent through the freed flag (a double free is a checked no-op).
    ///
    /// # Safety
    ///
    /// `this` must come from [`AsyncResult::alloc_for`]. No other thread may
    /// still be completing it — ownership must have transferred to the
    /// caller through the event signal.
    pub unsafe fn free(this: *mut AsyncResult) {
        if this.is_null() {
            return;
        }
        if (*this).freed.swap(1, Ordering::AcqRel) != 0 {
            log::warn!("async result freed twice; ignoring");
            return;
        }
        drop(Event::from_raw_fd((*this).event_fd));
        exception::free_chain((*this).exception_count, (*this).exceptions);
        libc::free(this as *mut libc::c_void);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemorySpan;
    use std::time::Duration;

    #[test]
    fn success_payload_round_trip() {
        let handle = AsyncResult::alloc_for::<u64>();
        unsafe {
            assert_eq!((*handle).state(), AsyncState::Pending);
            AsyncResult::complete_success(handle, 0xDEAD_BEEFu64);
            assert!((*handle).wait_timeout(Duration::from_secs(1)));
            assert_eq!((*handle).state(), AsyncState::Successful);
            assert_eq!(AsyncResult::read_payload::<u64>(handle), 0xDEAD_BEEF);
            AsyncResult::free(handle);
        }
    }

    #[test]
    fn terminal_state_is_exclusive_and_first_wins() {
        let handle = AsyncResult::alloc_for::<()>();
        unsafe {
            AsyncResult::complete_error(handle, &AbiError::cancelled());
            // Late success must not overwrite the terminal state.
            AsyncResult::complete_success(handle, ());
            assert_eq!((*handle).state(), AsyncState::Cancelled);
            assert!((*handle).take_error().is_none(), "cancellation carries no chain");
            AsyncResult::free(handle);
        }
    }

    #[test]
    fn flags_are_not_readable_as_set_before_signal() {
        let handle = AsyncResult::alloc_for::<()>();
        let addr = handle as usize;
        let worker = std::thread::spawn(move || {
            let handle = addr as *mut AsyncResult;
            // Deliberately slow completion.
            std::thread::sleep(Duration::from_millis(50));
            unsafe { AsyncResult::complete_success(handle, ()) };
        });
        unsafe {
            // Before the signal, the only observable state is Pending.
            while !(*handle).is_signaled() {
                assert_eq!((*handle).state(), AsyncState::Pending);
                std::thread::yield_now();
            }
            assert_eq!((*handle).state(), AsyncState::Successful);
        }
        worker.join().unwrap();
        unsafe { AsyncResult::free(handle) };
    }

    #[test]
    fn fault_carries_decoded_chain_and_double_free_is_noop() {
        let handle = AsyncResult::alloc_for::<MemorySpan>();
        unsafe {
            let err = AbiError::network(404, -9, "no manifest")
                .with_cause(AbiError::io(2, "not found"));
            AsyncResult::complete_error(handle, &err);
            assert_eq!((*handle).state(), AsyncState::Faulted);
            let decoded = (*handle).take_error().expect("chain");
            assert_eq!(decoded.kind.tag(), "network");
            assert_eq!(decoded.cause.as_deref().unwrap().kind.tag(), "io");
            AsyncResult::free(handle);
        }
        // Freed memory is gone; calling free again on the same pointer is
        // UB in general — the checked path is exercised through the flag
        // before any teardown happens, which the protocol relies on when
        // both sides race to free. Simulate with a fresh handle:
        let handle = AsyncResult::alloc_for::<()>();
        unsafe {
            AsyncResult::complete_success(handle, ());
            (*handle).freed.store(1, Ordering::Release);
            AsyncResult::free(handle); // observes the flag, does nothing
            (*handle).freed.store(0, Ordering::Release);
            AsyncResult::free(handle); // real free
        }
    }
}
