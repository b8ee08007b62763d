//! Owned async-result handles.
//!
//! [`OwnedAsyncResult`] is the host's side of the async protocol: a
//! move-only handle over the plugin-allocated `AsyncResult`. Waiting
//! consumes the handle, so a completed result can be inspected and freed
//! exactly once; the compiler rules out double-wait the same way it rules
//! out use-after-move.

use std::marker::PhantomData;
use std::time::Duration;

use keel_abi::async_result::{AsyncPayload, AsyncResult, AsyncState};
use keel_abi::token::CancelToken;

use crate::error::HostError;

pub struct OwnedAsyncResult<P: AsyncPayload> {
    raw: *mut AsyncResult,
    token: CancelToken,
    _payload: PhantomData<fn() -> P>,
}

// The raw pointer is owned; the plugin side only touches the allocation
// from the worker thread until it signals.
unsafe impl<P: AsyncPayload> Send for OwnedAsyncResult<P> {}

impl<P: AsyncPayload> OwnedAsyncResult<P> {
    /// Take ownership of a handle returned by an async slot call.
    ///
    /// # Safety
    /// `raw` must be a live `AsyncResult` allocated for payload type `P`,
    /// and this wrapper must be its only owner.
    pub unsafe fn from_raw(raw: *mut AsyncResult, token: CancelToken) -> Self {
        debug_assert!(!raw.is_null());
        Self { raw, token, _payload: PhantomData }
    }

    /// The token the operation was started with; pass it to
    /// `cancel_async` to request cancellation.
    pub fn token(&self) -> CancelToken {
        self.token
    }

    pub fn is_complete(&self) -> bool {
        unsafe { (*self.raw).is_signaled() }
    }

    /// Block until the operation completes, then decode the outcome and
    /// free the handle.
    pub fn wait(self) -> Result<P, HostError> {
        unsafe { (*self.raw).wait_signal() };
        self.collect()
    }

    /// Like [`wait`](Self::wait) with a deadline. On timeout the handle
    /// comes back so the caller can keep waiting or cancel.
    pub fn wait_timeout(self, timeout: Duration) -> Result<Result<P, HostError>, Self> {
        if unsafe { (*self.raw).wait_timeout(timeout) } {
            Ok(self.collect())
        } else {
            Err(self)
        }
    }

    /// Decode a signaled handle. Consumes and frees it.
    fn collect(self) -> Result<P, HostError> {
        let raw = self.raw;
        std::mem::forget(self);
        unsafe {
            let outcome = match (*raw).state() {
                AsyncState::Successful => Ok(AsyncResult::read_payload::<P>(raw)),
                AsyncState::Cancelled => match (*raw).take_error() {
                    Some(err) => Err(HostError::Fault(err)),
                    None => Err(HostError::Cancelled),
                },
                AsyncState::Faulted => match (*raw).take_error() {
                    Some(err) => Err(HostError::Fault(err)),
                    None => Err(HostError::Status(keel_abi::status::FAIL)),
                },
                AsyncState::Pending => unreachable!("collect called before signal"),
            };
            AsyncResult::free(raw);
            outcome
        }
    }
}

impl<P: AsyncPayload> Drop for OwnedAsyncResult<P> {
    fn drop(&mut self) {
        // Ownership hands over at the event signal, not at the state CAS:
        // the worker still signals after publishing the terminal state, so
        // freeing on `state()` alone could tear the handle down under it.
        // An unsignaled handle is leaked and logged.
        if unsafe { (*self.raw).is_signaled() } {
            unsafe { AsyncResult::free(self.raw) };
        } else {
            log::warn!("dropping an unsignaled async result; handle leaked");
        }
    }
}
