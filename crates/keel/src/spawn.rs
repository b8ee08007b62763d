//! Async operation spawning.
//!
//! Every async vtable slot funnels through [`spawn`]: register the caller's
//! token (idempotent), allocate the result handle, run the work on a plugin
//! worker thread, publish the outcome, signal, unregister. The handle is
//! returned to the caller synchronously, before the work has done anything.
//!
//! The worker owns a [`Keepalive`] on the target object — a plain refcount
//! bump — so a host that releases its last interface reference while a call
//! is in flight cannot pull the object out from under the worker.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use keel_abi::async_result::{AsyncPayload, AsyncResult};
use keel_abi::error::AbiError;
use keel_abi::iface::RawIface;
use keel_abi::token::CancelToken;

use crate::object::{self, ComBox};
use crate::traits::ComClass;
use crate::vault::{self, CancelSource};

/// Owned reference to an exposed object, safe to move into a worker thread.
pub struct Keepalive<T: ComClass> {
    object: *mut ComBox<T>,
}

unsafe impl<T: ComClass> Send for Keepalive<T> {}

impl<T: ComClass> Keepalive<T> {
    /// Take an extra reference on the object behind `this`.
    ///
    /// # Safety
    ///
    /// `this` must be a live dispatch pointer produced by
    /// `expose::<T>`.
    pub unsafe fn acquire(this: *mut RawIface) -> Option<Self> {
        let boxed = object::resolve::<T>(this)?;
        // add_ref through the typed path; the raw pointer stays valid as
        // long as this keepalive lives.
        let object = (*this).object as *mut ComBox<T>;
        boxed_add_ref(boxed);
        Some(Self { object })
    }

    pub fn get(&self) -> &T {
        unsafe { (*self.object).value() }
    }
}

fn boxed_add_ref<T: ComClass>(boxed: &ComBox<T>) {
    // ref_count is private to object.rs; go through the public accessor
    // pattern used by the slots.
    boxed.bump_ref();
}

impl<T: ComClass> Drop for Keepalive<T> {
    fn drop(&mut self) {
        unsafe { object::release_object(self.object) };
    }
}

/// Start `work` on a worker thread and return its pending result handle.
///
/// `token`, when present, is registered with the vault before the thread
/// starts, and unregistered after the terminal state is published — so a
/// `cancel` arriving after completion is the documented benign miss.
pub fn spawn<P, F>(token: Option<CancelToken>, work: F) -> *mut AsyncResult
where
    P: AsyncPayload,
    F: FnOnce(&CancelSource) -> Result<P, AbiError> + Send + 'static,
{
    let source = match token {
        Some(token) => vault::register(token),
        None => Arc::new(CancelSource::new()),
    };
    let handle = AsyncResult::alloc_for::<P>();
    let addr = handle as usize;

    std::thread::spawn(move || {
        let handle = addr as *mut AsyncResult;
        run_to_completion(handle, &source, work);
        if let Some(token) = token {
            vault::unregister(token);
        }
    });

    handle
}

fn run_to_completion<P, F>(handle: *mut AsyncResult, source: &CancelSource, work: F)
where
    P: AsyncPayload,
    F: FnOnce(&CancelSource) -> Result<P, AbiError>,
{
    // Cancellation that beat the worker to its first checkpoint.
    if source.is_cancelled() {
        unsafe { AsyncResult::complete_error(handle, &AbiError::cancelled()) };
        return;
    }
    match catch_unwind(AssertUnwindSafe(|| work(source))) {
        Ok(Ok(payload)) => unsafe { AsyncResult::complete_success(handle, payload) },
        Ok(Err(err)) => {
            let err = attach_backtrace(err);
            unsafe { AsyncResult::complete_error(handle, &err) };
        }
        Err(panic) => {
            // A panic must not unwind across the boundary; it becomes a
            // generic fault like any other error.
            let message = panic_message(&panic);
            let err = attach_backtrace(AbiError::generic(format!("worker panicked: {message}")));
            unsafe { AsyncResult::complete_error(handle, &err) };
        }
    }
}

fn attach_backtrace(err: AbiError) -> AbiError {
    if err.backtrace.is_some() {
        return err;
    }
    let bt = std::backtrace::Backtrace::force_capture().to_string();
    err.with_backtrace(bt)
}

fn panic_message(panic: &Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "<non-string panic payload>".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use keel_abi::async_result::AsyncState;
    use keel_abi::error::AbiErrorKind;
    use std::time::Duration;

    fn wait(handle: *mut AsyncResult) -> AsyncState {
        unsafe {
            assert!((*handle).wait_timeout(Duration::from_secs(5)));
            (*handle).state()
        }
    }

    #[test]
    fn success_path_delivers_payload() {
        let handle = spawn(None, |_| Ok(41u64 + 1));
        assert_eq!(wait(handle), AsyncState::Successful);
        unsafe {
            assert_eq!(AsyncResult::read_payload::<u64>(handle), 42);
            AsyncResult::free(handle);
        }
    }

    #[test]
    fn cancel_before_first_checkpoint_ends_cancelled_not_faulty() {
        let token = CancelToken::fresh();
        // Cancel wins the race: the source is cancelled before spawn even
        // starts the worker, because registration is idempotent.
        vault::register(token).cancel();
        let handle = spawn(token.into(), |cancel: &CancelSource| {
            cancel.checkpoint()?;
            Ok(0u8)
        });
        assert_eq!(wait(handle), AsyncState::Cancelled);
        unsafe {
            assert!((*handle).take_error().is_none());
            AsyncResult::free(handle);
        }
        // The worker unregistered the token on its way out.
        assert!(!vault::cancel(token, true));
    }

    #[test]
    fn error_path_carries_chain_and_backtrace() {
        let handle = spawn(None, |_| -> Result<u8, AbiError> {
            Err(AbiError::network(404, -3, "no manifest")
                .with_cause(AbiError::io(2, "missing")))
        });
        assert_eq!(wait(handle), AsyncState::Faulted);
        unsafe {
            let err = (*handle).take_error().expect("chain");
            assert_eq!(err.kind, AbiErrorKind::Network { status: 404, code: -3 });
            assert!(err.backtrace.is_some(), "backtrace attached at the boundary");
            assert_eq!(err.causes().count(), 1);
            AsyncResult::free(handle);
        }
    }

    #[test]
    fn panic_becomes_a_generic_fault() {
        let handle = spawn(None, |_| -> Result<u8, AbiError> {
            panic!("checksum mismatch");
        });
        assert_eq!(wait(handle), AsyncState::Faulted);
        unsafe {
            let err = (*handle).take_error().expect("fault");
            assert_eq!(err.kind, AbiErrorKind::Generic);
            assert!(err.message.contains("checksum mismatch"));
            AsyncResult::free(handle);
        }
    }

    #[test]
    fn mid_flight_cancellation_stops_at_next_checkpoint() {
        let token = CancelToken::fresh();
        let handle = spawn(token.into(), |cancel: &CancelSource| {
            // Interruptible sleep loop; a real worker would be downloading.
            for _ in 0..500 {
                if cancel.wait_cancelled(Duration::from_millis(10)) {
                    cancel.checkpoint()?;
                }
            }
            Ok(0u8)
        });
        std::thread::sleep(Duration::from_millis(30));
        assert!(vault::cancel(token, true));
        assert_eq!(wait(handle), AsyncState::Cancelled);
        unsafe { AsyncResult::free(handle) };
    }
}
