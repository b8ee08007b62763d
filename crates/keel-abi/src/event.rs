//! Manual-reset wait object.
//!
//! The only synchronization primitive the async protocol assumes exists on
//! both sides of the boundary is an OS-level manual-reset event. On Linux
//! that is an `eventfd`: signaling writes a counter value, waiting polls the
//! fd for readability *without consuming it*, so once signaled the event
//! stays signaled for every subsequent waiter.
//!
//! The fd itself is the ABI representation — it travels inside the
//! `AsyncResult` header as a plain `i32`.

use std::time::Duration;

/// Manual-reset event over an eventfd.
///
/// Signal-once semantics are enforced by the owner (`AsyncResult`), not
/// here; `signal()` itself is idempotent.
#[derive(Debug)]
pub struct Event {
    fd: libc::c_int,
}

// The fd is process-global state; poll/write from any thread is fine.
unsafe impl Send for Event {}
unsafe impl Sync for Event {}

impl Event {
    /// Create an unsignaled event. Aborts on fd exhaustion — like
    /// allocation failure, there is no sensible recovery at this layer.
    pub fn new() -> Self {
        let fd = unsafe { libc::eventfd(0, libc::EFD_CLOEXEC) };
        if fd < 0 {
            std::process::abort();
        }
        Self { fd }
    }

    /// Adopt an fd received across the boundary. Does not dup.
    ///
    /// # Safety
    ///
    /// `fd` must be a live eventfd whose ownership transfers to this value.
    pub unsafe fn from_raw_fd(fd: libc::c_int) -> Self {
        Self { fd }
    }

    /// The raw fd, for embedding in `#[repr(C)]` headers.
    pub fn raw_fd(&self) -> libc::c_int {
        self.fd
    }

    /// Signal the event. After this call every wait returns immediately.
    pub fn signal(&self) {
        let one: u64 = 1;
        // The counter saturates near u64::MAX; a second write on an already
        // signaled manual-reset event is harmless.
        unsafe {
            libc::write(
                self.fd,
                &one as *const u64 as *const libc::c_void,
                std::mem::size_of::<u64>(),
            );
        }
    }

    /// True if the event has been signaled (non-blocking check).
    pub fn is_signaled(&self) -> bool {
        self.poll(0)
    }

    /// Block until signaled.
    pub fn wait(&self) {
        while !self.poll(-1) {}
    }

    /// Block up to `timeout`. Returns true if the event signaled.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let millis = timeout.as_millis().min(i32::MAX as u128) as i32;
        self.poll(millis)
    }

    fn poll(&self, timeout_millis: i32) -> bool {
        let mut pfd = libc::pollfd {
            fd: self.fd,
            events: libc::POLLIN,
            revents: 0,
        };
        loop {
            let n = unsafe { libc::poll(&mut pfd, 1, timeout_millis) };
            if n < 0 {
                let errno = std::io::Error::last_os_error();
                if errno.kind() == std::io::ErrorKind::Interrupted {
                    continue;
                }
                return false;
            }
            return n > 0 && (pfd.revents & libc::POLLIN) != 0;
        }
    }

    /// Close the fd. Called by the owner exactly once; `Drop` also closes,
    /// so detach with [`Event::into_raw_fd`] when the fd moved elsewhere.
    pub fn close(self) {
        drop(self);
    }

    /// Give up ownership of the fd without closing it.
    pub fn into_raw_fd(self) -> libc::c_int {
        let fd = self.fd;
        std::mem::forget(self);
        fd
    }
}

impl Drop for Event {
    fn drop(&mut self) {
        unsafe { libc::close(self.fd) };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn starts_unsignaled() {
        let ev = Event::new();
        assert!(!ev.is_signaled());
        assert!(!ev.wait_timeout(Duration::from_millis(10)));
    }

    #[test]
    fn stays_signaled_for_repeat_waiters() {
        let ev = Event::new();
        ev.signal();
        assert!(ev.is_signaled());
        ev.wait();
        // Manual reset: still signaled after a successful wait.
        assert!(ev.is_signaled());
        ev.signal(); // idempotent
        assert!(ev.wait_timeout(Duration::from_millis(1)));
    }

    #[test]
    fn cross_thread_signal_releases_waiter() {
        let ev = Arc::new(Event::new());
        let ev2 = Arc::clone(&ev);
        let t = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(20));
            ev2.signal();
        });
        assert!(ev.wait_timeout(Duration::from_secs(5)));
        t.join().unwrap();
    }
}
