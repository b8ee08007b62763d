//! Forwards the `log` facade to the host's logger callback.
//!
//! The SDK installs one process-wide [`CallbackLogger`] as the `log` logger
//! the first time a callback is attached. Attach/detach after that is a
//! single atomic store; while detached, records drop silently.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Once;

use keel_abi::callbacks::{self, LoggerCallback};

static INSTALL: Once = Once::new();
// Current callback address; zero while detached.
static CALLBACK: AtomicUsize = AtomicUsize::new(0);

struct CallbackLogger;

fn level_code(level: log::Level) -> u8 {
    match level {
        log::Level::Error => callbacks::LOG_ERROR,
        log::Level::Warn => callbacks::LOG_WARN,
        log::Level::Info => callbacks::LOG_INFO,
        log::Level::Debug => callbacks::LOG_DEBUG,
        log::Level::Trace => callbacks::LOG_TRACE,
    }
}

fn current() -> Option<LoggerCallback> {
    let addr = CALLBACK.load(Ordering::Acquire);
    if addr == 0 {
        None
    } else {
        Some(unsafe { std::mem::transmute::<usize, LoggerCallback>(addr) })
    }
}

impl log::Log for CallbackLogger {
    fn enabled(&self, _metadata: &log::Metadata) -> bool {
        CALLBACK.load(Ordering::Relaxed) != 0
    }

    fn log(&self, record: &log::Record) {
        let Some(cb) = current() else { return };
        let msg = format!("[{}] {}", record.target(), record.args());
        // The message is only borrowed for the duration of the call.
        unsafe { cb(level_code(record.level()), msg.as_ptr(), msg.len()) };
    }

    fn flush(&self) {}
}

/// Attach a host callback (or detach with `None`). Installs the forwarding
/// logger on first attach; if another logger was installed first (tests
/// using `env_logger`, say), forwarding is skipped and a note is logged.
pub fn attach(cb: Option<LoggerCallback>) {
    CALLBACK.store(cb.map_or(0, |f| f as usize), Ordering::Release);
    if cb.is_some() {
        INSTALL.call_once(|| {
            if log::set_logger(&CallbackLogger).is_ok() {
                log::set_max_level(log::LevelFilter::Trace);
            } else {
                log::debug!("a logger is already installed; host log forwarding disabled");
            }
        });
    }
}

/// Detach the host callback. Safe to call with none attached.
pub fn detach() {
    CALLBACK.store(0, Ordering::Release);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;

    static SEEN: AtomicU32 = AtomicU32::new(0);

    unsafe extern "C" fn counting_sink(level: u8, msg_ptr: *const u8, msg_len: usize) {
        let msg = std::str::from_utf8(std::slice::from_raw_parts(msg_ptr, msg_len)).unwrap();
        assert!(!msg.is_empty());
        SEEN.fetch_add(u32::from(level), Ordering::SeqCst);
    }

    #[test]
    fn records_flow_to_the_callback_and_stop_on_detach() {
        attach(Some(counting_sink));
        log::error!("boundary check");
        let after_error = SEEN.load(Ordering::SeqCst);
        assert!(after_error >= u32::from(callbacks::LOG_ERROR));

        detach();
        log::error!("dropped");
        assert_eq!(SEEN.load(Ordering::SeqCst), after_error);
    }
}
