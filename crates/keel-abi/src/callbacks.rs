//! Host-provided callback signatures.
//!
//! The host may install these through the fixed exports; a plugin stores at
//! most one of each, process-wide, and passing null detaches.

use crate::memory::MemorySpan;

/// Log levels as they cross the boundary. Matches `log::Level` order.
pub const LOG_ERROR: u8 = 1;
pub const LOG_WARN: u8 = 2;
pub const LOG_INFO: u8 = 3;
pub const LOG_DEBUG: u8 = 4;
pub const LOG_TRACE: u8 = 5;

/// Receives one log record: level plus a UTF-8 message that is only valid
/// for the duration of the call.
pub type LoggerCallback = unsafe extern "C" fn(level: u8, msg_ptr: *const u8, msg_len: usize);

/// Resolves a host name to a newline-separated address list written into
/// `out` (an owned span the caller disposes). Returns a status code.
pub type DnsResolverCallback =
    unsafe extern "C" fn(host_ptr: *const u8, host_len: usize, out: *mut MemorySpan) -> i32;
