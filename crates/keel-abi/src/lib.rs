//! FFI-safe types shared between keel hosts and plugins.
//!
//! Everything in this crate is either `#[repr(C)]` or a plain function over
//! `#[repr(C)]` data. A plugin built against one copy of this crate and a
//! host built against another must agree on every layout here — treat any
//! change to a public struct as a standard-version bump.
//!
//! # Organization
//!
//! - **status** — i32 status codes returned by every vtable slot
//! - **version** — the 4-component standard/plugin version struct
//! - **memory** — `DisposableMemory<T>`, the owned native buffer handle
//! - **event** — manual-reset wait object (eventfd) used by async results
//! - **token** — 128-bit cancellation token
//! - **error** — the `AbiError` taxonomy both sides speak
//! - **exception** — `ExceptionRecord` and its encode/decode registry
//! - **async_result** — the `AsyncResult` header every async slot returns
//! - **iface** — interface ids and the raw vtable/dispatch-pointer types
//! - **callbacks** — host-provided logger/DNS callback signatures
//! - **contract** — per-interface slot indices and slot signatures

pub mod callbacks;
pub mod contract;
pub mod status;
pub mod version;
pub mod memory;
pub mod event;
pub mod token;
pub mod error;
pub mod exception;
pub mod async_result;
pub mod iface;

pub use async_result::{AsyncPayload, AsyncResult, AsyncState};
pub use error::AbiError;
pub use event::Event;
pub use exception::ExceptionRecord;
pub use iface::{InterfaceId, RawIface, Slot};
pub use memory::{DisposableMemory, MemorySpan};
pub use token::CancelToken;
pub use version::StandardVersion;
