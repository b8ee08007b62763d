//! Slot layout contract for every interface kind.
//!
//! Slot index *is* the dispatch key, so these tables are the wire contract:
//! appending to the end of an interface is a minor standard revision,
//! anything else is a new interface id. Both the SDK's vtable assembly and
//! the host's typed wrappers compile against this module — they cannot
//! drift apart without a type error on one side.

use crate::async_result::AsyncResult;
use crate::iface::RawIface;
use crate::memory::MemorySpan;
use crate::token::CancelToken;
use crate::version::StandardVersion;

/// `(this, out_span)` — write an owned UTF-8 span to `out`.
pub type GetSpanFn = unsafe extern "C" fn(*mut RawIface, *mut MemorySpan) -> i32;
/// `(this, token, out_result)` — start async work, return its handle.
pub type StartAsyncFn =
    unsafe extern "C" fn(*mut RawIface, *const CancelToken, *mut *mut AsyncResult) -> i32;
/// `(this, out_iface)` — write an owned interface reference to `out`.
pub type GetIfaceFn = unsafe extern "C" fn(*mut RawIface, *mut *mut RawIface) -> i32;

pub mod free {
    /// Identity triplet + the free slot.
    pub const SLOT_COUNT: usize = 4;
}

pub mod initializable_task {
    pub const SLOT_INIT_ASYNC: usize = 4;
    pub const SLOT_COUNT: usize = 5;
}

pub mod plugin {
    use super::*;

    pub const SLOT_GET_NAME: usize = 5;
    pub const SLOT_GET_DESCRIPTION: usize = 6;
    pub const SLOT_SET_LOCALE: usize = 7;
    pub const SLOT_CANCEL_ASYNC: usize = 8;
    pub const SLOT_PRESET_CONFIG_COUNT: usize = 9;
    pub const SLOT_PRESET_CONFIG_AT: usize = 10;
    pub const SLOT_COUNT: usize = 11;

    pub type SetLocaleFn = unsafe extern "C" fn(*mut RawIface, *const u8, usize) -> i32;
    pub type CancelAsyncFn = unsafe extern "C" fn(*mut RawIface, *const CancelToken) -> i32;
    pub type PresetCountFn = unsafe extern "C" fn(*mut RawIface, *mut u32) -> i32;
    pub type PresetAtFn = unsafe extern "C" fn(*mut RawIface, u32, *mut *mut RawIface) -> i32;
}

pub mod preset_config {
    pub const SLOT_GAME_NAME: usize = 5;
    pub const SLOT_ZONE_NAME: usize = 6;
    pub const SLOT_CREATE_LAUNCHER_API: usize = 7;
    pub const SLOT_CREATE_GAME_MANAGER: usize = 8;
    pub const SLOT_COUNT: usize = 9;
}

pub mod game_manager {
    use super::*;

    pub const SLOT_INSTALLED_VERSION: usize = 5;
    pub const SLOT_IS_INSTALLED: usize = 6;
    pub const SLOT_LOAD_STATE_ASYNC: usize = 7;
    pub const SLOT_COUNT: usize = 8;

    pub type InstalledVersionFn =
        unsafe extern "C" fn(*mut RawIface, *mut StandardVersion) -> i32;
    pub type IsInstalledFn = unsafe extern "C" fn(*mut RawIface, *mut u8) -> i32;
}

pub mod launcher_api {
    pub const SLOT_BASE_URL: usize = 5;
    pub const SLOT_COUNT: usize = 6;
}

pub mod launcher_api_media {
    pub const SLOT_BACKGROUND_ENTRIES_ASYNC: usize = 6;
    pub const SLOT_COUNT: usize = 7;
}

pub mod launcher_api_news {
    pub const SLOT_NEWS_ENTRIES_ASYNC: usize = 6;
    pub const SLOT_COUNT: usize = 7;
}

pub mod self_update {
    pub const SLOT_CHECK_UPDATE_ASYNC: usize = 5;
    pub const SLOT_COUNT: usize = 6;
}

pub mod game_uninstaller {
    pub const SLOT_UNINSTALL_ASYNC: usize = 5;
    pub const SLOT_COUNT: usize = 6;
}

pub mod game_installer {
    pub const SLOT_INSTALL_ASYNC: usize = 6;
    pub const SLOT_UPDATE_ASYNC: usize = 7;
    pub const SLOT_COUNT: usize = 8;
}
