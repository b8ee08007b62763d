//! Owned interface references and typed wrappers.
//!
//! [`IfaceRef`] handles reference counting through the universal slots;
//! the typed wrappers (one per interface kind) call the per-interface
//! slots through the shared slot contract in `keel_abi::contract`.
//!
//! All of this is plain flat calls through fn pointers — the wrappers work
//! identically against an in-process object and one behind `dlopen`.

use std::time::Duration;

use keel_abi::async_result::{AsyncPayload, AsyncResult};
use keel_abi::contract::{self, GetIfaceFn, GetSpanFn, StartAsyncFn};
use keel_abi::iface::{self, InterfaceId, RawIface};
use keel_abi::memory::MemorySpan;
use keel_abi::status;
use keel_abi::token::CancelToken;
use keel_abi::version::StandardVersion;

use crate::awaiter::OwnedAsyncResult;
use crate::error::{check, HostError};

// =============================================================================
// IfaceRef — ownership of one reference
// =============================================================================

/// An owned reference to a plugin object, released on drop.
#[derive(Debug)]
pub struct IfaceRef {
    raw: *mut RawIface,
}

unsafe impl Send for IfaceRef {}
unsafe impl Sync for IfaceRef {}

impl IfaceRef {
    /// Take ownership of a reference the plugin already counted for us.
    ///
    /// # Safety
    /// `raw` must be a live interface pointer with one reference owed to
    /// the caller.
    pub unsafe fn from_raw(raw: *mut RawIface) -> Self {
        debug_assert!(!raw.is_null());
        Self { raw }
    }

    pub fn as_raw(&self) -> *mut RawIface {
        self.raw
    }

    /// The slot at `index`, transmuted to the expected fn type.
    ///
    /// # Safety
    /// `F` must be the fn type the contract declares for `index` on this
    /// object's interface.
    pub unsafe fn fn_at<F: Copy>(&self, index: usize) -> F {
        let slot = iface::slot(self.raw, index);
        debug_assert!(!slot.is_null());
        std::mem::transmute_copy::<keel_abi::iface::Slot, F>(&slot)
    }

    /// Downcast: ask the object for another of its identities.
    pub fn query(&self, iid: InterfaceId) -> Result<IfaceRef, HostError> {
        unsafe {
            let qi: iface::QueryInterfaceFn = self.fn_at(iface::SLOT_QUERY_INTERFACE);
            let mut out: *mut RawIface = std::ptr::null_mut();
            let code = qi(self.raw, &iid, &mut out);
            check(code)?;
            if out.is_null() {
                return Err(HostError::NoInterface);
            }
            Ok(IfaceRef::from_raw(out))
        }
    }

    /// Ask the object to release its native resources (slot 3). The
    /// object itself stays refcounted.
    pub fn free_resources(&self) -> Result<(), HostError> {
        unsafe {
            let f: iface::FreeFn = self.fn_at(iface::SLOT_FREE);
            check(f(self.raw))
        }
    }
}

impl Clone for IfaceRef {
    fn clone(&self) -> Self {
        unsafe {
            let add_ref: iface::AddRefFn = self.fn_at(iface::SLOT_ADD_REF);
            add_ref(self.raw);
            IfaceRef { raw: self.raw }
        }
    }
}

impl Drop for IfaceRef {
    fn drop(&mut self) {
        unsafe {
            let release: iface::ReleaseFn = self.fn_at(iface::SLOT_RELEASE);
            release(self.raw);
        }
    }
}

// =============================================================================
// Shared call shapes
// =============================================================================

fn get_string(iface: &IfaceRef, index: usize) -> Result<String, HostError> {
    unsafe {
        let f: GetSpanFn = iface.fn_at(index);
        let mut span = MemorySpan::empty();
        check(f(iface.as_raw(), &mut span))?;
        let text = span.to_str()?.to_owned();
        span.dispose();
        Ok(text)
    }
}

fn start_async<P: AsyncPayload>(
    iface: &IfaceRef,
    index: usize,
) -> Result<OwnedAsyncResult<P>, HostError> {
    unsafe {
        let f: StartAsyncFn = iface.fn_at(index);
        let token = CancelToken::fresh();
        let mut out: *mut AsyncResult = std::ptr::null_mut();
        check(f(iface.as_raw(), &token, &mut out))?;
        if out.is_null() {
            return Err(HostError::Status(status::FAIL));
        }
        Ok(OwnedAsyncResult::from_raw(out, token))
    }
}

fn get_iface(iface: &IfaceRef, index: usize) -> Result<IfaceRef, HostError> {
    unsafe {
        let f: GetIfaceFn = iface.fn_at(index);
        let mut out: *mut RawIface = std::ptr::null_mut();
        check(f(iface.as_raw(), &mut out))?;
        if out.is_null() {
            return Err(HostError::Status(status::FAIL));
        }
        Ok(IfaceRef::from_raw(out))
    }
}

macro_rules! typed_ref {
    ($(#[$meta:meta])* $name:ident, $iid:ident) => {
        $(#[$meta])*
        #[derive(Clone, Debug)]
        pub struct $name {
            iface: IfaceRef,
        }

        impl $name {
            /// Wrap a reference already known to carry this identity.
            pub fn new(iface: IfaceRef) -> Self {
                Self { iface }
            }

            /// Downcast any identity of the same object to this one.
            pub fn from_iface(iface: &IfaceRef) -> Result<Self, HostError> {
                Ok(Self { iface: iface.query(InterfaceId::$iid)? })
            }

            pub fn as_iface(&self) -> &IfaceRef {
                &self.iface
            }

            /// Start asynchronous initialization (required before first
            /// use of any other operation).
            pub fn init(&self) -> Result<OwnedAsyncResult<()>, HostError> {
                start_async(&self.iface, contract::initializable_task::SLOT_INIT_ASYNC)
            }

            /// Convenience: init and block for completion.
            pub fn init_blocking(&self, timeout: Duration) -> Result<(), HostError> {
                match self.init()?.wait_timeout(timeout) {
                    Ok(outcome) => outcome,
                    Err(_pending) => Err(HostError::WaitTimeout),
                }
            }
        }
    };
}

typed_ref!(
    /// The root object behind `keel_get_plugin`.
    PluginRef, PLUGIN
);
typed_ref!(PresetConfigRef, PLUGIN_PRESET_CONFIG);
typed_ref!(GameManagerRef, GAME_MANAGER);
typed_ref!(LauncherApiRef, LAUNCHER_API);
typed_ref!(LauncherApiMediaRef, LAUNCHER_API_MEDIA);
typed_ref!(LauncherApiNewsRef, LAUNCHER_API_NEWS);
typed_ref!(SelfUpdateRef, PLUGIN_SELF_UPDATE);
typed_ref!(GameUninstallerRef, GAME_UNINSTALLER);
typed_ref!(GameInstallerRef, GAME_INSTALLER);

// =============================================================================
// Per-interface operations
// =============================================================================

impl PluginRef {
    pub fn name(&self) -> Result<String, HostError> {
        get_string(&self.iface, contract::plugin::SLOT_GET_NAME)
    }

    pub fn description(&self) -> Result<String, HostError> {
        get_string(&self.iface, contract::plugin::SLOT_GET_DESCRIPTION)
    }

    pub fn set_locale(&self, locale: &str) -> Result<(), HostError> {
        unsafe {
            let f: contract::plugin::SetLocaleFn =
                self.iface.fn_at(contract::plugin::SLOT_SET_LOCALE);
            check(f(self.iface.as_raw(), locale.as_ptr(), locale.len()))
        }
    }

    /// Cancel an in-flight operation through the root interface, for hosts
    /// that hold a plugin reference but not the library handle.
    pub fn cancel_async(&self, token: &CancelToken) -> Result<(), HostError> {
        unsafe {
            let f: contract::plugin::CancelAsyncFn =
                self.iface.fn_at(contract::plugin::SLOT_CANCEL_ASYNC);
            check(f(self.iface.as_raw(), token))
        }
    }

    pub fn preset_config_count(&self) -> Result<u32, HostError> {
        unsafe {
            let f: contract::plugin::PresetCountFn =
                self.iface.fn_at(contract::plugin::SLOT_PRESET_CONFIG_COUNT);
            let mut count = 0u32;
            check(f(self.iface.as_raw(), &mut count))?;
            Ok(count)
        }
    }

    pub fn preset_config(&self, index: u32) -> Result<PresetConfigRef, HostError> {
        unsafe {
            let f: contract::plugin::PresetAtFn =
                self.iface.fn_at(contract::plugin::SLOT_PRESET_CONFIG_AT);
            let mut out: *mut RawIface = std::ptr::null_mut();
            check(f(self.iface.as_raw(), index, &mut out))?;
            if out.is_null() {
                return Err(HostError::Status(status::FAIL));
            }
            Ok(PresetConfigRef::new(IfaceRef::from_raw(out)))
        }
    }
}

impl PresetConfigRef {
    pub fn game_name(&self) -> Result<String, HostError> {
        get_string(&self.iface, contract::preset_config::SLOT_GAME_NAME)
    }

    pub fn zone_name(&self) -> Result<String, HostError> {
        get_string(&self.iface, contract::preset_config::SLOT_ZONE_NAME)
    }

    pub fn create_launcher_api(&self) -> Result<LauncherApiRef, HostError> {
        let iface = get_iface(&self.iface, contract::preset_config::SLOT_CREATE_LAUNCHER_API)?;
        Ok(LauncherApiRef::new(iface))
    }

    pub fn create_game_manager(&self) -> Result<GameManagerRef, HostError> {
        let iface = get_iface(&self.iface, contract::preset_config::SLOT_CREATE_GAME_MANAGER)?;
        Ok(GameManagerRef::new(iface))
    }
}

impl GameManagerRef {
    pub fn installed_version(&self) -> Result<StandardVersion, HostError> {
        unsafe {
            let f: contract::game_manager::InstalledVersionFn =
                self.iface.fn_at(contract::game_manager::SLOT_INSTALLED_VERSION);
            let mut version = StandardVersion::new(0, 0, 0, 0);
            check(f(self.iface.as_raw(), &mut version))?;
            Ok(version)
        }
    }

    pub fn is_installed(&self) -> Result<bool, HostError> {
        unsafe {
            let f: contract::game_manager::IsInstalledFn =
                self.iface.fn_at(contract::game_manager::SLOT_IS_INSTALLED);
            let mut flag = 0u8;
            check(f(self.iface.as_raw(), &mut flag))?;
            Ok(flag != 0)
        }
    }

    /// Async probe of the installation; the payload is a `game_state` code.
    pub fn load_state(&self) -> Result<OwnedAsyncResult<u8>, HostError> {
        start_async(&self.iface, contract::game_manager::SLOT_LOAD_STATE_ASYNC)
    }
}

impl LauncherApiRef {
    pub fn base_url(&self) -> Result<String, HostError> {
        get_string(&self.iface, contract::launcher_api::SLOT_BASE_URL)
    }
}

impl LauncherApiMediaRef {
    pub fn base_url(&self) -> Result<String, HostError> {
        get_string(&self.iface, contract::launcher_api::SLOT_BASE_URL)
    }

    /// Async fetch of the background/media document.
    pub fn background_entries(&self) -> Result<OwnedAsyncResult<MemorySpan>, HostError> {
        start_async(
            &self.iface,
            contract::launcher_api_media::SLOT_BACKGROUND_ENTRIES_ASYNC,
        )
    }
}

impl LauncherApiNewsRef {
    pub fn base_url(&self) -> Result<String, HostError> {
        get_string(&self.iface, contract::launcher_api::SLOT_BASE_URL)
    }

    pub fn news_entries(&self) -> Result<OwnedAsyncResult<MemorySpan>, HostError> {
        start_async(&self.iface, contract::launcher_api_news::SLOT_NEWS_ENTRIES_ASYNC)
    }
}

impl SelfUpdateRef {
    /// Async self-update check; the payload is a `self_update` outcome code.
    pub fn check_update(&self) -> Result<OwnedAsyncResult<u8>, HostError> {
        start_async(&self.iface, contract::self_update::SLOT_CHECK_UPDATE_ASYNC)
    }
}

impl GameUninstallerRef {
    pub fn uninstall(&self) -> Result<OwnedAsyncResult<()>, HostError> {
        start_async(&self.iface, contract::game_uninstaller::SLOT_UNINSTALL_ASYNC)
    }
}

impl GameInstallerRef {
    pub fn uninstall(&self) -> Result<OwnedAsyncResult<()>, HostError> {
        start_async(&self.iface, contract::game_uninstaller::SLOT_UNINSTALL_ASYNC)
    }

    pub fn install(&self) -> Result<OwnedAsyncResult<()>, HostError> {
        start_async(&self.iface, contract::game_installer::SLOT_INSTALL_ASYNC)
    }

    pub fn update(&self) -> Result<OwnedAsyncResult<()>, HostError> {
        start_async(&self.iface, contract::game_installer::SLOT_UPDATE_ASYNC)
    }
}
