//! Dynamic loading of plugin cdylibs.
//!
//! `dlopen` with `RTLD_NOW | RTLD_LOCAL`, then resolve the eight fixed
//! exports eagerly. Optional capabilities are looked up afterwards through
//! `try_get_export`, gated on the plugin's standard version.

use std::ffi::CString;
use std::path::Path;

use keel_abi::callbacks::{DnsResolverCallback, LoggerCallback};
use keel_abi::iface::{RawIface, Slot};
use keel_abi::status;
use keel_abi::token::CancelToken;
use keel_abi::version::{StandardVersion, STANDARD_VERSION};

use crate::error::HostError;
use crate::iface::{IfaceRef, PluginRef};

type StandardVersionFn = unsafe extern "C" fn() -> *const StandardVersion;
type GetPluginFn = unsafe extern "C" fn() -> *mut RawIface;
type FreePluginFn = unsafe extern "C" fn();
type SetLoggerFn = unsafe extern "C" fn(Option<LoggerCallback>);
type SetDnsResolverFn = unsafe extern "C" fn(Option<DnsResolverCallback>);
type CancelAsyncFn = unsafe extern "C" fn(*const CancelToken) -> i32;
type TryGetExportFn = unsafe extern "C" fn(*const u8, usize, *mut Slot) -> i32;

struct Exports {
    standard_version: StandardVersionFn,
    plugin_version: StandardVersionFn,
    get_plugin: GetPluginFn,
    free_plugin: FreePluginFn,
    set_logger: SetLoggerFn,
    set_dns_resolver: SetDnsResolverFn,
    cancel_async: CancelAsyncFn,
    try_get_export: TryGetExportFn,
}

/// One loaded plugin library. Dropping it frees the plugin and closes the
/// dl handle, in that order.
pub struct PluginLibrary {
    handle: *mut libc::c_void,
    exports: Exports,
}

// The dl handle is a process-global resource; calls through the resolved
// fn pointers are as thread-safe as the plugin promises, which the
// standard requires.
unsafe impl Send for PluginLibrary {}
unsafe impl Sync for PluginLibrary {}

unsafe fn resolve(
    handle: *mut libc::c_void,
    name: &'static str,
) -> Result<*mut libc::c_void, HostError> {
    let name_c = CString::new(name).map_err(|_| HostError::MissingSymbol(name))?;
    let sym = libc::dlsym(handle, name_c.as_ptr());
    if sym.is_null() {
        Err(HostError::MissingSymbol(name))
    } else {
        Ok(sym)
    }
}

macro_rules! resolve_fn {
    ($handle:expr, $name:literal as $ty:ty) => {
        std::mem::transmute::<*mut libc::c_void, $ty>(resolve($handle, $name)?)
    };
}

impl PluginLibrary {
    /// Load a plugin and check it against the host's standard version.
    pub fn load(path: &Path) -> Result<Self, HostError> {
        let path_c = CString::new(path.to_string_lossy().as_bytes())
            .map_err(|_| HostError::Load(format!("path contains NUL: {}", path.display())))?;

        unsafe {
            let handle = libc::dlopen(path_c.as_ptr(), libc::RTLD_NOW | libc::RTLD_LOCAL);
            if handle.is_null() {
                let err = std::ffi::CStr::from_ptr(libc::dlerror());
                return Err(HostError::Load(format!(
                    "dlopen failed: {}",
                    err.to_string_lossy()
                )));
            }

            let exports = match Self::resolve_exports(handle) {
                Ok(exports) => exports,
                Err(e) => {
                    libc::dlclose(handle);
                    return Err(e);
                }
            };

            let lib = PluginLibrary { handle, exports };
            let found = lib.standard_version();
            // Same-major compatibility gate.
            let required = StandardVersion::new(STANDARD_VERSION.major, 0, 0, 0);
            if !found.at_least(required) || found.major != STANDARD_VERSION.major {
                // Drop on `lib` frees the (never-started) plugin and
                // closes the handle.
                return Err(HostError::VersionTooOld { found, required });
            }
            log::info!(
                "loaded plugin {} (standard {}, plugin {})",
                path.display(),
                found,
                lib.plugin_version()
            );
            Ok(lib)
        }
    }

    unsafe fn resolve_exports(handle: *mut libc::c_void) -> Result<Exports, HostError> {
        Ok(Exports {
            standard_version: resolve_fn!(handle, "keel_standard_version" as StandardVersionFn),
            plugin_version: resolve_fn!(handle, "keel_plugin_version" as StandardVersionFn),
            get_plugin: resolve_fn!(handle, "keel_get_plugin" as GetPluginFn),
            free_plugin: resolve_fn!(handle, "keel_free_plugin" as FreePluginFn),
            set_logger: resolve_fn!(handle, "keel_set_logger" as SetLoggerFn),
            set_dns_resolver: resolve_fn!(handle, "keel_set_dns_resolver" as SetDnsResolverFn),
            cancel_async: resolve_fn!(handle, "keel_cancel_async" as CancelAsyncFn),
            try_get_export: resolve_fn!(handle, "keel_try_get_export" as TryGetExportFn),
        })
    }

    pub fn standard_version(&self) -> StandardVersion {
        unsafe { *(self.exports.standard_version)() }
    }

    pub fn plugin_version(&self) -> StandardVersion {
        unsafe { *(self.exports.plugin_version)() }
    }

    /// Obtain (or create) the root plugin object. Each call hands the host
    /// one reference, owned by the returned wrapper.
    pub fn plugin(&self) -> Result<PluginRef, HostError> {
        let raw = unsafe { (self.exports.get_plugin)() };
        if raw.is_null() {
            return Err(HostError::Status(status::FAIL));
        }
        // get_plugin already took our reference.
        Ok(PluginRef::new(unsafe { IfaceRef::from_raw(raw) }))
    }

    pub fn set_logger(&self, cb: Option<LoggerCallback>) {
        unsafe { (self.exports.set_logger)(cb) }
    }

    pub fn set_dns_resolver(&self, cb: Option<DnsResolverCallback>) {
        unsafe { (self.exports.set_dns_resolver)(cb) }
    }

    /// Cancel an in-flight operation by token. An unknown token is a
    /// silent no-op on the plugin side.
    pub fn cancel_async(&self, token: &CancelToken) -> Result<(), HostError> {
        crate::error::check(unsafe { (self.exports.cancel_async)(token) })
    }

    /// Probe the named-export table. `Ok(None)` means the plugin simply
    /// does not provide the capability.
    pub fn try_get_export(&self, name: &str) -> Result<Option<Slot>, HostError> {
        let mut out: Slot = std::ptr::null();
        let code = unsafe {
            (self.exports.try_get_export)(name.as_ptr(), name.len(), &mut out)
        };
        match code {
            status::OK => Ok(Some(out)),
            status::NOT_FOUND => Ok(None),
            other => Err(HostError::from_status(other)),
        }
    }

    /// Like [`try_get_export`](Self::try_get_export) but a miss is an error.
    pub fn get_export(&self, name: &str) -> Result<Slot, HostError> {
        self.try_get_export(name)?
            .ok_or_else(|| HostError::ExportNotFound(name.to_owned()))
    }
}

impl Drop for PluginLibrary {
    fn drop(&mut self) {
        unsafe {
            // Free before close: the plugin joins its workers and tears
            // down its registries while its code is still mapped.
            (self.exports.free_plugin)();
            libc::dlclose(self.handle);
        }
    }
}
