//! Fixed exports, the named export table, and process-wide settings.
//!
//! A plugin cdylib exposes exactly eight fixed symbols, all generated by
//! [`declare_plugin!`]. Everything beyond those eight goes through the
//! named export table: the plugin registers extra capabilities by name at
//! init, the host probes for them with `keel_try_get_export` and treats a
//! miss as an answer, not an error.
//!
//! All registries here are process-scoped with init-at-first-use; teardown
//! happens in `keel_free_plugin`, before the host is allowed to `dlclose`.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, OnceLock};

use keel_abi::callbacks::DnsResolverCallback;
use keel_abi::iface::{RawIface, Slot};
use keel_abi::status;
use keel_abi::token::CancelToken;

use crate::object::IfaceHandle;
use crate::vault;

// =============================================================================
// Named export table
// =============================================================================

// Slots are stored as addresses: a raw pointer would make the static
// `!Sync`, and an export entry is just a code address anyway.
static EXPORTS: OnceLock<Mutex<HashMap<String, usize>>> = OnceLock::new();

fn exports() -> &'static Mutex<HashMap<String, usize>> {
    EXPORTS.get_or_init(|| Mutex::new(HashMap::new()))
}

/// Register a named capability. Later registrations under the same name
/// replace earlier ones; normally everything is registered once, at init.
pub fn register_export(name: &str, slot: Slot) {
    exports().lock().unwrap().insert(name.to_owned(), slot as usize);
}

/// Look up a named capability. A miss is a normal answer.
pub fn lookup_export(name: &str) -> Option<Slot> {
    exports().lock().unwrap().get(name).map(|&addr| addr as Slot)
}

/// The raw boundary form behind `keel_try_get_export`.
///
/// # Safety
/// `name_ptr` must point to `name_len` readable bytes; `out` must be a
/// valid, writable slot pointer.
pub unsafe fn try_get_export_raw(name_ptr: *const u8, name_len: usize, out: *mut Slot) -> i32 {
    if out.is_null() {
        return status::NULL_DISPATCH;
    }
    out.write(std::ptr::null());
    if name_ptr.is_null() {
        return status::NULL_DISPATCH;
    }
    let bytes = std::slice::from_raw_parts(name_ptr, name_len);
    let name = match std::str::from_utf8(bytes) {
        Ok(name) => name,
        Err(_) => return status::INVALID_ARG,
    };
    match lookup_export(name) {
        Some(slot) => {
            out.write(slot);
            status::OK
        }
        None => status::NOT_FOUND,
    }
}

// =============================================================================
// Process-wide settings
// =============================================================================

pub mod settings {
    use super::*;

    #[derive(Debug, Default, Clone)]
    pub struct Settings {
        /// BCP-47 locale tag for user-facing strings. Empty means unset.
        pub locale: String,
        /// Outbound HTTP proxy URL, when the host mandates one.
        pub proxy_url: Option<String>,
    }

    static SETTINGS: OnceLock<Mutex<Settings>> = OnceLock::new();

    fn cell() -> &'static Mutex<Settings> {
        SETTINGS.get_or_init(|| Mutex::new(Settings::default()))
    }

    pub fn snapshot() -> Settings {
        cell().lock().unwrap().clone()
    }

    pub fn set_locale(locale: &str) {
        cell().lock().unwrap().locale = locale.to_owned();
    }

    pub fn locale() -> String {
        cell().lock().unwrap().locale.clone()
    }

    pub fn set_proxy_url(url: Option<String>) {
        cell().lock().unwrap().proxy_url = url;
    }

    pub fn proxy_url() -> Option<String> {
        cell().lock().unwrap().proxy_url.clone()
    }
}

// =============================================================================
// Host callbacks: DNS resolver
// =============================================================================

// Stored as a usize so attach/detach is a single atomic store. Zero means
// detached.
static DNS_RESOLVER: AtomicUsize = AtomicUsize::new(0);

pub fn set_dns_resolver(cb: Option<DnsResolverCallback>) {
    let addr = cb.map_or(0, |f| f as usize);
    DNS_RESOLVER.store(addr, Ordering::Release);
}

/// The currently attached resolver, if any. Business logic that does its
/// own name resolution should prefer this over the system resolver so the
/// host can route lookups through its proxy.
pub fn dns_resolver() -> Option<DnsResolverCallback> {
    let addr = DNS_RESOLVER.load(Ordering::Acquire);
    if addr == 0 {
        None
    } else {
        // Round-trips the address stored above; fn pointers are address-sized.
        Some(unsafe { std::mem::transmute::<usize, DnsResolverCallback>(addr) })
    }
}

// =============================================================================
// Root plugin object
// =============================================================================

static ROOT: Mutex<Option<IfaceHandle>> = Mutex::new(None);

/// Create the root plugin on first request and hand out one reference per
/// call. The vault is initialized here so its teardown in [`free_root`]
/// always pairs with a live registry.
pub fn get_or_create_root(make: impl FnOnce() -> IfaceHandle) -> *mut RawIface {
    vault::init();
    let mut root = ROOT.lock().unwrap();
    let handle = root.get_or_insert_with(make);
    handle.add_ref();
    handle.as_raw()
}

/// Tear down everything the plugin owns, in dependency order: outstanding
/// async work first, then the root object, then the logger. After this
/// returns the host may `dlclose` the library.
pub fn free_root() {
    vault::cancel_and_unregister_all();
    // Dropping the stored handle releases the reference taken at creation;
    // host-held references keep the object alive until they release too.
    let handle = ROOT.lock().unwrap().take();
    drop(handle);
    crate::logging::detach();
    set_dns_resolver(None);
}

/// The raw boundary form behind `keel_cancel_async`.
///
/// # Safety
/// `token`, when non-null, must point to 16 readable bytes.
pub unsafe fn cancel_async_raw(token: *const CancelToken) -> i32 {
    match CancelToken::read(token) {
        Some(token) => {
            // Unknown token is a race-tolerant no-op, not an error.
            vault::cancel(token, true);
            status::OK
        }
        None => status::NULL_DISPATCH,
    }
}

// =============================================================================
// Export macro
// =============================================================================

/// Generate the eight fixed exports for a plugin cdylib.
///
/// ```rust,ignore
/// keel::declare_plugin! {
///     plugin: MyPlugin,
///     version: (1, 0, 0, 0),
///     create: || MyPlugin::new(),
/// }
/// ```
///
/// `create` runs at most once, on the first `keel_get_plugin` call.
#[macro_export]
macro_rules! declare_plugin {
    (
        plugin: $ty:ty,
        version: ($maj:expr, $min:expr, $pat:expr, $bld:expr),
        create: $create:expr $(,)?
    ) => {
        static __KEEL_PLUGIN_VERSION: $crate::abi::version::StandardVersion =
            $crate::abi::version::StandardVersion::new($maj, $min, $pat, $bld);

        #[no_mangle]
        pub extern "C" fn keel_standard_version() -> *const $crate::abi::version::StandardVersion {
            &$crate::abi::version::STANDARD_VERSION
        }

        #[no_mangle]
        pub extern "C" fn keel_plugin_version() -> *const $crate::abi::version::StandardVersion {
            &__KEEL_PLUGIN_VERSION
        }

        #[no_mangle]
        pub extern "C" fn keel_get_plugin() -> *mut $crate::abi::iface::RawIface {
            $crate::exports::get_or_create_root(|| {
                let plugin: $ty = ($create)();
                $crate::object::expose(plugin)
            })
        }

        #[no_mangle]
        pub extern "C" fn keel_free_plugin() {
            $crate::exports::free_root();
        }

        #[no_mangle]
        pub unsafe extern "C" fn keel_set_logger(cb: Option<$crate::abi::callbacks::LoggerCallback>) {
            $crate::logging::attach(cb);
        }

        #[no_mangle]
        pub unsafe extern "C" fn keel_set_dns_resolver(
            cb: Option<$crate::abi::callbacks::DnsResolverCallback>,
        ) {
            $crate::exports::set_dns_resolver(cb);
        }

        #[no_mangle]
        pub unsafe extern "C" fn keel_cancel_async(
            token: *const $crate::abi::token::CancelToken,
        ) -> i32 {
            $crate::exports::cancel_async_raw(token)
        }

        #[no_mangle]
        pub unsafe extern "C" fn keel_try_get_export(
            name_ptr: *const u8,
            name_len: usize,
            out: *mut $crate::abi::iface::Slot,
        ) -> i32 {
            $crate::exports::try_get_export_raw(name_ptr, name_len, out)
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    unsafe extern "C" fn sample_export() {}

    #[test]
    fn export_miss_is_not_found_with_null_out() {
        let name = b"keel.no-such-capability";
        let mut out: Slot = sample_export as Slot;
        let code = unsafe { try_get_export_raw(name.as_ptr(), name.len(), &mut out) };
        assert_eq!(code, status::NOT_FOUND);
        assert!(out.is_null());
    }

    #[test]
    fn export_hit_round_trips_the_pointer() {
        register_export("keel.test.sample", sample_export as Slot);
        let name = b"keel.test.sample";
        let mut out: Slot = std::ptr::null();
        let code = unsafe { try_get_export_raw(name.as_ptr(), name.len(), &mut out) };
        assert_eq!(code, status::OK);
        assert_eq!(out, sample_export as Slot);
    }

    #[test]
    fn export_table_is_shared_across_threads() {
        register_export("keel.test.threaded", sample_export as Slot);
        let hit = std::thread::spawn(|| {
            lookup_export("keel.test.threaded") == Some(sample_export as Slot)
        })
        .join()
        .unwrap();
        assert!(hit);
    }

    #[test]
    fn settings_are_process_wide() {
        settings::set_locale("cs-CZ");
        assert_eq!(settings::locale(), "cs-CZ");
        settings::set_proxy_url(Some("http://proxy.local:3128".into()));
        assert_eq!(
            settings::snapshot().proxy_url.as_deref(),
            Some("http://proxy.local:3128")
        );
        settings::set_proxy_url(None);
    }
}
