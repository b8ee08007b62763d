//! Flat-call dispatch: extern "C" slot wrappers and vtable assembly.
//!
//! Every wrapper follows the one pattern: validate pointers, recover the
//! concrete object, call the trait method, marshal outputs into the
//! caller's out-pointers, return a status code. Errors are converted at the
//! boundary — a Rust panic or `Err` never unwinds into the caller.
//!
//! Vtable assembly lives next to the wrappers it assembles. Each
//! `*_vtable::<T>()` builds the interface's slot array by deriving from its
//! base's array and pushing own slots in declared order, then checks the
//! result against the slot counts in `keel_abi::contract` — the layout the
//! host compiles against.

use std::panic::{catch_unwind, AssertUnwindSafe};

use keel_abi::async_result::{AsyncPayload, AsyncResult};
use keel_abi::contract;
use keel_abi::error::AbiError;
use keel_abi::iface::{InterfaceId, RawIface, Slot};
use keel_abi::memory::MemorySpan;
use keel_abi::status;
use keel_abi::token::CancelToken;
use keel_abi::version::StandardVersion;

use crate::object::{self, resolve};
use crate::spawn::{self, Keepalive};
use crate::traits::*;
use crate::vault;
use crate::vtable::{vtable_of, Vtable, VtableBuilder};

// =============================================================================
// Wrapper plumbing
// =============================================================================

/// Run a wrapper body; convert `Err` and panics to status codes.
fn guarded(body: impl FnOnce() -> Result<(), AbiError>) -> i32 {
    match catch_unwind(AssertUnwindSafe(body)) {
        Ok(Ok(())) => status::OK,
        Ok(Err(err)) => {
            log::debug!("slot call failed: {err}");
            err.status_code()
        }
        Err(_) => {
            log::error!("slot call panicked; returning generic failure");
            status::FAIL
        }
    }
}

fn require_out<P>(out: *mut P) -> Result<(), AbiError> {
    if out.is_null() {
        Err(AbiError::null_argument("out"))
    } else {
        Ok(())
    }
}

unsafe fn require_object<'a, T: ComClass>(
    this: *mut RawIface,
) -> Result<&'a object::ComBox<T>, AbiError> {
    resolve::<T>(this).ok_or_else(|| AbiError::null_argument("this"))
}

/// Read a length-tagged UTF-8 argument.
unsafe fn read_str<'a>(ptr: *const u8, len: usize) -> Result<&'a str, AbiError> {
    if ptr.is_null() {
        return Err(AbiError::null_argument("ptr"));
    }
    std::str::from_utf8(std::slice::from_raw_parts(ptr, len))
        .map_err(|_| AbiError::invalid_argument("ptr"))
}

/// The body shared by every async slot: keepalive, token, spawn, hand the
/// handle out.
unsafe fn start_async<T, P>(
    this: *mut RawIface,
    token: *const CancelToken,
    out: *mut *mut AsyncResult,
    work: impl FnOnce(&T, &vault::CancelSource) -> Result<P, AbiError> + Send + 'static,
) -> Result<(), AbiError>
where
    T: ComClass,
    P: AsyncPayload,
{
    require_out(out)?;
    out.write(std::ptr::null_mut());
    let keep = Keepalive::<T>::acquire(this).ok_or_else(|| AbiError::null_argument("this"))?;
    let token = CancelToken::read(token);
    let handle = spawn::spawn(token, move |cancel| work(keep.get(), cancel));
    out.write(handle);
    Ok(())
}

// =============================================================================
// InitializableTask — slot 4
// =============================================================================

unsafe extern "C" fn init_async<T: InitializableTask + ComClass>(
    this: *mut RawIface,
    token: *const CancelToken,
    out: *mut *mut AsyncResult,
) -> i32 {
    guarded(|| start_async::<T, ()>(this, token, out, |obj, cancel| obj.init(cancel)))
}

/// The *Free* vtable for `T`: the universal prefix alone.
pub fn free_vtable<T: ComClass + Free>() -> &'static Vtable {
    vtable_of::<T>(InterfaceId::FREE, || {
        let vt = VtableBuilder::root(
            object::query_interface::<T>,
            object::add_ref::<T>,
            object::release::<T>,
            object::free_slot::<T>,
        )
        .finish(InterfaceId::FREE);
        debug_assert_eq!(vt.len(), contract::free::SLOT_COUNT);
        vt
    })
}

pub fn initializable_task_vtable<T: ComClass + InitializableTask>() -> &'static Vtable {
    vtable_of::<T>(InterfaceId::INITIALIZABLE_TASK, || {
        let vt = VtableBuilder::derive(free_vtable::<T>())
            .push(init_async::<T> as Slot)
            .finish(InterfaceId::INITIALIZABLE_TASK);
        debug_assert_eq!(vt.len(), contract::initializable_task::SLOT_COUNT);
        vt
    })
}

fn task_identities<T: ComClass + InitializableTask>() -> Vec<(InterfaceId, &'static Vtable)> {
    vec![
        (InterfaceId::INITIALIZABLE_TASK, initializable_task_vtable::<T>()),
        (InterfaceId::FREE, free_vtable::<T>()),
    ]
}

// =============================================================================
// Plugin — slots 5..=10
// =============================================================================

unsafe extern "C" fn plugin_get_name<T: Plugin + ComClass>(
    this: *mut RawIface,
    out: *mut MemorySpan,
) -> i32 {
    guarded(|| {
        require_out(out)?;
        let obj = require_object::<T>(this)?;
        out.write(MemorySpan::copy_from_str(&obj.value().name()));
        Ok(())
    })
}

unsafe extern "C" fn plugin_get_description<T: Plugin + ComClass>(
    this: *mut RawIface,
    out: *mut MemorySpan,
) -> i32 {
    guarded(|| {
        require_out(out)?;
        let obj = require_object::<T>(this)?;
        out.write(MemorySpan::copy_from_str(&obj.value().description()));
        Ok(())
    })
}

unsafe extern "C" fn plugin_set_locale<T: Plugin + ComClass>(
    this: *mut RawIface,
    ptr: *const u8,
    len: usize,
) -> i32 {
    guarded(|| {
        let obj = require_object::<T>(this)?;
        let locale = read_str(ptr, len)?;
        crate::exports::settings::set_locale(locale);
        obj.value().set_locale(locale);
        Ok(())
    })
}

/// Cancellation by token, reachable through the root interface. The vault
/// answer is authoritative; an unknown token is a benign miss, not a fault.
unsafe extern "C" fn plugin_cancel_async<T: Plugin + ComClass>(
    this: *mut RawIface,
    token: *const CancelToken,
) -> i32 {
    guarded(|| {
        require_object::<T>(this)?;
        match CancelToken::read(token) {
            Some(token) => {
                vault::cancel(token, true);
                Ok(())
            }
            None => Err(AbiError::null_argument("token")),
        }
    })
}

unsafe extern "C" fn plugin_preset_config_count<T: Plugin + ComClass>(
    this: *mut RawIface,
    out: *mut u32,
) -> i32 {
    guarded(|| {
        require_out(out)?;
        let obj = require_object::<T>(this)?;
        out.write(obj.value().preset_config_count());
        Ok(())
    })
}

unsafe extern "C" fn plugin_preset_config_at<T: Plugin + ComClass>(
    this: *mut RawIface,
    index: u32,
    out: *mut *mut RawIface,
) -> i32 {
    guarded(|| {
        require_out(out)?;
        out.write(std::ptr::null_mut());
        let obj = require_object::<T>(this)?;
        if index >= obj.value().preset_config_count() {
            return Err(AbiError::argument_out_of_range("index"));
        }
        let handle = obj.value().preset_config(index)?;
        out.write(handle.into_raw());
        Ok(())
    })
}

pub fn plugin_vtable<T: ComClass + Plugin>() -> &'static Vtable {
    vtable_of::<T>(InterfaceId::PLUGIN, || {
        let vt = VtableBuilder::derive(initializable_task_vtable::<T>())
            .push(plugin_get_name::<T> as Slot)
            .push(plugin_get_description::<T> as Slot)
            .push(plugin_set_locale::<T> as Slot)
            .push(plugin_cancel_async::<T> as Slot)
            .push(plugin_preset_config_count::<T> as Slot)
            .push(plugin_preset_config_at::<T> as Slot)
            .finish(InterfaceId::PLUGIN);
        debug_assert_eq!(vt.len(), contract::plugin::SLOT_COUNT);
        vt
    })
}

/// Identity set for a root plugin type: own kind, then ancestors.
pub fn plugin_identities<T: ComClass + Plugin>() -> Vec<(InterfaceId, &'static Vtable)> {
    let mut ids = vec![(InterfaceId::PLUGIN, plugin_vtable::<T>())];
    ids.extend(task_identities::<T>());
    ids
}

// =============================================================================
// PluginPresetConfig — slots 5..=8
// =============================================================================

unsafe extern "C" fn preset_game_name<T: PluginPresetConfig + ComClass>(
    this: *mut RawIface,
    out: *mut MemorySpan,
) -> i32 {
    guarded(|| {
        require_out(out)?;
        let obj = require_object::<T>(this)?;
        out.write(MemorySpan::copy_from_str(&obj.value().game_name()));
        Ok(())
    })
}

unsafe extern "C" fn preset_zone_name<T: PluginPresetConfig + ComClass>(
    this: *mut RawIface,
    out: *mut MemorySpan,
) -> i32 {
    guarded(|| {
        require_out(out)?;
        let obj = require_object::<T>(this)?;
        out.write(MemorySpan::copy_from_str(&obj.value().zone_name()));
        Ok(())
    })
}

unsafe extern "C" fn preset_create_launcher_api<T: PluginPresetConfig + ComClass>(
    this: *mut RawIface,
    out: *mut *mut RawIface,
) -> i32 {
    guarded(|| {
        require_out(out)?;
        out.write(std::ptr::null_mut());
        let obj = require_object::<T>(this)?;
        out.write(obj.value().create_launcher_api()?.into_raw());
        Ok(())
    })
}

unsafe extern "C" fn preset_create_game_manager<T: PluginPresetConfig + ComClass>(
    this: *mut RawIface,
    out: *mut *mut RawIface,
) -> i32 {
    guarded(|| {
        require_out(out)?;
        out.write(std::ptr::null_mut());
        let obj = require_object::<T>(this)?;
        out.write(obj.value().create_game_manager()?.into_raw());
        Ok(())
    })
}

pub fn preset_config_vtable<T: ComClass + PluginPresetConfig>() -> &'static Vtable {
    vtable_of::<T>(InterfaceId::PLUGIN_PRESET_CONFIG, || {
        let vt = VtableBuilder::derive(initializable_task_vtable::<T>())
            .push(preset_game_name::<T> as Slot)
            .push(preset_zone_name::<T> as Slot)
            .push(preset_create_launcher_api::<T> as Slot)
            .push(preset_create_game_manager::<T> as Slot)
            .finish(InterfaceId::PLUGIN_PRESET_CONFIG);
        debug_assert_eq!(vt.len(), contract::preset_config::SLOT_COUNT);
        vt
    })
}

pub fn preset_config_identities<T: ComClass + PluginPresetConfig>(
) -> Vec<(InterfaceId, &'static Vtable)> {
    let mut ids = vec![(InterfaceId::PLUGIN_PRESET_CONFIG, preset_config_vtable::<T>())];
    ids.extend(task_identities::<T>());
    ids
}

// =============================================================================
// GameManager — slots 5..=7
// =============================================================================

unsafe extern "C" fn manager_installed_version<T: GameManager + ComClass>(
    this: *mut RawIface,
    out: *mut StandardVersion,
) -> i32 {
    guarded(|| {
        require_out(out)?;
        let obj = require_object::<T>(this)?;
        out.write(obj.value().installed_version()?);
        Ok(())
    })
}

unsafe extern "C" fn manager_is_installed<T: GameManager + ComClass>(
    this: *mut RawIface,
    out: *mut u8,
) -> i32 {
    guarded(|| {
        require_out(out)?;
        let obj = require_object::<T>(this)?;
        out.write(obj.value().is_installed() as u8);
        Ok(())
    })
}

unsafe extern "C" fn manager_load_state_async<T: GameManager + ComClass>(
    this: *mut RawIface,
    token: *const CancelToken,
    out: *mut *mut AsyncResult,
) -> i32 {
    guarded(|| start_async::<T, u8>(this, token, out, |obj, cancel| obj.load_state(cancel)))
}

pub fn game_manager_vtable<T: ComClass + GameManager>() -> &'static Vtable {
    vtable_of::<T>(InterfaceId::GAME_MANAGER, || {
        let vt = VtableBuilder::derive(initializable_task_vtable::<T>())
            .push(manager_installed_version::<T> as Slot)
            .push(manager_is_installed::<T> as Slot)
            .push(manager_load_state_async::<T> as Slot)
            .finish(InterfaceId::GAME_MANAGER);
        debug_assert_eq!(vt.len(), contract::game_manager::SLOT_COUNT);
        vt
    })
}

pub fn game_manager_identities<T: ComClass + GameManager>(
) -> Vec<(InterfaceId, &'static Vtable)> {
    let mut ids = vec![(InterfaceId::GAME_MANAGER, game_manager_vtable::<T>())];
    ids.extend(task_identities::<T>());
    ids
}

// =============================================================================
// LauncherApi family — slot 5, then media/news at slot 6
// =============================================================================

unsafe extern "C" fn api_base_url<T: LauncherApi + ComClass>(
    this: *mut RawIface,
    out: *mut MemorySpan,
) -> i32 {
    guarded(|| {
        require_out(out)?;
        let obj = require_object::<T>(this)?;
        out.write(MemorySpan::copy_from_str(&obj.value().base_url()));
        Ok(())
    })
}

unsafe extern "C" fn api_background_entries<T: LauncherApiMedia + ComClass>(
    this: *mut RawIface,
    token: *const CancelToken,
    out: *mut *mut AsyncResult,
) -> i32 {
    guarded(|| {
        start_async::<T, MemorySpan>(this, token, out, |obj, cancel| {
            obj.background_entries(cancel)
        })
    })
}

unsafe extern "C" fn api_news_entries<T: LauncherApiNews + ComClass>(
    this: *mut RawIface,
    token: *const CancelToken,
    out: *mut *mut AsyncResult,
) -> i32 {
    guarded(|| start_async::<T, MemorySpan>(this, token, out, |obj, cancel| obj.news_entries(cancel)))
}

pub fn launcher_api_vtable<T: ComClass + LauncherApi>() -> &'static Vtable {
    vtable_of::<T>(InterfaceId::LAUNCHER_API, || {
        let vt = VtableBuilder::derive(initializable_task_vtable::<T>())
            .push(api_base_url::<T> as Slot)
            .finish(InterfaceId::LAUNCHER_API);
        debug_assert_eq!(vt.len(), contract::launcher_api::SLOT_COUNT);
        vt
    })
}

pub fn launcher_api_media_vtable<T: ComClass + LauncherApiMedia>() -> &'static Vtable {
    vtable_of::<T>(InterfaceId::LAUNCHER_API_MEDIA, || {
        let vt = VtableBuilder::derive(launcher_api_vtable::<T>())
            .push(api_background_entries::<T> as Slot)
            .finish(InterfaceId::LAUNCHER_API_MEDIA);
        debug_assert_eq!(vt.len(), contract::launcher_api_media::SLOT_COUNT);
        vt
    })
}

pub fn launcher_api_news_vtable<T: ComClass + LauncherApiNews>() -> &'static Vtable {
    vtable_of::<T>(InterfaceId::LAUNCHER_API_NEWS, || {
        let vt = VtableBuilder::derive(launcher_api_vtable::<T>())
            .push(api_news_entries::<T> as Slot)
            .finish(InterfaceId::LAUNCHER_API_NEWS);
        debug_assert_eq!(vt.len(), contract::launcher_api_news::SLOT_COUNT);
        vt
    })
}

pub fn launcher_api_media_identities<T: ComClass + LauncherApiMedia>(
) -> Vec<(InterfaceId, &'static Vtable)> {
    let mut ids = vec![
        (InterfaceId::LAUNCHER_API_MEDIA, launcher_api_media_vtable::<T>()),
        (InterfaceId::LAUNCHER_API, launcher_api_vtable::<T>()),
    ];
    ids.extend(task_identities::<T>());
    ids
}

pub fn launcher_api_news_identities<T: ComClass + LauncherApiNews>(
) -> Vec<(InterfaceId, &'static Vtable)> {
    let mut ids = vec![
        (InterfaceId::LAUNCHER_API_NEWS, launcher_api_news_vtable::<T>()),
        (InterfaceId::LAUNCHER_API, launcher_api_vtable::<T>()),
    ];
    ids.extend(task_identities::<T>());
    ids
}

// =============================================================================
// PluginSelfUpdate — slot 5
// =============================================================================

unsafe extern "C" fn self_update_check<T: PluginSelfUpdate + ComClass>(
    this: *mut RawIface,
    token: *const CancelToken,
    out: *mut *mut AsyncResult,
) -> i32 {
    guarded(|| start_async::<T, u8>(this, token, out, |obj, cancel| obj.check_update(cancel)))
}

pub fn self_update_vtable<T: ComClass + PluginSelfUpdate>() -> &'static Vtable {
    vtable_of::<T>(InterfaceId::PLUGIN_SELF_UPDATE, || {
        let vt = VtableBuilder::derive(initializable_task_vtable::<T>())
            .push(self_update_check::<T> as Slot)
            .finish(InterfaceId::PLUGIN_SELF_UPDATE);
        debug_assert_eq!(vt.len(), contract::self_update::SLOT_COUNT);
        vt
    })
}

pub fn self_update_identities<T: ComClass + PluginSelfUpdate>(
) -> Vec<(InterfaceId, &'static Vtable)> {
    let mut ids = vec![(InterfaceId::PLUGIN_SELF_UPDATE, self_update_vtable::<T>())];
    ids.extend(task_identities::<T>());
    ids
}

// =============================================================================
// GameUninstaller / GameInstaller — slots 5, then 6..=7
// =============================================================================

unsafe extern "C" fn uninstall_async<T: GameUninstaller + ComClass>(
    this: *mut RawIface,
    token: *const CancelToken,
    out: *mut *mut AsyncResult,
) -> i32 {
    guarded(|| start_async::<T, ()>(this, token, out, |obj, cancel| obj.uninstall(cancel)))
}

unsafe extern "C" fn install_async<T: GameInstaller + ComClass>(
    this: *mut RawIface,
    token: *const CancelToken,
    out: *mut *mut AsyncResult,
) -> i32 {
    guarded(|| start_async::<T, ()>(this, token, out, |obj, cancel| obj.install(cancel)))
}

unsafe extern "C" fn update_async<T: GameInstaller + ComClass>(
    this: *mut RawIface,
    token: *const CancelToken,
    out: *mut *mut AsyncResult,
) -> i32 {
    guarded(|| start_async::<T, ()>(this, token, out, |obj, cancel| obj.update(cancel)))
}

pub fn game_uninstaller_vtable<T: ComClass + GameUninstaller>() -> &'static Vtable {
    vtable_of::<T>(InterfaceId::GAME_UNINSTALLER, || {
        let vt = VtableBuilder::derive(initializable_task_vtable::<T>())
            .push(uninstall_async::<T> as Slot)
            .finish(InterfaceId::GAME_UNINSTALLER);
        debug_assert_eq!(vt.len(), contract::game_uninstaller::SLOT_COUNT);
        vt
    })
}

pub fn game_installer_vtable<T: ComClass + GameInstaller>() -> &'static Vtable {
    vtable_of::<T>(InterfaceId::GAME_INSTALLER, || {
        let vt = VtableBuilder::derive(game_uninstaller_vtable::<T>())
            .push(install_async::<T> as Slot)
            .push(update_async::<T> as Slot)
            .finish(InterfaceId::GAME_INSTALLER);
        debug_assert_eq!(vt.len(), contract::game_installer::SLOT_COUNT);
        vt
    })
}

pub fn game_uninstaller_identities<T: ComClass + GameUninstaller>(
) -> Vec<(InterfaceId, &'static Vtable)> {
    let mut ids = vec![(InterfaceId::GAME_UNINSTALLER, game_uninstaller_vtable::<T>())];
    ids.extend(task_identities::<T>());
    ids
}

pub fn game_installer_identities<T: ComClass + GameInstaller>(
) -> Vec<(InterfaceId, &'static Vtable)> {
    let mut ids = vec![
        (InterfaceId::GAME_INSTALLER, game_installer_vtable::<T>()),
        (InterfaceId::GAME_UNINSTALLER, game_uninstaller_vtable::<T>()),
    ];
    ids.extend(task_identities::<T>());
    ids
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vault::CancelSource;

    struct FakeInstaller;

    impl Free for FakeInstaller {}
    impl InitializableTask for FakeInstaller {
        fn init(&self, _cancel: &CancelSource) -> Result<(), AbiError> {
            Ok(())
        }
    }
    impl GameUninstaller for FakeInstaller {
        fn uninstall(&self, _cancel: &CancelSource) -> Result<(), AbiError> {
            Ok(())
        }
    }
    impl GameInstaller for FakeInstaller {
        fn install(&self, _cancel: &CancelSource) -> Result<(), AbiError> {
            Ok(())
        }
        fn update(&self, _cancel: &CancelSource) -> Result<(), AbiError> {
            Ok(())
        }
    }
    impl ComClass for FakeInstaller {
        fn identities() -> Vec<(InterfaceId, &'static Vtable)> {
            game_installer_identities::<FakeInstaller>()
        }
    }

    #[test]
    fn four_level_prefix_is_byte_identical() {
        // GameInstaller ← GameUninstaller ← InitializableTask ← Free
        let free = free_vtable::<FakeInstaller>();
        let task = initializable_task_vtable::<FakeInstaller>();
        let uninstaller = game_uninstaller_vtable::<FakeInstaller>();
        let installer = game_installer_vtable::<FakeInstaller>();

        // Identity triplet + free slot identical across all four levels.
        for vt in [task, uninstaller, installer] {
            assert_eq!(&vt.slots()[..free.len()], free.slots());
        }
        // Each derived vtable embeds its immediate base as an exact prefix.
        assert_eq!(&uninstaller.slots()[..task.len()], task.slots());
        assert_eq!(&installer.slots()[..uninstaller.len()], uninstaller.slots());

        // Own slots start exactly at the base's slot count.
        assert_eq!(free.len(), contract::free::SLOT_COUNT);
        assert_eq!(task.len(), contract::initializable_task::SLOT_COUNT);
        assert_eq!(uninstaller.len(), contract::game_uninstaller::SLOT_COUNT);
        assert_eq!(installer.len(), contract::game_installer::SLOT_COUNT);
        assert_ne!(
            uninstaller.slots()[contract::game_uninstaller::SLOT_UNINSTALL_ASYNC],
            installer.slots()[contract::game_installer::SLOT_INSTALL_ASYNC],
        );
    }

    #[test]
    fn null_dispatch_pointer_is_a_status_not_a_crash() {
        let mut out: *mut AsyncResult = std::ptr::null_mut();
        let code = unsafe {
            init_async::<FakeInstaller>(std::ptr::null_mut(), std::ptr::null(), &mut out)
        };
        assert_ne!(code, status::OK);
        assert!(out.is_null());
    }

    #[test]
    fn null_out_pointer_is_rejected() {
        let handle = crate::object::expose(FakeInstaller);
        let code = unsafe {
            uninstall_async::<FakeInstaller>(handle.as_raw(), std::ptr::null(), std::ptr::null_mut())
        };
        assert_eq!(code, status::NULL_DISPATCH);
        drop(handle);
    }
}
