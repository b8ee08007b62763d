//! In-process end-to-end tests: objects exposed through the plugin SDK,
//! driven through the host's typed wrappers over real vtable slots. The
//! call path is identical to the `dlopen` case — flat calls through fn
//! pointers — minus the dynamic linker.

use std::time::Duration;

use keel::abi::error::AbiError;
use keel::abi::iface::InterfaceId;
use keel::abi::memory::MemorySpan;
use keel::dispatch;
use keel::traits::{game_state, *};
use keel::vault::CancelSource;
use keel::vtable::Vtable;
use keel_host::{GameManagerRef, HostError, IfaceRef, PluginRef};

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Bridge: plugin-side handle into a host-side owned reference.
fn into_host_ref(handle: keel::IfaceHandle) -> IfaceRef {
    unsafe { IfaceRef::from_raw(handle.into_raw()) }
}

// =============================================================================
// Fixtures
// =============================================================================

#[derive(Clone, Copy)]
enum ManagerBehavior {
    Ready,
    Fail,
    WaitForCancel,
}

struct FixtureManager {
    behavior: ManagerBehavior,
}

impl Free for FixtureManager {}

impl InitializableTask for FixtureManager {
    fn init(&self, _cancel: &CancelSource) -> Result<(), AbiError> {
        Ok(())
    }
}

impl GameManager for FixtureManager {
    fn installed_version(&self) -> Result<keel::abi::version::StandardVersion, AbiError> {
        Ok(keel::abi::version::StandardVersion::new(2, 4, 1, 77))
    }

    fn is_installed(&self) -> bool {
        true
    }

    fn load_state(&self, cancel: &CancelSource) -> Result<u8, AbiError> {
        match self.behavior {
            ManagerBehavior::Ready => Ok(game_state::INSTALLED),
            ManagerBehavior::Fail => Err(AbiError::network(503, -11, "manifest fetch failed")
                .with_cause(AbiError::io(110, "connection timed out"))),
            ManagerBehavior::WaitForCancel => {
                cancel.wait_cancelled(Duration::from_secs(10));
                cancel.checkpoint()?;
                Ok(game_state::INSTALLED)
            }
        }
    }
}

impl ComClass for FixtureManager {
    fn identities() -> Vec<(InterfaceId, &'static Vtable)> {
        dispatch::game_manager_identities::<FixtureManager>()
    }
}

struct FixturePreset;

impl Free for FixturePreset {}

impl InitializableTask for FixturePreset {
    fn init(&self, _cancel: &CancelSource) -> Result<(), AbiError> {
        Ok(())
    }
}

impl PluginPresetConfig for FixturePreset {
    fn game_name(&self) -> String {
        "Test Game".into()
    }

    fn zone_name(&self) -> String {
        "EU".into()
    }

    fn create_launcher_api(&self) -> Result<keel::IfaceHandle, AbiError> {
        Err(AbiError::not_implemented("launcher api"))
    }

    fn create_game_manager(&self) -> Result<keel::IfaceHandle, AbiError> {
        Ok(keel::expose(FixtureManager { behavior: ManagerBehavior::Ready }))
    }
}

impl ComClass for FixturePreset {
    fn identities() -> Vec<(InterfaceId, &'static Vtable)> {
        dispatch::preset_config_identities::<FixturePreset>()
    }
}

struct FixturePlugin;

impl Free for FixturePlugin {}

impl InitializableTask for FixturePlugin {
    fn init(&self, _cancel: &CancelSource) -> Result<(), AbiError> {
        Ok(())
    }
}

impl Plugin for FixturePlugin {
    fn name(&self) -> String {
        "fixture".into()
    }

    fn description(&self) -> String {
        "host round-trip fixture".into()
    }

    fn set_locale(&self, _locale: &str) {}

    fn preset_config_count(&self) -> u32 {
        1
    }

    fn preset_config(&self, _index: u32) -> Result<keel::IfaceHandle, AbiError> {
        Ok(keel::expose(FixturePreset))
    }
}

impl ComClass for FixturePlugin {
    fn identities() -> Vec<(InterfaceId, &'static Vtable)> {
        dispatch::plugin_identities::<FixturePlugin>()
    }
}

fn manager(behavior: ManagerBehavior) -> GameManagerRef {
    GameManagerRef::new(into_host_ref(keel::expose(FixtureManager { behavior })))
}

// =============================================================================
// Tests
// =============================================================================

#[test]
fn plugin_surface_round_trips_through_slots() {
    init_logging();
    let plugin = PluginRef::new(into_host_ref(keel::expose(FixturePlugin)));
    plugin.init_blocking(Duration::from_secs(5)).unwrap();

    assert_eq!(plugin.name().unwrap(), "fixture");
    assert_eq!(plugin.description().unwrap(), "host round-trip fixture");
    plugin.set_locale("de-DE").unwrap();
    assert_eq!(plugin.preset_config_count().unwrap(), 1);

    let preset = plugin.preset_config(0).unwrap();
    assert_eq!(preset.game_name().unwrap(), "Test Game");
    assert_eq!(preset.zone_name().unwrap(), "EU");

    let manager = preset.create_game_manager().unwrap();
    manager.init_blocking(Duration::from_secs(5)).unwrap();
    assert!(manager.is_installed().unwrap());
    let version = manager.installed_version().unwrap();
    assert_eq!((version.major, version.build), (2, 77));

    let state = manager.load_state().unwrap().wait().unwrap();
    assert_eq!(state, game_state::INSTALLED);
}

#[test]
fn preset_index_out_of_range_is_an_error_status() {
    init_logging();
    let plugin = PluginRef::new(into_host_ref(keel::expose(FixturePlugin)));
    let err = plugin.preset_config(7).unwrap_err();
    assert!(matches!(err, HostError::Status(_)), "got {err:?}");
}

#[test]
fn unknown_interface_query_is_no_interface() {
    init_logging();
    let iface = into_host_ref(keel::expose(FixtureManager { behavior: ManagerBehavior::Ready }));
    // A manager is not a plugin.
    let err = PluginRef::from_iface(&iface).unwrap_err();
    assert!(matches!(err, HostError::NoInterface), "got {err:?}");
}

#[test]
fn fault_decodes_into_the_original_error_chain() {
    init_logging();
    let manager = manager(ManagerBehavior::Fail);
    let err = manager.load_state().unwrap().wait().unwrap_err();
    let HostError::Fault(fault) = err else {
        panic!("expected a fault, got {err:?}");
    };
    assert_eq!(fault.kind.tag(), "network");
    let cause = fault.cause.as_deref().expect("cause preserved");
    assert_eq!(cause.kind.tag(), "io");
    // Worker faults carry a captured backtrace.
    assert!(fault.backtrace.is_some());
}

#[test]
fn cancellation_surfaces_as_cancelled_not_fault() {
    init_logging();
    let plugin = PluginRef::new(into_host_ref(keel::expose(FixturePlugin)));
    let manager = manager(ManagerBehavior::WaitForCancel);

    let pending = manager.load_state().unwrap();
    let token = pending.token();
    // Cancellation by token goes through the process-wide vault, so any
    // root-interface reference can issue it.
    plugin.cancel_async(&token).unwrap();

    match pending.wait_timeout(Duration::from_secs(5)) {
        Ok(outcome) => {
            assert!(matches!(outcome, Err(HostError::Cancelled)), "got {outcome:?}");
        }
        Err(_still_pending) => panic!("cancelled operation never completed"),
    }
}

#[test]
fn dropping_handles_frees_only_after_the_signal() {
    init_logging();
    // Completed handle: the signal has fired, so an unwaited drop may free.
    let done = manager(ManagerBehavior::Ready).load_state().unwrap();
    while !done.is_complete() {
        std::thread::yield_now();
    }
    drop(done);

    // In-flight handle: the worker still owns the right to write into it,
    // so drop must leak rather than race the completion path.
    let pending = manager(ManagerBehavior::WaitForCancel).load_state().unwrap();
    let token = pending.token();
    drop(pending);
    // Let the abandoned worker finish promptly.
    let plugin = PluginRef::new(into_host_ref(keel::expose(FixturePlugin)));
    plugin.cancel_async(&token).unwrap();
}

#[test]
fn downcast_to_sibling_identity_shares_the_object() {
    init_logging();
    let iface = into_host_ref(keel::expose(FixtureManager { behavior: ManagerBehavior::Ready }));
    let as_manager = GameManagerRef::from_iface(&iface).unwrap();
    // Both references drive the same underlying object.
    assert!(as_manager.is_installed().unwrap());
    iface.free_resources().unwrap();
}

#[test]
fn span_payloads_transfer_ownership_to_the_waiter() {
    init_logging();
    // A worker that returns an owned span; the waiter reads and disposes it.
    struct Feed;
    impl Free for Feed {}
    impl InitializableTask for Feed {
        fn init(&self, _cancel: &CancelSource) -> Result<(), AbiError> {
            Ok(())
        }
    }
    impl LauncherApi for Feed {
        fn base_url(&self) -> String {
            "https://launcher.example.test".into()
        }
    }
    impl LauncherApiNews for Feed {
        fn news_entries(&self, _cancel: &CancelSource) -> Result<MemorySpan, AbiError> {
            Ok(MemorySpan::copy_from_str(r#"[{"title":"patch notes"}]"#))
        }
    }
    impl ComClass for Feed {
        fn identities() -> Vec<(InterfaceId, &'static Vtable)> {
            dispatch::launcher_api_news_identities::<Feed>()
        }
    }

    let news = keel_host::LauncherApiNewsRef::new(into_host_ref(keel::expose(Feed)));
    assert_eq!(news.base_url().unwrap(), "https://launcher.example.test");
    let mut span = news.news_entries().unwrap().wait().unwrap();
    assert_eq!(span.to_str().unwrap(), r#"[{"title":"patch notes"}]"#);
    span.dispose();
}
