//! Rust-native interface traits.
//!
//! These are the seams plugin authors implement. The dispatch layer turns
//! each trait into a fixed-layout vtable; inside the plugin it's all plain
//! trait calls, and nothing here is `unsafe`.
//!
//! The hierarchy mirrors the interface contract (single inheritance only):
//!
//! ```text
//! Free
//!  └─ InitializableTask
//!      ├─ Plugin
//!      ├─ PluginPresetConfig
//!      ├─ GameManager
//!      ├─ LauncherApi ── LauncherApiMedia
//!      │              └─ LauncherApiNews
//!      ├─ PluginSelfUpdate
//!      └─ GameUninstaller ── GameInstaller
//! ```
//!
//! Methods taking a [`CancelSource`] are the asynchronous operations: the
//! dispatch layer runs them on a worker thread and hands the caller an
//! async-result handle; the body just does blocking work and checks the
//! source at its checkpoints.

use keel_abi::error::AbiError;
use keel_abi::iface::InterfaceId;
use keel_abi::memory::MemorySpan;
use keel_abi::version::StandardVersion;

use crate::object::IfaceHandle;
use crate::vault::CancelSource;
use crate::vtable::Vtable;

/// Base of everything: release whatever resources the object holds beyond
/// its own allocation. Called through slot 3; the object stays allocated
/// (and refcounted) after.
pub trait Free: Send + Sync + 'static {
    fn free(&self) {}
}

/// An object that performs asynchronous initialization before first use.
pub trait InitializableTask: Free {
    fn init(&self, cancel: &CancelSource) -> Result<(), AbiError>;
}

/// The root interface the host obtains from the `keel_get_plugin` export.
pub trait Plugin: InitializableTask {
    fn name(&self) -> String;
    fn description(&self) -> String;
    /// Process-wide locale for user-facing strings. BCP-47 tag.
    fn set_locale(&self, locale: &str);
    fn preset_config_count(&self) -> u32;
    /// Create (or hand out) the preset config at `index`.
    fn preset_config(&self, index: u32) -> Result<IfaceHandle, AbiError>;
}

/// One preconfigured game/zone the plugin can manage.
pub trait PluginPresetConfig: InitializableTask {
    fn game_name(&self) -> String;
    fn zone_name(&self) -> String;
    fn create_launcher_api(&self) -> Result<IfaceHandle, AbiError>;
    fn create_game_manager(&self) -> Result<IfaceHandle, AbiError>;
}

/// Install-state codes returned by [`GameManager::load_state`].
pub mod game_state {
    pub const NOT_INSTALLED: u8 = 0;
    pub const INSTALLED: u8 = 1;
    pub const UPDATE_AVAILABLE: u8 = 2;
    pub const BROKEN: u8 = 3;
}

pub trait GameManager: InitializableTask {
    fn installed_version(&self) -> Result<StandardVersion, AbiError>;
    fn is_installed(&self) -> bool;
    /// Async: probe the installation and return a `game_state` code.
    fn load_state(&self, cancel: &CancelSource) -> Result<u8, AbiError>;
}

pub trait LauncherApi: InitializableTask {
    fn base_url(&self) -> String;
}

/// Background/media feed. Async payloads are serialized documents in an
/// owned span; the schema is the plugin's business, not the ABI's.
pub trait LauncherApiMedia: LauncherApi {
    fn background_entries(&self, cancel: &CancelSource) -> Result<MemorySpan, AbiError>;
}

pub trait LauncherApiNews: LauncherApi {
    fn news_entries(&self, cancel: &CancelSource) -> Result<MemorySpan, AbiError>;
}

/// Outcome codes for [`PluginSelfUpdate::check_update`].
pub mod self_update {
    pub const UP_TO_DATE: u8 = 0;
    pub const UPDATED: u8 = 1;
    pub const RESTART_REQUIRED: u8 = 2;
}

pub trait PluginSelfUpdate: InitializableTask {
    fn check_update(&self, cancel: &CancelSource) -> Result<u8, AbiError>;
}

pub trait GameUninstaller: InitializableTask {
    fn uninstall(&self, cancel: &CancelSource) -> Result<(), AbiError>;
}

pub trait GameInstaller: GameUninstaller {
    fn install(&self, cancel: &CancelSource) -> Result<(), AbiError>;
    fn update(&self, cancel: &CancelSource) -> Result<(), AbiError>;
}

/// What a concrete type exposes to the dispatch layer: the ordered set of
/// interface identities it answers to (own kind first, ancestors after,
/// `FREE` last), each paired with the vtable built for this type.
///
/// Implementations normally delegate to the assembly helpers in
/// [`crate::dispatch`]:
///
/// ```rust,ignore
/// impl ComClass for MyPlugin {
///     fn identities() -> Vec<(InterfaceId, &'static Vtable)> {
///         dispatch::plugin_identities::<MyPlugin>()
///     }
/// }
/// ```
pub trait ComClass: Send + Sync + Sized + 'static {
    fn identities() -> Vec<(InterfaceId, &'static Vtable)>;
}
