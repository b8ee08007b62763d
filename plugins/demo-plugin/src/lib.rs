//! Demo keel plugin: one fictional game ("Starfall"), two zones, the full
//! interface surface. Every async operation does a short slice of fake
//! work with cancellation checkpoints between slices, so the plugin is
//! useful for exercising hosts end to end.

use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::time::Duration;

use serde::Serialize;

use keel::abi::error::AbiError;
use keel::abi::iface::InterfaceId;
use keel::abi::memory::MemorySpan;
use keel::abi::version::StandardVersion;
use keel::dispatch;
use keel::traits::{game_state, self_update, *};
use keel::vault::CancelSource;
use keel::vtable::Vtable;
use keel::{expose, IfaceHandle};

keel::declare_plugin! {
    plugin: DemoPlugin,
    version: (1, 4, 2, 0),
    create: DemoPlugin::new,
}

/// Fake work: `steps` slices of `step` sleep, a checkpoint between each.
fn busy(cancel: &CancelSource, steps: u32, step: Duration) -> Result<(), AbiError> {
    for _ in 0..steps {
        cancel.checkpoint()?;
        if cancel.wait_cancelled(step) {
            cancel.checkpoint()?;
        }
    }
    cancel.checkpoint()
}

fn json_span<T: Serialize>(value: &T) -> Result<MemorySpan, AbiError> {
    let text = serde_json::to_string(value)
        .map_err(|e| AbiError::generic(format!("payload serialization failed: {e}")))?;
    Ok(MemorySpan::copy_from_str(&text))
}

// =============================================================================
// Root plugin
// =============================================================================

pub struct DemoPlugin;

impl DemoPlugin {
    pub fn new() -> Self {
        // Runs once, on the first `keel_get_plugin` call; the right moment
        // to publish named capabilities.
        register_exports();
        DemoPlugin
    }
}

impl Default for DemoPlugin {
    fn default() -> Self {
        Self::new()
    }
}

impl Free for DemoPlugin {}

impl InitializableTask for DemoPlugin {
    fn init(&self, cancel: &CancelSource) -> Result<(), AbiError> {
        log::info!("demo plugin initializing");
        busy(cancel, 2, Duration::from_millis(5))
    }
}

const ZONES: [(&str, &str); 2] = [("Starfall", "Europe"), ("Starfall", "Americas")];

impl Plugin for DemoPlugin {
    fn name(&self) -> String {
        "Starfall Launcher Plugin".into()
    }

    fn description(&self) -> String {
        "Manages Starfall installations and launcher feeds".into()
    }

    fn set_locale(&self, locale: &str) {
        log::debug!("locale set to {locale}");
    }

    fn preset_config_count(&self) -> u32 {
        ZONES.len() as u32
    }

    fn preset_config(&self, index: u32) -> Result<IfaceHandle, AbiError> {
        let (game, zone) = ZONES
            .get(index as usize)
            .copied()
            .ok_or_else(|| AbiError::argument_out_of_range("index"))?;
        Ok(expose(DemoPreset { game, zone }))
    }
}

impl ComClass for DemoPlugin {
    fn identities() -> Vec<(InterfaceId, &'static Vtable)> {
        dispatch::plugin_identities::<DemoPlugin>()
    }
}

// =============================================================================
// Preset config
// =============================================================================

struct DemoPreset {
    game: &'static str,
    zone: &'static str,
}

impl Free for DemoPreset {}

impl InitializableTask for DemoPreset {
    fn init(&self, cancel: &CancelSource) -> Result<(), AbiError> {
        busy(cancel, 1, Duration::from_millis(2))
    }
}

impl PluginPresetConfig for DemoPreset {
    fn game_name(&self) -> String {
        self.game.into()
    }

    fn zone_name(&self) -> String {
        self.zone.into()
    }

    fn create_launcher_api(&self) -> Result<IfaceHandle, AbiError> {
        Ok(expose(DemoLauncherApi { zone: self.zone }))
    }

    fn create_game_manager(&self) -> Result<IfaceHandle, AbiError> {
        Ok(expose(DemoGameManager::new()))
    }
}

impl ComClass for DemoPreset {
    fn identities() -> Vec<(InterfaceId, &'static Vtable)> {
        dispatch::preset_config_identities::<DemoPreset>()
    }
}

// =============================================================================
// Game manager + installer
// =============================================================================

struct DemoGameManager {
    installed: AtomicBool,
    state: AtomicU8,
}

impl DemoGameManager {
    fn new() -> Self {
        Self {
            installed: AtomicBool::new(true),
            state: AtomicU8::new(game_state::UPDATE_AVAILABLE),
        }
    }
}

impl Free for DemoGameManager {}

impl InitializableTask for DemoGameManager {
    fn init(&self, cancel: &CancelSource) -> Result<(), AbiError> {
        busy(cancel, 1, Duration::from_millis(2))
    }
}

impl GameManager for DemoGameManager {
    fn installed_version(&self) -> Result<StandardVersion, AbiError> {
        if self.installed.load(Ordering::Relaxed) {
            Ok(StandardVersion::new(3, 1, 0, 4821))
        } else {
            Err(AbiError::invalid_operation("game is not installed"))
        }
    }

    fn is_installed(&self) -> bool {
        self.installed.load(Ordering::Relaxed)
    }

    fn load_state(&self, cancel: &CancelSource) -> Result<u8, AbiError> {
        busy(cancel, 3, Duration::from_millis(10))?;
        Ok(self.state.load(Ordering::Relaxed))
    }
}

impl GameUninstaller for DemoGameManager {
    fn uninstall(&self, cancel: &CancelSource) -> Result<(), AbiError> {
        busy(cancel, 5, Duration::from_millis(10))?;
        self.installed.store(false, Ordering::Relaxed);
        self.state.store(game_state::NOT_INSTALLED, Ordering::Relaxed);
        Ok(())
    }
}

impl GameInstaller for DemoGameManager {
    fn install(&self, cancel: &CancelSource) -> Result<(), AbiError> {
        busy(cancel, 10, Duration::from_millis(10))?;
        self.installed.store(true, Ordering::Relaxed);
        self.state.store(game_state::INSTALLED, Ordering::Relaxed);
        Ok(())
    }

    fn update(&self, cancel: &CancelSource) -> Result<(), AbiError> {
        if !self.installed.load(Ordering::Relaxed) {
            return Err(AbiError::invalid_operation("nothing installed to update"));
        }
        busy(cancel, 6, Duration::from_millis(10))?;
        self.state.store(game_state::INSTALLED, Ordering::Relaxed);
        Ok(())
    }
}

impl ComClass for DemoGameManager {
    fn identities() -> Vec<(InterfaceId, &'static Vtable)> {
        // One object, two lineages: manager for state, installer for
        // install/update/uninstall.
        let mut ids = dispatch::game_manager_identities::<DemoGameManager>();
        let installer = dispatch::game_installer_identities::<DemoGameManager>();
        for (iid, vt) in installer {
            if !ids.iter().any(|(existing, _)| *existing == iid) {
                ids.push((iid, vt));
            }
        }
        ids
    }
}

// =============================================================================
// Launcher API: media + news feeds
// =============================================================================

#[derive(Serialize)]
struct MediaEntry {
    url: &'static str,
    kind: &'static str,
}

#[derive(Serialize)]
struct NewsEntry {
    title: String,
    url: &'static str,
}

struct DemoLauncherApi {
    zone: &'static str,
}

impl Free for DemoLauncherApi {}

impl InitializableTask for DemoLauncherApi {
    fn init(&self, cancel: &CancelSource) -> Result<(), AbiError> {
        busy(cancel, 1, Duration::from_millis(2))
    }
}

impl LauncherApi for DemoLauncherApi {
    fn base_url(&self) -> String {
        format!("https://launcher.starfall.example/{}", self.zone.to_lowercase())
    }
}

impl LauncherApiMedia for DemoLauncherApi {
    fn background_entries(&self, cancel: &CancelSource) -> Result<MemorySpan, AbiError> {
        busy(cancel, 2, Duration::from_millis(5))?;
        json_span(&[
            MediaEntry { url: "backgrounds/nebula.webm", kind: "video" },
            MediaEntry { url: "backgrounds/station.png", kind: "image" },
        ])
    }
}

impl LauncherApiNews for DemoLauncherApi {
    fn news_entries(&self, cancel: &CancelSource) -> Result<MemorySpan, AbiError> {
        busy(cancel, 2, Duration::from_millis(5))?;
        json_span(&[NewsEntry {
            title: format!("Maintenance window for {}", self.zone),
            url: "news/maintenance",
        }])
    }
}

impl ComClass for DemoLauncherApi {
    fn identities() -> Vec<(InterfaceId, &'static Vtable)> {
        let mut ids = dispatch::launcher_api_media_identities::<DemoLauncherApi>();
        for (iid, vt) in dispatch::launcher_api_news_identities::<DemoLauncherApi>() {
            if !ids.iter().any(|(existing, _)| *existing == iid) {
                ids.push((iid, vt));
            }
        }
        ids
    }
}

// =============================================================================
// Self update
// =============================================================================

struct DemoSelfUpdate;

impl Free for DemoSelfUpdate {}

impl InitializableTask for DemoSelfUpdate {
    fn init(&self, _cancel: &CancelSource) -> Result<(), AbiError> {
        Ok(())
    }
}

impl PluginSelfUpdate for DemoSelfUpdate {
    fn check_update(&self, cancel: &CancelSource) -> Result<u8, AbiError> {
        busy(cancel, 2, Duration::from_millis(5))?;
        Ok(self_update::UP_TO_DATE)
    }
}

impl ComClass for DemoSelfUpdate {
    fn identities() -> Vec<(InterfaceId, &'static Vtable)> {
        dispatch::self_update_identities::<DemoSelfUpdate>()
    }
}

/// Extra capability exposed through the named export table.
unsafe extern "C" fn get_self_update(out: *mut *mut keel::abi::iface::RawIface) -> i32 {
    if out.is_null() {
        return keel::abi::status::NULL_DISPATCH;
    }
    out.write(expose(DemoSelfUpdate).into_raw());
    keel::abi::status::OK
}

fn register_exports() {
    keel::exports::register_export(
        "starfall.self-update",
        get_self_update as keel::abi::iface::Slot,
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(serde::Deserialize)]
    struct OwnedNewsEntry {
        title: String,
        url: String,
    }

    #[test]
    fn news_feed_is_valid_json() {
        let api = DemoLauncherApi { zone: "Europe" };
        let source = CancelSource::new();
        let mut span = api.news_entries(&source).unwrap();
        let entries: Vec<OwnedNewsEntry> = serde_json::from_str(span.to_str().unwrap()).unwrap();
        assert_eq!(entries.len(), 1);
        assert!(entries[0].title.contains("Europe"));
        assert_eq!(entries[0].url, "news/maintenance");
        span.dispose();
    }

    #[test]
    fn uninstall_then_update_is_an_invalid_operation() {
        let manager = DemoGameManager::new();
        let source = CancelSource::new();
        manager.uninstall(&source).unwrap();
        assert!(!manager.is_installed());
        let err = manager.update(&source).unwrap_err();
        assert_eq!(err.kind.tag(), "invalid-operation");
    }

    #[test]
    fn cancelled_install_stops_at_a_checkpoint() {
        let manager = DemoGameManager::new();
        manager.uninstall(&CancelSource::new()).unwrap();
        let source = CancelSource::new();
        source.cancel();
        let err = manager.install(&source).unwrap_err();
        assert_eq!(err.kind.tag(), "cancelled");
        // A cancelled install must not flip the installed flag.
        assert!(!manager.is_installed());
    }
}
