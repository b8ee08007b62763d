//! Keel Host
//!
//! Loads plugin cdylibs and talks to them over the flat ABI: fixed
//! exports resolved with `dlsym`, per-interface vtable slots called
//! through typed fn pointers, async operations driven through owned
//! result handles.
//!
//! Typical session:
//!
//! ```rust,ignore
//! let lib = PluginLibrary::load(Path::new("libdemo_plugin.so"))?;
//! let plugin = lib.plugin()?;
//! plugin.init_blocking(Duration::from_secs(5))?;
//! let preset = plugin.preset_config(0)?;
//! let manager = preset.create_game_manager()?;
//! let state = manager.load_state()?.wait()?;
//! ```

pub mod awaiter;
pub mod error;
pub mod iface;
pub mod loader;

pub use awaiter::OwnedAsyncResult;
pub use error::HostError;
pub use iface::{
    GameInstallerRef, GameManagerRef, GameUninstallerRef, IfaceRef, LauncherApiMediaRef,
    LauncherApiNewsRef, LauncherApiRef, PluginRef, PresetConfigRef, SelfUpdateRef,
};
pub use loader::PluginLibrary;
