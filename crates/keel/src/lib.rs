//! Keel Plugin SDK
//!
//! This crate is the entry point for plugin authors. It is compiled as an
//! **rlib** — each plugin cdylib gets its own copy, including the
//! process-wide registries (token vault, export table, settings), which is
//! exactly right: those registries belong to the plugin, and the host
//! reaches them only through the plugin's fixed exports.
//!
//! # Architecture
//!
//! ```text
//! ┌────────────────────────────┐
//! │  Host (any toolchain)       │
//! │  dlopen + fixed exports     │
//! └──────────────┬─────────────┘
//!                │ flat calls: vtable slots, status codes
//! ┌──────────────▼─────────────┐
//! │  Plugin cdylib              │
//! │  ┌───────────────────────┐  │
//! │  │ keel (rlib)            │  │
//! │  │ dispatch / vault /     │  │
//! │  │ exports / spawn        │  │
//! │  └──────────┬────────────┘  │
//! │             │ trait calls    │
//! │  ┌──────────▼────────────┐  │
//! │  │ plugin business logic  │  │
//! │  └───────────────────────┘  │
//! └────────────────────────────┘
//! ```
//!
//! # What lives where
//!
//! | Module | Contains |
//! |--------|----------|
//! | `traits` | Rust-native interface traits (`Plugin`, `GameInstaller`, …) |
//! | `vtable` | Prefix-copy vtable construction and the build-once registry |
//! | `object` | `ComBox<T>`: refcounted multi-identity object wrapper |
//! | `dispatch` | extern "C" slot wrappers and per-interface vtable assembly |
//! | `spawn` | async-result worker spawn (token → cancel source → thread) |
//! | `vault` | the cancellation token vault |
//! | `exports` | named export table, process settings, `declare_plugin!` |
//! | `logging` | `log::Log` forwarding to the host's logger callback |

pub mod dispatch;
pub mod exports;
pub mod logging;
pub mod object;
pub mod spawn;
pub mod traits;
pub mod vault;
pub mod vtable;

pub use keel_abi as abi;

pub use object::{expose, IfaceHandle};
pub use traits::{
    ComClass, Free, GameInstaller, GameManager, GameUninstaller, InitializableTask,
    LauncherApi, LauncherApiMedia, LauncherApiNews, Plugin, PluginPresetConfig,
    PluginSelfUpdate,
};
pub use vault::CancelSource;
