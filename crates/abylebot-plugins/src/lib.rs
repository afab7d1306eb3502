//! Abylebot plugins: typed plugin config, reference plugins and the registry.
//!
//! - **config**: parsing helpers and [`PluginAccess`] (`mods` / `onlymods`)
//! - **echo**, **version**: reference plugins exercising the hook contract
//! - **registry**: builds plugins from [`PluginConfig`](abylebot_core::config::PluginConfig) entries

pub mod config;
pub mod echo;
pub mod registry;
pub mod version;

pub use config::PluginAccess;
pub use echo::{EchoConfig, EchoPlugin};
pub use registry::{build_plugin, PluginFactory, PluginRegistry};
pub use version::VersionPlugin;
