//! Plugin registry: builds plugins from their config entries by type name.

use std::collections::HashMap;

use tracing::{info, warn};

use abylebot_core::config::PluginConfig;
use abylebot_core::{ConfigError, Plugin};

use crate::echo::{self, EchoConfig, EchoPlugin};
use crate::version::{self, VersionPlugin};

/// Builds one plugin from a validated config entry.
pub type PluginFactory = fn(&PluginConfig) -> Result<Box<dyn Plugin>, ConfigError>;

// ─────────────────────────────────────────────
// Registry
// ─────────────────────────────────────────────

/// Plugin factories keyed by plugin type.
pub struct PluginRegistry {
    factories: HashMap<String, PluginFactory>,
}

impl PluginRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    /// Registry holding the built-in plugins.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register(echo::PLUGIN_TYPE, build_echo);
        registry.register(version::PLUGIN_TYPE, build_version);
        registry
    }

    /// Register a factory. Overwrites any previous one for the same type.
    pub fn register(&mut self, plugin_type: &str, factory: PluginFactory) {
        if self.factories.insert(plugin_type.to_string(), factory).is_some() {
            warn!(plugin = plugin_type, "plugin factory replaced");
        }
    }

    pub fn has(&self, plugin_type: &str) -> bool {
        self.factories.contains_key(plugin_type)
    }

    /// Registered plugin types, sorted for determinism.
    pub fn plugin_types(&self) -> Vec<String> {
        let mut types: Vec<String> = self.factories.keys().cloned().collect();
        types.sort();
        types
    }

    /// Parse and validate `config`, then build the plugin.
    pub fn build(&self, config: &PluginConfig) -> Result<Box<dyn Plugin>, ConfigError> {
        let factory = self
            .factories
            .get(&config.plugin_type)
            .ok_or_else(|| ConfigError::UnknownPluginType(config.plugin_type.clone()))?;
        let plugin = factory(config)?;
        info!(plugin = %config.plugin_type, "plugin built");
        Ok(plugin)
    }
}

impl Default for PluginRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

fn build_echo(config: &PluginConfig) -> Result<Box<dyn Plugin>, ConfigError> {
    Ok(Box::new(EchoPlugin::new(EchoConfig::parse(config)?)))
}

fn build_version(config: &PluginConfig) -> Result<Box<dyn Plugin>, ConfigError> {
    Ok(Box::new(VersionPlugin::from_config(config)?))
}

/// Build a built-in plugin from its config entry.
pub fn build_plugin(config: &PluginConfig) -> Result<Box<dyn Plugin>, ConfigError> {
    PluginRegistry::with_builtins().build(config)
}
