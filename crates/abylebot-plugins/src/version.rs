//! `version` plugin: `!version` answers with the running version.

use async_trait::async_trait;
use tracing::warn;

use abylebot_core::config::PluginConfig;
use abylebot_core::{ConfigError, Outlet, Plugin, ReceiveMessage};

use crate::config::{expect_type, warn_unknown_keys, PluginAccess};

pub const PLUGIN_TYPE: &str = "version";
const TRIGGER: &str = "!version";

pub fn version_string() -> String {
    format!("abylebot {}", env!("CARGO_PKG_VERSION"))
}

pub struct VersionPlugin {
    access: PluginAccess,
}

impl VersionPlugin {
    pub fn new(access: PluginAccess) -> Self {
        Self { access }
    }

    pub fn from_config(config: &PluginConfig) -> Result<Self, ConfigError> {
        expect_type(config, PLUGIN_TYPE)?;
        warn_unknown_keys(PLUGIN_TYPE, &config.config, &PluginAccess::KEYS);
        Ok(Self::new(PluginAccess::from_config(&config.config)?))
    }
}

#[async_trait]
impl Plugin for VersionPlugin {
    fn name(&self) -> &str {
        PLUGIN_TYPE
    }

    async fn on_post(&mut self, outlet: &Outlet, msg: &ReceiveMessage) {
        if !msg.content().trim().starts_with(TRIGGER) || !self.access.permits(msg) {
            return;
        }
        if let Err(e) = outlet.send(msg.reply(version_string())).await {
            warn!(error = %e, "version reply dropped, bot stopped");
        }
    }
}
