//! Configuration schema: bots, plugins and dispatch tuning.
//!
//! Hierarchy: `Config` → `BotsConfig` (`DiscordConfig`, `SlackConfig`,
//! `MatrixConfig`), `Vec<PluginConfig>`, `DispatchConfig`.
//!
//! JSON on disk uses **camelCase** keys; Rust uses snake_case.
//! We use `#[serde(rename_all = "camelCase")]` to handle the conversion.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

// ─────────────────────────────────────────────
// Root Config
// ─────────────────────────────────────────────

/// Root configuration: loaded from `~/.abylebot/config.json` + env vars.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Config {
    pub bots: BotsConfig,
    pub plugins: Vec<PluginConfig>,
    pub dispatch: DispatchConfig,
}

// ─────────────────────────────────────────────
// Bots
// ─────────────────────────────────────────────

/// One section per supported backend.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BotsConfig {
    pub discord: DiscordConfig,
    pub slack: SlackConfig,
    pub matrix: MatrixConfig,
}

/// Discord backend config.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DiscordConfig {
    pub enabled: bool,
    /// Bot token from the Discord Developer Portal.
    pub token: String,
    /// REST API base URL.
    pub api_base: String,
    /// Gateway URL override. When empty, the URL returned by
    /// `GET /gateway/bot` is used.
    pub gateway_url: String,
}

impl Default for DiscordConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            token: String::new(),
            api_base: "https://discord.com/api/v10".to_string(),
            gateway_url: String::new(),
        }
    }
}

impl DiscordConfig {
    pub fn is_configured(&self) -> bool {
        !self.token.is_empty()
    }
}

/// Slack backend config (Socket Mode).
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SlackConfig {
    pub enabled: bool,
    /// Bot token (`xoxb-...`).
    pub bot_token: String,
    /// App-level token (`xapp-...`), required for Socket Mode.
    pub app_token: String,
    /// Web API base URL.
    pub api_base: String,
}

impl Default for SlackConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            bot_token: String::new(),
            app_token: String::new(),
            api_base: "https://slack.com/api".to_string(),
        }
    }
}

impl SlackConfig {
    pub fn is_configured(&self) -> bool {
        !self.bot_token.is_empty() && !self.app_token.is_empty()
    }
}

/// Matrix backend config (client-server API, `/sync` polling).
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MatrixConfig {
    pub enabled: bool,
    /// Homeserver base URL, e.g. `https://matrix.example.org`.
    pub server: String,
    pub username: String,
    pub password: String,
    /// Access token. When set, password login is skipped.
    pub token: String,
    /// Rooms joined right after login.
    pub rooms: Vec<String>,
    /// Pause between two `/sync` calls.
    pub poll_interval_ms: u64,
    /// Long-poll timeout passed to `/sync`.
    pub sync_timeout_ms: u64,
}

impl Default for MatrixConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            server: String::new(),
            username: String::new(),
            password: String::new(),
            token: String::new(),
            rooms: Vec::new(),
            poll_interval_ms: 1000,
            sync_timeout_ms: 30_000,
        }
    }
}

impl MatrixConfig {
    pub fn is_configured(&self) -> bool {
        !self.server.is_empty()
            && (!self.token.is_empty() || (!self.username.is_empty() && !self.password.is_empty()))
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn sync_timeout(&self) -> Duration {
        Duration::from_millis(self.sync_timeout_ms)
    }
}

// ─────────────────────────────────────────────
// Plugins
// ─────────────────────────────────────────────

/// One plugin entry. `config` stays loosely typed here; each plugin type
/// parses and validates it into its own typed struct.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PluginConfig {
    /// Plugin type, e.g. `"echo"` or `"version"`.
    #[serde(rename = "type")]
    pub plugin_type: String,
    /// Bots the plugin is attached to (`"discord"`, `"slack"`, `"matrix"`).
    /// Empty = every enabled bot.
    pub bots: Vec<String>,
    pub config: Map<String, Value>,
}

impl PluginConfig {
    pub fn new(plugin_type: impl Into<String>) -> Self {
        Self {
            plugin_type: plugin_type.into(),
            ..Default::default()
        }
    }

    /// Builder-style helper to set one config key.
    pub fn with(mut self, key: &str, value: Value) -> Self {
        self.config.insert(key.to_string(), value);
        self
    }

    /// Whether this plugin should be attached to the named bot.
    pub fn applies_to(&self, bot: &str) -> bool {
        self.bots.is_empty() || self.bots.iter().any(|b| b == bot)
    }
}

// ─────────────────────────────────────────────
// Dispatch
// ─────────────────────────────────────────────

/// Channel sizing and shutdown tuning shared by every bot.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DispatchConfig {
    /// Per-plugin inbound buffer. Messages beyond it are dropped.
    pub plugin_buffer_size: usize,
    pub send_buffer_size: usize,
    pub command_buffer_size: usize,
    /// Grace period for each plugin's `on_stop`.
    pub stop_grace_ms: u64,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            plugin_buffer_size: 32,
            send_buffer_size: 64,
            command_buffer_size: 16,
            stop_grace_ms: 5000,
        }
    }
}

impl DispatchConfig {
    pub fn stop_grace(&self) -> Duration {
        Duration::from_millis(self.stop_grace_ms)
    }
}
