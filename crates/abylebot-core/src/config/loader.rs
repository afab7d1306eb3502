//! Config loader: reads `~/.abylebot/config.json`, merges env vars, and
//! applies legacy migrations.
//!
//! # Loading precedence
//! 1. Defaults (from `Config::default()`)
//! 2. JSON file at `~/.abylebot/config.json`
//! 3. Environment variables `ABYLEBOT_<SECTION>__<FIELD>` (override JSON)

use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use super::schema::Config;

/// Backend sections that older config files kept at the top level.
const LEGACY_BOT_SECTIONS: [&str; 3] = ["discord", "slack", "matrix"];

/// Default config file path.
pub fn get_config_path() -> PathBuf {
    crate::utils::get_data_path().join("config.json")
}

/// Load configuration from the given path (or the default one) + env vars.
///
/// Falls back to `Config::default()` if the file doesn't exist or can't be parsed.
pub fn load_config(path: Option<&Path>) -> Config {
    let config_path = path
        .map(PathBuf::from)
        .unwrap_or_else(get_config_path);

    load_config_from_path(&config_path)
}

/// Load config from a specific file path.
fn load_config_from_path(path: &Path) -> Config {
    if !path.exists() {
        info!("No config file found at {}, using defaults", path.display());
        return apply_env_overrides(Config::default());
    }

    debug!("Loading config from {}", path.display());

    let content = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) => {
            warn!("Failed to read config file {}: {}", path.display(), e);
            return apply_env_overrides(Config::default());
        }
    };

    // Parse JSON → Value first for migration
    let mut raw: serde_json::Value = match serde_json::from_str(&content) {
        Ok(v) => v,
        Err(e) => {
            warn!("Failed to parse config JSON: {}", e);
            return apply_env_overrides(Config::default());
        }
    };

    migrate_config(&mut raw);

    let config: Config = match serde_json::from_value(raw) {
        Ok(c) => c,
        Err(e) => {
            warn!("Failed to deserialize config: {}", e);
            return apply_env_overrides(Config::default());
        }
    };

    apply_env_overrides(config)
}

/// Save configuration to disk (pretty-printed JSON with camelCase keys).
pub fn save_config(config: &Config, path: Option<&Path>) -> std::io::Result<()> {
    let config_path = path
        .map(PathBuf::from)
        .unwrap_or_else(get_config_path);

    if let Some(parent) = config_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let json = serde_json::to_string_pretty(config).map_err(std::io::Error::other)?;

    std::fs::write(&config_path, json)?;
    debug!("Config saved to {}", config_path.display());
    Ok(())
}

/// Apply legacy config migrations.
///
/// Moves top-level `discord` / `slack` / `matrix` sections under `bots`,
/// unless `bots` already has that section.
fn migrate_config(raw: &mut serde_json::Value) {
    let Some(root) = raw.as_object_mut() else {
        return;
    };

    for section in LEGACY_BOT_SECTIONS {
        let Some(legacy) = root.remove(section) else {
            continue;
        };
        let bots = root
            .entry("bots")
            .or_insert_with(|| serde_json::Value::Object(Default::default()));
        if let Some(bots) = bots.as_object_mut() {
            if !bots.contains_key(section) {
                bots.insert(section.to_string(), legacy);
                debug!("Migrated {section} → bots.{section}");
            }
        }
    }
}

/// Apply environment variable overrides on top of a loaded config.
///
/// Env var format: `ABYLEBOT_<SECTION>__<FIELD>` (double underscore as delimiter).
///
/// Supported overrides:
/// - `ABYLEBOT_DISCORD__TOKEN` → `bots.discord.token`
/// - `ABYLEBOT_SLACK__BOT_TOKEN` → `bots.slack.bot_token`
/// - `ABYLEBOT_SLACK__APP_TOKEN` → `bots.slack.app_token`
/// - `ABYLEBOT_MATRIX__TOKEN` → `bots.matrix.token`
/// - `ABYLEBOT_MATRIX__PASSWORD` → `bots.matrix.password`
/// - `ABYLEBOT_DISPATCH__PLUGIN_BUFFER_SIZE` → `dispatch.plugin_buffer_size`
fn apply_env_overrides(config: Config) -> Config {
    apply_overrides(config, |key| std::env::var(key).ok())
}

/// Override lookup behind [`apply_env_overrides`], keyed by variable name.
fn apply_overrides(mut config: Config, lookup: impl Fn(&str) -> Option<String>) -> Config {
    if let Some(val) = lookup("ABYLEBOT_DISCORD__TOKEN") {
        config.bots.discord.token = val;
    }
    if let Some(val) = lookup("ABYLEBOT_SLACK__BOT_TOKEN") {
        config.bots.slack.bot_token = val;
    }
    if let Some(val) = lookup("ABYLEBOT_SLACK__APP_TOKEN") {
        config.bots.slack.app_token = val;
    }
    if let Some(val) = lookup("ABYLEBOT_MATRIX__TOKEN") {
        config.bots.matrix.token = val;
    }
    if let Some(val) = lookup("ABYLEBOT_MATRIX__PASSWORD") {
        config.bots.matrix.password = val;
    }
    if let Some(val) = lookup("ABYLEBOT_DISPATCH__PLUGIN_BUFFER_SIZE") {
        if let Ok(n) = val.parse::<usize>() {
            config.dispatch.plugin_buffer_size = n;
        }
    }

    config
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn write_temp_json(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file.flush().unwrap();
        file
    }

    #[test]
    fn test_load_missing_file() {
        let config = load_config_from_path(Path::new("/nonexistent/path/config.json"));
        assert_eq!(config.dispatch.send_buffer_size, 64);
        assert!(config.plugins.is_empty());
    }

    #[test]
    fn test_load_valid_json() {
        let file = write_temp_json(r#"{
            "bots": {
                "matrix": {
                    "enabled": true,
                    "server": "https://matrix.example.org",
                    "rooms": ["!abc:example.org"]
                }
            },
            "plugins": [
                { "type": "echo", "config": { "onlymods": false } }
            ]
        }"#);

        let config = load_config_from_path(file.path());
        assert!(config.bots.matrix.enabled);
        assert_eq!(config.bots.matrix.rooms, vec!["!abc:example.org"]);
        // Default preserved
        assert_eq!(config.bots.matrix.poll_interval_ms, 1000);
        assert_eq!(config.plugins.len(), 1);
        assert_eq!(config.plugins[0].plugin_type, "echo");
    }

    #[test]
    fn test_load_invalid_json_returns_defaults() {
        let file = write_temp_json("not valid json {{{");
        let config = load_config_from_path(file.path());
        assert_eq!(config.dispatch.plugin_buffer_size, 32);
    }

    #[test]
    fn test_load_wrong_shape_returns_defaults() {
        let file = write_temp_json(r#"{ "plugins": "echo" }"#);
        let config = load_config_from_path(file.path());
        assert!(config.plugins.is_empty());
    }

    #[test]
    fn test_save_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");

        let mut config = Config::default();
        config.bots.slack.enabled = true;
        config.bots.slack.bot_token = "xoxb-test".to_string();
        config.dispatch.stop_grace_ms = 250;

        save_config(&config, Some(&path)).unwrap();

        let reloaded = load_config_from_path(&path);
        assert!(reloaded.bots.slack.enabled);
        assert_eq!(reloaded.bots.slack.bot_token, "xoxb-test");
        assert_eq!(reloaded.dispatch.stop_grace_ms, 250);
    }

    #[test]
    fn test_migrate_legacy_sections() {
        let file = write_temp_json(r#"{
            "discord": { "enabled": true, "token": "legacy" }
        }"#);

        let config = load_config_from_path(file.path());
        assert!(config.bots.discord.enabled);
        assert_eq!(config.bots.discord.token, "legacy");
    }

    #[test]
    fn test_migrate_no_overwrite() {
        let file = write_temp_json(r#"{
            "bots": { "discord": { "token": "current" } },
            "discord": { "token": "legacy" }
        }"#);

        let config = load_config_from_path(file.path());
        assert_eq!(config.bots.discord.token, "current");
    }

    fn lookup_in(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_env_override_tokens() {
        let config = apply_overrides(
            Config::default(),
            lookup_in(&[
                ("ABYLEBOT_SLACK__APP_TOKEN", "xapp-env"),
                ("ABYLEBOT_MATRIX__PASSWORD", "hunter2"),
            ]),
        );
        assert_eq!(config.bots.slack.app_token, "xapp-env");
        assert_eq!(config.bots.matrix.password, "hunter2");
        assert!(config.bots.discord.token.is_empty());
    }

    #[test]
    fn test_env_override_buffer_size() {
        let config = apply_overrides(
            Config::default(),
            lookup_in(&[("ABYLEBOT_DISPATCH__PLUGIN_BUFFER_SIZE", "7")]),
        );
        assert_eq!(config.dispatch.plugin_buffer_size, 7);

        let config = apply_overrides(
            Config::default(),
            lookup_in(&[("ABYLEBOT_DISPATCH__PLUGIN_BUFFER_SIZE", "lots")]),
        );
        assert_eq!(config.dispatch.plugin_buffer_size, 32);
    }

    #[test]
    fn test_saved_json_uses_camel_case() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");

        save_config(&Config::default(), Some(&path)).unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        let raw: serde_json::Value = serde_json::from_str(&content).unwrap();

        assert!(raw["bots"]["discord"].get("apiBase").is_some());
        assert!(raw["bots"]["discord"].get("api_base").is_none());
    }
}
