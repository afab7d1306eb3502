//! Typed plugin configuration.
//!
//! A [`PluginConfig`] carries its settings as a loose JSON map. Each plugin
//! parses that map into its own struct with the helpers here: absent keys take
//! their default, recognized keys with the wrong JSON type are rejected.

use serde_json::{Map, Value};
use tracing::{debug, warn};

use abylebot_core::config::PluginConfig;
use abylebot_core::{ConfigError, ReceiveMessage};

// ─────────────────────────────────────────────
// Param helpers
// ─────────────────────────────────────────────

/// Read an optional boolean key.
pub fn optional_bool(config: &Map<String, Value>, key: &str) -> Result<Option<bool>, ConfigError> {
    match config.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Bool(b)) => Ok(Some(*b)),
        Some(_) => Err(ConfigError::WrongType {
            key: key.to_string(),
            expected: "a boolean",
        }),
    }
}

/// Read an optional list-of-strings key.
pub fn optional_string_list(
    config: &Map<String, Value>,
    key: &str,
) -> Result<Option<Vec<String>>, ConfigError> {
    let wrong_type = || ConfigError::WrongType {
        key: key.to_string(),
        expected: "a list of strings",
    };

    match config.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Array(items)) => items
            .iter()
            .map(|v| v.as_str().map(str::to_string).ok_or_else(wrong_type))
            .collect::<Result<Vec<_>, _>>()
            .map(Some),
        Some(_) => Err(wrong_type()),
    }
}

/// Fail unless `config` is an entry for `expected`.
pub fn expect_type(config: &PluginConfig, expected: &str) -> Result<(), ConfigError> {
    if config.plugin_type == expected {
        Ok(())
    } else {
        Err(ConfigError::WrongPluginType {
            expected: expected.to_string(),
            actual: config.plugin_type.clone(),
        })
    }
}

/// Log every key that `known` does not list.
pub fn warn_unknown_keys(plugin: &str, config: &Map<String, Value>, known: &[&str]) {
    for key in config.keys().filter(|k| !known.contains(&k.as_str())) {
        warn!(plugin = plugin, key = %key, "ignoring unknown plugin config key");
    }
}

// ─────────────────────────────────────────────
// Access control
// ─────────────────────────────────────────────

/// Who may trigger a plugin.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PluginAccess {
    pub mods: Vec<String>,
    pub only_mods: bool,
}

impl PluginAccess {
    /// Config keys consumed by [`PluginAccess::from_config`].
    pub const KEYS: [&'static str; 2] = ["mods", "onlymods"];

    pub fn from_config(config: &Map<String, Value>) -> Result<Self, ConfigError> {
        let mods = optional_string_list(config, "mods")?.unwrap_or_default();
        let only_mods = optional_bool(config, "onlymods")?.unwrap_or(false);

        if only_mods && mods.is_empty() {
            return Err(ConfigError::Invalid(
                "onlymods is set but no mods are configured".into(),
            ));
        }
        Ok(Self { mods, only_mods })
    }

    /// Whether `msg`'s sender may use the plugin.
    pub fn permits(&self, msg: &ReceiveMessage) -> bool {
        if !self.only_mods {
            return true;
        }
        let allowed = self
            .mods
            .iter()
            .any(|m| m == msg.ident() || m == msg.sender_name());
        if !allowed {
            debug!(sender = %msg.ident(), "sender is not a mod, ignoring");
        }
        allowed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use abylebot_core::MessageType;
    use serde_json::json;

    fn map(v: Value) -> Map<String, Value> {
        v.as_object().cloned().unwrap_or_default()
    }

    fn post(ident: &str, name: &str) -> ReceiveMessage {
        ReceiveMessage::new(MessageType::Message, ident, "C1", "!cmd").with_sender_name(name)
    }

    #[test]
    fn test_access_defaults() {
        let access = PluginAccess::from_config(&Map::new()).unwrap();
        assert_eq!(access, PluginAccess::default());
        assert!(access.permits(&post("U1", "anyone")));
    }

    #[test]
    fn test_onlymods_without_mods_rejected() {
        let err = PluginAccess::from_config(&map(json!({"onlymods": true}))).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));

        let err =
            PluginAccess::from_config(&map(json!({"onlymods": true, "mods": []}))).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn test_onlymods_with_mods_accepted() {
        let access =
            PluginAccess::from_config(&map(json!({"onlymods": true, "mods": ["alice"]}))).unwrap();
        assert!(access.only_mods);
        assert_eq!(access.mods, vec!["alice"]);
    }

    #[test]
    fn test_mods_without_onlymods_accepted() {
        let access = PluginAccess::from_config(&map(json!({"onlymods": false, "mods": []}))).unwrap();
        assert!(!access.only_mods);
    }

    #[test]
    fn test_wrong_types_rejected() {
        let err = PluginAccess::from_config(&map(json!({"onlymods": "yes", "mods": ["a"]})))
            .unwrap_err();
        assert_eq!(
            err,
            ConfigError::WrongType {
                key: "onlymods".into(),
                expected: "a boolean"
            }
        );

        let err = PluginAccess::from_config(&map(json!({"mods": "alice"}))).unwrap_err();
        assert!(matches!(err, ConfigError::WrongType { ref key, .. } if key == "mods"));

        let err = PluginAccess::from_config(&map(json!({"mods": ["alice", 3]}))).unwrap_err();
        assert!(matches!(err, ConfigError::WrongType { ref key, .. } if key == "mods"));
    }

    #[test]
    fn test_null_is_absent() {
        let access = PluginAccess::from_config(&map(json!({"mods": null, "onlymods": null}))).unwrap();
        assert_eq!(access, PluginAccess::default());
    }

    #[test]
    fn test_permits_by_ident_or_name() {
        let access = PluginAccess {
            mods: vec!["alice".into(), "U2".into()],
            only_mods: true,
        };
        assert!(access.permits(&post("U1", "alice")));
        assert!(access.permits(&post("U2", "bob")));
        assert!(!access.permits(&post("U3", "mallory")));
    }

    #[test]
    fn test_expect_type() {
        assert!(expect_type(&PluginConfig::new("echo"), "echo").is_ok());
        let err = expect_type(&PluginConfig::new("version"), "echo").unwrap_err();
        assert!(matches!(err, ConfigError::WrongPluginType { .. }));
    }
}
