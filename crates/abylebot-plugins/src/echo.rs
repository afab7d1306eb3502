//! `echo` plugin: `!echo <text>` answers with `<text>`.

use async_trait::async_trait;
use tracing::{debug, warn};

use abylebot_core::config::PluginConfig;
use abylebot_core::{ConfigError, Outlet, Plugin, ReceiveMessage};

use crate::config::{expect_type, optional_bool, warn_unknown_keys, PluginAccess};

pub const PLUGIN_TYPE: &str = "echo";
const TRIGGER: &str = "!echo";
const KEYS: [&str; 3] = ["mods", "onlymods", "onlywhispers"];

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct EchoConfig {
    pub access: PluginAccess,
    /// Only react to whispers.
    pub only_whispers: bool,
}

impl EchoConfig {
    pub fn parse(config: &PluginConfig) -> Result<Self, ConfigError> {
        expect_type(config, PLUGIN_TYPE)?;
        warn_unknown_keys(PLUGIN_TYPE, &config.config, &KEYS);

        Ok(Self {
            access: PluginAccess::from_config(&config.config)?,
            only_whispers: optional_bool(&config.config, "onlywhispers")?.unwrap_or(false),
        })
    }
}

pub struct EchoPlugin {
    config: EchoConfig,
}

impl EchoPlugin {
    pub fn new(config: EchoConfig) -> Self {
        Self { config }
    }

    /// The text to echo, if `content` is an echo request.
    fn echo_text(content: &str) -> Option<&str> {
        let rest = content.trim().strip_prefix(TRIGGER)?;
        if !rest.is_empty() && !rest.starts_with(char::is_whitespace) {
            return None;
        }
        let text = rest.trim();
        (!text.is_empty()).then_some(text)
    }
}

#[async_trait]
impl Plugin for EchoPlugin {
    fn name(&self) -> &str {
        PLUGIN_TYPE
    }

    async fn on_post(&mut self, outlet: &Outlet, msg: &ReceiveMessage) {
        let Some(text) = Self::echo_text(msg.content()) else {
            return;
        };
        if self.config.only_whispers && !msg.is_whisper() {
            debug!(channel = %msg.channel(), "echo only answers whispers");
            return;
        }
        if !self.config.access.permits(msg) {
            return;
        }

        if let Err(e) = outlet.send(msg.reply(text)).await {
            warn!(error = %e, "echo reply dropped, bot stopped");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use abylebot_core::{MessageType, SendMessage};
    use serde_json::json;
    use tokio::sync::mpsc;

    fn outlet() -> (Outlet, mpsc::Receiver<SendMessage>) {
        let (send_tx, send_rx) = mpsc::channel(8);
        let (command_tx, _command_rx) = mpsc::channel(8);
        (Outlet::new(send_tx, command_tx), send_rx)
    }

    fn post(kind: MessageType, content: &str) -> ReceiveMessage {
        ReceiveMessage::new(kind, "U1", "C1", content).with_sender_name("alice")
    }

    #[test]
    fn test_echo_text() {
        assert_eq!(EchoPlugin::echo_text("!echo hello there"), Some("hello there"));
        assert_eq!(EchoPlugin::echo_text("  !echo   padded  "), Some("padded"));
        assert_eq!(EchoPlugin::echo_text("!echo"), None);
        assert_eq!(EchoPlugin::echo_text("!echoes x"), None);
        assert_eq!(EchoPlugin::echo_text("say !echo x"), None);
    }

    #[test]
    fn test_parse_config() {
        let cfg = EchoConfig::parse(&PluginConfig::new("echo").with("onlywhispers", json!(true)))
            .unwrap();
        assert!(cfg.only_whispers);
        assert!(!cfg.access.only_mods);

        let err = EchoConfig::parse(&PluginConfig::new("echo").with("onlywhispers", json!(1)))
            .unwrap_err();
        assert!(matches!(err, ConfigError::WrongType { .. }));
    }

    #[tokio::test]
    async fn test_echo_in_channel() {
        let (outlet, mut rx) = outlet();
        let mut plugin = EchoPlugin::new(EchoConfig::default());

        plugin.on_post(&outlet, &post(MessageType::Message, "!echo hi")).await;
        plugin.on_post(&outlet, &post(MessageType::Message, "hello")).await;

        assert_eq!(rx.recv().await.unwrap(), SendMessage::message("C1", "hi"));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_whisper_reply_goes_to_sender() {
        let (outlet, mut rx) = outlet();
        let mut plugin = EchoPlugin::new(EchoConfig::default());

        plugin.on_post(&outlet, &post(MessageType::Whisper, "!echo secret")).await;
        assert_eq!(rx.recv().await.unwrap(), SendMessage::whisper("U1", "secret"));
    }

    #[tokio::test]
    async fn test_only_whispers() {
        let (outlet, mut rx) = outlet();
        let mut plugin = EchoPlugin::new(EchoConfig {
            only_whispers: true,
            ..Default::default()
        });

        plugin.on_post(&outlet, &post(MessageType::Message, "!echo a")).await;
        plugin.on_post(&outlet, &post(MessageType::Whisper, "!echo b")).await;

        assert_eq!(rx.recv().await.unwrap().content, "b");
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_only_mods() {
        let (outlet, mut rx) = outlet();
        let mut plugin = EchoPlugin::new(EchoConfig {
            access: PluginAccess {
                mods: vec!["bob".into()],
                only_mods: true,
            },
            ..Default::default()
        });

        plugin.on_post(&outlet, &post(MessageType::Message, "!echo a")).await;
        assert!(rx.try_recv().is_err());

        let from_bob =
            ReceiveMessage::new(MessageType::Message, "U2", "C1", "!echo b").with_sender_name("bob");
        plugin.on_post(&outlet, &from_bob).await;
        assert_eq!(rx.recv().await.unwrap().content, "b");
    }
}
