//! Canonical event model shared by every backend and plugin.
//!
//! Backends decode their platform payloads into [`ReceiveMessage`]s, plugins
//! answer with [`SendMessage`]s and out-of-band [`Command`]s. Nothing in here
//! knows about Discord, Slack or Matrix.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

// ─────────────────────────────────────────────
// Message type
// ─────────────────────────────────────────────

/// Whether a message was posted to a shared channel or sent privately.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageType {
    /// Posted in a channel/room with more than one other participant.
    Message,
    /// Direct message: the channel has exactly one recipient besides the bot.
    Whisper,
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MessageType::Message => f.write_str("message"),
            MessageType::Whisper => f.write_str("whisper"),
        }
    }
}

// ─────────────────────────────────────────────
// Inbound
// ─────────────────────────────────────────────

/// An inbound message decoded from a platform event.
///
/// Immutable once built: fields are only reachable through accessors.
#[derive(Clone, Debug, PartialEq)]
pub struct ReceiveMessage {
    kind: MessageType,
    ident: String,
    sender_name: String,
    channel: String,
    content: String,
    timestamp: DateTime<Utc>,
}

impl ReceiveMessage {
    /// Create a new inbound message. The display name defaults to `ident`.
    pub fn new(
        kind: MessageType,
        ident: impl Into<String>,
        channel: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        let ident = ident.into();
        ReceiveMessage {
            kind,
            sender_name: ident.clone(),
            ident,
            channel: channel.into(),
            content: content.into(),
            timestamp: Utc::now(),
        }
    }

    /// Attach the sender's display name as resolved by the backend directory.
    pub fn with_sender_name(mut self, name: impl Into<String>) -> Self {
        self.sender_name = name.into();
        self
    }

    pub fn kind(&self) -> MessageType {
        self.kind
    }

    /// Platform identity of the sender.
    pub fn ident(&self) -> &str {
        &self.ident
    }

    pub fn sender_name(&self) -> &str {
        &self.sender_name
    }

    /// Channel, room or DM the message arrived on.
    pub fn channel(&self) -> &str {
        &self.channel
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn is_whisper(&self) -> bool {
        self.kind == MessageType::Whisper
    }

    /// Build the outgoing message answering this one.
    ///
    /// Channel messages are answered in the same channel, whispers are
    /// answered privately to the sender.
    pub fn reply(&self, content: impl Into<String>) -> SendMessage {
        let destination = match self.kind {
            MessageType::Message => self.channel.clone(),
            MessageType::Whisper => self.ident.clone(),
        };
        SendMessage::new(self.kind, destination, content)
    }
}

// ─────────────────────────────────────────────
// Outbound
// ─────────────────────────────────────────────

/// An outgoing message produced by a plugin.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SendMessage {
    pub kind: MessageType,
    /// Destination: a channel/room for `Message`, a user for `Whisper`.
    pub ident: String,
    pub content: String,
}

impl SendMessage {
    pub fn new(kind: MessageType, ident: impl Into<String>, content: impl Into<String>) -> Self {
        SendMessage {
            kind,
            ident: ident.into(),
            content: content.into(),
        }
    }

    /// A channel message to `channel`.
    pub fn message(channel: impl Into<String>, content: impl Into<String>) -> Self {
        Self::new(MessageType::Message, channel, content)
    }

    /// A private message to `user`.
    pub fn whisper(user: impl Into<String>, content: impl Into<String>) -> Self {
        Self::new(MessageType::Whisper, user, content)
    }
}

/// Out-of-band control instruction from a plugin to its bot.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Command {
    pub command: String,
    pub payload: String,
}

impl Command {
    pub fn new(command: impl Into<String>, payload: impl Into<String>) -> Self {
        Command {
            command: command.into(),
            payload: payload.into(),
        }
    }
}

// ─────────────────────────────────────────────
// Raw platform events
// ─────────────────────────────────────────────

/// One loosely-typed platform event, tagged with the platform's event name
/// (`MESSAGE_CREATE`, `message`, `m.room.message`, ...).
#[derive(Clone, Debug, PartialEq)]
pub struct RawEvent {
    pub tag: String,
    pub payload: Value,
}

impl RawEvent {
    pub fn new(tag: impl Into<String>, payload: Value) -> Self {
        RawEvent {
            tag: tag.into(),
            payload,
        }
    }
}

// ─────────────────────────────────────────────
// Bot status
// ─────────────────────────────────────────────

/// Lifecycle state of a backend bot.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BotState {
    /// Handshake done, loops not started.
    Created,
    /// Loops are being spawned.
    Connecting,
    Running,
    /// Stop requested, loops are winding down.
    Stopping,
    Stopped,
}

impl fmt::Display for BotState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            BotState::Created => "created",
            BotState::Connecting => "connecting",
            BotState::Running => "running",
            BotState::Stopping => "stopping",
            BotState::Stopped => "stopped",
        };
        f.write_str(s)
    }
}

/// Snapshot of a bot's status, read on demand.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BotStatus {
    pub running: bool,
}

impl From<BotState> for BotStatus {
    fn from(state: BotState) -> Self {
        BotStatus {
            running: state == BotState::Running,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_receive_message_creation() {
        let msg = ReceiveMessage::new(MessageType::Message, "u1", "c1", "hello");
        assert_eq!(msg.kind(), MessageType::Message);
        assert_eq!(msg.ident(), "u1");
        assert_eq!(msg.sender_name(), "u1");
        assert_eq!(msg.channel(), "c1");
        assert_eq!(msg.content(), "hello");
        assert!(!msg.is_whisper());
    }

    #[test]
    fn test_sender_name_override() {
        let msg = ReceiveMessage::new(MessageType::Whisper, "u1", "d1", "hi").with_sender_name("alice");
        assert_eq!(msg.sender_name(), "alice");
        assert_eq!(msg.ident(), "u1");
    }

    #[test]
    fn test_reply_to_message_goes_to_channel() {
        let msg = ReceiveMessage::new(MessageType::Message, "u1", "general", "!ping");
        let reply = msg.reply("pong");
        assert_eq!(reply, SendMessage::message("general", "pong"));
    }

    #[test]
    fn test_reply_to_whisper_goes_to_sender() {
        let msg = ReceiveMessage::new(MessageType::Whisper, "u1", "dm-42", "!ping");
        let reply = msg.reply("pong");
        assert_eq!(reply.kind, MessageType::Whisper);
        assert_eq!(reply.ident, "u1");
    }

    #[test]
    fn test_status_from_state() {
        assert!(BotStatus::from(BotState::Running).running);
        for state in [
            BotState::Created,
            BotState::Connecting,
            BotState::Stopping,
            BotState::Stopped,
        ] {
            assert!(!BotStatus::from(state).running, "{state} must not be running");
        }
    }

    #[test]
    fn test_message_type_serde() {
        assert_eq!(serde_json::to_value(MessageType::Whisper).unwrap(), json!("whisper"));
        let t: MessageType = serde_json::from_value(json!("message")).unwrap();
        assert_eq!(t, MessageType::Message);
    }

    #[test]
    fn test_raw_event() {
        let ev = RawEvent::new("READY", json!({"user": {"id": "1"}}));
        assert_eq!(ev.tag, "READY");
        assert_eq!(ev.payload["user"]["id"], "1");
    }
}
