//! Discord gateway dispatch decoding.
//!
//! Keeps the per-session view of guilds, channels and users, and classifies
//! `MESSAGE_CREATE` as a whisper when the channel is known to have exactly
//! one recipient besides the bot.

use std::collections::{HashMap, HashSet};

use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::{debug, info};

use abylebot_core::{DecodeError, Directory, Identity, MessageType, RawEvent, ReceiveMessage};

use crate::base::Decoder;

// ─────────────────────────────────────────────
// Payloads
// ─────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct User {
    id: String,
    #[serde(default)]
    username: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Ready {
    user: User,
    #[serde(default)]
    session_id: String,
}

#[derive(Debug, Deserialize)]
struct Member {
    user: User,
    #[serde(default)]
    nick: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChannelPayload {
    id: String,
    #[serde(default)]
    recipients: Vec<User>,
}

#[derive(Debug, Deserialize)]
struct GuildCreate {
    id: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    member_count: u64,
    #[serde(default)]
    channels: Vec<ChannelPayload>,
    #[serde(default)]
    members: Vec<Member>,
}

#[derive(Debug, Deserialize)]
struct MessageCreate {
    channel_id: String,
    author: User,
    #[serde(default)]
    content: String,
}

#[derive(Debug, Deserialize)]
struct PresenceUpdate {
    user: User,
}

#[derive(Debug, Deserialize)]
struct TypingStart {
    channel_id: String,
    user_id: String,
}

#[derive(Debug, Deserialize)]
struct MessageRef {
    #[serde(default)]
    id: Option<String>,
    channel_id: String,
}

// ─────────────────────────────────────────────
// Session state
// ─────────────────────────────────────────────

/// Guild metadata captured from `GUILD_CREATE`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Guild {
    pub id: String,
    pub name: String,
    pub member_count: u64,
    pub channel_ids: Vec<String>,
}

/// A channel seen in `GUILD_CREATE` or `CHANNEL_CREATE`.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct KnownChannel {
    pub id: String,
    /// User ids of the channel's recipients. Empty for guild text channels.
    pub recipients: Vec<String>,
}

/// Decoder for Discord gateway dispatches (`op 0`, tagged by `t`).
#[derive(Debug, Default)]
pub struct DiscordDecoder {
    own_id: Option<String>,
    session_id: Option<String>,
    users: Directory<Identity>,
    /// Users whose directory name is a guild nickname.
    nicknamed: HashSet<String>,
    guilds: HashMap<String, Guild>,
    channels: HashMap<String, KnownChannel>,
}

fn parse<T: DeserializeOwned>(event: &RawEvent) -> Result<T, DecodeError> {
    T::deserialize(&event.payload).map_err(|source| DecodeError::Malformed {
        tag: event.tag.clone(),
        source,
    })
}

impl DiscordDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn users(&self) -> &Directory<Identity> {
        &self.users
    }

    pub fn guild(&self, id: &str) -> Option<&Guild> {
        self.guilds.get(id)
    }

    pub fn channel(&self, id: &str) -> Option<&KnownChannel> {
        self.channels.get(id)
    }

    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    /// Record a username unless a guild nickname is already known.
    fn remember_user(&mut self, user: &User) {
        if self.nicknamed.contains(&user.id) {
            return;
        }
        if let Some(name) = &user.username {
            self.users.insert(Identity::new(&user.id, name));
        }
    }

    fn remember_channel(&mut self, channel: &ChannelPayload) {
        for user in &channel.recipients {
            self.remember_user(user);
        }
        self.channels.insert(
            channel.id.clone(),
            KnownChannel {
                id: channel.id.clone(),
                recipients: channel.recipients.iter().map(|u| u.id.clone()).collect(),
            },
        );
    }

    /// Whisper iff the channel is known and has one recipient besides us.
    fn classify(&self, channel_id: &str) -> MessageType {
        let Some(channel) = self.channels.get(channel_id) else {
            return MessageType::Message;
        };
        let others = channel
            .recipients
            .iter()
            .filter(|id| self.own_id.as_deref() != Some(id.as_str()))
            .count();
        if others == 1 {
            MessageType::Whisper
        } else {
            MessageType::Message
        }
    }

    fn on_ready(&mut self, event: &RawEvent) -> Result<(), DecodeError> {
        let ready: Ready = parse(event)?;
        info!(
            user = ready.user.username.as_deref().unwrap_or("unknown"),
            id = %ready.user.id,
            "discord bot READY"
        );
        self.remember_user(&ready.user);
        self.own_id = Some(ready.user.id);
        if !ready.session_id.is_empty() {
            self.session_id = Some(ready.session_id);
        }
        Ok(())
    }

    fn on_guild_create(&mut self, event: &RawEvent) -> Result<(), DecodeError> {
        let guild: GuildCreate = parse(event)?;
        for member in &guild.members {
            match &member.nick {
                Some(nick) => {
                    self.nicknamed.insert(member.user.id.clone());
                    self.users.insert(Identity::new(&member.user.id, nick));
                }
                None => {
                    self.nicknamed.remove(&member.user.id);
                    self.remember_user(&member.user);
                }
            }
        }
        for channel in &guild.channels {
            self.remember_channel(channel);
        }
        debug!(
            guild = %guild.id,
            name = %guild.name,
            members = guild.member_count,
            channels = guild.channels.len(),
            "discord guild available"
        );
        self.guilds.insert(
            guild.id.clone(),
            Guild {
                channel_ids: guild.channels.iter().map(|c| c.id.clone()).collect(),
                id: guild.id,
                name: guild.name,
                member_count: guild.member_count,
            },
        );
        Ok(())
    }

    fn on_message_create(&mut self, event: &RawEvent) -> Result<ReceiveMessage, DecodeError> {
        let msg: MessageCreate = parse(event)?;
        self.remember_user(&msg.author);

        let kind = self.classify(&msg.channel_id);
        let sender_name = self
            .users
            .name_of(&msg.author.id)
            .unwrap_or(msg.author.id.as_str())
            .to_string();

        Ok(
            ReceiveMessage::new(kind, msg.author.id, msg.channel_id, msg.content)
                .with_sender_name(sender_name),
        )
    }
}

impl Decoder for DiscordDecoder {
    fn decode(&mut self, event: &RawEvent) -> Result<Option<ReceiveMessage>, DecodeError> {
        match event.tag.as_str() {
            "READY" => self.on_ready(event).map(|_| None),
            "GUILD_CREATE" => self.on_guild_create(event).map(|_| None),
            "CHANNEL_CREATE" => {
                let channel: ChannelPayload = parse(event)?;
                debug!(channel = %channel.id, recipients = channel.recipients.len(), "discord channel created");
                self.remember_channel(&channel);
                Ok(None)
            }
            "PRESENCE_UPDATE" => {
                let presence: PresenceUpdate = parse(event)?;
                self.remember_user(&presence.user);
                Ok(None)
            }
            "MESSAGE_CREATE" => self.on_message_create(event).map(Some),
            "TYPING_START" => {
                let typing: TypingStart = parse(event)?;
                debug!(channel = %typing.channel_id, user = %typing.user_id, "discord typing");
                Ok(None)
            }
            "MESSAGE_UPDATE" | "MESSAGE_DELETE" | "MESSAGE_REACTION_ADD"
            | "MESSAGE_REACTION_REMOVE" | "CHANNEL_PINS_UPDATE" => {
                let target: MessageRef = parse(event)?;
                debug!(
                    event = %event.tag,
                    channel = %target.channel_id,
                    message = target.id.as_deref().unwrap_or("-"),
                    "discord message event (informational)"
                );
                Ok(None)
            }
            "GUILD_MEMBER_UPDATE" | "PRESENCES_REPLACE" | "RESUMED" => {
                debug!(event = %event.tag, "discord event (informational)");
                Ok(None)
            }
            other => {
                debug!(event = other, "discord event (unhandled)");
                Ok(None)
            }
        }
    }

    fn own_identity(&self) -> Option<&str> {
        self.own_id.as_deref()
    }
}
