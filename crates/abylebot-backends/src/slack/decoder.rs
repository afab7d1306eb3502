//! Slack Events API decoding (events delivered over Socket Mode).

use std::collections::HashSet;

use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::debug;

use abylebot_core::{DecodeError, Directory, Identity, MessageType, RawEvent, ReceiveMessage};

use crate::base::Decoder;

#[derive(Debug, Deserialize)]
struct MessageEvent {
    #[serde(default)]
    subtype: Option<String>,
    #[serde(default)]
    user: Option<String>,
    #[serde(default)]
    channel: Option<String>,
    #[serde(default)]
    channel_type: Option<String>,
    #[serde(default)]
    text: String,
}

#[derive(Debug, Default, Deserialize)]
struct Profile {
    #[serde(default)]
    display_name: String,
    #[serde(default)]
    real_name: String,
}

#[derive(Debug, Deserialize)]
struct SlackUser {
    id: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    profile: Profile,
}

impl SlackUser {
    /// Display name, falling back to real name, then handle.
    fn display(&self) -> &str {
        [
            self.profile.display_name.as_str(),
            self.profile.real_name.as_str(),
            self.name.as_str(),
        ]
        .into_iter()
        .find(|s| !s.is_empty())
        .unwrap_or(self.id.as_str())
    }
}

#[derive(Debug, Deserialize)]
struct UserEvent {
    user: SlackUser,
}

#[derive(Debug, Deserialize)]
struct SlackChannel {
    id: String,
    #[serde(default)]
    name: String,
}

#[derive(Debug, Deserialize)]
struct ChannelCreated {
    channel: SlackChannel,
}

#[derive(Debug, Deserialize)]
struct ImCreated {
    channel: SlackChannel,
    #[serde(default)]
    user: Option<String>,
}

fn parse<T: DeserializeOwned>(event: &RawEvent) -> Result<T, DecodeError> {
    T::deserialize(&event.payload).map_err(|source| DecodeError::Malformed {
        tag: event.tag.clone(),
        source,
    })
}

/// Decoder for Slack events, tagged by the inner `event.type`.
#[derive(Debug, Default)]
pub struct SlackDecoder {
    own_id: Option<String>,
    users: Directory<Identity>,
    channels: Directory<Identity>,
    /// Known IM channel ids.
    ims: HashSet<String>,
}

impl SlackDecoder {
    /// `own_id` is the bot user id resolved by `auth.test`.
    pub fn new(own_id: impl Into<String>) -> Self {
        Self {
            own_id: Some(own_id.into()),
            ..Default::default()
        }
    }

    pub fn users(&self) -> &Directory<Identity> {
        &self.users
    }

    pub fn channels(&self) -> &Directory<Identity> {
        &self.channels
    }

    pub fn is_im(&self, channel: &str) -> bool {
        self.ims.contains(channel)
    }

    fn on_message(&mut self, event: &RawEvent) -> Result<Option<ReceiveMessage>, DecodeError> {
        let msg: MessageEvent = parse(event)?;
        if let Some(subtype) = &msg.subtype {
            debug!(subtype = %subtype, "slack message subtype ignored");
            return Ok(None);
        }

        let user = msg.user.ok_or_else(|| DecodeError::MissingField {
            tag: event.tag.clone(),
            field: "user",
        })?;
        let channel = msg.channel.ok_or_else(|| DecodeError::MissingField {
            tag: event.tag.clone(),
            field: "channel",
        })?;

        let whisper = msg.channel_type.as_deref() == Some("im") || self.ims.contains(&channel);
        if whisper {
            self.ims.insert(channel.clone());
        }
        let kind = if whisper {
            MessageType::Whisper
        } else {
            MessageType::Message
        };

        let sender_name = self.users.name_of(&user).unwrap_or(user.as_str()).to_string();
        Ok(Some(
            ReceiveMessage::new(kind, user, channel, msg.text).with_sender_name(sender_name),
        ))
    }
}

impl Decoder for SlackDecoder {
    fn decode(&mut self, event: &RawEvent) -> Result<Option<ReceiveMessage>, DecodeError> {
        match event.tag.as_str() {
            "message" => self.on_message(event),
            "user_change" | "team_join" => {
                let UserEvent { user }: UserEvent = parse(event)?;
                debug!(user = %user.id, name = %user.display(), event = %event.tag, "slack user updated");
                self.users.insert(Identity::new(&user.id, user.display()));
                Ok(None)
            }
            "channel_created" | "channel_rename" => {
                let ChannelCreated { channel }: ChannelCreated = parse(event)?;
                self.channels.insert(Identity::new(channel.id, channel.name));
                Ok(None)
            }
            "im_created" => {
                let im: ImCreated = parse(event)?;
                debug!(
                    channel = %im.channel.id,
                    user = im.user.as_deref().unwrap_or("-"),
                    "slack IM opened"
                );
                self.ims.insert(im.channel.id);
                Ok(None)
            }
            "app_mention" | "reaction_added" | "reaction_removed" | "member_joined_channel"
            | "member_left_channel" | "pin_added" | "pin_removed" => {
                debug!(event = %event.tag, "slack event (informational)");
                Ok(None)
            }
            other => {
                debug!(event = other, "slack event (unhandled)");
                Ok(None)
            }
        }
    }

    fn own_identity(&self) -> Option<&str> {
        self.own_id.as_deref()
    }
}
