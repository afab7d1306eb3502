//! Matrix room event decoding.
//!
//! Events arrive flattened out of `/sync` with their `room_id` injected, so
//! every payload carries the room it belongs to.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, PoisonError, RwLock};

use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::debug;

use abylebot_core::{DecodeError, Directory, Identity, MessageType, RawEvent, ReceiveMessage};

use crate::base::Decoder;

#[derive(Debug, Default, Deserialize)]
struct MessageContent {
    #[serde(default)]
    msgtype: Option<String>,
    #[serde(default)]
    body: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RoomMessage {
    #[serde(default)]
    sender: Option<String>,
    #[serde(default)]
    room_id: Option<String>,
    #[serde(default)]
    content: MessageContent,
}

#[derive(Debug, Deserialize)]
struct MemberContent {
    membership: String,
    #[serde(default)]
    displayname: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RoomMember {
    room_id: String,
    /// The user whose membership changed.
    state_key: String,
    content: MemberContent,
}

fn parse<T: DeserializeOwned>(event: &RawEvent) -> Result<T, DecodeError> {
    T::deserialize(&event.payload).map_err(|source| DecodeError::Malformed {
        tag: event.tag.clone(),
        source,
    })
}

// ─────────────────────────────────────────────
// Direct rooms
// ─────────────────────────────────────────────

/// User id → room id of the two-member rooms the bot shares with that user.
///
/// Matrix has no separate private channel: a whisper is answered in the room
/// it came from. The decoder writes, the client reads.
#[derive(Clone, Debug, Default)]
pub struct DirectRooms(Arc<RwLock<HashMap<String, String>>>);

impl DirectRooms {
    pub fn room_for(&self, user: &str) -> Option<String> {
        self.0
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(user)
            .cloned()
    }

    fn remember(&self, user: &str, room_id: &str) {
        self.0
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(user.to_string(), room_id.to_string());
    }

    fn forget_room(&self, room_id: &str) {
        self.0
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|_, room| room != room_id);
    }
}

// ─────────────────────────────────────────────
// Decoder
// ─────────────────────────────────────────────

/// Decoder for Matrix room events, tagged by event `type`.
#[derive(Debug, Default)]
pub struct MatrixDecoder {
    own_id: Option<String>,
    users: Directory<Identity>,
    /// Joined members per room id.
    rooms: HashMap<String, HashSet<String>>,
    direct: DirectRooms,
}

impl MatrixDecoder {
    /// `own_id` is the user id resolved by `whoami`.
    pub fn new(own_id: impl Into<String>) -> Self {
        Self {
            own_id: Some(own_id.into()),
            ..Default::default()
        }
    }

    /// Share the direct-room map with the client that sends whispers.
    pub fn with_direct_rooms(mut self, direct: DirectRooms) -> Self {
        self.direct = direct;
        self
    }

    pub fn direct_rooms(&self) -> &DirectRooms {
        &self.direct
    }

    pub fn users(&self) -> &Directory<Identity> {
        &self.users
    }

    /// Joined members of `room_id`, if the room has been seen.
    pub fn members(&self, room_id: &str) -> Option<&HashSet<String>> {
        self.rooms.get(room_id)
    }

    /// Members of `room_id` other than the bot.
    fn others<'a>(&'a self, room_id: &str) -> Vec<&'a str> {
        self.rooms.get(room_id).map_or_else(Vec::new, |members| {
            members
                .iter()
                .map(String::as_str)
                .filter(|m| Some(*m) != self.own_id.as_deref())
                .collect()
        })
    }

    fn classify(&self, room_id: &str) -> MessageType {
        if self.others(room_id).len() == 1 {
            MessageType::Whisper
        } else {
            MessageType::Message
        }
    }

    /// Keep the direct-room map in line with the room's member set.
    fn refresh_direct(&self, room_id: &str) {
        self.direct.forget_room(room_id);
        if let [user] = self.others(room_id).as_slice() {
            self.direct.remember(user, room_id);
        }
    }

    fn on_message(&self, event: &RawEvent) -> Result<Option<ReceiveMessage>, DecodeError> {
        let msg: RoomMessage = parse(event)?;
        let missing = |field| DecodeError::MissingField {
            tag: event.tag.clone(),
            field,
        };

        match msg.content.msgtype.as_deref() {
            Some("m.text") => {}
            Some(other) => {
                debug!(msgtype = other, "matrix message type ignored");
                return Ok(None);
            }
            // Redacted events have empty content.
            None => return Ok(None),
        }

        let sender = msg.sender.ok_or_else(|| missing("sender"))?;
        let room_id = msg.room_id.ok_or_else(|| missing("room_id"))?;
        let body = msg.content.body.ok_or_else(|| missing("content.body"))?;

        let kind = self.classify(&room_id);
        if kind == MessageType::Whisper {
            self.direct.remember(&sender, &room_id);
        }
        let sender_name = self.users.name_of(&sender).unwrap_or(sender.as_str()).to_string();
        Ok(Some(
            ReceiveMessage::new(kind, sender, room_id, body).with_sender_name(sender_name),
        ))
    }

    fn on_member(&mut self, event: &RawEvent) -> Result<Option<ReceiveMessage>, DecodeError> {
        let member: RoomMember = parse(event)?;
        self.apply_membership(&member);
        self.refresh_direct(&member.room_id);
        Ok(None)
    }

    fn apply_membership(&mut self, member: &RoomMember) {
        let members = self.rooms.entry(member.room_id.clone()).or_default();

        match member.content.membership.as_str() {
            "join" => {
                members.insert(member.state_key.clone());
                let name = member
                    .content
                    .displayname
                    .clone()
                    .filter(|n| !n.is_empty())
                    .unwrap_or_else(|| member.state_key.clone());
                self.users.insert(Identity::new(&member.state_key, name));
            }
            "leave" | "ban" => {
                members.remove(&member.state_key);
            }
            other => {
                debug!(room = %member.room_id, user = %member.state_key, membership = other, "matrix membership");
            }
        }
    }
}

impl Decoder for MatrixDecoder {
    fn decode(&mut self, event: &RawEvent) -> Result<Option<ReceiveMessage>, DecodeError> {
        match event.tag.as_str() {
            "m.room.message" => self.on_message(event),
            "m.room.member" => self.on_member(event),
            "m.room.name" | "m.room.topic" | "m.room.create" | "m.room.power_levels"
            | "m.room.join_rules" | "m.room.history_visibility" | "m.reaction"
            | "m.room.redaction" => {
                debug!(event = %event.tag, "matrix event (informational)");
                Ok(None)
            }
            other => {
                debug!(event = other, "matrix event (unhandled)");
                Ok(None)
            }
        }
    }

    fn own_identity(&self) -> Option<&str> {
        self.own_id.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn member(room: &str, user: &str, membership: &str, name: Option<&str>) -> RawEvent {
        RawEvent::new(
            "m.room.member",
            json!({
                "room_id": room,
                "state_key": user,
                "sender": user,
                "content": {"membership": membership, "displayname": name}
            }),
        )
    }

    fn text(room: &str, sender: &str, body: &str) -> RawEvent {
        RawEvent::new(
            "m.room.message",
            json!({
                "room_id": room,
                "sender": sender,
                "content": {"msgtype": "m.text", "body": body}
            }),
        )
    }

    #[test]
    fn test_room_message() {
        let mut dec = MatrixDecoder::new("@bot:hs");
        for user in ["@bot:hs", "@alice:hs", "@bob:hs"] {
            dec.decode(&member("!r:hs", user, "join", None)).unwrap();
        }
        let msg = dec.decode(&text("!r:hs", "@alice:hs", "hi")).unwrap().unwrap();
        assert_eq!(msg.kind(), MessageType::Message);
        assert_eq!(msg.ident(), "@alice:hs");
        assert_eq!(msg.channel(), "!r:hs");
        assert_eq!(msg.content(), "hi");
    }

    #[test]
    fn test_two_member_room_is_whisper() {
        let mut dec = MatrixDecoder::new("@bot:hs");
        dec.decode(&member("!dm:hs", "@bot:hs", "join", None)).unwrap();
        dec.decode(&member("!dm:hs", "@alice:hs", "join", Some("Alice")))
            .unwrap();

        let msg = dec.decode(&text("!dm:hs", "@alice:hs", "psst")).unwrap().unwrap();
        assert!(msg.is_whisper());
        assert_eq!(msg.sender_name(), "Alice");

        dec.decode(&member("!dm:hs", "@carol:hs", "join", None)).unwrap();
        let msg = dec.decode(&text("!dm:hs", "@alice:hs", "again")).unwrap().unwrap();
        assert_eq!(msg.kind(), MessageType::Message);
    }

    #[test]
    fn test_direct_rooms_follow_membership() {
        let direct = DirectRooms::default();
        let mut dec = MatrixDecoder::new("@bot:hs").with_direct_rooms(direct.clone());
        dec.decode(&member("!dm:hs", "@bot:hs", "join", None)).unwrap();
        dec.decode(&member("!dm:hs", "@alice:hs", "join", None)).unwrap();
        assert_eq!(direct.room_for("@alice:hs").as_deref(), Some("!dm:hs"));

        dec.decode(&member("!dm:hs", "@carol:hs", "join", None)).unwrap();
        assert_eq!(direct.room_for("@alice:hs"), None);
        assert_eq!(direct.room_for("@carol:hs"), None);

        dec.decode(&member("!dm:hs", "@alice:hs", "leave", None)).unwrap();
        assert_eq!(direct.room_for("@carol:hs").as_deref(), Some("!dm:hs"));
        assert_eq!(dec.direct_rooms().room_for("@carol:hs").as_deref(), Some("!dm:hs"));
    }

    #[test]
    fn test_leave_shrinks_room_but_keeps_name() {
        let mut dec = MatrixDecoder::new("@bot:hs");
        for user in ["@bot:hs", "@alice:hs", "@bob:hs"] {
            dec.decode(&member("!r:hs", user, "join", None)).unwrap();
        }
        dec.decode(&member("!r:hs", "@bob:hs", "leave", None)).unwrap();

        assert_eq!(dec.members("!r:hs").unwrap().len(), 2);
        assert_eq!(dec.users().name_of("@bob:hs"), Some("@bob:hs"));
        let msg = dec.decode(&text("!r:hs", "@alice:hs", "x")).unwrap().unwrap();
        assert!(msg.is_whisper());
    }

    #[test]
    fn test_unknown_room_is_message() {
        let mut dec = MatrixDecoder::new("@bot:hs");
        let msg = dec.decode(&text("!new:hs", "@alice:hs", "x")).unwrap().unwrap();
        assert_eq!(msg.kind(), MessageType::Message);
    }

    #[test]
    fn test_non_text_and_redacted_are_ignored() {
        let mut dec = MatrixDecoder::new("@bot:hs");
        let notice = RawEvent::new(
            "m.room.message",
            json!({"room_id": "!r:hs", "sender": "@a:hs", "content": {"msgtype": "m.notice", "body": "n"}}),
        );
        assert!(dec.decode(&notice).unwrap().is_none());

        let redacted = RawEvent::new(
            "m.room.message",
            json!({"room_id": "!r:hs", "sender": "@a:hs", "content": {}}),
        );
        assert!(dec.decode(&redacted).unwrap().is_none());
    }

    #[test]
    fn test_missing_fields_are_errors() {
        let mut dec = MatrixDecoder::new("@bot:hs");
        let no_sender = RawEvent::new(
            "m.room.message",
            json!({"room_id": "!r:hs", "content": {"msgtype": "m.text", "body": "x"}}),
        );
        let err = dec.decode(&no_sender).unwrap_err();
        assert!(matches!(err, DecodeError::MissingField { field: "sender", .. }));
        assert_eq!(err.tag(), "m.room.message");

        let bad_member = RawEvent::new("m.room.member", json!({"room_id": "!r:hs"}));
        assert!(matches!(
            dec.decode(&bad_member).unwrap_err(),
            DecodeError::Malformed { .. }
        ));
    }

    #[test]
    fn test_state_events_return_none() {
        let mut dec = MatrixDecoder::new("@bot:hs");
        let topic = RawEvent::new("m.room.topic", json!({"content": {"topic": "t"}}));
        assert!(dec.decode(&topic).unwrap().is_none());
        assert!(dec.decode(&RawEvent::new("m.custom", json!({}))).unwrap().is_none());
        assert_eq!(dec.own_identity(), Some("@bot:hs"));
    }
}
