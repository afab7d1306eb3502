//! Matrix client-server API calls used by the backend.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::{debug, info};

use abylebot_core::{Command, ConnectionError, MessageType, SendMessage};

use crate::base::{CommandOutcome, Outbound};
use crate::http::{ensure_success, handshake_json};

use super::decoder::DirectRooms;

const CLIENT_API: &str = "/_matrix/client/v3";

/// Percent-encode a room id or alias for use as a path segment.
fn encode_segment(s: &str) -> String {
    url::form_urlencoded::byte_serialize(s.as_bytes()).collect()
}

/// Log in with a password and return `(access_token, user_id)`.
pub async fn login(
    http: &reqwest::Client,
    server: &str,
    username: &str,
    password: &str,
) -> Result<(String, String), ConnectionError> {
    let resp = http
        .post(format!("{server}{CLIENT_API}/login"))
        .json(&json!({
            "type": "m.login.password",
            "identifier": { "type": "m.id.user", "user": username },
            "password": password,
            "initial_device_display_name": "abylebot"
        }))
        .send()
        .await;
    let body = handshake_json("login", resp).await?;

    let token = body["access_token"]
        .as_str()
        .ok_or_else(|| ConnectionError::Handshake("login response without access_token".into()))?;
    let user_id = body["user_id"].as_str().unwrap_or_default();
    Ok((token.to_string(), user_id.to_string()))
}

/// Authenticated client for one homeserver session.
pub struct MatrixClient {
    http: reqwest::Client,
    server: String,
    token: String,
    txn_prefix: String,
    txn_counter: AtomicU64,
    direct: DirectRooms,
}

impl MatrixClient {
    pub fn new(http: reqwest::Client, server: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            http,
            server: server.into().trim_end_matches('/').to_string(),
            token: token.into(),
            txn_prefix: format!("abylebot-{}", chrono::Utc::now().timestamp_millis()),
            txn_counter: AtomicU64::new(0),
            direct: DirectRooms::default(),
        }
    }

    /// Whispers go to the rooms recorded here by the decoder.
    pub fn with_direct_rooms(mut self, direct: DirectRooms) -> Self {
        self.direct = direct;
        self
    }

    fn url(&self, path: &str) -> String {
        format!("{}{CLIENT_API}{path}", self.server)
    }

    fn next_txn_id(&self) -> String {
        let n = self.txn_counter.fetch_add(1, Ordering::Relaxed);
        format!("{}-{n}", self.txn_prefix)
    }

    /// Resolve the session's user id (`GET /account/whoami`).
    pub async fn whoami(&self) -> Result<String, ConnectionError> {
        let resp = self
            .http
            .get(self.url("/account/whoami"))
            .bearer_auth(&self.token)
            .send()
            .await;
        let body = handshake_json("whoami", resp).await?;
        body["user_id"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| ConnectionError::Handshake("whoami response without user_id".into()))
    }

    /// Join a room by id or alias. Returns the room id.
    pub async fn join(&self, room: &str) -> anyhow::Result<String> {
        let resp = self
            .http
            .post(self.url(&format!("/join/{}", encode_segment(room))))
            .bearer_auth(&self.token)
            .json(&json!({}))
            .send()
            .await?;
        let body: Value = ensure_success("matrix join", resp).await?.json().await?;
        let room_id = body["room_id"].as_str().unwrap_or(room).to_string();
        info!(room = %room, room_id = %room_id, "matrix room joined");
        Ok(room_id)
    }

    /// One `/sync` call. `since = None` performs the initial sync without
    /// timeline history.
    pub async fn sync(&self, since: Option<&str>, timeout: Duration) -> anyhow::Result<Value> {
        let mut query: Vec<(&str, String)> = vec![("timeout", timeout.as_millis().to_string())];
        match since {
            Some(token) => query.push(("since", token.to_string())),
            None => query.push(("filter", json!({"room": {"timeline": {"limit": 0}}}).to_string())),
        }

        let resp = self
            .http
            .get(self.url("/sync"))
            .bearer_auth(&self.token)
            .query(&query)
            // The long-poll must outlive the client's default timeout.
            .timeout(timeout + Duration::from_secs(30))
            .send()
            .await?;
        Ok(ensure_success("matrix sync", resp).await?.json().await?)
    }

    async fn send_text(&self, room_id: &str, body: &str) -> anyhow::Result<()> {
        let path = format!(
            "/rooms/{}/send/m.room.message/{}",
            encode_segment(room_id),
            self.next_txn_id()
        );
        let resp = self
            .http
            .put(self.url(&path))
            .bearer_auth(&self.token)
            .json(&json!({ "msgtype": "m.text", "body": body }))
            .send()
            .await?;
        ensure_success("matrix send", resp).await?;
        debug!(room = %room_id, "matrix message sent");
        Ok(())
    }
}

#[async_trait]
impl Outbound for MatrixClient {
    async fn send(&self, msg: &SendMessage) -> anyhow::Result<()> {
        match msg.kind {
            MessageType::Message => self.send_text(&msg.ident, &msg.content).await,
            MessageType::Whisper => match self.direct.room_for(&msg.ident) {
                Some(room_id) => self.send_text(&room_id, &msg.content).await,
                None => anyhow::bail!("no direct room shared with {}", msg.ident),
            },
        }
    }

    async fn command(&self, cmd: &Command) -> anyhow::Result<CommandOutcome> {
        match cmd.command.as_str() {
            "join" => {
                self.join(&cmd.payload).await?;
                Ok(CommandOutcome::Handled)
            }
            _ => Ok(CommandOutcome::Unknown),
        }
    }
}
