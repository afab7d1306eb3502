//! Slack Web API: handshake calls and the outbound sender.
//!
//! Web API methods answer HTTP 200 with `{"ok": false, "error": ...}` on
//! failure, so the `ok` flag is checked on every call.

use std::collections::HashMap;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::Mutex;
use tracing::{debug, info};

use abylebot_core::{Command, ConnectionError, MessageType, SendMessage};

use crate::base::{CommandOutcome, Outbound};
use crate::http::handshake_json;
use crate::text::split_message;

/// Slack message length limit for `chat.postMessage`.
pub const SLACK_MAX_LEN: usize = 4000;

fn api_error(body: &Value) -> &str {
    body["error"].as_str().unwrap_or("unknown")
}

/// Handshake call: transport or `ok: false` both become a [`ConnectionError`].
async fn handshake_call(
    http: &reqwest::Client,
    api_base: &str,
    method: &str,
    token: &str,
) -> Result<Value, ConnectionError> {
    let resp = http
        .post(format!("{api_base}/{method}"))
        .bearer_auth(token)
        .send()
        .await;
    let body = handshake_json(method, resp).await?;
    if body["ok"].as_bool() != Some(true) {
        return Err(ConnectionError::Rejected {
            endpoint: method.to_string(),
            status: 200,
            body: api_error(&body).to_string(),
        });
    }
    Ok(body)
}

/// Resolve the bot's own user id via `auth.test`.
pub async fn auth_test(
    http: &reqwest::Client,
    api_base: &str,
    bot_token: &str,
) -> Result<String, ConnectionError> {
    let body = handshake_call(http, api_base, "auth.test", bot_token).await?;
    let user_id = body["user_id"]
        .as_str()
        .ok_or_else(|| ConnectionError::Handshake("no user_id in auth.test response".into()))?;
    info!(
        user_id = %user_id,
        team = body["team"].as_str().unwrap_or("-"),
        "slack auth.test ok"
    );
    Ok(user_id.to_string())
}

/// Get a Socket Mode WebSocket URL via `apps.connections.open`.
pub async fn open_socket_url(
    http: &reqwest::Client,
    api_base: &str,
    app_token: &str,
) -> Result<String, ConnectionError> {
    let body = handshake_call(http, api_base, "apps.connections.open", app_token).await?;
    body["url"]
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| ConnectionError::Handshake("no url in apps.connections.open response".into()))
}

/// Outbound sender and command switch over the Web API.
pub struct SlackWeb {
    http: reqwest::Client,
    api_base: String,
    bot_token: String,
    /// IM channel id per user id, filled on first whisper.
    im_channels: Mutex<HashMap<String, String>>,
}

impl SlackWeb {
    pub fn new(
        http: reqwest::Client,
        api_base: impl Into<String>,
        bot_token: impl Into<String>,
    ) -> Self {
        Self {
            http,
            api_base: api_base.into(),
            bot_token: bot_token.into(),
            im_channels: Mutex::new(HashMap::new()),
        }
    }

    async fn call(&self, method: &str, body: Value) -> anyhow::Result<Value> {
        let resp: Value = self
            .http
            .post(format!("{}/{method}", self.api_base))
            .bearer_auth(&self.bot_token)
            .json(&body)
            .send()
            .await?
            .json()
            .await?;
        if resp["ok"].as_bool() != Some(true) {
            anyhow::bail!("{method} failed: {}", api_error(&resp));
        }
        Ok(resp)
    }

    /// Resolve (or open) the IM channel with `user`.
    async fn im_channel(&self, user: &str) -> anyhow::Result<String> {
        let mut cache = self.im_channels.lock().await;
        if let Some(id) = cache.get(user) {
            return Ok(id.clone());
        }
        let resp = self
            .call("conversations.open", json!({ "users": user }))
            .await?;
        let id = resp["channel"]["id"]
            .as_str()
            .ok_or_else(|| anyhow::anyhow!("conversations.open returned no channel id"))?
            .to_string();
        debug!(user = %user, channel = %id, "slack IM opened");
        cache.insert(user.to_string(), id.clone());
        Ok(id)
    }
}

#[async_trait]
impl Outbound for SlackWeb {
    async fn send(&self, msg: &SendMessage) -> anyhow::Result<()> {
        let channel = match msg.kind {
            MessageType::Message => msg.ident.clone(),
            MessageType::Whisper => self.im_channel(&msg.ident).await?,
        };
        for chunk in split_message(&msg.content, SLACK_MAX_LEN) {
            self.call("chat.postMessage", json!({ "channel": channel, "text": chunk }))
                .await?;
        }
        debug!(channel = %channel, "slack message sent");
        Ok(())
    }

    async fn command(&self, cmd: &Command) -> anyhow::Result<CommandOutcome> {
        match cmd.command.as_str() {
            "join" => {
                self.call("conversations.join", json!({ "channel": cmd.payload }))
                    .await?;
                info!(channel = %cmd.payload, "slack joined channel");
                Ok(CommandOutcome::Handled)
            }
            _ => Ok(CommandOutcome::Unknown),
        }
    }
}
