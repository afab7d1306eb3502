//! Discord REST API: gateway discovery and the outbound sender.

use std::collections::HashMap;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::Mutex;
use tracing::debug;

use abylebot_core::{ConnectionError, MessageType, SendMessage};

use crate::base::Outbound;
use crate::http::{ensure_success, handshake_json};
use crate::text::split_message;

/// Discord message length limit.
pub const DISCORD_MAX_LEN: usize = 2000;

/// Query appended to the gateway URL returned by `/gateway/bot`.
const GATEWAY_QUERY: &str = "?v=10&encoding=json";

/// Validate the token and discover the gateway URL (`GET /gateway/bot`).
pub async fn fetch_gateway_url(
    http: &reqwest::Client,
    api_base: &str,
    token: &str,
) -> Result<String, ConnectionError> {
    let resp = http
        .get(format!("{api_base}/gateway/bot"))
        .header("Authorization", format!("Bot {token}"))
        .send()
        .await;
    let body = handshake_json("/gateway/bot", resp).await?;
    let url = body["url"]
        .as_str()
        .ok_or_else(|| ConnectionError::Handshake("/gateway/bot returned no url".into()))?;
    Ok(format!("{}/{GATEWAY_QUERY}", url.trim_end_matches('/')))
}

/// Outbound sender over the REST API.
pub struct DiscordRest {
    http: reqwest::Client,
    api_base: String,
    token: String,
    /// DM channel id per user id, filled on first whisper.
    dm_channels: Mutex<HashMap<String, String>>,
}

impl DiscordRest {
    pub fn new(http: reqwest::Client, api_base: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            http,
            api_base: api_base.into(),
            token: token.into(),
            dm_channels: Mutex::new(HashMap::new()),
        }
    }

    fn auth(&self) -> String {
        format!("Bot {}", self.token)
    }

    /// Resolve (or open) the DM channel with `user_id`.
    async fn dm_channel(&self, user_id: &str) -> anyhow::Result<String> {
        let mut cache = self.dm_channels.lock().await;
        if let Some(id) = cache.get(user_id) {
            return Ok(id.clone());
        }

        let resp = self
            .http
            .post(format!("{}/users/@me/channels", self.api_base))
            .header("Authorization", self.auth())
            .json(&json!({ "recipient_id": user_id }))
            .send()
            .await?;
        let body: Value = ensure_success("discord create DM", resp).await?.json().await?;
        let id = body["id"]
            .as_str()
            .ok_or_else(|| anyhow::anyhow!("discord create DM returned no channel id"))?
            .to_string();

        debug!(user = %user_id, channel = %id, "discord DM channel opened");
        cache.insert(user_id.to_string(), id.clone());
        Ok(id)
    }

    async fn post_message(&self, channel_id: &str, content: &str) -> anyhow::Result<()> {
        let resp = self
            .http
            .post(format!("{}/channels/{channel_id}/messages", self.api_base))
            .header("Authorization", self.auth())
            .json(&json!({ "content": content }))
            .send()
            .await?;
        ensure_success("discord send", resp).await?;
        Ok(())
    }
}

#[async_trait]
impl Outbound for DiscordRest {
    async fn send(&self, msg: &SendMessage) -> anyhow::Result<()> {
        let channel_id = match msg.kind {
            MessageType::Message => msg.ident.clone(),
            MessageType::Whisper => self.dm_channel(&msg.ident).await?,
        };

        let chunks = split_message(&msg.content, DISCORD_MAX_LEN);
        for chunk in &chunks {
            self.post_message(&channel_id, chunk).await?;
        }
        debug!(channel = %channel_id, chunks = chunks.len(), "discord message sent");
        Ok(())
    }
}
