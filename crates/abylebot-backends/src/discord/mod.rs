//! Discord backend: raw Gateway WebSocket for events, REST API for sends.
//!
//! Construction validates the token against `GET /gateway/bot`, opens the
//! gateway, waits for HELLO and sends IDENTIFY. The bot identity arrives
//! later with READY and is captured by the decoder.
//!
//! No commands are recognized; every [`Command`](abylebot_core::Command) is
//! logged as unknown.

pub mod decoder;
pub mod gateway;
pub mod rest;

use std::sync::Arc;

use tracing::info;

use abylebot_core::config::DiscordConfig;
use abylebot_core::ConnectionError;

use crate::base::Connection;
use crate::bot::{Bot, BotOptions};
use crate::http::build_client;

pub use decoder::DiscordDecoder;
pub use gateway::GatewaySource;
pub use rest::DiscordRest;

pub const BACKEND_NAME: &str = "discord";

/// Perform the Discord handshake and return the connection parts.
pub async fn connect(cfg: &DiscordConfig) -> Result<Connection, ConnectionError> {
    if cfg.token.is_empty() {
        return Err(ConnectionError::MissingCredentials("discord token"));
    }

    let http = build_client(None)?;
    let discovered = rest::fetch_gateway_url(&http, &cfg.api_base, &cfg.token).await?;
    let url = if cfg.gateway_url.is_empty() {
        discovered
    } else {
        cfg.gateway_url.clone()
    };

    info!(url = %url, "connecting to discord gateway");
    let source = GatewaySource::open(&url, &cfg.token, gateway::DEFAULT_INTENTS).await?;

    Ok(Connection::new(
        BACKEND_NAME,
        Box::new(source),
        Box::new(DiscordDecoder::new()),
        Arc::new(DiscordRest::new(http, cfg.api_base.clone(), cfg.token.clone())),
    ))
}

/// Connect to Discord and wrap the connection in a [`Bot`].
pub async fn create_discord_bot(
    cfg: &DiscordConfig,
    options: &BotOptions,
) -> Result<Bot, ConnectionError> {
    let connection = connect(cfg).await?;
    Ok(Bot::new(connection, options.clone()))
}
