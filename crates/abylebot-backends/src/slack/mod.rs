//! Slack backend: Socket Mode for events, Web API for sends.
//!
//! Construction resolves the bot's user id with `auth.test` (bot token), then
//! opens a Socket Mode connection through `apps.connections.open` (app token).
//!
//! Recognized commands: `join` (payload = channel id).

pub mod decoder;
pub mod socket;
pub mod web;

use std::sync::Arc;

use tracing::info;

use abylebot_core::config::SlackConfig;
use abylebot_core::ConnectionError;

use crate::base::Connection;
use crate::bot::{Bot, BotOptions};
use crate::http::build_client;
use crate::ws::WsConnection;

pub use decoder::SlackDecoder;
pub use socket::SocketSource;
pub use web::SlackWeb;

pub const BACKEND_NAME: &str = "slack";

/// Perform the Slack handshake and return the connection parts.
pub async fn connect(cfg: &SlackConfig) -> Result<Connection, ConnectionError> {
    if cfg.bot_token.is_empty() {
        return Err(ConnectionError::MissingCredentials("slack bot token"));
    }
    if cfg.app_token.is_empty() {
        return Err(ConnectionError::MissingCredentials("slack app token"));
    }

    let http = build_client(None)?;
    let own_id = web::auth_test(&http, &cfg.api_base, &cfg.bot_token).await?;
    let url = web::open_socket_url(&http, &cfg.api_base, &cfg.app_token).await?;

    info!("connecting to slack socket mode");
    let ws = WsConnection::connect(&url).await?;

    Ok(Connection::new(
        BACKEND_NAME,
        Box::new(SocketSource::new(ws)),
        Box::new(SlackDecoder::new(own_id)),
        Arc::new(SlackWeb::new(http, cfg.api_base.clone(), cfg.bot_token.clone())),
    ))
}

/// Connect to Slack and wrap the connection in a [`Bot`].
pub async fn create_slack_bot(
    cfg: &SlackConfig,
    options: &BotOptions,
) -> Result<Bot, ConnectionError> {
    let connection = connect(cfg).await?;
    Ok(Bot::new(connection, options.clone()))
}
