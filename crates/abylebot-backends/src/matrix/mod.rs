//! Matrix backend: client-server API with `/sync` long-polling.
//!
//! Construction logs in (or uses a configured access token), resolves the
//! bot identity with `whoami`, joins the configured rooms and performs an
//! initial sync without timeline history. The room state from that sync seeds
//! the decoder's member sets before any new message is decoded.
//!
//! Recognized commands: `join` (payload = room id or alias). A whisper is
//! delivered to the two-member room the bot shares with its target; without
//! one the send fails.

pub mod client;
pub mod decoder;
pub mod sync;

use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use abylebot_core::config::MatrixConfig;
use abylebot_core::ConnectionError;

use crate::base::Connection;
use crate::bot::{Bot, BotOptions};
use crate::http::build_client;

pub use client::MatrixClient;
pub use decoder::{DirectRooms, MatrixDecoder};
pub use sync::SyncSource;

pub const BACKEND_NAME: &str = "matrix";

/// Perform the Matrix handshake and return the connection parts.
pub async fn connect(cfg: &MatrixConfig) -> Result<Connection, ConnectionError> {
    if cfg.server.is_empty() {
        return Err(ConnectionError::MissingCredentials("matrix server"));
    }
    let server = cfg.server.trim_end_matches('/');
    let http = build_client(None)?;

    let token = if !cfg.token.is_empty() {
        cfg.token.clone()
    } else if !cfg.username.is_empty() && !cfg.password.is_empty() {
        let (token, user_id) = client::login(&http, server, &cfg.username, &cfg.password).await?;
        info!(user_id = %user_id, "matrix login ok");
        token
    } else {
        return Err(ConnectionError::MissingCredentials("matrix token or username/password"));
    };

    let direct = DirectRooms::default();
    let client = Arc::new(
        MatrixClient::new(http, server, token).with_direct_rooms(direct.clone()),
    );
    let own_id = client.whoami().await?;
    info!(user_id = %own_id, "matrix session ready");

    for room in &cfg.rooms {
        client
            .join(room)
            .await
            .map_err(|e| ConnectionError::Handshake(format!("joining {room}: {e}")))?;
    }

    let initial = client
        .sync(None, Duration::ZERO)
        .await
        .map_err(|e| ConnectionError::Handshake(format!("initial sync: {e}")))?;
    let since = initial["next_batch"]
        .as_str()
        .ok_or_else(|| ConnectionError::Handshake("initial sync without next_batch".into()))?
        .to_string();
    let backlog = sync::flatten_sync(&initial);

    let source = SyncSource::new(
        client.clone(),
        since,
        backlog,
        cfg.poll_interval(),
        cfg.sync_timeout(),
    );

    Ok(Connection::new(
        BACKEND_NAME,
        Box::new(source),
        Box::new(MatrixDecoder::new(own_id).with_direct_rooms(direct)),
        client,
    ))
}

/// Connect to Matrix and wrap the connection in a [`Bot`].
pub async fn create_matrix_bot(
    cfg: &MatrixConfig,
    options: &BotOptions,
) -> Result<Bot, ConnectionError> {
    let connection = connect(cfg).await?;
    Ok(Bot::new(connection, options.clone()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{header, method, path, path_regex};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn cfg(server: &MockServer) -> MatrixConfig {
        MatrixConfig {
            enabled: true,
            server: server.uri(),
            username: "bot".into(),
            password: "pw".into(),
            rooms: vec!["#lobby:hs".into()],
            ..Default::default()
        }
    }

    async fn mount_session(server: &MockServer) {
        Mock::given(method("POST"))
            .and(path("/_matrix/client/v3/login"))
            .respond_with(ResponseTemplate::new(200).set_body_json(
                json!({"access_token": "tok", "user_id": "@bot:hs"}),
            ))
            .mount(server)
            .await;
        Mock::given(method("GET"))
            .and(path("/_matrix/client/v3/account/whoami"))
            .and(header("Authorization", "Bearer tok"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"user_id": "@bot:hs"})))
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn test_missing_credentials() {
        let err = create_matrix_bot(&MatrixConfig::default(), &BotOptions::default())
            .await
            .err()
            .unwrap();
        assert!(matches!(err, ConnectionError::MissingCredentials("matrix server")));

        let cfg = MatrixConfig {
            server: "http://127.0.0.1:9".into(),
            username: "bot".into(),
            ..Default::default()
        };
        let err = create_matrix_bot(&cfg, &BotOptions::default()).await.err().unwrap();
        assert!(matches!(err, ConnectionError::MissingCredentials(_)));
    }

    #[tokio::test]
    async fn test_rejected_login_fails_construction() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/_matrix/client/v3/login"))
            .respond_with(ResponseTemplate::new(403).set_body_json(
                json!({"errcode": "M_FORBIDDEN", "error": "Invalid password"}),
            ))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/_matrix/client/v3/account/whoami"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let err = create_matrix_bot(&cfg(&server), &BotOptions::default())
            .await
            .err()
            .unwrap();
        assert!(matches!(err, ConnectionError::Rejected { status: 403, .. }));
    }

    #[tokio::test]
    async fn test_failed_join_fails_construction() {
        let server = MockServer::start().await;
        mount_session(&server).await;
        Mock::given(method("POST"))
            .and(path_regex(r"^/_matrix/client/v3/join/.+$"))
            .respond_with(ResponseTemplate::new(404).set_body_json(json!({"errcode": "M_NOT_FOUND"})))
            .mount(&server)
            .await;

        let err = create_matrix_bot(&cfg(&server), &BotOptions::default())
            .await
            .err()
            .unwrap();
        assert!(matches!(err, ConnectionError::Handshake(ref msg) if msg.contains("#lobby:hs")));
    }

    #[tokio::test]
    async fn test_connect_builds_bot() {
        let server = MockServer::start().await;
        mount_session(&server).await;
        Mock::given(method("POST"))
            .and(path_regex(r"^/_matrix/client/v3/join/.+$"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"room_id": "!lobby:hs"})))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/_matrix/client/v3/sync"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"next_batch": "s1"})))
            .mount(&server)
            .await;

        let bot = create_matrix_bot(&cfg(&server), &BotOptions::default())
            .await
            .unwrap();
        assert_eq!(bot.name(), BACKEND_NAME);
        assert!(!bot.status().running);
    }
}
