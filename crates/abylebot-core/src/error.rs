//! Error taxonomy shared across the workspace.
//!
//! Construction failures ([`ConnectionError`]) and plugin configuration
//! failures ([`ConfigError`]) are surfaced to the caller. Decode failures
//! ([`DecodeError`]) never leave the decode loop: they are logged and the
//! payload is dropped. A full plugin channel is not an error at all.

use thiserror::Error;

/// Invalid plugin configuration. Fatal to that plugin's setup only.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// The config entry belongs to a different plugin type.
    #[error("not a {expected} plugin config (got type {actual:?})")]
    WrongPluginType { expected: String, actual: String },

    /// No plugin is registered under this type name.
    #[error("unknown plugin type {0:?}")]
    UnknownPluginType(String),

    /// A recognized key carried a value of the wrong JSON type.
    #[error("config key {key:?} must be {expected}")]
    WrongType { key: String, expected: &'static str },

    /// The entry is well-typed but semantically inconsistent.
    #[error("{0}")]
    Invalid(String),
}

/// A platform payload could not be decoded into a canonical event.
#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("malformed {tag} payload: {source}")]
    Malformed {
        tag: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("{tag} payload is missing field {field:?}")]
    MissingField { tag: String, field: &'static str },
}

impl DecodeError {
    /// Event tag the failing payload was delivered with.
    pub fn tag(&self) -> &str {
        match self {
            DecodeError::Malformed { tag, .. } | DecodeError::MissingField { tag, .. } => tag,
        }
    }
}

/// Handshake or login with a platform failed; the bot was not constructed.
#[derive(Error, Debug)]
pub enum ConnectionError {
    #[error("missing credentials: {0}")]
    MissingCredentials(&'static str),

    #[error("http request failed: {0}")]
    Http(String),

    #[error("{endpoint} rejected the request (status {status}): {body}")]
    Rejected {
        endpoint: String,
        status: u16,
        body: String,
    },

    #[error("handshake failed: {0}")]
    Handshake(String),

    #[error("websocket error: {0}")]
    WebSocket(String),
}

/// Misuse of the bot control surface.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum BotError {
    #[error("bot has already been started")]
    AlreadyStarted,
}

/// Result alias for plugin configuration parsing.
pub type ConfigResult<T> = Result<T, ConfigError>;
