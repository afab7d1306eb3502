//! Backend seams: the pieces every platform integration provides.
//!
//! A connected backend is split along the lines of the tasks that use it:
//! - [`EventSource`]: yields raw platform events (owned by the decode task)
//! - [`Decoder`]: turns raw events into canonical messages and keeps the
//!   session directory (owned by the decode task)
//! - [`Outbound`]: performs platform sends and interprets commands (shared by
//!   the outbound and command tasks)
//!
//! The generic [`Bot`](crate::bot::Bot) drives any [`Connection`] the same way.

use std::sync::Arc;

use async_trait::async_trait;

use abylebot_core::{Command, DecodeError, RawEvent, ReceiveMessage, SendMessage};

/// Stream of raw platform events.
#[async_trait]
pub trait EventSource: Send {
    /// Wait for the next platform event.
    ///
    /// `Ok(None)` means the platform closed the stream. Errors are transport
    /// failures; the bot stops after either.
    async fn next_event(&mut self) -> anyhow::Result<Option<RawEvent>>;

    /// Release the underlying connection. Called once during teardown.
    async fn close(&mut self) {}
}

/// Per-backend translation of raw events into the canonical model.
pub trait Decoder: Send {
    /// Decode one event.
    ///
    /// Returns `Ok(Some(_))` only for events classified as messages; other
    /// events update the decoder's directory/session state and return `Ok(None)`.
    fn decode(&mut self, event: &RawEvent) -> Result<Option<ReceiveMessage>, DecodeError>;

    /// The bot's own platform identity, once known.
    fn own_identity(&self) -> Option<&str>;
}

/// Result of interpreting a [`Command`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CommandOutcome {
    Handled,
    /// The backend has no handler for this command.
    Unknown,
}

/// Platform send calls and the per-backend command switch.
#[async_trait]
pub trait Outbound: Send + Sync {
    /// Deliver an outgoing message.
    async fn send(&self, msg: &SendMessage) -> anyhow::Result<()>;

    /// Interpret a control command. Backends without commands keep the default.
    async fn command(&self, _cmd: &Command) -> anyhow::Result<CommandOutcome> {
        Ok(CommandOutcome::Unknown)
    }
}

/// A connected backend, produced by a successful handshake.
pub struct Connection {
    /// Backend name (e.g. "discord", "slack", "matrix").
    pub backend: String,
    pub source: Box<dyn EventSource>,
    pub decoder: Box<dyn Decoder>,
    pub outbound: Arc<dyn Outbound>,
}

impl Connection {
    pub fn new(
        backend: impl Into<String>,
        source: Box<dyn EventSource>,
        decoder: Box<dyn Decoder>,
        outbound: Arc<dyn Outbound>,
    ) -> Self {
        Self {
            backend: backend.into(),
            source,
            decoder,
            outbound,
        }
    }
}
