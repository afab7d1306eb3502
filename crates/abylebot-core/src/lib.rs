//! Abylebot core: everything backends and plugins agree on.
//!
//! This crate provides:
//! - **events**: the canonical event model (`ReceiveMessage`, `SendMessage`, `Command`, bot status)
//! - **directory**: per-backend ID ↔ name lookup
//! - **dispatch**: non-blocking fan-out of inbound messages to plugins
//! - **plugin**: the plugin hook contract and its runner
//! - **error**: the shared error taxonomy
//! - **config**: config schema, loader and env overrides

pub mod config;
pub mod directory;
pub mod dispatch;
pub mod error;
pub mod events;
pub mod plugin;
pub mod utils;

pub use directory::{Directory, DirectoryEntry, Identity};
pub use dispatch::{DispatchStats, Dispatcher};
pub use error::{BotError, ConfigError, ConnectionError, DecodeError};
pub use events::{BotState, BotStatus, Command, MessageType, RawEvent, ReceiveMessage, SendMessage};
pub use plugin::{Outlet, Plugin, PluginChannels};
