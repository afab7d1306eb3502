//! Abylebot backends: platform connections and the generic bot runtime.
//!
//! This crate provides:
//! - **base**: the seams a platform implements (`EventSource`, `Decoder`, `Outbound`)
//! - **bot**: `Bot`, which drives any [`Connection`] through its lifecycle and loops
//!
//! Platform backends are feature-gated modules, all enabled by default.

pub mod base;
pub mod bot;
pub mod text;

#[cfg(any(feature = "discord", feature = "slack", feature = "matrix"))]
mod http;

#[cfg(any(feature = "discord", feature = "slack"))]
mod ws;

#[cfg(feature = "discord")]
pub mod discord;

#[cfg(feature = "slack")]
pub mod slack;

#[cfg(feature = "matrix")]
pub mod matrix;

pub use base::{CommandOutcome, Connection, Decoder, EventSource, Outbound};
pub use bot::{Bot, BotControl, BotOptions, BotTask};

#[cfg(feature = "discord")]
pub use discord::create_discord_bot;

#[cfg(feature = "slack")]
pub use slack::create_slack_bot;

#[cfg(feature = "matrix")]
pub use matrix::create_matrix_bot;
