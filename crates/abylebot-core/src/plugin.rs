//! Plugin hook contract: the interface every plugin implements.
//!
//! A plugin only sees three hooks and an [`Outlet`]:
//! - `on_run()`: once, when the bot is operational
//! - `on_post()`: once per delivered [`ReceiveMessage`]
//! - `on_stop()`: once, during shutdown
//!
//! Hooks a plugin does not care about default to no-ops. Each plugin is
//! driven by a single runner task draining its private channel, so `on_post`
//! never runs concurrently with itself.

use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::SendError;
use tracing::{debug, info, warn};

use crate::events::{Command, ReceiveMessage, SendMessage};

/// Default grace period for `on_stop`.
pub const DEFAULT_STOP_GRACE: Duration = Duration::from_secs(5);

// ─────────────────────────────────────────────
// Channels handed to a plugin
// ─────────────────────────────────────────────

/// The sending side a plugin uses to talk back to its bot.
///
/// Clones of the bot's own send and command channels: what the bot
/// consumes, the plugin produces.
#[derive(Clone, Debug)]
pub struct Outlet {
    send: mpsc::Sender<SendMessage>,
    command: mpsc::Sender<Command>,
}

impl Outlet {
    pub fn new(send: mpsc::Sender<SendMessage>, command: mpsc::Sender<Command>) -> Self {
        Self { send, command }
    }

    /// Queue a message for the bot's outbound loop.
    ///
    /// Fails once the bot has stopped consuming.
    pub async fn send(&self, msg: SendMessage) -> Result<(), SendError<SendMessage>> {
        self.send.send(msg).await
    }

    /// Queue a control command for the bot's command loop.
    pub async fn command(&self, cmd: Command) -> Result<(), SendError<Command>> {
        self.command.send(cmd).await
    }

    /// Whether the bot has stopped consuming outgoing messages.
    pub fn is_closed(&self) -> bool {
        self.send.is_closed()
    }
}

/// Everything a plugin is wired to: its private inbound channel plus the
/// outlet back to the bot.
#[derive(Debug)]
pub struct PluginChannels {
    pub receive: mpsc::Receiver<ReceiveMessage>,
    pub outlet: Outlet,
}

// ─────────────────────────────────────────────
// Plugin trait
// ─────────────────────────────────────────────

/// Every plugin implements this trait.
#[async_trait]
pub trait Plugin: Send {
    /// Plugin name used in logs (e.g. `"echo"`).
    fn name(&self) -> &str;

    /// Called once when the bot becomes operational.
    async fn on_run(&mut self, _outlet: &Outlet) {}

    /// Called once during shutdown, after the inbound channel is drained.
    ///
    /// The host bounds this with a grace period and moves on when it expires.
    async fn on_stop(&mut self, _outlet: &Outlet) {}

    /// Called once per delivered message.
    async fn on_post(&mut self, _outlet: &Outlet, _msg: &ReceiveMessage) {}
}

// ─────────────────────────────────────────────
// Runner
// ─────────────────────────────────────────────

/// Drive one plugin until its inbound channel closes.
///
/// Runs `on_run`, feeds every received message to `on_post` in order, then
/// runs `on_stop` bounded by `stop_grace`.
pub async fn run_plugin(
    mut plugin: Box<dyn Plugin>,
    channels: PluginChannels,
    stop_grace: Duration,
) {
    let PluginChannels {
        mut receive,
        outlet,
    } = channels;
    let name = plugin.name().to_string();

    info!(plugin = %name, "plugin running");
    plugin.on_run(&outlet).await;

    while let Some(msg) = receive.recv().await {
        debug!(plugin = %name, sender = %msg.ident(), "plugin received post");
        plugin.on_post(&outlet, &msg).await;
    }

    debug!(plugin = %name, "plugin channel closed, stopping");
    if tokio::time::timeout(stop_grace, plugin.on_stop(&outlet))
        .await
        .is_err()
    {
        warn!(
            plugin = %name,
            grace_ms = stop_grace.as_millis() as u64,
            "plugin on_stop timed out, continuing shutdown"
        );
    }
    info!(plugin = %name, "plugin stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::MessageType;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    /// Records every hook call.
    struct Recorder {
        log: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl Plugin for Recorder {
        fn name(&self) -> &str {
            "recorder"
        }

        async fn on_run(&mut self, _outlet: &Outlet) {
            self.log.lock().unwrap().push("run".into());
        }

        async fn on_stop(&mut self, _outlet: &Outlet) {
            self.log.lock().unwrap().push("stop".into());
        }

        async fn on_post(&mut self, outlet: &Outlet, msg: &ReceiveMessage) {
            self.log.lock().unwrap().push(msg.content().to_string());
            let _ = outlet.send(msg.reply("ack")).await;
        }
    }

    /// Never returns from `on_stop`.
    struct Stubborn {
        stops: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Plugin for Stubborn {
        fn name(&self) -> &str {
            "stubborn"
        }

        async fn on_stop(&mut self, _outlet: &Outlet) {
            self.stops.fetch_add(1, Ordering::SeqCst);
            std::future::pending::<()>().await;
        }
    }

    /// Implements nothing but its name.
    struct Silent;

    #[async_trait]
    impl Plugin for Silent {
        fn name(&self) -> &str {
            "silent"
        }
    }

    fn channels(
        capacity: usize,
    ) -> (
        mpsc::Sender<ReceiveMessage>,
        PluginChannels,
        mpsc::Receiver<SendMessage>,
        mpsc::Receiver<Command>,
    ) {
        let (in_tx, in_rx) = mpsc::channel(capacity);
        let (send_tx, send_rx) = mpsc::channel(capacity);
        let (cmd_tx, cmd_rx) = mpsc::channel(capacity);
        let chans = PluginChannels {
            receive: in_rx,
            outlet: Outlet::new(send_tx, cmd_tx),
        };
        (in_tx, chans, send_rx, cmd_rx)
    }

    #[tokio::test]
    async fn test_outlet_send_and_command() {
        let (_in, chans, mut send_rx, mut cmd_rx) = channels(4);
        chans
            .outlet
            .send(SendMessage::message("c1", "hi"))
            .await
            .unwrap();
        chans.outlet.command(Command::new("join", "#room")).await.unwrap();

        assert_eq!(send_rx.recv().await.unwrap().content, "hi");
        assert_eq!(cmd_rx.recv().await.unwrap().command, "join");
    }

    #[tokio::test]
    async fn test_outlet_closed_after_bot_gone() {
        let (_in, chans, send_rx, cmd_rx) = channels(4);
        drop(send_rx);
        drop(cmd_rx);
        assert!(chans.outlet.is_closed());
        assert!(chans
            .outlet
            .send(SendMessage::message("c1", "late"))
            .await
            .is_err());
        assert!(chans.outlet.command(Command::new("join", "x")).await.is_err());
    }

    #[tokio::test]
    async fn test_runner_calls_hooks_in_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let (in_tx, chans, mut send_rx, _cmd) = channels(8);

        let handle = tokio::spawn(run_plugin(
            Box::new(Recorder { log: log.clone() }),
            chans,
            DEFAULT_STOP_GRACE,
        ));

        for i in 0..3 {
            let msg = ReceiveMessage::new(MessageType::Message, "u1", "c1", format!("m{i}"));
            in_tx.send(msg).await.unwrap();
        }
        drop(in_tx);
        handle.await.unwrap();

        assert_eq!(*log.lock().unwrap(), vec!["run", "m0", "m1", "m2", "stop"]);
        for _ in 0..3 {
            assert_eq!(send_rx.recv().await.unwrap().ident, "c1");
        }
    }

    #[tokio::test]
    async fn test_runner_bounds_on_stop() {
        let stops = Arc::new(AtomicUsize::new(0));
        let (in_tx, chans, _send, _cmd) = channels(1);
        drop(in_tx);

        let result = tokio::time::timeout(
            Duration::from_secs(5),
            run_plugin(
                Box::new(Stubborn {
                    stops: stops.clone(),
                }),
                chans,
                Duration::from_millis(50),
            ),
        )
        .await;

        assert!(result.is_ok(), "runner must not hang on a stuck on_stop");
        assert_eq!(stops.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_default_hooks_are_noops() {
        let (in_tx, chans, mut send_rx, _cmd) = channels(2);
        in_tx
            .send(ReceiveMessage::new(MessageType::Whisper, "u", "d", "hello"))
            .await
            .unwrap();
        drop(in_tx);

        run_plugin(Box::new(Silent), chans, DEFAULT_STOP_GRACE).await;
        assert!(send_rx.try_recv().is_err());
    }
}
