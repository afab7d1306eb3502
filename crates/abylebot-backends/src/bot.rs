//! Generic backend bot: lifecycle state machine and the three loops that
//! connect a platform [`Connection`] to its plugins.
//!
//! ```text
//! EventSource ─► decode loop ─► Dispatcher ─► plugin runners
//!                                                   │ Outlet
//! platform ◄── outbound loop ◄── send channel ◄─────┤
//! platform ◄── command loop  ◄── command channel ◄──┘
//! ```
//!
//! Teardown has a single path. `stop()` flips the lifecycle watch, every
//! loop leaves its select, and the channel ends each loop owned drop with it.
//! Dropping the dispatcher closes every plugin channel; runners drain, run
//! `on_stop` and exit, then the supervisor marks the bot `Stopped`.
//!
//! Every wait during teardown is bounded by the stop grace:
//! - the outbound loop keeps delivering sends (including those made from
//!   `on_stop`) until every outlet is gone or the grace runs out;
//! - runners get twice the grace after the decode loop exits, then they are
//!   aborted.
//!
//! Commands still queued at stop are dropped.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use abylebot_core::config::DispatchConfig;
use abylebot_core::plugin::run_plugin;
use abylebot_core::utils::truncate_string;
use abylebot_core::{
    BotError, BotState, BotStatus, Command, DispatchStats, Dispatcher, Outlet, Plugin,
    PluginChannels, RawEvent, SendMessage,
};

use crate::base::{CommandOutcome, Connection, Decoder, EventSource, Outbound};

// ─────────────────────────────────────────────
// Options
// ─────────────────────────────────────────────

/// Channel sizes and the plugin stop grace of one bot.
#[derive(Clone, Debug)]
pub struct BotOptions {
    /// Capacity of each plugin's private inbound channel.
    pub plugin_buffer: usize,
    pub send_buffer: usize,
    pub command_buffer: usize,
    /// Upper bound for each plugin's `on_stop`.
    pub stop_grace: Duration,
}

impl From<&DispatchConfig> for BotOptions {
    fn from(cfg: &DispatchConfig) -> Self {
        Self {
            plugin_buffer: cfg.plugin_buffer_size.max(1),
            send_buffer: cfg.send_buffer_size.max(1),
            command_buffer: cfg.command_buffer_size.max(1),
            stop_grace: cfg.stop_grace(),
        }
    }
}

impl Default for BotOptions {
    fn default() -> Self {
        Self::from(&DispatchConfig::default())
    }
}

// ─────────────────────────────────────────────
// Control handle
// ─────────────────────────────────────────────

/// Cloneable handle to a bot's lifecycle.
///
/// Every clone observes the same state. Reading it never blocks.
#[derive(Clone, Debug)]
pub struct BotControl {
    name: Arc<str>,
    state: Arc<watch::Sender<BotState>>,
}

impl BotControl {
    fn new(name: &str) -> Self {
        let (state, _) = watch::channel(BotState::Created);
        Self {
            name: Arc::from(name),
            state: Arc::new(state),
        }
    }

    /// Backend name of the bot.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> BotState {
        *self.state.borrow()
    }

    pub fn status(&self) -> BotStatus {
        self.state().into()
    }

    /// Request a stop.
    ///
    /// Returns `true` if this call moved the bot to `Stopping`; calls in any
    /// other state than `Connecting` or `Running` do nothing.
    pub fn stop(&self) -> bool {
        let requested = self.state.send_if_modified(|state| match *state {
            BotState::Connecting | BotState::Running => {
                *state = BotState::Stopping;
                true
            }
            _ => false,
        });
        if requested {
            info!(bot = %self.name, "stop requested");
        }
        requested
    }

    /// Resolve once the bot is `Stopped`. Never resolves for a bot that is
    /// not started.
    pub async fn wait_stopped(&self) {
        let mut rx = self.state.subscribe();
        let _ = rx.wait_for(|state| *state == BotState::Stopped).await;
    }

    fn subscribe(&self) -> watch::Receiver<BotState> {
        self.state.subscribe()
    }

    /// Move `from` to `to`, leaving any other state untouched.
    fn advance(&self, from: BotState, to: BotState) -> bool {
        self.state.send_if_modified(|state| {
            if *state == from {
                *state = to;
                true
            } else {
                false
            }
        })
    }

    fn set(&self, state: BotState) {
        self.state.send_replace(state);
    }
}

/// Resolve once a stop has been requested.
async fn stop_requested(rx: &mut watch::Receiver<BotState>) {
    let _ = rx
        .wait_for(|state| matches!(state, BotState::Stopping | BotState::Stopped))
        .await;
}

// ─────────────────────────────────────────────
// Bot
// ─────────────────────────────────────────────

/// Everything that only exists between construction and `start()`.
struct Setup {
    connection: Connection,
    dispatcher: Dispatcher,
    send_tx: mpsc::Sender<SendMessage>,
    send_rx: mpsc::Receiver<SendMessage>,
    command_tx: mpsc::Sender<Command>,
    command_rx: mpsc::Receiver<Command>,
    plugins: Vec<(Box<dyn Plugin>, PluginChannels)>,
}

impl Setup {
    fn channels_for(&mut self, name: &str) -> PluginChannels {
        PluginChannels {
            receive: self.dispatcher.subscribe(name),
            outlet: Outlet::new(self.send_tx.clone(), self.command_tx.clone()),
        }
    }
}

/// A connected backend plus the plugins attached to it.
pub struct Bot {
    control: BotControl,
    options: BotOptions,
    stats: DispatchStats,
    setup: Option<Setup>,
}

impl Bot {
    /// Wrap an established connection. The bot starts in `Created`.
    pub fn new(connection: Connection, options: BotOptions) -> Self {
        let control = BotControl::new(&connection.backend);
        let dispatcher = Dispatcher::new(options.plugin_buffer);
        let stats = dispatcher.stats();
        let (send_tx, send_rx) = mpsc::channel(options.send_buffer.max(1));
        let (command_tx, command_rx) = mpsc::channel(options.command_buffer.max(1));

        Self {
            control,
            options,
            stats,
            setup: Some(Setup {
                connection,
                dispatcher,
                send_tx,
                send_rx,
                command_tx,
                command_rx,
                plugins: Vec::new(),
            }),
        }
    }

    pub fn name(&self) -> &str {
        self.control.name()
    }

    pub fn control(&self) -> BotControl {
        self.control.clone()
    }

    pub fn state(&self) -> BotState {
        self.control.state()
    }

    pub fn status(&self) -> BotStatus {
        self.control.status()
    }

    pub fn stop(&self) -> bool {
        self.control.stop()
    }

    /// Dispatch counters of this bot's plugins.
    pub fn stats(&self) -> DispatchStats {
        self.stats.clone()
    }

    /// Number of plugins registered through [`Bot::add_plugin`].
    pub fn plugin_count(&self) -> usize {
        self.setup.as_ref().map(|s| s.plugins.len()).unwrap_or(0)
    }

    /// Attach a plugin. Its runner is spawned by `start()`.
    pub fn add_plugin(&mut self, plugin: Box<dyn Plugin>) -> Result<(), BotError> {
        let setup = self.setup.as_mut().ok_or(BotError::AlreadyStarted)?;
        let channels = setup.channels_for(plugin.name());
        info!(bot = %self.control.name(), plugin = %plugin.name(), "plugin attached");
        setup.plugins.push((plugin, channels));
        Ok(())
    }

    /// Subscribe a host-driven consumer and hand back its raw channels.
    pub fn plugin_channels(&mut self, name: &str) -> Result<PluginChannels, BotError> {
        let setup = self.setup.as_mut().ok_or(BotError::AlreadyStarted)?;
        Ok(setup.channels_for(name))
    }

    /// Spawn the loops and the plugin runners.
    ///
    /// Returns once all three loops are ready, with the bot `Running` unless a
    /// stop raced the startup.
    pub async fn start(&mut self) -> Result<BotTask, BotError> {
        let Setup {
            connection,
            dispatcher,
            send_tx,
            send_rx,
            command_tx,
            command_rx,
            plugins,
        } = self.setup.take().ok_or(BotError::AlreadyStarted)?;

        // From here on only plugin outlets hold senders.
        drop(send_tx);
        drop(command_tx);

        let control = self.control.clone();
        control.set(BotState::Connecting);
        info!(
            bot = %control.name(),
            plugins = dispatcher.len(),
            "starting bot"
        );

        let Connection {
            source,
            decoder,
            outbound,
            ..
        } = connection;

        let (ready_tx, mut ready_rx) = mpsc::channel::<&'static str>(3);
        let stop_grace = self.options.stop_grace;
        let decode = tokio::spawn(decode_loop(
            control.clone(),
            source,
            decoder,
            dispatcher,
            ready_tx.clone(),
        ));
        let loops: Vec<(&'static str, JoinHandle<()>)> = vec![
            (
                "outbound",
                tokio::spawn(outbound_loop(
                    control.clone(),
                    outbound.clone(),
                    send_rx,
                    stop_grace,
                    ready_tx.clone(),
                )),
            ),
            (
                "command",
                tokio::spawn(command_loop(
                    control.clone(),
                    outbound,
                    command_rx,
                    ready_tx,
                )),
            ),
        ];

        while let Some(task) = ready_rx.recv().await {
            debug!(bot = %control.name(), task, "loop ready");
        }

        if control.advance(BotState::Connecting, BotState::Running) {
            info!(bot = %control.name(), "bot running");
        }

        let runners: Vec<(String, JoinHandle<()>)> = plugins
            .into_iter()
            .map(|(plugin, channels)| {
                let name = plugin.name().to_string();
                (name, tokio::spawn(run_plugin(plugin, channels, stop_grace)))
            })
            .collect();

        let supervisor = tokio::spawn(supervise(
            control.clone(),
            decode,
            loops,
            runners,
            stop_grace,
        ));

        Ok(BotTask {
            control,
            handle: supervisor,
        })
    }
}

/// Completion handle returned by [`Bot::start`].
pub struct BotTask {
    control: BotControl,
    handle: JoinHandle<()>,
}

impl BotTask {
    pub fn control(&self) -> &BotControl {
        &self.control
    }

    /// Wait until the bot is fully stopped.
    pub async fn wait(self) {
        if let Err(e) = self.handle.await {
            error!(bot = %self.control.name(), error = %e, "bot supervisor failed");
        }
    }
}

// ─────────────────────────────────────────────
// Loops
// ─────────────────────────────────────────────

async fn supervise(
    control: BotControl,
    decode: JoinHandle<()>,
    loops: Vec<(&'static str, JoinHandle<()>)>,
    runners: Vec<(String, JoinHandle<()>)>,
    stop_grace: Duration,
) {
    if let Err(e) = decode.await {
        error!(bot = %control.name(), task = "decode", error = %e, "bot loop panicked");
        control.stop();
    }

    // Plugin channels are closed now: one grace to drain, one for on_stop.
    let deadline = tokio::time::Instant::now() + stop_grace.saturating_mul(2);
    for (plugin, mut handle) in runners {
        match tokio::time::timeout_at(deadline, &mut handle).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                error!(bot = %control.name(), plugin = %plugin, error = %e, "plugin runner panicked");
            }
            Err(_) => {
                handle.abort();
                warn!(
                    bot = %control.name(),
                    plugin = %plugin,
                    grace_ms = stop_grace.as_millis() as u64,
                    "plugin did not stop in time, aborted"
                );
            }
        }
    }

    for (task, handle) in loops {
        if let Err(e) = handle.await {
            error!(bot = %control.name(), task, error = %e, "bot loop panicked");
            control.stop();
        }
    }
    control.set(BotState::Stopped);
    info!(bot = %control.name(), "bot stopped");
}

async fn decode_loop(
    control: BotControl,
    mut source: Box<dyn EventSource>,
    mut decoder: Box<dyn Decoder>,
    dispatcher: Dispatcher,
    ready: mpsc::Sender<&'static str>,
) {
    let mut state = control.subscribe();
    let _ = ready.send("decode").await;
    drop(ready);

    loop {
        let event = tokio::select! {
            biased;
            _ = stop_requested(&mut state) => break,
            event = source.next_event() => event,
        };

        match event {
            Ok(Some(event)) => handle_event(&control, decoder.as_mut(), &dispatcher, &event),
            Ok(None) => {
                info!(bot = %control.name(), "event stream closed by platform");
                control.stop();
                break;
            }
            Err(e) => {
                error!(bot = %control.name(), error = %e, "event stream failed");
                control.stop();
                break;
            }
        }
    }

    source.close().await;
    // Closes every plugin channel.
    drop(dispatcher);
    debug!(bot = %control.name(), "decode loop exited");
}

fn handle_event(
    control: &BotControl,
    decoder: &mut dyn Decoder,
    dispatcher: &Dispatcher,
    event: &RawEvent,
) {
    match decoder.decode(event) {
        Ok(Some(msg)) => {
            if decoder.own_identity() == Some(msg.ident()) {
                debug!(bot = %control.name(), tag = %event.tag, "ignoring own message");
                return;
            }
            debug!(
                bot = %control.name(),
                kind = %msg.kind(),
                sender = %msg.ident(),
                channel = %msg.channel(),
                content = %truncate_string(msg.content(), 80),
                "dispatching message"
            );
            dispatcher.dispatch(&msg);
        }
        Ok(None) => {}
        Err(e) => {
            error!(bot = %control.name(), tag = %e.tag(), error = %e, "failed to decode event");
        }
    }
}

async fn deliver(control: &BotControl, outbound: &dyn Outbound, msg: &SendMessage) {
    debug!(
        bot = %control.name(),
        kind = %msg.kind,
        to = %msg.ident,
        content_len = msg.content.len(),
        "sending message"
    );
    if let Err(e) = outbound.send(msg).await {
        error!(bot = %control.name(), to = %msg.ident, error = %e, "failed to send message");
    }
}

async fn outbound_loop(
    control: BotControl,
    outbound: Arc<dyn Outbound>,
    mut send_rx: mpsc::Receiver<SendMessage>,
    drain_grace: Duration,
    ready: mpsc::Sender<&'static str>,
) {
    let mut state = control.subscribe();
    let _ = ready.send("outbound").await;
    drop(ready);

    let mut open = true;
    loop {
        tokio::select! {
            biased;
            _ = stop_requested(&mut state) => break,
            msg = send_rx.recv(), if open => match msg {
                Some(msg) => deliver(&control, outbound.as_ref(), &msg).await,
                None => {
                    debug!(bot = %control.name(), "no outlets left, send channel closed");
                    open = false;
                }
            },
        }
    }

    if open {
        let drained = tokio::time::timeout(drain_grace, async {
            let mut count = 0usize;
            while let Some(msg) = send_rx.recv().await {
                deliver(&control, outbound.as_ref(), &msg).await;
                count += 1;
            }
            count
        })
        .await;
        match drained {
            Ok(count) => debug!(bot = %control.name(), count, "send channel drained"),
            Err(_) => warn!(
                bot = %control.name(),
                grace_ms = drain_grace.as_millis() as u64,
                "outlets still open after stop grace, pending sends dropped"
            ),
        }
    }
    debug!(bot = %control.name(), "outbound loop exited");
}

async fn command_loop(
    control: BotControl,
    outbound: Arc<dyn Outbound>,
    mut command_rx: mpsc::Receiver<Command>,
    ready: mpsc::Sender<&'static str>,
) {
    let mut state = control.subscribe();
    let _ = ready.send("command").await;
    drop(ready);

    let mut open = true;
    loop {
        tokio::select! {
            biased;
            _ = stop_requested(&mut state) => break,
            cmd = command_rx.recv(), if open => match cmd {
                Some(cmd) => match outbound.command(&cmd).await {
                    Ok(CommandOutcome::Handled) => {
                        debug!(bot = %control.name(), command = %cmd.command, "command handled");
                    }
                    Ok(CommandOutcome::Unknown) => {
                        warn!(
                            bot = %control.name(),
                            command = %cmd.command,
                            payload = %cmd.payload,
                            "unknown command, dropped"
                        );
                    }
                    Err(e) => {
                        error!(bot = %control.name(), command = %cmd.command, error = %e, "command failed");
                    }
                },
                None => {
                    debug!(bot = %control.name(), "no outlets left, command channel closed");
                    open = false;
                }
            },
        }
    }
    debug!(bot = %control.name(), "command loop exited");
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────
