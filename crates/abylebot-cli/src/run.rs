//! `abylebot run`: connect the enabled bots, attach plugins and run until
//! Ctrl+C or until every bot has stopped.
//!
//! Startup sequence:
//! 1. Load config
//! 2. Construct each enabled bot (a failed handshake skips that backend)
//! 3. Build and attach the plugins that apply to each bot (an invalid entry is skipped)
//! 4. Start all bots, wait for Ctrl+C or for all of them to stop
//! 5. Stop all bots and wait for their teardown

use std::future::Future;
use std::path::PathBuf;

use anyhow::Result;
use tracing::{error, info, warn};

use abylebot_backends::{Bot, BotControl, BotOptions};
use abylebot_core::config::{load_config, Config, PluginConfig};
use abylebot_plugins::PluginRegistry;

use crate::helpers;

/// Construct every enabled bot. Failures are logged and skipped.
#[cfg_attr(
    not(any(feature = "discord", feature = "slack", feature = "matrix")),
    allow(unused_variables, unused_mut)
)]
pub async fn connect_bots(config: &Config, options: &BotOptions) -> Vec<Bot> {
    let mut bots = Vec::new();

    #[cfg(feature = "discord")]
    {
        if config.bots.discord.enabled {
            match abylebot_backends::create_discord_bot(&config.bots.discord, options).await {
                Ok(bot) => bots.push(bot),
                Err(e) => error!(bot = "discord", error = %e, "discord bot not created, skipping"),
            }
        }
    }

    #[cfg(feature = "slack")]
    {
        if config.bots.slack.enabled {
            match abylebot_backends::create_slack_bot(&config.bots.slack, options).await {
                Ok(bot) => bots.push(bot),
                Err(e) => error!(bot = "slack", error = %e, "slack bot not created, skipping"),
            }
        }
    }

    #[cfg(feature = "matrix")]
    {
        if config.bots.matrix.enabled {
            match abylebot_backends::create_matrix_bot(&config.bots.matrix, options).await {
                Ok(bot) => bots.push(bot),
                Err(e) => error!(bot = "matrix", error = %e, "matrix bot not created, skipping"),
            }
        }
    }

    bots
}

/// Build a fresh instance of every plugin that applies to `bot` and attach
/// it. Returns how many were attached.
pub fn attach_plugins(bot: &mut Bot, plugins: &[PluginConfig], registry: &PluginRegistry) -> usize {
    let name = bot.name().to_string();
    let mut attached = 0;
    for cfg in plugins.iter().filter(|p| p.applies_to(&name)) {
        let plugin = match registry.build(cfg) {
            Ok(plugin) => plugin,
            Err(e) => {
                error!(bot = %name, plugin = %cfg.plugin_type, error = %e, "invalid plugin config, skipping");
                continue;
            }
        };
        match bot.add_plugin(plugin) {
            Ok(()) => attached += 1,
            Err(e) => warn!(bot = %name, plugin = %cfg.plugin_type, error = %e, "plugin not attached"),
        }
    }
    attached
}

/// Start every bot, wait for `shutdown` or for all bots to stop, then stop
/// them all and wait for their teardown. Returns how many bots ran.
pub async fn run_until(bots: Vec<Bot>, shutdown: impl Future<Output = ()>) -> usize {
    let mut tasks = Vec::with_capacity(bots.len());
    for mut bot in bots {
        match bot.start().await {
            Ok(task) => tasks.push(task),
            Err(e) => error!(bot = %bot.name(), error = %e, "bot failed to start"),
        }
    }

    let controls: Vec<BotControl> = tasks.iter().map(|t| t.control().clone()).collect();
    let all_stopped = async {
        for control in &controls {
            control.wait_stopped().await;
        }
    };

    tokio::select! {
        _ = shutdown => info!("shutdown requested"),
        _ = all_stopped => info!("all bots stopped"),
    }

    for control in &controls {
        control.stop();
    }
    let count = tasks.len();
    for task in tasks {
        task.wait().await;
    }
    count
}

pub async fn run(path: Option<PathBuf>) -> Result<()> {
    helpers::print_banner("run");

    let config = load_config(path.as_deref());
    let options = BotOptions::from(&config.dispatch);
    let registry = PluginRegistry::with_builtins();

    let mut bots = connect_bots(&config, &options).await;
    if bots.is_empty() {
        println!("  ⚠  No bot connected. Enable and configure a backend in");
        println!("     ~/.abylebot/config.json (see `abylebot status`).");
        println!();
        return Ok(());
    }

    for bot in &mut bots {
        let attached = attach_plugins(bot, &config.plugins, &registry);
        println!("  {:<10} {} plugin(s)", bot.name(), attached);
    }
    println!();
    println!("  Ctrl+C to stop");
    println!();

    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "cannot listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
        println!();
        println!("  Shutting down...");
    };

    let count = run_until(bots, ctrl_c).await;
    info!(bots = count, "all bots stopped");
    println!("  Stopped. Goodbye!");
    Ok(())
}
