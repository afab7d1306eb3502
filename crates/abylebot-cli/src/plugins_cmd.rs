//! `abylebot plugins`: validate every configured plugin entry.

use std::path::PathBuf;

use anyhow::Result;
use colored::Colorize;

use abylebot_core::config::{load_config, PluginConfig};
use abylebot_core::ConfigError;
use abylebot_plugins::PluginRegistry;

use crate::helpers::{error_mark, ok_mark};

/// Build every entry once and collect the outcome.
pub fn validate(
    registry: &PluginRegistry,
    plugins: &[PluginConfig],
) -> Vec<(String, Result<(), ConfigError>)> {
    plugins
        .iter()
        .map(|cfg| (cfg.plugin_type.clone(), registry.build(cfg).map(|_| ())))
        .collect()
}

pub fn run(path: Option<PathBuf>) -> Result<()> {
    let config = load_config(path.as_deref());
    let registry = PluginRegistry::with_builtins();

    println!();
    println!("{}", "Plugins".cyan().bold());
    println!(
        "  {}",
        format!("available: {}", registry.plugin_types().join(", ")).dimmed()
    );
    println!();

    if config.plugins.is_empty() {
        println!("  No plugins configured.");
        println!();
        return Ok(());
    }

    let results = validate(&registry, &config.plugins);
    for ((name, result), cfg) in results.iter().zip(&config.plugins) {
        let bots = if cfg.bots.is_empty() {
            "all bots".to_string()
        } else {
            cfg.bots.join(", ")
        };
        let status = match result {
            Ok(()) => ok_mark("OK"),
            Err(e) => error_mark(&e.to_string()),
        };
        println!("    {:<12} {:<24} {}", name, bots.dimmed(), status);
    }
    println!();

    let failed = results.iter().filter(|(_, r)| r.is_err()).count();
    if failed > 0 {
        anyhow::bail!("{failed} plugin entr{} invalid", if failed == 1 { "y is" } else { "ies are" });
    }
    Ok(())
}
