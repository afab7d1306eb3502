//! `abylebot status`: config path and per-backend configuration.

use std::path::PathBuf;

use anyhow::Result;
use colored::Colorize;

use abylebot_core::config::{get_config_path, load_config, Config};

use crate::helpers::{missing_mark, ok_mark};

/// Row for the backend table.
#[derive(Debug, PartialEq)]
pub struct BackendRow {
    pub name: &'static str,
    pub enabled: bool,
    pub configured: bool,
    pub detail: String,
}

pub fn backend_rows(config: &Config) -> Vec<BackendRow> {
    let bots = &config.bots;
    vec![
        BackendRow {
            name: "discord",
            enabled: bots.discord.enabled,
            configured: bots.discord.is_configured(),
            detail: "token".into(),
        },
        BackendRow {
            name: "slack",
            enabled: bots.slack.enabled,
            configured: bots.slack.is_configured(),
            detail: "bot + app token".into(),
        },
        BackendRow {
            name: "matrix",
            enabled: bots.matrix.enabled,
            configured: bots.matrix.is_configured(),
            detail: if bots.matrix.server.is_empty() {
                "server".into()
            } else {
                format!("{}, {} room(s)", bots.matrix.server, bots.matrix.rooms.len())
            },
        },
    ]
}

/// Run the status command.
pub fn run(path: Option<PathBuf>) -> Result<()> {
    let config_path = path.unwrap_or_else(get_config_path);
    let config = load_config(Some(config_path.as_path()));

    println!();
    println!("{}", "Abylebot Status".cyan().bold());
    println!();

    println!(
        "  {:<14} {} {}",
        "Config:".bold(),
        config_path.display(),
        if config_path.exists() {
            "✓".green().to_string()
        } else {
            "(not found)".red().to_string()
        }
    );

    println!();
    println!("  {}", "Backends:".bold());
    for row in backend_rows(&config) {
        let status = match (row.enabled, row.configured) {
            (true, true) => ok_mark(&format!("enabled ({})", row.detail)),
            (true, false) => format!("{} missing {}", "!".yellow(), row.detail),
            (false, true) => missing_mark("configured, disabled"),
            (false, false) => missing_mark("not configured"),
        };
        println!("    {:<12} {}", row.name, status);
    }

    println!();
    println!("  {:<14} {}", "Plugins:".bold(), config.plugins.len());
    let d = &config.dispatch;
    println!(
        "  {:<14} {}",
        "Buffers:".bold(),
        format!(
            "plugin {} | send {} | command {} | stop grace {}ms",
            d.plugin_buffer_size, d.send_buffer_size, d.command_buffer_size, d.stop_grace_ms
        )
        .dimmed()
    );
    println!();

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rows_for_default_config() {
        let rows = backend_rows(&Config::default());
        assert_eq!(rows.len(), 3);
        assert!(rows.iter().all(|r| !r.enabled && !r.configured));
        assert_eq!(rows[2].detail, "server");
    }

    #[test]
    fn test_rows_reflect_credentials() {
        let mut config = Config::default();
        config.bots.discord.enabled = true;
        config.bots.discord.token = "t".into();
        config.bots.matrix.server = "https://hs".into();
        config.bots.matrix.token = "m".into();
        config.bots.matrix.rooms = vec!["#a:hs".into()];

        let rows = backend_rows(&config);
        assert!(rows[0].enabled && rows[0].configured);
        assert!(!rows[1].configured);
        assert!(rows[2].configured);
        assert_eq!(rows[2].detail, "https://hs, 1 room(s)");
    }
}
