//! Shared CLI helpers: path expansion, banner and status marks.

use std::path::PathBuf;

use colored::Colorize;

/// Expand `~` at the start of a path to the user's home directory.
pub fn expand_tilde(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs_next::home_dir() {
            return home.join(rest);
        }
    }
    if path == "~" {
        if let Some(home) = dirs_next::home_dir() {
            return home;
        }
    }
    PathBuf::from(path)
}

/// Print the banner shown at startup.
pub fn print_banner(mode: &str) {
    println!();
    println!(
        "{}  v{}",
        "Abylebot".cyan().bold(),
        env!("CARGO_PKG_VERSION").dimmed()
    );
    println!("  Mode: {mode}");
    println!();
}

pub fn ok_mark(detail: &str) -> String {
    format!("{} {}", "✓".green(), detail)
}

pub fn missing_mark(detail: &str) -> String {
    format!("{}", format!("· {detail}").dimmed())
}

pub fn error_mark(detail: &str) -> String {
    format!("{} {}", "✗".red(), detail)
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────
