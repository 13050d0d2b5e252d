pub mod activate;
pub mod completions;
pub mod config;
pub mod create;
pub mod deactivate;
pub mod delete;
pub mod list;
pub mod man_pages;
pub mod pack;
pub mod restore;
pub mod status;

use indicatif::{ProgressBar, ProgressStyle};
use std::io::{stderr, stdin, IsTerminal};
use std::time::Duration;

pub const EXIT_SUCCESS: u8 = 0;
pub const EXIT_FAILURE: u8 = 1;
pub const EXIT_DESCRIPTOR_ERROR: u8 = 2;
pub const EXIT_STORE_ERROR: u8 = 3;

pub fn json_pretty(value: &impl serde::Serialize) -> Result<String, String> {
    serde_json::to_string_pretty(value).map_err(|e| format!("JSON serialization failed: {e}"))
}

/// Prompts are only shown when both stdin and stderr are terminals.
pub fn is_interactive() -> bool {
    stdin().is_terminal() && stderr().is_terminal()
}

fn plain_style() -> ProgressStyle {
    ProgressStyle::with_template("{msg}").unwrap_or_else(|_| ProgressStyle::default_spinner())
}

pub fn spinner(msg: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    let style = ProgressStyle::with_template("{spinner:.cyan} {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_spinner())
        .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]);
    pb.set_style(style);
    pb.set_message(msg.to_owned());
    pb.enable_steady_tick(Duration::from_millis(80));
    pb
}

/// A spinner unless output is JSON.
pub fn maybe_spinner(json: bool, msg: &str) -> Option<ProgressBar> {
    if json {
        None
    } else {
        Some(spinner(msg))
    }
}

pub fn spin_ok(pb: &ProgressBar, msg: &str) {
    pb.set_style(plain_style());
    pb.finish_with_message(format!("✓ {msg}"));
}

pub fn spin_fail(pb: &ProgressBar, msg: &str) {
    pb.set_style(plain_style());
    pb.finish_with_message(format!("✗ {msg}"));
}

/// Color `text` by the status or container state it stands for.
pub fn colorize_status(status: &str, text: &str) -> String {
    use console::Style;
    match status {
        "running" => Style::new().cyan().bold().apply_to(text).to_string(),
        "exited" => Style::new().yellow().apply_to(text).to_string(),
        "absent" => Style::new().dim().apply_to(text).to_string(),
        _ => text.to_owned(),
    }
}
