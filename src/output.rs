//! # Output Configuration
//!
//! Controls how the CLI presents results: color and emoji support based on
//! terminal capabilities and user preferences, and the end-of-run summary.
//!
//! ## Respecting User Preferences
//!
//! The module respects the following environment variables and flags:
//! - `--color=never|always|auto` - CLI flag for color control
//! - `NO_COLOR` - Disables colors when set (per https://no-color.org/)
//! - `CLICOLOR=0` - Disables colors
//! - `CLICOLOR_FORCE=1` - Forces colors even in non-TTY
//! - `TERM=dumb` - Disables colors for dumb terminals

use std::env;
use std::fmt::Write as _;

use console::style;

use crate::kit::JobState;
use crate::scheduler::RunSummary;

/// Output configuration for controlling colors and emojis.
#[derive(Debug, Clone)]
pub struct OutputConfig {
    /// Whether colors and emojis should be used in output.
    pub use_color: bool,
}

impl OutputConfig {
    /// Create an output configuration from environment and CLI flag.
    ///
    /// `color_flag` is the value of `--color`: "always", "never", or "auto".
    /// In auto mode colors are disabled when `NO_COLOR` is set, `CLICOLOR=0`,
    /// `TERM=dumb`, or stdout is not a TTY (unless `CLICOLOR_FORCE=1`).
    pub fn from_env_and_flag(color_flag: &str) -> Self {
        let use_color = match color_flag.to_lowercase().as_str() {
            "always" => true,
            "never" => false,
            _ => Self::detect_color_support(),
        };

        Self { use_color }
    }

    fn detect_color_support() -> bool {
        if env::var_os("NO_COLOR").is_some() {
            return false;
        }

        if env::var("CLICOLOR").is_ok_and(|v| v == "0") {
            return false;
        }

        if env::var("CLICOLOR_FORCE").is_ok_and(|v| v != "0" && !v.is_empty()) {
            return true;
        }

        if env::var("TERM").is_ok_and(|v| v == "dumb") {
            return false;
        }

        console::Term::stdout().features().colors_supported()
    }

    /// Configuration with colors and emojis forced on.
    pub fn with_color() -> Self {
        Self { use_color: true }
    }

    /// Configuration with plain text output.
    pub fn without_color() -> Self {
        Self { use_color: false }
    }
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self::from_env_and_flag("auto")
    }
}

/// Returns the emoji when colors are enabled and the plain alternative otherwise.
pub fn emoji<'a>(config: &OutputConfig, emoji_str: &'a str, plain: &'a str) -> &'a str {
    if config.use_color {
        emoji_str
    } else {
        plain
    }
}

fn state_marker<'a>(config: &OutputConfig, state: JobState) -> &'a str {
    match state {
        JobState::Committed => emoji(config, "✅", "[OK]"),
        JobState::Failed => emoji(config, "❌", "[FAILED]"),
        JobState::Pending | JobState::Running => emoji(config, "⏸️", "[SKIPPED]"),
    }
}

/// Render the end-of-run summary.
pub fn format_summary(config: &OutputConfig, summary: &RunSummary) -> String {
    let paint = |text: String, color: console::Color| {
        if config.use_color {
            style(text).fg(color).force_styling(true).to_string()
        } else {
            text
        }
    };

    let mut out = String::new();
    let _ = writeln!(out, "{} Kit summary:", emoji(config, "📦", "[SUMMARY]"));
    for kit in &summary.kits {
        let mut line = format!("  {} {}", state_marker(config, kit.state), kit.label);
        if kit.ebuilds > 0 {
            let _ = write!(line, ": {} ebuilds", kit.ebuilds);
        }
        if kit.errors > 0 {
            line.push_str(&paint(format!(", {} metadata errors", kit.errors), console::Color::Red));
        }
        if kit.warnings > 0 {
            line.push_str(&paint(format!(", {} warnings", kit.warnings), console::Color::Yellow));
        }
        let _ = writeln!(out, "{}", line);
    }

    let _ = writeln!(
        out,
        "Totals: {} metadata errors, {} warnings",
        summary.total_errors(),
        summary.total_warnings()
    );
    if let Some(commit) = &summary.meta_commit {
        let _ = writeln!(out, "Meta-repo: {}", commit);
    }
    if !summary.mirror_failures.is_empty() {
        let _ = writeln!(
            out,
            "{}",
            paint(
                format!("{} Mirroring failed for:", emoji(config, "⚠️ ", "[WARN]")),
                console::Color::Yellow
            )
        );
        for failure in &summary.mirror_failures {
            let _ = writeln!(out, "  {}", failure);
        }
    }
    out
}
