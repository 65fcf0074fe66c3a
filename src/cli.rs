//! CLI argument parsing, logging setup and command dispatch

use std::io::Write;

use anyhow::{anyhow, Result};
use clap::{Parser, Subcommand};
use console::style;
use env_logger::Builder;
use kit_merge::output::OutputConfig;
use log::{Level, LevelFilter};

use crate::commands;

/// Log target of everything this crate emits.
const LOG_TARGET: &str = "kit_merge";

/// kit-merge - Regenerate kits from source repositories and publish a meta-repo
#[derive(Parser, Debug)]
#[command(name = "kit-merge")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    command: Commands,

    /// Colorize output (always, never, auto)
    #[arg(long, global = true, value_name = "WHEN", default_value = "auto")]
    color: String,

    /// Set log level (error, warn, info, debug, trace)
    #[arg(long, global = true, value_name = "LEVEL", default_value = "info")]
    log_level: String,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Regenerate every kit of a release and commit the meta-repo
    Merge(commands::merge::MergeArgs),

    /// Show how kits are grouped into pipelines without touching any tree
    Plan(commands::plan::PlanArgs),

    /// Inspect or clean the per-kit metadata caches
    Cache(commands::cache::CacheArgs),
}

impl Cli {
    /// Execute the CLI command
    pub fn execute(self) -> Result<()> {
        let use_color = OutputConfig::from_env_and_flag(&self.color).use_color;
        setup_logging(&self.log_level, use_color)?;

        match self.command {
            Commands::Merge(args) => commands::merge::execute(args, &self.color),
            Commands::Plan(args) => commands::plan::execute(args, &self.color),
            Commands::Cache(args) => commands::cache::execute(args, &self.color),
        }
    }
}

/// Install `env_logger`. Dependencies log at `warn`; this crate logs at
/// `level`. `RUST_LOG` overrides both.
fn setup_logging(level: &str, use_color: bool) -> Result<()> {
    let level: LevelFilter = level
        .parse()
        .map_err(|_| anyhow!("Invalid log level '{}'. Expected error, warn, info, debug or trace", level))?;

    Builder::new()
        .filter_level(LevelFilter::Warn)
        .filter_module(LOG_TARGET, level)
        .parse_default_env()
        .format(move |buf, record| {
            let name = if use_color {
                style(LOG_TARGET).cyan().to_string()
            } else {
                LOG_TARGET.to_string()
            };
            match record.level() {
                Level::Error | Level::Warn => {
                    let label = match (record.level(), use_color) {
                        (Level::Error, true) => style("ERROR").red().to_string(),
                        (Level::Error, false) => "ERROR".to_string(),
                        (_, true) => style("WARN").yellow().to_string(),
                        (_, false) => "WARN".to_string(),
                    };
                    writeln!(buf, "[{} {}] {}", name, label, record.args())
                }
                _ => writeln!(buf, "[{}] {}", name, record.args()),
            }
        })
        .try_init()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_merge_flags() {
        let cli = Cli::try_parse_from([
            "kit-merge",
            "merge",
            "--release",
            "release.yaml",
            "--push",
            "--jobs",
            "4",
            "--no-save-cache",
        ])
        .unwrap();
        match cli.command {
            Commands::Merge(args) => {
                assert!(args.push);
                assert!(args.no_save_cache);
                assert_eq!(args.jobs, Some(4));
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_invalid_log_level() {
        let err = setup_logging("chatty", false).unwrap_err();
        assert!(err.to_string().contains("Invalid log level"));
    }
}
