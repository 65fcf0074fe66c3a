//! # kit-merge CLI
//!
//! Binary entry point for the `kit-merge` command-line tool. It parses
//! arguments with `clap`, sets up logging and dispatches to the command
//! implementations. All regeneration logic lives in the library crate.

mod cli;
mod commands;

use anyhow::Result;
use clap::Parser;

fn main() -> Result<()> {
    let cli = cli::Cli::parse();
    cli.execute()
}
