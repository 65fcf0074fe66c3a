//! # Cache Command Implementation
//!
//! Inspects and cleans the per-kit metadata cache snapshots kept in the
//! scratch directory.
//!
//! ## Subcommands
//!
//! - **`list`**: Show every snapshot with its atom and error counts and whether
//!   its format version is current.
//! - **`clean`**: Remove outdated or unreadable snapshots (`--outdated`) or all of them (`--all`).

use std::fs;
use std::path::Path;

use anyhow::{bail, Result};
use clap::{Args, Subcommand};
use log::warn;
use serde_json::json;

use kit_merge::metadata::cache::{inspect, SnapshotInfo};
use kit_merge::output::{emoji, OutputConfig};

use super::WorkPaths;

/// Manage metadata caches
#[derive(Args, Debug)]
pub struct CacheArgs {
    #[command(flatten)]
    pub paths: WorkPaths,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: CacheSubcommand,
}

#[derive(Subcommand, Debug)]
pub enum CacheSubcommand {
    /// List kit cache snapshots
    List(ListArgs),
    /// Remove kit cache snapshots
    Clean(CleanArgs),
}

/// Arguments for the cache list command
#[derive(Args, Debug)]
pub struct ListArgs {
    /// Output in JSON format
    #[arg(long)]
    pub json: bool,
}

/// Arguments for the cache clean command
#[derive(Args, Debug)]
pub struct CleanArgs {
    /// Remove snapshots written with another cache format version
    #[arg(long)]
    pub outdated: bool,

    /// Remove every snapshot
    #[arg(long)]
    pub all: bool,

    /// Show what would be deleted without deleting anything
    #[arg(long)]
    pub dry_run: bool,
}

/// A snapshot file and what could be read from it.
struct Entry {
    name: String,
    info: Option<SnapshotInfo>,
}

/// Execute the `cache` command.
pub fn execute(args: CacheArgs, color_flag: &str) -> Result<()> {
    let out = OutputConfig::from_env_and_flag(color_flag);
    let cache_dir = args.paths.resolve().kit_cache_dir();
    match args.command {
        CacheSubcommand::List(list_args) => execute_list(&cache_dir, list_args),
        CacheSubcommand::Clean(clean_args) => execute_clean(&cache_dir, clean_args, &out),
    }
}

fn scan(cache_dir: &Path) -> Result<Vec<Entry>> {
    if !cache_dir.is_dir() {
        return Ok(Vec::new());
    }
    let mut entries = Vec::new();
    for entry in fs::read_dir(cache_dir)? {
        let path = entry?.path();
        if !path.is_file() {
            continue;
        }
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        let info = match inspect(&path) {
            Ok(info) => Some(info),
            Err(e) => {
                warn!("Cannot read cache snapshot {}: {}", path.display(), e);
                None
            }
        };
        entries.push(Entry { name, info });
    }
    entries.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(entries)
}

fn execute_list(cache_dir: &Path, args: ListArgs) -> Result<()> {
    let entries = scan(cache_dir)?;

    if args.json {
        let values: Vec<serde_json::Value> = entries
            .iter()
            .map(|e| match &e.info {
                Some(info) => json!({
                    "name": e.name,
                    "version": info.version,
                    "current": info.is_current(),
                    "atoms": info.atoms,
                    "failed": info.failed,
                    "errors": info.errors,
                }),
                None => json!({ "name": e.name, "current": false }),
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&values)?);
        return Ok(());
    }

    if entries.is_empty() {
        println!("No kit caches found in: {}", cache_dir.display());
        return Ok(());
    }

    println!("{:<40} {:>8} {:>8} {:>8}  VERSION", "KIT", "ATOMS", "FAILED", "ERRORS");
    for entry in &entries {
        match &entry.info {
            Some(info) => println!(
                "{:<40} {:>8} {:>8} {:>8}  {}",
                entry.name,
                info.atoms,
                info.failed,
                info.errors,
                if info.is_current() { "current" } else { "outdated" }
            ),
            None => println!("{:<40} {:>8} {:>8} {:>8}  unreadable", entry.name, "-", "-", "-"),
        }
    }
    Ok(())
}

fn execute_clean(cache_dir: &Path, args: CleanArgs, out: &OutputConfig) -> Result<()> {
    if !args.all && !args.outdated {
        bail!("Specify what to clean: --outdated or --all");
    }

    let doomed: Vec<Entry> = scan(cache_dir)?
        .into_iter()
        .filter(|e| args.all || !e.info.as_ref().is_some_and(SnapshotInfo::is_current))
        .collect();

    if doomed.is_empty() {
        println!("No kit caches match the specified criteria.");
        return Ok(());
    }

    for entry in &doomed {
        if args.dry_run {
            println!("  would delete {}", entry.name);
            continue;
        }
        fs::remove_file(cache_dir.join(&entry.name))?;
        println!("  {} Deleted: {}", emoji(out, "🗑️ ", "[DEL]"), entry.name);
    }
    if args.dry_run {
        println!("\n{} Dry run mode - no changes were made.", emoji(out, "🔎", "[DRY]"));
    }
    Ok(())
}
