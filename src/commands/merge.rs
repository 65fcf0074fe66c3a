//! # Merge Command Implementation
//!
//! Runs a complete regeneration of a release: every kit branch is rebuilt
//! from its source collection, committed, and recorded in the meta-repo.
//! A summary of per-kit metadata errors and warnings is printed whether or
//! not the run succeeds.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Args;
use log::info;

use kit_merge::config;
use kit_merge::kit::default_metadata_workers;
use kit_merge::metadata::extractor::EbuildShExtractor;
use kit_merge::output::{emoji, format_summary, OutputConfig};
use kit_merge::repository::GitTreeFactory;
use kit_merge::scheduler::{JobController, RunOptions};

use super::WorkPaths;

/// Regenerate every kit of a release
#[derive(Args, Debug)]
pub struct MergeArgs {
    /// Path to the release YAML file.
    #[arg(short, long, value_name = "FILE", default_value = "release.yaml")]
    pub release: PathBuf,

    #[command(flatten)]
    pub paths: WorkPaths,

    /// Push kit trees and the meta-repo after committing.
    #[arg(long)]
    pub push: bool,

    /// Mirror kit trees and the meta-repo after the run.
    #[arg(long)]
    pub mirror: bool,

    /// Production mode: leave output trees on the generated branch.
    #[arg(long)]
    pub prod: bool,

    /// Do not write updated metadata caches back to disk.
    #[arg(long)]
    pub no_save_cache: bool,

    /// Number of metadata extraction workers per kit (default: number of CPUs).
    #[arg(short, long, value_name = "NUM")]
    pub jobs: Option<usize>,

    /// Path to the `ebuild.sh` used to extract ebuild metadata.
    #[arg(
        long,
        value_name = "FILE",
        env = "KIT_MERGE_EBUILD_SH",
        default_value = "/usr/lib/portage/python3/ebuild.sh"
    )]
    pub extractor: PathBuf,
}

impl MergeArgs {
    /// Combine command-line flags with the release's own settings.
    fn run_options(&self, release: &config::Release) -> RunOptions {
        RunOptions {
            push: self.push || release.push,
            mirror: self.mirror || release.mirror,
            prod: self.prod || release.prod,
            save_cache: !self.no_save_cache,
            metadata_workers: self.jobs.unwrap_or_else(default_metadata_workers).max(1),
            ..RunOptions::default()
        }
    }
}

/// Execute the `merge` command.
pub fn execute(args: MergeArgs, color_flag: &str) -> Result<()> {
    let out = OutputConfig::from_env_and_flag(color_flag);
    let release = config::from_file(&args.release)
        .with_context(|| format!("Failed to load release from {}", args.release.display()))?;
    let options = args.run_options(&release);
    let paths = args.paths.resolve();
    info!(
        "Merging release {} into {}",
        release.release,
        paths.dest_trees.display()
    );

    let mut controller = JobController::new(
        release,
        paths,
        options,
        Arc::new(GitTreeFactory),
        Arc::new(EbuildShExtractor::new(args.extractor.clone())),
    )?;

    let result = controller.run();
    print!("{}", format_summary(&out, &controller.summary()));
    result.context("Release merge failed")?;

    println!("{} Release merged successfully", emoji(&out, "✅", "[OK]"));
    Ok(())
}
