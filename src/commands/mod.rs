//! # CLI Command Implementations
//!
//! Each subcommand of `kit-merge` lives in its own module with:
//! - An `Args` struct defining the command-specific options, derived with `clap`.
//! - An `execute` function that takes the parsed `Args` and calls into the
//!   `kit_merge` library.

pub mod cache;
pub mod merge;
pub mod plan;

use std::path::PathBuf;

use clap::Args;
use kit_merge::config::{default_work_root, Paths};

/// Working directories shared by the commands.
#[derive(Args, Debug, Clone, Default)]
pub struct WorkPaths {
    /// Directory holding the kit output trees and the meta-repo.
    #[arg(long, value_name = "DIR", env = "KIT_MERGE_DEST")]
    pub dest: Option<PathBuf>,

    /// Directory holding the source repository checkouts.
    #[arg(long, value_name = "DIR", env = "KIT_MERGE_SOURCES")]
    pub sources: Option<PathBuf>,

    /// Scratch directory for kit caches, error logs and mirror staging.
    ///
    /// Defaults to `tmp` under the platform cache directory
    /// (e.g. `~/.cache/kit-merge/tmp` on Linux).
    #[arg(long, value_name = "DIR", env = "KIT_MERGE_TEMP")]
    pub temp: Option<PathBuf>,
}

impl WorkPaths {
    /// Resolve flags and environment against the default layout.
    pub fn resolve(&self) -> Paths {
        let defaults = Paths::under(&default_work_root());
        Paths {
            dest_trees: self.dest.clone().unwrap_or(defaults.dest_trees),
            source_trees: self.sources.clone().unwrap_or(defaults.source_trees),
            temp: self.temp.clone().unwrap_or(defaults.temp),
        }
    }
}
