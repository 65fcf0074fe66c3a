//! # kit-merge
//!
//! This library regenerates a set of package-repository "kits" from upstream
//! source repositories, writes per-ebuild metadata caches for each kit and
//! records the results in a meta-repository. It backs the `kit-merge`
//! command-line tool.
//!
//! ## Quick Example
//!
//! ```
//! use kit_merge::eclass::HashCollection;
//!
//! let core = HashCollection::from_hashes(vec![], [("foo", "h1"), ("bar", "h2")]);
//! let local = HashCollection::from_hashes(vec![], [("foo", "h3")]);
//!
//! // The right-hand side wins on name collisions.
//! let merged = core.merge(&local);
//! assert_eq!(merged.get("foo"), Some("h3"));
//! assert_eq!(merged.get("bar"), Some("h2"));
//! ```
//!
//! ## Core Concepts
//!
//! - **Configuration (`config`)**: The release YAML: source collections, kit
//!   declarations, fixups and meta-repo settings.
//! - **Eclass collections (`eclass`)**: Name to content-hash maps merged in
//!   master order to resolve `INHERITED` eclasses.
//! - **Metadata (`metadata`)**: Atom environments, md5-cache entries, the
//!   extractor seam and the per-kit cache with its error logs.
//! - **Steps (`steps`)**: Idempotent mutations of an output tree.
//! - **Trees (`repository`, `git`)**: Version-controlled output trees behind a
//!   trait, with a git implementation.
//! - **Jobs and scheduling (`kit`, `scheduler`)**: One job per kit branch,
//!   grouped into a master pipeline and parallel pipelines.
//! - **Meta-repo (`metarepo`)**: The JSON metadata describing a release's kits.
//!
//! ## Execution Flow
//!
//! [`scheduler::JobController::run`] drives a release:
//!
//! 1.  **Setup**: Remove stale error logs, initialize the meta-repo and sync
//!     the fixups repository.
//! 2.  **Masters**: Run every master kit one at a time.
//! 3.  **Pipelines**: Run each parallel pipeline in turn, its jobs concurrently.
//! 4.  **Meta-repo**: Write `kit-sha1.json`, `kit-info.json` and `version.json`
//!     and commit.
//! 5.  **Finish**: Check out preferred branches and mirror trees when requested.

pub mod config;
pub mod eclass;
pub mod error;
pub mod git;
pub mod kit;
pub mod metadata;
pub mod metarepo;
pub mod output;
pub mod repository;
pub mod scheduler;
pub mod steps;
