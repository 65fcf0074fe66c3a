//! # Version-Controlled Trees
//!
//! Every kit branch is written into an output tree, and the meta-repo is one
//! too. Jobs only talk to trees through the [`Tree`] trait so the scheduler
//! and steps can be exercised without a real git repository:
//!
//! - **`Tree`**: `initialize`, `root`, `checkout`, `head`, `commit`.
//! - **`TreeFactory`**: opens a tree for a [`TreeSpec`]. The controller receives
//!   a factory instead of constructing trees itself.
//!
//! `GitTree` and `GitTreeFactory` are the production implementations backed by
//! the system `git` command (see [`crate::git`]).

use std::path::{Path, PathBuf};

use log::info;

use crate::config::SourceRepoDef;
use crate::error::Result;
use crate::git;

/// A version-controlled directory that a job writes into.
pub trait Tree: Send + Sync {
    fn name(&self) -> &str;

    /// Branch this handle commits to.
    fn branch(&self) -> &str;

    fn root(&self) -> &Path;

    /// Make sure the tree exists and `branch` is checked out.
    fn initialize(&self) -> Result<()>;

    /// Check out a branch or revision.
    fn checkout(&self, target: &str) -> Result<()>;

    /// Current revision, or `None` before the first commit.
    fn head(&self) -> Result<Option<String>>;

    /// Commit everything under `root` and optionally push. Returns the
    /// resulting revision (the existing one when nothing changed).
    fn commit(&self, message: &str, push: bool) -> Result<String>;

    /// Remote this tree is mirrored to, if any.
    fn mirror_url(&self) -> Option<&str>;

    /// Push every ref of this tree to `url`, staging a bare copy at `staging`.
    fn mirror(&self, url: &str, staging: &Path) -> Result<()>;
}

/// Everything needed to open a tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreeSpec {
    pub name: String,
    pub branch: String,
    pub root: PathBuf,
    /// Remote to clone from when the tree does not exist yet.
    pub url: Option<String>,
    pub mirror: Option<String>,
}

/// Opens trees for jobs and the meta-repo, and keeps source checkouts current.
pub trait TreeFactory: Send + Sync {
    fn open(&self, spec: TreeSpec) -> Result<Box<dyn Tree>>;

    /// Bring the source repository checkout at `dir` to the revision `repo`
    /// asks for. Source checkouts are only ever read by jobs.
    fn sync_source(&self, repo: &SourceRepoDef, dir: &Path) -> Result<()>;
}

/// A tree backed by a git work tree on disk.
#[derive(Debug, Clone)]
pub struct GitTree {
    spec: TreeSpec,
}

impl GitTree {
    pub fn new(spec: TreeSpec) -> Self {
        Self { spec }
    }
}

impl Tree for GitTree {
    fn name(&self) -> &str {
        &self.spec.name
    }

    fn branch(&self) -> &str {
        &self.spec.branch
    }

    fn root(&self) -> &Path {
        &self.spec.root
    }

    fn initialize(&self) -> Result<()> {
        let root = &self.spec.root;
        if !git::is_repo(root) {
            match &self.spec.url {
                Some(url) => {
                    info!("Cloning {} into {}", url, root.display());
                    git::clone(url, None, root)?;
                }
                None => {
                    info!("Creating new tree {} at {}", self.spec.name, root.display());
                    git::init(root, &self.spec.branch)?;
                }
            }
        }
        git::checkout(root, &self.spec.branch)
    }

    fn checkout(&self, target: &str) -> Result<()> {
        git::checkout(&self.spec.root, target)
    }

    fn head(&self) -> Result<Option<String>> {
        if !git::has_commits(&self.spec.root) {
            return Ok(None);
        }
        git::head(&self.spec.root).map(Some)
    }

    fn commit(&self, message: &str, push: bool) -> Result<String> {
        let root = &self.spec.root;
        if !git::commit_all(root, message)? {
            info!("No changes in {} {}", self.spec.name, self.spec.branch);
        }
        if push {
            git::push(root, &self.spec.branch)?;
        }
        git::head(root)
    }

    fn mirror_url(&self) -> Option<&str> {
        self.spec.mirror.as_deref()
    }

    fn mirror(&self, url: &str, staging: &Path) -> Result<()> {
        git::mirror(&self.spec.root, url, staging)
    }
}

/// Opens [`GitTree`]s.
#[derive(Debug, Clone, Copy, Default)]
pub struct GitTreeFactory;

impl TreeFactory for GitTreeFactory {
    fn open(&self, spec: TreeSpec) -> Result<Box<dyn Tree>> {
        Ok(Box::new(GitTree::new(spec)))
    }

    fn sync_source(&self, repo: &SourceRepoDef, dir: &Path) -> Result<()> {
        info!("Initializing source repository {}", repo.name);
        git::sync_source(repo, dir)
    }
}
