//! Thin wrappers around the system `git` binary.
//!
//! Using the system command means SSH keys, credential helpers and anything
//! else configured in `~/.gitconfig` work without extra setup. Every failure is
//! reported as [`Error::GitCommand`] carrying the command and git's stderr.

use std::fs;
use std::path::Path;
use std::process::Command;

use log::debug;

use crate::config::SourceRepoDef;
use crate::error::{Error, Result};

/// Identity used for commits when git has none configured.
const FALLBACK_NAME: &str = "kit-merge";
const FALLBACK_EMAIL: &str = "kit-merge@localhost";

fn git_error(dir: &Path, args: &[&str], stderr: impl Into<String>) -> Error {
    Error::GitCommand {
        command: format!("git {}", args.join(" ")),
        tree: dir.display().to_string(),
        stderr: stderr.into(),
    }
}

/// Run `git <args>` in `dir` and return trimmed stdout.
pub fn run(dir: &Path, args: &[&str]) -> Result<String> {
    debug!("git {} (in {})", args.join(" "), dir.display());
    let output = Command::new("git")
        .args(args)
        .current_dir(dir)
        .output()
        .map_err(|e| git_error(dir, args, e.to_string()))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        let message = if stderr.contains("Authentication failed")
            || stderr.contains("Permission denied")
            || stderr.contains("Could not read from remote repository")
        {
            format!(
                "Authentication failed. Make sure you have access to the remote.\n\
                Error: {}",
                stderr.trim()
            )
        } else {
            stderr.trim().to_string()
        };
        return Err(git_error(dir, args, message));
    }
    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

/// Whether `dir` is the top of a git work tree.
pub fn is_repo(dir: &Path) -> bool {
    dir.join(".git").exists()
}

/// Create an empty repository at `dir` with `branch` as its initial branch.
pub fn init(dir: &Path, branch: &str) -> Result<()> {
    fs::create_dir_all(dir)?;
    run(dir, &["init", "--quiet"])?;
    run(dir, &["symbolic-ref", "HEAD", &format!("refs/heads/{}", branch)])?;
    Ok(())
}

/// Clone `url` into `target_dir`, replacing anything already there.
pub fn clone(url: &str, branch: Option<&str>, target_dir: &Path) -> Result<()> {
    if target_dir.exists() {
        fs::remove_dir_all(target_dir)?;
    }
    let parent = match target_dir.parent() {
        Some(parent) => parent,
        None => Path::new("."),
    };
    fs::create_dir_all(parent)?;

    let target = target_dir.display().to_string();
    let mut args = vec!["clone", "--quiet"];
    if let Some(branch) = branch {
        args.push("--branch");
        args.push(branch);
    }
    args.push(url);
    args.push(&target);
    run(parent, &args).map(|_| ())
}

/// Whether a local branch exists.
pub fn has_branch(dir: &Path, branch: &str) -> bool {
    run(
        dir,
        &["rev-parse", "--verify", "--quiet", &format!("refs/heads/{}", branch)],
    )
    .is_ok()
}

/// Whether the repository has any commit yet.
pub fn has_commits(dir: &Path) -> bool {
    run(dir, &["rev-parse", "--verify", "--quiet", "HEAD"]).is_ok()
}

/// Check out a branch or revision.
///
/// A branch that exists neither locally nor on `origin` is created as an
/// orphan so a kit branch can start from nothing.
pub fn checkout(dir: &Path, target: &str) -> Result<()> {
    if !has_commits(dir) {
        return run(dir, &["symbolic-ref", "HEAD", &format!("refs/heads/{}", target)]).map(|_| ());
    }
    if has_branch(dir, target)
        || run(dir, &["rev-parse", "--verify", "--quiet", &format!("{}^{{commit}}", target)])
            .is_ok()
    {
        return run(dir, &["checkout", "--quiet", target]).map(|_| ());
    }
    let remote = format!("origin/{}", target);
    if run(dir, &["rev-parse", "--verify", "--quiet", &remote]).is_ok() {
        return run(dir, &["checkout", "--quiet", "-b", target, &remote]).map(|_| ());
    }
    run(dir, &["checkout", "--quiet", "--orphan", target]).map(|_| ())
}

/// Current revision.
pub fn head(dir: &Path) -> Result<String> {
    run(dir, &["rev-parse", "HEAD"])
}

/// Name of the checked-out branch.
pub fn current_branch(dir: &Path) -> Result<String> {
    run(dir, &["symbolic-ref", "--short", "HEAD"])
}

fn identity_args(dir: &Path) -> Vec<String> {
    let mut args = Vec::new();
    if run(dir, &["config", "user.name"]).is_err() {
        args.push("-c".to_string());
        args.push(format!("user.name={}", FALLBACK_NAME));
    }
    if run(dir, &["config", "user.email"]).is_err() {
        args.push("-c".to_string());
        args.push(format!("user.email={}", FALLBACK_EMAIL));
    }
    args
}

/// Stage everything and commit. Returns `false` when there was nothing to
/// commit.
pub fn commit_all(dir: &Path, message: &str) -> Result<bool> {
    run(dir, &["add", "-A", "."])?;
    let status = run(dir, &["status", "--porcelain"])?;
    if status.is_empty() && has_commits(dir) {
        return Ok(false);
    }
    let mut args = identity_args(dir);
    args.extend(
        ["commit", "--quiet", "--allow-empty", "-m", message]
            .iter()
            .map(|s| s.to_string()),
    );
    let args: Vec<&str> = args.iter().map(String::as_str).collect();
    run(dir, &args)?;
    Ok(true)
}

/// Push `branch` to `origin`.
pub fn push(dir: &Path, branch: &str) -> Result<()> {
    run(dir, &["push", "--quiet", "origin", branch]).map(|_| ())
}

/// Bring a source repository checkout at `dir` to the state its definition asks
/// for: cloned, on its branch, and at `src_sha1` when pinned.
pub fn sync_source(repo: &SourceRepoDef, dir: &Path) -> Result<()> {
    if !is_repo(dir) {
        let url = repo.url.as_deref().ok_or_else(|| Error::ConfigParse {
            message: format!(
                "Source repository '{}' has no url and no checkout at {}",
                repo.name,
                dir.display()
            ),
            hint: None,
        })?;
        clone(url, Some(&repo.branch), dir)?;
    } else if repo.url.is_some() {
        run(dir, &["fetch", "--quiet", "origin"])?;
    }

    checkout(dir, &repo.branch)?;
    if let Some(sha1) = &repo.src_sha1 {
        run(dir, &["checkout", "--quiet", sha1])?;
    } else if repo.url.is_some() {
        let remote = format!("origin/{}", repo.branch);
        if run(dir, &["rev-parse", "--verify", "--quiet", &remote]).is_ok() {
            run(dir, &["reset", "--quiet", "--hard", &remote])?;
        }
    }
    Ok(())
}

/// Mirror the repository at `source` to `url`: a bare clone in `staging`
/// followed by `git push --mirror`.
pub fn mirror(source: &Path, url: &str, staging: &Path) -> Result<()> {
    clone_bare(source, staging)?;
    let result = run(staging, &["push", "--quiet", "--mirror", url]).map(|_| ());
    if staging.exists() {
        fs::remove_dir_all(staging)?;
    }
    result
}

fn clone_bare(source: &Path, staging: &Path) -> Result<()> {
    if staging.exists() {
        fs::remove_dir_all(staging)?;
    }
    let parent = match staging.parent() {
        Some(parent) => parent,
        None => Path::new("."),
    };
    fs::create_dir_all(parent)?;
    let source = source.display().to_string();
    let target = staging.display().to_string();
    run(parent, &["clone", "--quiet", "--bare", &source, &target]).map(|_| ())
}
