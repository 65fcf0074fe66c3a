//! # Tree Steps
//!
//! A kit is regenerated by running an ordered list of [`Step`]s against its
//! output tree. Each variant is a small struct with an `apply(root)` method that
//! touches nothing outside `root` except reading from its declared source
//! directory.
//!
//! Every step is idempotent: applying the same list twice leaves the tree in the
//! same state as applying it once. Steps that copy overwrite what they copy,
//! and steps that remove ignore paths that are already gone.

use std::collections::BTreeSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use glob::Pattern;
use log::{debug, info};
use walkdir::WalkDir;

use crate::error::{Error, Result};
use crate::metadata::EBUILD_SUFFIX;

/// Top-level directories of a kit that are never categories.
const NON_CATEGORY_DIRS: [&str; 7] = [
    ".git",
    "eclass",
    "licenses",
    "metadata",
    "profiles",
    "scripts",
    "files",
];

/// One tree-mutation operation.
#[derive(Debug, Clone, PartialEq)]
pub enum Step {
    CleanTree(CleanTree),
    GenerateRepoMetadata(GenerateRepoMetadata),
    SyncDir(SyncDir),
    CopyFiles(CopyFiles),
    InsertEbuilds(InsertEbuilds),
    InsertFilesFromSubdir(InsertFilesFromSubdir),
    RemoveFiles(RemoveFiles),
    FindAndRemove(FindAndRemove),
    GenerateLicensingFile(GenerateLicensingFile),
    Minify(Minify),
    MaterializeSymlinks(MaterializeSymlinks),
    CreateCategories(CreateCategories),
}

impl Step {
    pub fn name(&self) -> &'static str {
        match self {
            Step::CleanTree(_) => "CleanTree",
            Step::GenerateRepoMetadata(_) => "GenerateRepoMetadata",
            Step::SyncDir(_) => "SyncDir",
            Step::CopyFiles(_) => "CopyFiles",
            Step::InsertEbuilds(_) => "InsertEbuilds",
            Step::InsertFilesFromSubdir(_) => "InsertFilesFromSubdir",
            Step::RemoveFiles(_) => "RemoveFiles",
            Step::FindAndRemove(_) => "FindAndRemove",
            Step::GenerateLicensingFile(_) => "GenerateLicensingFile",
            Step::Minify(_) => "Minify",
            Step::MaterializeSymlinks(_) => "MaterializeSymlinks",
            Step::CreateCategories(_) => "CreateCategories",
        }
    }

    /// Apply the step to the tree at `root`.
    pub fn apply(&self, root: &Path) -> Result<()> {
        match self {
            Step::CleanTree(s) => s.apply(root),
            Step::GenerateRepoMetadata(s) => s.apply(root),
            Step::SyncDir(s) => s.apply(root),
            Step::CopyFiles(s) => s.apply(root),
            Step::InsertEbuilds(s) => s.apply(root),
            Step::InsertFilesFromSubdir(s) => s.apply(root),
            Step::RemoveFiles(s) => s.apply(root),
            Step::FindAndRemove(s) => s.apply(root),
            Step::GenerateLicensingFile(s) => s.apply(root),
            Step::Minify(s) => s.apply(root),
            Step::MaterializeSymlinks(s) => s.apply(root),
            Step::CreateCategories(s) => s.apply(root),
        }
    }
}

/// Run `steps` in order, tagging the first failure with the step and kit.
pub fn run_steps(steps: &[Step], root: &Path, kit: &str) -> Result<()> {
    for step in steps {
        info!("Running step {} for {}", step.name(), root.display());
        step.apply(root).map_err(|e| match e {
            Error::Step { .. } => e,
            other => Error::Step {
                step: step.name().to_string(),
                kit: kit.to_string(),
                message: other.to_string(),
            },
        })?;
    }
    Ok(())
}

fn remove_path(path: &Path) -> io::Result<()> {
    match fs::symlink_metadata(path) {
        Ok(meta) if meta.is_dir() => fs::remove_dir_all(path),
        Ok(_) => fs::remove_file(path),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}

fn copy_file(src: &Path, dest: &Path) -> io::Result<()> {
    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent)?;
    }
    remove_path(dest)?;
    fs::copy(src, dest).map(|_| ())
}

/// Copy the contents of `src` into `dest`. Files for which `keep` returns
/// `false` (given their path relative to `src`) are skipped.
fn copy_tree<F>(src: &Path, dest: &Path, keep: F) -> Result<usize>
where
    F: Fn(&Path) -> bool,
{
    let mut copied = 0;
    for entry in WalkDir::new(src).min_depth(1).follow_links(true) {
        let entry = entry.map_err(|e| Error::Filesystem {
            message: format!("Failed to walk {}: {}", src.display(), e),
        })?;
        let rel = entry.path().strip_prefix(src).map_err(|e| Error::Filesystem {
            message: e.to_string(),
        })?;
        if !entry.file_type().is_file() || !keep(rel) {
            continue;
        }
        copy_file(entry.path(), &dest.join(rel))?;
        copied += 1;
    }
    Ok(copied)
}

/// Remove everything in the tree except its `.git` directory.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CleanTree;

impl CleanTree {
    pub fn apply(&self, root: &Path) -> Result<()> {
        fs::create_dir_all(root)?;
        for entry in fs::read_dir(root)? {
            let entry = entry?;
            if entry.file_name() == ".git" {
                continue;
            }
            remove_path(&entry.path())?;
        }
        Ok(())
    }
}

/// Write `profiles/repo_name` and `metadata/layout.conf`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GenerateRepoMetadata {
    pub name: String,
    pub masters: Vec<String>,
    pub aliases: Vec<String>,
    pub priority: Option<i32>,
}

impl GenerateRepoMetadata {
    pub fn layout_conf(&self) -> String {
        let mut out = format!(
            "repo-name = {}\nthin-manifests = true\nsign-manifests = false\n\
             profile-formats = portage-2\ncache-formats = md5-dict\n",
            self.name
        );
        if !self.masters.is_empty() {
            out.push_str(&format!("masters = {}\n", self.masters.join(" ")));
        }
        if !self.aliases.is_empty() {
            out.push_str(&format!("aliases = {}\n", self.aliases.join(" ")));
        }
        if let Some(priority) = self.priority {
            out.push_str(&format!("priority = {}\n", priority));
        }
        out
    }

    pub fn apply(&self, root: &Path) -> Result<()> {
        fs::create_dir_all(root.join("profiles"))?;
        fs::create_dir_all(root.join("metadata"))?;
        fs::write(root.join("profiles/repo_name"), format!("{}\n", self.name))?;
        fs::write(root.join("metadata/layout.conf"), self.layout_conf())?;
        Ok(())
    }
}

/// Copy `src_root/src_subdir` over `dest_subdir` (default: `src_subdir`),
/// leaving out files whose name is in `exclude`. Files already in the
/// destination are overwritten, others are kept.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncDir {
    pub src_root: PathBuf,
    pub src_subdir: String,
    pub dest_subdir: Option<String>,
    pub exclude: Vec<String>,
}

impl SyncDir {
    pub fn apply(&self, root: &Path) -> Result<()> {
        let src = self.src_root.join(&self.src_subdir);
        let dest = root.join(self.dest_subdir.as_deref().unwrap_or(&self.src_subdir));
        if !src.is_dir() {
            return Err(Error::Filesystem {
                message: format!("Source directory {} does not exist", src.display()),
            });
        }
        fs::create_dir_all(&dest)?;
        let copied = copy_tree(&src, &dest, |rel| {
            let name = rel.file_name().map(|n| n.to_string_lossy()).unwrap_or_default();
            !self.exclude.iter().any(|e| *e == name)
        })?;
        debug!("Synced {} files from {}", copied, src.display());
        Ok(())
    }
}

/// Copy individual files: `(source path relative to src_root, destination
/// path relative to the tree)`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CopyFiles {
    pub src_root: PathBuf,
    pub files: Vec<(String, String)>,
}

impl CopyFiles {
    pub fn apply(&self, root: &Path) -> Result<()> {
        for (src_rel, dest_rel) in &self.files {
            let src = self.src_root.join(src_rel);
            if !src.is_file() {
                return Err(Error::Filesystem {
                    message: format!("File {} does not exist", src.display()),
                });
            }
            copy_file(&src, &root.join(dest_rel))?;
        }
        Ok(())
    }
}

/// Which `category/package` directories an insert picks up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selection {
    All,
    Globs(Vec<String>),
}

impl Selection {
    fn compile(&self) -> Result<Option<Vec<Pattern>>> {
        match self {
            Selection::All => Ok(None),
            Selection::Globs(globs) => Ok(Some(
                globs
                    .iter()
                    .map(|g| Pattern::new(g))
                    .collect::<std::result::Result<Vec<_>, _>>()?,
            )),
        }
    }
}

/// Whether `dir` directly contains an ebuild.
fn has_ebuilds(dir: &Path) -> bool {
    fs::read_dir(dir)
        .map(|entries| {
            entries
                .flatten()
                .any(|e| e.file_name().to_string_lossy().ends_with(EBUILD_SUFFIX))
        })
        .unwrap_or(false)
}

/// `category/package` directories under `base` that contain ebuilds, sorted.
pub fn find_catpkgs(base: &Path) -> Result<Vec<String>> {
    let mut out = Vec::new();
    let categories = match fs::read_dir(base) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(out),
        Err(e) => return Err(e.into()),
    };
    for category in categories {
        let category = category?;
        let cat_name = category.file_name().to_string_lossy().to_string();
        if NON_CATEGORY_DIRS.contains(&cat_name.as_str()) || !category.path().is_dir() {
            continue;
        }
        for package in fs::read_dir(category.path())? {
            let package = package?;
            if package.path().is_dir() && has_ebuilds(&package.path()) {
                out.push(format!("{}/{}", cat_name, package.file_name().to_string_lossy()));
            }
        }
    }
    out.sort();
    Ok(out)
}

/// Copy package directories from `src_root[/offset]` into the tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InsertEbuilds {
    pub src_root: PathBuf,
    /// Subdirectory of `src_root` holding the categories.
    pub offset: Option<String>,
    pub select: Selection,
    /// Replace package directories already in the tree; otherwise keep them.
    pub replace: bool,
}

impl InsertEbuilds {
    pub fn apply(&self, root: &Path) -> Result<()> {
        let base = match &self.offset {
            Some(offset) => self.src_root.join(offset),
            None => self.src_root.clone(),
        };
        let patterns = self.select.compile()?;
        let mut inserted = 0;
        for catpkg in find_catpkgs(&base)? {
            if let Some(patterns) = &patterns {
                if !patterns.iter().any(|p| p.matches(&catpkg)) {
                    continue;
                }
            }
            let dest = root.join(&catpkg);
            if dest.exists() {
                if !self.replace {
                    continue;
                }
                remove_path(&dest)?;
            }
            copy_tree(&base.join(&catpkg), &dest, |_| true)?;
            inserted += 1;
        }
        debug!("Inserted {} packages from {}", inserted, base.display());
        Ok(())
    }
}

/// Copy files from `src_root[/offset]/subdir` to `subdir` in the tree.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InsertFilesFromSubdir {
    pub src_root: PathBuf,
    pub subdir: String,
    pub offset: Option<String>,
    /// Only copy files with this suffix.
    pub suffix: Option<String>,
    /// Top-level file names never copied.
    pub skip: Vec<String>,
}

impl InsertFilesFromSubdir {
    pub fn apply(&self, root: &Path) -> Result<()> {
        let base = match &self.offset {
            Some(offset) => self.src_root.join(offset),
            None => self.src_root.clone(),
        };
        let src = base.join(&self.subdir);
        if !src.is_dir() {
            return Ok(());
        }
        let dest = root.join(&self.subdir);
        copy_tree(&src, &dest, |rel| {
            let name = rel.file_name().map(|n| n.to_string_lossy()).unwrap_or_default();
            if rel.components().count() == 1 && self.skip.iter().any(|s| *s == name) {
                return false;
            }
            match &self.suffix {
                Some(suffix) => name.ends_with(suffix.as_str()),
                None => true,
            }
        })?;
        Ok(())
    }
}

/// Remove paths matching glob patterns relative to the tree.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RemoveFiles {
    pub patterns: Vec<String>,
}

impl RemoveFiles {
    pub fn apply(&self, root: &Path) -> Result<()> {
        let escaped = Pattern::escape(&root.to_string_lossy());
        for pattern in &self.patterns {
            let full = format!("{}/{}", escaped, pattern.trim_start_matches('/'));
            let matches: Vec<_> = glob::glob(&full)?.collect();
            for path in matches {
                let path = path.map_err(|e| Error::Filesystem {
                    message: e.to_string(),
                })?;
                if path.starts_with(root.join(".git")) {
                    continue;
                }
                remove_path(&path)?;
            }
        }
        Ok(())
    }
}

/// Remove every file or directory with one of the given names, anywhere in
/// the tree.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FindAndRemove {
    pub names: Vec<String>,
}

impl FindAndRemove {
    pub fn apply(&self, root: &Path) -> Result<()> {
        let mut doomed = Vec::new();
        let walker = WalkDir::new(root)
            .min_depth(1)
            .into_iter()
            .filter_entry(|e| e.file_name() != ".git");
        for entry in walker {
            let entry = entry.map_err(|e| Error::Filesystem {
                message: e.to_string(),
            })?;
            let name = entry.file_name().to_string_lossy();
            if self.names.iter().any(|n| *n == name) {
                doomed.push(entry.path().to_path_buf());
            }
        }
        // Children before parents; removing a parent first would orphan later entries.
        doomed.sort_by_key(|p| std::cmp::Reverse(p.components().count()));
        for path in doomed {
            remove_path(&path)?;
        }
        Ok(())
    }
}

/// Write the kit's `COPYRIGHT.rst`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GenerateLicensingFile {
    pub text: String,
}

impl GenerateLicensingFile {
    pub fn apply(&self, root: &Path) -> Result<()> {
        fs::write(root.join("COPYRIGHT.rst"), &self.text)?;
        Ok(())
    }
}

/// Drop `ChangeLog*` files and keep only `DIST` lines in Manifests.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Minify;

impl Minify {
    pub fn apply(&self, root: &Path) -> Result<()> {
        let walker = WalkDir::new(root)
            .min_depth(1)
            .into_iter()
            .filter_entry(|e| e.file_name() != ".git");
        let mut changelogs = Vec::new();
        let mut manifests = Vec::new();
        for entry in walker {
            let entry = entry.map_err(|e| Error::Filesystem {
                message: e.to_string(),
            })?;
            if !entry.file_type().is_file() {
                continue;
            }
            let name = entry.file_name().to_string_lossy();
            if name.starts_with("ChangeLog") {
                changelogs.push(entry.path().to_path_buf());
            } else if name == "Manifest" {
                manifests.push(entry.path().to_path_buf());
            }
        }
        for path in changelogs {
            remove_path(&path)?;
        }
        for path in manifests {
            let content = fs::read_to_string(&path)?;
            let dist: Vec<&str> = content.lines().filter(|l| l.starts_with("DIST ")).collect();
            if dist.is_empty() {
                remove_path(&path)?;
            } else {
                let mut minified = dist.join("\n");
                minified.push('\n');
                if minified != content {
                    fs::write(&path, minified)?;
                }
            }
        }
        Ok(())
    }
}

/// Replace symlinks inside the tree with copies of their targets. Dangling
/// links are removed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MaterializeSymlinks;

impl MaterializeSymlinks {
    pub fn apply(&self, root: &Path) -> Result<()> {
        let links: Vec<PathBuf> = WalkDir::new(root)
            .min_depth(1)
            .into_iter()
            .filter_entry(|e| e.file_name() != ".git")
            .filter_map(|e| e.ok())
            .filter(|e| e.path_is_symlink())
            .map(|e| e.path().to_path_buf())
            .collect();

        for link in links {
            let target = match fs::canonicalize(&link) {
                Ok(target) => target,
                Err(_) => {
                    debug!("Removing dangling symlink {}", link.display());
                    remove_path(&link)?;
                    continue;
                }
            };
            fs::remove_file(&link)?;
            if target.is_dir() {
                fs::create_dir_all(&link)?;
                copy_tree(&target, &link, |_| true)?;
            } else {
                fs::copy(&target, &link)?;
            }
        }
        Ok(())
    }
}

/// Write `profiles/categories` from the categories present in the tree.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CreateCategories;

impl CreateCategories {
    pub fn apply(&self, root: &Path) -> Result<()> {
        let categories: BTreeSet<String> = find_catpkgs(root)?
            .into_iter()
            .filter_map(|catpkg| catpkg.split('/').next().map(str::to_string))
            .collect();
        fs::create_dir_all(root.join("profiles"))?;
        let mut out = String::new();
        for category in categories {
            out.push_str(&category);
            out.push('\n');
        }
        fs::write(root.join("profiles/categories"), out)?;
        Ok(())
    }
}
