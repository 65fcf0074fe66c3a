//! # Kit Jobs
//!
//! A [`KitJob`] regenerates one kit branch:
//!
//! 1. Load the kit's metadata cache.
//! 2. Run its step list against the output tree (clean, repo boilerplate,
//!    eclasses, packages, excludes, fixups, post-processing).
//! 3. Rescan the tree's own eclasses and merge them with the finalized
//!    collections of its masters.
//! 4. Regenerate `metadata/md5-cache` for every ebuild on a worker pool.
//! 5. Commit, then flush the cache.
//!
//! A job only writes inside its own output tree. Source checkouts are read
//! through the shared [`SourceCollection`].

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use log::{info, warn};
use rayon::prelude::*;

use crate::config::{KitDef, SourceCollectionDef};
use crate::eclass::{md5_file, HashCollection, ECLASS_SUFFIX};
use crate::error::{Error, Result};
use crate::metadata::cache::{kit_cache_path, CacheStats, FlushReport, KitCache, LogPaths, Lookup};
use crate::metadata::extractor::MetadataExtractor;
use crate::metadata::{
    distfile_data, relations_of, render_cache_entry, resolve_inherited, write_cache_entry,
    AtomEnv, AtomRecord, ProcessingWarning, EBUILD_SUFFIX,
};
use crate::repository::Tree;
use crate::steps::{
    find_catpkgs, run_steps, CleanTree, CopyFiles, CreateCategories, FindAndRemove,
    GenerateLicensingFile, GenerateRepoMetadata, InsertEbuilds, InsertFilesFromSubdir,
    MaterializeSymlinks, Minify, RemoveFiles, Selection, Step, SyncDir,
};

/// Commit message for regenerated kits.
pub const UPDATE_MESSAGE: &str = "Autogenerated tree updates.";

/// Profile files a fixup layer never overrides.
const PROFILE_SKIP: [&str; 2] = ["repo_name", "categories"];

/// A source collection with its checkout location.
///
/// Jobs that use the same collection hold the same `Arc`; pipelines compare
/// collections by identity.
#[derive(Debug)]
pub struct SourceCollection {
    pub def: SourceCollectionDef,
    pub source_trees: PathBuf,
}

impl SourceCollection {
    pub fn new(def: SourceCollectionDef, source_trees: &Path) -> Self {
        Self {
            def,
            source_trees: source_trees.to_path_buf(),
        }
    }

    pub fn name(&self) -> &str {
        &self.def.name
    }

    /// Checkout directory of a repository in this collection.
    pub fn repo_root(&self, repo: &str) -> PathBuf {
        self.source_trees.join(repo)
    }
}

/// Settings shared by every job of a run.
pub struct JobSettings {
    pub release: String,
    pub fixups_root: PathBuf,
    pub cache_dir: PathBuf,
    pub log_dir: PathBuf,
    pub push: bool,
    pub save_cache: bool,
    /// Size of the metadata worker pool.
    pub metadata_workers: usize,
    pub extractor: Arc<dyn MetadataExtractor>,
}

impl std::fmt::Debug for JobSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobSettings")
            .field("release", &self.release)
            .field("fixups_root", &self.fixups_root)
            .field("cache_dir", &self.cache_dir)
            .field("push", &self.push)
            .field("save_cache", &self.save_cache)
            .field("metadata_workers", &self.metadata_workers)
            .finish()
    }
}

/// Worker pool size matching the available cores.
pub fn default_metadata_workers() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

/// `<category>/<file stem>` for an ebuild whose name yields no atom.
fn stray_atom(ebuild_path: &Path) -> String {
    let stem = ebuild_path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let category = ebuild_path
        .parent()
        .and_then(Path::parent)
        .and_then(Path::file_name)
        .map(|c| c.to_string_lossy().into_owned())
        .unwrap_or_default();
    format!("{}/{}", category, stem)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Pending,
    Running,
    Committed,
    Failed,
}

/// Per-run counts of one job, for the end-of-run summary.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JobReport {
    pub ebuilds: usize,
    pub hits: usize,
    pub computed: usize,
    pub failed: usize,
    pub cache: CacheStats,
    pub flush: FlushReport,
}

/// One kit branch to regenerate.
pub struct KitJob {
    kit: KitDef,
    is_master: bool,
    tree: Box<dyn Tree>,
    sources: Arc<SourceCollection>,
    settings: Arc<JobSettings>,
    eclasses: HashCollection,
    inherited: Vec<HashCollection>,
    merged_eclasses: Option<HashCollection>,
    state: JobState,
    commit: Option<String>,
    report: Option<JobReport>,
}

impl std::fmt::Debug for KitJob {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KitJob")
            .field("kit", &self.kit.label())
            .field("is_master", &self.is_master)
            .field("source", &self.sources.name())
            .field("state", &self.state)
            .field("commit", &self.commit)
            .finish()
    }
}

impl KitJob {
    pub fn new(
        kit: KitDef,
        is_master: bool,
        tree: Box<dyn Tree>,
        sources: Arc<SourceCollection>,
        settings: Arc<JobSettings>,
    ) -> Self {
        Self {
            kit,
            is_master,
            tree,
            sources,
            settings,
            eclasses: HashCollection::new(None),
            inherited: Vec::new(),
            merged_eclasses: None,
            state: JobState::Pending,
            commit: None,
            report: None,
        }
    }

    pub fn kit(&self) -> &KitDef {
        &self.kit
    }

    pub fn name(&self) -> &str {
        &self.kit.name
    }

    pub fn branch(&self) -> &str {
        &self.kit.branch
    }

    pub fn label(&self) -> String {
        self.kit.label()
    }

    pub fn is_master(&self) -> bool {
        self.is_master
    }

    pub fn tree(&self) -> &dyn Tree {
        self.tree.as_ref()
    }

    pub fn sources(&self) -> &Arc<SourceCollection> {
        &self.sources
    }

    pub fn state(&self) -> JobState {
        self.state
    }

    /// Resulting revision; `None` until the job has committed.
    pub fn commit_id(&self) -> Option<&str> {
        self.commit.as_deref()
    }

    /// The tree's own eclasses, final once the job has committed.
    pub fn eclasses(&self) -> &HashCollection {
        &self.eclasses
    }

    pub fn merged_eclasses(&self) -> Option<&HashCollection> {
        self.merged_eclasses.as_ref()
    }

    pub fn report(&self) -> Option<&JobReport> {
        self.report.as_ref()
    }

    pub fn cache_path(&self) -> PathBuf {
        kit_cache_path(&self.settings.cache_dir, self.name(), self.branch())
    }

    pub fn log_paths(&self) -> LogPaths {
        LogPaths::new(&self.settings.log_dir, self.name(), self.branch())
    }

    /// Record the finalized collections of this kit's masters, in `masters`
    /// order. Must be called before [`KitJob::generate`] for kits with masters.
    pub fn bind_masters(&mut self, collections: Vec<HashCollection>) {
        self.inherited = collections;
    }

    fn repo_root(&self, repo: &str) -> PathBuf {
        self.sources.repo_root(repo)
    }

    /// Steps copying eclasses from source repositories.
    ///
    /// A name both included explicitly and masked is not copied; the conflict
    /// is logged as a warning.
    pub fn eclass_steps(&self) -> Vec<Step> {
        let selection = &self.kit.eclasses;
        let file_mask: Vec<String> = selection
            .mask
            .iter()
            .map(|m| format!("{}{}", m, ECLASS_SUFFIX))
            .collect();
        let mut steps = Vec::new();
        for include in &selection.include {
            let src_root = self.repo_root(&include.repo);
            let mut files = Vec::new();
            for name in &include.names {
                if name == "*" {
                    steps.push(Step::SyncDir(SyncDir {
                        src_root: src_root.clone(),
                        src_subdir: "eclass".to_string(),
                        dest_subdir: None,
                        exclude: file_mask.clone(),
                    }));
                } else if selection.mask.contains(name) {
                    warn!(
                        "For kit {}, {} is both included and excluded in the release YAML.",
                        self.kit.name, name
                    );
                } else {
                    let path = format!("eclass/{}{}", name, ECLASS_SUFFIX);
                    files.push((path.clone(), path));
                }
            }
            if !files.is_empty() {
                steps.push(Step::CopyFiles(CopyFiles { src_root, files }));
            }
        }
        steps
    }

    /// Steps copying selected packages from source repositories.
    pub fn package_steps(&self) -> Vec<Step> {
        self.kit
            .packages
            .iter()
            .map(|selection| {
                Step::InsertEbuilds(InsertEbuilds {
                    src_root: self.repo_root(&selection.repo),
                    offset: None,
                    select: Selection::Globs(selection.select.clone()),
                    replace: true,
                })
            })
            .collect()
    }

    /// Steps overlaying the fixup repository, least specific layer first.
    pub fn fixup_steps(&self) -> Vec<Step> {
        let fixups = &self.settings.fixups_root;
        let mut steps = Vec::new();

        let release_eclass = format!("eclass/{}", self.settings.release);
        if fixups.join(&release_eclass).is_dir() {
            steps.push(Step::SyncDir(SyncDir {
                src_root: fixups.clone(),
                src_subdir: release_eclass,
                dest_subdir: Some("eclass".to_string()),
                exclude: Vec::new(),
            }));
        }

        for layer in ["global", "curated", self.kit.branch.as_str()] {
            let offset = format!("{}/{}", self.kit.name, layer);
            let layer_root = fixups.join(&offset);
            if !layer_root.is_dir() {
                continue;
            }
            for (subdir, suffix, skip) in [
                ("eclass", Some(ECLASS_SUFFIX), &[][..]),
                ("licenses", None, &[][..]),
                ("profiles", None, &PROFILE_SKIP[..]),
            ] {
                if layer_root.join(subdir).is_dir() {
                    steps.push(Step::InsertFilesFromSubdir(InsertFilesFromSubdir {
                        src_root: fixups.clone(),
                        subdir: subdir.to_string(),
                        offset: Some(offset.clone()),
                        suffix: suffix.map(str::to_string),
                        skip: skip.iter().map(|s| s.to_string()).collect(),
                    }));
                }
            }
            if layer_root.join("README.rst").is_file() {
                steps.push(Step::CopyFiles(CopyFiles {
                    src_root: fixups.clone(),
                    files: vec![(format!("{}/README.rst", offset), "README.rst".to_string())],
                }));
            }
            steps.push(Step::InsertEbuilds(InsertEbuilds {
                src_root: fixups.clone(),
                offset: Some(offset),
                select: Selection::All,
                replace: true,
            }));
        }
        steps
    }

    /// Clean-up steps run once all content is in place.
    pub fn post_steps(&self) -> Vec<Step> {
        vec![
            Step::FindAndRemove(FindAndRemove {
                names: vec!["__pycache__".to_string(), "COPYRIGHT.txt".to_string()],
            }),
            Step::GenerateLicensingFile(GenerateLicensingFile {
                text: self.kit.copyright_rst(),
            }),
            Step::Minify(Minify),
            Step::MaterializeSymlinks(MaterializeSymlinks),
            Step::CreateCategories(CreateCategories),
        ]
    }

    /// The complete, ordered step list of this kit.
    pub fn steps(&self) -> Vec<Step> {
        let mut steps = vec![
            Step::CleanTree(CleanTree),
            Step::GenerateRepoMetadata(GenerateRepoMetadata {
                name: self.kit.name.clone(),
                masters: self.kit.masters.clone(),
                aliases: self.kit.aliases.clone(),
                priority: self.kit.priority,
            }),
        ];
        steps.extend(self.eclass_steps());
        steps.extend(self.package_steps());
        if !self.kit.excludes.is_empty() {
            steps.push(Step::RemoveFiles(RemoveFiles {
                patterns: self.kit.excludes.clone(),
            }));
        }
        steps.extend(self.fixup_steps());
        steps.extend(self.post_steps());
        steps
    }

    /// Regenerate, commit and record the resulting revision.
    pub fn generate(&mut self) -> Result<String> {
        if self.state != JobState::Pending {
            return Err(Error::Scheduling {
                message: format!("{} was already run ({:?})", self.label(), self.state),
            });
        }
        if self.inherited.len() != self.kit.masters.len() {
            return Err(Error::Scheduling {
                message: format!(
                    "{} has {} masters but {} master collections were bound",
                    self.label(),
                    self.kit.masters.len(),
                    self.inherited.len()
                ),
            });
        }
        self.state = JobState::Running;
        match self.run_generate() {
            Ok(commit) => {
                self.state = JobState::Committed;
                self.commit = Some(commit.clone());
                Ok(commit)
            }
            Err(e) => {
                self.state = JobState::Failed;
                Err(e)
            }
        }
    }

    fn run_generate(&mut self) -> Result<String> {
        info!("Generating {}", self.label());
        self.tree.initialize()?;
        let cache = KitCache::fetch(&self.cache_path()).with_logs(self.log_paths());

        let root = self.tree.root().to_path_buf();
        run_steps(&self.steps(), &root, &self.kit.name)?;

        self.eclasses = HashCollection::new(Some(&root));
        let mut merged = self.eclasses.clone();
        for master in &self.inherited {
            merged = merged.merge(master);
        }
        merged = merged.merge(&self.eclasses);
        self.merged_eclasses = Some(merged);

        let mut report = self.gen_cache(&cache)?;

        let commit = self.tree.commit(UPDATE_MESSAGE, self.settings.push)?;
        report.cache = cache.stats()?;
        report.flush = cache.flush(self.settings.save_cache, true)?;
        self.report = Some(report);
        Ok(commit)
    }

    /// Ebuild files in the tree, sorted.
    pub fn ebuilds(&self) -> Result<Vec<PathBuf>> {
        let root = self.tree.root();
        let mut out = Vec::new();
        for catpkg in find_catpkgs(root)? {
            for entry in std::fs::read_dir(root.join(&catpkg))? {
                let path = entry?.path();
                if path.is_file() && path.to_string_lossy().ends_with(EBUILD_SUFFIX) {
                    out.push(path);
                }
            }
        }
        out.sort();
        Ok(out)
    }

    /// Write md5-cache entries for every ebuild, reusing cached records.
    fn gen_cache(&self, cache: &KitCache) -> Result<JobReport> {
        let merged = self.merged_eclasses.as_ref().ok_or_else(|| Error::Scheduling {
            message: format!("{} has no merged eclasses", self.label()),
        })?;
        let ebuilds = self.ebuilds()?;
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.settings.metadata_workers.max(1))
            .build()?;

        let results: Vec<Result<Lookup>> = pool.install(|| {
            ebuilds
                .par_iter()
                .map(|path| self.ebuild_metadata(cache, merged, path))
                .collect()
        });

        let mut report = JobReport {
            ebuilds: ebuilds.len(),
            ..Default::default()
        };
        let mut first_error = None;
        for result in results {
            match result {
                Ok(Lookup::Hit) => report.hits += 1,
                Ok(Lookup::Computed) => report.computed += 1,
                Ok(Lookup::Failed) => report.failed += 1,
                Err(e) => {
                    if first_error.is_none() {
                        first_error = Some(e);
                    }
                }
            }
        }
        if let Some(e) = first_error {
            return Err(e);
        }

        if report.ebuilds == 0 {
            warn!("No ebuilds were found when processing metadata for {}.", self.label());
        } else {
            info!(
                "Metadata for {} ebuilds processed for {} ({} cached, {} generated, {} failed).",
                report.ebuilds,
                self.label(),
                report.hits,
                report.computed,
                report.failed
            );
        }
        Ok(report)
    }

    fn ebuild_metadata(
        &self,
        cache: &KitCache,
        merged: &HashCollection,
        ebuild_path: &Path,
    ) -> Result<Lookup> {
        let env = match AtomEnv::from_ebuild_path(ebuild_path) {
            Ok(env) => env,
            Err(e) => {
                let atom = stray_atom(ebuild_path);
                warn!("Skipping {}: {}", atom, e);
                cache.add_metadata_error(&atom, &e.to_string())?;
                return Ok(Lookup::Failed);
            }
        };
        let atom = env.atom();
        let md5 = md5_file(ebuild_path)?;
        let manifest_path = ebuild_path.with_file_name("Manifest");
        let manifest_md5 = if manifest_path.is_file() {
            Some(md5_file(&manifest_path)?)
        } else {
            None
        };

        let outcome = cache.get_or_compute(&atom, &md5, manifest_md5.as_deref(), || {
            self.compute_record(cache, merged, ebuild_path, &env, &md5, manifest_md5.as_deref())
        })?;

        if outcome.record.failed {
            if outcome.lookup == Lookup::Hit {
                cache.add_metadata_error(&atom, "metadata extraction failed for this input in an earlier run")?;
            }
            return Ok(Lookup::Failed);
        }
        write_cache_entry(self.tree.root(), &atom, &outcome.record.metadata_out)?;
        Ok(outcome.lookup)
    }

    fn compute_record(
        &self,
        cache: &KitCache,
        merged: &HashCollection,
        ebuild_path: &Path,
        env: &AtomEnv,
        md5: &str,
        manifest_md5: Option<&str>,
    ) -> Result<AtomRecord> {
        let atom = env.atom();
        let infos: BTreeMap<String, String> =
            self.settings
                .extractor
                .extract(ebuild_path, env, &merged.search_paths())?;

        let inherited = infos.get("INHERITED").map(String::as_str).unwrap_or("");
        let (eclasses, missing) = resolve_inherited(inherited, merged);
        for name in missing {
            cache.add_warning(ProcessingWarning {
                msg: format!("Can't find eclass hash for {}", name),
                atom: atom.clone(),
            })?;
        }

        let metadata_out = render_cache_entry(&infos, &eclasses, md5);
        let (relations, relations_by_kind) = relations_of(&infos);
        let files = match infos.get("SRC_URI") {
            Some(src_uri) if manifest_md5.is_some() && !src_uri.is_empty() => {
                Some(distfile_data(src_uri, &ebuild_path.with_file_name("Manifest"))?)
            }
            _ => None,
        };

        Ok(AtomRecord {
            atom,
            category: env.category.clone(),
            package: env.pn.clone(),
            catpkg: env.catpkg(),
            revision: env.pr.trim_start_matches('r').to_string(),
            metadata: infos,
            relations,
            relations_by_kind,
            eclasses,
            md5: md5.to_string(),
            manifest_md5: manifest_md5.map(str::to_string),
            metadata_out,
            kit: self.kit.name.clone(),
            branch: self.kit.branch.clone(),
            files,
            failed: false,
        })
    }
}
