//! # Job Scheduling
//!
//! The [`JobController`] turns a release into kit jobs and groups them into
//! pipelines before anything runs:
//!
//! - **The master pipeline** (position 0) holds every kit another kit names as
//!   a master, in declaration order, and runs them one at a time. A failure
//!   here aborts the run.
//! - **Parallel pipelines** (positions 1..) hold the remaining jobs. A job
//!   joins the first pipeline where every member uses the same source
//!   collection (by identity) and has a different kit name; otherwise a new
//!   pipeline is opened. Pipelines run one after another, the jobs inside a
//!   pipeline on a bounded worker pool. A failed job fails its pipeline after
//!   the other in-flight jobs finish; later pipelines still run.
//!
//! The partition is computed once and never changes. Before a job starts, the
//! finalized eclass collections of its masters are bound to it; binding fails
//! with [`Error::Scheduling`] unless each master has committed.
//!
//! After all pipelines succeed the meta-repo is written and committed,
//! preferred branches are checked out (outside prod mode) and trees are
//! mirrored when requested.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use log::{error, info, warn};
use rayon::prelude::*;

use crate::config::{Paths, Release, Stability};
use crate::error::{Error, Result};
use crate::kit::{default_metadata_workers, JobSettings, JobState, KitJob, SourceCollection};
use crate::metadata::cache::cleanup_error_logs;
use crate::metadata::extractor::MetadataExtractor;
use crate::metarepo::{self, KitSha1s};
use crate::repository::{Tree, TreeFactory, TreeSpec};

pub const MASTER_PIPELINE: &str = "masters";

/// Jobs run concurrently inside one parallel pipeline.
pub const PIPELINE_WORKERS: usize = 8;

/// Source repositories synced concurrently.
pub const SOURCE_WORKERS: usize = 4;

/// Trees mirrored concurrently.
pub const MIRROR_WORKERS: usize = 8;

/// Commit message for the meta-repo.
pub const META_REPO_MESSAGE: &str = "kit updates";

/// How the jobs of a pipeline are executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Policy {
    Sequential,
    BoundedParallel { workers: usize },
}

/// An ordered group of jobs sharing one execution policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pipeline {
    pub key: String,
    pub position: usize,
    pub policy: Policy,
    /// Indices into the controller's job list, in declaration order.
    pub jobs: Vec<usize>,
}

/// Knobs of a run that are not part of the release file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunOptions {
    pub push: bool,
    pub mirror: bool,
    pub prod: bool,
    pub save_cache: bool,
    pub metadata_workers: usize,
    pub pipeline_workers: usize,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            push: false,
            mirror: false,
            prod: false,
            save_cache: true,
            metadata_workers: default_metadata_workers(),
            pipeline_workers: PIPELINE_WORKERS,
        }
    }
}

/// Remembers which source collection is checked out, so consecutive jobs on
/// the same collection do not sync it again.
#[derive(Debug, Default)]
pub struct SourceContext {
    current: Option<Arc<SourceCollection>>,
}

impl SourceContext {
    pub fn current(&self) -> Option<&Arc<SourceCollection>> {
        self.current.as_ref()
    }

    /// Sync every repository of `sources` unless it is already current.
    /// Returns whether a sync happened.
    pub fn ensure(&mut self, sources: &Arc<SourceCollection>, factory: &dyn TreeFactory) -> Result<bool> {
        if let Some(current) = &self.current {
            if Arc::ptr_eq(current, sources) {
                return Ok(false);
            }
        }
        info!(
            "Initializing source collection {} with {} repositories",
            sources.name(),
            sources.def.repositories.len()
        );
        self.current = None;

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(SOURCE_WORKERS)
            .build()?;
        let errors: Mutex<Vec<Error>> = Mutex::new(Vec::new());
        pool.install(|| {
            sources.def.repositories.par_iter().for_each(|repo| {
                if let Err(e) = factory.sync_source(repo, &sources.repo_root(&repo.name)) {
                    if let Ok(mut errors) = errors.lock() {
                        errors.push(e);
                    }
                }
            });
        });
        let errors = errors.into_inner().map_err(|_| Error::LockPoisoned {
            context: "source sync errors".to_string(),
        })?;
        if let Some(first) = errors.into_iter().next() {
            return Err(first);
        }

        self.current = Some(Arc::clone(sources));
        Ok(true)
    }
}

/// Outcome of one kit job, for the end-of-run summary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KitSummary {
    pub label: String,
    pub state: JobState,
    pub commit: Option<String>,
    pub ebuilds: usize,
    pub errors: usize,
    pub warnings: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub kits: Vec<KitSummary>,
    pub meta_commit: Option<String>,
    pub mirror_failures: Vec<String>,
}

impl RunSummary {
    pub fn total_errors(&self) -> usize {
        self.kits.iter().map(|k| k.errors).sum()
    }

    pub fn total_warnings(&self) -> usize {
        self.kits.iter().map(|k| k.warnings).sum()
    }
}

/// Owns every job of a run and the pipelines they are grouped into.
pub struct JobController {
    release: Release,
    paths: Paths,
    options: RunOptions,
    factory: Arc<dyn TreeFactory>,
    jobs: Vec<KitJob>,
    pipelines: Vec<Pipeline>,
    masters: BTreeMap<String, usize>,
    meta_repo: Box<dyn Tree>,
    meta_commit: Option<String>,
    mirror_failures: Vec<String>,
}

impl std::fmt::Debug for JobController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobController")
            .field("release", &self.release.release)
            .field("jobs", &self.jobs)
            .field("pipelines", &self.pipelines)
            .finish()
    }
}

impl JobController {
    /// Build every job and the pipeline partition. Configuration errors are
    /// reported here, before any tree is touched.
    pub fn new(
        release: Release,
        paths: Paths,
        options: RunOptions,
        factory: Arc<dyn TreeFactory>,
        extractor: Arc<dyn MetadataExtractor>,
    ) -> Result<Self> {
        release.validate()?;

        let meta_repo = factory.open(TreeSpec {
            name: "meta-repo".to_string(),
            branch: release
                .meta_repo
                .branch
                .clone()
                .unwrap_or_else(|| release.release.clone()),
            root: paths.dest_trees.join("meta-repo"),
            url: release.meta_repo.url.clone(),
            mirror: release.meta_repo.mirror.clone(),
        })?;

        let settings = Arc::new(JobSettings {
            release: release.release.clone(),
            fixups_root: paths.source_trees.join(&release.fixups.name),
            cache_dir: paths.kit_cache_dir(),
            log_dir: paths.temp.clone(),
            push: options.push,
            save_cache: options.save_cache,
            metadata_workers: options.metadata_workers,
            extractor,
        });

        let mut controller = Self {
            release,
            paths,
            options,
            factory,
            jobs: Vec::new(),
            pipelines: Vec::new(),
            masters: BTreeMap::new(),
            meta_repo,
            meta_commit: None,
            mirror_failures: Vec::new(),
        };
        controller.generate_jobs_and_pipelines(settings)?;
        Ok(controller)
    }

    fn kit_root(&self, name: &str) -> PathBuf {
        if self.release.nest_kits {
            self.paths.dest_trees.join("meta-repo").join("kits").join(name)
        } else {
            self.paths.dest_trees.join(name)
        }
    }

    fn generate_jobs_and_pipelines(&mut self, settings: Arc<JobSettings>) -> Result<()> {
        let master_names: HashSet<String> = self.release.master_names().into_iter().collect();

        let mut collections: BTreeMap<String, Arc<SourceCollection>> = BTreeMap::new();
        for def in &self.release.source_collections {
            collections.insert(
                def.name.clone(),
                Arc::new(SourceCollection::new(def.clone(), &self.paths.source_trees)),
            );
        }

        self.pipelines.push(Pipeline {
            key: MASTER_PIPELINE.to_string(),
            position: 0,
            policy: Policy::Sequential,
            jobs: Vec::new(),
        });

        let kits = self.release.kits.clone();
        for kit in kits {
            let sources = collections.get(&kit.source).cloned().ok_or_else(|| Error::ConfigParse {
                message: format!("Kit {} references unknown source collection '{}'", kit.label(), kit.source),
                hint: None,
            })?;
            let is_master = master_names.contains(&kit.name);
            let tree = self.factory.open(TreeSpec {
                name: kit.name.clone(),
                branch: kit.branch.clone(),
                root: self.kit_root(&kit.name),
                url: None,
                mirror: kit.mirror.clone(),
            })?;

            if is_master {
                for master in &kit.masters {
                    if !self.masters.contains_key(master) {
                        return Err(Error::MasterConfig {
                            kit: kit.name.clone(),
                            message: format!(
                                "master '{}' must be declared before the masters that use it",
                                master
                            ),
                        });
                    }
                }
            }

            let index = self.jobs.len();
            let job = KitJob::new(kit, is_master, tree, sources, Arc::clone(&settings));
            if is_master {
                self.masters.insert(job.name().to_string(), index);
                self.jobs.push(job);
                self.pipelines[0].jobs.push(index);
                continue;
            }

            self.jobs.push(job);
            let position = match self.find_existing_pipeline(index) {
                Some(position) => position,
                None => {
                    let position = self.pipelines.len();
                    self.pipelines.push(Pipeline {
                        key: format!("pipeline{}", position - 1),
                        position,
                        policy: Policy::BoundedParallel {
                            workers: self.options.pipeline_workers.max(1),
                        },
                        jobs: Vec::new(),
                    });
                    position
                }
            };
            self.pipelines[position].jobs.push(index);
        }
        Ok(())
    }

    /// First parallel pipeline `index` may join: every member shares its
    /// source collection and none is another branch of the same kit.
    fn find_existing_pipeline(&self, index: usize) -> Option<usize> {
        let job = &self.jobs[index];
        self.pipelines[1..]
            .iter()
            .find(|pipeline| {
                pipeline.jobs.iter().all(|&other| {
                    let other = &self.jobs[other];
                    Arc::ptr_eq(other.sources(), job.sources()) && other.name() != job.name()
                })
            })
            .map(|pipeline| pipeline.position)
    }

    pub fn release(&self) -> &Release {
        &self.release
    }

    pub fn jobs(&self) -> &[KitJob] {
        &self.jobs
    }

    pub fn pipelines(&self) -> &[Pipeline] {
        &self.pipelines
    }

    pub fn master_pipeline(&self) -> &Pipeline {
        &self.pipelines[0]
    }

    /// Parallel pipelines in execution order.
    pub fn parallel_pipelines(&self) -> &[Pipeline] {
        &self.pipelines[1..]
    }

    pub fn meta_repo(&self) -> &dyn Tree {
        self.meta_repo.as_ref()
    }

    /// Bind the finalized collections of a job's masters to it.
    fn bind_masters(&mut self, index: usize) -> Result<()> {
        let job = &self.jobs[index];
        let mut collections = Vec::with_capacity(job.kit().masters.len());
        for master in &job.kit().masters {
            let master_index = *self.masters.get(master).ok_or_else(|| Error::MasterConfig {
                kit: job.name().to_string(),
                message: format!("master '{}' has no job", master),
            })?;
            let master_job = &self.jobs[master_index];
            if master_job.state() != JobState::Committed {
                return Err(Error::Scheduling {
                    message: format!(
                        "{} cannot use master {} before it has committed ({:?})",
                        job.label(),
                        master_job.label(),
                        master_job.state()
                    ),
                });
            }
            collections.push(master_job.eclasses().clone());
        }
        self.jobs[index].bind_masters(collections);
        Ok(())
    }

    /// Run the whole release.
    pub fn run(&mut self) -> Result<()> {
        let removed = cleanup_error_logs(&self.paths.temp)?;
        if removed > 0 {
            info!("Removed {} stale error logs", removed);
        }

        self.meta_repo.initialize()?;
        let fixups_root = self.paths.source_trees.join(&self.release.fixups.name);
        self.factory.sync_source(&self.release.fixups, &fixups_root)?;

        let mut context = SourceContext::default();
        self.run_masters(&mut context)?;

        let mut failures = Vec::new();
        for position in 1..self.pipelines.len() {
            if let Err(e) = self.run_pipeline(position, &mut context) {
                error!("{}", e);
                failures.push(e);
            }
        }
        if let Some(first) = failures.into_iter().next() {
            return Err(first);
        }

        self.commit_meta_repo()?;

        if !self.options.prod {
            self.checkout_preferred_branches()?;
        }
        if self.options.mirror {
            self.mirror_all()?;
        }
        Ok(())
    }

    fn run_masters(&mut self, context: &mut SourceContext) -> Result<()> {
        let members = self.pipelines[0].jobs.clone();
        for index in members {
            context.ensure(self.jobs[index].sources(), self.factory.as_ref())?;
            self.bind_masters(index)?;
            self.jobs[index].generate()?;
        }
        Ok(())
    }

    fn run_pipeline(&mut self, position: usize, context: &mut SourceContext) -> Result<()> {
        let pipeline = self.pipelines[position].clone();
        let Some(&first) = pipeline.jobs.first() else {
            return Ok(());
        };
        let fail = |failures: Vec<String>| Error::PipelineFailed {
            pipeline: pipeline.key.clone(),
            failures,
        };

        context
            .ensure(self.jobs[first].sources(), self.factory.as_ref())
            .map_err(|e| fail(vec![e.to_string()]))?;
        for &index in &pipeline.jobs {
            self.bind_masters(index)?;
        }

        let workers = match pipeline.policy {
            Policy::Sequential => 1,
            Policy::BoundedParallel { workers } => workers,
        };
        let pool = rayon::ThreadPoolBuilder::new().num_threads(workers).build()?;
        let members: BTreeSet<usize> = pipeline.jobs.iter().copied().collect();
        let failures: Mutex<Vec<String>> = Mutex::new(Vec::new());
        pool.install(|| {
            self.jobs
                .par_iter_mut()
                .enumerate()
                .filter(|(index, _)| members.contains(index))
                .for_each(|(_, job)| {
                    if let Err(e) = job.generate() {
                        error!("{} failed: {}", job.label(), e);
                        if let Ok(mut failures) = failures.lock() {
                            failures.push(format!("{}: {}", job.label(), e));
                        }
                    }
                });
        });

        let failures = failures.into_inner().map_err(|_| Error::LockPoisoned {
            context: format!("failures of {}", pipeline.key),
        })?;
        if failures.is_empty() {
            Ok(())
        } else {
            Err(fail(failures))
        }
    }

    /// Revisions of every committed job.
    pub fn kit_sha1s(&self) -> KitSha1s {
        let mut out = KitSha1s::new();
        for job in &self.jobs {
            if let Some(commit) = job.commit_id() {
                out.entry(job.name().to_string())
                    .or_default()
                    .insert(job.branch().to_string(), commit.to_string());
            }
        }
        out
    }

    fn commit_meta_repo(&mut self) -> Result<()> {
        let root = self.meta_repo.root().to_path_buf();
        if self.release.nest_kits {
            metarepo::ignore_kits(&root)?;
        }
        metarepo::write_metadata(&root, &self.release, &self.kit_sha1s())?;
        let commit = self.meta_repo.commit(META_REPO_MESSAGE, self.options.push)?;
        info!("Meta-repo committed at {}", commit);
        self.meta_commit = Some(commit);
        Ok(())
    }

    /// The first `prime` branch declared for each kit.
    pub fn preferred_branches(&self) -> Vec<(String, String)> {
        let mut seen = HashSet::new();
        self.release
            .kits
            .iter()
            .filter(|kit| kit.stability == Stability::Prime)
            .filter(|kit| seen.insert(kit.name.clone()))
            .map(|kit| (kit.name.clone(), kit.branch.clone()))
            .collect()
    }

    fn checkout_preferred_branches(&self) -> Result<()> {
        for (name, branch) in self.preferred_branches() {
            let job = self
                .jobs
                .iter()
                .find(|j| j.name() == name && j.branch() == branch && j.state() == JobState::Committed);
            if let Some(job) = job {
                info!("Checking out {} {}...", name, branch);
                job.tree().checkout(&branch)?;
            }
        }
        Ok(())
    }

    fn mirror_all(&mut self) -> Result<()> {
        let base = self.paths.temp.join("mirror_repos");
        let mut seen = HashSet::new();
        let targets: Vec<(&KitJob, &str)> = self
            .jobs
            .iter()
            .filter(|job| job.state() == JobState::Committed)
            .filter_map(|job| job.tree().mirror_url().map(|url| (job, url)))
            .filter(|(job, _)| seen.insert(job.name().to_string()))
            .collect();

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(MIRROR_WORKERS)
            .build()?;
        let failures: Mutex<Vec<String>> = Mutex::new(Vec::new());
        pool.install(|| {
            targets.par_iter().for_each(|(job, url)| {
                let staging = base.join(format!("{}.pushme", job.name()));
                match job.tree().mirror(url, &staging) {
                    Ok(()) => info!("Mirroring of {} complete.", job.name()),
                    Err(e) => {
                        if let Ok(mut failures) = failures.lock() {
                            failures.push(format!("{}: {}", job.name(), e));
                        }
                    }
                }
            });
        });
        let mut failures = failures.into_inner().map_err(|_| Error::LockPoisoned {
            context: "mirror failures".to_string(),
        })?;

        if let Some(url) = self.meta_repo.mirror_url() {
            let staging = base.join("meta-repo.pushme");
            match self.meta_repo.mirror(url, &staging) {
                Ok(()) => info!("Mirroring of meta-repo complete."),
                Err(e) => failures.push(format!("meta-repo: {}", e)),
            }
        }

        for failure in &failures {
            warn!("Mirroring failed for {}", failure);
        }
        failures.sort();
        self.mirror_failures = failures;
        Ok(())
    }

    /// Per-kit results, available whether or not the run succeeded.
    pub fn summary(&self) -> RunSummary {
        let kits = self
            .jobs
            .iter()
            .map(|job| {
                let report = job.report();
                KitSummary {
                    label: job.label(),
                    state: job.state(),
                    commit: job.commit_id().map(str::to_string),
                    ebuilds: report.map(|r| r.ebuilds).unwrap_or(0),
                    errors: report.map(|r| r.flush.errors).unwrap_or(0),
                    warnings: report.map(|r| r.flush.warnings).unwrap_or(0),
                }
            })
            .collect();
        RunSummary {
            kits,
            meta_commit: self.meta_commit.clone(),
            mirror_failures: self.mirror_failures.clone(),
        }
    }
}
