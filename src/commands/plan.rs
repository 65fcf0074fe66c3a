//! # Plan Command Implementation
//!
//! Prints how a release's kits are grouped into the master pipeline and the
//! parallel pipelines, in execution order. This is a read-only operation: no
//! tree or source checkout is touched.

use std::borrow::Cow;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Args;
use ptree::{print_tree, TreeItem};
use serde_json::json;

use kit_merge::config;
use kit_merge::kit::KitJob;
use kit_merge::metadata::extractor::EbuildShExtractor;
use kit_merge::output::{emoji, OutputConfig};
use kit_merge::repository::GitTreeFactory;
use kit_merge::scheduler::{JobController, Pipeline, Policy, RunOptions};

use super::WorkPaths;

/// Show the pipeline plan of a release
#[derive(Args, Debug)]
pub struct PlanArgs {
    /// Path to the release YAML file.
    #[arg(short, long, value_name = "FILE", default_value = "release.yaml")]
    pub release: PathBuf,

    #[command(flatten)]
    pub paths: WorkPaths,

    /// Output in JSON format
    #[arg(long)]
    pub json: bool,
}

/// Execute the `plan` command.
pub fn execute(args: PlanArgs, color_flag: &str) -> Result<()> {
    let out = OutputConfig::from_env_and_flag(color_flag);
    let release = config::from_file(&args.release)
        .with_context(|| format!("Failed to load release from {}", args.release.display()))?;

    // Opening git trees only records their location, and nothing is
    // extracted, so planning has no side effects.
    let controller = JobController::new(
        release,
        args.paths.resolve(),
        RunOptions::default(),
        Arc::new(GitTreeFactory),
        Arc::new(EbuildShExtractor::new(PathBuf::from("ebuild.sh"))),
    )?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&plan_json(&controller))?);
        return Ok(());
    }

    println!(
        "{} Pipeline plan for: {}",
        emoji(&out, "🗺️ ", "[PLAN]"),
        args.release.display()
    );
    print_tree(&plan_tree(&controller)).context("Failed to display plan")?;
    Ok(())
}

fn job_label(job: &KitJob) -> String {
    let mut label = format!("{} [{}]", job.label(), job.kit().stability.as_str());
    if !job.kit().masters.is_empty() {
        label.push_str(&format!(" masters: {}", job.kit().masters.join(", ")));
    }
    label
}

fn pipeline_label(controller: &JobController, pipeline: &Pipeline) -> String {
    let policy = match pipeline.policy {
        Policy::Sequential => "sequential".to_string(),
        Policy::BoundedParallel { workers } => format!("parallel, {} workers", workers),
    };
    let source = pipeline
        .jobs
        .first()
        .map(|&i| controller.jobs()[i].sources().name().to_string())
        .unwrap_or_else(|| "-".to_string());
    format!("{} ({}, source {})", pipeline.key, policy, source)
}

fn plan_tree(controller: &JobController) -> PlanNode {
    let children = controller
        .pipelines()
        .iter()
        .map(|pipeline| PlanNode {
            label: pipeline_label(controller, pipeline),
            children: pipeline
                .jobs
                .iter()
                .map(|&i| PlanNode {
                    label: job_label(&controller.jobs()[i]),
                    children: vec![],
                })
                .collect(),
        })
        .collect();
    PlanNode {
        label: format!("release {}", controller.release().release),
        children,
    }
}

fn plan_json(controller: &JobController) -> serde_json::Value {
    let pipelines: Vec<serde_json::Value> = controller
        .pipelines()
        .iter()
        .map(|pipeline| {
            let jobs: Vec<serde_json::Value> = pipeline
                .jobs
                .iter()
                .map(|&i| {
                    let job = &controller.jobs()[i];
                    json!({
                        "kit": job.name(),
                        "branch": job.branch(),
                        "source": job.sources().name(),
                        "masters": job.kit().masters,
                    })
                })
                .collect();
            json!({ "key": pipeline.key, "jobs": jobs })
        })
        .collect();
    json!({ "release": controller.release().release, "pipelines": pipelines })
}

/// Tree node structure for ptree visualization
#[derive(Clone)]
struct PlanNode {
    label: String,
    children: Vec<PlanNode>,
}

impl TreeItem for PlanNode {
    type Child = PlanNode;

    fn write_self<W: std::io::Write>(&self, f: &mut W, _style: &ptree::Style) -> std::io::Result<()> {
        write!(f, "{}", self.label)
    }

    fn children(&self) -> Cow<'_, [Self::Child]> {
        Cow::Borrowed(&self.children)
    }
}
