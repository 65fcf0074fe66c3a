//! # Release Configuration
//!
//! This module defines the data structures for the release YAML that drives a
//! regeneration run, and the logic for parsing and validating it.
//!
//! ## Key Components
//!
//! - **`Release`**: the whole release: its source collections, the fixup
//!   repository, the meta-repository and the ordered list of kit declarations.
//! - **`KitDef`**: one kit branch: where its sources come from, which masters it
//!   inherits eclasses from, and which eclasses/packages it selects.
//! - **`Paths`**: where output trees, source checkouts and scratch files live.
//!
//! Declaration order matters: kits are scheduled in the order they appear in
//! `kits`, and masters run in that order too. Every list in the model is a YAML
//! sequence so that order is explicit rather than an accident of map iteration.
//!
//! ## Validation
//!
//! `Release::validate` catches configuration errors before any job runs:
//! unknown source collections and repositories, unknown masters, masters with
//! more than one declared variant, kits listing themselves or the same master
//! twice, and duplicate `(name, branch)` declarations.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};

/// Release descriptor written to `version.json` and embedded in `kit-info.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReleaseInfo {
    /// Meta-repo format version consumers should expect.
    #[serde(default = "default_release_version")]
    pub version: u32,
    /// Minimum tool versions required to consume this release.
    #[serde(default)]
    pub required: BTreeMap<String, String>,
}

fn default_release_version() -> u32 {
    1
}

impl Default for ReleaseInfo {
    fn default() -> Self {
        Self {
            version: default_release_version(),
            required: BTreeMap::new(),
        }
    }
}

/// A single upstream repository.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceRepoDef {
    /// Name used to reference this repository from kit declarations.
    pub name: String,
    /// Remote to clone from. Optional for repositories that already exist locally.
    #[serde(default)]
    pub url: Option<String>,
    /// Branch to check out.
    #[serde(default = "default_branch")]
    pub branch: String,
    /// Pin the checkout to an exact revision.
    #[serde(default)]
    pub src_sha1: Option<String>,
}

fn default_branch() -> String {
    "master".to_string()
}

/// A named group of upstream repositories checked out together.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceCollectionDef {
    pub name: String,
    pub repositories: Vec<SourceRepoDef>,
}

/// The meta-repository that records the resulting commit of every kit.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetaRepoDef {
    #[serde(default)]
    pub url: Option<String>,
    /// Branch to commit to; defaults to the release name.
    #[serde(default)]
    pub branch: Option<String>,
    /// Remote to mirror the meta-repo to.
    #[serde(default)]
    pub mirror: Option<String>,
}

/// Quality level of a kit branch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Stability {
    #[default]
    Prime,
    NearPrime,
    Beta,
    Alpha,
    Dev,
    Current,
    Deprecated,
}

impl Stability {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stability::Prime => "prime",
            Stability::NearPrime => "near-prime",
            Stability::Beta => "beta",
            Stability::Alpha => "alpha",
            Stability::Dev => "dev",
            Stability::Current => "current",
            Stability::Deprecated => "deprecated",
        }
    }
}

/// Eclasses to copy from one source repository.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EclassInclude {
    pub repo: String,
    /// Eclass names without the `.eclass` suffix, or `"*"` for the whole directory.
    pub names: Vec<String>,
}

/// Eclass selection rules of a kit.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EclassSelection {
    #[serde(default)]
    pub include: Vec<EclassInclude>,
    /// Eclass names that must never be copied from source repositories.
    #[serde(default)]
    pub mask: Vec<String>,
}

/// Packages to copy from one source repository.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PackageSelection {
    pub repo: String,
    /// Glob patterns matched against `category/package`.
    pub select: Vec<String>,
}

/// A kit branch declaration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KitDef {
    pub name: String,
    pub branch: String,
    /// Name of the source collection this kit pulls from.
    pub source: String,
    #[serde(default)]
    pub stability: Stability,
    #[serde(default)]
    pub masters: Vec<String>,
    #[serde(default)]
    pub aliases: Vec<String>,
    #[serde(default)]
    pub priority: Option<i32>,
    #[serde(default)]
    pub eclasses: EclassSelection,
    #[serde(default)]
    pub packages: Vec<PackageSelection>,
    /// Paths or globs (relative to the kit root) removed after packages are copied.
    #[serde(default)]
    pub excludes: Vec<String>,
    #[serde(default)]
    pub copyright: Option<String>,
    /// Remote to mirror this kit to.
    #[serde(default)]
    pub mirror: Option<String>,
}

impl KitDef {
    /// Text of the `COPYRIGHT.rst` licensing file written into the kit.
    pub fn copyright_rst(&self) -> String {
        match &self.copyright {
            Some(text) => text.clone(),
            None => format!(
                "=============================\n{} Copyright\n=============================\n\n\
                 The contents of this kit are distributed under the licenses of the\n\
                 individual packages and eclasses they were taken from.\n",
                self.name
            ),
        }
    }

    /// Display label used in logs and summaries.
    pub fn label(&self) -> String {
        format!("{}/{}", self.name, self.branch)
    }
}

/// A complete release definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Release {
    pub release: String,
    #[serde(default)]
    pub release_info: ReleaseInfo,
    #[serde(default)]
    pub push: bool,
    #[serde(default)]
    pub mirror: bool,
    #[serde(default)]
    pub prod: bool,
    /// Place kit trees under `meta-repo/kits/` instead of directly under the destination root.
    #[serde(default = "default_true")]
    pub nest_kits: bool,
    pub fixups: SourceRepoDef,
    #[serde(default)]
    pub meta_repo: MetaRepoDef,
    pub source_collections: Vec<SourceCollectionDef>,
    pub kits: Vec<KitDef>,
}

fn default_true() -> bool {
    true
}

impl Release {
    /// Find a source collection by name.
    pub fn source_collection(&self, name: &str) -> Option<&SourceCollectionDef> {
        self.source_collections.iter().find(|c| c.name == name)
    }

    /// Iterate over all declared variants of a kit.
    pub fn iter_kits<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a KitDef> + 'a {
        self.kits.iter().filter(move |k| k.name == name)
    }

    /// Names of every kit referenced as a master by some other kit, in order of
    /// first reference.
    pub fn master_names(&self) -> Vec<String> {
        let mut seen = HashSet::new();
        let mut out = Vec::new();
        for kit in &self.kits {
            for master in &kit.masters {
                if seen.insert(master.as_str()) {
                    out.push(master.clone());
                }
            }
        }
        out
    }

    /// Check the release for configuration errors.
    pub fn validate(&self) -> Result<()> {
        let mut seen_collections = HashSet::new();
        for collection in &self.source_collections {
            if !seen_collections.insert(collection.name.as_str()) {
                return Err(Error::ConfigParse {
                    message: format!("Source collection '{}' is declared twice", collection.name),
                    hint: None,
                });
            }
        }

        let mut seen_kits = HashSet::new();
        for kit in &self.kits {
            if !seen_kits.insert((kit.name.as_str(), kit.branch.as_str())) {
                return Err(Error::ConfigParse {
                    message: format!("Kit {} is declared more than once", kit.label()),
                    hint: None,
                });
            }

            let collection = self.source_collection(&kit.source).ok_or_else(|| Error::ConfigParse {
                message: format!(
                    "Kit {} references unknown source collection '{}'",
                    kit.label(),
                    kit.source
                ),
                hint: Some("Declare it under source_collections".to_string()),
            })?;

            let repo_known = |repo: &str| collection.repositories.iter().any(|r| r.name == repo);
            for include in &kit.eclasses.include {
                if !repo_known(&include.repo) {
                    return Err(Error::ConfigParse {
                        message: format!(
                            "Kit {} copies eclasses from '{}', which is not part of source collection '{}'",
                            kit.label(),
                            include.repo,
                            kit.source
                        ),
                        hint: None,
                    });
                }
            }
            for selection in &kit.packages {
                if !repo_known(&selection.repo) {
                    return Err(Error::ConfigParse {
                        message: format!(
                            "Kit {} copies packages from '{}', which is not part of source collection '{}'",
                            kit.label(),
                            selection.repo,
                            kit.source
                        ),
                        hint: None,
                    });
                }
            }

            let mut masters = HashSet::new();
            for master in &kit.masters {
                if master == &kit.name {
                    return Err(Error::MasterConfig {
                        kit: kit.name.clone(),
                        message: "a kit cannot be its own master".to_string(),
                    });
                }
                if !masters.insert(master.as_str()) {
                    return Err(Error::MasterConfig {
                        kit: kit.name.clone(),
                        message: format!("master '{}' is listed more than once", master),
                    });
                }
            }
        }

        for master in self.master_names() {
            match self.iter_kits(&master).count() {
                0 => {
                    return Err(Error::MasterConfig {
                        kit: master,
                        message: "master defined in release does not exist in kits".to_string(),
                    })
                }
                1 => {}
                n => {
                    return Err(Error::MasterConfig {
                        kit: master,
                        message: format!(
                            "declared {} times, but a master is foundational and must be declared once",
                            n
                        ),
                    })
                }
            }
        }

        Ok(())
    }
}

/// Parse a release from YAML and validate it.
pub fn parse(yaml_content: &str) -> Result<Release> {
    let release: Release = serde_yaml::from_str(yaml_content)?;
    release.validate()?;
    Ok(release)
}

/// Parse a release from a YAML file
pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Release> {
    let content = std::fs::read_to_string(path).map_err(Error::Io)?;
    parse(&content)
}

/// Filesystem locations used by a run.
#[derive(Debug, Clone, PartialEq)]
pub struct Paths {
    /// Parent directory of output trees (and the meta-repo).
    pub dest_trees: PathBuf,
    /// Parent directory of source repository checkouts.
    pub source_trees: PathBuf,
    /// Scratch space: kit caches, error logs, mirror staging.
    pub temp: PathBuf,
}

impl Paths {
    /// Lay out all paths under one root directory.
    pub fn under(root: &Path) -> Self {
        Self {
            dest_trees: root.join("dest-trees"),
            source_trees: root.join("source-trees"),
            temp: root.join("tmp"),
        }
    }

    /// Directory holding the per-kit metadata cache snapshots.
    pub fn kit_cache_dir(&self) -> PathBuf {
        self.temp.join("kit_cache")
    }
}

impl Default for Paths {
    fn default() -> Self {
        Self::under(&default_work_root())
    }
}

/// Returns the default working root directory.
///
/// Uses the platform cache directory (e.g. `~/.cache/kit-merge` on Linux) and
/// falls back to `.kit-merge` in the current directory.
pub fn default_work_root() -> PathBuf {
    dirs::cache_dir()
        .map(|dir| dir.join("kit-merge"))
        .unwrap_or_else(|| PathBuf::from(".kit-merge"))
}

#[cfg(test)]
mod tests {
    use super::*;

    const RELEASE: &str = r#"
release: 1.4-release
fixups:
  name: kit-fixups
  url: https://example.com/kit-fixups.git
meta_repo:
  url: https://example.com/meta-repo.git
source_collections:
  - name: current
    repositories:
      - name: gentoo-staging
        url: https://example.com/gentoo-staging.git
        src_sha1: abc123
kits:
  - name: core-kit
    branch: "1.4-release"
    source: current
    eclasses:
      include:
        - repo: gentoo-staging
          names: ["*"]
      mask: [kernel-2]
    packages:
      - repo: gentoo-staging
        select: ["sys-apps/*"]
  - name: apps-kit
    branch: master
    source: current
    stability: beta
    masters: [core-kit]
    packages:
      - repo: gentoo-staging
        select: ["app-misc/foo"]
"#;

    #[test]
    fn test_parse_release() {
        let release = parse(RELEASE).unwrap();
        assert_eq!(release.release, "1.4-release");
        assert_eq!(release.kits.len(), 2);
        assert!(release.nest_kits);
        assert!(!release.push);
        assert_eq!(release.fixups.branch, "master");
        assert_eq!(release.kits[0].stability, Stability::Prime);
        assert_eq!(release.kits[1].stability, Stability::Beta);
        assert_eq!(release.release_info.version, 1);
        assert_eq!(
            release.source_collections[0].repositories[0].src_sha1.as_deref(),
            Some("abc123")
        );
    }

    #[test]
    fn test_master_names_in_reference_order() {
        let release = parse(RELEASE).unwrap();
        assert_eq!(release.master_names(), vec!["core-kit".to_string()]);
    }

    #[test]
    fn test_unknown_source_collection() {
        let yaml = RELEASE.replace("source: current\n    stability", "source: nope\n    stability");
        let err = parse(&yaml).unwrap_err();
        assert!(err.is_configuration());
        assert!(err.to_string().contains("unknown source collection 'nope'"));
    }

    #[test]
    fn test_unknown_master() {
        let yaml = RELEASE.replace("masters: [core-kit]", "masters: [llvm-kit]");
        let err = parse(&yaml).unwrap_err();
        assert!(matches!(err, Error::MasterConfig { ref kit, .. } if kit == "llvm-kit"));
    }

    #[test]
    fn test_master_with_two_variants() {
        let mut release: Release = serde_yaml::from_str(RELEASE).unwrap();
        let mut second = release.kits[0].clone();
        second.branch = "next".to_string();
        release.kits.push(second);
        let err = release.validate().unwrap_err();
        assert!(err.to_string().contains("declared 2 times"));
    }

    #[test]
    fn test_self_master_rejected() {
        let yaml = RELEASE.replace("masters: [core-kit]", "masters: [apps-kit]");
        let err = parse(&yaml).unwrap_err();
        assert!(err.to_string().contains("its own master"));
    }

    #[test]
    fn test_duplicate_master_entry_rejected() {
        let yaml = RELEASE.replace("masters: [core-kit]", "masters: [core-kit, core-kit]");
        let err = parse(&yaml).unwrap_err();
        assert!(err.to_string().contains("listed more than once"));
    }

    #[test]
    fn test_duplicate_kit_declaration_rejected() {
        let mut release: Release = serde_yaml::from_str(RELEASE).unwrap();
        release.kits.push(release.kits[1].clone());
        let err = release.validate().unwrap_err();
        assert!(err.to_string().contains("apps-kit/master"));
    }

    #[test]
    fn test_unknown_package_repo() {
        let yaml = RELEASE.replace(
            "- repo: gentoo-staging\n        select: [\"app-misc/foo\"]",
            "- repo: flora\n        select: [\"app-misc/foo\"]",
        );
        let err = parse(&yaml).unwrap_err();
        assert!(err.to_string().contains("'flora'"));
    }

    #[test]
    fn test_paths_under_root() {
        let paths = Paths::under(Path::new("/work"));
        assert_eq!(paths.dest_trees, PathBuf::from("/work/dest-trees"));
        assert_eq!(paths.kit_cache_dir(), PathBuf::from("/work/tmp/kit_cache"));
    }

    #[test]
    fn test_default_copyright_mentions_kit() {
        let release = parse(RELEASE).unwrap();
        assert!(release.kits[0].copyright_rst().contains("core-kit Copyright"));
    }
}
