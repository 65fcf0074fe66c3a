//! Shared test utilities for integration and E2E tests.
//!
//! This module provides release fixtures, a source-tree builder, and mock
//! implementations of the tree and extractor seams so a whole release can be
//! merged without git or `ebuild.sh`.
//!
//! ## Usage
//!
//! ```rust,ignore
//! mod common;
//! use common::prelude::*;
//!
//! let fixture = TestFixture::new().with_release(releases::CORE_AND_APPS);
//! ```

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use assert_fs::prelude::*;
use kit_merge::config::{Paths, SourceRepoDef};
use kit_merge::error::{Error, Result};
use kit_merge::metadata::extractor::{parse_key_values, MetadataExtractor};
use kit_merge::metadata::AtomEnv;
use kit_merge::repository::{Tree, TreeFactory, TreeSpec};

/// Re-export commonly used test dependencies for convenience.
pub mod prelude {
    #[allow(unused_imports)]
    pub use assert_cmd::cargo::cargo_bin_cmd;
    pub use assert_fs::prelude::*;
    #[allow(unused_imports)]
    pub use predicates::prelude::*;

    #[allow(unused_imports)]
    pub use super::releases;
    #[allow(unused_imports)]
    pub use super::{MockExtractor, MockFactory, TestFixture};
}

/// Release YAML snippets for testing.
#[allow(dead_code)]
pub mod releases {
    /// A master kit and one dependent kit sharing a source collection.
    pub const CORE_AND_APPS: &str = r#"
release: 1.4-release
release_info:
  version: 1
fixups:
  name: kit-fixups
source_collections:
  - name: current
    repositories:
      - name: upstream
kits:
  - name: core-kit
    branch: "1.4-prime"
    source: current
    eclasses:
      include:
        - repo: upstream
          names: [foo]
    packages:
      - repo: upstream
        select: ["sys-libs/*"]
  - name: apps-kit
    branch: master
    source: current
    masters: [core-kit]
    packages:
      - repo: upstream
        select: ["app-misc/*"]
"#;

    /// A dependent kit whose master does not exist.
    pub const UNKNOWN_MASTER: &str = r#"
release: next
fixups:
  name: kit-fixups
source_collections:
  - name: current
    repositories: []
kits:
  - name: apps-kit
    branch: master
    source: current
    masters: [core-kit]
"#;

    /// Invalid YAML for error testing.
    pub const INVALID_YAML: &str = "release: [unclosed";
}

/// Extractor that reads `KEY=VALUE` lines straight from the ebuild.
///
/// An ebuild containing `BROKEN` fails extraction.
#[allow(dead_code)]
#[derive(Debug, Default)]
pub struct MockExtractor {
    calls: AtomicUsize,
}

#[allow(dead_code)]
impl MockExtractor {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl MetadataExtractor for MockExtractor {
    fn extract(
        &self,
        ebuild_path: &Path,
        env: &AtomEnv,
        _eclass_paths: &[PathBuf],
    ) -> Result<BTreeMap<String, String>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let content = fs::read_to_string(ebuild_path)?;
        if content.contains("BROKEN") {
            return Err(Error::Extraction {
                atom: env.atom(),
                message: "die called".to_string(),
            });
        }
        Ok(parse_key_values(&content))
    }
}

/// Tree that writes files to disk but records commits in memory.
#[allow(dead_code)]
pub struct MockTree {
    spec: TreeSpec,
    log: Arc<Mutex<Vec<String>>>,
}

impl Tree for MockTree {
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
        fs::create_dir_all(&self.spec.root)?;
        Ok(())
    }

    fn checkout(&self, _target: &str) -> Result<()> {
        Ok(())
    }

    fn head(&self) -> Result<Option<String>> {
        Ok(None)
    }

    fn commit(&self, _message: &str, _push: bool) -> Result<String> {
        let label = format!("{}/{}", self.spec.name, self.spec.branch);
        let mut log = self.log.lock().unwrap();
        log.push(label.clone());
        Ok(format!("{}@{}", label, log.len()))
    }

    fn mirror_url(&self) -> Option<&str> {
        self.spec.mirror.as_deref()
    }

    fn mirror(&self, _url: &str, _staging: &Path) -> Result<()> {
        Ok(())
    }
}

/// Opens [`MockTree`]s and treats source checkouts as already in place.
#[allow(dead_code)]
#[derive(Default)]
pub struct MockFactory {
    commits: Arc<Mutex<Vec<String>>>,
}

#[allow(dead_code)]
impl MockFactory {
    /// `kit/branch` labels in commit order.
    pub fn commits(&self) -> Vec<String> {
        self.commits.lock().unwrap().clone()
    }
}

impl TreeFactory for MockFactory {
    fn open(&self, spec: TreeSpec) -> Result<Box<dyn Tree>> {
        Ok(Box::new(MockTree {
            spec,
            log: Arc::clone(&self.commits),
        }))
    }

    fn sync_source(&self, _repo: &SourceRepoDef, _dir: &Path) -> Result<()> {
        Ok(())
    }
}

/// A temporary work root with a release file and source trees.
pub struct TestFixture {
    temp_dir: assert_fs::TempDir,
}

#[allow(dead_code)]
impl TestFixture {
    pub fn new() -> Self {
        Self {
            temp_dir: assert_fs::TempDir::new().expect("Failed to create temp directory"),
        }
    }

    /// Write `release.yaml`.
    pub fn with_release(self, content: &str) -> Self {
        self.with_file("release.yaml", content)
    }

    pub fn with_file(self, path: &str, content: &str) -> Self {
        self.temp_dir
            .child(path)
            .write_str(content)
            .expect("Failed to write file");
        self
    }

    /// Add a file to the checkout of source repository `repo`.
    pub fn with_source_file(self, repo: &str, path: &str, content: &str) -> Self {
        self.with_file(&format!("source-trees/{}/{}", repo, path), content)
    }

    /// Source tree used by [`releases::CORE_AND_APPS`].
    pub fn with_upstream(self) -> Self {
        self.with_source_file("upstream", "eclass/foo.eclass", "# foo eclass\n")
            .with_source_file("upstream", "eclass/unused.eclass", "# unused\n")
            .with_source_file(
                "upstream",
                "sys-libs/zlib/zlib-1.3.ebuild",
                "EAPI=7\nSLOT=0\nINHERITED=foo\nDESCRIPTION=compression\n",
            )
            .with_source_file(
                "upstream",
                "app-misc/tool/tool-2.0-r1.ebuild",
                "EAPI=7\nSLOT=0\nINHERITED=foo\nRDEPEND=sys-libs/zlib\n",
            )
            .with_source_file("upstream", "app-misc/tool/ChangeLog", "old news\n")
            .with_source_file("upstream", "app-misc/broken/broken-1.ebuild", "BROKEN\n")
    }

    pub fn path(&self) -> &Path {
        self.temp_dir.path()
    }

    pub fn release_path(&self) -> PathBuf {
        self.path().join("release.yaml")
    }

    /// Work paths laid out under the fixture root.
    pub fn paths(&self) -> Paths {
        Paths::under(self.path())
    }

    pub fn child(&self, path: &str) -> assert_fs::fixture::ChildPath {
        self.temp_dir.child(path)
    }
}

impl Default for TestFixture {
    fn default() -> Self {
        Self::new()
    }
}
