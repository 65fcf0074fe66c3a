//! Integration tests driving whole releases through the job controller with
//! mock trees and a mock extractor. Kit content is written to real
//! directories so steps, eclass merging and metadata caching are exercised
//! end to end.

mod common;

use std::fs;
use std::sync::Arc;

use common::prelude::*;
use kit_merge::config;
use kit_merge::eclass::md5_bytes;
use kit_merge::kit::{JobState, KitJob};
use kit_merge::scheduler::{JobController, RunOptions};

fn options() -> RunOptions {
    RunOptions {
        metadata_workers: 2,
        ..RunOptions::default()
    }
}

fn run_release(fixture: &TestFixture) -> (JobController, Arc<MockFactory>, Arc<MockExtractor>) {
    let release = config::from_file(fixture.release_path()).unwrap();
    let factory = Arc::new(MockFactory::default());
    let extractor = Arc::new(MockExtractor::default());
    let mut controller = JobController::new(
        release,
        fixture.paths(),
        options(),
        factory.clone(),
        extractor.clone(),
    )
    .unwrap();
    controller.run().unwrap();
    (controller, factory, extractor)
}

fn job<'a>(controller: &'a JobController, name: &str) -> &'a KitJob {
    controller.jobs().iter().find(|j| j.name() == name).unwrap()
}

#[test]
fn test_core_and_apps_release() {
    let fixture = TestFixture::new()
        .with_release(releases::CORE_AND_APPS)
        .with_upstream();
    let (controller, factory, _) = run_release(&fixture);

    // The master commits before the kit that depends on it.
    assert_eq!(
        factory.commits(),
        vec!["core-kit/1.4-prime", "apps-kit/master", "meta-repo/1.4-release"]
    );

    let foo_hash = md5_bytes(b"# foo eclass\n");
    let apps = job(&controller, "apps-kit");
    assert_eq!(apps.state(), JobState::Committed);
    let merged = apps.merged_eclasses().unwrap();
    assert_eq!(merged.len(), 1);
    assert_eq!(merged.get("foo"), Some(foo_hash.as_str()));

    let kits = fixture.path().join("dest-trees/meta-repo/kits");
    let entry = fs::read_to_string(kits.join("apps-kit/metadata/md5-cache/app-misc/tool-2.0-r1")).unwrap();
    assert!(entry.contains("RDEPEND=sys-libs/zlib\n"));
    assert!(entry.contains(&format!("_eclasses_=foo\t{}\n", foo_hash)));
    assert!(entry.contains("_md5_="));
    assert!(!kits.join("apps-kit/app-misc/tool/ChangeLog").exists());
    assert!(!kits.join("apps-kit/sys-libs").exists());
    assert!(kits.join("core-kit/eclass/foo.eclass").is_file());
    assert!(!kits.join("core-kit/eclass/unused.eclass").exists());

    let layout = fs::read_to_string(kits.join("apps-kit/metadata/layout.conf")).unwrap();
    assert!(layout.contains("core-kit"));

    let sha1: serde_json::Value = serde_json::from_str(
        &fs::read_to_string(fixture.path().join("dest-trees/meta-repo/metadata/kit-sha1.json")).unwrap(),
    )
    .unwrap();
    assert_eq!(sha1.as_object().unwrap().len(), 2);

    // The broken ebuild is logged, not fatal.
    let errors = fs::read_to_string(fixture.path().join("tmp/metadata-errors-apps-kit-master.log")).unwrap();
    assert!(errors.contains("app-misc/broken-1"));
    assert!(!fixture.path().join("tmp/metadata-errors-core-kit-1.4-prime.log").exists());

    let summary = controller.summary();
    assert_eq!(summary.total_errors(), 1);
    assert!(summary.meta_commit.is_some());
}

#[test]
fn test_second_run_reuses_cache() {
    let fixture = TestFixture::new()
        .with_release(releases::CORE_AND_APPS)
        .with_upstream();
    let (_, _, first) = run_release(&fixture);
    assert_eq!(first.calls(), 3);

    let (controller, _, second) = run_release(&fixture);
    assert_eq!(second.calls(), 0);

    let report = job(&controller, "apps-kit").report().unwrap();
    assert_eq!(report.hits, 1);
    assert_eq!(report.failed, 1);

    // Cached failures still show up in this run's error log.
    assert!(fixture.path().join("tmp/metadata-errors-apps-kit-master.log").is_file());
    assert_eq!(controller.summary().total_errors(), 1);
}

#[test]
fn test_changed_ebuild_is_extracted_again() {
    let fixture = TestFixture::new()
        .with_release(releases::CORE_AND_APPS)
        .with_upstream();
    run_release(&fixture);

    fixture
        .child("source-trees/upstream/app-misc/tool/tool-2.0-r1.ebuild")
        .write_str("EAPI=8\nSLOT=0\nINHERITED=foo\n")
        .unwrap();
    let (controller, _, extractor) = run_release(&fixture);
    assert_eq!(extractor.calls(), 1);

    let entry = fs::read_to_string(
        fixture
            .path()
            .join("dest-trees/meta-repo/kits/apps-kit/metadata/md5-cache/app-misc/tool-2.0-r1"),
    )
    .unwrap();
    assert!(entry.contains("EAPI=8\n"));
    assert_eq!(job(&controller, "apps-kit").report().unwrap().computed, 1);
}

#[test]
fn test_missing_eclass_is_a_warning() {
    let fixture = TestFixture::new()
        .with_release(releases::CORE_AND_APPS)
        .with_upstream()
        .with_source_file(
            "upstream",
            "app-misc/legacy/legacy-1.ebuild",
            "EAPI=7\nINHERITED=foo gone\n",
        );
    let (controller, _, _) = run_release(&fixture);

    let warnings = fs::read_to_string(fixture.path().join("tmp/warnings-apps-kit-master.log")).unwrap();
    assert!(warnings.contains("Can't find eclass hash for gone"));
    assert_eq!(controller.summary().total_warnings(), 1);

    // The resolvable eclass is still recorded.
    let entry = fs::read_to_string(
        fixture
            .path()
            .join("dest-trees/meta-repo/kits/apps-kit/metadata/md5-cache/app-misc/legacy-1"),
    )
    .unwrap();
    assert!(entry.contains("_eclasses_=foo\t"));
}

#[test]
fn test_unknown_master_is_a_configuration_error() {
    let err = config::parse(releases::UNKNOWN_MASTER).unwrap_err();
    assert!(err.is_configuration());
    assert!(err.to_string().contains("core-kit"));
}
