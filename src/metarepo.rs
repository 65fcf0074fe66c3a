//! Meta-repo metadata.
//!
//! After every kit has committed, the meta-repo records what was produced:
//!
//! - `metadata/kit-sha1.json`: kit name to `{branch: revision}`.
//! - `metadata/kit-info.json`: `kit_order`, `kit_settings` (per-branch
//!   stability and kit type), `release_defs` (non-deprecated branches per
//!   kit) and `release_info`.
//! - `metadata/version.json`: the release descriptor.
//!
//! All JSON is written with sorted keys so unchanged input produces an
//! unchanged meta-repo commit.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use serde::Serialize;
use serde_json::{json, Value};

use crate::config::{Release, Stability};
use crate::error::Result;

/// Revisions of every committed kit branch.
pub type KitSha1s = BTreeMap<String, BTreeMap<String, String>>;

/// Every kit is generated from source repositories.
const KIT_TYPE: &str = "auto";

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let mut out = serde_json::to_string_pretty(value)?;
    out.push('\n');
    fs::write(path, out)?;
    Ok(())
}

/// Content of `kit-info.json`.
pub fn kit_info(release: &Release, kit_sha1s: &KitSha1s) -> Result<Value> {
    let kit_order: Vec<&String> = kit_sha1s.keys().collect();

    let mut settings: BTreeMap<&str, Value> = BTreeMap::new();
    for kit in &release.kits {
        let entry = settings
            .entry(kit.name.as_str())
            .or_insert_with(|| json!({ "stability": {}, "type": KIT_TYPE }));
        entry["stability"][kit.branch.as_str()] = json!(kit.stability.as_str());
    }

    let mut release_defs: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
    for name in &kit_order {
        let branches = release
            .iter_kits(name)
            .filter(|k| k.stability != Stability::Deprecated)
            .map(|k| k.branch.as_str())
            .collect();
        release_defs.insert(name.as_str(), branches);
    }

    Ok(json!({
        "kit_order": kit_order,
        "kit_settings": settings,
        "release_defs": release_defs,
        "release_info": serde_json::to_value(&release.release_info)?,
    }))
}

/// Write the three metadata files under `<root>/metadata`.
pub fn write_metadata(root: &Path, release: &Release, kit_sha1s: &KitSha1s) -> Result<()> {
    let metadata = root.join("metadata");
    fs::create_dir_all(&metadata)?;
    write_json(&metadata.join("kit-sha1.json"), kit_sha1s)?;
    write_json(&metadata.join("kit-info.json"), &kit_info(release, kit_sha1s)?)?;
    write_json(&metadata.join("version.json"), &release.release_info)?;
    Ok(())
}

/// Keep nested kit trees out of meta-repo commits.
pub fn ignore_kits(root: &Path) -> Result<()> {
    let path = root.join(".gitignore");
    let existing = fs::read_to_string(&path).unwrap_or_default();
    if existing.lines().any(|l| l.trim() == "/kits/") {
        return Ok(());
    }
    let mut content = existing;
    if !content.is_empty() && !content.ends_with('\n') {
        content.push('\n');
    }
    content.push_str("/kits/\n");
    fs::create_dir_all(root)?;
    fs::write(&path, content)?;
    Ok(())
}
