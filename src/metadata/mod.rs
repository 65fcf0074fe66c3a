//! # Package Metadata
//!
//! Everything needed to turn one extracted ebuild into a cached metadata record
//! and the consumer-visible `metadata/md5-cache/<category>/<atom>` entry:
//!
//! - [`AtomEnv`]: the `CATEGORY`/`P`/`PN`/`PV`/`PR`/`PVR`/`PF` environment
//!   derived from an ebuild path.
//! - [`AtomRecord`]: the cached record for one atom.
//! - [`render_cache_entry`]: the flat `KEY=VALUE` md5-cache text.
//! - [`catpkg_relations`] and [`distfile_data`]: derived data stored alongside
//!   each record.
//!
//! The per-kit store of records lives in [`cache`]; the external extraction
//! process is abstracted by [`extractor`].

pub mod cache;
pub mod extractor;

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use log::debug;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::eclass::HashCollection;
use crate::error::{Error, Result};

/// Bump when the record layout changes; older snapshots are discarded.
pub const CACHE_DATA_VERSION: u32 = 3;

/// Metadata keys written to md5-cache entries, in output order.
pub const AUXDB_LINES: [&str; 18] = [
    "DEPEND",
    "RDEPEND",
    "SLOT",
    "SRC_URI",
    "RESTRICT",
    "HOMEPAGE",
    "LICENSE",
    "DESCRIPTION",
    "KEYWORDS",
    "INHERITED",
    "IUSE",
    "REQUIRED_USE",
    "PDEPEND",
    "BDEPEND",
    "EAPI",
    "PROPERTIES",
    "DEFINED_PHASES",
    "HDEPEND",
];

/// Dependency classes relations are extracted from.
pub const RELATION_KINDS: [&str; 5] = ["DEPEND", "RDEPEND", "PDEPEND", "BDEPEND", "HDEPEND"];

pub const EBUILD_SUFFIX: &str = ".ebuild";

/// Split a trailing `-rN` revision off a package-version string.
///
/// Returns the reduced string and the revision number when present.
pub fn strip_rev(pf: &str) -> (&str, Option<&str>) {
    if let Some(pos) = pf.rfind("-r") {
        let rev = &pf[pos + 2..];
        if !rev.is_empty() && rev.bytes().all(|b| b.is_ascii_digit()) {
            return (&pf[..pos], Some(rev));
        }
    }
    (pf, None)
}

/// Environment handed to the metadata extractor for one ebuild.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AtomEnv {
    pub category: String,
    pub pf: String,
    pub pn: String,
    pub p: String,
    pub pv: String,
    pub pr: String,
    pub pvr: String,
}

impl AtomEnv {
    /// Derive the environment from `<...>/<category>/<pn>/<pf>.ebuild`.
    pub fn from_ebuild_path(ebuild_path: &Path) -> Result<Self> {
        let invalid = || Error::Filesystem {
            message: format!("Not a <category>/<package>/<pf>.ebuild path: {}", ebuild_path.display()),
        };
        let file_name = ebuild_path.file_name().and_then(|n| n.to_str()).ok_or_else(invalid)?;
        let pf = file_name.strip_suffix(EBUILD_SUFFIX).ok_or_else(invalid)?;
        let pkg_dir = ebuild_path.parent().ok_or_else(invalid)?;
        let pn = pkg_dir.file_name().and_then(|n| n.to_str()).ok_or_else(invalid)?;
        let category = pkg_dir
            .parent()
            .and_then(|c| c.file_name())
            .and_then(|n| n.to_str())
            .ok_or_else(invalid)?;

        let (reduced, rev) = strip_rev(pf);
        let (p, pr) = match rev {
            Some(rev) => (reduced, format!("r{}", rev)),
            None => (pf, "r0".to_string()),
        };
        fn version_of<'a>(name: &'a str, pn: &str) -> Option<&'a str> {
            name.strip_prefix(pn)
                .and_then(|rest| rest.strip_prefix('-'))
                .filter(|rest| !rest.is_empty())
        }
        let pv = version_of(p, pn).ok_or_else(invalid)?;
        let pvr = version_of(pf, pn).ok_or_else(invalid)?;

        Ok(Self {
            category: category.to_string(),
            pf: pf.to_string(),
            pn: pn.to_string(),
            p: p.to_string(),
            pv: pv.to_string(),
            pr,
            pvr: pvr.to_string(),
        })
    }

    /// `category/pf`, the cache key.
    pub fn atom(&self) -> String {
        format!("{}/{}", self.category, self.pf)
    }

    pub fn catpkg(&self) -> String {
        format!("{}/{}", self.category, self.pn)
    }

    /// Variables exported to the extractor process.
    pub fn vars(&self) -> Vec<(&'static str, &str)> {
        vec![
            ("CATEGORY", self.category.as_str()),
            ("P", self.p.as_str()),
            ("PN", self.pn.as_str()),
            ("PV", self.pv.as_str()),
            ("PR", self.pr.as_str()),
            ("PVR", self.pvr.as_str()),
            ("PF", self.pf.as_str()),
        ]
    }
}

/// One distfile referenced by `SRC_URI` and listed in the Manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DistFile {
    pub name: String,
    pub size: u64,
    pub hashes: BTreeMap<String, String>,
}

/// Cached metadata for one atom.
///
/// A record with `failed` set stands for an ebuild whose extraction failed; it
/// keeps the input hashes so the same broken input is not retried every run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AtomRecord {
    pub atom: String,
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub package: String,
    #[serde(default)]
    pub catpkg: String,
    #[serde(default)]
    pub revision: String,
    /// Raw extracted fields.
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
    #[serde(default)]
    pub relations: Vec<String>,
    #[serde(default)]
    pub relations_by_kind: BTreeMap<String, Vec<String>>,
    /// `(name, hash)` of every inherited eclass that resolved.
    #[serde(default)]
    pub eclasses: Vec<(String, String)>,
    /// md5 of the ebuild.
    pub md5: String,
    /// md5 of the package's Manifest, if there is one.
    #[serde(default)]
    pub manifest_md5: Option<String>,
    /// Rendered md5-cache entry.
    #[serde(default)]
    pub metadata_out: String,
    #[serde(default)]
    pub kit: String,
    #[serde(default)]
    pub branch: String,
    #[serde(default)]
    pub files: Option<Vec<DistFile>>,
    #[serde(default)]
    pub failed: bool,
}

impl AtomRecord {
    /// Placeholder stored when extraction failed.
    pub fn failed(atom: &str, md5: &str, manifest_md5: Option<&str>) -> Self {
        Self {
            atom: atom.to_string(),
            md5: md5.to_string(),
            manifest_md5: manifest_md5.map(str::to_string),
            failed: true,
            ..Default::default()
        }
    }

    /// Whether this record was produced from exactly these inputs.
    pub fn matches(&self, md5: &str, manifest_md5: Option<&str>) -> bool {
        self.md5 == md5 && self.manifest_md5.as_deref() == manifest_md5
    }
}

/// Processing warning recorded against an atom (e.g. an unresolved eclass).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessingWarning {
    pub msg: String,
    pub atom: String,
}

/// Eclass `(name, hash)` pairs for the names in `INHERITED`, sorted by name.
/// Names missing from `eclasses` are returned separately.
pub fn resolve_inherited(
    inherited: &str,
    eclasses: &HashCollection,
) -> (Vec<(String, String)>, Vec<String>) {
    let names: BTreeSet<&str> = inherited.split_whitespace().collect();
    let mut found = Vec::new();
    let mut missing = Vec::new();
    for name in names {
        match eclasses.get(name) {
            Some(hash) => found.push((name.to_string(), hash.to_string())),
            None => missing.push(name.to_string()),
        }
    }
    (found, missing)
}

/// Render the md5-cache entry for an ebuild.
pub fn render_cache_entry(
    infos: &BTreeMap<String, String>,
    eclasses: &[(String, String)],
    ebuild_md5: &str,
) -> String {
    let mut out = String::new();
    for key in AUXDB_LINES {
        if let Some(value) = infos.get(key) {
            if !value.is_empty() {
                out.push_str(key);
                out.push('=');
                out.push_str(value);
                out.push('\n');
            }
        }
    }
    if !eclasses.is_empty() {
        let pairs: Vec<String> = eclasses
            .iter()
            .map(|(name, hash)| format!("{}\t{}", name, hash))
            .collect();
        out.push_str("_eclasses_=");
        out.push_str(&pairs.join("\t"));
        out.push('\n');
    }
    out.push_str("_md5_=");
    out.push_str(ebuild_md5);
    out.push('\n');
    out
}

fn catpkg_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^(?:!!|!)?(?:>=|<=|=|~|<|>)?([A-Za-z0-9_][A-Za-z0-9+_.-]*/[A-Za-z0-9_][A-Za-z0-9+_-]*?)(?:-[0-9][^:\[]*)?(?:\*)?(?::[^\[]*)?(?:\[.*\])?$")
            .expect("static regex is valid")
    })
}

/// Extract the set of `category/package` names referenced by a dependency string.
pub fn catpkg_relations(depstring: &str) -> BTreeSet<String> {
    let re = catpkg_regex();
    let mut out = BTreeSet::new();
    for token in depstring.split_whitespace() {
        if token == "||" || token == "(" || token == ")" || token.ends_with('?') {
            continue;
        }
        if let Some(caps) = re.captures(token) {
            out.insert(caps[1].to_string());
        }
    }
    out
}

/// Relations by dependency class, plus the combined sorted set.
pub fn relations_of(
    infos: &BTreeMap<String, String>,
) -> (Vec<String>, BTreeMap<String, Vec<String>>) {
    let mut all = BTreeSet::new();
    let mut by_kind = BTreeMap::new();
    for kind in RELATION_KINDS {
        let Some(deps) = infos.get(kind) else { continue };
        if deps.is_empty() {
            continue;
        }
        let rel = catpkg_relations(deps);
        all.extend(rel.iter().cloned());
        by_kind.insert(kind.to_string(), rel.into_iter().collect());
    }
    (all.into_iter().collect(), by_kind)
}

/// File names fetched by a `SRC_URI` value, honoring `->` renames.
pub fn src_uri_files(src_uri: &str) -> Vec<String> {
    let tokens: Vec<&str> = src_uri.split_whitespace().collect();
    let mut out = Vec::new();
    let mut i = 0;
    while i < tokens.len() {
        let token = tokens[i];
        if token == "(" || token == ")" || token == "||" || token.ends_with('?') {
            i += 1;
            continue;
        }
        if tokens.get(i + 1) == Some(&"->") {
            if let Some(renamed) = tokens.get(i + 2) {
                out.push(renamed.to_string());
            }
            i += 3;
            continue;
        }
        let name = token.rsplit('/').next().unwrap_or(token);
        if !name.is_empty() && !out.iter().any(|n| n == name) {
            out.push(name.to_string());
        }
        i += 1;
    }
    out
}

/// Distfile entries for `SRC_URI` files found in the Manifest's `DIST` lines.
pub fn distfile_data(src_uri: &str, manifest_path: &Path) -> Result<Vec<DistFile>> {
    let manifest = fs::read_to_string(manifest_path)?;
    let mut dist: BTreeMap<&str, DistFile> = BTreeMap::new();
    for line in manifest.lines() {
        let parts: Vec<&str> = line.split_whitespace().collect();
        if parts.len() < 3 || parts[0] != "DIST" {
            continue;
        }
        let Ok(size) = parts[2].parse::<u64>() else {
            debug!("Skipping malformed DIST line in {}: {}", manifest_path.display(), line);
            continue;
        };
        let hashes = parts[3..]
            .chunks(2)
            .filter(|c| c.len() == 2)
            .map(|c| (c[0].to_string(), c[1].to_string()))
            .collect();
        dist.insert(
            parts[1],
            DistFile {
                name: parts[1].to_string(),
                size,
                hashes,
            },
        );
    }
    Ok(src_uri_files(src_uri)
        .into_iter()
        .filter_map(|name| dist.get(name.as_str()).cloned())
        .collect())
}

/// Location of the md5-cache entry for `atom` under a kit root.
pub fn cache_entry_path(kit_root: &Path, atom: &str) -> PathBuf {
    kit_root.join("metadata").join("md5-cache").join(atom)
}

/// Write the md5-cache entry for `atom`.
pub fn write_cache_entry(kit_root: &Path, atom: &str, metadata_out: &str) -> Result<()> {
    let path = cache_entry_path(kit_root, atom);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(&path, metadata_out)?;
    Ok(())
}
