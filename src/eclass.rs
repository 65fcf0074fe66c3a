//! Eclass hash collections.
//!
//! A [`HashCollection`] records the repository roots eclasses were scanned
//! from and maps each eclass name (e.g. `eutils`) to the md5 of its file.
//! Collections are combined with [`HashCollection::merge`] (or `+`), where the
//! right-hand collection wins on name collisions. This is how a kit's effective
//! eclass set is built from its masters:
//!
//! ```
//! use kit_merge::eclass::HashCollection;
//!
//! let core = HashCollection::from_hashes(vec!["/core".into()], [("foo", "h1")]);
//! let apps = HashCollection::new(None);
//! let merged = apps.merge(&core).merge(&apps);
//! assert_eq!(merged.get("foo"), Some("h1"));
//! ```

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::ops::Add;
use std::path::{Path, PathBuf};

use log::debug;
use md5::{Digest, Md5};

/// File suffix of eclasses.
pub const ECLASS_SUFFIX: &str = ".eclass";

/// Hex md5 digest of a file's content.
pub fn md5_file(path: &Path) -> io::Result<String> {
    let content = fs::read(path)?;
    Ok(md5_bytes(&content))
}

/// Hex md5 digest of a byte slice.
pub fn md5_bytes(content: &[u8]) -> String {
    format!("{:x}", Md5::digest(content))
}

/// Mapping of eclass name to content hash, with path provenance.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HashCollection {
    paths: Vec<PathBuf>,
    hashes: BTreeMap<String, String>,
}

impl HashCollection {
    /// Create a collection, scanning `<path>/eclass` when a path is given.
    ///
    /// A missing or unreadable eclass directory yields an empty mapping.
    pub fn new(path: Option<&Path>) -> Self {
        let mut collection = Self::default();
        if let Some(path) = path {
            collection.add_path(path);
        }
        collection
    }

    /// Build a collection from precomputed hashes.
    pub fn from_hashes<I, K, V>(paths: Vec<PathBuf>, hashes: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            paths,
            hashes: hashes
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }

    /// Record `path` as the highest-precedence path and scan its eclasses.
    pub fn add_path(&mut self, path: &Path) {
        self.paths.push(path.to_path_buf());
        self.scan(&path.join("eclass"));
    }

    fn scan(&mut self, eclass_dir: &Path) {
        let entries = match fs::read_dir(eclass_dir) {
            Ok(entries) => entries,
            Err(_) => return,
        };
        for entry in entries.flatten() {
            let file_name = entry.file_name();
            let file_name = file_name.to_string_lossy();
            let Some(name) = file_name.strip_suffix(ECLASS_SUFFIX) else {
                continue;
            };
            let path = entry.path();
            if !path.is_file() {
                continue;
            }
            match md5_file(&path) {
                Ok(hash) => {
                    self.hashes.insert(name.to_string(), hash);
                }
                Err(e) => debug!("Skipping unreadable eclass {}: {}", path.display(), e),
            }
        }
    }

    /// Combine two collections. `other` wins on key collisions and its paths
    /// follow (take precedence over) ours.
    pub fn merge(&self, other: &HashCollection) -> HashCollection {
        let mut paths = self.paths.clone();
        paths.extend(other.paths.iter().cloned());
        let mut hashes = self.hashes.clone();
        hashes.extend(other.hashes.iter().map(|(k, v)| (k.clone(), v.clone())));
        HashCollection { paths, hashes }
    }

    /// Hash of an eclass, by name without suffix.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.hashes.get(name).map(String::as_str)
    }

    pub fn hashes(&self) -> &BTreeMap<String, String> {
        &self.hashes
    }

    /// Provenance paths, lowest precedence first.
    pub fn paths(&self) -> &[PathBuf] {
        &self.paths
    }

    /// Distinct eclass search roots, highest precedence first. When a path
    /// appears more than once only its highest-precedence position counts.
    pub fn search_paths(&self) -> Vec<PathBuf> {
        let mut out: Vec<PathBuf> = Vec::with_capacity(self.paths.len());
        for path in self.paths.iter().rev() {
            if !out.contains(path) {
                out.push(path.clone());
            }
        }
        out
    }

    pub fn len(&self) -> usize {
        self.hashes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hashes.is_empty()
    }
}

impl Add for &HashCollection {
    type Output = HashCollection;

    fn add(self, other: &HashCollection) -> HashCollection {
        self.merge(other)
    }
}
