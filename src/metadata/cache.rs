//! Per-kit metadata cache.
//!
//! A [`KitCache`] holds one [`AtomRecord`] per atom of a kit branch and is
//! persisted as a single JSON snapshot between runs:
//!
//! ```json
//! {"cache_data_version": 3, "atoms": {"cat/pkg-1.0": {...}}, "metadata_errors": {"cat/bad-1": "..."}}
//! ```
//!
//! During a run every atom that is read back ("retrieved") or recomputed
//! ("written") is tracked. [`KitCache::flush`] with `prune` drops everything
//! else, so records for ebuilds that left the kit do not accumulate.
//!
//! The cache is shared by the metadata worker pool. The map is guarded by a
//! mutex, but the lock is never held across the compute callback, so distinct
//! atoms extract fully in parallel.

use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use log::{error, info, warn};
use serde::{Deserialize, Serialize};

use super::{AtomRecord, ProcessingWarning, CACHE_DATA_VERSION};
use crate::error::{Error, Result};

/// How `get_or_compute` satisfied a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lookup {
    /// Served from the snapshot without recomputation.
    Hit,
    /// Recomputed and stored.
    Computed,
    /// Extraction failed; a failure placeholder was stored.
    Failed,
}

#[derive(Debug, Clone)]
pub struct CacheOutcome {
    pub record: AtomRecord,
    pub lookup: Lookup,
}

/// Counters for one run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub atoms: usize,
    pub retrieved: usize,
    pub misses: usize,
    pub writes: usize,
    pub errors: usize,
    pub warnings: usize,
}

/// Result of a flush.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FlushReport {
    pub atoms: usize,
    pub removed: usize,
    pub errors: usize,
    pub warnings: usize,
    pub saved: bool,
}

/// Paths of the per-kit error and warning logs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogPaths {
    pub metadata_errors: PathBuf,
    pub warnings: PathBuf,
}

impl LogPaths {
    pub fn new(log_dir: &Path, kit: &str, branch: &str) -> Self {
        Self {
            metadata_errors: log_dir.join(format!("metadata-errors-{}-{}.log", kit, branch)),
            warnings: log_dir.join(format!("warnings-{}-{}.log", kit, branch)),
        }
    }
}

/// Snapshot location for a kit branch.
pub fn kit_cache_path(cache_dir: &Path, kit: &str, branch: &str) -> PathBuf {
    cache_dir.join(format!("{}-{}", kit, branch))
}

#[derive(Debug, Serialize, Deserialize)]
struct Snapshot {
    cache_data_version: u32,
    atoms: BTreeMap<String, AtomRecord>,
    #[serde(default)]
    metadata_errors: BTreeMap<String, String>,
}

#[derive(Debug, Serialize)]
struct ErrorLogEntry<'a> {
    atom: &'a str,
    message: &'a str,
}

#[derive(Debug, Default)]
struct CacheState {
    atoms: BTreeMap<String, AtomRecord>,
    metadata_errors: BTreeMap<String, String>,
    warnings: Vec<ProcessingWarning>,
    retrieved: HashSet<String>,
    misses: HashSet<String>,
    writes: HashSet<String>,
}

/// Metadata records of one kit branch.
#[derive(Debug)]
pub struct KitCache {
    path: PathBuf,
    logs: Option<LogPaths>,
    state: Mutex<CacheState>,
}

impl KitCache {
    /// Load the snapshot at `path`.
    ///
    /// A missing file, malformed JSON or a different `cache_data_version` all
    /// start an empty cache; the latter two are logged as warnings.
    pub fn fetch(path: &Path) -> Self {
        let atoms = match load_snapshot(path) {
            Ok(Some(snapshot)) => snapshot.atoms,
            Ok(None) => BTreeMap::new(),
            Err(e) => {
                warn!("Kit cache at {} is unusable and will be rebuilt: {}", path.display(), e);
                BTreeMap::new()
            }
        };
        Self {
            path: path.to_path_buf(),
            logs: None,
            state: Mutex::new(CacheState {
                atoms,
                ..Default::default()
            }),
        }
    }

    /// An empty cache that will be saved to `path`.
    pub fn empty(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
            logs: None,
            state: Mutex::new(CacheState::default()),
        }
    }

    /// Write error and warning logs on flush.
    pub fn with_logs(mut self, logs: LogPaths) -> Self {
        self.logs = Some(logs);
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn lock(&self) -> Result<MutexGuard<'_, CacheState>> {
        self.state.lock().map_err(|_| Error::LockPoisoned {
            context: format!("kit cache {}", self.path.display()),
        })
    }

    /// Return the record for `atom` if it was produced from exactly these
    /// input hashes, otherwise compute, store and return a new one.
    ///
    /// An [`Error::Extraction`] from `compute` is absorbed: a failure
    /// placeholder is stored under `atom` and the message goes to the
    /// metadata error log. Any other error is returned.
    pub fn get_or_compute<F>(
        &self,
        atom: &str,
        md5: &str,
        manifest_md5: Option<&str>,
        compute: F,
    ) -> Result<CacheOutcome>
    where
        F: FnOnce() -> Result<AtomRecord>,
    {
        {
            let mut state = self.lock()?;
            if let Some(existing) = state.atoms.get(atom) {
                if existing.matches(md5, manifest_md5) {
                    let record = existing.clone();
                    state.retrieved.insert(atom.to_string());
                    return Ok(CacheOutcome {
                        record,
                        lookup: Lookup::Hit,
                    });
                }
            }
            state.misses.insert(atom.to_string());
        }

        let (record, lookup, failure) = match compute() {
            Ok(record) => (record, Lookup::Computed, None),
            Err(Error::Extraction { message, .. }) => (
                AtomRecord::failed(atom, md5, manifest_md5),
                Lookup::Failed,
                Some(message),
            ),
            Err(e) => return Err(e),
        };

        let mut state = self.lock()?;
        state.atoms.insert(atom.to_string(), record.clone());
        state.writes.insert(atom.to_string());
        if let Some(message) = failure {
            state.metadata_errors.insert(atom.to_string(), message);
        }
        Ok(CacheOutcome { record, lookup })
    }

    /// Record a processing warning for this run.
    pub fn add_warning(&self, warning: ProcessingWarning) -> Result<()> {
        self.lock()?.warnings.push(warning);
        Ok(())
    }

    /// Record a metadata error for this run.
    pub fn add_metadata_error(&self, atom: &str, message: &str) -> Result<()> {
        self.lock()?
            .metadata_errors
            .insert(atom.to_string(), message.to_string());
        Ok(())
    }

    pub fn get(&self, atom: &str) -> Result<Option<AtomRecord>> {
        Ok(self.lock()?.atoms.get(atom).cloned())
    }

    pub fn contains(&self, atom: &str) -> Result<bool> {
        Ok(self.lock()?.atoms.contains_key(atom))
    }

    pub fn stats(&self) -> Result<CacheStats> {
        let state = self.lock()?;
        Ok(CacheStats {
            atoms: state.atoms.len(),
            retrieved: state.retrieved.len(),
            misses: state.misses.len(),
            writes: state.writes.len(),
            errors: state.metadata_errors.len(),
            warnings: state.warnings.len(),
        })
    }

    /// Prune and persist the cache.
    ///
    /// With `prune`, every atom neither retrieved nor written this run is
    /// removed. With `save` false nothing is written (dry runs).
    pub fn flush(&self, save: bool, prune: bool) -> Result<FlushReport> {
        let mut state = self.lock()?;
        let mut removed = 0;
        if prune {
            let all_keys: HashSet<String> = state.atoms.keys().cloned().collect();
            let stale: Vec<String> = all_keys
                .iter()
                .filter(|k| !state.retrieved.contains(*k) && !state.writes.contains(*k))
                .cloned()
                .collect();
            let mut extra: Vec<&String> = state
                .retrieved
                .iter()
                .filter(|k| !all_keys.contains(*k))
                .collect();
            if !extra.is_empty() {
                extra.sort();
                error!(
                    "Atoms were retrieved but are not in the cache {}: {:?}",
                    self.path.display(),
                    extra
                );
            }
            for key in &stale {
                state.atoms.remove(key);
            }
            removed = stale.len();
        }

        let mut report = FlushReport {
            atoms: state.atoms.len(),
            removed,
            errors: state.metadata_errors.len(),
            warnings: state.warnings.len(),
            saved: false,
        };
        if !save {
            return Ok(report);
        }

        let snapshot = Snapshot {
            cache_data_version: CACHE_DATA_VERSION,
            atoms: std::mem::take(&mut state.atoms),
            metadata_errors: std::mem::take(&mut state.metadata_errors),
        };
        let written = write_atomically(&self.path, &serde_json::to_vec(&snapshot)?);
        state.atoms = snapshot.atoms;
        state.metadata_errors = snapshot.metadata_errors;
        written?;

        if let Some(logs) = &self.logs {
            let errors: Vec<ErrorLogEntry> = state
                .metadata_errors
                .iter()
                .map(|(atom, message)| ErrorLogEntry { atom, message })
                .collect();
            write_log(&logs.metadata_errors, &errors)?;
            write_log(&logs.warnings, &state.warnings)?;
        }

        info!(
            "Flushed {}. {} atoms. Removed {} keys. {} errors.",
            self.path.display(),
            report.atoms,
            report.removed,
            report.errors
        );
        report.saved = true;
        Ok(report)
    }
}

fn load_snapshot(path: &Path) -> Result<Option<Snapshot>> {
    if !path.exists() {
        return Ok(None);
    }
    let content = fs::read(path)?;
    let value: serde_json::Value = serde_json::from_slice(&content)?;
    let version = value.get("cache_data_version").and_then(|v| v.as_u64());
    if version != Some(u64::from(CACHE_DATA_VERSION)) {
        return Err(Error::Cache {
            message: format!(
                "cache_data_version {:?} does not match {}",
                version, CACHE_DATA_VERSION
            ),
        });
    }
    Ok(Some(serde_json::from_value(value)?))
}

fn write_atomically(path: &Path, content: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);
    fs::write(&tmp, content)?;
    fs::rename(&tmp, path)?;
    Ok(())
}

/// Write a JSON array log, or remove the log when there is nothing to report.
fn write_log<T: Serialize>(path: &Path, entries: &[T]) -> Result<()> {
    if entries.is_empty() {
        if path.exists() {
            fs::remove_file(path)?;
        }
        return Ok(());
    }
    write_atomically(path, &serde_json::to_vec(entries)?)
}

/// Remove stale per-kit error and warning logs from `log_dir`.
pub fn cleanup_error_logs(log_dir: &Path) -> Result<usize> {
    let entries = match fs::read_dir(log_dir) {
        Ok(entries) => entries,
        Err(_) => return Ok(0),
    };
    let mut removed = 0;
    for entry in entries {
        let entry = entry?;
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if name.ends_with(".log")
            && (name.starts_with("metadata-errors-") || name.starts_with("warnings-"))
        {
            fs::remove_file(entry.path())?;
            removed += 1;
        }
    }
    Ok(removed)
}

/// Summary of a snapshot on disk, for the `cache` command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotInfo {
    pub path: PathBuf,
    pub version: Option<u64>,
    pub atoms: usize,
    pub failed: usize,
    pub errors: usize,
}

impl SnapshotInfo {
    pub fn is_current(&self) -> bool {
        self.version == Some(u64::from(CACHE_DATA_VERSION))
    }
}

/// Read a snapshot without enforcing its version.
pub fn inspect(path: &Path) -> Result<SnapshotInfo> {
    let value: serde_json::Value = serde_json::from_slice(&fs::read(path)?)?;
    let version = value.get("cache_data_version").and_then(|v| v.as_u64());
    let atoms = value.get("atoms").and_then(|a| a.as_object());
    let failed = atoms
        .map(|a| {
            a.values()
                .filter(|r| r.get("failed").and_then(|f| f.as_bool()) == Some(true))
                .count()
        })
        .unwrap_or(0);
    Ok(SnapshotInfo {
        path: path.to_path_buf(),
        version,
        atoms: atoms.map(|a| a.len()).unwrap_or(0),
        failed,
        errors: value
            .get("metadata_errors")
            .and_then(|e| e.as_object())
            .map(|e| e.len())
            .unwrap_or(0),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tempfile::TempDir;

    fn record(atom: &str, md5: &str) -> AtomRecord {
        AtomRecord {
            atom: atom.to_string(),
            md5: md5.to_string(),
            metadata_out: format!("_md5_={}\n", md5),
            ..Default::default()
        }
    }

    fn extraction_failure(atom: &str) -> Error {
        Error::Extraction {
            atom: atom.to_string(),
            message: "bash exited 1".to_string(),
        }
    }

    #[test]
    fn test_hit_does_not_recompute() {
        let temp = TempDir::new().unwrap();
        let cache = KitCache::fetch(&temp.path().join("kit"));
        let calls = AtomicUsize::new(0);

        let first = cache
            .get_or_compute("cat/pkg-1.0", "aa", None, || {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(record("cat/pkg-1.0", "aa"))
            })
            .unwrap();
        let second = cache
            .get_or_compute("cat/pkg-1.0", "aa", None, || {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(record("cat/pkg-1.0", "zz"))
            })
            .unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(first.lookup, Lookup::Computed);
        assert_eq!(second.lookup, Lookup::Hit);
        assert_eq!(first.record.metadata_out, second.record.metadata_out);
    }

    #[test]
    fn test_changed_hash_invalidates() {
        let temp = TempDir::new().unwrap();
        let cache = KitCache::fetch(&temp.path().join("kit"));
        cache
            .get_or_compute("cat/pkg-1.0", "aa", None, || Ok(record("cat/pkg-1.0", "aa")))
            .unwrap();

        let outcome = cache
            .get_or_compute("cat/pkg-1.0", "bb", None, || Ok(record("cat/pkg-1.0", "bb")))
            .unwrap();
        assert_eq!(outcome.lookup, Lookup::Computed);
        assert_eq!(outcome.record.md5, "bb");
        assert_eq!(cache.get("cat/pkg-1.0").unwrap().unwrap().md5, "bb");
    }

    #[test]
    fn test_changed_manifest_invalidates() {
        let temp = TempDir::new().unwrap();
        let cache = KitCache::fetch(&temp.path().join("kit"));
        cache
            .get_or_compute("cat/pkg-1.0", "aa", None, || Ok(record("cat/pkg-1.0", "aa")))
            .unwrap();
        let outcome = cache
            .get_or_compute("cat/pkg-1.0", "aa", Some("mm"), || {
                let mut r = record("cat/pkg-1.0", "aa");
                r.manifest_md5 = Some("mm".to_string());
                Ok(r)
            })
            .unwrap();
        assert_eq!(outcome.lookup, Lookup::Computed);
    }

    #[test]
    fn test_extraction_failure_is_cached() {
        let temp = TempDir::new().unwrap();
        let cache = KitCache::fetch(&temp.path().join("kit"));
        let outcome = cache
            .get_or_compute("cat/bad-1", "aa", None, || Err(extraction_failure("cat/bad-1")))
            .unwrap();
        assert_eq!(outcome.lookup, Lookup::Failed);
        assert!(outcome.record.failed);
        assert_eq!(cache.stats().unwrap().errors, 1);

        let again = cache
            .get_or_compute("cat/bad-1", "aa", None, || panic!("must not retry"))
            .unwrap();
        assert_eq!(again.lookup, Lookup::Hit);
        assert!(again.record.failed);
    }

    #[test]
    fn test_other_errors_propagate() {
        let temp = TempDir::new().unwrap();
        let cache = KitCache::fetch(&temp.path().join("kit"));
        let result = cache.get_or_compute("cat/pkg-1", "aa", None, || {
            Err(Error::Filesystem {
                message: "disk full".to_string(),
            })
        });
        assert!(result.is_err());
        assert!(!cache.contains("cat/pkg-1").unwrap());
    }

    #[test]
    fn test_flush_roundtrip_and_prune() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("kit_cache/core-kit-master");

        let cache = KitCache::fetch(&path);
        for atom in ["cat/a-1", "cat/b-1", "cat/c-1"] {
            cache.get_or_compute(atom, "aa", None, || Ok(record(atom, "aa"))).unwrap();
        }
        let report = cache.flush(true, true).unwrap();
        assert_eq!(report.atoms, 3);
        assert_eq!(report.removed, 0);
        assert!(report.saved);

        // Next run only sees a-1 (hit) and d-1 (new); b-1 and c-1 are stale.
        let cache = KitCache::fetch(&path);
        assert_eq!(cache.stats().unwrap().atoms, 3);
        cache
            .get_or_compute("cat/a-1", "aa", None, || panic!("cached"))
            .unwrap();
        cache
            .get_or_compute("cat/d-1", "aa", None, || Ok(record("cat/d-1", "aa")))
            .unwrap();
        let report = cache.flush(true, true).unwrap();
        assert_eq!(report.removed, 2);
        assert_eq!(report.atoms, 2);

        let cache = KitCache::fetch(&path);
        assert!(cache.contains("cat/a-1").unwrap());
        assert!(cache.contains("cat/d-1").unwrap());
        assert!(!cache.contains("cat/b-1").unwrap());
    }

    #[test]
    fn test_retrieved_atom_missing_from_cache_is_not_fatal() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("kit");
        let cache = KitCache::fetch(&path);
        for atom in ["cat/a-1", "cat/ghost-1"] {
            cache.get_or_compute(atom, "aa", None, || Ok(record(atom, "aa"))).unwrap();
        }
        cache.flush(true, false).unwrap();

        let cache = KitCache::fetch(&path);
        for atom in ["cat/a-1", "cat/ghost-1"] {
            cache.get_or_compute(atom, "aa", None, || panic!("cached")).unwrap();
        }
        cache.lock().unwrap().atoms.remove("cat/ghost-1");

        let report = cache.flush(true, true).unwrap();
        assert!(report.saved);
        assert_eq!(report.removed, 0);
        assert_eq!(report.atoms, 1);

        let cache = KitCache::fetch(&path);
        assert!(cache.contains("cat/a-1").unwrap());
        assert!(!cache.contains("cat/ghost-1").unwrap());
    }

    #[test]
    fn test_flush_without_save_writes_nothing() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("kit");
        let cache = KitCache::fetch(&path);
        cache
            .get_or_compute("cat/a-1", "aa", None, || Ok(record("cat/a-1", "aa")))
            .unwrap();
        let report = cache.flush(false, true).unwrap();
        assert!(!report.saved);
        assert!(!path.exists());
    }

    #[test]
    fn test_version_mismatch_starts_cold() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("kit");
        fs::write(
            &path,
            r#"{"cache_data_version": 1, "atoms": {"cat/a-1": {"atom": "cat/a-1", "md5": "aa"}}}"#,
        )
        .unwrap();
        let cache = KitCache::fetch(&path);
        assert_eq!(cache.stats().unwrap().atoms, 0);
    }

    #[test]
    fn test_malformed_json_starts_cold() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("kit");
        fs::write(&path, "{not json").unwrap();
        let cache = KitCache::fetch(&path);
        assert_eq!(cache.stats().unwrap().atoms, 0);
    }

    #[test]
    fn test_logs_written_and_removed() {
        let temp = TempDir::new().unwrap();
        let logs = LogPaths::new(temp.path(), "core-kit", "master");
        let cache = KitCache::fetch(&temp.path().join("kit")).with_logs(logs.clone());
        cache
            .get_or_compute("cat/bad-1", "aa", None, || Err(extraction_failure("cat/bad-1")))
            .unwrap();
        cache
            .add_warning(ProcessingWarning {
                msg: "Can't find eclass hash for foo".to_string(),
                atom: "cat/bad-1".to_string(),
            })
            .unwrap();
        cache.flush(true, true).unwrap();

        let errors: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&logs.metadata_errors).unwrap()).unwrap();
        assert_eq!(errors[0]["atom"], "cat/bad-1");
        assert_eq!(errors[0]["message"], "bash exited 1");
        let warnings: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&logs.warnings).unwrap()).unwrap();
        assert_eq!(warnings.as_array().unwrap().len(), 1);

        // A clean run removes the logs.
        let cache = KitCache::fetch(&temp.path().join("kit")).with_logs(logs.clone());
        cache.flush(true, true).unwrap();
        assert!(!logs.metadata_errors.exists());
        assert!(!logs.warnings.exists());
    }

    #[test]
    fn test_cleanup_error_logs() {
        let temp = TempDir::new().unwrap();
        fs::write(temp.path().join("metadata-errors-a-b.log"), "[]").unwrap();
        fs::write(temp.path().join("warnings-a-b.log"), "[]").unwrap();
        fs::write(temp.path().join("keep.log"), "[]").unwrap();
        assert_eq!(cleanup_error_logs(temp.path()).unwrap(), 2);
        assert!(temp.path().join("keep.log").exists());
        assert_eq!(cleanup_error_logs(&temp.path().join("missing")).unwrap(), 0);
    }

    #[test]
    fn test_inspect_snapshot() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("kit");
        let cache = KitCache::fetch(&path);
        cache
            .get_or_compute("cat/bad-1", "aa", None, || Err(extraction_failure("cat/bad-1")))
            .unwrap();
        cache
            .get_or_compute("cat/a-1", "aa", None, || Ok(record("cat/a-1", "aa")))
            .unwrap();
        cache.flush(true, false).unwrap();

        let info = inspect(&path).unwrap();
        assert!(info.is_current());
        assert_eq!(info.atoms, 2);
        assert_eq!(info.failed, 1);
        assert_eq!(info.errors, 1);
    }

    #[test]
    fn test_concurrent_distinct_atoms() {
        let temp = TempDir::new().unwrap();
        let cache = Arc::new(KitCache::fetch(&temp.path().join("kit")));
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let cache = Arc::clone(&cache);
                std::thread::spawn(move || {
                    let atom = format!("cat/pkg{}-1", i);
                    cache
                        .get_or_compute(&atom, "aa", None, || {
                            std::thread::sleep(std::time::Duration::from_millis(5));
                            Ok(record(&atom, "aa"))
                        })
                        .unwrap()
                })
            })
            .collect();
        for handle in handles {
            assert_eq!(handle.join().unwrap().lookup, Lookup::Computed);
        }
        assert_eq!(cache.stats().unwrap().writes, 8);
    }

    proptest! {
        /// Property: after a pruning flush exactly the touched atoms survive
        #[test]
        fn pruning_keeps_exactly_touched_atoms(
            existing in prop::collection::btree_set("[a-h]", 0..8),
            touched in prop::collection::btree_set("[a-l]", 0..8),
        ) {
            let temp = TempDir::new().unwrap();
            let path = temp.path().join("kit");
            let seed = KitCache::fetch(&path);
            for name in &existing {
                let atom = format!("cat/{}-1", name);
                seed.get_or_compute(&atom, "aa", None, || Ok(record(&atom, "aa"))).unwrap();
            }
            seed.flush(true, false).unwrap();

            let cache = KitCache::fetch(&path);
            for name in &touched {
                let atom = format!("cat/{}-1", name);
                cache.get_or_compute(&atom, "aa", None, || Ok(record(&atom, "aa"))).unwrap();
            }
            cache.flush(true, true).unwrap();

            let after = KitCache::fetch(&path);
            for name in &touched {
                let atom = format!("cat/{}-1", name);
                let kept = after.contains(&atom).unwrap();
                prop_assert!(kept, "touched atom {} was pruned", atom);
            }
            for name in existing.difference(&touched) {
                let atom = format!("cat/{}-1", name);
                let kept = after.contains(&atom).unwrap();
                prop_assert!(!kept, "stale atom {} survived", atom);
            }
        }
    }
}
