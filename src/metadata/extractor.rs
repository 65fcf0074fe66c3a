//! External metadata extraction.
//!
//! Extracting metadata from an ebuild means sourcing it (and every eclass it
//! inherits) in a shell, which is far too expensive to do on every run. The
//! metadata cache calls a [`MetadataExtractor`] once per cache miss.
//!
//! [`EbuildShExtractor`] is the production implementation: it runs
//! `bash <ebuild.sh> depend` with the atom environment exported and reads
//! `KEY=VALUE` lines from the child's stdout.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use super::AtomEnv;
use crate::error::{Error, Result};

/// Produces the raw metadata field map for one ebuild.
pub trait MetadataExtractor: Send + Sync {
    /// Extract metadata from `ebuild_path`.
    ///
    /// `eclass_paths` are repository roots whose `eclass/` directories may be
    /// searched, highest precedence first. They are exported in this order as
    /// `PORTAGE_ECLASS_LOCATIONS`. A failure is reported as
    /// [`Error::Extraction`].
    fn extract(
        &self,
        ebuild_path: &Path,
        env: &AtomEnv,
        eclass_paths: &[PathBuf],
    ) -> Result<BTreeMap<String, String>>;
}

/// Runs portage's `ebuild.sh` in `depend` phase.
#[derive(Debug, Clone)]
pub struct EbuildShExtractor {
    shell: PathBuf,
    ebuild_sh: PathBuf,
}

impl EbuildShExtractor {
    pub fn new(ebuild_sh: PathBuf) -> Self {
        Self {
            shell: PathBuf::from("bash"),
            ebuild_sh,
        }
    }

    /// Use a different shell binary.
    pub fn with_shell(mut self, shell: PathBuf) -> Self {
        self.shell = shell;
        self
    }
}

/// Parse `KEY=VALUE` lines. Lines without `=` are ignored.
pub fn parse_key_values(stdout: &str) -> BTreeMap<String, String> {
    stdout
        .lines()
        .filter_map(|line| line.split_once('='))
        .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
        .filter(|(k, _)| !k.is_empty())
        .collect()
}

impl MetadataExtractor for EbuildShExtractor {
    fn extract(
        &self,
        ebuild_path: &Path,
        env: &AtomEnv,
        eclass_paths: &[PathBuf],
    ) -> Result<BTreeMap<String, String>> {
        let locations = eclass_paths
            .iter()
            .map(|p| p.display().to_string())
            .collect::<Vec<_>>()
            .join(" ");

        let mut cmd = Command::new(&self.shell);
        cmd.arg(&self.ebuild_sh)
            .arg("depend")
            .env_clear()
            .env("PATH", std::env::var_os("PATH").unwrap_or_default())
            .env("EBUILD", ebuild_path)
            .env("EBUILD_PHASE", "depend")
            .env("PORTAGE_ECLASS_LOCATIONS", locations)
            .stdin(Stdio::null());
        for (key, value) in env.vars() {
            cmd.env(key, value);
        }

        let output = cmd.output().map_err(|e| Error::Extraction {
            atom: env.atom(),
            message: format!("failed to spawn {}: {}", self.shell.display(), e),
        })?;

        if !output.status.success() {
            return Err(Error::Extraction {
                atom: env.atom(),
                message: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        let infos = parse_key_values(&String::from_utf8_lossy(&output.stdout));
        if infos.is_empty() {
            return Err(Error::Extraction {
                atom: env.atom(),
                message: "extractor produced no metadata".to_string(),
            });
        }
        Ok(infos)
    }
}
