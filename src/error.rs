//! # Error Handling
//!
//! This module defines the centralized error type for `kit-merge`. It uses the
//! `thiserror` library to create an `Error` enum covering every failure mode of
//! a regeneration run, with enough context to tell which kit, step or tree was
//! involved.
//!
//! ## Taxonomy
//!
//! - **Configuration errors** (`ConfigParse`, `MasterConfig`): fatal, raised
//!   before any job starts.
//! - **Step failures** (`Step`, `GitCommand`, `Filesystem`, `Io`): abort the
//!   owning job's pipeline group.
//! - **Extraction failures** (`Extraction`): recovered inside the metadata
//!   cache, recorded as a per-atom metadata error and never propagated further.
//! - **Scheduling errors** (`Scheduling`, `PipelineFailed`): ordering guard
//!   violations and the aggregated result of failed pipeline groups.
//!
//! The `Result<T>` alias is used throughout the library.

use thiserror::Error;

/// Main error type for kit-merge operations
#[derive(Error, Debug)]
pub enum Error {
    /// The release configuration could not be parsed or is inconsistent.
    #[error("Configuration parsing error: {message}{}", hint.as_ref().map(|h| format!("\n  hint: {}", h)).unwrap_or_default())]
    ConfigParse {
        message: String,
        /// Optional hint for how to fix the configuration issue
        hint: Option<String>,
    },

    /// A master kit is missing, declared more than once, or referenced in a
    /// way that makes the master pipeline impossible to build.
    #[error("Master kit configuration error for {kit}: {message}")]
    MasterConfig { kit: String, message: String },

    /// An error occurred while executing a Git command against a tree.
    #[error("Git command failed for {tree}: {command} - {stderr}")]
    GitCommand {
        command: String,
        tree: String,
        stderr: String,
    },

    /// A tree-mutation step failed.
    #[error("Step {step} failed for kit {kit}: {message}")]
    Step {
        step: String,
        kit: String,
        message: String,
    },

    /// The external metadata extractor could not produce metadata for an atom.
    #[error("Metadata extraction failed for {atom}: {message}")]
    Extraction { atom: String, message: String },

    /// An error occurred with a metadata cache operation.
    #[error("Cache operation error: {message}")]
    Cache { message: String },

    /// Jobs were asked to run out of order (e.g. a dependent kit observed a
    /// master that has not committed yet).
    #[error("Scheduling error: {message}")]
    Scheduling { message: String },

    /// One or more jobs of a pipeline group failed.
    #[error("Pipeline {pipeline} failed: {}", failures.join("; "))]
    PipelineFailed {
        pipeline: String,
        failures: Vec<String>,
    },

    /// An error occurred with a filesystem operation inside a tree.
    #[error("Filesystem operation error: {message}")]
    Filesystem { message: String },

    /// An I/O error, wrapped from `std::io::Error`.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A YAML parsing error, wrapped from `serde_yaml::Error`.
    #[error("YAML parsing error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// A JSON error, wrapped from `serde_json::Error`.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A regular expression error, wrapped from `regex::Error`.
    #[error("Regex error: {0}")]
    Regex(#[from] regex::Error),

    /// A glob pattern error, wrapped from `glob::PatternError`.
    #[error("Glob pattern error: {0}")]
    Glob(#[from] glob::PatternError),

    /// An error indicating that a mutex or other lock has been poisoned.
    #[error("Lock poisoned: {context}")]
    LockPoisoned { context: String },

    /// A worker pool could not be built.
    #[error("Thread pool error: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),
}

/// A convenient type alias for `Result<T, Error>`.
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Whether this error belongs to the configuration class, which must abort
    /// the run before any job executes.
    pub fn is_configuration(&self) -> bool {
        matches!(self, Error::ConfigParse { .. } | Error::MasterConfig { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_config_parse() {
        let error = Error::ConfigParse {
            message: "Invalid YAML".to_string(),
            hint: None,
        };
        let display = format!("{}", error);
        assert!(display.contains("Configuration parsing error"));
        assert!(display.contains("Invalid YAML"));
        assert!(!display.contains("hint:"));
    }

    #[test]
    fn test_error_display_config_parse_with_hint() {
        let error = Error::ConfigParse {
            message: "Unknown source collection 'foo'".to_string(),
            hint: Some("Declare it under source_collections".to_string()),
        };
        let display = format!("{}", error);
        assert!(display.contains("hint:"));
        assert!(display.contains("source_collections"));
    }

    #[test]
    fn test_error_display_master_config() {
        let error = Error::MasterConfig {
            kit: "core-kit".to_string(),
            message: "declared 2 times".to_string(),
        };
        let display = format!("{}", error);
        assert!(display.contains("core-kit"));
        assert!(display.contains("declared 2 times"));
        assert!(error.is_configuration());
    }

    #[test]
    fn test_error_display_git_command() {
        let error = Error::GitCommand {
            command: "commit".to_string(),
            tree: "core-kit".to_string(),
            stderr: "nothing added".to_string(),
        };
        let display = format!("{}", error);
        assert!(display.contains("Git command failed"));
        assert!(display.contains("core-kit"));
        assert!(display.contains("nothing added"));
        assert!(!error.is_configuration());
    }

    #[test]
    fn test_error_display_step() {
        let error = Error::Step {
            step: "CopyFiles".to_string(),
            kit: "apps-kit".to_string(),
            message: "missing source".to_string(),
        };
        let display = format!("{}", error);
        assert!(display.contains("Step CopyFiles failed for kit apps-kit"));
    }

    #[test]
    fn test_error_display_pipeline_failed() {
        let error = Error::PipelineFailed {
            pipeline: "pipeline0".to_string(),
            failures: vec!["a failed".to_string(), "b failed".to_string()],
        };
        let display = format!("{}", error);
        assert!(display.contains("pipeline0"));
        assert!(display.contains("a failed; b failed"));
    }

    #[test]
    fn test_error_from_io_error() {
        let io_error = std::io::Error::new(std::io::ErrorKind::NotFound, "File not found");
        let error: Error = io_error.into();
        let display = format!("{}", error);
        assert!(display.contains("I/O error"));
        assert!(display.contains("File not found"));
    }

    #[test]
    fn test_error_from_yaml_error() {
        let yaml_error = serde_yaml::from_str::<serde_yaml::Value>("invalid: [unclosed").unwrap_err();
        let error: Error = yaml_error.into();
        assert!(format!("{}", error).contains("YAML parsing error"));
    }

    #[test]
    fn test_error_from_json_error() {
        let json_error = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        let error: Error = json_error.into();
        assert!(format!("{}", error).contains("JSON error"));
    }
}
