//! Test tasks and the suite definitions they are built from.
//!
//! A [`TestTask`] is the unit of scheduling: one test file bound to a suite
//! and that suite's execution context. Tasks are produced by the scheduler,
//! persisted as newline-delimited JSON partition files, read back by the
//! runner and, when they fail, written verbatim into the failure file that
//! the next runner invocation consumes.
//!
//! # Persisted Shape
//!
//! ```json
//! {"suite":"unit","filename":"spec/01-unit/foo_spec.lua","exclude_tags":"flaky","duration":12.5}
//! ```
//!
//! Optional fields are omitted when absent.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::jsonl;

/// Identity of a test file across runs: the suite it belongs to and its path.
///
/// The same file may appear in several suites with different costs, so every
/// duration is keyed by both parts.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TaskKey {
    pub suite: String,
    pub filename: String,
}

impl TaskKey {
    pub fn new(suite: impl Into<String>, filename: impl Into<String>) -> Self {
        Self {
            suite: suite.into(),
            filename: filename.into(),
        }
    }
}

impl fmt::Display for TaskKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.suite, self.filename)
    }
}

/// A test suite as authored in the suite-definitions file.
///
/// `specs` entries are paths relative to the repository root. A directory
/// entry expands to every file beneath it matching `spec_pattern`; any
/// other entry is taken literally.
///
/// # Example
///
/// ```json
/// [
///   {"name": "unit", "specs": ["spec/01-unit/"], "exclude_tags": "flaky"},
///   {"name": "dbless", "specs": ["spec/02-integration/"], "environment": {"KONG_DATABASE": "off"}}
/// ]
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SuiteDefinition {
    pub name: String,

    pub specs: Vec<String>,

    /// Tags passed to the test command's exclusion filter.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exclude_tags: Option<String>,

    /// Extra environment variables for every file of the suite.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub environment: Option<BTreeMap<String, String>>,

    /// Script, relative to the build root, sourced before the test command.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub venv_script: Option<String>,
}

/// One schedulable unit of work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestTask {
    pub suite: String,

    pub filename: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exclude_tags: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub environment: Option<BTreeMap<String, String>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub venv_script: Option<String>,

    /// Estimated duration in seconds; `0` when the file has never been measured.
    #[serde(default, serialize_with = "jsonl::serialize_rounded")]
    pub duration: f64,

    /// Set by the scheduler when no estimate exists for this task's key.
    ///
    /// Not persisted: once a partition file is written the distinction is only
    /// visible as a zero duration.
    #[serde(skip)]
    pub unseen: bool,
}

impl TestTask {
    /// Creates a task for `filename` carrying the execution context of `suite`.
    pub fn from_suite(suite: &SuiteDefinition, filename: impl Into<String>) -> Self {
        Self {
            suite: suite.name.clone(),
            filename: filename.into(),
            exclude_tags: suite.exclude_tags.clone(),
            environment: suite.environment.clone(),
            venv_script: suite.venv_script.clone(),
            duration: 0.0,
            unseen: true,
        }
    }

    pub fn key(&self) -> TaskKey {
        TaskKey::new(&self.suite, &self.filename)
    }

    /// Weight this task contributes to a partition's accumulated estimate.
    ///
    /// Tasks without a positive estimate count as `unseen_weight` so that a
    /// run of unknown files cannot pile up on a single partition.
    pub fn weight(&self, unseen_weight: f64) -> f64 {
        if self.unseen || self.duration <= 0.0 {
            unseen_weight
        } else {
            self.duration
        }
    }
}

/// Errors reading or writing task files.
#[derive(Debug, thiserror::Error)]
pub enum TaskFileError {
    #[error("Failed to read task file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse task file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("Failed to write task file {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Reads a newline-delimited task file.
pub fn read_tasks(path: &Path) -> Result<Vec<TestTask>, TaskFileError> {
    let content = std::fs::read_to_string(path).map_err(|source| TaskFileError::Read {
        path: path.to_path_buf(),
        source,
    })?;

    jsonl::parse_records(&content).map_err(|source| TaskFileError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

/// Writes tasks as a newline-delimited task file, replacing any existing file.
pub fn write_tasks(path: &Path, tasks: &[TestTask]) -> Result<(), TaskFileError> {
    let write_error = |source| TaskFileError::Write {
        path: path.to_path_buf(),
        source,
    };

    let content = jsonl::encode_records(tasks).map_err(|e| write_error(e.into()))?;
    jsonl::write_atomic(path, &content).map_err(write_error)
}
