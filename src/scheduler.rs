//! Runtime-aware test scheduling.
//!
//! The scheduler turns suite definitions into `K` partition files of roughly
//! equal expected duration, one per CI worker.
//!
//! # Pipeline
//!
//! ```text
//! suites.json ──► expand ──► estimate ──► partition ──► {prefix}1.json
//!                  (files)    (lookup      (greedy        {prefix}2.json
//!                              runtimes)    LPT)          ...
//! ```
//!
//! 1. **Expansion** ([`expand`]): directory specs become the matching files
//!    beneath them.
//! 2. **Estimation**: each `(suite, filename)` is looked up in the runtime
//!    estimates. Missing keys are *unseen*; they are reported once each.
//! 3. **Partitioning** ([`partition`]): greedy longest-first assignment with
//!    unseen tasks placed first.
//! 4. **Persistence**: partitions are written as newline-delimited task files.
//!
//! # Example
//!
//! ```no_run
//! use std::path::Path;
//! use test_scheduler::config::ScheduleConfig;
//! use test_scheduler::scheduler::{ScheduleRequest, Scheduler};
//!
//! let scheduler = Scheduler::new(4, ScheduleConfig::default())?;
//! let schedule = scheduler.schedule(&ScheduleRequest {
//!     suites: Path::new("ci/suites.json"),
//!     estimates: Some(Path::new("runtimes.json")),
//!     root: Path::new("."),
//!     output_prefix: "test-chunk.",
//! })?;
//! println!("{} new tests", schedule.new_tasks.len());
//! # Ok::<(), test_scheduler::scheduler::ScheduleError>(())
//! ```

pub mod expand;
pub mod partition;

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::config::ScheduleConfig;
use crate::statistics::{RuntimeEstimates, StatisticsError};
use crate::task::{self, SuiteDefinition, TaskFileError, TaskKey, TestTask};

pub use partition::Partition;

/// Errors that abort a scheduling pass.
///
/// All of them are raised before any partition file is written, except
/// [`Write`](Self::Write), after which already written files are removed.
#[derive(Debug, thiserror::Error)]
pub enum ScheduleError {
    #[error("Partition count must be at least 1, got {0}")]
    InvalidWorkerCount(usize),

    #[error("Failed to read suite definitions {path}: {source}")]
    SuiteDefinitions {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse suite definitions {path}: {source}")]
    Json {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("Spec path {path} cannot be resolved: {source}")]
    SpecPath {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Invalid spec pattern {pattern}: {source}")]
    Pattern {
        pattern: String,
        source: glob::PatternError,
    },

    #[error("Failed to load runtime estimates: {0}")]
    Estimates(#[from] StatisticsError),

    #[error(transparent)]
    Write(#[from] TaskFileError),
}

/// Inputs of one [`Scheduler::schedule`] call.
#[derive(Debug, Clone, Copy)]
pub struct ScheduleRequest<'a> {
    /// JSON array of [`SuiteDefinition`]s.
    pub suites: &'a Path,

    /// Runtime-estimate file; `None` schedules every task as unseen.
    pub estimates: Option<&'a Path>,

    /// Directory the `specs` paths are relative to.
    pub root: &'a Path,

    /// Partition `n` is written to `{output_prefix}{n}.json`.
    pub output_prefix: &'a str,
}

/// Result of a scheduling pass.
#[derive(Debug, Clone)]
pub struct Schedule {
    /// All `K` partitions in index order, including empty ones.
    pub partitions: Vec<Partition>,

    /// Files written, one per partition, in the same order.
    pub files: Vec<PathBuf>,

    /// Keys without a runtime estimate, sorted and deduplicated.
    pub new_tasks: Vec<TaskKey>,
}

/// Partitions test files across a fixed number of workers.
#[derive(Debug, Clone)]
pub struct Scheduler {
    workers: usize,
    config: ScheduleConfig,
}

impl Scheduler {
    /// Creates a scheduler producing `workers` partitions.
    ///
    /// # Errors
    ///
    /// [`ScheduleError::InvalidWorkerCount`] if `workers` is zero.
    pub fn new(workers: usize, config: ScheduleConfig) -> Result<Self, ScheduleError> {
        if workers == 0 {
            return Err(ScheduleError::InvalidWorkerCount(workers));
        }
        Ok(Self { workers, config })
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    pub fn config(&self) -> &ScheduleConfig {
        &self.config
    }

    /// Runs the whole pipeline and writes the partition files.
    pub fn schedule(&self, request: &ScheduleRequest<'_>) -> Result<Schedule, ScheduleError> {
        let suites = read_suites(request.suites)?;

        let estimates = match request.estimates {
            Some(path) => RuntimeEstimates::load(path)?,
            None => RuntimeEstimates::default(),
        };

        let tasks = self.build_tasks(request.root, &suites, &estimates)?;
        let new_tasks = collect_new(&tasks);
        info!(
            "Scheduling {} test files ({} without runtime data) into {} partitions",
            tasks.len(),
            new_tasks.len(),
            self.workers
        );

        let partitions = self.partition(tasks);
        let files = write_partitions(&partitions, request.output_prefix)?;

        Ok(Schedule {
            partitions,
            files,
            new_tasks,
        })
    }

    /// Expands every suite and attaches runtime estimates.
    ///
    /// Tasks keep suite order, then spec order, then expansion order.
    pub fn build_tasks(
        &self,
        root: &Path,
        suites: &[SuiteDefinition],
        estimates: &RuntimeEstimates,
    ) -> Result<Vec<TestTask>, ScheduleError> {
        let mut tasks = Vec::new();

        for suite in suites {
            for spec in &suite.specs {
                for filename in expand::expand_spec(root, spec, &self.config.spec_pattern)? {
                    let mut task = TestTask::from_suite(suite, filename);
                    if let Some(duration) = estimates.get(&task.key()) {
                        task.duration = duration;
                        task.unseen = false;
                    }
                    tasks.push(task);
                }
            }
            debug!("Suite {}: {} specs expanded", suite.name, suite.specs.len());
        }

        Ok(tasks)
    }

    /// Greedily partitions tasks into this scheduler's worker count.
    pub fn partition(&self, tasks: Vec<TestTask>) -> Vec<Partition> {
        partition::partition(tasks, self.workers, self.config.unseen_weight)
    }
}

/// Reads the JSON array of suite definitions.
pub fn read_suites(path: &Path) -> Result<Vec<SuiteDefinition>, ScheduleError> {
    let content =
        std::fs::read_to_string(path).map_err(|source| ScheduleError::SuiteDefinitions {
            path: path.to_path_buf(),
            source,
        })?;

    serde_json::from_str(&content).map_err(|source| ScheduleError::Json {
        path: path.to_path_buf(),
        source,
    })
}

/// Path of partition `number` (one-based) for `prefix`.
pub fn partition_path(prefix: &str, number: usize) -> PathBuf {
    PathBuf::from(format!("{prefix}{number}.json"))
}

fn collect_new(tasks: &[TestTask]) -> Vec<TaskKey> {
    tasks
        .iter()
        .filter(|t| t.unseen)
        .map(TestTask::key)
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

/// Writes all partition files, or none of them.
fn write_partitions(partitions: &[Partition], prefix: &str) -> Result<Vec<PathBuf>, ScheduleError> {
    let mut written: Vec<PathBuf> = Vec::with_capacity(partitions.len());

    for partition in partitions {
        let path = partition_path(prefix, partition.number());
        if let Err(e) = task::write_tasks(&path, &partition.tasks) {
            for file in &written {
                if let Err(cleanup) = std::fs::remove_file(file) {
                    warn!("Failed to remove {}: {}", file.display(), cleanup);
                }
            }
            return Err(e.into());
        }
        debug!(
            "Wrote {} tasks to {}",
            partition.tasks.len(),
            path.display()
        );
        written.push(path);
    }

    Ok(written)
}
