//! Failure-file hand-off between runner invocations.
//!
//! A runner that sees failures writes the failed task records, unchanged, to
//! its failure file. When CI restarts the worker, the next
//! invocation finds the file and runs only those tasks. A fully successful
//! retry consumes the file.

use std::path::{Path, PathBuf};

use tracing::{debug, info};

use super::RunnerError;
use crate::task::{self, TestTask};

/// Location of a worker's failure file.
#[derive(Debug, Clone)]
pub struct FailureFile {
    path: PathBuf,
}

impl FailureFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Tasks left by a previous invocation.
    ///
    /// `None` when the file is absent or holds no tasks.
    pub fn load(&self) -> Result<Option<Vec<TestTask>>, RunnerError> {
        if !self.path.exists() {
            return Ok(None);
        }

        let tasks = task::read_tasks(&self.path).map_err(RunnerError::FailureList)?;
        if tasks.is_empty() {
            debug!("Failure file {} is empty", self.path.display());
            return Ok(None);
        }
        Ok(Some(tasks))
    }

    /// Replaces the file with the given records.
    pub fn store(&self, failed: &[TestTask]) -> Result<(), RunnerError> {
        task::write_tasks(&self.path, failed).map_err(RunnerError::FailureList)?;
        info!(
            "Wrote {} failed test files to {}",
            failed.len(),
            self.path.display()
        );
        Ok(())
    }

    /// Removes the file if it exists.
    pub fn clear(&self) -> Result<(), RunnerError> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => {
                debug!("Removed consumed failure file {}", self.path.display());
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(RunnerError::Io {
                path: self.path.clone(),
                source,
            }),
        }
    }
}

/// Picks the task list for this invocation.
///
/// A non-empty failure file takes precedence over the primary list. Returns
/// the tasks and whether they came from the failure file.
pub fn select_tasks(
    primary: &Path,
    failures: Option<&FailureFile>,
) -> Result<(Vec<TestTask>, bool), RunnerError> {
    if let Some(failures) = failures
        && let Some(tasks) = failures.load()?
    {
        info!(
            "Rerunning {} failed tests from {}",
            tasks.len(),
            failures.path().display()
        );
        return Ok((tasks, true));
    }

    info!("Running tests from {}", primary.display());
    let tasks = task::read_tasks(primary).map_err(RunnerError::TaskList)?;
    Ok((tasks, false))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::SuiteDefinition;

    fn tasks(names: &[&str]) -> Vec<TestTask> {
        let suite = SuiteDefinition {
            name: "unit".to_string(),
            specs: Vec::new(),
            exclude_tags: None,
            environment: None,
            venv_script: None,
        };
        names
            .iter()
            .map(|name| TestTask::from_suite(&suite, *name))
            .collect()
    }

    #[test]
    fn test_missing_failure_file_selects_primary() {
        let dir = tempfile::tempdir().unwrap();
        let primary = dir.path().join("chunk.1.json");
        task::write_tasks(&primary, &tasks(&["a", "b"])).unwrap();

        let failures = FailureFile::new(dir.path().join("failed.json"));
        let (selected, retry) = select_tasks(&primary, Some(&failures)).unwrap();

        assert!(!retry);
        assert_eq!(selected.len(), 2);
    }

    #[test]
    fn test_empty_failure_file_selects_primary() {
        let dir = tempfile::tempdir().unwrap();
        let primary = dir.path().join("chunk.1.json");
        task::write_tasks(&primary, &tasks(&["a"])).unwrap();

        let failures = FailureFile::new(dir.path().join("failed.json"));
        std::fs::write(failures.path(), "\n").unwrap();

        let (_, retry) = select_tasks(&primary, Some(&failures)).unwrap();
        assert!(!retry);
    }

    #[test]
    fn test_failure_file_takes_precedence_and_keeps_order() {
        let dir = tempfile::tempdir().unwrap();
        let primary = dir.path().join("chunk.1.json");
        task::write_tasks(&primary, &tasks(&["a", "b", "c"])).unwrap();

        let failures = FailureFile::new(dir.path().join("failed.json"));
        failures.store(&tasks(&["c", "a"])).unwrap();

        let (selected, retry) = select_tasks(&primary, Some(&failures)).unwrap();
        assert!(retry);
        let names: Vec<&str> = selected.iter().map(|t| t.filename.as_str()).collect();
        assert_eq!(names, vec!["c", "a"]);
    }

    #[test]
    fn test_missing_primary_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = select_tasks(&dir.path().join("nope.json"), None).unwrap_err();
        assert!(matches!(err, RunnerError::TaskList(_)));
    }

    #[test]
    fn test_corrupt_failure_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let failures = FailureFile::new(dir.path().join("failed.json"));
        std::fs::write(failures.path(), "{oops\n").unwrap();

        assert!(matches!(
            failures.load(),
            Err(RunnerError::FailureList(_))
        ));
    }

    #[test]
    fn test_clear_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let failures = FailureFile::new(dir.path().join("failed.json"));
        failures.store(&tasks(&["a"])).unwrap();

        failures.clear().unwrap();
        failures.clear().unwrap();
        assert!(!failures.path().exists());
    }
}
