//! Sequential execution of one partition.
//!
//! The [`Runner`] executes a task file one test file at a time. Around each
//! child process it holds an [`EventChannel`](events::EventChannel) that the
//! test framework reports to; the events, not just the exit status, decide
//! whether a file passed.
//!
//! # Per-task lifecycle
//!
//! ```text
//! open channel ─► spawn child ─► stream output ─┬─► child exits ─► close channel
//!                                               │
//!                  events: failure ─► mark failed (sticky)
//!                          file:end ─► append duration sample,
//!                                      record estimated vs actual
//! ```
//!
//! A task fails when its exit status is non-zero, a failure event was seen,
//! or the process could not be started at all. Failures never stop the loop.
//!
//! # After the loop
//!
//! Failed task records are written to the failure file so the next invocation
//! retries exactly those; a clean run removes a consumed failure file.

pub mod analysis;
pub mod events;
pub mod retry;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::RunnerConfig;
use crate::jsonl;
use crate::process::{Command, OutputLine, ProcessRunner};
use crate::statistics::DurationSample;
use crate::task::{TaskFileError, TestTask};

use analysis::RuntimeAnalysis;
use events::{EventChannel, EventKind, LifecycleEvent};
use retry::FailureFile;

/// Errors that abort a runner invocation.
///
/// Problems with individual tasks are not errors; they produce failed
/// [`ExecutionResult`]s.
#[derive(Debug, thiserror::Error)]
pub enum RunnerError {
    #[error("Failed to load task list: {0}")]
    TaskList(#[source] TaskFileError),

    #[error("Failed to access failure file: {0}")]
    FailureList(#[source] TaskFileError),

    #[error("IO error on {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Callback for streaming test output.
///
/// Called for each line of output with the filename of the running task.
pub type OutputCallback = Arc<dyn Fn(&str, &OutputLine) + Send + Sync>;

/// Outcome of one task.
#[derive(Debug, Clone)]
pub struct ExecutionResult {
    /// The task as it was read.
    pub task: TestTask,

    pub passed: bool,

    /// `None` when the process never ran.
    pub exit_status: Option<i32>,

    /// Duration reported by the test framework, in seconds.
    pub actual_duration: Option<f64>,

    /// Combined stdout and stderr.
    pub output: String,
}

impl ExecutionResult {
    fn not_run(task: &TestTask) -> Self {
        Self {
            task: task.clone(),
            passed: false,
            exit_status: None,
            actual_duration: None,
            output: String::new(),
        }
    }
}

/// Result of a runner invocation.
#[derive(Debug, Clone, Default)]
pub struct RunSummary {
    /// One result per task, in execution order.
    pub results: Vec<ExecutionResult>,

    pub analysis: RuntimeAnalysis,

    /// Whether the tasks came from the failure file.
    pub retried: bool,
}

impl RunSummary {
    pub fn failed_tasks(&self) -> Vec<&TestTask> {
        self.results
            .iter()
            .filter(|r| !r.passed)
            .map(|r| &r.task)
            .collect()
    }

    pub fn success(&self) -> bool {
        self.results.iter().all(|r| r.passed)
    }

    /// Process exit code for the CLI: `0` when every task passed, `1` otherwise.
    pub fn exit_code(&self) -> i32 {
        if self.success() { 0 } else { 1 }
    }
}

/// Per-task state fed by lifecycle events.
#[derive(Debug, Default)]
struct TaskState {
    failed: bool,
    actual: Option<f64>,
}

/// Executes a partition's tasks one after another.
///
/// # Type Parameters
///
/// - `P`: how processes are started (implements [`ProcessRunner`])
pub struct Runner<'a, P> {
    process: &'a P,
    config: &'a RunnerConfig,
    duration_log: Option<PathBuf>,
    failure_file: Option<FailureFile>,
    output_callback: Option<OutputCallback>,
}

impl<'a, P: ProcessRunner> Runner<'a, P> {
    pub fn new(process: &'a P, config: &'a RunnerConfig) -> Self {
        Self {
            process,
            config,
            duration_log: None,
            failure_file: None,
            output_callback: None,
        }
    }

    /// Appends a [`DurationSample`] to `path` for every completed file.
    pub fn with_duration_log(mut self, path: impl Into<PathBuf>) -> Self {
        self.duration_log = Some(path.into());
        self
    }

    /// Reads retries from, and writes failures to, `path`.
    pub fn with_failure_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.failure_file = Some(FailureFile::new(path));
        self
    }

    /// Sets a callback receiving every output line as it arrives.
    pub fn with_output_callback(mut self, callback: OutputCallback) -> Self {
        self.output_callback = Some(callback);
        self
    }

    /// Runs every task of `tasks_file`, or of the failure file when it holds
    /// tasks from an earlier invocation.
    ///
    /// # Errors
    ///
    /// Only for problems with the task or failure files. Task failures are
    /// reported in the returned summary.
    pub async fn run(&self, tasks_file: &Path) -> Result<RunSummary, RunnerError> {
        let (tasks, retried) = retry::select_tasks(tasks_file, self.failure_file.as_ref())?;
        info!("Running {} test files", tasks.len());

        let mut summary = RunSummary {
            retried,
            ..Default::default()
        };

        for (i, task) in tasks.iter().enumerate() {
            info!("Running file #{} of {}: {}", i + 1, tasks.len(), task.key());
            let result = self.run_task(task, &mut summary.analysis).await;
            if !result.passed {
                warn!(
                    "{} failed (exit status: {})",
                    task.key(),
                    result
                        .exit_status
                        .map_or_else(|| "not run".to_string(), |code| code.to_string())
                );
            }
            summary.results.push(result);
        }

        if let Some(failures) = &self.failure_file {
            let failed: Vec<TestTask> = summary.failed_tasks().into_iter().cloned().collect();
            if failed.is_empty() {
                failures.clear()?;
            } else {
                failures.store(&failed)?;
            }
        }

        Ok(summary)
    }

    /// Runs one task. Never fails; problems become a failed result.
    async fn run_task(&self, task: &TestTask, analysis: &mut RuntimeAnalysis) -> ExecutionResult {
        let drain = Duration::from_millis(self.config.event_drain_timeout_ms);
        let mut channel = match EventChannel::open(drain) {
            Ok(channel) => channel,
            Err(e) => {
                error!("Failed to open event channel for {}: {}", task.key(), e);
                return ExecutionResult::not_run(task);
            }
        };

        let cmd = self.build_command(task, channel.path());
        debug!("Running {}", cmd.to_shell_string());

        let mut stream = match self.process.exec_stream(&cmd).await {
            Ok(stream) => stream,
            Err(e) => {
                error!("Failed to run {}: {}", task.key(), e);
                return ExecutionResult::not_run(task);
            }
        };

        let mut state = TaskState::default();
        let mut output = String::new();
        let mut exit_status = None;

        loop {
            tokio::select! {
                line = stream.next() => match line {
                    Some(line) => {
                        if let Some(callback) = &self.output_callback {
                            callback(&task.filename, &line);
                        }
                        match line {
                            OutputLine::Stdout(s) | OutputLine::Stderr(s) => {
                                output.push_str(&s);
                                output.push('\n');
                            }
                            OutputLine::ExitCode(code) => exit_status = Some(code),
                        }
                    }
                    None => break,
                },
                Some(event) = channel.recv() => {
                    self.handle_event(task, &event, &mut state, analysis);
                }
            }
        }

        for event in channel.close().await {
            self.handle_event(task, &event, &mut state, analysis);
        }

        ExecutionResult {
            task: task.clone(),
            passed: exit_status == Some(0) && !state.failed,
            exit_status,
            actual_duration: state.actual,
            output,
        }
    }

    fn handle_event(
        &self,
        task: &TestTask,
        event: &LifecycleEvent,
        state: &mut TaskState,
        analysis: &mut RuntimeAnalysis,
    ) {
        match event.kind() {
            EventKind::Failure => {
                debug!("{} reported {}", task.key(), event.event);
                state.failed = true;
            }
            EventKind::FileEnd {
                duration: Some(duration),
            } => {
                state.actual = Some(duration);
                analysis.record(task.key(), task.duration, duration);
                self.append_sample(task, duration);
            }
            EventKind::FileEnd { duration: None } => {
                warn!("{} finished without a duration", task.key());
            }
            EventKind::Other => {}
        }
    }

    fn append_sample(&self, task: &TestTask, duration: f64) {
        let Some(path) = &self.duration_log else {
            return;
        };

        let sample = DurationSample {
            suite: task.suite.clone(),
            filename: task.filename.clone(),
            duration,
        };
        if let Err(e) = jsonl::append_record(path, &sample) {
            warn!("Failed to append duration to {}: {}", path.display(), e);
        }
    }

    /// Builds the command line for one task.
    ///
    /// ```text
    /// [. {build_root}/{venv_script} ;] {command} {output_flag} {output_dir}/{uuid}.xml
    ///     [{exclude_tags_flag}={exclude_tags}] {filename}
    /// ```
    pub fn build_command(&self, task: &TestTask, event_path: &Path) -> Command {
        let mut words = self.config.command_parts().into_iter();
        let program = words.next().unwrap_or_default();

        let output_dir = self
            .config
            .output_dir
            .clone()
            .unwrap_or_else(std::env::temp_dir);
        let artifact = output_dir.join(format!("{}.xml", Uuid::new_v4()));

        let mut cmd = Command::new(program)
            .args(words)
            .arg(&self.config.output_flag)
            .arg(artifact.to_string_lossy());

        if let Some(tags) = &task.exclude_tags {
            cmd = cmd.arg(format!("{}={}", self.config.exclude_tags_flag, tags));
        }
        cmd = cmd.arg(&task.filename);

        if let (Some(root), Some(script)) = (&self.config.build_root, &task.venv_script) {
            cmd = cmd.prelude(root.join(script).to_string_lossy());
        }
        if let Some(dir) = &self.config.working_dir {
            cmd = cmd.working_dir(dir);
        }

        cmd.envs(&self.config.env)
            .envs(task.environment.iter().flatten())
            .env(
                &self.config.event_path_env,
                event_path.to_string_lossy(),
            )
    }
}
