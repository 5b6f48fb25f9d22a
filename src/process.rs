//! Process execution for test commands.
//!
//! The runner never spawns children directly. It builds a [`Command`] and
//! hands it to a [`ProcessRunner`], which streams the child's output back as
//! [`OutputLine`]s. [`local::LocalProcess`] is the implementation used by the
//! CLI; tests substitute scripted runners that emit canned output and events.
//!
//! ```text
//! Runner ── Command ──► ProcessRunner::exec_stream ──► OutputStream
//!                                                      ├─ Stdout / Stderr lines
//!                                                      └─ ExitCode (always last)
//! ```

pub mod local;

use std::path::PathBuf;
use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;

/// Result type for process operations.
pub type ProcessResult<T> = Result<T, ProcessError>;

/// Errors that prevent a command from running at all.
///
/// A command that runs and exits non-zero is not an error; its exit code is
/// reported through [`OutputLine::ExitCode`].
#[derive(Debug, thiserror::Error)]
pub enum ProcessError {
    /// The child process could not be started.
    #[error("Failed to spawn command: {0}")]
    SpawnFailed(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// A command to execute.
///
/// # Example
///
/// ```
/// use test_scheduler::process::Command;
///
/// let cmd = Command::new("bin/busted")
///     .args(["-o", "hjtest"])
///     .arg("spec/01-unit/my file_spec.lua")
///     .env("KONG_DATABASE", "off")
///     .prelude("/build/venv.sh");
///
/// assert_eq!(
///     cmd.to_shell_string(),
///     ". /build/venv.sh ; bin/busted -o hjtest 'spec/01-unit/my file_spec.lua'"
/// );
/// ```
#[derive(Debug, Clone, Default)]
pub struct Command {
    /// The program/executable to run.
    pub program: String,

    /// Arguments to pass to the program.
    pub args: Vec<String>,

    /// Working directory; the runner's current directory when `None`.
    pub working_dir: Option<PathBuf>,

    /// Environment overlay, applied in order on top of the inherited
    /// environment. Later entries win.
    pub env: Vec<(String, String)>,

    /// Script sourced by the shell before the program runs.
    pub prelude: Option<String>,
}

impl Command {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            ..Default::default()
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    /// Adds an environment variable. Can be called multiple times.
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    /// Adds several environment variables.
    pub fn envs<I, K, V>(mut self, vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.env
            .extend(vars.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }

    pub fn prelude(mut self, script: impl Into<String>) -> Self {
        self.prelude = Some(script.into());
        self
    }

    /// Looks up the effective value of an overlay variable.
    pub fn env_value(&self, key: &str) -> Option<&str> {
        self.env
            .iter()
            .rev()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Renders the command as a single shell command line.
    ///
    /// Every word is quoted as needed; the prelude, when present, is sourced
    /// with `.` and separated from the program by `;`.
    pub fn to_shell_string(&self) -> String {
        let mut line = String::new();
        if let Some(prelude) = &self.prelude {
            line.push_str(". ");
            line.push_str(&shell_escape(prelude));
            line.push_str(" ; ");
        }

        let words: Vec<String> = std::iter::once(&self.program)
            .chain(&self.args)
            .map(|word| shell_escape(word))
            .collect();
        line.push_str(&words.join(" "));
        line
    }
}

/// Quotes a word for `sh` unless it consists only of characters the shell
/// passes through literally.
pub fn shell_escape(s: &str) -> String {
    let plain = |c: char| c.is_ascii_alphanumeric() || "_-./=,:+@%".contains(c);
    if !s.is_empty() && s.chars().all(plain) {
        s.to_string()
    } else {
        format!("'{}'", s.replace('\'', "'\\''"))
    }
}

/// A single line of output from a running command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputLine {
    /// A line from standard output.
    Stdout(String),
    /// A line from standard error.
    Stderr(String),
    /// The exit code of the command (yielded last, after all output).
    ///
    /// `-1` when the process was terminated by a signal.
    ExitCode(i32),
}

/// A stream of output lines from a command.
pub type OutputStream = Pin<Box<dyn Stream<Item = OutputLine> + Send>>;

/// Something that can run a [`Command`] and stream its output.
#[async_trait]
pub trait ProcessRunner: Send + Sync {
    /// Starts the command and returns its output stream.
    ///
    /// The stream ends with exactly one [`OutputLine::ExitCode`].
    ///
    /// # Errors
    ///
    /// [`ProcessError::SpawnFailed`] when the command cannot be started.
    async fn exec_stream(&self, cmd: &Command) -> ProcessResult<OutputStream>;
}
