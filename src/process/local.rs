//! Runs commands as local child processes through a shell.
//!
//! Each command is rendered with [`Command::to_shell_string`] and executed as
//! `{shell} -c "<command line>"`, inheriting the current environment with the
//! command's overlay applied on top. Standard output and standard error are
//! merged line by line as they arrive; the exit code follows once both pipes
//! have closed and the child has been reaped.

use std::path::PathBuf;
use std::process::Stdio;

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_stream::wrappers::LinesStream;
use tracing::{debug, warn};

use super::{Command, OutputLine, OutputStream, ProcessError, ProcessResult, ProcessRunner};

/// [`ProcessRunner`] backed by `tokio::process`.
#[derive(Debug, Clone)]
pub struct LocalProcess {
    shell: String,
    working_dir: Option<PathBuf>,
}

impl LocalProcess {
    /// Creates a runner using `shell` to interpret command lines.
    ///
    /// `working_dir` applies to commands that do not set their own.
    pub fn new(shell: impl Into<String>, working_dir: Option<PathBuf>) -> Self {
        Self {
            shell: shell.into(),
            working_dir,
        }
    }
}

impl Default for LocalProcess {
    fn default() -> Self {
        Self::new("/bin/sh", None)
    }
}

#[async_trait]
impl ProcessRunner for LocalProcess {
    async fn exec_stream(&self, cmd: &Command) -> ProcessResult<OutputStream> {
        let shell_cmd = cmd.to_shell_string();
        debug!("{} -c {}", self.shell, shell_cmd);

        let mut process = tokio::process::Command::new(&self.shell);
        process.arg("-c").arg(&shell_cmd);

        if let Some(dir) = cmd.working_dir.as_ref().or(self.working_dir.as_ref()) {
            process.current_dir(dir);
        }
        for (key, value) in &cmd.env {
            process.env(key, value);
        }

        process.stdin(Stdio::null());
        process.stdout(Stdio::piped());
        process.stderr(Stdio::piped());

        let mut child = process
            .spawn()
            .map_err(|e| ProcessError::SpawnFailed(format!("{}: {}", self.shell, e)))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| ProcessError::SpawnFailed("stdout not captured".to_string()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| ProcessError::SpawnFailed("stderr not captured".to_string()))?;

        let stdout_stream = LinesStream::new(BufReader::new(stdout).lines())
            .map(|line: std::io::Result<String>| OutputLine::Stdout(line.unwrap_or_default()));
        let stderr_stream = LinesStream::new(BufReader::new(stderr).lines())
            .map(|line: std::io::Result<String>| OutputLine::Stderr(line.unwrap_or_default()));

        let exit = stream::once(async move {
            let code = match child.wait().await {
                Ok(status) => status.code().unwrap_or(-1),
                Err(e) => {
                    warn!("Failed to wait for child process: {}", e);
                    -1
                }
            };
            OutputLine::ExitCode(code)
        });

        let combined = stream::select(stdout_stream, stderr_stream).chain(exit);

        Ok(Box::pin(combined))
    }
}
