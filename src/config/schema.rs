//! Configuration schema definitions.
//!
//! All types deserialize from TOML and every field has a default, so an
//! empty file (or no file at all) yields a usable configuration.
//!
//! # Schema Overview
//!
//! ```text
//! Config (root)
//! ├── ScheduleConfig   - Spec expansion and partitioning parameters
//! └── RunnerConfig     - Test command, event channel and reporting settings
//! ```

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Root configuration structure.
///
/// # TOML Structure
///
/// ```toml
/// [schedule]
/// spec_pattern = "**/*_spec.lua"
/// unseen_weight = 0.1
///
/// [runner]
/// command = "bin/busted --helper=spec/busted-ci-helper.lua -o hjtest"
/// deviation_threshold_secs = 10
///
/// [runner.env]
/// KONG_TEST_DONT_CLEAN = "1"
/// ```
///
/// # Example
///
/// ```
/// use test_scheduler::config::Config;
///
/// let config: Config = toml::from_str(r#"
///     [schedule]
///     unseen_weight = 0.5
/// "#).unwrap();
/// assert_eq!(config.schedule.unseen_weight, 0.5);
/// assert_eq!(config.runner.shell, "/bin/sh");
/// ```
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    /// Scheduler settings.
    #[serde(default)]
    pub schedule: ScheduleConfig,

    /// Runner settings.
    #[serde(default)]
    pub runner: RunnerConfig,
}

/// Settings for expanding suites and partitioning tasks.
///
/// # Defaults
///
/// | Field | Default |
/// |-------|---------|
/// | `spec_pattern` | `**/*_spec.lua` |
/// | `unseen_weight` | `0.1` |
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ScheduleConfig {
    /// Glob, relative to a directory spec, selecting the test files inside it.
    #[serde(default = "default_spec_pattern")]
    pub spec_pattern: String,

    /// Nominal weight, in seconds, a never-measured task adds to its
    /// partition's accumulated estimate.
    ///
    /// Must be positive; a zero weight would let every unseen task land on
    /// the same partition.
    #[serde(default = "default_unseen_weight")]
    pub unseen_weight: f64,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            spec_pattern: default_spec_pattern(),
            unseen_weight: default_unseen_weight(),
        }
    }
}

fn default_spec_pattern() -> String {
    "**/*_spec.lua".to_string()
}

fn default_unseen_weight() -> f64 {
    0.1
}

/// Settings for executing a partition.
///
/// The command line for one test file is assembled as
///
/// ```text
/// [. {build_root}/{venv_script} ;] {command} {output_flag} {output_dir}/{uuid}.xml \
///     [{exclude_tags_flag}={exclude_tags}] {filename}
/// ```
///
/// and run through `{shell} -c`.
///
/// # Defaults
///
/// | Field | Default |
/// |-------|---------|
/// | `shell` | `/bin/sh` |
/// | `command` | `bin/busted --helper=spec/busted-ci-helper.lua -o hjtest` |
/// | `output_flag` | `--Xoutput` |
/// | `exclude_tags_flag` | `--exclude-tags` |
/// | `event_path_env` | `BUSTED_EVENT_PATH` |
/// | `deviation_threshold_secs` | `10` |
/// | `event_drain_timeout_ms` | `2000` |
/// | `working_dir` | None (current directory) |
/// | `build_root` | None (no environment script is sourced) |
/// | `output_dir` | None (system temp directory) |
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RunnerConfig {
    /// Shell used to run each test command.
    #[serde(default = "default_shell")]
    pub shell: String,

    /// Test command and its fixed arguments, split with shell-word rules.
    #[serde(default = "default_command")]
    pub command: String,

    /// Flag introducing the per-file output artifact path.
    #[serde(default = "default_output_flag")]
    pub output_flag: String,

    /// Flag carrying a suite's exclude tags.
    #[serde(default = "default_exclude_tags_flag")]
    pub exclude_tags_flag: String,

    /// Environment variable through which the child learns the event socket.
    #[serde(default = "default_event_path_env")]
    pub event_path_env: String,

    /// Files whose actual duration differs from the estimate by more than
    /// this many seconds are listed in the deviation report.
    #[serde(default = "default_deviation_threshold")]
    pub deviation_threshold_secs: f64,

    /// How long to wait, after a child exits, for its event connections to
    /// deliver buffered events before the channel is released anyway.
    #[serde(default = "default_event_drain_timeout")]
    pub event_drain_timeout_ms: u64,

    /// Directory the test commands run in.
    pub working_dir: Option<PathBuf>,

    /// Root that suite `venv_script` paths are relative to.
    pub build_root: Option<PathBuf>,

    /// Directory receiving the per-file output artifacts.
    pub output_dir: Option<PathBuf>,

    /// Environment variables set for every test command.
    ///
    /// Applied after the inherited environment and before suite-specific
    /// variables, which take precedence.
    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            shell: default_shell(),
            command: default_command(),
            output_flag: default_output_flag(),
            exclude_tags_flag: default_exclude_tags_flag(),
            event_path_env: default_event_path_env(),
            deviation_threshold_secs: default_deviation_threshold(),
            event_drain_timeout_ms: default_event_drain_timeout(),
            working_dir: None,
            build_root: None,
            output_dir: None,
            env: BTreeMap::new(),
        }
    }
}

impl RunnerConfig {
    /// Splits [`command`](Self::command) into program and arguments.
    ///
    /// Falls back to treating the whole string as the program when it is not
    /// valid shell syntax.
    pub fn command_parts(&self) -> Vec<String> {
        shell_words::split(&self.command).unwrap_or_else(|_| vec![self.command.clone()])
    }

    /// Expands `~` and environment variables in the configured paths.
    pub fn expand_paths(&mut self) {
        for path in [
            &mut self.working_dir,
            &mut self.build_root,
            &mut self.output_dir,
        ]
        .into_iter()
        .flatten()
        {
            *path = expand_path(path);
        }
    }
}

fn expand_path(path: &Path) -> PathBuf {
    let raw = path.to_string_lossy();
    match shellexpand::full(&raw) {
        Ok(expanded) => PathBuf::from(expanded.into_owned()),
        Err(_) => path.to_path_buf(),
    }
}

fn default_shell() -> String {
    "/bin/sh".to_string()
}

fn default_command() -> String {
    "bin/busted --helper=spec/busted-ci-helper.lua -o hjtest".to_string()
}

fn default_output_flag() -> String {
    "--Xoutput".to_string()
}

fn default_exclude_tags_flag() -> String {
    "--exclude-tags".to_string()
}

fn default_event_path_env() -> String {
    "BUSTED_EVENT_PATH".to_string()
}

fn default_deviation_threshold() -> f64 {
    10.0
}

fn default_event_drain_timeout() -> u64 {
    2000
}
