//! test-scheduler: runtime-aware partitioning and execution of test files.
//!
//! The crate closes a feedback loop across CI runs:
//!
//! ```text
//! duration logs ──► combine-statistics ──► runtimes.json
//!                                               │
//! suites.json ─────────────────────────► schedule ──► chunk.1.json … chunk.K.json
//!                                                          │
//!                         K workers, one partition each ◄──┘
//!                         runner ──► duration log (+ failed.json for retries)
//! ```
//!
//! # Architecture
//!
//! - **[`statistics`]**: folds raw duration samples into one median estimate
//!   per `(suite, filename)`.
//! - **[`scheduler`]**: expands suite definitions into test files and
//!   partitions them greedily, longest first, across `K` workers.
//! - **[`runner`]**: runs one partition sequentially, classifies each file
//!   through a structured event channel, records fresh samples and hands
//!   failures to the next invocation.
//! - **[`process`]**: how child processes are started and streamed.
//! - **[`task`]** and **[`jsonl`]**: the persisted records and their
//!   newline-delimited JSON encoding.
//! - **[`config`]** and **[`report`]**: TOML configuration and console output.
//!
//! # Example
//!
//! ```no_run
//! use std::path::Path;
//! use test_scheduler::config::load_config;
//! use test_scheduler::process::local::LocalProcess;
//! use test_scheduler::runner::Runner;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = load_config(Path::new("test-scheduler.toml"))?;
//!     let process = LocalProcess::new(&config.runner.shell, config.runner.working_dir.clone());
//!
//!     let summary = Runner::new(&process, &config.runner)
//!         .with_failure_file("failed.json")
//!         .with_duration_log("durations.log")
//!         .run(Path::new("chunk.1.json"))
//!         .await?;
//!     std::process::exit(summary.exit_code());
//! }
//! ```

pub mod config;
pub mod jsonl;
pub mod process;
pub mod report;
pub mod runner;
pub mod scheduler;
pub mod statistics;
pub mod task;

// Re-export commonly used types
pub use config::{Config, load_config};
pub use runner::{ExecutionResult, RunSummary, Runner};
pub use scheduler::{Schedule, ScheduleRequest, Scheduler};
pub use statistics::{RuntimeEstimate, StatisticsCombiner, combine_statistics};
pub use task::{SuiteDefinition, TaskKey, TestTask};
