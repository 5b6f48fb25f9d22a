//! test-scheduler CLI - Runtime-aware test partitioning and execution.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use test_scheduler::config::{self, Config};
use test_scheduler::process::OutputLine;
use test_scheduler::process::local::LocalProcess;
use test_scheduler::report;
use test_scheduler::runner::{OutputCallback, Runner};
use test_scheduler::scheduler::{ScheduleRequest, Scheduler};
use test_scheduler::statistics;

#[derive(Parser)]
#[command(name = "test-scheduler")]
#[command(about = "Runtime-aware test partitioning and execution", long_about = None)]
#[command(version)]
struct Cli {
    /// Configuration file path (default: ./test-scheduler.toml when present)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Partition the test files of a suite definition across workers
    Schedule {
        /// JSON file with the suite definitions
        #[arg(long)]
        suites: PathBuf,

        /// Runtime estimates produced by combine-statistics (required unless --static)
        #[arg(long, required_unless_present = "static_mode")]
        estimates: Option<PathBuf>,

        /// Ignore runtime estimates and treat every file as new
        #[arg(long = "static")]
        static_mode: bool,

        /// Number of partitions to produce
        #[arg(short, long)]
        workers: usize,

        /// Partition N is written to <PREFIX>N.json
        #[arg(short, long)]
        output_prefix: String,

        /// Directory the suite specs are relative to
        #[arg(long, default_value = ".")]
        root: PathBuf,
    },

    /// Combine raw duration logs into runtime estimates
    CombineStatistics {
        /// Directory holding one raw duration log per file
        #[arg(short, long)]
        input: PathBuf,

        /// Runtime-estimate file to write
        #[arg(short, long)]
        output: PathBuf,
    },

    /// Run the test files of one partition
    Runner {
        /// Partition file produced by schedule
        #[arg(long)]
        tasks: PathBuf,

        /// Failure file; rerun from when present, written when tests fail
        #[arg(long)]
        failures: Option<PathBuf>,

        /// File receiving one duration sample per executed test file
        #[arg(long)]
        durations: Option<PathBuf>,

        /// Directory for per-file output artifacts
        #[arg(long)]
        output_dir: Option<PathBuf>,

        /// Root that suite environment scripts are relative to
        #[arg(long)]
        build_root: Option<PathBuf>,

        /// Directory to run the test command in
        #[arg(long)]
        working_dir: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Set up logging
    let default_level = if cli.verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let config = config::resolve_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Schedule {
            suites,
            estimates,
            static_mode,
            workers,
            output_prefix,
            root,
        } => schedule(
            &config,
            &suites,
            estimates.as_deref(),
            static_mode,
            workers,
            &output_prefix,
            &root,
        ),
        Commands::CombineStatistics { input, output } => combine(&input, &output),
        Commands::Runner {
            tasks,
            failures,
            durations,
            output_dir,
            build_root,
            working_dir,
        } => {
            let mut config = config;
            let runner_config = &mut config.runner;
            runner_config.output_dir = output_dir.or(runner_config.output_dir.take());
            runner_config.build_root = build_root.or(runner_config.build_root.take());
            runner_config.working_dir = working_dir.or(runner_config.working_dir.take());

            let exit_code = run(&config, &tasks, failures, durations).await?;
            std::process::exit(exit_code);
        }
    }
}

fn schedule(
    config: &Config,
    suites: &Path,
    estimates: Option<&Path>,
    static_mode: bool,
    workers: usize,
    output_prefix: &str,
    root: &Path,
) -> Result<()> {
    let estimates = if static_mode {
        warn!("Static mode: ignoring runtime estimates, every test file is scheduled as new");
        None
    } else {
        estimates
    };

    let scheduler = Scheduler::new(workers, config.schedule.clone())?;
    let schedule = scheduler
        .schedule(&ScheduleRequest {
            suites,
            estimates,
            root,
            output_prefix,
        })
        .with_context(|| format!("Failed to schedule {}", suites.display()))?;

    report::print_schedule(&schedule, scheduler.config().unseen_weight);
    info!(
        "Wrote {} partition files with prefix {}",
        scheduler.workers(),
        output_prefix
    );
    Ok(())
}

fn combine(input: &Path, output: &Path) -> Result<()> {
    let summary = statistics::combine_statistics(input, output)
        .with_context(|| format!("Failed to combine statistics from {}", input.display()))?;

    println!(
        "Wrote {} runtime estimates to {}",
        console::style(summary.estimates).green(),
        output.display()
    );
    Ok(())
}

async fn run(
    config: &Config,
    tasks: &Path,
    failures: Option<PathBuf>,
    durations: Option<PathBuf>,
) -> Result<i32> {
    let process = LocalProcess::new(&config.runner.shell, config.runner.working_dir.clone());

    let echo: OutputCallback = Arc::new(|_filename, line| match line {
        OutputLine::Stdout(s) => println!("{}", s),
        OutputLine::Stderr(s) => eprintln!("{}", s),
        OutputLine::ExitCode(_) => {}
    });

    let mut runner = Runner::new(&process, &config.runner).with_output_callback(echo);
    if let Some(path) = failures {
        runner = runner.with_failure_file(path);
    }
    if let Some(path) = durations {
        runner = runner.with_duration_log(path);
    }

    let summary = runner
        .run(tasks)
        .await
        .with_context(|| format!("Failed to run {}", tasks.display()))?;

    if summary.retried {
        info!(
            "Retry pass: {} of {} previously failed test files still fail",
            summary.failed_tasks().len(),
            summary.results.len()
        );
    }
    report::print_run_summary(&summary, config.runner.deviation_threshold_secs);
    Ok(summary.exit_code())
}
