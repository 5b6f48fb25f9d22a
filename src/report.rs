//! Console reports for operators.
//!
//! Nothing here is consumed downstream; the formatting functions return
//! plain strings (styled when the terminal supports it) and the `print_*`
//! wrappers write them to stdout.

use std::fmt::Write as _;
use std::path::Path;

use console::style;

use crate::runner::RunSummary;
use crate::runner::analysis::RuntimeAnalysis;
use crate::scheduler::{Partition, Schedule};
use crate::task::{TaskKey, TestTask};

/// Formats seconds as `1h 2m 3s`, or `12.34s` below a minute.
pub fn format_seconds(seconds: f64) -> String {
    let sign = if seconds < 0.0 { "-" } else { "" };
    let abs = seconds.abs();
    if abs < 60.0 {
        return format!("{sign}{abs:.2}s");
    }

    let total = abs.round() as u64;
    let (hours, minutes, secs) = (total / 3600, (total % 3600) / 60, total % 60);
    if hours > 0 {
        format!("{sign}{hours}h {minutes}m {secs}s")
    } else {
        format!("{sign}{minutes}m {secs}s")
    }
}

/// Renders one partition: header with the expected total, then one row per task.
///
/// Unseen tasks show the nominal weight they were scheduled with.
pub fn format_partition(partition: &Partition, file: &Path, unseen_weight: f64) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "{} expected {} ({} files)",
        style(file.display()).bold(),
        format_seconds(partition.accumulated),
        partition.tasks.len()
    );

    let suite_width = partition
        .tasks
        .iter()
        .map(|t| t.suite.len())
        .max()
        .unwrap_or(0);
    let file_width = partition
        .tasks
        .iter()
        .map(|t| t.filename.len())
        .max()
        .unwrap_or(0);

    for task in &partition.tasks {
        let estimate = format!("{:.2}", task.weight(unseen_weight));
        let estimate = if task.unseen {
            style(format!("{estimate} (new)")).yellow().to_string()
        } else {
            estimate
        };
        let _ = writeln!(
            out,
            "  {:<suite_width$}  {:<file_width$}  {}",
            task.suite, task.filename, estimate
        );
    }
    out
}

/// Prints every partition of a schedule, then the new-test list.
pub fn print_schedule(schedule: &Schedule, unseen_weight: f64) {
    for (partition, file) in schedule.partitions.iter().zip(&schedule.files) {
        println!();
        print!("{}", format_partition(partition, file, unseen_weight));
    }

    if !schedule.new_tasks.is_empty() {
        println!();
        print!("{}", format_new_tests(&schedule.new_tasks));
    }
}

/// Lists test files without runtime data, one per line.
pub fn format_new_tests(keys: &[TaskKey]) -> String {
    let mut out = format!(
        "{}\n",
        style(format!("{} test files without runtime data:", keys.len())).yellow()
    );
    for key in keys {
        let _ = writeln!(out, "  {key}");
    }
    out
}

/// Estimated versus actual totals, then every file deviating by more than
/// `threshold` seconds.
pub fn format_runtime_analysis(analysis: &RuntimeAnalysis, threshold: f64) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "{}", style("Runtime analysis").bold());
    let _ = writeln!(
        out,
        "  Estimated total runtime: {}",
        format_seconds(analysis.estimated_total())
    );
    let _ = writeln!(
        out,
        "  Actual total runtime:    {}",
        format_seconds(analysis.actual_total())
    );
    let _ = writeln!(
        out,
        "  Total deviation:         {}",
        format_seconds(analysis.total_deviation())
    );

    let deviating = analysis.deviations(threshold);
    if !deviating.is_empty() {
        let _ = writeln!(out);
        let _ = writeln!(
            out,
            "{}",
            style(format!("Deviating test files (more than {threshold}s):")).yellow()
        );
        for record in deviating {
            let _ = writeln!(
                out,
                "  {}  estimated {}  actual {}  deviation {}",
                record.key,
                format_seconds(record.estimated),
                format_seconds(record.actual),
                format_seconds(record.deviation())
            );
        }
    }
    out
}

/// Failed files as `<TAB>suite<TAB>filename` lines under a count header.
pub fn format_failures(failed: &[&TestTask]) -> String {
    let mut out = format!(
        "{}\n\n",
        style(format!("{} test files failed:", failed.len())).red().bold()
    );
    for task in failed {
        let _ = writeln!(out, "\t{}\t{}", task.suite, task.filename);
    }
    out
}

/// Prints the closing report of a runner invocation.
pub fn print_run_summary(summary: &RunSummary, threshold: f64) {
    println!();
    print!("{}", format_runtime_analysis(&summary.analysis, threshold));

    let failed = summary.failed_tasks();
    println!();
    if failed.is_empty() {
        println!(
            "{}",
            style(format!("All {} test files passed!", summary.results.len()))
                .green()
                .bold()
        );
    } else {
        print!("{}", format_failures(&failed));
    }
}
