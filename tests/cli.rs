//! End-to-end tests of the `test-scheduler` binary.

use std::fs;
use std::path::Path;

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

fn bin() -> Command {
    Command::cargo_bin("test-scheduler").unwrap()
}

fn write_config(dir: &Path, command: &str) -> std::path::PathBuf {
    let path = dir.join("test-scheduler.toml");
    fs::write(
        &path,
        format!("[runner]\ncommand = \"{command}\"\nevent_drain_timeout_ms = 200\n"),
    )
    .unwrap();
    path
}

fn write_partition(dir: &Path) -> std::path::PathBuf {
    let path = dir.join("chunk.1.json");
    fs::write(
        &path,
        concat!(
            "{\"suite\":\"unit\",\"filename\":\"spec/a_spec.lua\",\"duration\":1.0}\n",
            "{\"suite\":\"unit\",\"filename\":\"spec/b_spec.lua\",\"duration\":2.0}\n",
        ),
    )
    .unwrap();
    path
}

#[test]
fn test_schedule_writes_partition_files() {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path();
    fs::create_dir_all(root.join("spec/01-unit")).unwrap();
    fs::write(root.join("spec/01-unit/a_spec.lua"), "").unwrap();
    fs::write(root.join("spec/01-unit/b_spec.lua"), "").unwrap();
    fs::write(root.join("spec/01-unit/helpers.lua"), "").unwrap();
    fs::write(
        root.join("suites.json"),
        r#"[{"name": "unit", "specs": ["spec/01-unit/"]}]"#,
    )
    .unwrap();
    fs::write(
        root.join("runtimes.json"),
        "{\"suite\":\"unit\",\"filename\":\"spec/01-unit/a_spec.lua\",\"expectedDuration\":5.0}\n",
    )
    .unwrap();
    let config = write_config(root, "true");

    let prefix = root.join("chunk.");
    bin()
        .current_dir(root)
        .arg("--config")
        .arg(&config)
        .arg("schedule")
        .arg("--suites")
        .arg(root.join("suites.json"))
        .arg("--estimates")
        .arg(root.join("runtimes.json"))
        .args(["--workers", "2"])
        .arg("--output-prefix")
        .arg(&prefix)
        .arg("--root")
        .arg(root)
        .assert()
        .success()
        .stdout(predicate::str::contains("1 test files without runtime data"))
        .stdout(predicate::str::contains("unit:spec/01-unit/b_spec.lua"));

    let first = fs::read_to_string(root.join("chunk.1.json")).unwrap();
    let second = fs::read_to_string(root.join("chunk.2.json")).unwrap();
    assert_eq!(first.lines().count() + second.lines().count(), 2);
    assert!(!first.contains("helpers.lua") && !second.contains("helpers.lua"));
}

#[test]
fn test_schedule_rejects_zero_workers() {
    let tmp = TempDir::new().unwrap();
    fs::write(tmp.path().join("suites.json"), "[]").unwrap();
    let config = write_config(tmp.path(), "true");

    bin()
        .current_dir(tmp.path())
        .arg("--config")
        .arg(&config)
        .arg("schedule")
        .arg("--suites")
        .arg(tmp.path().join("suites.json"))
        .args(["--static", "--workers", "0", "--output-prefix", "chunk."])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Partition count must be at least 1"));

    assert!(!tmp.path().join("chunk.1.json").exists());
}

#[test]
fn test_schedule_requires_estimates_unless_static() {
    let tmp = TempDir::new().unwrap();
    fs::create_dir_all(tmp.path().join("spec")).unwrap();
    fs::write(tmp.path().join("spec/a_spec.lua"), "").unwrap();
    fs::write(
        tmp.path().join("suites.json"),
        r#"[{"name": "unit", "specs": ["spec/"]}]"#,
    )
    .unwrap();
    let config = write_config(tmp.path(), "true");

    let schedule = || {
        let mut cmd = bin();
        cmd.current_dir(tmp.path())
            .arg("--config")
            .arg(&config)
            .arg("schedule")
            .arg("--suites")
            .arg(tmp.path().join("suites.json"))
            .args(["--workers", "1", "--output-prefix", "chunk.", "--root"])
            .arg(tmp.path());
        cmd
    };

    schedule()
        .assert()
        .failure()
        .stderr(predicate::str::contains("--estimates"));
    assert!(!tmp.path().join("chunk.1.json").exists());

    schedule()
        .arg("--static")
        .assert()
        .success()
        .stdout(predicate::str::contains("Static mode"));
    assert!(tmp.path().join("chunk.1.json").exists());
}

#[test]
fn test_combine_statistics_writes_medians() {
    let tmp = TempDir::new().unwrap();
    let logs = tmp.path().join("logs");
    fs::create_dir(&logs).unwrap();
    fs::write(
        logs.join("run-1.log"),
        "{\"suite\":\"unit\",\"filename\":\"a\",\"duration\":1.0}\n",
    )
    .unwrap();
    fs::write(
        logs.join("run-2.log"),
        "{\"suite\":\"unit\",\"filename\":\"a\",\"duration\":3.0}\n",
    )
    .unwrap();
    fs::write(
        logs.join("run-3.log"),
        "{\"suite\":\"unit\",\"filename\":\"a\",\"duration\":10.0}\n",
    )
    .unwrap();
    let output = tmp.path().join("runtimes.json");

    bin()
        .current_dir(tmp.path())
        .arg("combine-statistics")
        .arg("--input")
        .arg(&logs)
        .arg("--output")
        .arg(&output)
        .assert()
        .success()
        .stdout(predicate::str::contains("Wrote 1 runtime estimates"));

    let content = fs::read_to_string(&output).unwrap();
    assert!(content.contains("\"expectedDuration\":3.0"), "{content}");
}

#[test]
fn test_runner_exits_zero_when_every_file_passes() {
    let tmp = TempDir::new().unwrap();
    let config = write_config(tmp.path(), "true");
    let tasks = write_partition(tmp.path());
    let failures = tmp.path().join("failed.json");

    bin()
        .current_dir(tmp.path())
        .arg("--config")
        .arg(&config)
        .arg("runner")
        .arg("--tasks")
        .arg(&tasks)
        .arg("--failures")
        .arg(&failures)
        .assert()
        .code(0)
        .stdout(predicate::str::contains("All 2 test files passed!"));

    assert!(!failures.exists());
}

#[test]
fn test_runner_records_failures_and_retries_them() {
    let tmp = TempDir::new().unwrap();
    let tasks = write_partition(tmp.path());
    let failures = tmp.path().join("failed.json");

    let failing = write_config(tmp.path(), "false");
    bin()
        .current_dir(tmp.path())
        .arg("--config")
        .arg(&failing)
        .arg("runner")
        .arg("--tasks")
        .arg(&tasks)
        .arg("--failures")
        .arg(&failures)
        .assert()
        .code(1)
        .stdout(predicate::str::contains("2 test files failed:"))
        .stdout(predicate::str::contains("\tunit\tspec/a_spec.lua"));

    let recorded = fs::read_to_string(&failures).unwrap();
    assert_eq!(recorded.lines().count(), 2);

    let passing = write_config(tmp.path(), "true");
    bin()
        .current_dir(tmp.path())
        .arg("--config")
        .arg(&passing)
        .arg("runner")
        .arg("--tasks")
        .arg(&tasks)
        .arg("--failures")
        .arg(&failures)
        .assert()
        .code(0)
        .stdout(predicate::str::contains("Retry pass: 0 of 2"));

    assert!(!failures.exists());
}

#[test]
fn test_runner_missing_task_file_fails() {
    let tmp = TempDir::new().unwrap();
    let config = write_config(tmp.path(), "true");

    bin()
        .current_dir(tmp.path())
        .arg("--config")
        .arg(&config)
        .arg("runner")
        .arg("--tasks")
        .arg(tmp.path().join("missing.json"))
        .assert()
        .failure()
        .stderr(predicate::str::contains("Failed to run"));
}
