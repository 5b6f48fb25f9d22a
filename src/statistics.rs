//! Runtime statistics: raw duration samples in, one estimate per test file out.
//!
//! Every runner appends a [`DurationSample`] per executed file to its duration
//! log. Those logs are collected from past CI runs into a directory and folded
//! by the [`StatisticsCombiner`] into [`RuntimeEstimate`]s, which the scheduler
//! consumes on the next run.
//!
//! # Source Formats
//!
//! Each raw source is either
//!
//! - legacy whitespace-separated lines: `suite filename duration`, or
//! - newline-delimited JSON: `{"suite": ..., "filename": ..., "duration": ...}`
//!   where `duration` may be a number or a numeric string.
//!
//! The format is chosen per source by its first character (`{` means JSON).
//!
//! # Estimate Files
//!
//! Estimates are written as newline-delimited JSON
//! (`{"suite": ..., "filename": ..., "expectedDuration": ...}`).
//! [`RuntimeEstimates::load`] additionally accepts the legacy single-array form.
//!
//! # Example
//!
//! ```
//! use test_scheduler::statistics::StatisticsCombiner;
//!
//! let mut combiner = StatisticsCombiner::new();
//! combiner.add_source("unit a_spec.lua 3\nunit a_spec.lua 1\nunit a_spec.lua 2\n").unwrap();
//!
//! let estimates = combiner.estimates().unwrap();
//! assert_eq!(estimates[0].expected_duration, 2.0);
//! ```

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Deserializer, Serialize};
use tracing::{debug, info, warn};

use crate::jsonl;
use crate::task::TaskKey;

/// Errors produced while combining statistics or loading estimates.
#[derive(Debug, thiserror::Error)]
pub enum StatisticsError {
    /// The directory holding raw sources could not be listed.
    #[error("Failed to read statistics directory {path}: {source}")]
    UnreadableDirectory {
        path: PathBuf,
        source: std::io::Error,
    },

    /// A single raw source could not be parsed. Recoverable: the source is skipped.
    #[error("Failed to parse line {line}: {message}")]
    Parse { line: usize, message: String },

    /// A computed estimate is not a finite number; the input data is corrupt.
    #[error("Estimate for {key} is not a finite number ({value})")]
    NonNumericEstimate { key: TaskKey, value: f64 },

    /// The estimate file could not be read or written.
    #[error("Failed to access estimate file {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// The estimate file is not valid JSON.
    #[error("Failed to parse estimate file {path}: {source}")]
    Json {
        path: PathBuf,
        source: serde_json::Error,
    },
}

/// One observed execution time of a test file, in seconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DurationSample {
    pub suite: String,
    pub filename: String,
    #[serde(
        default,
        deserialize_with = "deserialize_duration",
        serialize_with = "jsonl::serialize_rounded"
    )]
    pub duration: f64,
}

impl DurationSample {
    pub fn key(&self) -> TaskKey {
        TaskKey::new(&self.suite, &self.filename)
    }
}

/// The canonical expected duration of a test file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuntimeEstimate {
    pub suite: String,
    pub filename: String,
    #[serde(rename = "expectedDuration")]
    pub expected_duration: f64,
}

impl RuntimeEstimate {
    pub fn key(&self) -> TaskKey {
        TaskKey::new(&self.suite, &self.filename)
    }
}

/// Non-finite durations (`inf`, `1e999`, `NaN`) are missing measurements.
fn finite_or_missing(duration: f64) -> f64 {
    if duration.is_finite() { duration } else { 0.0 }
}

/// Accepts a JSON number or a numeric string. Anything else, or a value that
/// is not finite, reads as `0`, which the combiner then discards as a missing
/// measurement.
fn deserialize_duration<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Number(f64),
        Text(String),
        Other(serde_json::Value),
    }

    let duration = match Raw::deserialize(deserializer)? {
        Raw::Number(n) => n,
        Raw::Text(s) => s.trim().parse().unwrap_or(0.0),
        Raw::Other(_) => 0.0,
    };
    Ok(finite_or_missing(duration))
}

/// Parses one raw source into samples.
///
/// Samples with non-positive durations are returned as well; filtering is the
/// combiner's job.
pub fn parse_source(content: &str) -> Result<Vec<DurationSample>, StatisticsError> {
    let is_json = content.starts_with('{');

    content
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(idx, line)| {
            if is_json {
                serde_json::from_str(line).map_err(|e| StatisticsError::Parse {
                    line: idx + 1,
                    message: e.to_string(),
                })
            } else {
                parse_legacy_line(line).ok_or_else(|| StatisticsError::Parse {
                    line: idx + 1,
                    message: format!("expected `suite filename duration`, got {:?}", line),
                })
            }
        })
        .collect()
}

fn parse_legacy_line(line: &str) -> Option<DurationSample> {
    let mut fields = line.split_whitespace();
    let suite = fields.next()?;
    let filename = fields.next()?;
    let duration = fields
        .next()
        .and_then(|d| d.parse::<f64>().ok())
        .map_or(0.0, finite_or_missing);

    Some(DurationSample {
        suite: suite.to_string(),
        filename: filename.to_string(),
        duration,
    })
}

/// Median of the values; `None` for an empty slice.
///
/// Even counts average the two middle values.
pub fn median(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }

    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);

    let middle = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        Some((sorted[middle - 1] + sorted[middle]) / 2.0)
    } else {
        Some(sorted[middle])
    }
}

/// Groups duration samples by key and reduces each group to its median.
///
/// Estimates are always recomputed from the full sample set; the combiner
/// holds no state from earlier passes.
#[derive(Debug, Default)]
pub struct StatisticsCombiner {
    samples: HashMap<TaskKey, Vec<f64>>,
}

impl StatisticsCombiner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds one sample. Non-positive or non-finite durations are missing
    /// data and ignored.
    ///
    /// Returns whether the sample was kept.
    pub fn add_sample(&mut self, sample: DurationSample) -> bool {
        if !sample.duration.is_finite() || sample.duration <= 0.0 {
            return false;
        }
        self.samples
            .entry(sample.key())
            .or_default()
            .push(sample.duration);
        true
    }

    /// Parses a raw source and adds all its samples.
    ///
    /// On a parse error nothing from the source is added. Returns the number
    /// of samples kept.
    pub fn add_source(&mut self, content: &str) -> Result<usize, StatisticsError> {
        let samples = parse_source(content)?;
        Ok(samples
            .into_iter()
            .map(|s| self.add_sample(s))
            .filter(|kept| *kept)
            .count())
    }

    /// Number of distinct keys with at least one sample.
    pub fn key_count(&self) -> usize {
        self.samples.len()
    }

    /// Computes one estimate per key, sorted by key, rounded to two decimals.
    ///
    /// # Errors
    ///
    /// [`StatisticsError::NonNumericEstimate`] if any median is not finite,
    /// e.g. when averaging two middle samples overflows.
    pub fn estimates(&self) -> Result<Vec<RuntimeEstimate>, StatisticsError> {
        let mut keys: Vec<&TaskKey> = self.samples.keys().collect();
        keys.sort();

        keys.into_iter()
            .map(|key| {
                let value = median(&self.samples[key]).unwrap_or(f64::NAN);
                if !value.is_finite() {
                    return Err(StatisticsError::NonNumericEstimate {
                        key: key.clone(),
                        value,
                    });
                }
                Ok(RuntimeEstimate {
                    suite: key.suite.clone(),
                    filename: key.filename.clone(),
                    expected_duration: jsonl::round2(value),
                })
            })
            .collect()
    }
}

/// Lookup table of estimates keyed by `(suite, filename)`.
#[derive(Debug, Clone, Default)]
pub struct RuntimeEstimates {
    entries: HashMap<TaskKey, f64>,
}

impl RuntimeEstimates {
    /// Loads an estimate file in either newline-delimited or legacy array form.
    pub fn load(path: &Path) -> Result<Self, StatisticsError> {
        let content = std::fs::read_to_string(path).map_err(|source| StatisticsError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        let estimates: Vec<RuntimeEstimate> =
            jsonl::parse_records(&content).map_err(|source| StatisticsError::Json {
                path: path.to_path_buf(),
                source,
            })?;

        debug!(
            "Loaded {} runtime estimates from {}",
            estimates.len(),
            path.display()
        );
        Ok(Self::from_estimates(estimates))
    }

    pub fn from_estimates(estimates: impl IntoIterator<Item = RuntimeEstimate>) -> Self {
        Self {
            entries: estimates
                .into_iter()
                .map(|e| (e.key(), e.expected_duration))
                .collect(),
        }
    }

    pub fn get(&self, key: &TaskKey) -> Option<f64> {
        self.entries.get(key).copied()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Writes estimates as newline-delimited JSON, atomically.
pub fn write_estimates(path: &Path, estimates: &[RuntimeEstimate]) -> Result<(), StatisticsError> {
    let io_error = |source| StatisticsError::Io {
        path: path.to_path_buf(),
        source,
    };

    let content = jsonl::encode_records(estimates).map_err(|e| io_error(e.into()))?;
    jsonl::write_atomic(path, &content).map_err(io_error)
}

/// Outcome counters of a [`combine_statistics`] pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CombineSummary {
    pub sources_read: usize,
    pub sources_skipped: usize,
    pub samples: usize,
    pub estimates: usize,
}

/// Combines every raw source in `directory` and writes the estimate file.
///
/// Sources are the directory's regular, non-hidden files in name order. A
/// source that cannot be decoded or parsed is logged and skipped; an
/// unreadable directory or a non-finite estimate aborts the pass before
/// anything is written.
pub fn combine_statistics(
    directory: &Path,
    output: &Path,
) -> Result<CombineSummary, StatisticsError> {
    let unreadable = |source| StatisticsError::UnreadableDirectory {
        path: directory.to_path_buf(),
        source,
    };

    let mut paths = Vec::new();
    for entry in std::fs::read_dir(directory).map_err(unreadable)? {
        let entry = entry.map_err(unreadable)?;
        let hidden = entry.file_name().to_string_lossy().starts_with('.');
        if !hidden && entry.file_type().map(|t| t.is_file()).unwrap_or(false) {
            paths.push(entry.path());
        }
    }
    paths.sort();

    let mut combiner = StatisticsCombiner::new();
    let mut summary = CombineSummary::default();

    for path in &paths {
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) => {
                warn!("Skipping unreadable source {}: {}", path.display(), e);
                summary.sources_skipped += 1;
                continue;
            }
        };

        match combiner.add_source(&content) {
            Ok(kept) => {
                debug!("{}: {} samples", path.display(), kept);
                summary.sources_read += 1;
                summary.samples += kept;
            }
            Err(e) => {
                warn!("Skipping source {}: {}", path.display(), e);
                summary.sources_skipped += 1;
            }
        }
    }

    let estimates = combiner.estimates()?;
    summary.estimates = estimates.len();
    write_estimates(output, &estimates)?;

    info!(
        "Combined {} samples from {} sources ({} skipped) into {} estimates",
        summary.samples, summary.sources_read, summary.sources_skipped, summary.estimates
    );

    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn sample(suite: &str, filename: &str, duration: f64) -> DurationSample {
        DurationSample {
            suite: suite.to_string(),
            filename: filename.to_string(),
            duration,
        }
    }

    fn estimate_for(combiner: &StatisticsCombiner, suite: &str, filename: &str) -> f64 {
        combiner
            .estimates()
            .unwrap()
            .into_iter()
            .find(|e| e.suite == suite && e.filename == filename)
            .map(|e| e.expected_duration)
            .unwrap()
    }

    #[test]
    fn test_median_odd_and_even() {
        assert_eq!(median(&[3.0, 1.0, 2.0]), Some(2.0));
        assert_eq!(median(&[4.0, 1.0, 3.0, 2.0]), Some(2.5));
        assert_eq!(median(&[7.0]), Some(7.0));
        assert_eq!(median(&[]), None);
    }

    #[test]
    fn test_non_positive_samples_are_excluded() {
        let mut combiner = StatisticsCombiner::new();
        for d in [0.0, 5.0, 0.0, 7.0, -1.0] {
            combiner.add_sample(sample("unit", "a_spec.lua", d));
        }
        assert_eq!(estimate_for(&combiner, "unit", "a_spec.lua"), 6.0);
    }

    #[test]
    fn test_key_with_only_missing_samples_has_no_estimate() {
        let mut combiner = StatisticsCombiner::new();
        assert!(!combiner.add_sample(sample("unit", "a_spec.lua", 0.0)));
        assert!(combiner.estimates().unwrap().is_empty());
    }

    #[test]
    fn test_same_filename_in_different_suites_is_kept_apart() {
        let mut combiner = StatisticsCombiner::new();
        combiner.add_sample(sample("postgres", "a_spec.lua", 10.0));
        combiner.add_sample(sample("dbless", "a_spec.lua", 2.0));

        assert_eq!(combiner.key_count(), 2);
        assert_eq!(estimate_for(&combiner, "postgres", "a_spec.lua"), 10.0);
        assert_eq!(estimate_for(&combiner, "dbless", "a_spec.lua"), 2.0);
    }

    #[test]
    fn test_parse_legacy_source() {
        let samples = parse_source("unit\ta_spec.lua\t1.5\nunit  b_spec.lua   abc\n").unwrap();
        assert_eq!(samples.len(), 2);
        assert_eq!(samples[0], sample("unit", "a_spec.lua", 1.5));
        assert_eq!(samples[1].duration, 0.0);
    }

    #[test]
    fn test_parse_legacy_source_rejects_truncated_line() {
        let err = parse_source("unit a_spec.lua 1\nunit\n").unwrap_err();
        assert!(matches!(err, StatisticsError::Parse { line: 2, .. }));
    }

    #[test]
    fn test_parse_json_source_coerces_strings() {
        let samples = parse_source(
            "{\"suite\":\"unit\",\"filename\":\"a_spec.lua\",\"duration\":\"2.25\"}\n\
             {\"suite\":\"unit\",\"filename\":\"b_spec.lua\",\"duration\":4}\n\
             {\"suite\":\"unit\",\"filename\":\"c_spec.lua\",\"duration\":null}\n",
        )
        .unwrap();
        assert_eq!(samples[0].duration, 2.25);
        assert_eq!(samples[1].duration, 4.0);
        assert_eq!(samples[2].duration, 0.0);
    }

    #[test]
    fn test_failed_source_adds_nothing() {
        let mut combiner = StatisticsCombiner::new();
        let result = combiner.add_source(
            "{\"suite\":\"unit\",\"filename\":\"a_spec.lua\",\"duration\":1}\n{broken\n",
        );
        assert!(result.is_err());
        assert_eq!(combiner.key_count(), 0);
    }

    #[test]
    fn test_non_finite_durations_are_missing_samples() {
        let mut combiner = StatisticsCombiner::new();
        assert_eq!(combiner.add_source("unit a_spec.lua 5\n").unwrap(), 1);
        assert_eq!(
            combiner
                .add_source("unit a_spec.lua inf\nunit a_spec.lua 1e999\nunit b_spec.lua infinity\n")
                .unwrap(),
            0
        );
        assert_eq!(
            combiner
                .add_source("{\"suite\":\"unit\",\"filename\":\"a_spec.lua\",\"duration\":\"-inf\"}\n")
                .unwrap(),
            0
        );
        assert!(!combiner.add_sample(sample("unit", "a_spec.lua", f64::INFINITY)));

        assert_eq!(combiner.key_count(), 1);
        assert_eq!(estimate_for(&combiner, "unit", "a_spec.lua"), 5.0);
    }

    #[test]
    fn test_overflowing_median_is_fatal() {
        let mut combiner = StatisticsCombiner::new();
        combiner.add_sample(sample("unit", "a_spec.lua", f64::MAX));
        combiner.add_sample(sample("unit", "a_spec.lua", f64::MAX));
        let err = combiner.estimates().unwrap_err();
        assert!(matches!(err, StatisticsError::NonNumericEstimate { .. }));
    }

    #[test]
    fn test_estimates_are_rounded() {
        let mut combiner = StatisticsCombiner::new();
        combiner.add_sample(sample("unit", "a_spec.lua", 1.23456));
        combiner.add_sample(sample("unit", "a_spec.lua", 1.0));
        assert_eq!(estimate_for(&combiner, "unit", "a_spec.lua"), 1.12);
    }

    #[test]
    fn test_estimate_file_round_trip_and_legacy_format() {
        let dir = tempfile::tempdir().unwrap();
        let lines_path = dir.path().join("runtimes.json");
        let legacy_path = dir.path().join("legacy.json");

        let estimates = vec![
            RuntimeEstimate {
                suite: "unit".to_string(),
                filename: "a_spec.lua".to_string(),
                expected_duration: 1.5,
            },
            RuntimeEstimate {
                suite: "dbless".to_string(),
                filename: "b_spec.lua".to_string(),
                expected_duration: 20.25,
            },
        ];

        write_estimates(&lines_path, &estimates).unwrap();
        std::fs::write(&legacy_path, serde_json::to_string(&estimates).unwrap()).unwrap();

        let as_set = |store: &RuntimeEstimates| -> HashSet<(String, String, u64)> {
            estimates
                .iter()
                .map(|e| {
                    let value = store.get(&e.key()).unwrap();
                    (e.suite.clone(), e.filename.clone(), value.to_bits())
                })
                .collect()
        };

        let from_lines = RuntimeEstimates::load(&lines_path).unwrap();
        let from_legacy = RuntimeEstimates::load(&legacy_path).unwrap();

        assert_eq!(from_lines.len(), 2);
        assert_eq!(from_legacy.len(), 2);
        assert_eq!(as_set(&from_lines), as_set(&from_legacy));
        assert_eq!(
            from_lines.get(&TaskKey::new("dbless", "b_spec.lua")),
            Some(20.25)
        );
    }

    #[test]
    fn test_combine_statistics_skips_bad_sources() {
        let dir = tempfile::tempdir().unwrap();
        let data = dir.path().join("data");
        std::fs::create_dir(&data).unwrap();

        std::fs::write(data.join("run_1.log"), "unit a_spec.lua 3\nunit b_spec.lua 0\n").unwrap();
        std::fs::write(
            data.join("run_2.log"),
            "{\"suite\":\"unit\",\"filename\":\"a_spec.lua\",\"duration\":\"1\"}\n",
        )
        .unwrap();
        std::fs::write(data.join("run_3.log"), "{not json at all\n").unwrap();
        std::fs::write(data.join("run_4.log"), [0xff, 0xfe, 0x00]).unwrap();
        std::fs::write(data.join(".hidden"), "unit a_spec.lua 1000\n").unwrap();

        let output = dir.path().join("runtimes.json");
        let summary = combine_statistics(&data, &output).unwrap();

        assert_eq!(summary.sources_read, 2);
        assert_eq!(summary.sources_skipped, 2);
        assert_eq!(summary.samples, 2);
        assert_eq!(summary.estimates, 1);

        let store = RuntimeEstimates::load(&output).unwrap();
        assert_eq!(store.get(&TaskKey::new("unit", "a_spec.lua")), Some(2.0));
        assert_eq!(store.get(&TaskKey::new("unit", "b_spec.lua")), None);
    }

    #[test]
    fn test_combine_statistics_unreadable_directory_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("runtimes.json");

        let err = combine_statistics(&dir.path().join("missing"), &output).unwrap_err();
        assert!(matches!(err, StatisticsError::UnreadableDirectory { .. }));
        assert!(!output.exists());
    }

    #[test]
    fn test_combine_statistics_ignores_non_finite_durations() {
        let dir = tempfile::tempdir().unwrap();
        let data = dir.path().join("data");
        std::fs::create_dir(&data).unwrap();
        std::fs::write(data.join("run_1.log"), "unit a_spec.lua 4\nunit b_spec.lua 2\n").unwrap();
        std::fs::write(data.join("run_2.log"), "unit a_spec.lua inf\nunit b_spec.lua 1e999\n")
            .unwrap();

        let output = dir.path().join("runtimes.json");
        let summary = combine_statistics(&data, &output).unwrap();
        assert_eq!(summary.estimates, 2);

        let store = RuntimeEstimates::load(&output).unwrap();
        assert_eq!(store.get(&TaskKey::new("unit", "a_spec.lua")), Some(4.0));
        assert_eq!(store.get(&TaskKey::new("unit", "b_spec.lua")), Some(2.0));
    }
}
