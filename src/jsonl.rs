//! Newline-delimited JSON encoding shared by every persisted format.
//!
//! Task files, failure files, duration logs and runtime-estimate files all hold
//! one JSON object per line. Older estimate files were written as a single
//! JSON document containing an array of the same objects; [`parse_records`]
//! accepts both, selecting the format by the first non-whitespace character.
//!
//! Durations are written with at most two decimal digits (see
//! [`serialize_rounded`]) to keep the files small and diff-friendly.

use std::fs::{OpenOptions, Permissions};
use std::io::{self, Write};
use std::os::unix::fs::PermissionsExt;
use std::path::Path;

use serde::de::DeserializeOwned;
use serde::{Serialize, Serializer};

/// Parses newline-delimited JSON, or a legacy JSON array document.
///
/// Blank lines are ignored. An empty input yields an empty vector.
///
/// # Example
///
/// ```
/// use test_scheduler::jsonl::parse_records;
///
/// let lines: Vec<serde_json::Value> = parse_records("{\"a\":1}\n\n{\"a\":2}\n").unwrap();
/// let array: Vec<serde_json::Value> = parse_records(" [{\"a\":1},{\"a\":2}]").unwrap();
/// assert_eq!(lines, array);
/// ```
pub fn parse_records<T: DeserializeOwned>(content: &str) -> serde_json::Result<Vec<T>> {
    if content.trim_start().starts_with('[') {
        return serde_json::from_str(content);
    }

    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(serde_json::from_str)
        .collect()
}

/// Encodes records as newline-delimited JSON, one record per line.
pub fn encode_records<T: Serialize>(records: &[T]) -> serde_json::Result<String> {
    let mut out = String::new();
    for record in records {
        out.push_str(&serde_json::to_string(record)?);
        out.push('\n');
    }
    Ok(out)
}

/// Writes `contents` to `path` atomically.
///
/// The data goes to a temporary file in the destination directory which is
/// then renamed over `path`, so readers never observe a partially written
/// file and a failed write leaves no artifact behind.
pub fn write_atomic(path: &Path, contents: &str) -> io::Result<()> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };

    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    tmp.write_all(contents.as_bytes())?;
    tmp.flush()?;
    tmp.as_file().set_permissions(Permissions::from_mode(0o644))?;
    tmp.persist(path).map_err(|e| e.error)?;

    Ok(())
}

/// Appends a single record as one line to `path`, creating the file if needed.
///
/// The line is emitted with a single `write` call on a file opened in append
/// mode, so concurrent appenders on the same local filesystem do not
/// interleave within a line.
pub fn append_record<T: Serialize>(path: &Path, record: &T) -> io::Result<()> {
    let mut line = serde_json::to_string(record).map_err(io::Error::other)?;
    line.push('\n');

    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    file.write_all(line.as_bytes())?;
    file.flush()
}

/// Rounds to two decimal digits.
pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Serde helper writing an `f64` rounded to two decimal digits.
pub fn serialize_rounded<S: Serializer>(value: &f64, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_f64(round2(*value))
}
