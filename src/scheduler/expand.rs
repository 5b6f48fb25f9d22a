//! Expansion of suite `specs` entries into concrete test files.

use std::path::{Path, PathBuf};

use glob::{MatchOptions, Pattern};
use tracing::{debug, warn};

use super::ScheduleError;

/// Expands one `specs` entry relative to `root`.
///
/// A directory (checked without following symlinks) yields every file below
/// it matching `pattern`, sorted, as paths relative to `root`. Anything else
/// is returned as written. An entry that does not exist is an error; a
/// directory without matches only logs a warning.
pub fn expand_spec(root: &Path, spec: &str, pattern: &str) -> Result<Vec<String>, ScheduleError> {
    let path = root.join(spec);
    let metadata = std::fs::symlink_metadata(&path).map_err(|source| ScheduleError::SpecPath {
        path: path.clone(),
        source,
    })?;

    if !metadata.is_dir() {
        return Ok(vec![spec.to_string()]);
    }

    let dir = path.to_string_lossy();
    let full_pattern = format!(
        "{}/{}",
        Pattern::escape(dir.trim_end_matches('/')),
        pattern
    );
    debug!("Expanding {} with {}", spec, full_pattern);

    let options = MatchOptions {
        require_literal_leading_dot: true,
        ..MatchOptions::new()
    };
    let entries = glob::glob_with(&full_pattern, options).map_err(|source| {
        ScheduleError::Pattern {
            pattern: full_pattern.clone(),
            source,
        }
    })?;

    let mut files: Vec<PathBuf> = Vec::new();
    for entry in entries {
        match entry {
            Ok(file) if !file.is_dir() => files.push(file),
            Ok(_) => {}
            Err(e) => warn!("Skipping unreadable path while expanding {}: {}", spec, e),
        }
    }
    files.sort();

    if files.is_empty() {
        warn!("No test files matching {} found in {}", pattern, spec);
    }

    Ok(files
        .iter()
        .map(|file| relative_to(root, file))
        .collect())
}

fn relative_to(root: &Path, file: &Path) -> String {
    file.strip_prefix(root)
        .unwrap_or(file)
        .to_string_lossy()
        .into_owned()
}
