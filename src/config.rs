//! Configuration loading.
//!
//! Configuration is an optional TOML file. Every setting has a default, so
//! the CLI works without one; see [`schema`] for the available keys.

pub mod schema;

pub use schema::*;

use std::path::Path;

use anyhow::{Context, Result, bail};

/// File name looked up in the current directory when no path is given.
pub const DEFAULT_CONFIG_FILE: &str = "test-scheduler.toml";

/// Loads configuration from a TOML file.
///
/// # Errors
///
/// Returns an error if:
/// - The file cannot be read (e.g., doesn't exist or permission denied)
/// - The file contains invalid TOML syntax
/// - The configuration doesn't match the expected schema or fails validation
///
/// # Example
///
/// ```no_run
/// use test_scheduler::config::load_config;
/// use std::path::Path;
///
/// let config = load_config(Path::new("test-scheduler.toml"))?;
/// println!("Unseen weight: {}", config.schedule.unseen_weight);
/// # Ok::<(), anyhow::Error>(())
/// ```
pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    load_config_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))
}

/// Loads configuration from a TOML string.
///
/// # Example
///
/// ```
/// use test_scheduler::config::load_config_str;
///
/// let config = load_config_str(r#"
///     [runner]
///     deviation_threshold_secs = 30
/// "#)?;
///
/// assert_eq!(config.runner.deviation_threshold_secs, 30.0);
/// # Ok::<(), anyhow::Error>(())
/// ```
pub fn load_config_str(content: &str) -> Result<Config> {
    let mut config: Config = toml::from_str(content).context("Failed to parse config")?;
    validate(&config)?;
    config.runner.expand_paths();

    Ok(config)
}

/// Resolves the configuration for a CLI invocation.
///
/// An explicit path must exist. Without one, [`DEFAULT_CONFIG_FILE`] is used
/// when present and built-in defaults otherwise.
pub fn resolve_config(explicit: Option<&Path>) -> Result<Config> {
    match explicit {
        Some(path) => load_config(path),
        None => {
            let default_path = Path::new(DEFAULT_CONFIG_FILE);
            if default_path.exists() {
                load_config(default_path)
            } else {
                Ok(Config::default())
            }
        }
    }
}

fn validate(config: &Config) -> Result<()> {
    let weight = config.schedule.unseen_weight;
    if !(weight.is_finite() && weight > 0.0) {
        bail!("schedule.unseen_weight must be a positive number, got {weight}");
    }
    if config.runner.command_parts().is_empty() {
        bail!("runner.command must not be empty");
    }
    if config.runner.deviation_threshold_secs < 0.0 {
        bail!("runner.deviation_threshold_secs must not be negative");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_config_str_rejects_zero_weight() {
        let err = load_config_str("[schedule]\nunseen_weight = 0.0\n").unwrap_err();
        assert!(err.to_string().contains("unseen_weight"));
    }

    #[test]
    fn test_load_config_str_rejects_empty_command() {
        assert!(load_config_str("[runner]\ncommand = \"\"\n").is_err());
    }

    #[test]
    fn test_load_config_str_rejects_unknown_types() {
        assert!(load_config_str("[schedule]\nunseen_weight = \"heavy\"\n").is_err());
    }

    #[test]
    fn test_load_config_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test-scheduler.toml");
        std::fs::write(
            &path,
            "[runner]\ncommand = \"bin/busted -o gtest\"\n[runner.env]\nTZ = \"UTC\"\n",
        )
        .unwrap();

        let config = load_config(&path).unwrap();
        assert_eq!(config.runner.command_parts(), vec!["bin/busted", "-o", "gtest"]);
        assert_eq!(config.runner.env.get("TZ"), Some(&"UTC".to_string()));
    }

    #[test]
    fn test_resolve_config_explicit_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        assert!(resolve_config(Some(&dir.path().join("nope.toml"))).is_err());
    }
}
