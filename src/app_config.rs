//! Application configuration loading for CLI defaults.
//!
//! Precedence: command-line flag, then config file, then built-in default.

use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use serde::Deserialize;
use segment_fetch::download::{
    CONNECT_TIMEOUT_SECS, ClientOptions, DEFAULT_RATE_LIMIT, REQUEST_TIMEOUT_SECS,
};
use segment_fetch::{DEFAULT_MAX_RETRIES, DEFAULT_MAX_WORKERS, GapPolicy};

use crate::cli::Args;

/// Output directory used when neither flag nor config sets one.
const DEFAULT_OUTPUT_DIR: &str = "output";

/// TOML-backed file configuration for CLI defaults.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
    /// Default output directory.
    pub output_dir: Option<PathBuf>,
    /// Default worker count (same range as CLI).
    pub workers: Option<u8>,
    /// Default attempts per segment.
    pub max_retries: Option<u8>,
    /// Default request spacing in milliseconds.
    pub rate_limit_ms: Option<u64>,
    /// Default per-request timeout in seconds.
    pub timeout_secs: Option<u64>,
    /// Write output with missing segments.
    pub allow_gaps: Option<bool>,
    /// User-Agent override.
    pub user_agent: Option<String>,
    /// Referer header for segment requests.
    pub referer: Option<String>,
    /// Origin header for segment requests.
    pub origin: Option<String>,
}

impl FileConfig {
    /// Validates config values against the CLI constraints.
    pub fn validate(&self) -> Result<()> {
        validate_range("workers", self.workers.map(u64::from), 1, 100)?;
        validate_range("max_retries", self.max_retries.map(u64::from), 1, 10)?;
        validate_range("rate_limit_ms", self.rate_limit_ms, 0, 60_000)?;
        validate_range("timeout_secs", self.timeout_secs, 1, 3600)?;
        Ok(())
    }
}

fn validate_range(field: &str, value: Option<u64>, min: u64, max: u64) -> Result<()> {
    let Some(value) = value else {
        return Ok(());
    };
    if !(min..=max).contains(&value) {
        bail!("Invalid config value for `{field}`: {value}. Expected range: {min}..={max}");
    }
    Ok(())
}

/// Loaded config metadata.
#[derive(Debug, Clone)]
pub struct LoadedConfig {
    /// Resolved config path if a base directory is known.
    pub path: Option<PathBuf>,
    /// Parsed file config when a config file exists and was valid.
    pub config: Option<FileConfig>,
}

/// Resolves default config path.
///
/// Priority:
/// 1. `$XDG_CONFIG_HOME/segment-fetch/config.toml`
/// 2. `$HOME/.config/segment-fetch/config.toml`
#[must_use]
pub fn resolve_default_config_path() -> Option<PathBuf> {
    if let Some(xdg_config_home) = env_var_non_empty_os("XDG_CONFIG_HOME") {
        return Some(
            PathBuf::from(xdg_config_home)
                .join("segment-fetch")
                .join("config.toml"),
        );
    }

    let home = env_var_non_empty_os("HOME")?;
    Some(
        PathBuf::from(home)
            .join(".config")
            .join("segment-fetch")
            .join("config.toml"),
    )
}

fn env_var_non_empty_os(name: &str) -> Option<std::ffi::OsString> {
    let value = env::var_os(name)?;
    if value.is_empty() { None } else { Some(value) }
}

/// Loads config from the default path if present.
pub fn load_default_file_config() -> Result<LoadedConfig> {
    let path = resolve_default_config_path();
    let config = match path.as_deref() {
        Some(path) if path.exists() => Some(load_file_config(path)?),
        _ => None,
    };
    Ok(LoadedConfig { path, config })
}

fn load_file_config(path: &Path) -> Result<FileConfig> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file '{}'", path.display()))?;
    parse_config_str(&raw)
        .with_context(|| format!("Failed to parse config file '{}'", path.display()))
}

fn parse_config_str(raw: &str) -> Result<FileConfig> {
    let cfg: FileConfig = toml::from_str(raw)?;
    cfg.validate()?;
    Ok(cfg)
}

/// Effective settings for one run.
#[derive(Debug, Clone)]
pub struct Settings {
    pub output_dir: PathBuf,
    pub workers: usize,
    pub max_retries: u32,
    pub rate_limit: Duration,
    pub gap_policy: GapPolicy,
    pub client: ClientOptions,
}

/// Merges CLI flags over the file config over built-in defaults.
#[must_use]
pub fn resolve_settings(args: &Args, file: Option<&FileConfig>) -> Settings {
    let file = file.cloned().unwrap_or_default();

    let output_dir = args
        .output_dir
        .clone()
        .or(file.output_dir)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_OUTPUT_DIR));
    let workers = args
        .workers
        .or(file.workers)
        .map_or(DEFAULT_MAX_WORKERS, usize::from);
    let max_retries = args
        .max_retries
        .or(file.max_retries)
        .map_or(DEFAULT_MAX_RETRIES, u32::from);
    let rate_limit = args
        .rate_limit
        .or(file.rate_limit_ms)
        .map_or(DEFAULT_RATE_LIMIT, Duration::from_millis);
    let timeout_secs = args
        .timeout
        .or(file.timeout_secs)
        .unwrap_or(REQUEST_TIMEOUT_SECS);
    let gap_policy = if args.allow_gaps || file.allow_gaps.unwrap_or(false) {
        GapPolicy::Allow
    } else {
        GapPolicy::Fail
    };

    Settings {
        output_dir,
        workers,
        max_retries,
        rate_limit,
        gap_policy,
        client: ClientOptions {
            connect_timeout: Duration::from_secs(CONNECT_TIMEOUT_SECS.min(timeout_secs)),
            request_timeout: Duration::from_secs(timeout_secs),
            user_agent: file.user_agent,
            referer: file.referer,
            origin: file.origin,
        },
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use clap::Parser;

    use super::*;

    fn args(argv: &[&str]) -> Args {
        let mut full = vec!["segment-fetch"];
        full.extend_from_slice(argv);
        Args::try_parse_from(full).unwrap()
    }

    #[test]
    fn test_parse_config_partial_fields() {
        let cfg = parse_config_str(
            r#"
workers = 8
referer = "https://example.com/"
"#,
        )
        .unwrap();
        assert_eq!(cfg.workers, Some(8));
        assert_eq!(cfg.referer.as_deref(), Some("https://example.com/"));
        assert!(cfg.output_dir.is_none());
    }

    #[test]
    fn test_parse_config_all_fields() {
        let cfg = parse_config_str(
            r#"
output_dir = "/data/videos" # where finished files go
workers = 3
max_retries = 4
rate_limit_ms = 250
timeout_secs = 20
allow_gaps = true
user_agent = "custom/1.0"
referer = "https://example.com/"
origin = "https://example.com"
"#,
        )
        .unwrap();
        assert_eq!(cfg.output_dir, Some(PathBuf::from("/data/videos")));
        assert_eq!(cfg.allow_gaps, Some(true));
        assert_eq!(cfg.timeout_secs, Some(20));
    }

    #[test]
    fn test_parse_config_rejects_unknown_key() {
        let err = parse_config_str("concurrency = 4").unwrap_err();
        assert!(err.to_string().contains("concurrency"));
    }

    #[test]
    fn test_parse_config_rejects_invalid_workers() {
        let err = parse_config_str("workers = 0").unwrap_err();
        assert!(err.to_string().contains("workers"));
    }

    #[test]
    fn test_parse_config_rejects_rate_limit_too_large() {
        let err = parse_config_str("rate_limit_ms = 60001").unwrap_err();
        assert!(err.to_string().contains("rate_limit_ms"));
    }

    #[test]
    fn test_parse_config_rejects_wrong_type() {
        assert!(parse_config_str("allow_gaps = \"yes\"").is_err());
        assert!(parse_config_str("workers = -1").is_err());
    }

    #[test]
    fn test_resolve_settings_defaults() {
        let settings = resolve_settings(&args(&[]), None);
        assert_eq!(settings.output_dir, PathBuf::from("output"));
        assert_eq!(settings.workers, DEFAULT_MAX_WORKERS);
        assert_eq!(settings.max_retries, DEFAULT_MAX_RETRIES);
        assert_eq!(settings.rate_limit, DEFAULT_RATE_LIMIT);
        assert_eq!(settings.gap_policy, GapPolicy::Fail);
        assert_eq!(
            settings.client.request_timeout,
            Duration::from_secs(REQUEST_TIMEOUT_SECS)
        );
    }

    #[test]
    fn test_resolve_settings_file_overrides_defaults() {
        let file = FileConfig {
            workers: Some(2),
            rate_limit_ms: Some(500),
            allow_gaps: Some(true),
            referer: Some("https://example.com/".to_string()),
            ..FileConfig::default()
        };
        let settings = resolve_settings(&args(&[]), Some(&file));
        assert_eq!(settings.workers, 2);
        assert_eq!(settings.rate_limit, Duration::from_millis(500));
        assert_eq!(settings.gap_policy, GapPolicy::Allow);
        assert_eq!(settings.client.referer.as_deref(), Some("https://example.com/"));
    }

    #[test]
    fn test_resolve_settings_cli_overrides_file() {
        let file = FileConfig {
            workers: Some(2),
            output_dir: Some(PathBuf::from("/from/config")),
            max_retries: Some(9),
            ..FileConfig::default()
        };
        let settings = resolve_settings(&args(&["-c", "7", "-o", "cli-out"]), Some(&file));
        assert_eq!(settings.workers, 7);
        assert_eq!(settings.output_dir, PathBuf::from("cli-out"));
        assert_eq!(settings.max_retries, 9);
    }

    #[test]
    fn test_resolve_settings_short_timeout_caps_connect_timeout() {
        let settings = resolve_settings(&args(&["--timeout", "3"]), None);
        assert_eq!(settings.client.request_timeout, Duration::from_secs(3));
        assert_eq!(settings.client.connect_timeout, Duration::from_secs(3));
    }
}
