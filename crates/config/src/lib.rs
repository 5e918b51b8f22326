//! # Config - Streaming Receiver Settings
//!
//! Node-level knobs consumed by the inbound streaming path and the engine
//! hosting it. Every setting has a default and can be overridden through the
//! environment:
//!
//! | Variable                             | Default | Meaning                                        |
//! |--------------------------------------|---------|------------------------------------------------|
//! | `RIPTIDE_STREAM_LOG_OUT_OF_RANGE`    | `true`  | log keys outside the owned ranges              |
//! | `RIPTIDE_STREAM_REJECT_OUT_OF_RANGE` | `true`  | fail transfers carrying such keys              |
//! | `RIPTIDE_STREAM_NOSPAM_MS`           | `1000`  | minimum interval between out-of-range logs     |
//! | `RIPTIDE_DATA_DIRS`                  | `data`  | comma-separated `path[:capacity_kib]` entries  |
//!
//! Invalid values are reported as errors, never replaced by the default.

use anyhow::{bail, Context, Result};
use std::path::PathBuf;
use std::time::Duration;

pub const ENV_LOG_OUT_OF_RANGE: &str = "RIPTIDE_STREAM_LOG_OUT_OF_RANGE";
pub const ENV_REJECT_OUT_OF_RANGE: &str = "RIPTIDE_STREAM_REJECT_OUT_OF_RANGE";
pub const ENV_NOSPAM_MS: &str = "RIPTIDE_STREAM_NOSPAM_MS";
pub const ENV_DATA_DIRS: &str = "RIPTIDE_DATA_DIRS";

/// A directory segments can be written to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataDirectory {
    pub path: PathBuf,
    /// Bytes this directory may hold, `None` for unbounded.
    pub capacity: Option<u64>,
}

impl DataDirectory {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            capacity: None,
        }
    }

    #[must_use]
    pub fn with_capacity(mut self, bytes: u64) -> Self {
        self.capacity = Some(bytes);
        self
    }

    /// Parses `path[:capacity_kib]`.
    pub fn parse(entry: &str) -> Result<Self> {
        let entry = entry.trim();
        if entry.is_empty() {
            bail!("empty data directory entry");
        }
        match entry.rsplit_once(':') {
            Some((path, kib)) if !path.is_empty() && !kib.is_empty() && kib.bytes().all(|b| b.is_ascii_digit()) => {
                let kib: u64 = kib
                    .parse()
                    .with_context(|| format!("invalid capacity in data directory {:?}", entry))?;
                let bytes = kib
                    .checked_mul(1024)
                    .with_context(|| format!("capacity overflows in data directory {:?}", entry))?;
                Ok(Self::new(path).with_capacity(bytes))
            }
            _ => Ok(Self::new(entry)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamingConfig {
    /// Emit a rate-limited warning for partitions outside the owned ranges.
    pub log_out_of_token_range_requests: bool,
    /// Fail the transfer on a partition outside the owned ranges.
    pub reject_out_of_token_range_requests: bool,
    /// At most one out-of-range warning is emitted per interval.
    pub out_of_range_log_interval: Duration,
    pub data_directories: Vec<DataDirectory>,
}

impl Default for StreamingConfig {
    fn default() -> Self {
        Self {
            log_out_of_token_range_requests: true,
            reject_out_of_token_range_requests: true,
            out_of_range_log_interval: Duration::from_secs(1),
            data_directories: vec![DataDirectory::new("data")],
        }
    }
}

impl StreamingConfig {
    /// Loads the configuration from the process environment.
    ///
    /// # Errors
    ///
    /// Returns an error naming the variable if any value fails to parse.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Loads the configuration from an arbitrary key lookup. Missing keys
    /// keep their default.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let env_or = |key: &str, default: String| lookup(key).unwrap_or(default);

        let log_out_of_token_range_requests = parse_bool(
            ENV_LOG_OUT_OF_RANGE,
            &env_or(ENV_LOG_OUT_OF_RANGE, defaults.log_out_of_token_range_requests.to_string()),
        )?;
        let reject_out_of_token_range_requests = parse_bool(
            ENV_REJECT_OUT_OF_RANGE,
            &env_or(ENV_REJECT_OUT_OF_RANGE, defaults.reject_out_of_token_range_requests.to_string()),
        )?;
        let nospam_ms: u64 = env_or(
            ENV_NOSPAM_MS,
            defaults.out_of_range_log_interval.as_millis().to_string(),
        )
        .trim()
        .parse()
        .with_context(|| format!("{} must be a number of milliseconds", ENV_NOSPAM_MS))?;

        let data_directories = match lookup(ENV_DATA_DIRS) {
            Some(raw) => raw
                .split(',')
                .map(|entry| DataDirectory::parse(entry).with_context(|| format!("invalid {}", ENV_DATA_DIRS)))
                .collect::<Result<Vec<_>>>()?,
            None => defaults.data_directories,
        };

        Ok(Self {
            log_out_of_token_range_requests,
            reject_out_of_token_range_requests,
            out_of_range_log_interval: Duration::from_millis(nospam_ms),
            data_directories,
        })
    }
}

fn parse_bool(key: &str, raw: &str) -> Result<bool> {
    raw.trim()
        .to_ascii_lowercase()
        .parse()
        .with_context(|| format!("{} must be true or false, got {:?}", key, raw))
}
