//! Configuration types for bangumi-dl

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::{path::Path, path::PathBuf, time::Duration};

/// Main configuration for the acquisition pipeline
///
/// Fields are organized into sub-configs, one per pipeline component:
/// - [`persistence`](PersistenceConfig) - store location
/// - [`submission`](SubmissionConfig) - queue draining and agent login
/// - [`hash_check`](HashCheckConfig) - candidate identifier resolution
/// - [`progress`](ProgressConfig) - transfer polling
/// - [`rename`](RenameConfig) - rename triggering and the reconciliation sweep
/// - [`scheduler`](SchedulerConfig) - periodic job bookkeeping
/// - [`events`](EventConfig) - event bus buffering
///
/// Every field has a default, so an empty JSON object is a valid config.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Config {
    /// Data storage settings
    #[serde(default)]
    pub persistence: PersistenceConfig,

    /// Submission controller settings
    #[serde(default)]
    pub submission: SubmissionConfig,

    /// Hash resolution monitor settings
    #[serde(default)]
    pub hash_check: HashCheckConfig,

    /// Progress monitor settings
    #[serde(default)]
    pub progress: ProgressConfig,

    /// Rename trigger settings
    #[serde(default)]
    pub rename: RenameConfig,

    /// Task scheduler settings
    #[serde(default)]
    pub scheduler: SchedulerConfig,

    /// Event bus settings
    #[serde(default)]
    pub events: EventConfig,
}

impl Config {
    /// Load a configuration from a JSON file
    ///
    /// Missing fields fall back to their defaults. The loaded config is
    /// validated before it is returned.
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| Error::Config {
            message: format!("failed to read config file '{}': {}", path.display(), e),
            key: None,
        })?;
        let config: Config = serde_json::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings that would stall or busy-loop the pipeline
    pub fn validate(&self) -> Result<()> {
        if self.submission.batch_size == 0 {
            return Err(invalid("submission.batch_size", "batch size must be at least 1"));
        }
        if self.submission.interval.is_zero() {
            return Err(invalid("submission.interval", "interval must be non-zero"));
        }
        if self.submission.login_retry_interval.is_zero() {
            return Err(invalid(
                "submission.login_retry_interval",
                "interval must be non-zero",
            ));
        }
        if self.hash_check.probe_retry.max_attempts == 0 {
            return Err(invalid(
                "hash_check.probe_retry.max_attempts",
                "at least one probe attempt is required",
            ));
        }
        if self.progress.fallback_interval.is_zero() {
            return Err(invalid("progress.fallback_interval", "interval must be non-zero"));
        }
        if self.rename.enabled && self.rename.sweep_interval.is_zero() {
            return Err(invalid("rename.sweep_interval", "interval must be non-zero"));
        }
        if self.events.channel_capacity == 0 {
            return Err(invalid(
                "events.channel_capacity",
                "channel capacity must be at least 1",
            ));
        }
        Ok(())
    }
}

fn invalid(key: &str, message: &str) -> Error {
    Error::Config {
        message: message.to_string(),
        key: Some(key.to_string()),
    }
}

/// Data storage configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PersistenceConfig {
    /// Database path (default: "./bangumi-dl.db")
    #[serde(default = "default_database_path")]
    pub database_path: PathBuf,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
        }
    }
}

/// Submission controller configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SubmissionConfig {
    /// How often the controller drains the queue (default: 10 seconds)
    #[serde(default = "default_submission_interval", with = "duration_serde")]
    pub interval: Duration,

    /// Maximum items submitted per cycle (default: 5)
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Delay between background login attempts (default: 30 seconds)
    #[serde(default = "default_login_retry_interval", with = "duration_serde")]
    pub login_retry_interval: Duration,
}

impl Default for SubmissionConfig {
    fn default() -> Self {
        Self {
            interval: default_submission_interval(),
            batch_size: default_batch_size(),
            login_retry_interval: default_login_retry_interval(),
        }
    }
}

/// Hash resolution monitor configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct HashCheckConfig {
    /// Wait before the first probe so the agent can register the submission (default: 5 seconds)
    #[serde(default = "default_grace_period", with = "duration_serde")]
    pub grace_period: Duration,

    /// Retry policy applied to each candidate probe
    #[serde(default = "default_probe_retry")]
    pub probe_retry: RetryConfig,
}

impl Default for HashCheckConfig {
    fn default() -> Self {
        Self {
            grace_period: default_grace_period(),
            probe_retry: default_probe_retry(),
        }
    }
}

/// Progress monitor configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ProgressConfig {
    /// Wait before the first poll of a newly started transfer (default: 60 seconds)
    #[serde(default = "default_start_delay", with = "duration_serde")]
    pub start_delay: Duration,

    /// Poll interval when the agent reports no ETA or a probe fails (default: 60 seconds)
    #[serde(default = "default_fallback_interval", with = "duration_serde")]
    pub fallback_interval: Duration,
}

impl Default for ProgressConfig {
    fn default() -> Self {
        Self {
            start_delay: default_start_delay(),
            fallback_interval: default_fallback_interval(),
        }
    }
}

/// Rename trigger configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RenameConfig {
    /// Whether completed downloads are renamed at all (default: true)
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// How often to sweep for downloaded items that were never renamed (default: 10 minutes)
    #[serde(default = "default_sweep_interval", with = "duration_serde")]
    pub sweep_interval: Duration,
}

impl Default for RenameConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            sweep_interval: default_sweep_interval(),
        }
    }
}

/// Task scheduler configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Consecutive failures after which a job is reported as persistently failing (default: 3)
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
        }
    }
}

/// Event bus configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EventConfig {
    /// Capacity of the dispatch queue and the observer buffer (default: 1000)
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
}

impl Default for EventConfig {
    fn default() -> Self {
        Self {
            channel_capacity: default_channel_capacity(),
        }
    }
}

/// Retry configuration for transient failures
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Total number of attempts, including the first one (default: 3)
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Delay before the first retry (default: 10 seconds)
    #[serde(default = "default_initial_delay", with = "duration_serde")]
    pub initial_delay: Duration,

    /// Maximum delay between retries (default: 10 seconds)
    #[serde(default = "default_max_delay", with = "duration_serde")]
    pub max_delay: Duration,

    /// Multiplier for exponential backoff (default: 1.0, a fixed delay)
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,

    /// Add random jitter to delays (default: false)
    #[serde(default)]
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_delay: default_initial_delay(),
            max_delay: default_max_delay(),
            backoff_multiplier: default_backoff_multiplier(),
            jitter: false,
        }
    }
}

// Default value functions
fn default_database_path() -> PathBuf {
    PathBuf::from("bangumi-dl.db")
}

fn default_submission_interval() -> Duration {
    Duration::from_secs(10)
}

fn default_batch_size() -> usize {
    5
}

fn default_login_retry_interval() -> Duration {
    Duration::from_secs(30)
}

fn default_grace_period() -> Duration {
    Duration::from_secs(5)
}

fn default_probe_retry() -> RetryConfig {
    RetryConfig::default()
}

fn default_start_delay() -> Duration {
    Duration::from_secs(60)
}

fn default_fallback_interval() -> Duration {
    Duration::from_secs(60)
}

fn default_true() -> bool {
    true
}

fn default_sweep_interval() -> Duration {
    Duration::from_secs(10 * 60)
}

fn default_max_retries() -> u32 {
    3
}

fn default_channel_capacity() -> usize {
    1000
}

fn default_max_attempts() -> u32 {
    3
}

fn default_initial_delay() -> Duration {
    Duration::from_secs(10)
}

fn default_max_delay() -> Duration {
    Duration::from_secs(10)
}

fn default_backoff_multiplier() -> f64 {
    1.0
}

// Duration serialization helper, whole seconds
pub(crate) mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}
