//! Sync settings
//!
//! Run-level configuration loaded from YAML. Every field has a default so an
//! empty document is a valid configuration. Durations are written as
//! `<n><unit>` where unit is one of `s`, `m`, `h`, `d`, `w`.

use crate::error::{Error, Result};
use crate::http::RetryPolicy;
use crate::types::{BackoffType, SyncMode};
use chrono::Duration;
use serde::{Deserialize, Serialize};
use std::path::Path;

// ============================================================================
// Top-Level Settings
// ============================================================================

/// Complete sync settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncSettings {
    /// Requested sync mode
    pub mode: SyncMode,

    /// Maximum partitions processed concurrently
    pub concurrency: usize,

    /// Abort remaining partitions on the first partition failure
    pub fail_fast: bool,

    /// Persist the cutoff after every page (ascending feeds only)
    pub checkpoint_per_page: bool,

    /// Retry and timeout policy for collaborator calls
    pub retry: RetryConfig,

    /// Shared request-rate ceiling for one upstream
    pub rate_limit: Option<RateLimitConfig>,

    /// Export job windows and throttling
    pub export_jobs: ExportJobConfig,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            mode: SyncMode::Incremental,
            concurrency: 4,
            fail_fast: false,
            checkpoint_per_page: false,
            retry: RetryConfig::default(),
            rate_limit: None,
            export_jobs: ExportJobConfig::default(),
        }
    }
}

impl SyncSettings {
    /// Create default settings
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse settings from a YAML string
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let settings: Self = serde_yaml::from_str(yaml)
            .map_err(|e| Error::config(format!("Failed to parse settings YAML: {e}")))?;
        settings.validate()?;
        Ok(settings)
    }

    /// Load settings from a YAML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::config(format!(
                "Failed to read settings file '{}': {e}",
                path.display()
            ))
        })?;
        Self::from_yaml(&content)
    }

    /// Set the sync mode
    #[must_use]
    pub fn with_mode(mut self, mode: SyncMode) -> Self {
        self.mode = mode;
        self
    }

    /// Set concurrency
    #[must_use]
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    /// Set fail fast mode
    #[must_use]
    pub fn with_fail_fast(mut self, fail_fast: bool) -> Self {
        self.fail_fast = fail_fast;
        self
    }

    /// Persist the cutoff after each page
    #[must_use]
    pub fn with_checkpoint_per_page(mut self, enabled: bool) -> Self {
        self.checkpoint_per_page = enabled;
        self
    }

    /// Set retry config
    #[must_use]
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Set export job config
    #[must_use]
    pub fn with_export_jobs(mut self, export_jobs: ExportJobConfig) -> Self {
        self.export_jobs = export_jobs;
        self
    }

    /// Validate settings before any network call is made
    pub fn validate(&self) -> Result<()> {
        if self.concurrency == 0 {
            return Err(Error::invalid_value("concurrency", "must be at least 1"));
        }
        self.retry.validate()?;
        if let Some(rate_limit) = &self.rate_limit {
            if rate_limit.requests_per_second == 0 {
                return Err(Error::invalid_value(
                    "rate_limit.requests_per_second",
                    "must be at least 1",
                ));
            }
        }
        self.export_jobs.validate()
    }
}

// ============================================================================
// Retry Config
// ============================================================================

/// Retry ladder configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Retries per counter (rate limit and transient counted separately)
    pub max_attempts: u32,
    /// First backoff delay
    #[serde(with = "duration_str")]
    pub initial_backoff: Duration,
    /// Backoff ceiling
    #[serde(with = "duration_str")]
    pub max_backoff: Duration,
    /// Backoff growth
    pub backoff: BackoffType,
    /// Timeout for one collaborator call
    #[serde(with = "duration_str")]
    pub request_timeout: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::seconds(1),
            max_backoff: Duration::seconds(60),
            backoff: BackoffType::Exponential,
            request_timeout: Duration::seconds(30),
        }
    }
}

impl RetryConfig {
    fn validate(&self) -> Result<()> {
        if self.max_attempts == 0 {
            return Err(Error::invalid_value("retry.max_attempts", "must be at least 1"));
        }
        if self.initial_backoff < Duration::zero() || self.max_backoff < self.initial_backoff {
            return Err(Error::invalid_value(
                "retry.max_backoff",
                "must be >= initial_backoff >= 0",
            ));
        }
        if self.request_timeout <= Duration::zero() {
            return Err(Error::invalid_value("retry.request_timeout", "must be positive"));
        }
        Ok(())
    }

    /// Build the retry policy described by this config
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_attempts)
            .with_backoff(
                self.backoff,
                self.initial_backoff.to_std().unwrap_or_default(),
                self.max_backoff.to_std().unwrap_or_default(),
            )
            .with_timeout(self.request_timeout.to_std().unwrap_or_default())
    }
}

// ============================================================================
// Rate Limit Config
// ============================================================================

/// Token bucket settings for one upstream
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Sustained request rate
    pub requests_per_second: u32,
    /// Bucket size
    #[serde(default = "default_burst")]
    pub burst_size: u32,
}

fn default_burst() -> u32 {
    1
}


// ============================================================================
// Export Job Config
// ============================================================================

/// Longest accepted export window, lookback, gap or staleness threshold
pub const MAX_EXPORT_SPAN_DAYS: i64 = 36_500;

/// Window and throttling parameters for async export jobs
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExportJobConfig {
    /// Largest window the upstream accepts for one export
    #[serde(with = "duration_str")]
    pub max_window: Duration,
    /// Minimum time between a completed window's end and the next job
    #[serde(with = "duration_str")]
    pub min_gap: Duration,
    /// Pending jobs older than this are abandoned
    #[serde(with = "duration_str")]
    pub stale_after: Duration,
    /// How far back the first job reaches
    #[serde(with = "duration_str")]
    pub lookback: Duration,
    /// Polls per run before yielding the current status
    pub max_polls_per_run: u32,
    /// Delay between in-run polls
    #[serde(with = "duration_str")]
    pub poll_interval: Duration,
}

impl Default for ExportJobConfig {
    fn default() -> Self {
        Self {
            max_window: Duration::days(30),
            min_gap: Duration::hours(24),
            stale_after: Duration::days(7),
            lookback: Duration::days(30),
            max_polls_per_run: 1,
            poll_interval: Duration::seconds(5),
        }
    }
}

impl ExportJobConfig {
    /// Set max window
    #[must_use]
    pub fn with_max_window(mut self, window: Duration) -> Self {
        self.max_window = window;
        self
    }

    /// Set min gap
    #[must_use]
    pub fn with_min_gap(mut self, gap: Duration) -> Self {
        self.min_gap = gap;
        self
    }

    /// Set staleness threshold
    #[must_use]
    pub fn with_stale_after(mut self, stale_after: Duration) -> Self {
        self.stale_after = stale_after;
        self
    }

    /// Set lookback
    #[must_use]
    pub fn with_lookback(mut self, lookback: Duration) -> Self {
        self.lookback = lookback;
        self
    }

    /// Set in-run polling
    #[must_use]
    pub fn with_polling(mut self, max_polls_per_run: u32, poll_interval: Duration) -> Self {
        self.max_polls_per_run = max_polls_per_run;
        self.poll_interval = poll_interval;
        self
    }

    /// Validate window parameters
    ///
    /// Spans are bounded by [`MAX_EXPORT_SPAN_DAYS`] so window arithmetic
    /// stays inside the representable date range.
    pub fn validate(&self) -> Result<()> {
        let limit = Duration::days(MAX_EXPORT_SPAN_DAYS);
        for (field, value) in [
            ("export_jobs.max_window", self.max_window),
            ("export_jobs.lookback", self.lookback),
            ("export_jobs.min_gap", self.min_gap),
            ("export_jobs.stale_after", self.stale_after),
        ] {
            if value > limit {
                return Err(Error::invalid_value(
                    field,
                    format!("must not exceed {MAX_EXPORT_SPAN_DAYS}d"),
                ));
            }
        }
        if self.max_window <= Duration::zero() {
            return Err(Error::invalid_value(
                "export_jobs.max_window",
                "must be positive",
            ));
        }
        if self.lookback <= Duration::zero() {
            return Err(Error::invalid_value("export_jobs.lookback", "must be positive"));
        }
        if self.min_gap < Duration::zero() {
            return Err(Error::invalid_value(
                "export_jobs.min_gap",
                "must not be negative",
            ));
        }
        if self.stale_after <= Duration::zero() {
            return Err(Error::invalid_value(
                "export_jobs.stale_after",
                "must be positive",
            ));
        }
        if self.max_polls_per_run == 0 {
            return Err(Error::invalid_value(
                "export_jobs.max_polls_per_run",
                "must be at least 1",
            ));
        }
        Ok(())
    }
}

// ============================================================================
// Duration Parsing
// ============================================================================

/// Parse a duration string like "1d", "2h", "30m"
pub fn parse_duration(s: &str) -> Result<Duration> {
    let s = s.trim();

    let (num_str, suffix) = if let Some(stripped) = s.strip_suffix("ms") {
        (stripped, "ms")
    } else if let Some(stripped) = s.strip_suffix('d') {
        (stripped, "d")
    } else if let Some(stripped) = s.strip_suffix('h') {
        (stripped, "h")
    } else if let Some(stripped) = s.strip_suffix('m') {
        (stripped, "m")
    } else if let Some(stripped) = s.strip_suffix('s') {
        (stripped, "s")
    } else if let Some(stripped) = s.strip_suffix('w') {
        (stripped, "w")
    } else {
        // Bare numbers are seconds
        (s, "s")
    };

    let num: i64 = num_str
        .trim()
        .parse()
        .map_err(|_| Error::config(format!("Invalid duration number: {num_str}")))?;

    let duration = match suffix {
        "w" => Duration::try_weeks(num),
        "d" => Duration::try_days(num),
        "h" => Duration::try_hours(num),
        "m" => Duration::try_minutes(num),
        "s" => Duration::try_seconds(num),
        "ms" => Duration::try_milliseconds(num),
        _ => return Err(Error::config(format!("Invalid duration suffix: {suffix}"))),
    };

    duration.ok_or_else(|| Error::invalid_value("duration", format!("{s} is out of range")))
}

/// Render a duration in the largest whole unit
pub fn format_duration(d: &Duration) -> String {
    let secs = d.num_seconds();
    if d.num_milliseconds() % 1000 != 0 {
        format!("{}ms", d.num_milliseconds())
    } else if secs != 0 && secs % 604_800 == 0 {
        format!("{}w", secs / 604_800)
    } else if secs != 0 && secs % 86_400 == 0 {
        format!("{}d", secs / 86_400)
    } else if secs != 0 && secs % 3_600 == 0 {
        format!("{}h", secs / 3_600)
    } else if secs != 0 && secs % 60 == 0 {
        format!("{}m", secs / 60)
    } else {
        format!("{secs}s")
    }
}

/// Serde adapter for duration strings
pub mod duration_str {
    use super::{format_duration, parse_duration};
    use chrono::Duration;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&format_duration(d))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let raw = String::deserialize(deserializer)?;
        parse_duration(&raw).map_err(serde::de::Error::custom)
    }
}
