//! Configuration for the log pump.
//!
//! A config is a set of keyed subscriptions plus process-wide sections
//! (`progress`, `metrics`, `timing`). Several YAML documents can be merged;
//! the subscription map of each must not repeat an id seen in another.

mod subscription_key;

pub use subscription_key::{MAX_ID_LEN, SubscriptionKey};

use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use snafu::ResultExt;

use logpump_common::error::YamlParseSnafu;
use logpump_common::{ConfigError, ConfigPath, Mergeable, MetricsConfig, load_from_paths};

use crate::context::{
    CLOCK_SKEW_BOUNDS_SECS, DEFAULT_CLOCK_SKEW_SECS, DEFAULT_MAX_INTERVAL_SECS,
    DEFAULT_MIN_INTERVAL_SECS, DEFAULT_READ_PAGE_SIZE, DEFAULT_SINK_BATCH_SIZE,
    DEFAULT_SINK_TIMEOUT_SECS, MAX_INTERVAL_CEILING_SECS, MAX_READ_PAGE_SIZE,
    MIN_INTERVAL_BOUNDS_SECS, SINK_TIMEOUT_BOUNDS_SECS, SourceSelector, StreamFilter,
    SubscriptionContext,
};
use crate::pump::{RunnerTiming, SupervisorTiming};

/// Where cursors are persisted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProgressConfig {
    /// Directory holding one cursor file per subscription. Without it,
    /// progress is kept in memory only and lost on restart.
    #[serde(default)]
    pub path: Option<PathBuf>,
}

/// Engine timing overrides. Unset values keep the built-in defaults.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TimingConfig {
    pub unresponsive_after_secs: Option<u64>,
    pub sweep_interval_secs: Option<u64>,
    pub exception_wait_ms: Option<u64>,
    pub min_idle_wait_ms: Option<u64>,
}

impl TimingConfig {
    fn merge_from(&mut self, other: Self) {
        if other.unresponsive_after_secs.is_some() {
            self.unresponsive_after_secs = other.unresponsive_after_secs;
        }
        if other.sweep_interval_secs.is_some() {
            self.sweep_interval_secs = other.sweep_interval_secs;
        }
        if other.exception_wait_ms.is_some() {
            self.exception_wait_ms = other.exception_wait_ms;
        }
        if other.min_idle_wait_ms.is_some() {
            self.min_idle_wait_ms = other.min_idle_wait_ms;
        }
    }
}

/// One subscription as written in the config file.
///
/// Everything is optional at this level so that validation can report
/// every missing field at once, with the subscription id attached.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SubscriptionConfig {
    pub aws_region: Option<String>,
    pub log_group_name: Option<String>,
    /// Base URL of the log API. Derived from the region when absent.
    pub source_endpoint: Option<String>,

    pub start_time_iso: Option<String>,
    pub start_time_seconds_ago: Option<i64>,
    pub end_time_iso: Option<String>,
    pub end_time_seconds_ago: Option<i64>,

    pub filter_pattern: Option<String>,
    pub log_stream_name_prefix: Option<String>,
    pub log_stream_names: Option<Vec<String>>,
    pub read_max_batch_size: Option<u32>,
    pub min_interval_seconds: Option<i64>,
    pub max_interval_seconds: Option<i64>,
    pub clock_skew_protection_seconds: Option<i64>,

    pub target_url: Option<String>,
    pub target_timeout_seconds: Option<u64>,
    pub target_max_batch_size: Option<usize>,
}

/// Root configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default)]
    pub progress: ProgressConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
    #[serde(default)]
    pub timing: TimingConfig,
    #[serde(default)]
    pub subscriptions: IndexMap<SubscriptionKey, SubscriptionConfig>,
}

impl Mergeable for Config {
    type Key = SubscriptionKey;
    type Component = SubscriptionConfig;

    fn components_mut(&mut self) -> &mut IndexMap<SubscriptionKey, SubscriptionConfig> {
        &mut self.subscriptions
    }

    fn parse_yaml(contents: &str) -> Result<Self, ConfigError> {
        serde_yaml::from_str(contents).context(YamlParseSnafu)
    }

    fn merge_sections(&mut self, other: Self) {
        if other.progress.path.is_some() {
            self.progress.path = other.progress.path;
        }
        self.metrics.merge_from(other.metrics);
        self.timing.merge_from(other.timing);
    }
}

impl Config {
    /// Load and merge every config file and directory.
    pub fn from_paths(paths: &[ConfigPath]) -> Result<Self, ConfigError> {
        load_from_paths(paths)
    }

    /// Parse a single YAML document.
    pub fn parse(contents: &str) -> Result<Self, ConfigError> {
        Self::parse_yaml(contents)
    }

    pub fn subscription_count(&self) -> usize {
        self.subscriptions.len()
    }

    /// Progress directory, treating an empty path as absent.
    pub fn progress_path(&self) -> Option<PathBuf> {
        self.progress
            .path
            .clone()
            .filter(|path| !path.as_os_str().is_empty())
    }

    pub fn runner_timing(&self) -> RunnerTiming {
        let defaults = RunnerTiming::default();
        RunnerTiming {
            min_idle_wait: self
                .timing
                .min_idle_wait_ms
                .map_or(defaults.min_idle_wait, Duration::from_millis),
            exception_wait: self
                .timing
                .exception_wait_ms
                .map_or(defaults.exception_wait, Duration::from_millis),
            ..defaults
        }
    }

    pub fn supervisor_timing(&self) -> SupervisorTiming {
        let defaults = SupervisorTiming::default();
        SupervisorTiming {
            sweep_interval: self
                .timing
                .sweep_interval_secs
                .filter(|secs| *secs > 0)
                .map_or(defaults.sweep_interval, Duration::from_secs),
            unresponsive_after: self
                .timing
                .unresponsive_after_secs
                .map_or(defaults.unresponsive_after, Duration::from_secs),
        }
    }

    /// Validate every subscription and resolve it into a runner context.
    ///
    /// Relative start and end times are taken relative to `now`. All
    /// validation failures are reported together.
    pub fn subscription_contexts(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<SubscriptionContext>, ConfigError> {
        if self.subscriptions.is_empty() {
            return Err(ConfigError::NoSubscriptions);
        }

        let mut contexts = Vec::with_capacity(self.subscriptions.len());
        let mut errors = Vec::new();

        for (key, subscription) in &self.subscriptions {
            match subscription.resolve(key, now) {
                Ok(context) => contexts.push(context),
                Err(e) => errors.push(e),
            }
        }

        match errors.len() {
            0 => Ok(contexts),
            1 => Err(errors.remove(0)),
            _ => Err(ConfigError::MultipleErrors {
                errors: errors.iter().map(ToString::to_string).collect(),
            }),
        }
    }
}

fn invalid(id: &str, message: impl Into<String>) -> ConfigError {
    ConfigError::InvalidSubscription {
        id: id.to_string(),
        message: message.into(),
    }
}

/// Trimmed value, or `None` when absent or blank.
fn non_blank(value: Option<&String>) -> Option<String> {
    value
        .map(|v| v.trim())
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

fn required(id: &str, value: Option<&String>, field: &str) -> Result<String, ConfigError> {
    non_blank(value).ok_or_else(|| invalid(id, format!("{field} is required")))
}

fn absolute_or_relative(
    id: &str,
    absolute: Option<&String>,
    field: &str,
    seconds_ago: Option<i64>,
    now: DateTime<Utc>,
) -> Result<Option<DateTime<Utc>>, ConfigError> {
    if let Some(value) = non_blank(absolute) {
        let parsed = DateTime::parse_from_rfc3339(&value).map_err(|_| ConfigError::InvalidTime {
            id: id.to_string(),
            value: value.clone(),
        })?;
        return Ok(Some(parsed.with_timezone(&Utc)));
    }
    let Some(secs) = seconds_ago else {
        return Ok(None);
    };
    TimeDelta::try_seconds(secs)
        .and_then(|ago| now.checked_sub_signed(ago))
        .map(Some)
        .ok_or_else(|| invalid(id, format!("{field} is out of range: {secs}")))
}

impl SubscriptionConfig {
    fn resolve(
        &self,
        key: &SubscriptionKey,
        now: DateTime<Utc>,
    ) -> Result<SubscriptionContext, ConfigError> {
        let id = key.id();
        key.validate().map_err(|message| invalid(id, message))?;

        let sink_url = required(id, self.target_url.as_ref(), "target_url")?;
        let region = required(id, self.aws_region.as_ref(), "aws_region")?;
        let log_group_name = required(id, self.log_group_name.as_ref(), "log_group_name")?;

        if non_blank(self.start_time_iso.as_ref()).is_some()
            && self.start_time_seconds_ago.is_some()
        {
            return Err(invalid(
                id,
                "start_time_iso and start_time_seconds_ago cannot both be set",
            ));
        }
        if non_blank(self.end_time_iso.as_ref()).is_some() && self.end_time_seconds_ago.is_some() {
            return Err(invalid(
                id,
                "end_time_iso and end_time_seconds_ago cannot both be set",
            ));
        }

        let names: Vec<String> = self
            .log_stream_names
            .iter()
            .flatten()
            .filter_map(|name| non_blank(Some(name)))
            .collect();
        let prefix = non_blank(self.log_stream_name_prefix.as_ref());
        let streams = match (names.is_empty(), prefix) {
            (true, None) => StreamFilter::All,
            (false, None) => StreamFilter::Names(names),
            (true, Some(prefix)) => StreamFilter::Prefix(prefix),
            (false, Some(_)) => {
                return Err(invalid(
                    id,
                    "log_stream_names and log_stream_name_prefix cannot both be set",
                ));
            }
        };

        let start = absolute_or_relative(
            id,
            self.start_time_iso.as_ref(),
            "start_time_seconds_ago",
            self.start_time_seconds_ago,
            now,
        )?
        .unwrap_or(now);
        let end = absolute_or_relative(
            id,
            self.end_time_iso.as_ref(),
            "end_time_seconds_ago",
            self.end_time_seconds_ago,
            now,
        )?;
        if end.is_some_and(|end| end < start) {
            return Err(invalid(id, "end time is before start time"));
        }

        let min_interval = self
            .min_interval_seconds
            .unwrap_or(DEFAULT_MIN_INTERVAL_SECS)
            .clamp(MIN_INTERVAL_BOUNDS_SECS.0, MIN_INTERVAL_BOUNDS_SECS.1);
        let max_interval = self
            .max_interval_seconds
            .unwrap_or(DEFAULT_MAX_INTERVAL_SECS)
            .clamp(min_interval, MAX_INTERVAL_CEILING_SECS);
        let clock_skew = self
            .clock_skew_protection_seconds
            .unwrap_or(DEFAULT_CLOCK_SKEW_SECS)
            .clamp(CLOCK_SKEW_BOUNDS_SECS.0, CLOCK_SKEW_BOUNDS_SECS.1);
        let sink_timeout = self
            .target_timeout_seconds
            .unwrap_or(DEFAULT_SINK_TIMEOUT_SECS)
            .clamp(SINK_TIMEOUT_BOUNDS_SECS.0, SINK_TIMEOUT_BOUNDS_SECS.1);

        let source_endpoint = non_blank(self.source_endpoint.as_ref())
            .unwrap_or_else(|| format!("https://logs.{region}.amazonaws.com"));

        Ok(SubscriptionContext {
            id: id.to_string(),
            region,
            source_endpoint,
            selector: SourceSelector {
                log_group_name,
                streams,
            },
            filter_pattern: non_blank(self.filter_pattern.as_ref()),
            start,
            end,
            min_interval: TimeDelta::seconds(min_interval),
            max_interval: TimeDelta::seconds(max_interval),
            clock_skew_protection: TimeDelta::seconds(clock_skew),
            read_page_size: self
                .read_max_batch_size
                .unwrap_or(DEFAULT_READ_PAGE_SIZE)
                .clamp(1, MAX_READ_PAGE_SIZE),
            sink_url,
            sink_batch_size: self
                .target_max_batch_size
                .unwrap_or(DEFAULT_SINK_BATCH_SIZE)
                .max(1),
            sink_timeout: Duration::from_secs(sink_timeout),
        })
    }
}
