//! Fully resolved subscription settings handed to the pump engine.

use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};

pub const DEFAULT_READ_PAGE_SIZE: u32 = 10_000;
pub const MAX_READ_PAGE_SIZE: u32 = 10_000;

pub const DEFAULT_MIN_INTERVAL_SECS: i64 = 15;
pub const MIN_INTERVAL_BOUNDS_SECS: (i64, i64) = (5, 10 * 60);

pub const DEFAULT_MAX_INTERVAL_SECS: i64 = 60;
/// Upper bound for the max interval. The lower bound is the min interval.
pub const MAX_INTERVAL_CEILING_SECS: i64 = 8 * 60 * 60;

pub const DEFAULT_CLOCK_SKEW_SECS: i64 = 15;
pub const CLOCK_SKEW_BOUNDS_SECS: (i64, i64) = (5, 120);

pub const DEFAULT_SINK_BATCH_SIZE: usize = 500;

pub const DEFAULT_SINK_TIMEOUT_SECS: u64 = 60;
pub const SINK_TIMEOUT_BOUNDS_SECS: (u64, u64) = (1, 15 * 60);

/// Which streams of a log group are read.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum StreamFilter {
    #[default]
    All,
    Names(Vec<String>),
    Prefix(String),
}

/// Where events are read from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceSelector {
    pub log_group_name: String,
    pub streams: StreamFilter,
}

impl SourceSelector {
    pub fn group(log_group_name: impl Into<String>) -> Self {
        Self {
            log_group_name: log_group_name.into(),
            streams: StreamFilter::All,
        }
    }
}

/// Everything a runner needs to know about one subscription.
///
/// Immutable for the lifetime of a runner. Interval and timeout values are
/// already clamped to their supported bounds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionContext {
    pub id: String,
    pub region: String,
    /// Base URL of the log source API for this subscription.
    pub source_endpoint: String,
    pub selector: SourceSelector,
    pub filter_pattern: Option<String>,
    pub start: DateTime<Utc>,
    /// Inclusive end of the whole subscription. `None` follows the log forever.
    pub end: Option<DateTime<Utc>>,
    pub min_interval: TimeDelta,
    pub max_interval: TimeDelta,
    pub clock_skew_protection: TimeDelta,
    pub read_page_size: u32,
    pub sink_url: String,
    pub sink_batch_size: usize,
    pub sink_timeout: Duration,
}

impl SubscriptionContext {
    /// A context with default intervals, page sizes and timeouts.
    pub fn new(
        id: impl Into<String>,
        selector: SourceSelector,
        start: DateTime<Utc>,
        sink_url: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            region: String::new(),
            source_endpoint: String::new(),
            selector,
            filter_pattern: None,
            start,
            end: None,
            min_interval: TimeDelta::seconds(DEFAULT_MIN_INTERVAL_SECS),
            max_interval: TimeDelta::seconds(DEFAULT_MAX_INTERVAL_SECS),
            clock_skew_protection: TimeDelta::seconds(DEFAULT_CLOCK_SKEW_SECS),
            read_page_size: DEFAULT_READ_PAGE_SIZE,
            sink_url: sink_url.into(),
            sink_batch_size: DEFAULT_SINK_BATCH_SIZE,
            sink_timeout: Duration::from_secs(DEFAULT_SINK_TIMEOUT_SECS),
        }
    }

    /// `now` minus the clock-skew margin: nothing later than this is read.
    pub fn cutoff(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now - self.clock_skew_protection
    }

    /// True once the subscription has read past its configured end.
    pub fn is_finished_at(&self, window_start: DateTime<Utc>) -> bool {
        self.end.is_some_and(|end| window_start > end)
    }
}
