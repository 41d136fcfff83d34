//! logpump: continuously pump log events from a time-windowed, paginated
//! log source into an HTTP sink.
//!
//! This crate handles:
//! - Computing the next read window per subscription (clock-skew protection,
//!   min/max interval clamping, final partial windows, token continuation)
//! - Running one iteration loop per subscription with backoff on failure
//! - Supervising runners and recycling dead or hung ones
//! - Persisting cursors durably so restarts resume where they left off

pub mod clock;
pub mod config;
pub mod context;
pub mod cursor;
pub mod error;
pub mod progress;
pub mod pump;
pub mod record;
pub mod sink;
pub mod source;

// Re-export commonly used items
pub use clock::{Clock, ClockRef, ManualClock, SystemClock};
pub use config::{Config, SubscriptionKey};
pub use context::{SourceSelector, StreamFilter, SubscriptionContext};
pub use cursor::Cursor;
pub use error::{IterationError, ProgressError, SinkError, SourceError, SupervisorError};
pub use progress::ProgressStore;
pub use pump::{
    Executor, Iteration, IterationOutcome, Runner, RunnerServices, RunnerTiming, Supervisor,
    SupervisorTiming,
};
pub use record::{OutputRecord, RawEvent, SequenceCounters};
pub use sink::{BatchSink, DeliveryRetry, HttpSink};
pub use source::{FetchPage, FetchRequest, HttpLogSource, LogSource};

// Re-export from logpump-common
pub use logpump_common::{
    CliArgs, ConfigError, ConfigPath, MetricsConfig, SetupError, init_tracing, shutdown_signal,
    start_metrics,
};
