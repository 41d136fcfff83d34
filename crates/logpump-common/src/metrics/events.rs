//! Internal events for logpump metrics emission.
//!
//! Each event struct represents a measurable occurrence in a subscription
//! runner or the supervisor. Events implement the `InternalEvent` trait, which
//! logs at trace level and records the corresponding Prometheus metric.
//!
//! ## Target Labels
//!
//! Every per-subscription metric carries a `target` label holding the
//! subscription id, so one process can report on many subscriptions.

use metrics::{counter, gauge, histogram};
use std::time::Duration;
use tracing::trace;

/// Trait for internal events that can be emitted as metrics.
pub trait InternalEvent {
    /// Emit this event as a metric.
    fn emit(self);
}

/// How a single pump iteration ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IterationStatus {
    NotYetRunnable,
    NoWork,
    Delivered,
    Failed,
}

impl IterationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            IterationStatus::NotYetRunnable => "not_yet_runnable",
            IterationStatus::NoWork => "no_work",
            IterationStatus::Delivered => "delivered",
            IterationStatus::Failed => "failed",
        }
    }
}

/// Event emitted when an iteration finishes, whatever its outcome.
pub struct IterationCompleted {
    pub status: IterationStatus,
    pub target: String,
}

impl InternalEvent for IterationCompleted {
    fn emit(self) {
        trace!(status = self.status.as_str(), target = %self.target, "Iteration completed");
        counter!(
            "logpump_iterations_total",
            "status" => self.status.as_str(),
            "target" => self.target
        )
        .increment(1);
    }
}

/// Event emitted with the wall time of one iteration.
pub struct IterationDuration {
    pub duration: Duration,
    pub target: String,
}

impl InternalEvent for IterationDuration {
    fn emit(self) {
        trace!(duration_ms = self.duration.as_millis(), target = %self.target, "Iteration duration");
        histogram!("logpump_iteration_duration_seconds", "target" => self.target)
            .record(self.duration.as_secs_f64());
    }
}

/// Event emitted when a page of events is read from the log source.
pub struct RecordsFetched {
    pub count: u64,
    pub target: String,
}

impl InternalEvent for RecordsFetched {
    fn emit(self) {
        trace!(count = self.count, target = %self.target, "Records fetched");
        counter!("logpump_records_fetched_total", "target" => self.target).increment(self.count);
    }
}

/// Event emitted when a batch is accepted by the sink.
pub struct RecordsDelivered {
    pub count: u64,
    pub target: String,
}

impl InternalEvent for RecordsDelivered {
    fn emit(self) {
        trace!(count = self.count, target = %self.target, "Records delivered");
        counter!("logpump_records_delivered_total", "target" => self.target.clone())
            .increment(self.count);
        counter!("logpump_batches_delivered_total", "target" => self.target).increment(1);
    }
}

/// Event emitted each time a sink attempt is rejected with a retryable status.
pub struct DeliveryRetried {
    pub status: u16,
    pub wait: Duration,
    pub target: String,
}

impl InternalEvent for DeliveryRetried {
    fn emit(self) {
        trace!(
            status = self.status,
            wait_ms = self.wait.as_millis(),
            target = %self.target,
            "Delivery retried"
        );
        counter!("logpump_delivery_retries_total", "target" => self.target.clone()).increment(1);
        histogram!("logpump_delivery_retry_wait_seconds", "target" => self.target)
            .record(self.wait.as_secs_f64());
    }
}

/// Event emitted when a batch could not be delivered.
pub struct DeliveryFailed {
    pub target: String,
}

impl InternalEvent for DeliveryFailed {
    fn emit(self) {
        trace!(target = %self.target, "Delivery failed");
        counter!("logpump_delivery_failures_total", "target" => self.target).increment(1);
    }
}

/// Event emitted when a read from the log source fails.
pub struct SourceFailed {
    pub target: String,
}

impl InternalEvent for SourceFailed {
    fn emit(self) {
        trace!(target = %self.target, "Source read failed");
        counter!("logpump_source_failures_total", "target" => self.target).increment(1);
    }
}

/// Event emitted when a changed cursor is persisted.
pub struct CursorSaved {
    pub target: String,
}

impl InternalEvent for CursorSaved {
    fn emit(self) {
        trace!(target = %self.target, "Cursor saved");
        counter!("logpump_cursor_saves_total", "target" => self.target).increment(1);
    }
}

/// Gauge for how far the cursor's window end trails the wall clock.
pub struct CursorLag {
    pub lag: Duration,
    pub target: String,
}

impl InternalEvent for CursorLag {
    fn emit(self) {
        trace!(lag_secs = self.lag.as_secs(), target = %self.target, "Cursor lag");
        gauge!("logpump_cursor_lag_seconds", "target" => self.target).set(self.lag.as_secs_f64());
    }
}

/// Why the supervisor replaced a runner.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecycleReason {
    Terminated,
    Unresponsive,
    Requested,
}

impl RecycleReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecycleReason::Terminated => "terminated",
            RecycleReason::Unresponsive => "unresponsive",
            RecycleReason::Requested => "requested",
        }
    }
}

/// Event emitted when the supervisor swaps in a fresh runner.
pub struct RunnerRecycled {
    pub reason: RecycleReason,
    pub target: String,
}

impl InternalEvent for RunnerRecycled {
    fn emit(self) {
        trace!(reason = self.reason.as_str(), target = %self.target, "Runner recycled");
        counter!(
            "logpump_runner_recycles_total",
            "reason" => self.reason.as_str(),
            "target" => self.target
        )
        .increment(1);
    }
}

/// Event emitted when a runner's loop dies from a fault.
pub struct RunnerTerminated {
    pub target: String,
}

impl InternalEvent for RunnerTerminated {
    fn emit(self) {
        trace!(target = %self.target, "Runner terminated");
        counter!("logpump_runner_terminations_total", "target" => self.target).increment(1);
    }
}

/// Gauge for the number of runners currently registered.
pub struct ActiveRunners {
    pub count: usize,
}

impl InternalEvent for ActiveRunners {
    fn emit(self) {
        trace!(count = self.count, "Active runners");
        gauge!("logpump_active_runners").set(self.count as f64);
    }
}
