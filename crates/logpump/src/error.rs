//! Error types for the pump engine and its collaborators.

use snafu::prelude::*;
use std::path::PathBuf;

// Re-export common errors
pub use logpump_common::error::{ConfigError, MetricsError, SetupError};

/// Errors that can occur while reading a page from the log source.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum SourceError {
    /// The source answered with a non-success status.
    #[snafu(display("Log source unavailable: status {status}"))]
    Unavailable { status: u16 },

    /// The request never produced a response.
    #[snafu(display("Log source request failed: {source}"))]
    Transport { source: reqwest::Error },

    /// The response body was not a valid page.
    #[snafu(display("Failed to decode log source response: {source}"))]
    Decode { source: reqwest::Error },

    /// An event carried a millisecond timestamp outside the representable range.
    #[snafu(display("Event {event_id} has out of range {field}: {millis}"))]
    InvalidTimestamp {
        event_id: String,
        field: &'static str,
        millis: i64,
    },
}

/// Errors that can occur while delivering a batch to the sink.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub), module)]
pub enum SinkError {
    /// The sink rejected the batch with a status that is not worth retrying.
    #[snafu(display("Sink rejected batch with status {status}"))]
    Rejected { status: u16 },

    /// The sink kept answering with a retryable status until the backoff ceiling.
    #[snafu(display("Sink still answering {status} after {attempts} attempts"))]
    RetriesExhausted { status: u16, attempts: u32 },

    /// The batch could not be encoded.
    #[snafu(display("Failed to serialize batch: {source}"))]
    Serialize { source: serde_json::Error },

    /// The request never produced a response.
    #[snafu(display("Sink request failed: {source}"))]
    Transport { source: reqwest::Error },
}

/// Errors that can occur in the durable progress store.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum ProgressError {
    /// Failed to create the progress directory.
    #[snafu(display("Failed to create progress directory {}: {source}", path.display()))]
    CreateDir {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Failed to write or replace a cursor file.
    #[snafu(display("Failed to write cursor file {}: {source}", path.display()))]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Failed to read an existing cursor file.
    #[snafu(display("Failed to read cursor file {}: {source}", path.display()))]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    /// A cursor file exists but its contents are not a cursor.
    #[snafu(display("Corrupt cursor file {}: {reason}", path.display()))]
    Corrupt { path: PathBuf, reason: String },
}

/// Why a single iteration failed. The runner backs off and retries the
/// same window on its next pass.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum IterationError {
    /// Reading the window failed.
    #[snafu(display("Read failed: {source}"))]
    Source { source: SourceError },

    /// Delivering a batch failed.
    #[snafu(display("Delivery failed: {source}"))]
    Sink { source: SinkError },

    /// Persisting the new cursor failed.
    #[snafu(display("Cursor write failed: {source}"))]
    Progress { source: ProgressError },
}

/// Process-fatal supervisor failures.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum SupervisorError {
    /// The sweep task ended without being asked to.
    #[snafu(display("Supervisor sweep task failed: {source}"))]
    SweepFailed { source: tokio::task::JoinError },

    /// The sweep loop returned while the supervisor was still running.
    #[snafu(display("Supervisor sweep loop exited unexpectedly"))]
    SweepExited,
}
