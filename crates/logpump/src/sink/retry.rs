//! Delivery with bounded exponential backoff.
//!
//! Each retryable rejection waits a uniformly random time in
//! `[0, coefficient × base)` and multiplies the coefficient. Once the
//! coefficient has passed `max_coefficient` the next retryable rejection is
//! final. With the defaults (2s, ×4, 64) a sink that always answers 503 sees
//! five attempts and the longest single wait is just under 128s.

use std::time::Duration;

use rand::Rng;
use tokio::time::Instant;
use tracing::debug;

use logpump_common::emit;
use logpump_common::metrics::events::DeliveryRetried;

use super::traits::BatchSink;
use crate::context::SubscriptionContext;
use crate::error::SinkError;
use crate::record::OutputRecord;

/// Statuses that signal a temporary condition on the sink side.
pub fn is_retryable(status: u16) -> bool {
    matches!(status, 409 | 423 | 429 | 500 | 502 | 503 | 504)
}

fn is_success(status: u16) -> bool {
    (200..300).contains(&status)
}

/// Uniform wait in `[0, max)`.
fn random_wait(max: Duration) -> Duration {
    let max_ms = max.as_millis() as u64;
    if max_ms > 0 {
        Duration::from_millis(rand::rng().random_range(0..max_ms))
    } else {
        Duration::ZERO
    }
}

/// Backoff parameters for one batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeliveryRetry {
    pub base: Duration,
    pub multiplier: u32,
    pub max_coefficient: u32,
}

impl Default for DeliveryRetry {
    fn default() -> Self {
        Self {
            base: Duration::from_millis(2000),
            multiplier: 4,
            max_coefficient: 4 * 4 * 4,
        }
    }
}

/// What it took to get one batch accepted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeliveryReport {
    pub attempts: u32,
    /// Time spent in sink calls.
    pub write_time: Duration,
    /// Time spent waiting between attempts.
    pub wait_time: Duration,
}

impl DeliveryRetry {
    /// Deliver `batch` to the subscription's sink, retrying retryable statuses.
    ///
    /// Transport errors are returned as they are, without retrying.
    pub async fn deliver(
        &self,
        sink: &dyn BatchSink,
        context: &SubscriptionContext,
        batch: &[OutputRecord],
    ) -> Result<DeliveryReport, SinkError> {
        let mut report = DeliveryReport::default();
        let mut coefficient: u32 = 1;

        loop {
            report.attempts += 1;
            debug!(
                target = %context.id,
                records = batch.len(),
                attempt = report.attempts,
                "Delivering batch"
            );

            let started = Instant::now();
            let status = sink
                .deliver(&context.sink_url, context.sink_timeout, batch)
                .await?;
            report.write_time += started.elapsed();

            if is_success(status) {
                return Ok(report);
            }
            if !is_retryable(status) {
                return Err(SinkError::Rejected { status });
            }
            if coefficient > self.max_coefficient {
                return Err(SinkError::RetriesExhausted {
                    status,
                    attempts: report.attempts,
                });
            }

            let wait = random_wait(self.base * coefficient);
            debug!(
                target = %context.id,
                status,
                wait_ms = wait.as_millis() as u64,
                "Waiting before delivery retry"
            );
            emit!(DeliveryRetried {
                status,
                wait,
                target: context.id.clone(),
            });

            let started = Instant::now();
            tokio::time::sleep(wait).await;
            report.wait_time += started.elapsed();

            coefficient = coefficient.saturating_mul(self.multiplier);
        }
    }
}
