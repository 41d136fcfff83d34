//! Fetched events and the records delivered to the sink.

use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::context::SubscriptionContext;

/// One event as read from the log source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawEvent {
    pub region: String,
    pub log_group_name: String,
    pub event_id: String,
    pub ingestion_time: DateTime<Utc>,
    pub timestamp: DateTime<Utc>,
    pub log_stream_name: String,
    pub message: String,
}

/// A [`RawEvent`] tagged with its subscription and per-runner sequence numbers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OutputRecord {
    pub subscription_id: String,
    pub cloudwatch_region: String,
    pub cloudwatch_event_id: String,
    pub cloudwatch_ingestion_time: DateTime<Utc>,
    pub cloudwatch_timestamp: DateTime<Utc>,
    pub cloudwatch_log_group: String,
    pub cloudwatch_log_stream: String,
    pub cloudwatch_message: String,
    pub input_batch_seq: u64,
    pub input_event_seq: u64,
    pub output_batch_seq: u64,
    pub output_event_seq: u64,
}

/// Sequence numbers handed out by one runner. Each counter only grows.
///
/// Input counters number fetched pages and fetched events; output counters
/// number delivered batches and the events inside them. A batch that is
/// retried on a later pass gets fresh numbers.
#[derive(Debug, Default)]
pub struct SequenceCounters {
    input_batch: AtomicU64,
    input_event: AtomicU64,
    output_batch: AtomicU64,
    output_event: AtomicU64,
}

impl SequenceCounters {
    pub fn new() -> Self {
        Self::default()
    }

    fn next(counter: &AtomicU64) -> u64 {
        counter.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Shape one fetched page into sink batches of at most
    /// `context.sink_batch_size` records, preserving source order.
    pub fn batch(
        &self,
        context: &SubscriptionContext,
        events: Vec<RawEvent>,
    ) -> Vec<Vec<OutputRecord>> {
        let input_batch_seq = Self::next(&self.input_batch);
        let batch_size = context.sink_batch_size.max(1);

        let mut batches: Vec<Vec<OutputRecord>> = Vec::new();
        let mut output_batch_seq = 0;

        for event in events {
            if batches.last().is_none_or(|b| b.len() >= batch_size) {
                output_batch_seq = Self::next(&self.output_batch);
                batches.push(Vec::with_capacity(batch_size));
            }

            let record = OutputRecord {
                subscription_id: context.id.clone(),
                cloudwatch_region: event.region,
                cloudwatch_event_id: event.event_id,
                cloudwatch_ingestion_time: event.ingestion_time,
                cloudwatch_timestamp: event.timestamp,
                cloudwatch_log_group: event.log_group_name,
                cloudwatch_log_stream: event.log_stream_name,
                cloudwatch_message: event.message,
                input_batch_seq,
                input_event_seq: Self::next(&self.input_event),
                output_batch_seq,
                output_event_seq: Self::next(&self.output_event),
            };

            if let Some(batch) = batches.last_mut() {
                batch.push(record);
            }
        }

        batches
    }
}
