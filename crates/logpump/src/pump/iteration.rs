//! One fetch, batch and deliver cycle for a subscription.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, info};

use logpump_common::emit;
use logpump_common::metrics::events::{
    DeliveryFailed, IterationStatus, RecordsDelivered, RecordsFetched, SourceFailed,
};

use crate::clock::ClockRef;
use crate::context::SubscriptionContext;
use crate::cursor::{Cursor, cursor_after_read, is_runnable, window_before_read};
use crate::error::IterationError;
use crate::record::SequenceCounters;
use crate::sink::{BatchSink, DeliveryRetry};
use crate::source::{FetchRequest, LogSource};

/// How an iteration ended.
#[derive(Debug)]
pub enum IterationOutcome {
    /// The window is still too recent (or past the subscription end). No I/O happened.
    NotYetRunnable,
    /// The window was read and held no events.
    NoWork,
    /// Every batch of the page was accepted.
    Delivered { count: usize },
    /// The read or a delivery failed; the cursor must not be persisted.
    Failed(IterationError),
}

impl IterationOutcome {
    pub fn status(&self) -> IterationStatus {
        match self {
            IterationOutcome::NotYetRunnable => IterationStatus::NotYetRunnable,
            IterationOutcome::NoWork => IterationStatus::NoWork,
            IterationOutcome::Delivered { .. } => IterationStatus::Delivered,
            IterationOutcome::Failed(_) => IterationStatus::Failed,
        }
    }
}

/// Result of [`Executor::execute`].
///
/// For `Failed` the cursor is the window that was attempted, so the caller can
/// log it; it is not an advance.
#[derive(Debug)]
pub struct Iteration {
    pub cursor: Cursor,
    pub outcome: IterationOutcome,
}

/// Runs iterations for one subscription.
pub struct Executor {
    context: Arc<SubscriptionContext>,
    source: Arc<dyn LogSource>,
    sink: Arc<dyn BatchSink>,
    retry: DeliveryRetry,
    clock: ClockRef,
    sequence: Arc<SequenceCounters>,
}

impl Executor {
    pub fn new(
        context: Arc<SubscriptionContext>,
        source: Arc<dyn LogSource>,
        sink: Arc<dyn BatchSink>,
        retry: DeliveryRetry,
        clock: ClockRef,
        sequence: Arc<SequenceCounters>,
    ) -> Self {
        Self {
            context,
            source,
            sink,
            retry,
            clock,
            sequence,
        }
    }

    pub fn context(&self) -> &SubscriptionContext {
        &self.context
    }

    /// Read the next window after `cursor` and deliver what it holds.
    ///
    /// The returned cursor is only an advance once every batch has been
    /// accepted. Batches delivered before a failure are sent again when the
    /// window is retried.
    pub async fn execute(&self, cursor: Option<&Cursor>) -> Iteration {
        let ctx = self.context.as_ref();
        let target = &ctx.id;

        let now = self.clock.now();
        let before = window_before_read(ctx, cursor, now);
        if !is_runnable(ctx, &before, now) {
            debug!(
                target = %target,
                window_end = %before.window_end,
                "Window not yet runnable"
            );
            return Iteration {
                cursor: before,
                outcome: IterationOutcome::NotYetRunnable,
            };
        }

        let read_started = Instant::now();
        let page = match self.source.fetch(&FetchRequest::for_cursor(ctx, &before)).await {
            Ok(page) => page,
            Err(source) => {
                emit!(SourceFailed {
                    target: target.clone(),
                });
                return Iteration {
                    cursor: before,
                    outcome: IterationOutcome::Failed(IterationError::Source { source }),
                };
            }
        };
        let read_time = read_started.elapsed();

        let fetched = page.events.len();
        emit!(RecordsFetched {
            count: fetched as u64,
            target: target.clone(),
        });

        // Computed before delivery so the cutoff matches the read.
        let after = cursor_after_read(ctx, &before, page.next_token, self.clock.now());

        let mut write_time = Duration::ZERO;
        let mut wait_time = Duration::ZERO;
        let mut delivered = 0;

        for batch in self.sequence.batch(ctx, page.events) {
            match self.retry.deliver(self.sink.as_ref(), ctx, &batch).await {
                Ok(report) => {
                    write_time += report.write_time;
                    wait_time += report.wait_time;
                    delivered += batch.len();
                    emit!(RecordsDelivered {
                        count: batch.len() as u64,
                        target: target.clone(),
                    });
                }
                Err(source) => {
                    emit!(DeliveryFailed {
                        target: target.clone(),
                    });
                    return Iteration {
                        cursor: before,
                        outcome: IterationOutcome::Failed(IterationError::Sink { source }),
                    };
                }
            }
        }

        info!(
            target = %target,
            window_start = %before.window_start,
            window_end = %before.window_end,
            records = delivered,
            more_pages = after.has_token(),
            read_ms = read_time.as_millis() as u64,
            write_ms = write_time.as_millis() as u64,
            wait_ms = wait_time.as_millis() as u64,
            "Iteration finished"
        );

        let outcome = if fetched == 0 {
            IterationOutcome::NoWork
        } else {
            IterationOutcome::Delivered { count: delivered }
        };
        Iteration {
            cursor: after,
            outcome,
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::context::SourceSelector;
    use crate::error::{SinkError, SourceError};
    use crate::record::OutputRecord;
    use crate::record::tests::raw_event;
    use crate::source::FetchPage;
    use async_trait::async_trait;
    use chrono::{DateTime, TimeDelta, Utc};
    use parking_lot::Mutex;
    use std::collections::VecDeque;

    /// What a [`FakeSource`] was asked for.
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub(crate) struct SeenRequest {
        pub window_start: DateTime<Utc>,
        pub window_end: DateTime<Utc>,
        pub token: Option<String>,
    }

    /// Serves queued pages, then empty pages.
    #[derive(Default)]
    pub(crate) struct FakeSource {
        pages: Mutex<VecDeque<Result<FetchPage, u16>>>,
        pub seen: Mutex<Vec<SeenRequest>>,
    }

    impl FakeSource {
        pub(crate) fn with_pages(pages: Vec<Result<FetchPage, u16>>) -> Self {
            Self {
                pages: Mutex::new(pages.into()),
                seen: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl LogSource for FakeSource {
        async fn fetch(&self, request: &FetchRequest<'_>) -> Result<FetchPage, SourceError> {
            self.seen.lock().push(SeenRequest {
                window_start: request.window_start,
                window_end: request.window_end,
                token: request.token.map(str::to_string),
            });
            match self.pages.lock().pop_front() {
                Some(Ok(page)) => Ok(page),
                Some(Err(status)) => Err(SourceError::Unavailable { status }),
                None => Ok(FetchPage::default()),
            }
        }
    }

    /// Answers every batch with the same status and keeps what it accepted.
    pub(crate) struct RecordingSink {
        status: u16,
        pub accepted: Mutex<Vec<Vec<OutputRecord>>>,
    }

    impl RecordingSink {
        pub(crate) fn answering(status: u16) -> Self {
            Self {
                status,
                accepted: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl BatchSink for RecordingSink {
        async fn deliver(
            &self,
            _: &str,
            _: Duration,
            batch: &[OutputRecord],
        ) -> Result<u16, SinkError> {
            if (200..300).contains(&self.status) {
                self.accepted.lock().push(batch.to_vec());
            }
            Ok(self.status)
        }
    }

    pub(crate) fn t0() -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000, 0).unwrap()
    }

    pub(crate) fn context(id: &str) -> SubscriptionContext {
        let mut ctx =
            SubscriptionContext::new(id, SourceSelector::group("/app/prod"), t0(), "http://sink");
        ctx.min_interval = TimeDelta::seconds(5);
        ctx.max_interval = TimeDelta::seconds(60);
        ctx.clock_skew_protection = TimeDelta::seconds(15);
        ctx.sink_batch_size = 2;
        ctx
    }

    pub(crate) fn page(events: usize, next_token: Option<&str>) -> FetchPage {
        FetchPage {
            events: (0..events).map(raw_event).collect(),
            next_token: next_token.map(str::to_string),
        }
    }

    fn executor(
        source: Arc<FakeSource>,
        sink: Arc<RecordingSink>,
        now: DateTime<Utc>,
    ) -> Executor {
        Executor::new(
            Arc::new(context("iter-test")),
            source,
            sink,
            DeliveryRetry::default(),
            Arc::new(ManualClock::new(now)),
            Arc::new(SequenceCounters::new()),
        )
    }

    #[tokio::test]
    async fn test_not_runnable_does_no_io() {
        let source = Arc::new(FakeSource::default());
        let sink = Arc::new(RecordingSink::answering(200));
        let exec = executor(source.clone(), sink, t0() + TimeDelta::seconds(10));

        let iteration = exec.execute(None).await;

        assert!(matches!(iteration.outcome, IterationOutcome::NotYetRunnable));
        assert_eq!(iteration.cursor.window_end, t0() + TimeDelta::seconds(5));
        assert!(source.seen.lock().is_empty());
    }

    #[tokio::test]
    async fn test_empty_window_still_advances() {
        let source = Arc::new(FakeSource::default());
        let sink = Arc::new(RecordingSink::answering(200));
        let exec = executor(source, sink.clone(), t0() + TimeDelta::seconds(100));

        let iteration = exec.execute(None).await;

        assert!(matches!(iteration.outcome, IterationOutcome::NoWork));
        assert_eq!(
            iteration.cursor.window_start,
            t0() + TimeDelta::milliseconds(60_001)
        );
        assert!(sink.accepted.lock().is_empty());
    }

    #[tokio::test]
    async fn test_delivers_in_batches() {
        let source = Arc::new(FakeSource::with_pages(vec![Ok(page(5, None))]));
        let sink = Arc::new(RecordingSink::answering(200));
        let exec = executor(source, sink.clone(), t0() + TimeDelta::seconds(100));

        let iteration = exec.execute(None).await;

        assert!(matches!(
            iteration.outcome,
            IterationOutcome::Delivered { count: 5 }
        ));
        let sizes: Vec<_> = sink.accepted.lock().iter().map(Vec::len).collect();
        assert_eq!(sizes, vec![2, 2, 1]);
    }

    #[tokio::test]
    async fn test_source_failure_keeps_window() {
        let source = Arc::new(FakeSource::with_pages(vec![Err(500)]));
        let sink = Arc::new(RecordingSink::answering(200));
        let exec = executor(source, sink, t0() + TimeDelta::seconds(100));

        let iteration = exec.execute(None).await;

        assert!(matches!(
            iteration.outcome,
            IterationOutcome::Failed(IterationError::Source {
                source: SourceError::Unavailable { status: 500 }
            })
        ));
        assert_eq!(iteration.cursor.window_start, t0());
    }

    #[tokio::test]
    async fn test_rejected_batch_fails_iteration() {
        let source = Arc::new(FakeSource::with_pages(vec![Ok(page(3, None))]));
        let sink = Arc::new(RecordingSink::answering(400));
        let exec = executor(source, sink, t0() + TimeDelta::seconds(100));

        let iteration = exec.execute(None).await;

        assert!(matches!(
            iteration.outcome,
            IterationOutcome::Failed(IterationError::Sink {
                source: SinkError::Rejected { status: 400 }
            })
        ));
        assert_eq!(iteration.cursor.window_start, t0());
        assert_eq!(iteration.outcome.status(), IterationStatus::Failed);
    }

    #[tokio::test]
    async fn test_token_is_passed_to_next_fetch() {
        let source = Arc::new(FakeSource::with_pages(vec![Ok(page(5, Some("tok-1")))]));
        let sink = Arc::new(RecordingSink::answering(200));
        let exec = executor(source.clone(), sink, t0() + TimeDelta::seconds(100));

        let first = exec.execute(None).await;
        assert_eq!(first.cursor.continuation_token.as_deref(), Some("tok-1"));
        assert_eq!(first.cursor.window_start, t0());
        assert_eq!(first.cursor.window_end, t0() + TimeDelta::seconds(60));

        let second = exec.execute(Some(&first.cursor)).await;
        assert!(matches!(second.outcome, IterationOutcome::NoWork));

        let seen = source.seen.lock();
        assert_eq!(seen[1].token.as_deref(), Some("tok-1"));
        assert_eq!(seen[1].window_start, seen[0].window_start);
        assert_eq!(seen[1].window_end, seen[0].window_end);
    }
}
