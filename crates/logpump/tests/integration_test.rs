//! End-to-end tests of the pump engine through the public API.
//!
//! Sources and sinks are in-process fakes; time runs on tokio's paused clock
//! and a `ManualClock` for window arithmetic.
//!
//! Run with: cargo test -p logpump --test integration_test

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use parking_lot::Mutex;

use logpump::{
    BatchSink, Cursor, DeliveryRetry, Executor, FetchPage, FetchRequest, IterationOutcome,
    LogSource, ManualClock, OutputRecord, ProgressStore, RawEvent, RunnerServices, RunnerTiming,
    SequenceCounters, SinkError, SourceError, SourceSelector, SubscriptionContext, Supervisor,
    SupervisorTiming,
};

fn t0() -> DateTime<Utc> {
    DateTime::from_timestamp(1_700_000_000, 0).unwrap()
}

fn context(id: &str) -> SubscriptionContext {
    let mut ctx =
        SubscriptionContext::new(id, SourceSelector::group("/app/prod"), t0(), "http://sink");
    ctx.region = "us-east-1".to_string();
    ctx.min_interval = TimeDelta::seconds(5);
    ctx.max_interval = TimeDelta::seconds(60);
    ctx.clock_skew_protection = TimeDelta::seconds(15);
    ctx
}

fn event(n: usize) -> RawEvent {
    RawEvent {
        region: "us-east-1".to_string(),
        log_group_name: "/app/prod".to_string(),
        event_id: format!("evt-{n}"),
        ingestion_time: t0(),
        timestamp: t0(),
        log_stream_name: "web-1".to_string(),
        message: format!("message {n}"),
    }
}

fn page(events: usize, next_token: Option<&str>) -> FetchPage {
    FetchPage {
        events: (0..events).map(event).collect(),
        next_token: next_token.map(str::to_string),
    }
}

/// Serves scripted pages, then empty ones, and records each request.
#[derive(Default)]
struct ScriptedSource {
    pages: Mutex<VecDeque<FetchPage>>,
    requests: Mutex<Vec<(DateTime<Utc>, DateTime<Utc>, Option<String>)>>,
}

impl ScriptedSource {
    fn new(pages: Vec<FetchPage>) -> Self {
        Self {
            pages: Mutex::new(pages.into()),
            requests: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl LogSource for ScriptedSource {
    async fn fetch(&self, request: &FetchRequest<'_>) -> Result<FetchPage, SourceError> {
        self.requests.lock().push((
            request.window_start,
            request.window_end,
            request.token.map(str::to_string),
        ));
        Ok(self.pages.lock().pop_front().unwrap_or_default())
    }
}

/// Never answers.
#[derive(Default)]
struct HangingSource {
    calls: AtomicUsize,
}

#[async_trait]
impl LogSource for HangingSource {
    async fn fetch(&self, _: &FetchRequest<'_>) -> Result<FetchPage, SourceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        std::future::pending().await
    }
}

/// Holds its first fetch until the gate opens. Every fetch serves one event.
#[derive(Default)]
struct GatedSource {
    gate: tokio::sync::Notify,
    calls: AtomicUsize,
}

#[async_trait]
impl LogSource for GatedSource {
    async fn fetch(&self, _: &FetchRequest<'_>) -> Result<FetchPage, SourceError> {
        if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
            self.gate.notified().await;
        }
        Ok(page(1, None))
    }
}

/// Panics on the first call, then serves empty pages.
#[derive(Default)]
struct PanicOnceSource {
    calls: AtomicUsize,
}

#[async_trait]
impl LogSource for PanicOnceSource {
    async fn fetch(&self, _: &FetchRequest<'_>) -> Result<FetchPage, SourceError> {
        if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
            panic!("source exploded");
        }
        Ok(FetchPage::default())
    }
}

/// Answers with scripted statuses, then 200, and counts attempts.
#[derive(Default)]
struct ScriptedSink {
    statuses: Mutex<VecDeque<u16>>,
    repeat: Option<u16>,
    attempts: AtomicUsize,
    accepted: Mutex<Vec<Vec<OutputRecord>>>,
}

impl ScriptedSink {
    fn answering(statuses: &[u16]) -> Self {
        Self {
            statuses: Mutex::new(statuses.iter().copied().collect()),
            ..Self::default()
        }
    }

    fn always(status: u16) -> Self {
        Self {
            repeat: Some(status),
            ..Self::default()
        }
    }

    fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BatchSink for ScriptedSink {
    async fn deliver(
        &self,
        _url: &str,
        _timeout: Duration,
        batch: &[OutputRecord],
    ) -> Result<u16, SinkError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let status = self
            .repeat
            .or_else(|| self.statuses.lock().pop_front())
            .unwrap_or(200);
        if (200..300).contains(&status) {
            self.accepted.lock().push(batch.to_vec());
        }
        Ok(status)
    }
}

fn executor(
    ctx: SubscriptionContext,
    source: Arc<dyn LogSource>,
    sink: Arc<dyn BatchSink>,
    clock: Arc<ManualClock>,
) -> Executor {
    Executor::new(
        Arc::new(ctx),
        source,
        sink,
        DeliveryRetry::default(),
        clock,
        Arc::new(SequenceCounters::new()),
    )
}

fn services(source: Arc<dyn LogSource>, sink: Arc<dyn BatchSink>) -> RunnerServices {
    RunnerServices {
        store: Arc::new(ProgressStore::in_memory()),
        source,
        sink,
        clock: Arc::new(ManualClock::new(t0() + TimeDelta::seconds(100))),
        retry: DeliveryRetry::default(),
        timing: RunnerTiming::default(),
    }
}

#[tokio::test(start_paused = true)]
async fn test_first_window_is_capped_and_next_window_is_contiguous() {
    let source = Arc::new(ScriptedSource::new(vec![page(3, None)]));
    let sink = Arc::new(ScriptedSink::default());
    let clock = Arc::new(ManualClock::new(t0() + TimeDelta::seconds(100)));
    let exec = executor(context("app"), source.clone(), sink.clone(), clock);

    let first = exec.execute(None).await;

    assert!(matches!(first.outcome, IterationOutcome::Delivered { count: 3 }));
    let requests = source.requests.lock().clone();
    assert_eq!(requests, vec![(t0(), t0() + TimeDelta::seconds(60), None)]);

    let next = first.cursor;
    assert_eq!(next.window_start, t0() + TimeDelta::milliseconds(60_001));
    assert_eq!(next.window_end, t0() + TimeDelta::seconds(85));
    assert!(!next.has_token());

    let records: Vec<_> = sink.accepted.lock().iter().flatten().cloned().collect();
    assert_eq!(records.len(), 3);
    assert!(records.iter().all(|r| r.subscription_id == "app"));
    assert_eq!(records[2].output_event_seq, 3);
}

#[tokio::test(start_paused = true)]
async fn test_continuation_token_rereads_same_window() {
    let source = Arc::new(ScriptedSource::new(vec![
        page(5, Some("tok-1")),
        page(1, None),
    ]));
    let sink = Arc::new(ScriptedSink::default());
    let clock = Arc::new(ManualClock::new(t0() + TimeDelta::seconds(100)));
    let exec = executor(context("app"), source.clone(), sink.clone(), clock);

    let first = exec.execute(None).await;
    assert_eq!(first.cursor.window_start, t0());
    assert_eq!(first.cursor.window_end, t0() + TimeDelta::seconds(60));
    assert_eq!(first.cursor.continuation_token.as_deref(), Some("tok-1"));

    let second = exec.execute(Some(&first.cursor)).await;
    assert!(matches!(second.outcome, IterationOutcome::Delivered { count: 1 }));
    assert_eq!(
        second.cursor.window_start,
        t0() + TimeDelta::milliseconds(60_001)
    );

    let requests = source.requests.lock().clone();
    assert_eq!(requests.len(), 2);
    assert_eq!(requests[1].0, t0());
    assert_eq!(requests[1].1, t0() + TimeDelta::seconds(60));
    assert_eq!(requests[1].2.as_deref(), Some("tok-1"));
}

#[tokio::test(start_paused = true)]
async fn test_recent_window_waits_for_clock_skew() {
    let source = Arc::new(ScriptedSource::default());
    let sink = Arc::new(ScriptedSink::default());
    // Cutoff T0+4 is one second short of the minimum window end T0+5.
    let clock = Arc::new(ManualClock::new(t0() + TimeDelta::seconds(19)));
    let exec = executor(context("app"), source.clone(), sink, clock.clone());

    let early = exec.execute(None).await;
    assert!(matches!(early.outcome, IterationOutcome::NotYetRunnable));
    assert!(source.requests.lock().is_empty());

    clock.advance(TimeDelta::seconds(1));
    let ready = exec.execute(Some(&early.cursor)).await;
    assert!(matches!(ready.outcome, IterationOutcome::NoWork));
    assert_eq!(source.requests.lock().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_retryable_statuses_are_retried_until_accepted() {
    let source = Arc::new(ScriptedSource::new(vec![page(1, None)]));
    let sink = Arc::new(ScriptedSink::answering(&[429, 429, 200]));
    let clock = Arc::new(ManualClock::new(t0() + TimeDelta::seconds(100)));
    let exec = executor(context("app"), source, sink.clone(), clock);

    let started = tokio::time::Instant::now();
    let iteration = exec.execute(None).await;
    let waited = started.elapsed();

    assert!(matches!(iteration.outcome, IterationOutcome::Delivered { count: 1 }));
    assert_eq!(
        iteration.cursor.window_start,
        t0() + TimeDelta::milliseconds(60_001)
    );
    assert_eq!(sink.attempts(), 3);
    assert_eq!(sink.accepted.lock().len(), 1);
    // First wait below 2s, second below 8s.
    assert!(waited < Duration::from_secs(10), "{waited:?}");
}

#[tokio::test(start_paused = true)]
async fn test_always_unavailable_sink_gives_up_after_five_attempts() {
    let sink = ScriptedSink::always(503);
    let ctx = context("app");
    let batch: Vec<OutputRecord> = SequenceCounters::new()
        .batch(&ctx, vec![event(1)])
        .into_iter()
        .flatten()
        .collect();

    let err = DeliveryRetry::default()
        .deliver(&sink, &ctx, &batch)
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        SinkError::RetriesExhausted {
            status: 503,
            attempts: 5
        }
    ));
    assert_eq!(sink.attempts(), 5);
}

#[tokio::test(start_paused = true)]
async fn test_failed_delivery_is_retried_from_same_window() {
    let source = Arc::new(ScriptedSource::new(vec![page(1, None), page(1, None)]));
    let sink = Arc::new(ScriptedSink::answering(&[400]));
    let clock = Arc::new(ManualClock::new(t0() + TimeDelta::seconds(100)));
    let exec = executor(context("app"), source.clone(), sink.clone(), clock);

    let failed = exec.execute(None).await;
    assert!(matches!(failed.outcome, IterationOutcome::Failed(_)));
    assert_eq!(failed.cursor.window_start, t0());

    // The caller keeps the old cursor, so the same window is read again.
    let retried = exec.execute(None).await;
    assert!(matches!(retried.outcome, IterationOutcome::Delivered { count: 1 }));

    let requests = source.requests.lock().clone();
    assert_eq!(requests[0], requests[1]);
}

#[tokio::test(start_paused = true)]
async fn test_recycle_does_not_wait_for_hung_runner() {
    let source = Arc::new(HangingSource::default());
    let sup = Supervisor::new(
        [context("app")],
        services(source.clone(), Arc::new(ScriptedSink::default())),
        SupervisorTiming::default(),
    );
    sup.start_all();
    tokio::time::sleep(Duration::from_millis(10)).await;

    let old = sup.runner("app").unwrap();
    assert!(old.running());
    assert_eq!(source.calls.load(Ordering::SeqCst), 1);

    let fresh = sup.recycle("app").unwrap();

    assert!(Arc::ptr_eq(&fresh, &sup.runner("app").unwrap()));
    assert!(!Arc::ptr_eq(&fresh, &old));
    assert!(fresh.running());
    // Still stuck in its fetch; the stop request is pending, not awaited.
    assert!(old.running());
}

#[tokio::test(start_paused = true)]
async fn test_recycled_runner_does_not_overwrite_successor_cursor() {
    let store = Arc::new(ProgressStore::in_memory());
    let source = Arc::new(GatedSource::default());
    let mut services = services(source.clone(), Arc::new(ScriptedSink::default()));
    services.store = store.clone();
    let sup = Supervisor::new([context("app")], services, SupervisorTiming::default());

    sup.start_all();
    tokio::time::sleep(Duration::from_millis(10)).await;
    let old = sup.runner("app").unwrap();
    assert_eq!(source.calls.load(Ordering::SeqCst), 1);

    sup.recycle("app").unwrap();
    tokio::time::sleep(Duration::from_secs(5)).await;

    // The successor read the first two windows and is idling on the third.
    let before = store.get("app").unwrap();
    assert_eq!(
        before.window_start,
        t0() + TimeDelta::milliseconds(85_001)
    );

    // The old runner's first window completes now.
    source.gate.notify_one();
    tokio::time::sleep(Duration::from_millis(10)).await;

    assert_eq!(store.get("app"), Some(before));
    assert!(old.retired());
    assert!(!old.running());
    assert!(!sup.runner("app").unwrap().retired());

    sup.stop_all().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_sweep_recycles_hung_runner() {
    let timing = SupervisorTiming {
        sweep_interval: Duration::from_secs(1),
        unresponsive_after: Duration::from_secs(5),
    };
    let source = Arc::new(HangingSource::default());
    let sup = Supervisor::new(
        [context("app")],
        services(source.clone(), Arc::new(ScriptedSink::default())),
        timing,
    );
    sup.start_all();
    tokio::time::sleep(Duration::from_millis(10)).await;
    let old = sup.runner("app").unwrap();

    tokio::time::sleep(Duration::from_secs(3)).await;
    assert!(Arc::ptr_eq(&old, &sup.runner("app").unwrap()));

    tokio::time::sleep(Duration::from_secs(4)).await;
    let current = sup.runner("app").unwrap();
    assert!(!Arc::ptr_eq(&old, &current));
    assert!(source.calls.load(Ordering::SeqCst) >= 2);
}

#[tokio::test(start_paused = true)]
async fn test_sweep_replaces_panicked_runner() {
    let timing = SupervisorTiming {
        sweep_interval: Duration::from_secs(1),
        unresponsive_after: Duration::from_secs(60),
    };
    let source = Arc::new(PanicOnceSource::default());
    let sup = Supervisor::new(
        [context("app")],
        services(source.clone(), Arc::new(ScriptedSink::default())),
        timing,
    );
    sup.start_all();
    tokio::time::sleep(Duration::from_millis(10)).await;

    let crashed = sup.runner("app").unwrap();
    assert!(!crashed.running());
    let reason = crashed.terminated_by().unwrap();
    assert!(reason.contains("source exploded"), "{reason}");

    tokio::time::sleep(Duration::from_millis(1500)).await;

    let healed = sup.runner("app").unwrap();
    assert!(!Arc::ptr_eq(&crashed, &healed));
    assert!(healed.running());
    assert!(healed.terminated_by().is_none());
    assert!(source.calls.load(Ordering::SeqCst) >= 2);

    sup.stop_all().await.unwrap();
    assert!(!healed.running());
}

#[tokio::test(start_paused = true)]
async fn test_runner_progress_survives_restart() {
    let dir = tempfile::TempDir::new().unwrap();
    let store = Arc::new(ProgressStore::new(Some(dir.path().to_path_buf())));
    let source = Arc::new(ScriptedSource::new(vec![page(2, None)]));
    let mut services = services(source, Arc::new(ScriptedSink::default()));
    services.store = store.clone();

    let runner = logpump::Runner::new(Arc::new(context("app")), services);
    assert!(runner.start_bounded(1).await);

    let saved = store.get("app").unwrap();
    assert_eq!(
        saved,
        Cursor::new(
            t0() + TimeDelta::milliseconds(60_001),
            t0() + TimeDelta::seconds(85),
            None
        )
    );

    let reopened = ProgressStore::new(Some(dir.path().to_path_buf()));
    assert_eq!(reopened.load_all(["app", "other"]).await.unwrap(), 1);
    assert_eq!(reopened.get("app"), Some(saved));
    assert_eq!(reopened.get("other"), None);
}

#[tokio::test(start_paused = true)]
async fn test_supervisor_run_stops_on_shutdown() {
    let source = Arc::new(ScriptedSource::default());
    let sup = Supervisor::new(
        [context("a"), context("b")],
        services(source, Arc::new(ScriptedSink::default())),
        SupervisorTiming::default(),
    );

    sup.run(tokio::time::sleep(Duration::from_secs(90)))
        .await
        .unwrap();

    assert!(!sup.runner("a").unwrap().running());
    assert!(!sup.runner("b").unwrap().running());
}
