//! The per-subscription loop.
//!
//! A [`Runner`] repeatedly loads its cursor, executes an iteration and
//! persists the result, then decides how long to idle. Ordinary iteration
//! failures only delay the next pass. A panic escaping the loop terminates
//! the runner; it then reports `!running()` and keeps the panic message in
//! [`Runner::terminated_by`] until the supervisor replaces it.

use std::any::Any;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use futures::FutureExt;
use futures::future::{self, BoxFuture, Shared};
use parking_lot::Mutex;
use tokio::task::JoinError;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use logpump_common::emit;
use logpump_common::metrics::events::{
    CursorLag, IterationCompleted, IterationDuration, RunnerTerminated,
};

use super::iteration::{Executor, Iteration, IterationOutcome};
use crate::clock::ClockRef;
use crate::context::SubscriptionContext;
use crate::cursor::Cursor;
use crate::error::IterationError;
use crate::progress::ProgressStore;
use crate::record::SequenceCounters;
use crate::sink::{BatchSink, DeliveryRetry};
use crate::source::LogSource;

/// Resolves when the loop has exited: `true` for a clean exit, `false` when
/// the loop was terminated by a fault.
pub type Completion = Shared<BoxFuture<'static, bool>>;

/// Waits used by the runner loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunnerTiming {
    /// Shortest idle wait between passes that found nothing to do.
    pub min_idle_wait: Duration,
    /// Wait after a failed iteration, and between checks of a finished subscription.
    pub exception_wait: Duration,
    /// Longest single sleep; stop requests and liveness are checked in between.
    pub sleep_tick: Duration,
}

impl Default for RunnerTiming {
    fn default() -> Self {
        Self {
            min_idle_wait: Duration::from_millis(500),
            exception_wait: Duration::from_secs(120),
            sleep_tick: Duration::from_secs(1),
        }
    }
}

/// Collaborators shared by every runner of a process.
#[derive(Clone)]
pub struct RunnerServices {
    pub store: Arc<ProgressStore>,
    pub source: Arc<dyn LogSource>,
    pub sink: Arc<dyn BatchSink>,
    pub clock: ClockRef,
    pub retry: DeliveryRetry,
    pub timing: RunnerTiming,
}

struct RunnerState {
    context: Arc<SubscriptionContext>,
    services: RunnerServices,
    sequence: Arc<SequenceCounters>,
    running: AtomicBool,
    last_pass: Mutex<Instant>,
    terminated_by: Mutex<Option<String>>,
    /// Set once the supervisor has replaced this runner. A retired runner
    /// never writes the progress store again.
    retired: AtomicBool,
}

#[derive(Default)]
struct Control {
    cancel: Option<CancellationToken>,
    completion: Option<Completion>,
}

/// Owns the loop of one subscription.
pub struct Runner {
    state: Arc<RunnerState>,
    control: Mutex<Control>,
}

impl Runner {
    pub fn new(context: Arc<SubscriptionContext>, services: RunnerServices) -> Self {
        Self {
            state: Arc::new(RunnerState {
                context,
                services,
                sequence: Arc::new(SequenceCounters::new()),
                running: AtomicBool::new(false),
                last_pass: Mutex::new(Instant::now()),
                terminated_by: Mutex::new(None),
                retired: AtomicBool::new(false),
            }),
            control: Mutex::new(Control::default()),
        }
    }

    pub fn id(&self) -> &str {
        &self.state.context.id
    }

    pub fn context(&self) -> &SubscriptionContext {
        &self.state.context
    }

    /// Whether the loop task is alive.
    pub fn running(&self) -> bool {
        self.state.running.load(Ordering::Acquire)
    }

    /// Time since the loop last reached the top of a pass or a sleep tick.
    pub fn time_since_last_pass(&self) -> Duration {
        self.state.last_pass.lock().elapsed()
    }

    /// The fault that ended the last loop, if it did not exit cleanly.
    pub fn terminated_by(&self) -> Option<String> {
        self.state.terminated_by.lock().clone()
    }

    /// Give up ownership of the subscription's cursor.
    ///
    /// An iteration still in flight finishes, but its cursor is discarded.
    /// Irreversible; a replacement runner takes over the subscription.
    pub fn retire(&self) {
        if !self.state.retired.swap(true, Ordering::AcqRel) {
            debug!(target = %self.id(), "Runner retired");
        }
    }

    pub fn retired(&self) -> bool {
        self.state.retired.load(Ordering::Acquire)
    }

    /// Launch the loop. If it is already running, returns its completion.
    pub fn start(&self) -> Completion {
        self.launch(None)
    }

    /// Launch the loop for at most `passes` passes.
    pub fn start_bounded(&self, passes: u64) -> Completion {
        self.launch(Some(passes))
    }

    /// Ask the loop to exit at its next safe point.
    ///
    /// Resolves immediately if the runner is not running. Calling it again
    /// while a stop is pending returns the same completion.
    pub fn stop(&self) -> Completion {
        let control = self.control.lock();
        match (&control.cancel, &control.completion) {
            (Some(cancel), Some(completion)) if self.running() => {
                if !cancel.is_cancelled() {
                    debug!(target = %self.id(), "Stop requested");
                    cancel.cancel();
                }
                completion.clone()
            }
            _ => future::ready(true).boxed().shared(),
        }
    }

    fn launch(&self, passes: Option<u64>) -> Completion {
        let mut control = self.control.lock();
        if self.running() {
            if let Some(completion) = &control.completion {
                return completion.clone();
            }
        }

        let cancel = CancellationToken::new();
        *self.state.terminated_by.lock() = None;
        self.state.touch();
        self.state.running.store(true, Ordering::Release);

        let task = tokio::spawn(self.state.clone().run(cancel.clone(), passes));

        let state = self.state.clone();
        let watcher = tokio::spawn(async move {
            let clean = match task.await {
                Ok(()) => true,
                Err(e) => {
                    let reason = describe(e);
                    error!(target = %state.context.id, reason = %reason, "Runner terminated");
                    emit!(RunnerTerminated {
                        target: state.context.id.clone(),
                    });
                    *state.terminated_by.lock() = Some(reason);
                    false
                }
            };
            state.running.store(false, Ordering::Release);
            clean
        });

        let completion = async move { watcher.await.unwrap_or(false) }
            .boxed()
            .shared();
        control.cancel = Some(cancel);
        control.completion = Some(completion.clone());
        completion
    }
}

impl Drop for Runner {
    fn drop(&mut self) {
        if let Some(cancel) = &self.control.get_mut().cancel {
            cancel.cancel();
        }
    }
}

fn describe(error: JoinError) -> String {
    if !error.is_panic() {
        return error.to_string();
    }
    let payload: Box<dyn Any + Send> = error.into_panic();
    if let Some(message) = payload.downcast_ref::<&str>() {
        format!("panicked: {message}")
    } else if let Some(message) = payload.downcast_ref::<String>() {
        format!("panicked: {message}")
    } else {
        "panicked".to_string()
    }
}

impl RunnerState {
    fn touch(&self) {
        *self.last_pass.lock() = Instant::now();
    }

    async fn run(self: Arc<Self>, cancel: CancellationToken, passes: Option<u64>) {
        let services = &self.services;
        let executor = Executor::new(
            self.context.clone(),
            services.source.clone(),
            services.sink.clone(),
            services.retry,
            services.clock.clone(),
            self.sequence.clone(),
        );
        let target = &self.context.id;
        info!(target = %target, "Runner started");

        let mut completed: u64 = 0;
        while !cancel.is_cancelled() && passes.is_none_or(|limit| completed < limit) {
            self.touch();
            let wait = self.pass(&executor).await;
            completed += 1;

            if passes.is_some_and(|limit| completed >= limit) {
                break;
            }
            if let Some(wait) = wait {
                if !self.sleep(wait, &cancel).await {
                    break;
                }
            }
        }

        info!(target = %target, passes = completed, "Runner stopped");
    }

    /// One pass: load, execute, persist. Returns how long to idle, if at all.
    async fn pass(&self, executor: &Executor) -> Option<Duration> {
        let target = &self.context.id;
        let store = &self.services.store;

        let loaded = store.get(target);
        let started = Instant::now();
        let Iteration { cursor, outcome } = executor.execute(loaded.as_ref()).await;

        let outcome = match outcome {
            IterationOutcome::Failed(e) => IterationOutcome::Failed(e),
            outcome if loaded.as_ref() == Some(&cursor) => outcome,
            outcome => {
                let owned = || !self.retired.load(Ordering::Acquire);
                match store.set_if(target, cursor.clone(), owned).await {
                    Ok(true) => outcome,
                    Ok(false) => {
                        warn!(
                            target = %target,
                            window_start = %cursor.window_start,
                            "Runner was retired, discarding cursor"
                        );
                        outcome
                    }
                    Err(source) => IterationOutcome::Failed(IterationError::Progress { source }),
                }
            }
        };

        emit!(IterationDuration {
            duration: started.elapsed(),
            target: target.clone(),
        });
        emit!(IterationCompleted {
            status: outcome.status(),
            target: target.clone(),
        });
        let lag = (self.services.clock.now() - cursor.window_end)
            .to_std()
            .unwrap_or_default();
        emit!(CursorLag {
            lag,
            target: target.clone(),
        });

        match outcome {
            IterationOutcome::Delivered { .. } => None,
            IterationOutcome::NoWork | IterationOutcome::NotYetRunnable => {
                Some(self.idle_wait(&cursor))
            }
            IterationOutcome::Failed(e) => {
                warn!(
                    target = %target,
                    error = %e,
                    window_start = %cursor.window_start,
                    window_end = %cursor.window_end,
                    "Iteration failed"
                );
                Some(self.services.timing.exception_wait)
            }
        }
    }

    /// Until the window clears the skew cutoff, but never less than the
    /// minimum idle wait.
    fn idle_wait(&self, cursor: &Cursor) -> Duration {
        let timing = &self.services.timing;
        if self.context.is_finished_at(cursor.window_start) {
            return timing.exception_wait;
        }

        let now = self.services.clock.now();
        let ready_at = cursor.window_end + self.context.clock_skew_protection;
        (ready_at - now)
            .to_std()
            .map_or(timing.min_idle_wait, |until_ready| {
                until_ready.max(timing.min_idle_wait)
            })
    }

    /// Sleep in ticks, returning `false` if stopped before `wait` elapsed.
    async fn sleep(&self, wait: Duration, cancel: &CancellationToken) -> bool {
        let deadline = Instant::now() + wait;
        loop {
            let now = Instant::now();
            if now >= deadline {
                return true;
            }
            let tick = (deadline - now).min(self.services.timing.sleep_tick);
            if cancel
                .run_until_cancelled(tokio::time::sleep(tick))
                .await
                .is_none()
            {
                return false;
            }
            self.touch();
        }
    }
}
