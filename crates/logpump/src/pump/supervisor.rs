//! Runner registry with periodic health sweeps.
//!
//! The supervisor keeps exactly one registered runner per subscription. Every
//! sweep interval it starts missing runners and recycles ones that have
//! terminated or stopped reporting progress. Recycling replaces the map entry
//! first and only then asks the old runner to stop, so the registry never
//! points at a runner that is being retired.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use parking_lot::Mutex;
use snafu::ResultExt;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use logpump_common::emit;
use logpump_common::metrics::events::{ActiveRunners, RecycleReason, RunnerRecycled};

use super::runner::{Runner, RunnerServices};
use crate::context::SubscriptionContext;
use crate::error::{SupervisorError, SweepFailedSnafu};

/// How often runners are inspected and when a silent runner counts as hung.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SupervisorTiming {
    pub sweep_interval: Duration,
    pub unresponsive_after: Duration,
}

impl Default for SupervisorTiming {
    fn default() -> Self {
        Self {
            sweep_interval: Duration::from_secs(30),
            unresponsive_after: Duration::from_secs(20 * 60),
        }
    }
}

struct Registry {
    contexts: Vec<Arc<SubscriptionContext>>,
    services: RunnerServices,
    timing: SupervisorTiming,
    runners: Mutex<HashMap<String, Arc<Runner>>>,
}

enum Verdict {
    Create,
    Recycle(RecycleReason),
}

impl Registry {
    fn spawn_runner(&self, context: &Arc<SubscriptionContext>) -> Arc<Runner> {
        let runner = Arc::new(Runner::new(context.clone(), self.services.clone()));
        drop(runner.start());
        runner
    }

    fn ensure_started(&self, context: &Arc<SubscriptionContext>) -> Arc<Runner> {
        let mut runners = self.runners.lock();
        let runner = runners
            .entry(context.id.clone())
            .or_insert_with(|| self.spawn_runner(context))
            .clone();
        drop(runner.start());
        runner
    }

    /// Swap in a fresh runner under the caller's lock and retire the old one.
    fn replace(
        &self,
        runners: &mut HashMap<String, Arc<Runner>>,
        context: &Arc<SubscriptionContext>,
        reason: RecycleReason,
    ) -> Arc<Runner> {
        if let Some(old) = runners.get(&context.id) {
            old.retire();
        }
        let fresh = self.spawn_runner(context);
        let old = runners.insert(context.id.clone(), fresh.clone());

        warn!(target = %context.id, reason = reason.as_str(), "Recycled runner");
        emit!(RunnerRecycled {
            reason,
            target: context.id.clone(),
        });

        if let Some(old) = old.filter(|old| old.running()) {
            // May never resolve for a hung runner.
            drop(old.stop());
        }
        fresh
    }

    fn recycle(&self, id: &str, reason: RecycleReason) -> Option<Arc<Runner>> {
        let context = self.contexts.iter().find(|c| c.id == id)?;
        let mut runners = self.runners.lock();
        Some(self.replace(&mut runners, context, reason))
    }

    fn sweep(&self) {
        let mut runners = self.runners.lock();
        for context in &self.contexts {
            let verdict = match runners.get(&context.id) {
                None => Verdict::Create,
                Some(runner) if !runner.running() => Verdict::Recycle(RecycleReason::Terminated),
                Some(runner) if runner.time_since_last_pass() > self.timing.unresponsive_after => {
                    Verdict::Recycle(RecycleReason::Unresponsive)
                }
                Some(_) => continue,
            };

            match verdict {
                Verdict::Create => {
                    info!(target = %context.id, "Starting missing runner");
                    let runner = self.spawn_runner(context);
                    runners.insert(context.id.clone(), runner);
                }
                Verdict::Recycle(reason) => {
                    self.replace(&mut runners, context, reason);
                }
            }
        }
        debug!(runners = runners.len(), "Sweep complete");
        emit!(ActiveRunners {
            count: runners.len(),
        });
    }

    async fn stop_runners(&self) {
        let stops: Vec<_> = self.runners.lock().values().map(|r| r.stop()).collect();
        let total = stops.len();
        let clean = join_all(stops).await.into_iter().filter(|clean| *clean).count();
        info!(total, clean, "All runners stopped");
    }
}

async fn sweep_loop(registry: Arc<Registry>, cancel: CancellationToken) {
    let mut ticker = tokio::time::interval(registry.timing.sweep_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick completes immediately.
    ticker.tick().await;

    while cancel.run_until_cancelled(ticker.tick()).await.is_some() {
        registry.sweep();
    }
}

struct Sweep {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// Owns one runner per subscription and keeps them healthy.
pub struct Supervisor {
    registry: Arc<Registry>,
    sweep: Mutex<Option<Sweep>>,
}

impl Supervisor {
    pub fn new(
        contexts: impl IntoIterator<Item = SubscriptionContext>,
        services: RunnerServices,
        timing: SupervisorTiming,
    ) -> Self {
        Self {
            registry: Arc::new(Registry {
                contexts: contexts.into_iter().map(Arc::new).collect(),
                services,
                timing,
                runners: Mutex::new(HashMap::new()),
            }),
            sweep: Mutex::new(None),
        }
    }

    /// The runner currently registered for `id`.
    pub fn runner(&self, id: &str) -> Option<Arc<Runner>> {
        self.registry.runners.lock().get(id).cloned()
    }

    /// Start a runner for every subscription, then the sweep loop.
    pub fn start_all(&self) {
        for context in &self.registry.contexts {
            self.registry.ensure_started(context);
        }

        let mut sweep = self.sweep.lock();
        if sweep.is_none() {
            let cancel = CancellationToken::new();
            let handle = tokio::spawn(sweep_loop(self.registry.clone(), cancel.clone()));
            *sweep = Some(Sweep { cancel, handle });
        }

        info!(
            subscriptions = self.registry.contexts.len(),
            sweep_interval_secs = self.registry.timing.sweep_interval.as_secs(),
            "Supervisor started"
        );
    }

    /// Replace the runner of `id` with a fresh one. Returns the new runner,
    /// or `None` for an unknown id.
    pub fn recycle(&self, id: &str) -> Option<Arc<Runner>> {
        self.registry.recycle(id, RecycleReason::Requested)
    }

    /// Stop the sweep loop, then every runner, and wait for all of them.
    pub async fn stop_all(&self) -> Result<(), SupervisorError> {
        let sweep = self.sweep.lock().take();
        let joined = match sweep {
            Some(sweep) => {
                sweep.cancel.cancel();
                sweep.handle.await.context(SweepFailedSnafu)
            }
            None => Ok(()),
        };
        self.registry.stop_runners().await;
        joined
    }

    /// Run until `shutdown` resolves, then stop everything.
    ///
    /// A sweep loop that dies on its own is fatal: runners are stopped and
    /// the error is returned.
    pub async fn run<F>(&self, shutdown: F) -> Result<(), SupervisorError>
    where
        F: Future<Output = ()> + Send,
    {
        self.start_all();
        let Some(Sweep { cancel, mut handle }) = self.sweep.lock().take() else {
            return Ok(());
        };

        tokio::select! {
            () = shutdown => {
                info!("Shutdown requested, stopping all runners");
                cancel.cancel();
                let joined = (&mut handle).await;
                self.registry.stop_runners().await;
                joined.context(SweepFailedSnafu)
            }
            joined = &mut handle => {
                error!("Supervisor sweep loop ended unexpectedly");
                self.registry.stop_runners().await;
                match joined {
                    Ok(()) => Err(SupervisorError::SweepExited),
                    Err(source) => Err(SupervisorError::SweepFailed { source }),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::progress::ProgressStore;
    use crate::pump::iteration::tests::{FakeSource, RecordingSink, context, t0};
    use crate::pump::runner::RunnerTiming;
    use crate::sink::DeliveryRetry;
    use chrono::TimeDelta;

    fn supervisor(ids: &[&str], timing: SupervisorTiming) -> Supervisor {
        let services = RunnerServices {
            store: Arc::new(ProgressStore::in_memory()),
            source: Arc::new(FakeSource::default()),
            sink: Arc::new(RecordingSink::answering(200)),
            clock: Arc::new(ManualClock::new(t0() + TimeDelta::seconds(100))),
            retry: DeliveryRetry::default(),
            timing: RunnerTiming::default(),
        };
        Supervisor::new(ids.iter().map(|id| context(id)), services, timing)
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_all_registers_one_runner_each() {
        let sup = supervisor(&["a", "b"], SupervisorTiming::default());
        sup.start_all();
        sup.start_all();

        let a = sup.runner("a").unwrap();
        assert!(a.running());
        assert!(sup.runner("b").unwrap().running());
        assert!(sup.runner("c").is_none());

        // A second start_all keeps the same runner.
        assert!(Arc::ptr_eq(&a, &sup.runner("a").unwrap()));

        sup.stop_all().await.unwrap();
        assert!(!a.running());
    }

    #[tokio::test(start_paused = true)]
    async fn test_recycle_replaces_entry() {
        let sup = supervisor(&["a"], SupervisorTiming::default());
        sup.start_all();
        let old = sup.runner("a").unwrap();

        let fresh = sup.recycle("a").unwrap();

        let current = sup.runner("a").unwrap();
        assert!(Arc::ptr_eq(&fresh, &current));
        assert!(!Arc::ptr_eq(&old, &current));
        assert!(current.running());
        assert!(old.retired());
        assert!(!current.retired());
        assert!(old.stop().await);
        assert!(sup.recycle("unknown").is_none());

        sup.stop_all().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweep_recycles_stopped_runner() {
        let timing = SupervisorTiming {
            sweep_interval: Duration::from_secs(30),
            unresponsive_after: Duration::from_secs(20 * 60),
        };
        let sup = supervisor(&["a"], timing);
        sup.start_all();

        let old = sup.runner("a").unwrap();
        assert!(old.stop().await);
        assert!(!old.running());

        tokio::time::sleep(Duration::from_secs(31)).await;

        let current = sup.runner("a").unwrap();
        assert!(!Arc::ptr_eq(&old, &current));
        assert!(current.running());

        sup.stop_all().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_stops_on_shutdown() {
        let sup = supervisor(&["a", "b"], SupervisorTiming::default());

        let result = sup
            .run(tokio::time::sleep(Duration::from_secs(5)))
            .await;

        assert!(result.is_ok());
        assert!(!sup.runner("a").unwrap().running());
        assert!(!sup.runner("b").unwrap().running());
    }
}
