//! The pump engine.
//!
//! - `iteration`: one read and deliver cycle ([`Executor`])
//! - `runner`: the per-subscription loop ([`Runner`])
//! - `supervisor`: one runner per subscription, kept healthy ([`Supervisor`])

mod iteration;
mod runner;
mod supervisor;

pub use iteration::{Executor, Iteration, IterationOutcome};
pub use runner::{Completion, Runner, RunnerServices, RunnerTiming};
pub use supervisor::{Supervisor, SupervisorTiming};
