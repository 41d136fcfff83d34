//! logpump CLI: pump log events from a windowed log source into HTTP sinks.

use std::process::ExitCode;
use std::sync::Arc;

use chrono::Utc;
use clap::Parser;
use tracing::{info, warn};

use logpump::{
    CliArgs, Config, DeliveryRetry, HttpLogSource, HttpSink, ProgressStore, RunnerServices,
    Supervisor, SystemClock, init_tracing, shutdown_signal, start_metrics,
};

#[tokio::main]
async fn main() -> ExitCode {
    init_tracing();

    let args = CliArgs::parse();

    let paths = args.config_paths();
    if paths.is_empty() {
        eprintln!("Error: no config files or directories specified");
        return ExitCode::FAILURE;
    }

    info!("Loading config from {} source(s)", paths.len());

    let config = match Config::from_paths(&paths) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load config: {e}");
            return ExitCode::FAILURE;
        }
    };

    let contexts = match config.subscription_contexts(Utc::now()) {
        Ok(contexts) => contexts,
        Err(e) => {
            eprintln!("Invalid config: {e}");
            return ExitCode::FAILURE;
        }
    };

    if args.check {
        println!("Configuration OK: {} subscription(s)", contexts.len());
        return ExitCode::SUCCESS;
    }

    info!(
        "Starting logpump with {} subscription(s)",
        config.subscription_count()
    );
    for ctx in &contexts {
        info!(
            "  Subscription: {} ({} {} -> {})",
            ctx.id, ctx.region, ctx.selector.log_group_name, ctx.sink_url
        );
    }

    if let Err(e) = start_metrics(&config.metrics.address) {
        eprintln!("Failed to start metrics: {e}");
        return ExitCode::FAILURE;
    }

    let store = Arc::new(ProgressStore::new(config.progress_path()));
    if !store.is_durable() {
        warn!("No progress path configured, cursors are kept in memory only");
    }
    match store.load_all(contexts.iter().map(|ctx| ctx.id.as_str())).await {
        Ok(loaded) => info!(loaded, "Progress loaded"),
        Err(e) => {
            eprintln!("Failed to load progress: {e}");
            return ExitCode::FAILURE;
        }
    }

    let services = RunnerServices {
        store,
        source: Arc::new(HttpLogSource::default()),
        sink: Arc::new(HttpSink::default()),
        clock: Arc::new(SystemClock),
        retry: DeliveryRetry::default(),
        timing: config.runner_timing(),
    };

    let supervisor = Supervisor::new(contexts, services, config.supervisor_timing());

    match supervisor.run(shutdown_signal()).await {
        Ok(()) => {
            info!("Shutdown complete");
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("Supervisor failed: {e}");
            ExitCode::FAILURE
        }
    }
}
