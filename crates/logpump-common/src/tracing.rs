//! Tracing initialization for the logpump binary.

use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Directives used when `RUST_LOG` is unset or invalid. HTTP client
/// internals are only interesting when asked for explicitly.
const DEFAULT_DIRECTIVES: &str = "info,hyper=warn,hyper_util=warn,reqwest=warn";

/// Install the global subscriber: an fmt layer filtered by `RUST_LOG`.
///
/// Every per-subscription event carries a `target` field with the
/// subscription id, so a single filter like `RUST_LOG=logpump=debug` covers
/// all subscriptions.
pub fn init_tracing() {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_DIRECTIVES));

    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_thread_ids(false);

    tracing_subscriber::registry()
        .with(fmt_layer)
        .with(env_filter)
        .init();
}
