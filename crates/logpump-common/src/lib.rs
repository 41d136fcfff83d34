//! logpump-common: ambient plumbing shared by the logpump crates.
//!
//! - `config/` - YAML loading, environment variable interpolation, multi-file merge
//! - `metrics/` - Prometheus metrics (`emit!` events and HTTP exporter)
//! - `signal` - Signal handling for graceful shutdown
//! - `tracing` - Subscriber initialization for the binary
//! - `error` - Common error types

pub mod config;
pub mod error;
pub mod metrics;
pub mod signal;
pub mod tracing;

pub use config::{
    CliArgs, ConfigPath, Mergeable, MetricsConfig, interpolate, is_yaml_file, load_from_paths,
};
pub use error::{ConfigError, MetricsError, SetupError};
pub use metrics::{
    DEFAULT_METRICS_ADDR, MetricsController, init_global as init_metrics,
    init_test as init_metrics_test, start as start_metrics,
};
pub use signal::shutdown_signal;
pub use self::tracing::init_tracing;
