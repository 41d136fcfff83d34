//! Common error types for configuration, metrics and process setup.

use snafu::prelude::*;

// ============ Config Errors ============

/// Errors that can occur while loading and validating configuration.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum ConfigError {
    /// No subscriptions were defined in any loaded file.
    #[snafu(display(
        "No subscriptions defined; at least one subscription is required to run"
    ))]
    NoSubscriptions,

    /// A subscription failed validation.
    #[snafu(display("Subscription '{id}': {message}"))]
    InvalidSubscription { id: String, message: String },

    /// A timestamp in the configuration could not be parsed.
    #[snafu(display(
        "Subscription '{id}': time '{value}' could not be parsed, RFC 3339 UTC is expected"
    ))]
    InvalidTime { id: String, value: String },

    /// Environment variable interpolation failed.
    #[snafu(display("Environment variable interpolation failed:\n{message}"))]
    EnvInterpolation { message: String },

    /// Failed to parse YAML configuration.
    #[snafu(display("Failed to parse YAML: {source}"))]
    YamlParse { source: serde_yaml::Error },

    /// Failed to read configuration file.
    #[snafu(display("Failed to read configuration file: {source}"))]
    ReadFile { source: std::io::Error },

    /// Failed to read configuration directory.
    #[snafu(display("Failed to read directory {}", path.display()))]
    ReadDir {
        path: std::path::PathBuf,
        source: std::io::Error,
    },

    /// Unsupported config file format.
    #[snafu(display("Unsupported config format for {}: only .yaml/.yml supported", path.display()))]
    UnsupportedFormat { path: std::path::PathBuf },

    /// The same subscription id appears in more than one place.
    #[snafu(display("Duplicate subscription ids: {}", keys.join(", ")))]
    DuplicateComponents { keys: Vec<String> },

    /// Multiple configuration errors occurred.
    #[snafu(display("Multiple config errors:\n{}", errors.join("\n")))]
    MultipleErrors { errors: Vec<String> },
}

// ============ Metrics Errors ============

/// Errors that can occur during metrics initialization.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum MetricsError {
    /// Failed to initialize Prometheus recorder.
    #[snafu(display("Failed to initialize Prometheus recorder"))]
    PrometheusInit {
        source: metrics_exporter_prometheus::BuildError,
    },

    /// Metrics server already initialized (double-init attempted).
    #[snafu(display("Metrics server already initialized"))]
    AlreadyInitialized,

    /// Metrics server not initialized (controller accessed before init).
    #[snafu(display("Metrics server not initialized"))]
    NotInitialized,
}

// ============ Setup Errors ============

/// Errors that can occur while wiring the process together, before any
/// subscription runs.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum SetupError {
    /// Failed to parse metrics address.
    #[snafu(display("Failed to parse metrics address: {source}"))]
    AddressParse { source: std::net::AddrParseError },

    /// Failed to initialize metrics.
    #[snafu(display("Failed to initialize metrics: {source}"))]
    Metrics { source: MetricsError },
}
