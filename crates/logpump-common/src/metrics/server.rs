//! Prometheus metrics exporter, initialized once per process.
//!
//! A single recorder is shared by every subscription runner. `init_test()`
//! tolerates concurrent initialization from parallel test threads.

use axum::{Extension, Router, routing::get};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use snafu::prelude::*;
use std::net::SocketAddr;
use std::sync::OnceLock;
use tokio::net::TcpListener;
use tracing::{error, info};

use crate::error::{
    AddressParseSnafu, AlreadyInitializedSnafu, MetricsError, MetricsSnafu, NotInitializedSnafu,
    PrometheusInitSnafu, SetupError,
};

/// Default metrics address.
pub const DEFAULT_METRICS_ADDR: &str = "0.0.0.0:9090";

/// Histogram buckets for duration metrics (in seconds). The upper buckets
/// cover delivery retry waits, which can run to a couple of minutes.
const DURATION_BUCKETS: &[f64] = &[
    0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 120.0, 300.0,
];

/// Global metrics controller singleton.
static CONTROLLER: OnceLock<MetricsController> = OnceLock::new();

/// Controller for the shared metrics server.
///
/// Provides access to the Prometheus handle for rendering metrics
/// and other operations that need the metrics state.
pub struct MetricsController {
    handle: PrometheusHandle,
}

/// Install the recorder and serve it on `addr`.
///
/// Routes:
/// - `/metrics` - Prometheus metrics in text format
/// - `/health` - liveness probe
///
/// Must be called from within a tokio runtime.
pub fn init_global(addr: SocketAddr) -> Result<(), MetricsError> {
    install()?;

    // Spawn the HTTP server in the background
    tokio::spawn(run_server(addr));

    info!(%addr, "Metrics server started");
    Ok(())
}

/// Parse `address` and start the exporter on it.
pub fn start(address: &str) -> Result<(), SetupError> {
    let addr: SocketAddr = address.parse().context(AddressParseSnafu)?;
    init_global(addr).context(MetricsSnafu)
}

/// Install the recorder without an HTTP endpoint.
///
/// Safe to call repeatedly from parallel test threads: losers of the
/// initialization race spin until the winner has published the controller.
pub fn init_test() {
    if init_test_inner().is_err() {
        // Another thread is initializing. Wait for it to complete.
        while CONTROLLER.get().is_none() {
            std::hint::spin_loop();
        }
    }
}

fn init_test_inner() -> Result<(), MetricsError> {
    install()
}

fn install() -> Result<(), MetricsError> {
    if CONTROLLER.get().is_some() {
        return AlreadyInitializedSnafu.fail();
    }

    let handle = PrometheusBuilder::new()
        .set_buckets(DURATION_BUCKETS)
        .context(PrometheusInitSnafu)?
        .install_recorder()
        .context(PrometheusInitSnafu)?;

    CONTROLLER
        .set(MetricsController { handle })
        .map_err(|_| AlreadyInitializedSnafu.build())
}

impl MetricsController {
    /// Get a reference to the global metrics controller.
    ///
    /// # Errors
    ///
    /// Returns an error if metrics have not been initialized.
    pub fn get() -> Result<&'static Self, MetricsError> {
        CONTROLLER.get().context(NotInitializedSnafu)
    }

    /// Render metrics in Prometheus text format.
    ///
    /// Useful for custom endpoints or debugging.
    pub fn render(&self) -> String {
        self.handle.render()
    }
}

/// Run the HTTP server for metrics and health endpoints.
async fn run_server(addr: SocketAddr) {
    let Some(controller) = CONTROLLER.get() else {
        error!("Metrics server started before the recorder was installed");
        return;
    };

    let app = Router::new()
        .route("/metrics", get(metrics_handler))
        .route("/health", get(health_handler))
        .layer(Extension(controller.handle.clone()));

    let listener = match TcpListener::bind(addr).await {
        Ok(l) => l,
        Err(e) => {
            error!("Failed to bind metrics server to {}: {}", addr, e);
            return;
        }
    };

    if let Err(e) = axum::serve(listener, app).await {
        error!("Metrics server error: {}", e);
    }
}

/// Handler for `/metrics` endpoint.
async fn metrics_handler(Extension(handle): Extension<PrometheusHandle>) -> String {
    handle.render()
}

/// Handler for `/health` endpoint.
async fn health_handler() -> &'static str {
    "ok\n"
}
