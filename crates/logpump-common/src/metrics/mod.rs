//! Metrics and observability infrastructure.
//!
//! - `events`: Internal event types and the `InternalEvent` trait
//! - `server`: Prometheus HTTP server and initialization

pub mod events;
pub mod server;

pub use server::{DEFAULT_METRICS_ADDR, MetricsController, init_global, init_test, start};

/// Emit an internal event (Vector-style pattern).
///
/// Calls `InternalEvent::emit()` on the given event, which logs it at trace
/// level and records the corresponding Prometheus metric.
///
/// ```ignore
/// use logpump_common::emit;
/// use logpump_common::metrics::events::RecordsDelivered;
///
/// emit!(RecordsDelivered { count: 100, target: "app-logs".to_string() });
/// ```
#[macro_export]
macro_rules! emit {
    ($event:expr) => {
        $crate::metrics::events::InternalEvent::emit($event)
    };
}

pub use emit;
