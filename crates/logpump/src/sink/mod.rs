//! Sink collaborators and the delivery retry policy.
//!
//! - `traits`: the delivery contract the iteration executor depends on
//! - `http`: JSON batch delivery over HTTP
//! - `retry`: exponential backoff with full jitter around a sink

mod http;
mod retry;
mod traits;

pub use http::HttpSink;
pub use retry::{DeliveryReport, DeliveryRetry, is_retryable};
pub use traits::BatchSink;
