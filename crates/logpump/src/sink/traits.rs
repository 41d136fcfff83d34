//! Delivery contract between the pump engine and a sink.

use std::time::Duration;

use async_trait::async_trait;

use crate::error::SinkError;
use crate::record::OutputRecord;

/// Delivers one batch and reports the response status.
///
/// Only the status code matters to the caller: any 2xx is success. Errors
/// are reserved for batches that never got a response.
#[async_trait]
pub trait BatchSink: Send + Sync {
    async fn deliver(
        &self,
        url: &str,
        timeout: Duration,
        batch: &[OutputRecord],
    ) -> Result<u16, SinkError>;
}
