//! JSON array delivery over HTTP.

use std::time::Duration;

use async_trait::async_trait;
use snafu::ResultExt;
use tracing::debug;

use super::traits::BatchSink;
use crate::error::SinkError;
use crate::error::sink_error::{SerializeSnafu, TransportSnafu};
use crate::record::OutputRecord;

/// Posts each batch as a JSON array.
#[derive(Debug, Clone, Default)]
pub struct HttpSink {
    client: reqwest::Client,
}

impl HttpSink {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl BatchSink for HttpSink {
    async fn deliver(
        &self,
        url: &str,
        timeout: Duration,
        batch: &[OutputRecord],
    ) -> Result<u16, SinkError> {
        let body = serde_json::to_vec(batch).context(SerializeSnafu)?;
        debug!(url, records = batch.len(), bytes = body.len(), "Posting batch");

        let response = self
            .client
            .post(url)
            .timeout(timeout)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(body)
            .send()
            .await
            .context(TransportSnafu)?;

        let status = response.status();
        debug!(
            url,
            status = status.as_u16(),
            reason = status.canonical_reason().unwrap_or_default(),
            "Batch post finished"
        );
        Ok(status.as_u16())
    }
}
