//! FilterLogEvents over HTTP.
//!
//! The request is the JSON 1.1 protocol body of the `FilterLogEvents` action.
//! Signing is left to the endpoint: point `source_endpoint` at a signing
//! proxy or at an endpoint that does not require authentication.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use snafu::{OptionExt, ResultExt};
use tracing::debug;

use super::traits::{FetchPage, FetchRequest, LogSource};
use crate::context::StreamFilter;
use crate::error::{
    DecodeSnafu, InvalidTimestampSnafu, SourceError, TransportSnafu, UnavailableSnafu,
};
use crate::record::RawEvent;

const CONTENT_TYPE: &str = "application/x-amz-json-1.1";
const TARGET: &str = "Logs_20140328.FilterLogEvents";

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct FilterLogEventsBody<'a> {
    log_group_name: &'a str,
    start_time: i64,
    end_time: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    next_token: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    filter_pattern: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    log_stream_name_prefix: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    log_stream_names: Option<&'a [String]>,
    limit: u32,
}

impl<'a> From<&'a FetchRequest<'a>> for FilterLogEventsBody<'a> {
    fn from(request: &'a FetchRequest<'a>) -> Self {
        let (log_stream_name_prefix, log_stream_names) = match &request.selector.streams {
            StreamFilter::All => (None, None),
            StreamFilter::Prefix(prefix) => (Some(prefix.as_str()), None),
            StreamFilter::Names(names) => (None, Some(names.as_slice())),
        };

        Self {
            log_group_name: &request.selector.log_group_name,
            start_time: request.window_start.timestamp_millis(),
            end_time: request.window_end.timestamp_millis(),
            next_token: request.token,
            filter_pattern: request.filter_pattern,
            log_stream_name_prefix,
            log_stream_names,
            limit: request.limit,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct FilterLogEventsResponse {
    events: Vec<FilteredLogEvent>,
    next_token: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct FilteredLogEvent {
    event_id: String,
    ingestion_time: i64,
    timestamp: i64,
    log_stream_name: String,
    message: String,
}

fn from_millis(
    event_id: &str,
    field: &'static str,
    millis: i64,
) -> Result<DateTime<Utc>, SourceError> {
    DateTime::from_timestamp_millis(millis).context(InvalidTimestampSnafu {
        event_id,
        field,
        millis,
    })
}

/// Log source speaking the FilterLogEvents JSON protocol.
#[derive(Debug, Clone, Default)]
pub struct HttpLogSource {
    client: reqwest::Client,
}

impl HttpLogSource {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl LogSource for HttpLogSource {
    async fn fetch(&self, request: &FetchRequest<'_>) -> Result<FetchPage, SourceError> {
        let body = FilterLogEventsBody::from(request);
        debug!(
            log_group = body.log_group_name,
            start_time = body.start_time,
            end_time = body.end_time,
            has_token = body.next_token.is_some(),
            "Requesting log events"
        );

        let response = self
            .client
            .post(request.endpoint)
            .header(reqwest::header::CONTENT_TYPE, CONTENT_TYPE)
            .header("X-Amz-Target", TARGET)
            .json(&body)
            .send()
            .await
            .context(TransportSnafu)?;

        let status = response.status();
        if status != StatusCode::OK {
            return UnavailableSnafu {
                status: status.as_u16(),
            }
            .fail();
        }

        let page: FilterLogEventsResponse = response.json().await.context(DecodeSnafu)?;

        let events = page
            .events
            .into_iter()
            .map(|event| {
                let ingestion_time =
                    from_millis(&event.event_id, "ingestionTime", event.ingestion_time)?;
                let timestamp = from_millis(&event.event_id, "timestamp", event.timestamp)?;
                Ok(RawEvent {
                    region: request.region.to_string(),
                    log_group_name: request.selector.log_group_name.clone(),
                    event_id: event.event_id,
                    ingestion_time,
                    timestamp,
                    log_stream_name: event.log_stream_name,
                    message: event.message,
                })
            })
            .collect::<Result<_, SourceError>>()?;

        Ok(FetchPage {
            events,
            next_token: page.next_token.filter(|t| !t.trim().is_empty()),
        })
    }
}
