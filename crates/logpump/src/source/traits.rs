//! Fetch contract between the pump engine and a log source.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::context::{SourceSelector, SubscriptionContext};
use crate::cursor::Cursor;
use crate::error::SourceError;
use crate::record::RawEvent;

/// One page request for a window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchRequest<'a> {
    pub region: &'a str,
    pub endpoint: &'a str,
    pub selector: &'a SourceSelector,
    pub filter_pattern: Option<&'a str>,
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
    pub token: Option<&'a str>,
    pub limit: u32,
}

impl<'a> FetchRequest<'a> {
    /// The request reading `cursor`'s window for `context`.
    pub fn for_cursor(context: &'a SubscriptionContext, cursor: &'a Cursor) -> Self {
        Self {
            region: &context.region,
            endpoint: &context.source_endpoint,
            selector: &context.selector,
            filter_pattern: context.filter_pattern.as_deref(),
            window_start: cursor.window_start,
            window_end: cursor.window_end,
            token: cursor.continuation_token.as_deref(),
            limit: context.read_page_size,
        }
    }
}

/// Events of one page, in source order, and the token of the next page.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FetchPage {
    pub events: Vec<RawEvent>,
    pub next_token: Option<String>,
}

/// Reads pages of events from a remote log source.
///
/// Implementations fail with [`SourceError::Unavailable`] when the source
/// does not report success.
#[async_trait]
pub trait LogSource: Send + Sync {
    async fn fetch(&self, request: &FetchRequest<'_>) -> Result<FetchPage, SourceError>;
}
