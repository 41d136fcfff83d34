//! Cursor values and the window arithmetic that moves them.
//!
//! A [`Cursor`] names the next window a subscription should read and, when a
//! window spans several pages, the token of the next page. Every function here
//! is pure: the same context, cursor and `now` always give the same answer.
//!
//! The source treats both ends of a window as inclusive at millisecond
//! resolution, so a drained window is followed by one starting exactly 1ms
//! after its end.

use chrono::{DateTime, TimeDelta, Utc};

use crate::context::SubscriptionContext;

/// Resumption point for one subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cursor {
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
    pub continuation_token: Option<String>,
}

impl Cursor {
    pub fn new(
        window_start: DateTime<Utc>,
        window_end: DateTime<Utc>,
        continuation_token: Option<String>,
    ) -> Self {
        Self {
            window_start,
            window_end,
            continuation_token: continuation_token.filter(|t| !t.trim().is_empty()),
        }
    }

    pub fn has_token(&self) -> bool {
        self.continuation_token.is_some()
    }

    /// Same window, next page.
    pub fn with_token(&self, token: String) -> Self {
        Self::new(self.window_start, self.window_end, Some(token))
    }
}

/// The window to read on this pass.
///
/// A cursor that is mid-pagination is returned untouched. Otherwise the window
/// starts at the cursor's start (or the subscription start) and its end is
/// clamped to the max interval and the skew cutoff, then stretched to the min
/// interval. Stretching may push the end past the cutoff; [`is_runnable`]
/// defers such windows. A subscription end strictly inside the window
/// truncates it.
pub fn window_before_read(
    context: &SubscriptionContext,
    cursor: Option<&Cursor>,
    now: DateTime<Utc>,
) -> Cursor {
    if let Some(cursor) = cursor.filter(|c| c.has_token()) {
        return cursor.clone();
    }

    let start = cursor.map_or(context.start, |c| c.window_start);
    let min_end = start + context.min_interval;
    let max_end = start + context.max_interval;

    let end = cursor
        .map_or(max_end, |c| c.window_end)
        .min(max_end)
        .min(context.cutoff(now))
        .max(min_end);

    let end = match context.end {
        Some(final_end) if start < final_end && final_end < end => final_end,
        _ => end,
    };

    Cursor::new(start, end, None)
}

/// Whether the window may be read at `now`.
pub fn is_runnable(context: &SubscriptionContext, cursor: &Cursor, now: DateTime<Utc>) -> bool {
    if let Some(end) = context.end {
        if cursor.window_end > end {
            return false;
        }
        // The terminal window ignores the cutoff.
        if cursor.window_end == end {
            return true;
        }
    }
    cursor.window_end <= context.cutoff(now)
}

/// The cursor to persist once `cursor`'s window has been read and delivered.
///
/// A page token keeps the same window. Without one the window is drained and
/// the next one starts 1ms after its end, with a speculative end that the next
/// [`window_before_read`] re-clamps.
pub fn cursor_after_read(
    context: &SubscriptionContext,
    cursor: &Cursor,
    next_token: Option<String>,
    now: DateTime<Utc>,
) -> Cursor {
    if let Some(token) = next_token.filter(|t| !t.trim().is_empty()) {
        return cursor.with_token(token);
    }

    let start = cursor.window_end + TimeDelta::milliseconds(1);
    let cutoff = context.cutoff(now);
    let min_end = start + context.min_interval;
    let max_end = start + context.max_interval;

    if min_end > cutoff {
        return Cursor::new(start, min_end, None);
    }
    Cursor::new(start, max_end.min(cutoff), None)
}
