//! Durable cursor storage, one file per subscription.
//!
//! Cursor files live at `{base}/{subscription_id}` and hold a single line:
//! `window_start|window_end|continuation_token`, with RFC 3339 timestamps and
//! an empty token field when there is none.
//!
//! # Atomic Writes
//!
//! Cursor updates use atomic write pattern:
//! 1. Write to temp file: `{subscription_id}.tmp`
//! 2. Rename to final path: `{subscription_id}`
//!
//! The in-memory copy is only updated after the rename succeeds, so readers
//! never see a cursor that is not on disk.

use std::path::{Path, PathBuf};

use chrono::{DateTime, SecondsFormat, Utc};
use dashmap::DashMap;
use snafu::ResultExt;
use tokio::sync::Mutex;
use tracing::{debug, info};

use logpump_common::emit;
use logpump_common::metrics::events::CursorSaved;

use crate::cursor::Cursor;
use crate::error::{CreateDirSnafu, ProgressError, ReadSnafu, WriteSnafu};

/// Suffix of in-flight cursor files.
pub const TMP_SUFFIX: &str = ".tmp";

/// Maps subscription ids to their last durably written cursor.
#[derive(Debug, Default)]
pub struct ProgressStore {
    base: Option<PathBuf>,
    cursors: DashMap<String, Cursor>,
    write_lock: Mutex<()>,
}

impl ProgressStore {
    /// A store persisting under `base`, or memory-only when `base` is `None`.
    pub fn new(base: Option<PathBuf>) -> Self {
        Self {
            base,
            cursors: DashMap::new(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn in_memory() -> Self {
        Self::new(None)
    }

    pub fn is_durable(&self) -> bool {
        self.base.is_some()
    }

    /// Latest durably written cursor for `id`. Never touches the disk.
    pub fn get(&self, id: &str) -> Option<Cursor> {
        self.cursors.get(id).map(|entry| entry.value().clone())
    }

    /// Persist `cursor` for `id`, then publish it in memory.
    ///
    /// On error the in-memory value is left as it was.
    pub async fn set(&self, id: &str, cursor: Cursor) -> Result<(), ProgressError> {
        self.set_if(id, cursor, || true).await.map(|_| ())
    }

    /// Like [`set`](Self::set), but only if `allowed` still holds once the
    /// write lock is taken. Returns whether the cursor was written.
    pub async fn set_if(
        &self,
        id: &str,
        cursor: Cursor,
        allowed: impl FnOnce() -> bool,
    ) -> Result<bool, ProgressError> {
        let _guard = self.write_lock.lock().await;
        if !allowed() {
            return Ok(false);
        }

        if let Some(base) = &self.base {
            tokio::fs::create_dir_all(base)
                .await
                .context(CreateDirSnafu { path: base })?;

            let path = base.join(id);
            let tmp = base.join(format!("{id}{TMP_SUFFIX}"));
            tokio::fs::write(&tmp, encode(&cursor))
                .await
                .context(WriteSnafu { path: &tmp })?;
            tokio::fs::rename(&tmp, &path)
                .await
                .context(WriteSnafu { path: &path })?;

            emit!(CursorSaved {
                target: id.to_string(),
            });
        }

        debug!(
            target = %id,
            window_start = %cursor.window_start,
            window_end = %cursor.window_end,
            has_token = cursor.has_token(),
            "Saved cursor"
        );
        self.cursors.insert(id.to_string(), cursor);
        Ok(true)
    }

    /// Populate memory from disk for every id.
    ///
    /// A missing or empty file means the subscription has never run. A file
    /// that exists but cannot be read or parsed is an error.
    ///
    /// Returns the number of cursors loaded.
    pub async fn load_all<'a>(
        &self,
        ids: impl IntoIterator<Item = &'a str>,
    ) -> Result<usize, ProgressError> {
        let Some(base) = &self.base else {
            return Ok(0);
        };

        let mut loaded = 0;
        for id in ids {
            let path = base.join(id);
            match read_cursor(&path).await? {
                Some(cursor) => {
                    info!(
                        target = %id,
                        window_start = %cursor.window_start,
                        window_end = %cursor.window_end,
                        has_token = cursor.has_token(),
                        "Loaded cursor"
                    );
                    self.cursors.insert(id.to_string(), cursor);
                    loaded += 1;
                }
                None => {
                    debug!(target = %id, "No cursor found, starting from subscription start");
                }
            }
        }
        Ok(loaded)
    }
}

async fn read_cursor(path: &Path) -> Result<Option<Cursor>, ProgressError> {
    let contents = match tokio::fs::read_to_string(path).await {
        Ok(contents) => contents,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e).context(ReadSnafu { path }),
    };

    if contents.trim().is_empty() {
        return Ok(None);
    }

    decode(&contents)
        .map(Some)
        .map_err(|reason| ProgressError::Corrupt {
            path: path.to_path_buf(),
            reason,
        })
}

fn format_time(time: &DateTime<Utc>) -> String {
    time.to_rfc3339_opts(SecondsFormat::AutoSi, true)
}

pub fn encode(cursor: &Cursor) -> String {
    format!(
        "{}|{}|{}",
        format_time(&cursor.window_start),
        format_time(&cursor.window_end),
        cursor.continuation_token.as_deref().unwrap_or_default()
    )
}

pub fn decode(line: &str) -> Result<Cursor, String> {
    let mut fields = line.trim_end().splitn(3, '|');
    let (Some(start), Some(end), Some(token)) = (fields.next(), fields.next(), fields.next())
    else {
        return Err("expected three '|'-separated fields".to_string());
    };

    let parse = |field: &str| {
        DateTime::parse_from_rfc3339(field)
            .map(|t| t.with_timezone(&Utc))
            .map_err(|e| format!("bad timestamp '{field}': {e}"))
    };
    let window_start = parse(start)?;
    let window_end = parse(end)?;

    if window_start > window_end {
        return Err(format!("window start {start} is after window end {end}"));
    }

    Ok(Cursor::new(
        window_start,
        window_end,
        Some(token.to_string()),
    ))
}
