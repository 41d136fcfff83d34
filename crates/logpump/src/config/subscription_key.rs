//! Subscription identifier.
//!
//! The id names the subscription in logs and metrics and is also the file
//! name of its cursor, so it is restricted to a file-name-safe charset.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::progress::TMP_SUFFIX;

/// Longest accepted subscription id.
pub const MAX_ID_LEN: usize = 100;

/// Identifier of a subscription in the `subscriptions` map.
///
/// # Examples
///
/// ```
/// use logpump::config::SubscriptionKey;
///
/// let key = SubscriptionKey::new("app-logs");
/// assert_eq!(key.id(), "app-logs");
/// assert!(key.validate().is_ok());
/// assert!(SubscriptionKey::new("../etc").validate().is_err());
/// ```
#[derive(Debug, Clone, Eq, Hash, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SubscriptionKey(String);

impl SubscriptionKey {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn id(&self) -> &str {
        &self.0
    }

    /// Check the id can be used as a cursor file name.
    pub fn validate(&self) -> Result<(), String> {
        let id = self.id();
        if id.is_empty() {
            return Err("id must not be empty".to_string());
        }
        if id.len() > MAX_ID_LEN {
            return Err(format!("id must be at most {MAX_ID_LEN} characters"));
        }
        if let Some(c) = id
            .chars()
            .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-')))
        {
            return Err(format!(
                "id contains '{c}'; only letters, digits, '_', '.' and '-' are allowed"
            ));
        }
        if id == "." || id == ".." {
            return Err("id must not be '.' or '..'".to_string());
        }
        if id.ends_with(TMP_SUFFIX) {
            return Err(format!("id must not end with '{TMP_SUFFIX}'"));
        }
        Ok(())
    }
}

impl fmt::Display for SubscriptionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for SubscriptionKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
