//! Activity Store backends: the workspace SQLite table and the remote REST API.

mod http;
mod sqlite;

pub use http::HttpActivityStore;
pub use sqlite::SqliteActivityStore;

use crate::activity::{ActivityPayload, ActivityRecord, ActivityType};
use chrono::{DateTime, Utc};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    /// Connection refused, DNS failure, timeout.
    #[error("activity store unreachable: {0}")]
    Unreachable(String),
    #[error("activity store rejected the request ({status}): {message}")]
    Rejected { status: u16, message: String },
    #[error("activity not found: {0}")]
    NotFound(String),
    #[error("{0}")]
    Conflict(String),
    #[error("database error: {0}")]
    Db(#[from] rusqlite::Error),
    #[error("unexpected response: {0}")]
    Decode(String),
}

impl StoreError {
    /// IPC error code for failures that are surfaced instead of queued.
    pub fn code(&self) -> &'static str {
        match self {
            StoreError::NotFound(_) => "not_found",
            StoreError::Conflict(_) => "bad_params",
            StoreError::Db(_) => "db_query_failed",
            _ => "store_failed",
        }
    }

    /// Failures worth retrying later: the store was not reached, or answered
    /// with a server-side or throttling status. Everything else is final.
    pub fn is_transient(&self) -> bool {
        match self {
            StoreError::Unreachable(_) => true,
            StoreError::Rejected { status, .. } => {
                *status >= 500 || *status == 408 || *status == 429
            }
            _ => false,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ActivityFilter {
    pub kind: Option<ActivityType>,
    pub student_name: Option<String>,
    pub limit: Option<usize>,
}

/// Parent sign-off on a permission slip.
#[derive(Debug, Clone, PartialEq)]
pub struct Acknowledgement {
    pub parent_name: String,
    /// Signature image as a `data:` URI.
    pub signature: Option<String>,
    pub at: DateTime<Utc>,
}

pub trait ActivityStore: Send + Sync {
    /// Inserts one activity. The same request shape is used for a direct
    /// submit and for every replayed queue item.
    fn write(
        &self,
        payload: &ActivityPayload,
        submitted_at: DateTime<Utc>,
    ) -> Result<ActivityRecord, StoreError>;

    /// Inserts several activities. Backends with transactions insert all or
    /// nothing; the default stops at the first failure.
    fn write_batch(
        &self,
        payloads: &[ActivityPayload],
        submitted_at: DateTime<Utc>,
    ) -> Result<Vec<ActivityRecord>, StoreError> {
        payloads
            .iter()
            .map(|p| self.write(p, submitted_at))
            .collect()
    }

    /// Feed, newest first.
    fn list(&self, filter: &ActivityFilter) -> Result<Vec<ActivityRecord>, StoreError>;

    fn acknowledge(
        &self,
        activity_id: &str,
        ack: &Acknowledgement,
    ) -> Result<ActivityRecord, StoreError>;

    fn describe(&self) -> String;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rejected(status: u16) -> StoreError {
        StoreError::Rejected {
            status,
            message: String::new(),
        }
    }

    #[test]
    fn only_network_and_server_side_failures_are_transient() {
        assert!(StoreError::Unreachable("refused".to_string()).is_transient());
        assert!(rejected(500).is_transient());
        assert!(rejected(503).is_transient());
        assert!(rejected(408).is_transient());
        assert!(rejected(429).is_transient());

        assert!(!rejected(400).is_transient());
        assert!(!rejected(401).is_transient());
        assert!(!rejected(422).is_transient());
        assert!(!StoreError::NotFound("x".to_string()).is_transient());
        assert!(!StoreError::Conflict("x".to_string()).is_transient());
        assert!(!StoreError::Decode("x".to_string()).is_transient());
    }
}
