//! Call log sinks.
//!
//! Append-only audit trail of failed calls. The scheduler only writes here;
//! nothing in this crate reads the log back to make decisions.

use std::collections::VecDeque;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::core::budget::ResourceId;
use crate::core::error::StoreError;

/// Longest response excerpt kept in a log entry.
pub const MAX_MESSAGE_CHARS: usize = 4000;

/// One failed call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallLogEntry {
    /// Entry identifier.
    pub id: Uuid,
    /// Resource the call was made for.
    pub resource_id: ResourceId,
    /// Endpoint path or `type:<name>[marker]` label.
    pub endpoint: String,
    /// HTTP status, when a response arrived.
    pub http_status: Option<u16>,
    /// Provider error code.
    pub error_code: Option<i64>,
    /// Provider error subcode.
    pub error_subcode: Option<i64>,
    /// Response excerpt or error text.
    pub message: String,
    /// When the call was made.
    pub called_at: DateTime<Utc>,
}

/// Helper to build a log entry, truncating the message.
pub fn build_call_log_entry(
    resource_id: ResourceId,
    endpoint: impl Into<String>,
    http_status: Option<u16>,
    error_code: Option<i64>,
    error_subcode: Option<i64>,
    message: &str,
    called_at: DateTime<Utc>,
) -> CallLogEntry {
    CallLogEntry {
        id: Uuid::new_v4(),
        resource_id,
        endpoint: endpoint.into(),
        http_status,
        error_code,
        error_subcode,
        message: message.chars().take(MAX_MESSAGE_CHARS).collect(),
        called_at,
    }
}

/// Call log sink abstraction.
#[async_trait]
pub trait CallLogSink: Send + Sync + 'static {
    /// Append one entry.
    async fn append(&self, entry: CallLogEntry) -> Result<(), StoreError>;
}

/// In-memory call log for testing and dev.
pub struct InMemoryCallLogSink {
    entries: Mutex<VecDeque<CallLogEntry>>,
    max_entries: usize,
}

impl InMemoryCallLogSink {
    /// Create a new in-memory sink with a bounded buffer.
    #[must_use]
    pub fn new(max_entries: usize) -> Self {
        Self {
            entries: Mutex::new(VecDeque::with_capacity(max_entries.min(1024))),
            max_entries,
        }
    }

    /// Retrieve a snapshot of stored entries.
    #[must_use]
    pub fn entries(&self) -> Vec<CallLogEntry> {
        self.entries.lock().iter().cloned().collect()
    }
}

#[async_trait]
impl CallLogSink for InMemoryCallLogSink {
    async fn append(&self, entry: CallLogEntry) -> Result<(), StoreError> {
        let mut entries = self.entries.lock();
        if entries.len() >= self.max_entries {
            entries.pop_front();
        }
        entries.push_back(entry);
        Ok(())
    }
}
