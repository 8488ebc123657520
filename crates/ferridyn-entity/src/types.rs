//! Core types: rows, record metadata, continuation tokens, write policies.

use std::collections::BTreeMap;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

/// Maximum number of operations in one atomic store batch.
pub const MAX_BATCH_SIZE: usize = 100;

/// Default number of rows a store returns per range-read page.
pub const DEFAULT_PAGE_SIZE: usize = 1000;

/// Reserved column holding the partition key.
pub const PARTITION_KEY: &str = "PartitionKey";

/// Reserved column holding the row (identity) key.
pub const ROW_KEY: &str = "RowKey";

/// Reserved column holding the server-side write timestamp.
pub const TIMESTAMP: &str = "Timestamp";

/// Wildcard etag: a conditional write carrying it skips the version check.
pub const ETAG_ANY: &str = "*";

/// A stored row as exchanged with a table store.
///
/// Key columns live in dedicated fields; every other column is a string
/// property.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Row {
    pub partition_key: String,
    pub row_key: String,
    /// Opaque version token. Empty on rows that have not been written yet.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub etag: String,
    /// Last write time, Unix epoch milliseconds.
    #[serde(default)]
    pub timestamp: u64,
    #[serde(default)]
    pub properties: BTreeMap<String, String>,
}

impl Row {
    pub fn new(partition_key: impl Into<String>, row_key: impl Into<String>) -> Self {
        Self {
            partition_key: partition_key.into(),
            row_key: row_key.into(),
            ..Default::default()
        }
    }

    /// Builder-style property setter.
    pub fn with(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.insert(name.into(), value.into());
        self
    }

    /// Read a column by name, including the reserved key columns.
    pub fn get(&self, name: &str) -> Option<&str> {
        match name {
            PARTITION_KEY => Some(self.partition_key.as_str()),
            ROW_KEY => Some(self.row_key.as_str()),
            _ => self.properties.get(name).map(String::as_str),
        }
    }
}

/// Identity, version and diagnostics carried by every mapped record.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EntityMeta {
    pub partition_key: String,
    pub row_key: String,
    /// Version token from the last load or write. Empty means "unconditional".
    pub etag: String,
    /// Store timestamp observed at load/write time (epoch millis).
    pub timestamp: Option<u64>,
    /// Message from the last failed point operation, cleared on success.
    pub last_error: Option<String>,
    /// Queue message this record was last pushed as or received from.
    pub message: Option<MessageHandle>,
}

impl EntityMeta {
    pub fn new(partition_key: impl Into<String>, row_key: impl Into<String>) -> Self {
        Self {
            partition_key: partition_key.into(),
            row_key: row_key.into(),
            ..Default::default()
        }
    }
}

/// Reference to a queue message; `lease` is present only while the message
/// is checked out by a dequeue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageHandle {
    pub id: String,
    pub lease: Option<String>,
}

/// How a write reacts to an existing row at the same key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DuplicatePolicy {
    /// Reject the write if the row already exists.
    Fail,
    /// Overwrite every column of an existing row.
    #[default]
    Replace,
    /// Overwrite only the columns carried by the write.
    Merge,
}

/// Opaque cursor returned by a range read when more rows remain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContinuationToken {
    pub next_partition_key: String,
    pub next_row_key: String,
}

/// Current wall-clock time in Unix epoch milliseconds.
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
