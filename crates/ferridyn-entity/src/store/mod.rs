//! Store collaborators: the table and queue interfaces the mapper drives,
//! plus in-memory implementations.

pub mod memory;
pub mod memory_queue;

use std::sync::Arc;
use std::time::Duration;

use crate::api::filter::FilterExpr;
use crate::error::{BatchError, Result};
use crate::types::{ContinuationToken, MAX_BATCH_SIZE, Row};

pub use memory::{MemoryProvider, MemoryTableStore};
pub use memory_queue::MemoryQueueStore;

/// A server-side range read: filter plus selected columns.
#[derive(Debug, Clone, Default)]
pub struct RangeQuery {
    pub filter: Option<FilterExpr>,
    /// Columns to return besides the key columns. Empty means all columns.
    pub select: Vec<String>,
    /// Upper bound on rows returned in one page.
    pub take: Option<usize>,
}

/// One page of a range read.
#[derive(Debug, Clone, Default)]
pub struct Segment {
    pub rows: Vec<Row>,
    /// Present while more rows remain.
    pub continuation: Option<ContinuationToken>,
}

/// A single write against a table.
#[derive(Debug, Clone, PartialEq)]
pub enum TableOp {
    /// Insert; fails if the row exists.
    Insert(Row),
    /// Insert, or overwrite every column of an existing row.
    Upsert(Row),
    /// Insert, or overwrite only the carried columns of an existing row.
    UpsertMerge(Row),
    /// Overwrite an existing row. `row.etag` is checked unless empty or `*`.
    Replace(Row),
    /// Merge into an existing row. `row.etag` is checked unless empty or `*`.
    Merge(Row),
    Delete {
        partition_key: String,
        row_key: String,
        etag: String,
    },
}

impl TableOp {
    pub fn partition_key(&self) -> &str {
        match self {
            TableOp::Insert(row)
            | TableOp::Upsert(row)
            | TableOp::UpsertMerge(row)
            | TableOp::Replace(row)
            | TableOp::Merge(row) => &row.partition_key,
            TableOp::Delete { partition_key, .. } => partition_key,
        }
    }

    pub fn row_key(&self) -> &str {
        match self {
            TableOp::Insert(row)
            | TableOp::Upsert(row)
            | TableOp::UpsertMerge(row)
            | TableOp::Replace(row)
            | TableOp::Merge(row) => &row.row_key,
            TableOp::Delete { row_key, .. } => row_key,
        }
    }
}

/// Result of one applied write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpOutcome {
    pub row_key: String,
    /// New version token; `None` for deletes.
    pub etag: Option<String>,
    pub timestamp: u64,
}

/// Operations committed atomically by the store: one partition key, at most
/// [`MAX_BATCH_SIZE`] operations, each row key at most once.
#[derive(Debug, Clone)]
pub struct TableBatch {
    partition_key: String,
    ops: Vec<TableOp>,
}

impl TableBatch {
    pub fn new(partition_key: impl Into<String>) -> Self {
        Self {
            partition_key: partition_key.into(),
            ops: Vec::new(),
        }
    }

    /// Queue an operation, enforcing the single-partition, bounded, unique-key rules.
    pub fn push(&mut self, op: TableOp) -> std::result::Result<&mut Self, BatchError> {
        if op.partition_key() != self.partition_key {
            return Err(BatchError::MixedPartitions {
                expected: self.partition_key.clone(),
                actual: op.partition_key().to_string(),
            });
        }
        if self.ops.len() >= MAX_BATCH_SIZE {
            return Err(BatchError::TooLarge {
                max: MAX_BATCH_SIZE,
                actual: self.ops.len() + 1,
            });
        }
        if self.contains_row(op.row_key()) {
            return Err(BatchError::DuplicateRowKey(op.row_key().to_string()));
        }
        self.ops.push(op);
        Ok(self)
    }

    pub fn partition_key(&self) -> &str {
        &self.partition_key
    }

    pub fn ops(&self) -> &[TableOp] {
        &self.ops
    }

    pub fn contains_row(&self, row_key: &str) -> bool {
        self.ops.iter().any(|op| op.row_key() == row_key)
    }

    /// Number of queued operations.
    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Discard all queued operations.
    pub fn clear(&mut self) {
        self.ops.clear();
    }
}

/// A partitioned table store.
pub trait TableStore: Send + Sync {
    fn name(&self) -> &str;

    /// Point read.
    fn get_row(&self, partition_key: &str, row_key: &str) -> Result<Option<Row>>;

    /// Read one page of rows matching the query, resuming at `token`.
    fn query_segment(&self, query: &RangeQuery, token: Option<&ContinuationToken>)
    -> Result<Segment>;

    /// Apply a batch atomically; outcomes are returned in operation order.
    fn execute_batch(&self, batch: &TableBatch) -> Result<Vec<OpOutcome>>;

    /// Apply a single write.
    fn execute(&self, op: &TableOp) -> Result<OpOutcome>;
}

/// A queue message as returned by a queue store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueMessage {
    pub id: String,
    pub payload: String,
    /// Lease token, present only on dequeued messages.
    pub lease: Option<String>,
    pub dequeue_count: u32,
    pub inserted_at: u64,
    pub expires_at: Option<u64>,
    /// Time at which the message becomes visible to receivers again.
    pub visible_at: u64,
}

/// Outcome of deleting a leased message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteOutcome {
    Deleted,
    AlreadyGone,
}

/// A durable message queue with leased delivery.
pub trait QueueStore: Send + Sync {
    fn name(&self) -> &str;

    fn enqueue(
        &self,
        payload: &str,
        ttl: Option<Duration>,
        initial_delay: Option<Duration>,
    ) -> Result<QueueMessage>;

    /// Return the next visible message without leasing it.
    fn peek(&self) -> Result<Option<QueueMessage>>;

    /// Lease the next visible message, hiding it for `visibility`.
    fn dequeue(&self, visibility: Duration) -> Result<Option<QueueMessage>>;

    /// Extend or shorten a lease, optionally replacing the payload. Returns the new lease token.
    fn update_lease(
        &self,
        id: &str,
        lease: &str,
        payload: Option<&str>,
        visibility: Duration,
    ) -> Result<String>;

    fn delete(&self, id: &str, lease: &str) -> Result<DeleteOutcome>;
}

/// Opens named table and queue handles.
pub trait StoreProvider: Send + Sync {
    fn table(&self, name: &str) -> Result<Arc<dyn TableStore>>;

    fn queue(&self, name: &str) -> Result<Arc<dyn QueueStore>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn put(pk: &str, rk: &str) -> TableOp {
        TableOp::Upsert(Row::new(pk, rk))
    }

    #[test]
    fn test_batch_rejects_mixed_partition() {
        let mut batch = TableBatch::new("A");
        batch.push(put("A", "1")).unwrap();
        let err = batch.push(put("B", "1")).unwrap_err();
        assert!(matches!(err, BatchError::MixedPartitions { .. }));
        assert_eq!(batch.len(), 1);
    }

    #[test]
    fn test_batch_rejects_duplicate_row_key() {
        let mut batch = TableBatch::new("A");
        batch.push(put("A", "1")).unwrap();
        let err = batch
            .push(TableOp::Delete {
                partition_key: "A".into(),
                row_key: "1".into(),
                etag: String::new(),
            })
            .unwrap_err();
        assert!(matches!(err, BatchError::DuplicateRowKey(rk) if rk == "1"));
    }

    #[test]
    fn test_batch_size_cap() {
        let mut batch = TableBatch::new("A");
        for i in 0..MAX_BATCH_SIZE {
            batch.push(put("A", &i.to_string())).unwrap();
        }
        let err = batch.push(put("A", "overflow")).unwrap_err();
        assert!(matches!(err, BatchError::TooLarge { max: 100, actual: 101 }));
    }

    #[test]
    fn test_batch_clear() {
        let mut batch = TableBatch::new("A");
        batch.push(put("A", "1")).unwrap();
        assert!(!batch.is_empty());
        batch.clear();
        assert!(batch.is_empty());
    }
}
