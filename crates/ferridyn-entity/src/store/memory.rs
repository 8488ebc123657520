//! In-memory table store ordered by (partition key, row key).

use std::collections::{BTreeMap, HashMap};
use std::ops::Bound;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::api::projection::apply_selection;
use crate::error::{BatchError, ConcurrencyError, Error, Result, StoreError};
use crate::types::{
    ContinuationToken, DEFAULT_PAGE_SIZE, ETAG_ANY, MAX_BATCH_SIZE, Row, now_millis,
};

use super::memory_queue::MemoryQueueStore;
use super::{
    OpOutcome, QueueStore, RangeQuery, Segment, StoreProvider, TableBatch, TableOp, TableStore,
};

type RowKey = (String, String);

struct TableState {
    rows: BTreeMap<RowKey, Row>,
    version: u64,
}

/// A table held in process memory.
///
/// Range reads return at most `page_size` rows per page and hand out a
/// continuation token naming the next row to examine. Batches are validated
/// as a whole before any operation is applied.
pub struct MemoryTableStore {
    name: String,
    page_size: usize,
    state: Mutex<TableState>,
}

impl MemoryTableStore {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            page_size: DEFAULT_PAGE_SIZE,
            state: Mutex::new(TableState {
                rows: BTreeMap::new(),
                version: 0,
            }),
        }
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    pub fn len(&self) -> usize {
        self.state.lock().rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.lock().rows.is_empty()
    }

    /// Snapshot of every stored row in key order.
    pub fn rows(&self) -> Vec<Row> {
        self.state.lock().rows.values().cloned().collect()
    }
}

fn key_of(op: &TableOp) -> RowKey {
    (op.partition_key().to_string(), op.row_key().to_string())
}

fn check_etag(expected: &str, stored: &Row) -> Result<()> {
    if expected.is_empty() || expected == ETAG_ANY || expected == stored.etag {
        return Ok(());
    }
    Err(ConcurrencyError::VersionMismatch {
        expected: expected.to_string(),
        actual: stored.etag.clone(),
    }
    .into())
}

/// Check that `op` can be applied to the current rows.
fn validate(rows: &BTreeMap<RowKey, Row>, op: &TableOp) -> Result<()> {
    let key = key_of(op);
    let existing = rows.get(&key);
    match op {
        TableOp::Insert(_) => match existing {
            Some(_) => Err(StoreError::EntityAlreadyExists {
                partition_key: key.0,
                row_key: key.1,
            }
            .into()),
            None => Ok(()),
        },
        TableOp::Upsert(_) | TableOp::UpsertMerge(_) => Ok(()),
        TableOp::Replace(row) | TableOp::Merge(row) => match existing {
            Some(stored) => check_etag(&row.etag, stored),
            None => Err(Error::not_found(&key.0, &key.1)),
        },
        TableOp::Delete { etag, .. } => match existing {
            Some(stored) => check_etag(etag, stored),
            None => Err(Error::not_found(&key.0, &key.1)),
        },
    }
}

fn apply(state: &mut TableState, op: &TableOp, now: u64) -> OpOutcome {
    let key = key_of(op);
    let (row, merge) = match op {
        TableOp::Insert(row) | TableOp::Upsert(row) | TableOp::Replace(row) => (row, false),
        TableOp::Merge(row) | TableOp::UpsertMerge(row) => (row, true),
        TableOp::Delete { row_key, .. } => {
            state.rows.remove(&key);
            return OpOutcome {
                row_key: row_key.clone(),
                etag: None,
                timestamp: now,
            };
        }
    };

    state.version += 1;
    let etag = format!("W/\"{}\"", state.version);

    let stored = state
        .rows
        .entry(key)
        .or_insert_with(|| Row::new(&row.partition_key, &row.row_key));
    if !merge {
        stored.properties.clear();
    }
    stored
        .properties
        .extend(row.properties.iter().map(|(k, v)| (k.clone(), v.clone())));
    stored.etag = etag.clone();
    stored.timestamp = now;

    OpOutcome {
        row_key: row.row_key.clone(),
        etag: Some(etag),
        timestamp: now,
    }
}

impl TableStore for MemoryTableStore {
    fn name(&self) -> &str {
        &self.name
    }

    fn get_row(&self, partition_key: &str, row_key: &str) -> Result<Option<Row>> {
        let state = self.state.lock();
        Ok(state
            .rows
            .get(&(partition_key.to_string(), row_key.to_string()))
            .cloned())
    }

    fn query_segment(
        &self,
        query: &RangeQuery,
        token: Option<&ContinuationToken>,
    ) -> Result<Segment> {
        let limit = query
            .take
            .map_or(self.page_size, |take| take.min(self.page_size))
            .max(1);
        let lower = match token {
            Some(t) => Bound::Included((t.next_partition_key.clone(), t.next_row_key.clone())),
            None => Bound::Unbounded,
        };

        let state = self.state.lock();
        let mut segment = Segment::default();
        for ((pk, rk), row) in state.rows.range((lower, Bound::Unbounded)) {
            if segment.rows.len() == limit {
                segment.continuation = Some(ContinuationToken {
                    next_partition_key: pk.clone(),
                    next_row_key: rk.clone(),
                });
                break;
            }
            let matches = match &query.filter {
                Some(filter) => filter.eval(row)?,
                None => true,
            };
            if matches {
                segment.rows.push(apply_selection(row, &query.select));
            }
        }
        Ok(segment)
    }

    fn execute_batch(&self, batch: &TableBatch) -> Result<Vec<OpOutcome>> {
        if batch.is_empty() {
            return Err(BatchError::Empty.into());
        }
        if batch.len() > MAX_BATCH_SIZE {
            return Err(BatchError::TooLarge {
                max: MAX_BATCH_SIZE,
                actual: batch.len(),
            }
            .into());
        }

        let mut state = self.state.lock();
        for op in batch.ops() {
            validate(&state.rows, op)?;
        }
        let now = now_millis();
        Ok(batch.ops().iter().map(|op| apply(&mut *state, op, now)).collect())
    }

    fn execute(&self, op: &TableOp) -> Result<OpOutcome> {
        let mut state = self.state.lock();
        validate(&state.rows, op)?;
        Ok(apply(&mut state, op, now_millis()))
    }
}

/// Hands out in-memory tables and queues by name.
pub struct MemoryProvider {
    page_size: usize,
    create_missing: bool,
    tables: Mutex<HashMap<String, Arc<MemoryTableStore>>>,
    queues: Mutex<HashMap<String, Arc<MemoryQueueStore>>>,
}

impl Default for MemoryProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryProvider {
    /// A provider that creates tables and queues on first use.
    pub fn new() -> Self {
        Self {
            page_size: DEFAULT_PAGE_SIZE,
            create_missing: true,
            tables: Mutex::new(HashMap::new()),
            queues: Mutex::new(HashMap::new()),
        }
    }

    /// Page size of tables created from now on.
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size;
        self
    }

    /// Only hand out tables and queues created explicitly.
    pub fn strict(mut self) -> Self {
        self.create_missing = false;
        self
    }

    pub fn create_table(&self, name: &str) -> Arc<MemoryTableStore> {
        self.tables
            .lock()
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(MemoryTableStore::new(name).with_page_size(self.page_size)))
            .clone()
    }

    pub fn create_queue(&self, name: &str) -> Arc<MemoryQueueStore> {
        self.queues
            .lock()
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(MemoryQueueStore::new(name)))
            .clone()
    }
}

impl StoreProvider for MemoryProvider {
    fn table(&self, name: &str) -> Result<Arc<dyn TableStore>> {
        if !self.create_missing && !self.tables.lock().contains_key(name) {
            return Err(StoreError::TableNotFound(name.to_string()).into());
        }
        Ok(self.create_table(name))
    }

    fn queue(&self, name: &str) -> Result<Arc<dyn QueueStore>> {
        if !self.create_missing && !self.queues.lock().contains_key(name) {
            return Err(StoreError::QueueNotFound(name.to_string()).into());
        }
        Ok(self.create_queue(name))
    }
}
