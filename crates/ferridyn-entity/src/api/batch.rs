//! Partition-aware batching of table writes.
//!
//! Stores commit a batch atomically only when every operation shares one
//! partition key and the batch holds at most [`MAX_BATCH_SIZE`] operations.
//! Arbitrary write sets are therefore stable-sorted by partition key and cut
//! into slices at every partition change and at the size cap. Each slice is
//! one atomic store batch.
//!
//! A partition with more operations than the cap spans several slices, and
//! those slices commit independently of each other: a failure in a later
//! slice does not undo an earlier one. [`BatchReport::split_partitions`]
//! names every partition this happened to.

use tracing::{debug, info, warn};

use crate::error::{BatchError, Error, Result, SliceFailure};
use crate::schema::{Entity, Schema};
use crate::store::{OpOutcome, TableBatch, TableOp, TableStore};
use crate::types::{DuplicatePolicy, MAX_BATCH_SIZE, Row};

/// Write operation used for a record under a duplicate policy.
pub fn op_for_policy(policy: DuplicatePolicy, row: Row) -> TableOp {
    match policy {
        DuplicatePolicy::Fail => TableOp::Insert(row),
        DuplicatePolicy::Replace => TableOp::Upsert(row),
        DuplicatePolicy::Merge => TableOp::UpsertMerge(row),
    }
}

/// Write operation for `record` under a duplicate policy. Merge writes carry
/// only the fields set on the record; the others carry resolved values.
pub fn record_op<T: Entity>(schema: &Schema<T>, record: &T, policy: DuplicatePolicy) -> TableOp {
    let row = match policy {
        DuplicatePolicy::Merge => schema.to_patch_row(record),
        DuplicatePolicy::Fail | DuplicatePolicy::Replace => schema.to_row(record),
    };
    op_for_policy(policy, row)
}

/// Positions (into the caller's input) of the operations in one slice.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SliceSpec {
    pub partition_key: String,
    pub indices: Vec<usize>,
}

/// Cut `partition_keys` into single-partition slices of at most
/// `max_batch_size` entries, in stable partition-key order.
pub fn plan_slices(partition_keys: &[&str], max_batch_size: usize) -> Vec<SliceSpec> {
    let cap = max_batch_size.clamp(1, MAX_BATCH_SIZE);
    let mut order: Vec<usize> = (0..partition_keys.len()).collect();
    order.sort_by(|&a, &b| partition_keys[a].cmp(partition_keys[b]));

    let mut slices: Vec<SliceSpec> = Vec::new();
    for idx in order {
        let pk = partition_keys[idx];
        match slices.last_mut() {
            Some(slice) if slice.partition_key == pk && slice.indices.len() < cap => {
                slice.indices.push(idx);
            }
            _ => slices.push(SliceSpec {
                partition_key: pk.to_string(),
                indices: vec![idx],
            }),
        }
    }
    slices
}

/// Whether the remaining slices are still submitted after one fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureMode {
    /// Stop at the first failed slice.
    Abort,
    /// Submit every slice, then report all failures together.
    Continue,
}

/// Summary of a completed batched write.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchReport {
    /// Store batches submitted.
    pub slices: usize,
    /// Operations committed.
    pub written: usize,
    /// Partitions whose operations spanned more than one slice. Each of those
    /// slices committed on its own.
    pub split_partitions: Vec<String>,
}

/// Submit one slice to the store.
pub(crate) fn submit_slice(store: &dyn TableStore, batch: &TableBatch) -> Result<Vec<OpOutcome>> {
    debug!(
        table = %store.name(),
        partition = %batch.partition_key(),
        ops = batch.len(),
        "submitting batch slice"
    );
    store.execute_batch(batch)
}

/// Write `ops` in partition slices.
///
/// `on_commit` is called with the input position and outcome of every
/// operation as soon as its slice commits.
pub fn write_slices<F>(
    store: &dyn TableStore,
    ops: Vec<TableOp>,
    max_batch_size: usize,
    mode: FailureMode,
    mut on_commit: F,
) -> Result<BatchReport>
where
    F: FnMut(usize, &OpOutcome),
{
    let slices = {
        let keys: Vec<&str> = ops.iter().map(TableOp::partition_key).collect();
        plan_slices(&keys, max_batch_size)
    };

    let mut report = BatchReport::default();
    for pair in slices.windows(2) {
        if pair[0].partition_key == pair[1].partition_key
            && report.split_partitions.last() != Some(&pair[0].partition_key)
        {
            report.split_partitions.push(pair[0].partition_key.clone());
        }
    }
    for pk in &report.split_partitions {
        let count = slices.iter().filter(|s| &s.partition_key == pk).count();
        info!(
            table = %store.name(),
            partition = %pk,
            slices = count,
            "partition exceeds batch size; slices commit independently"
        );
    }

    let mut slots: Vec<Option<TableOp>> = ops.into_iter().map(Some).collect();
    let mut failures: Vec<SliceFailure> = Vec::new();

    for slice in &slices {
        let result = build_batch(&slice.partition_key, &slice.indices, &mut slots)
            .and_then(|batch| submit_slice(store, &batch));
        match result {
            Ok(outcomes) => {
                for (&idx, outcome) in slice.indices.iter().zip(&outcomes) {
                    on_commit(idx, outcome);
                }
                report.slices += 1;
                report.written += outcomes.len();
            }
            Err(e) => {
                warn!(
                    table = %store.name(),
                    partition = %slice.partition_key,
                    ops = slice.indices.len(),
                    error = %e,
                    "batch slice failed"
                );
                if mode == FailureMode::Abort {
                    return Err(BatchError::Aborted {
                        partition_key: slice.partition_key.clone(),
                        committed_slices: report.slices,
                        written: report.written,
                        source: Box::new(e),
                    }
                    .into());
                }
                failures.push(SliceFailure {
                    partition_key: slice.partition_key.clone(),
                    rows: slice.indices.len(),
                    error: Box::new(e),
                });
            }
        }
    }

    if !failures.is_empty() {
        return Err(BatchError::Partial {
            written: report.written,
            changed: None,
            failures,
        }
        .into());
    }
    Ok(report)
}

fn build_batch(
    partition_key: &str,
    indices: &[usize],
    slots: &mut [Option<TableOp>],
) -> Result<TableBatch> {
    let mut batch = TableBatch::new(partition_key);
    for &idx in indices {
        if let Some(op) = slots[idx].take() {
            batch.push(op)?;
        }
    }
    Ok(batch)
}

/// Accumulates writes from a stream and flushes them as single-partition
/// batches: whenever the partition key changes, when the batch is full, and
/// on [`RollingBatch::finish`]. Failed flushes are collected, not raised,
/// so later partitions are still written.
pub(crate) struct RollingBatch<'a> {
    store: &'a dyn TableStore,
    cap: usize,
    pending: Option<TableBatch>,
    written: usize,
    failures: Vec<SliceFailure>,
}

impl<'a> RollingBatch<'a> {
    pub(crate) fn new(store: &'a dyn TableStore, max_batch_size: usize) -> Self {
        Self {
            store,
            cap: max_batch_size.clamp(1, MAX_BATCH_SIZE),
            pending: None,
            written: 0,
            failures: Vec::new(),
        }
    }

    pub(crate) fn push(&mut self, op: TableOp) {
        let must_flush = match &self.pending {
            Some(batch) => {
                batch.partition_key() != op.partition_key() || batch.contains_row(op.row_key())
            }
            None => false,
        };
        if must_flush {
            self.flush();
        }

        let batch = self
            .pending
            .get_or_insert_with(|| TableBatch::new(op.partition_key()));
        if let Err(e) = batch.push(op) {
            let partition_key = batch.partition_key().to_string();
            self.failures.push(SliceFailure {
                partition_key,
                rows: 1,
                error: Box::new(Error::from(e)),
            });
            return;
        }
        if batch.len() >= self.cap {
            self.flush();
        }
    }

    fn flush(&mut self) {
        let Some(batch) = self.pending.take() else {
            return;
        };
        if batch.is_empty() {
            return;
        }
        match submit_slice(self.store, &batch) {
            Ok(outcomes) => self.written += outcomes.len(),
            Err(e) => {
                warn!(
                    table = %self.store.name(),
                    partition = %batch.partition_key(),
                    ops = batch.len(),
                    error = %e,
                    "batch slice failed"
                );
                self.failures.push(SliceFailure {
                    partition_key: batch.partition_key().to_string(),
                    rows: batch.len(),
                    error: Box::new(e),
                });
            }
        }
    }

    /// Flush the remainder. `changed` is reported back in a partial-failure error.
    pub(crate) fn finish(mut self, changed: usize) -> Result<usize> {
        self.flush();
        if self.failures.is_empty() {
            Ok(self.written)
        } else {
            Err(BatchError::Partial {
                written: self.written,
                changed: Some(changed),
                failures: self.failures,
            }
            .into())
        }
    }
}
