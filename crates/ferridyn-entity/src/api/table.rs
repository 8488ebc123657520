//! Typed table handle: point operations on single records plus the bulk
//! query, batch and iterate entry points.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::schema::{Entity, Schema};
use crate::store::{OpOutcome, TableOp, TableStore};
use crate::types::{DuplicatePolicy, MAX_BATCH_SIZE};

use super::batch::{BatchReport, FailureMode, record_op, write_slices};
use super::filter::Comparison;
use super::iterate;
use super::predicate::Combinator;
use super::query::{EntityQuery, QueryDescriptor};

/// Handle to the table holding records of type `T`.
///
/// Point operations (`load`, `save`, `delete`) never return an error: they
/// report success as a `bool` and leave the failure message in the record's
/// `last_error`. Bulk operations return `Result` so partial completion is
/// visible to the caller.
pub struct EntityTable<T> {
    store: Arc<dyn TableStore>,
    schema: Arc<Schema<T>>,
    max_batch_size: usize,
    page_size: Option<usize>,
}

impl<T> Clone for EntityTable<T> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            schema: self.schema.clone(),
            max_batch_size: self.max_batch_size,
            page_size: self.page_size,
        }
    }
}

impl<T: Entity> EntityTable<T> {
    pub fn new(store: Arc<dyn TableStore>, schema: Arc<Schema<T>>) -> Self {
        Self {
            store,
            schema,
            max_batch_size: MAX_BATCH_SIZE,
            page_size: None,
        }
    }

    /// Cap on operations per store batch, clamped to `1..=MAX_BATCH_SIZE`.
    pub fn with_max_batch_size(mut self, max_batch_size: usize) -> Self {
        self.max_batch_size = max_batch_size.clamp(1, MAX_BATCH_SIZE);
        self
    }

    /// Page size requested by queries that do not set their own.
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = Some(page_size);
        self
    }

    pub fn name(&self) -> &str {
        self.store.name()
    }

    pub fn schema(&self) -> &Arc<Schema<T>> {
        &self.schema
    }

    pub fn store(&self) -> &Arc<dyn TableStore> {
        &self.store
    }

    pub fn max_batch_size(&self) -> usize {
        self.max_batch_size
    }

    // -----------------------------------------------------------------------
    // Point operations
    // -----------------------------------------------------------------------

    /// Read one record, or `Error::NotFound` when the row does not exist.
    pub fn get(&self, partition_key: &str, row_key: &str) -> Result<T> {
        match self.store.get_row(partition_key, row_key)? {
            Some(row) => self.schema.from_row(&row),
            None => Err(Error::not_found(partition_key, row_key)),
        }
    }

    pub fn exists(&self, partition_key: &str, row_key: &str) -> Result<bool> {
        Ok(self.store.get_row(partition_key, row_key)?.is_some())
    }

    /// Populate `record` from the row at its partition and row key.
    pub fn load(&self, record: &mut T) -> bool {
        let result = self.try_load(record);
        self.settle(record, "load", result)
    }

    /// Write `record` under `policy`, refreshing its etag and timestamp.
    pub fn save(&self, record: &mut T, policy: DuplicatePolicy) -> bool {
        let op = record_op(&self.schema, record, policy);
        let result = self.store.execute(&op).map(|outcome| stamp(record, &outcome));
        self.settle(record, "save", result)
    }

    /// Delete the row behind `record`. A non-empty etag on the record makes
    /// the delete conditional on the row still carrying that version.
    pub fn delete(&self, record: &mut T) -> bool {
        let op = delete_op(record);
        let result = self.store.execute(&op).map(|_| unstamp(record));
        self.settle(record, "delete", result)
    }

    fn try_load(&self, record: &mut T) -> Result<()> {
        let (pk, rk) = {
            let meta = record.meta();
            (meta.partition_key.clone(), meta.row_key.clone())
        };
        match self.store.get_row(&pk, &rk)? {
            Some(row) => self.schema.apply_row(record, &row),
            None => Err(Error::not_found(&pk, &rk)),
        }
    }

    fn settle(&self, record: &mut T, action: &'static str, result: Result<()>) -> bool {
        let meta = record.meta_mut();
        match result {
            Ok(()) => {
                meta.last_error = None;
                true
            }
            Err(e) => {
                if e.is_not_found() {
                    debug!(
                        table = %self.store.name(),
                        partition = %meta.partition_key,
                        row = %meta.row_key,
                        action,
                        "row not found"
                    );
                } else {
                    warn!(
                        table = %self.store.name(),
                        partition = %meta.partition_key,
                        row = %meta.row_key,
                        action,
                        error = %e,
                        "point operation failed"
                    );
                }
                meta.last_error = Some(e.to_string());
                false
            }
        }
    }

    // -----------------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------------

    pub fn query(&self, descriptor: &QueryDescriptor) -> EntityQuery<T> {
        EntityQuery::new(
            self.store.clone(),
            self.schema.clone(),
            &self.with_defaults(descriptor),
        )
    }

    /// Records whose fields match the non-empty fields of `example`.
    pub fn query_by_example(
        &self,
        example: &T,
        comparison: Comparison,
        combinator: Combinator,
    ) -> EntityQuery<T> {
        let descriptor = QueryDescriptor::by_example(&self.schema, example, comparison, combinator);
        self.query(&descriptor)
    }

    /// Number of rows matching `descriptor`, without materializing records.
    pub fn count(&self, descriptor: &QueryDescriptor) -> Result<usize> {
        let request = self.with_defaults(descriptor).to_range_query();
        let mut token = None;
        let mut total = 0;
        loop {
            let segment = self.store.query_segment(&request, token.as_ref())?;
            total += segment.rows.len();
            match segment.continuation {
                Some(next) => token = Some(next),
                None => break,
            }
        }
        Ok(total)
    }

    fn with_defaults(&self, descriptor: &QueryDescriptor) -> QueryDescriptor {
        let mut descriptor = descriptor.clone();
        if descriptor.page_size.is_none() {
            descriptor.page_size = self.page_size;
        }
        descriptor
    }

    // -----------------------------------------------------------------------
    // Batched writes
    // -----------------------------------------------------------------------

    /// Write `records` in single-partition batches under `policy`.
    ///
    /// Stops at the first failed batch; batches committed before it stay
    /// committed. Committed records get their new etag and timestamp.
    pub fn submit(&self, records: &mut [T], policy: DuplicatePolicy) -> Result<BatchReport> {
        if records.is_empty() {
            return Ok(BatchReport::default());
        }
        let ops = records
            .iter()
            .map(|r| record_op(&self.schema, r, policy))
            .collect();
        write_slices(
            self.store.as_ref(),
            ops,
            self.max_batch_size,
            FailureMode::Abort,
            |idx, outcome| stamp(&mut records[idx], outcome),
        )
    }

    /// Replace existing rows with `records`, conditional on each record's
    /// etag. Every batch is attempted; failures are reported together.
    /// Returns the number of rows written.
    pub fn update(&self, records: &mut [T]) -> Result<usize> {
        if records.is_empty() {
            return Ok(0);
        }
        let ops = records
            .iter()
            .map(|r| TableOp::Replace(self.schema.to_row(r)))
            .collect();
        let report = write_slices(
            self.store.as_ref(),
            ops,
            self.max_batch_size,
            FailureMode::Continue,
            |idx, outcome| stamp(&mut records[idx], outcome),
        )?;
        Ok(report.written)
    }

    /// Delete the rows behind `records` in single-partition batches.
    /// Returns the number of rows deleted.
    pub fn delete_all(&self, records: &mut [T]) -> Result<usize> {
        if records.is_empty() {
            return Ok(0);
        }
        let ops = records.iter().map(delete_op).collect();
        let report = write_slices(
            self.store.as_ref(),
            ops,
            self.max_batch_size,
            FailureMode::Continue,
            |idx, _| unstamp(&mut records[idx]),
        )?;
        Ok(report.written)
    }

    // -----------------------------------------------------------------------
    // Iterate-and-update
    // -----------------------------------------------------------------------

    /// See [`iterate::iterate`].
    pub fn iterate<F>(&self, descriptor: &QueryDescriptor, mutate: F) -> Result<usize>
    where
        F: FnMut(&mut T) -> bool,
    {
        iterate::iterate(
            &self.store,
            &self.schema,
            &self.with_defaults(descriptor),
            self.max_batch_size,
            mutate,
        )
    }

    /// See [`iterate::iterate_by_keys`].
    pub fn iterate_by_keys<F>(&self, records: &[T], mutate: F) -> Result<usize>
    where
        F: FnMut(&mut T) -> bool,
    {
        iterate::iterate_by_keys(&self.store, &self.schema, records, self.max_batch_size, mutate)
    }
}

fn delete_op<T: Entity>(record: &T) -> TableOp {
    let meta = record.meta();
    TableOp::Delete {
        partition_key: meta.partition_key.clone(),
        row_key: meta.row_key.clone(),
        etag: meta.etag.clone(),
    }
}

fn stamp<T: Entity>(record: &mut T, outcome: &OpOutcome) {
    let meta = record.meta_mut();
    if let Some(etag) = &outcome.etag {
        meta.etag = etag.clone();
    }
    meta.timestamp = Some(outcome.timestamp);
}

fn unstamp<T: Entity>(record: &mut T) {
    let meta = record.meta_mut();
    meta.etag.clear();
    meta.timestamp = None;
}
