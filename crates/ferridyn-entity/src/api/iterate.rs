//! Iterate-and-update: stream records, let a callback mutate them, and write
//! the changed ones back in rolling single-partition batches.
//!
//! Write-back uses `Replace` (or `Merge` limited to the selected columns when
//! the query selects columns) carrying each record's etag, so a row modified
//! by someone else since it was read fails its batch with a concurrency
//! error. Failed batches do not stop later partitions from being written;
//! they are reported together once the stream is done.

use std::collections::HashSet;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::error::Result;
use crate::schema::{Entity, Schema};
use crate::store::{TableOp, TableStore};

use super::batch::{RollingBatch, plan_slices};
use super::predicate::row_keys_filter;
use super::query::{EntityQuery, QueryDescriptor};

/// Run `mutate` over every record matching `descriptor`, writing back the
/// records it reports as changed. Returns how many records changed.
pub fn iterate<T, F>(
    store: &Arc<dyn TableStore>,
    schema: &Arc<Schema<T>>,
    descriptor: &QueryDescriptor,
    max_batch_size: usize,
    mut mutate: F,
) -> Result<usize>
where
    T: Entity,
    F: FnMut(&mut T) -> bool,
{
    let mut rolling = RollingBatch::new(store.as_ref(), max_batch_size);
    let changed = drain_query(store, schema, descriptor, &mut rolling, &mut mutate);
    finish(store.as_ref(), rolling, changed)
}

/// Like [`iterate`], for an explicit record set. Each partition's rows are
/// re-read from the store before `mutate` sees them, so stale in-memory
/// copies are never written back.
pub fn iterate_by_keys<T, F>(
    store: &Arc<dyn TableStore>,
    schema: &Arc<Schema<T>>,
    records: &[T],
    max_batch_size: usize,
    mut mutate: F,
) -> Result<usize>
where
    T: Entity,
    F: FnMut(&mut T) -> bool,
{
    let mut seen = HashSet::new();
    let keys: Vec<(&str, &str)> = records
        .iter()
        .map(|r| (r.meta().partition_key.as_str(), r.meta().row_key.as_str()))
        .filter(|key| seen.insert(*key))
        .collect();
    if keys.is_empty() {
        return Ok(0);
    }

    let partitions: Vec<&str> = keys.iter().map(|(pk, _)| *pk).collect();
    let mut rolling = RollingBatch::new(store.as_ref(), max_batch_size);
    let mut changed = Ok(0);
    for slice in plan_slices(&partitions, max_batch_size) {
        let row_keys: Vec<&str> = slice.indices.iter().map(|&i| keys[i].1).collect();
        debug!(
            table = %store.name(),
            partition = %slice.partition_key,
            rows = row_keys.len(),
            "re-reading rows before update"
        );
        let descriptor =
            QueryDescriptor::all().filter(row_keys_filter(&slice.partition_key, &row_keys));
        let done = changed.as_ref().map_or(0, |n| *n);
        changed = drain_query(store, schema, &descriptor, &mut rolling, &mut mutate)
            .map(|n| done + n);
        if changed.is_err() {
            break;
        }
    }
    finish(store.as_ref(), rolling, changed)
}

/// Feed every record of one query through `mutate`, queueing changed ones.
/// Returns the number changed, or the read error that ended the query.
fn drain_query<T, F>(
    store: &Arc<dyn TableStore>,
    schema: &Arc<Schema<T>>,
    descriptor: &QueryDescriptor,
    rolling: &mut RollingBatch<'_>,
    mutate: &mut F,
) -> Result<usize>
where
    T: Entity,
    F: FnMut(&mut T) -> bool,
{
    let mut query = EntityQuery::new(store.clone(), schema.clone(), descriptor);
    let mut changed = 0;
    while let Some(page) = query.next_page() {
        for mut record in page? {
            if mutate(&mut record) {
                changed += 1;
                rolling.push(write_back(schema, &record, &descriptor.select));
            }
        }
    }
    Ok(changed)
}

/// Conditional write for a changed record. A record read through a column
/// selection only holds the selected columns, so it is merged back limited
/// to those columns; a full record replaces the stored row.
fn write_back<T: Entity>(schema: &Schema<T>, record: &T, select: &[String]) -> TableOp {
    let mut row = schema.to_row(record);
    if select.is_empty() {
        return TableOp::Replace(row);
    }
    row.properties.retain(|name, _| select.contains(name));
    TableOp::Merge(row)
}

/// Flush pending writes; a read error takes precedence over write failures.
fn finish(
    store: &dyn TableStore,
    rolling: RollingBatch<'_>,
    changed: Result<usize>,
) -> Result<usize> {
    match changed {
        Ok(changed) => {
            let written = rolling.finish(changed)?;
            debug!(table = %store.name(), changed, written, "iterate complete");
            Ok(changed)
        }
        Err(e) => {
            if let Err(write_err) = rolling.finish(0) {
                warn!(
                    table = %store.name(),
                    error = %write_err,
                    "write-back failed after read error"
                );
            }
            Err(e)
        }
    }
}
