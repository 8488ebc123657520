//! Record types and store wrappers shared by unit tests.

use std::collections::HashSet;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::{Result, StoreError};
use crate::schema::{Entity, SchemaBuilder};
use crate::store::memory::MemoryTableStore;
use crate::store::{OpOutcome, RangeQuery, Segment, TableBatch, TableOp, TableStore};
use crate::types::{ContinuationToken, EntityMeta, Row};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Contact {
    pub meta: EntityMeta,
    pub name: String,
    pub email: String,
    pub age: Option<u32>,
    pub active: Option<bool>,
    pub scratch: String,
}

impl Entity for Contact {
    fn describe(schema: &mut SchemaBuilder<Self>) {
        schema.text("Name", |c| &c.name, |c| &mut c.name);
        schema
            .text("Email", |c| &c.email, |c| &mut c.email)
            .default_value("unknown@example.com");
        schema.value("Age", |c| &c.age, |c| &mut c.age);
        schema.value("Active", |c| &c.active, |c| &mut c.active);
        schema
            .text("Scratch", |c| &c.scratch, |c| &mut c.scratch)
            .not_persisted();
    }

    fn meta(&self) -> &EntityMeta {
        &self.meta
    }

    fn meta_mut(&mut self) -> &mut EntityMeta {
        &mut self.meta
    }

    fn table_name() -> &'static str {
        "contacts"
    }
}

pub fn contact(pk: &str, rk: &str, name: &str) -> Contact {
    Contact {
        meta: EntityMeta::new(pk, rk),
        name: name.to_string(),
        ..Default::default()
    }
}

/// A record type with no defaults, for query-by-example tests.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Profile {
    pub meta: EntityMeta,
    pub name: String,
    pub email: String,
    pub bio: String,
}

impl Entity for Profile {
    fn describe(schema: &mut SchemaBuilder<Self>) {
        schema.text("Name", |p| &p.name, |p| &mut p.name);
        schema.text("Email", |p| &p.email, |p| &mut p.email);
        schema.text("Bio", |p| &p.bio, |p| &mut p.bio);
    }

    fn meta(&self) -> &EntityMeta {
        &self.meta
    }

    fn meta_mut(&mut self) -> &mut EntityMeta {
        &mut self.meta
    }
}

pub fn profile(pk: &str, rk: &str) -> Profile {
    Profile {
        meta: EntityMeta::new(pk, rk),
        ..Default::default()
    }
}

/// A record type whose only registrations collide with reserved names.
#[derive(Debug, Clone, Default)]
pub struct Bare {
    pub meta: EntityMeta,
    pub shadow: String,
}

impl Entity for Bare {
    fn describe(schema: &mut SchemaBuilder<Self>) {
        schema.text("PartitionKey", |b| &b.shadow, |b| &mut b.shadow);
        schema.text("RowKey", |b| &b.shadow, |b| &mut b.shadow);
    }

    fn meta(&self) -> &EntityMeta {
        &self.meta
    }

    fn meta_mut(&mut self) -> &mut EntityMeta {
        &mut self.meta
    }
}

/// Delegates to a [`MemoryTableStore`] while recording every batch and page
/// request, and failing batches for selected partitions.
pub struct RecordingStore {
    pub inner: MemoryTableStore,
    pub batches: Mutex<Vec<(String, Vec<String>)>>,
    pub pages: Mutex<usize>,
    pub failing: Mutex<HashSet<String>>,
}

impl RecordingStore {
    pub fn new(page_size: usize) -> Arc<Self> {
        Arc::new(Self {
            inner: MemoryTableStore::new("recording").with_page_size(page_size),
            batches: Mutex::new(Vec::new()),
            pages: Mutex::new(0),
            failing: Mutex::new(HashSet::new()),
        })
    }

    pub fn fail_partition(&self, partition_key: &str) {
        self.failing.lock().insert(partition_key.to_string());
    }

    pub fn batch_calls(&self) -> Vec<(String, Vec<String>)> {
        self.batches.lock().clone()
    }
}

impl TableStore for RecordingStore {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn get_row(&self, partition_key: &str, row_key: &str) -> Result<Option<Row>> {
        self.inner.get_row(partition_key, row_key)
    }

    fn query_segment(
        &self,
        query: &RangeQuery,
        token: Option<&ContinuationToken>,
    ) -> Result<Segment> {
        *self.pages.lock() += 1;
        self.inner.query_segment(query, token)
    }

    fn execute_batch(&self, batch: &TableBatch) -> Result<Vec<OpOutcome>> {
        let row_keys = batch.ops().iter().map(|op| op.row_key().to_string()).collect();
        self.batches
            .lock()
            .push((batch.partition_key().to_string(), row_keys));
        if self.failing.lock().contains(batch.partition_key()) {
            return Err(StoreError::Status {
                status: 503,
                message: "server busy".to_string(),
            }
            .into());
        }
        self.inner.execute_batch(batch)
    }

    fn execute(&self, op: &TableOp) -> Result<OpOutcome> {
        self.inner.execute(op)
    }
}
