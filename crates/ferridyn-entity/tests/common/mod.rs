//! Shared record types and store wrappers for integration tests.

#![allow(dead_code)]

use std::sync::Arc;

use parking_lot::Mutex;

use ferridyn_entity::error::Result;
use ferridyn_entity::store::{
    MemoryProvider, MemoryTableStore, OpOutcome, QueueStore, RangeQuery, Segment, StoreProvider,
    TableBatch, TableOp, TableStore,
};
use ferridyn_entity::types::ContinuationToken;
use ferridyn_entity::{Entity, EntityMeta, Row, SchemaBuilder};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Order {
    pub meta: EntityMeta,
    pub customer: String,
    pub status: String,
    pub total: Option<u32>,
    pub notes: String,
}

impl Entity for Order {
    fn describe(schema: &mut SchemaBuilder<Self>) {
        schema.text("Customer", |o| &o.customer, |o| &mut o.customer);
        schema
            .text("Status", |o| &o.status, |o| &mut o.status)
            .default_value("open");
        schema.value("Total", |o| &o.total, |o| &mut o.total);
        schema
            .text("Notes", |o| &o.notes, |o| &mut o.notes)
            .not_persisted();
    }

    fn meta(&self) -> &EntityMeta {
        &self.meta
    }

    fn meta_mut(&mut self) -> &mut EntityMeta {
        &mut self.meta
    }

    fn table_name() -> &'static str {
        "orders"
    }
}

pub fn order(pk: &str, rk: &str, customer: &str) -> Order {
    Order {
        meta: EntityMeta::new(pk, rk),
        customer: customer.to_string(),
        ..Default::default()
    }
}

/// A second record type sharing some field names with [`Order`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Invoice {
    pub meta: EntityMeta,
    pub customer: String,
    pub total: Option<u32>,
    pub paid: Option<bool>,
}

impl Entity for Invoice {
    fn describe(schema: &mut SchemaBuilder<Self>) {
        schema.text("Customer", |i| &i.customer, |i| &mut i.customer);
        schema.value("Total", |i| &i.total, |i| &mut i.total);
        schema.value("Paid", |i| &i.paid, |i| &mut i.paid);
    }

    fn meta(&self) -> &EntityMeta {
        &self.meta
    }

    fn meta_mut(&mut self) -> &mut EntityMeta {
        &mut self.meta
    }
}

/// Batch calls and page reads observed across every table a provider opened.
#[derive(Default)]
pub struct Calls {
    pub batches: Mutex<Vec<(String, Vec<String>)>>,
    pub pages: Mutex<usize>,
}

impl Calls {
    pub fn batches(&self) -> Vec<(String, Vec<String>)> {
        self.batches.lock().clone()
    }

    pub fn pages(&self) -> usize {
        *self.pages.lock()
    }

    pub fn reset(&self) {
        self.batches.lock().clear();
        *self.pages.lock() = 0;
    }
}

pub struct RecordingTable {
    inner: Arc<MemoryTableStore>,
    calls: Arc<Calls>,
}

impl TableStore for RecordingTable {
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
        *self.calls.pages.lock() += 1;
        self.inner.query_segment(query, token)
    }

    fn execute_batch(&self, batch: &TableBatch) -> Result<Vec<OpOutcome>> {
        let row_keys = batch.ops().iter().map(|op| op.row_key().to_string()).collect();
        self.calls
            .batches
            .lock()
            .push((batch.partition_key().to_string(), row_keys));
        self.inner.execute_batch(batch)
    }

    fn execute(&self, op: &TableOp) -> Result<OpOutcome> {
        self.inner.execute(op)
    }
}

/// In-memory provider whose tables record batch calls and page reads.
pub struct RecordingProvider {
    pub inner: MemoryProvider,
    pub calls: Arc<Calls>,
}

impl RecordingProvider {
    pub fn new(page_size: usize) -> Arc<Self> {
        Arc::new(Self {
            inner: MemoryProvider::new().with_page_size(page_size),
            calls: Arc::new(Calls::default()),
        })
    }
}

impl StoreProvider for RecordingProvider {
    fn table(&self, name: &str) -> Result<Arc<dyn TableStore>> {
        Ok(Arc::new(RecordingTable {
            inner: self.inner.create_table(name),
            calls: self.calls.clone(),
        }))
    }

    fn queue(&self, name: &str) -> Result<Arc<dyn QueueStore>> {
        self.inner.queue(name)
    }
}
