//! # ferridyn-entity
//!
//! Typed records over a partitioned table store and a message queue.
//!
//! A record type implements [`Entity`] and registers its fields once. The
//! crate derives a schema from that registration and maps records onto
//! rows. On top of that mapping it provides:
//!
//! - query-by-example filters and paginated queries
//! - partition-aware batching of writes (at most 100 operations per batch)
//! - iterate-and-update with rolling write-back
//! - typed queues whose payloads use a `name=value` line form
//! - JSON, HTML and INI renderings
//!
//! ## Quick Start
//!
//! ```no_run
//! use ferridyn_entity::{DuplicatePolicy, Entity, EntityMeta, EntityRegistry, SchemaBuilder};
//! use ferridyn_entity::api::QueryDescriptor;
//!
//! #[derive(Debug, Default)]
//! struct Order {
//!     meta: EntityMeta,
//!     customer: String,
//!     total: Option<u32>,
//! }
//!
//! impl Entity for Order {
//!     fn describe(schema: &mut SchemaBuilder<Self>) {
//!         schema.text("Customer", |o| &o.customer, |o| &mut o.customer);
//!         schema.value("Total", |o| &o.total, |o| &mut o.total);
//!     }
//!
//!     fn meta(&self) -> &EntityMeta {
//!         &self.meta
//!     }
//!
//!     fn meta_mut(&mut self) -> &mut EntityMeta {
//!         &mut self.meta
//!     }
//! }
//!
//! let registry = EntityRegistry::in_memory();
//! let orders = registry.table::<Order>().unwrap();
//!
//! let mut batch: Vec<Order> = (0..250)
//!     .map(|i| Order {
//!         meta: EntityMeta::new("2024-06", format!("{i:04}")),
//!         customer: "acme".into(),
//!         total: Some(i),
//!     })
//!     .collect();
//! orders.submit(&mut batch, DuplicatePolicy::Replace).unwrap();
//!
//! // Double every total, writing back only what changed.
//! let changed = orders
//!     .iterate(&QueryDescriptor::all(), |order| {
//!         order.total = order.total.map(|t| t * 2);
//!         true
//!     })
//!     .unwrap();
//! assert_eq!(changed, 250);
//! ```

pub mod api;
pub mod config;
pub mod encoding;
pub mod error;
pub mod schema;
pub mod store;
pub mod types;

#[cfg(test)]
mod test_support;

pub use config::{EntitySettings, StorageAccount};
pub use error::{Error, Result};
pub use schema::{Entity, EntityRegistry, Schema, SchemaBuilder};
pub use types::{DuplicatePolicy, EntityMeta, MAX_BATCH_SIZE, Row};
