//! Per-process cache of record schemas and store handles.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, info};

use crate::api::queue::EntityQueue;
use crate::api::table::EntityTable;
use crate::config::EntitySettings;
use crate::error::Result;
use crate::store::{MemoryProvider, QueueStore, StoreProvider, TableStore};

use super::{Entity, Schema};

/// Owns the schema cache (one derived [`Schema`] per record type) and the
/// table and queue handle caches (one handle per name).
///
/// Construct one registry at startup and share it. All caches fill lazily on
/// first use and are safe to populate from several threads at once: a
/// lookup takes the read lock, and only a miss takes the write lock and
/// checks again before inserting.
pub struct EntityRegistry {
    provider: Arc<dyn StoreProvider>,
    settings: EntitySettings,
    schemas: RwLock<HashMap<TypeId, Arc<dyn Any + Send + Sync>>>,
    tables: RwLock<HashMap<String, Arc<dyn TableStore>>>,
    queues: RwLock<HashMap<String, Arc<dyn QueueStore>>>,
}

impl EntityRegistry {
    pub fn new(provider: Arc<dyn StoreProvider>, settings: EntitySettings) -> Result<Self> {
        settings.validate()?;
        info!(
            page_size = settings.page_size,
            max_batch_size = settings.max_batch_size,
            "entity registry ready"
        );
        Ok(Self {
            provider,
            settings,
            schemas: RwLock::new(HashMap::new()),
            tables: RwLock::new(HashMap::new()),
            queues: RwLock::new(HashMap::new()),
        })
    }

    /// A registry over fresh in-memory tables and queues with default settings.
    pub fn in_memory() -> Self {
        Self {
            provider: Arc::new(MemoryProvider::new()),
            settings: EntitySettings::default(),
            schemas: RwLock::new(HashMap::new()),
            tables: RwLock::new(HashMap::new()),
            queues: RwLock::new(HashMap::new()),
        }
    }

    pub fn settings(&self) -> &EntitySettings {
        &self.settings
    }

    /// The schema of `T`, derived on first use.
    pub fn schema<T: Entity>(&self) -> Arc<Schema<T>> {
        let id = TypeId::of::<T>();
        if let Some(cached) = self.schemas.read().get(&id).cloned()
            && let Ok(schema) = cached.downcast::<Schema<T>>()
        {
            return schema;
        }

        let mut schemas = self.schemas.write();
        if let Some(cached) = schemas.get(&id).cloned()
            && let Ok(schema) = cached.downcast::<Schema<T>>()
        {
            return schema;
        }
        let schema = Arc::new(Schema::<T>::derive());
        debug!(entity = %schema.entity(), fields = schema.len(), "derived schema");
        schemas.insert(id, schema.clone());
        schema
    }

    /// Handle to the table named by `T::table_name()`.
    pub fn table<T: Entity>(&self) -> Result<EntityTable<T>> {
        let store = self.table_store(T::table_name())?;
        Ok(EntityTable::new(store, self.schema::<T>())
            .with_max_batch_size(self.settings.max_batch_size)
            .with_page_size(self.settings.page_size))
    }

    /// Handle to the queue named by `T::table_name()`.
    pub fn queue<T: Entity>(&self) -> Result<EntityQueue<T>> {
        let store = self.queue_store(T::table_name())?;
        let queue = &self.settings.queue;
        Ok(EntityQueue::new(store, self.schema::<T>())
            .with_visibility(queue.visibility())
            .with_ttl(queue.ttl())
            .with_initial_delay(queue.initial_delay()))
    }

    pub fn table_store(&self, name: &str) -> Result<Arc<dyn TableStore>> {
        if let Some(store) = self.tables.read().get(name) {
            return Ok(store.clone());
        }
        let mut tables = self.tables.write();
        if let Some(store) = tables.get(name) {
            return Ok(store.clone());
        }
        let store = self.provider.table(name)?;
        debug!(table = %name, "opened table handle");
        tables.insert(name.to_string(), store.clone());
        Ok(store)
    }

    pub fn queue_store(&self, name: &str) -> Result<Arc<dyn QueueStore>> {
        if let Some(store) = self.queues.read().get(name) {
            return Ok(store.clone());
        }
        let mut queues = self.queues.write();
        if let Some(store) = queues.get(name) {
            return Ok(store.clone());
        }
        let store = self.provider.queue(name)?;
        debug!(queue = %name, "opened queue handle");
        queues.insert(name.to_string(), store.clone());
        Ok(store)
    }
}
