//! Record schemas: explicit field registration for mapped record types.
//!
//! A record type implements [`Entity`] and lists its fields once in
//! [`Entity::describe`]. The resulting [`Schema`] is the ordered set of
//! persisted fields with the identity field (`RowKey`) first, followed by the
//! declared fields in registration order. Fields registered as not persisted
//! are kept out of the schema.

pub mod access;
pub mod registry;

use std::fmt::Display;
use std::str::FromStr;

use tracing::debug;

use crate::error::SchemaError;
use crate::types::{EntityMeta, PARTITION_KEY, ROW_KEY, TIMESTAMP};

pub use registry::EntityRegistry;

/// Reads a field as text. `None` means the field is unset.
pub type Getter<T> = Box<dyn Fn(&T) -> Option<String> + Send + Sync>;

/// Writes a field from text. `None` unsets the field.
pub type Setter<T> = Box<dyn Fn(&mut T, Option<&str>) -> Result<(), SchemaError> + Send + Sync>;

/// A record type that can be mapped onto a table row.
pub trait Entity: Default + Send + Sync + 'static {
    /// Register the record's fields.
    fn describe(schema: &mut SchemaBuilder<Self>);

    fn meta(&self) -> &EntityMeta;

    fn meta_mut(&mut self) -> &mut EntityMeta;

    /// Table and queue name used for this record type.
    fn table_name() -> &'static str {
        let full = std::any::type_name::<Self>();
        full.rsplit("::").next().unwrap_or(full)
    }
}

/// One field of a record type: name, accessors and schema default.
pub struct FieldDescriptor<T> {
    name: String,
    get: Getter<T>,
    set: Setter<T>,
    default: Option<String>,
    persisted: bool,
    identity: bool,
}

impl<T> FieldDescriptor<T> {
    fn new(name: &str, get: Getter<T>, set: Setter<T>) -> Self {
        Self {
            name: name.to_string(),
            get,
            set,
            default: None,
            persisted: true,
            identity: false,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn default_value(&self) -> Option<&str> {
        self.default.as_deref()
    }

    pub fn is_identity(&self) -> bool {
        self.identity
    }

    pub fn is_persisted(&self) -> bool {
        self.persisted
    }

    pub(crate) fn read(&self, record: &T) -> Option<String> {
        (self.get)(record)
    }

    pub(crate) fn write(&self, record: &mut T, value: Option<&str>) -> Result<(), SchemaError> {
        (self.set)(record, value)
    }
}

impl<T> std::fmt::Debug for FieldDescriptor<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FieldDescriptor")
            .field("name", &self.name)
            .field("default", &self.default)
            .field("persisted", &self.persisted)
            .field("identity", &self.identity)
            .finish()
    }
}

/// Options for a field that was just registered.
pub struct FieldOptions<'a, T> {
    field: &'a mut FieldDescriptor<T>,
}

impl<T> FieldOptions<'_, T> {
    /// Value reported for this field while it is unset.
    pub fn default_value(self, value: impl Into<String>) -> Self {
        self.field.default = Some(value.into());
        self
    }

    /// Keep the field off the schema: it is never written, read or filtered on.
    pub fn not_persisted(self) -> Self {
        self.field.persisted = false;
        self
    }
}

/// Collects field registrations for one record type.
pub struct SchemaBuilder<T> {
    fields: Vec<FieldDescriptor<T>>,
}

impl<T: Entity> SchemaBuilder<T> {
    fn new() -> Self {
        Self {
            fields: vec![identity_field::<T>()],
        }
    }

    /// Register a field with custom accessors.
    pub fn field<G, S>(&mut self, name: &str, get: G, set: S) -> FieldOptions<'_, T>
    where
        G: Fn(&T) -> Option<String> + Send + Sync + 'static,
        S: Fn(&mut T, Option<&str>) -> Result<(), SchemaError> + Send + Sync + 'static,
    {
        self.push(FieldDescriptor::new(name, Box::new(get), Box::new(set)))
    }

    /// Register a `String` field. An empty string counts as unset.
    pub fn text(
        &mut self,
        name: &str,
        get: fn(&T) -> &String,
        get_mut: fn(&mut T) -> &mut String,
    ) -> FieldOptions<'_, T> {
        self.field(
            name,
            move |record: &T| {
                let value = get(record);
                (!value.is_empty()).then(|| value.clone())
            },
            move |record: &mut T, value: Option<&str>| {
                *get_mut(record) = value.unwrap_or_default().to_string();
                Ok(())
            },
        )
    }

    /// Register an optional typed field stored through its `Display`/`FromStr` text form.
    pub fn value<V>(
        &mut self,
        name: &str,
        get: fn(&T) -> &Option<V>,
        get_mut: fn(&mut T) -> &mut Option<V>,
    ) -> FieldOptions<'_, T>
    where
        V: FromStr + Display + 'static,
        V::Err: Display,
    {
        let field = name.to_string();
        self.field(
            name,
            move |record: &T| get(record).as_ref().map(|v| v.to_string()),
            move |record: &mut T, value: Option<&str>| {
                let parsed = match value {
                    None | Some("") => None,
                    Some(text) => Some(text.parse::<V>().map_err(|e| {
                        SchemaError::InvalidValue {
                            field: field.clone(),
                            value: text.to_string(),
                            reason: e.to_string(),
                        }
                    })?),
                };
                *get_mut(record) = parsed;
                Ok(())
            },
        )
    }

    fn push(&mut self, field: FieldDescriptor<T>) -> FieldOptions<'_, T> {
        self.fields.push(field);
        let last = self.fields.len() - 1;
        FieldOptions {
            field: &mut self.fields[last],
        }
    }

    fn build(self) -> Schema<T> {
        let entity = T::table_name().to_string();
        let mut fields: Vec<FieldDescriptor<T>> = Vec::with_capacity(self.fields.len());
        let mut excluded: Vec<String> = Vec::new();

        for field in self.fields {
            let reserved = !field.identity
                && matches!(field.name.as_str(), PARTITION_KEY | ROW_KEY | TIMESTAMP);
            let duplicate =
                fields.iter().any(|f| f.name == field.name) || excluded.contains(&field.name);
            if reserved || duplicate {
                debug!(
                    entity = %entity,
                    field = %field.name,
                    "skipping reserved or duplicate field"
                );
                continue;
            }
            if !field.persisted {
                excluded.push(field.name);
                continue;
            }
            fields.push(field);
        }

        Schema {
            entity,
            fields,
            excluded,
        }
    }
}

/// The identity field maps `RowKey` onto the record metadata.
fn identity_field<T: Entity>() -> FieldDescriptor<T> {
    let mut field = FieldDescriptor::new(
        ROW_KEY,
        Box::new(|record: &T| {
            let rk = &record.meta().row_key;
            (!rk.is_empty()).then(|| rk.clone())
        }),
        Box::new(|record: &mut T, value: Option<&str>| {
            record.meta_mut().row_key = value.unwrap_or_default().to_string();
            Ok(())
        }),
    );
    field.identity = true;
    field
}

/// Ordered persisted field set of one record type.
#[derive(Debug)]
pub struct Schema<T> {
    entity: String,
    fields: Vec<FieldDescriptor<T>>,
    excluded: Vec<String>,
}

impl<T: Entity> Schema<T> {
    /// Derive the schema of `T`. Prefer [`EntityRegistry::schema`], which
    /// derives once per type and caches the result.
    pub fn derive() -> Self {
        let mut builder = SchemaBuilder::new();
        T::describe(&mut builder);
        builder.build()
    }
}

impl<T> Schema<T> {
    /// Name of the record type this schema maps.
    pub fn entity(&self) -> &str {
        &self.entity
    }

    /// Persisted fields, identity first.
    pub fn fields(&self) -> &[FieldDescriptor<T>] {
        &self.fields
    }

    pub fn field(&self, name: &str) -> Option<&FieldDescriptor<T>> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|f| f.name.as_str())
    }

    /// Fields registered on the type but excluded from persistence.
    pub fn excluded(&self) -> &[String] {
        &self.excluded
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}
