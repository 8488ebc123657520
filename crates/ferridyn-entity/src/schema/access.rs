//! Field access by name, default resolution and row conversion.
//!
//! Reads resolve in three tiers: the field's current value, then the
//! schema default registered for the field, then the empty string.

use crate::error::{Result, SchemaError};
use crate::types::{PARTITION_KEY, Row};

use super::{Entity, Schema};

/// Resolve a field read: current value, then schema default, then empty.
pub fn resolve(current: Option<String>, default: Option<&str>) -> String {
    match current {
        Some(value) => value,
        None => default.map(str::to_string).unwrap_or_default(),
    }
}

impl<T: Entity> Schema<T> {
    fn require(&self, name: &str) -> Result<&super::FieldDescriptor<T>> {
        self.field(name).ok_or_else(|| {
            SchemaError::UnknownField {
                entity: self.entity().to_string(),
                field: name.to_string(),
            }
            .into()
        })
    }

    /// The field's value as currently set on the record, `None` if unset.
    pub fn raw(&self, record: &T, name: &str) -> Result<Option<String>> {
        Ok(self.require(name)?.read(record))
    }

    /// The field's value with default resolution applied.
    pub fn get(&self, record: &T, name: &str) -> Result<String> {
        let field = self.require(name)?;
        Ok(resolve(field.read(record), field.default_value()))
    }

    /// Set a field from text. `None` resets the field to its schema default.
    pub fn set(&self, record: &mut T, name: &str, value: Option<&str>) -> Result<()> {
        let field = self.require(name)?;
        let value = value.or(field.default_value());
        field.write(record, value)?;
        Ok(())
    }

    /// `(name, resolved value)` for every schema field, in schema order.
    pub fn values(&self, record: &T) -> Vec<(&str, String)> {
        self.fields()
            .iter()
            .map(|f| (f.name(), resolve(f.read(record), f.default_value())))
            .collect()
    }

    /// Build the store row for a record. Fields resolving to an empty value
    /// are left out of the row.
    pub fn to_row(&self, record: &T) -> Row {
        let meta = record.meta();
        let mut row = Row::new(meta.partition_key.clone(), meta.row_key.clone());
        row.etag = meta.etag.clone();
        for field in self.fields().iter().filter(|f| !f.is_identity()) {
            let value = resolve(field.read(record), field.default_value());
            if !value.is_empty() {
                row.properties.insert(field.name().to_string(), value);
            }
        }
        row
    }

    /// Build a partial row carrying only the fields set on `record`, with no
    /// default filling. Used for merge writes.
    pub fn to_patch_row(&self, record: &T) -> Row {
        let meta = record.meta();
        let mut row = Row::new(meta.partition_key.clone(), meta.row_key.clone());
        row.etag = meta.etag.clone();
        for field in self.fields().iter().filter(|f| !f.is_identity()) {
            if let Some(value) = field.read(record) {
                row.properties.insert(field.name().to_string(), value);
            }
        }
        row
    }

    /// Materialize a fresh record from a store row. Columns missing from the
    /// row fall back to schema defaults.
    pub fn from_row(&self, row: &Row) -> Result<T> {
        let mut record = T::default();
        self.apply_row(&mut record, row)?;
        Ok(record)
    }

    /// Overwrite a record's keys, version and fields from a store row.
    pub fn apply_row(&self, record: &mut T, row: &Row) -> Result<()> {
        {
            let meta = record.meta_mut();
            meta.partition_key = row.partition_key.clone();
            meta.row_key = row.row_key.clone();
            meta.etag = row.etag.clone();
            meta.timestamp = Some(row.timestamp);
        }
        for field in self.fields().iter().filter(|f| !f.is_identity()) {
            let value = row
                .properties
                .get(field.name())
                .map(String::as_str)
                .or(field.default_value());
            field.write(record, value)?;
        }
        Ok(())
    }

    /// Set a column by name, routing `PartitionKey` to the record metadata.
    pub(crate) fn set_column(
        &self,
        record: &mut T,
        name: &str,
        value: Option<&str>,
    ) -> Result<bool> {
        if name == PARTITION_KEY {
            record.meta_mut().partition_key = value.unwrap_or_default().to_string();
            return Ok(true);
        }
        if self.field(name).is_none() {
            return Ok(false);
        }
        self.set(record, name, value)?;
        Ok(true)
    }
}

/// Copy every field the two schemas share by name from `src` to `dst`,
/// including the partition key. Returns the number of fields copied.
pub fn copy_fields<S: Entity, D: Entity>(
    src_schema: &Schema<S>,
    src: &S,
    dst_schema: &Schema<D>,
    dst: &mut D,
) -> Result<usize> {
    dst.meta_mut().partition_key = src.meta().partition_key.clone();
    let mut copied = 0;
    for field in src_schema.fields() {
        if dst_schema.field(field.name()).is_none() {
            continue;
        }
        let value = field.read(src);
        dst_schema.set(dst, field.name(), value.as_deref())?;
        copied += 1;
    }
    Ok(copied)
}
