//! Column selection: return only selected columns from rows.
//!
//! Key columns (partition key, row key), the etag and the timestamp always
//! travel with the row; selection trims only the property map.

use crate::types::{PARTITION_KEY, ROW_KEY, Row};

/// Trim a row to the selected columns. An empty selection returns the full row.
pub fn apply_selection(row: &Row, columns: &[String]) -> Row {
    if columns.is_empty() {
        return row.clone();
    }

    let mut result = Row {
        partition_key: row.partition_key.clone(),
        row_key: row.row_key.clone(),
        etag: row.etag.clone(),
        timestamp: row.timestamp,
        properties: Default::default(),
    };
    for column in columns {
        if let Some(value) = row.properties.get(column) {
            result.properties.insert(column.clone(), value.clone());
        }
    }
    result
}

/// Drop key columns from a selection list so they are not requested twice.
pub fn without_key_columns(columns: &[String]) -> Vec<String> {
    columns
        .iter()
        .filter(|c| c.as_str() != PARTITION_KEY && c.as_str() != ROW_KEY)
        .cloned()
        .collect()
}
