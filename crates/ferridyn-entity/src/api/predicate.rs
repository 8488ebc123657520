//! Query-by-example: filters and column selections built from sparse records.

use crate::schema::access::resolve;
use crate::schema::{Entity, Schema};
use crate::types::{PARTITION_KEY, ROW_KEY};

use super::filter::{Comparison, FilterExpr};

/// How per-field clauses of an example record are joined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Combinator {
    #[default]
    And,
    Or,
}

/// Build a filter from every non-empty field of `record`, in schema order.
///
/// Each field contributes `field <comparison> value`; the clauses are joined
/// with `combinator`. When the record carries a partition key, the result is
/// `PartitionKey eq pk and (<clauses>)` regardless of `combinator`. Returns
/// `None` (match everything) when there is nothing to filter on; a record
/// without a partition key yields a cross-partition filter.
pub fn build_filter<T: Entity>(
    schema: &Schema<T>,
    record: &T,
    comparison: Comparison,
    combinator: Combinator,
) -> Option<FilterExpr> {
    let mut clauses: Vec<FilterExpr> = schema
        .fields()
        .iter()
        .filter_map(|field| {
            let value = resolve(field.read(record), field.default_value());
            (!value.is_empty()).then(|| FilterExpr::compare(field.name(), comparison, value))
        })
        .collect();

    let body = match clauses.len() {
        0 => None,
        1 => clauses.pop(),
        _ => Some(match combinator {
            Combinator::And => FilterExpr::And(clauses),
            Combinator::Or => FilterExpr::Or(clauses),
        }),
    };

    let partition_key = &record.meta().partition_key;
    if partition_key.is_empty() {
        return body;
    }
    let partition = partition_clause(partition_key);
    Some(match body {
        Some(body) => FilterExpr::And(vec![partition, body]),
        None => partition,
    })
}

/// Names of the fields set on `record`, in schema order.
pub fn build_selection<T: Entity>(schema: &Schema<T>, record: &T) -> Vec<String> {
    schema
        .fields()
        .iter()
        .filter(|field| field.read(record).is_some())
        .map(|field| field.name().to_string())
        .collect()
}

/// `PartitionKey eq partition_key`
pub fn partition_clause(partition_key: &str) -> FilterExpr {
    FilterExpr::eq(PARTITION_KEY, partition_key)
}

/// `PartitionKey eq pk and (RowKey eq rk1 or RowKey eq rk2 ...)`
pub fn row_keys_filter(partition_key: &str, row_keys: &[&str]) -> FilterExpr {
    let mut keys: Vec<FilterExpr> = row_keys
        .iter()
        .map(|rk| FilterExpr::eq(ROW_KEY, *rk))
        .collect();
    let keys = if keys.len() == 1 {
        keys.remove(0)
    } else {
        FilterExpr::Or(keys)
    };
    FilterExpr::And(vec![partition_clause(partition_key), keys])
}
