//! Filter expressions sent to the table store with range reads.
//!
//! A filter is a tree of property comparisons joined by `and`/`or`/`not`.
//! Stores evaluate it server-side against string-valued rows; `Display`
//! renders the textual form (`PartitionKey eq 'A' and (Name eq 'x')`).

use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::QueryError;
use crate::types::Row;

/// Comparison applied between a row property and a literal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Comparison {
    #[default]
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl Comparison {
    pub fn keyword(self) -> &'static str {
        match self {
            Comparison::Eq => "eq",
            Comparison::Ne => "ne",
            Comparison::Lt => "lt",
            Comparison::Le => "le",
            Comparison::Gt => "gt",
            Comparison::Ge => "ge",
        }
    }

    fn holds(self, ord: Ordering) -> bool {
        match self {
            Comparison::Eq => ord == Ordering::Equal,
            Comparison::Ne => ord != Ordering::Equal,
            Comparison::Lt => ord == Ordering::Less,
            Comparison::Le => ord != Ordering::Greater,
            Comparison::Gt => ord == Ordering::Greater,
            Comparison::Ge => ord != Ordering::Less,
        }
    }
}

/// A filter expression evaluated against a stored row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum FilterExpr {
    Compare {
        property: String,
        op: Comparison,
        value: String,
    },
    And(Vec<FilterExpr>),
    Or(Vec<FilterExpr>),
    Not(Box<FilterExpr>),
}

/// Maximum nesting depth accepted by [`FilterExpr::eval`].
const MAX_EXPRESSION_DEPTH: usize = 16;

impl FilterExpr {
    /// Evaluate against a row.
    ///
    /// A property missing from the row only satisfies `ne`.
    pub fn eval(&self, row: &Row) -> Result<bool, QueryError> {
        self.eval_inner(row, 0)
    }

    fn eval_inner(&self, row: &Row, depth: usize) -> Result<bool, QueryError> {
        if depth > MAX_EXPRESSION_DEPTH {
            return Err(QueryError::InvalidFilter(format!(
                "expression depth exceeds maximum of {MAX_EXPRESSION_DEPTH}"
            )));
        }

        match self {
            FilterExpr::Compare {
                property,
                op,
                value,
            } => Ok(match row.get(property) {
                Some(actual) => op.holds(actual.cmp(value.as_str())),
                None => *op == Comparison::Ne,
            }),
            FilterExpr::And(exprs) => {
                for expr in exprs {
                    if !expr.eval_inner(row, depth + 1)? {
                        return Ok(false);
                    }
                }
                Ok(true)
            }
            FilterExpr::Or(exprs) => {
                for expr in exprs {
                    if expr.eval_inner(row, depth + 1)? {
                        return Ok(true);
                    }
                }
                Ok(false)
            }
            FilterExpr::Not(expr) => Ok(!expr.eval_inner(row, depth + 1)?),
        }
    }

    fn is_compound(&self) -> bool {
        matches!(self, FilterExpr::And(v) | FilterExpr::Or(v) if v.len() > 1)
    }
}

// ---------------------------------------------------------------------------
// Convenience constructors
// ---------------------------------------------------------------------------

impl FilterExpr {
    pub fn compare(property: impl Into<String>, op: Comparison, value: impl Into<String>) -> Self {
        FilterExpr::Compare {
            property: property.into(),
            op,
            value: value.into(),
        }
    }

    /// `property eq value`
    pub fn eq(property: impl Into<String>, value: impl Into<String>) -> Self {
        Self::compare(property, Comparison::Eq, value)
    }

    /// `property ne value`
    pub fn ne(property: impl Into<String>, value: impl Into<String>) -> Self {
        Self::compare(property, Comparison::Ne, value)
    }

    /// `property lt value`
    pub fn lt(property: impl Into<String>, value: impl Into<String>) -> Self {
        Self::compare(property, Comparison::Lt, value)
    }

    /// `property ge value`
    pub fn ge(property: impl Into<String>, value: impl Into<String>) -> Self {
        Self::compare(property, Comparison::Ge, value)
    }

    /// `expr1 and expr2 and ...`
    pub fn and(exprs: Vec<FilterExpr>) -> Self {
        FilterExpr::And(exprs)
    }

    /// `expr1 or expr2 or ...`
    pub fn or(exprs: Vec<FilterExpr>) -> Self {
        FilterExpr::Or(exprs)
    }

    /// `not expr`
    #[allow(clippy::should_implement_trait)]
    pub fn not(expr: FilterExpr) -> Self {
        FilterExpr::Not(Box::new(expr))
    }
}

fn write_joined(f: &mut fmt::Formatter<'_>, exprs: &[FilterExpr], keyword: &str) -> fmt::Result {
    for (i, expr) in exprs.iter().enumerate() {
        if i > 0 {
            write!(f, " {keyword} ")?;
        }
        if expr.is_compound() {
            write!(f, "({expr})")?;
        } else {
            write!(f, "{expr}")?;
        }
    }
    Ok(())
}

impl fmt::Display for FilterExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FilterExpr::Compare {
                property,
                op,
                value,
            } => write!(f, "{property} {} '{}'", op.keyword(), value.replace('\'', "''")),
            FilterExpr::And(exprs) => write_joined(f, exprs, "and"),
            FilterExpr::Or(exprs) => write_joined(f, exprs, "or"),
            FilterExpr::Not(expr) => write!(f, "not ({expr})"),
        }
    }
}
