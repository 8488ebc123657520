//! Error types for all record-mapping operations.

use std::io;
use thiserror::Error;

/// Top-level error type for ferridyn-entity operations.
#[derive(Debug, Error)]
pub enum Error {
    /// A point read or conditional write addressed a row that does not exist.
    #[error("entity not found: {partition_key}/{row_key}")]
    NotFound {
        partition_key: String,
        row_key: String,
    },

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Concurrency(#[from] ConcurrencyError),

    #[error(transparent)]
    Schema(#[from] SchemaError),

    #[error(transparent)]
    Batch(#[from] BatchError),

    #[error(transparent)]
    Query(#[from] QueryError),

    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl Error {
    pub fn not_found(partition_key: &str, row_key: &str) -> Self {
        Error::NotFound {
            partition_key: partition_key.to_string(),
            row_key: row_key.to_string(),
        }
    }

    /// Whether this error is the "row does not exist" outcome of a point operation.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound { .. })
    }
}

/// Faults raised by a table or queue store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("table not found: {0}")]
    TableNotFound(String),

    #[error("queue not found: {0}")]
    QueueNotFound(String),

    #[error("entity already exists: {partition_key}/{row_key}")]
    EntityAlreadyExists {
        partition_key: String,
        row_key: String,
    },

    #[error("message not found: {0}")]
    MessageNotFound(String),

    #[error("lease for message {0} is held by another receiver")]
    LeaseMismatch(String),

    #[error("store returned status {status}: {message}")]
    Status { status: u16, message: String },

    #[error("transport error: {0}")]
    Transport(String),
}

#[derive(Debug, Error)]
pub enum ConcurrencyError {
    #[error("etag mismatch: expected {expected}, actual {actual}")]
    VersionMismatch { expected: String, actual: String },
}

#[derive(Debug, Error)]
pub enum SchemaError {
    #[error("unknown field '{field}' on {entity}")]
    UnknownField { entity: String, field: String },

    #[error("invalid value for field '{field}': '{value}' ({reason})")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },
}

/// One failed slice of a multi-slice batch write.
#[derive(Debug)]
pub struct SliceFailure {
    pub partition_key: String,
    pub rows: usize,
    pub error: Box<Error>,
}

#[derive(Debug, Error)]
pub enum BatchError {
    #[error("batch exceeds maximum size of {max} operations (got {actual})")]
    TooLarge { max: usize, actual: usize },

    #[error("batch is scoped to partition '{expected}' but operation targets '{actual}'")]
    MixedPartitions { expected: String, actual: String },

    #[error("row key '{0}' appears more than once in one batch")]
    DuplicateRowKey(String),

    #[error("batch contains no operations")]
    Empty,

    /// A slice failed and the remaining slices were not submitted.
    #[error(
        "batch slice for partition '{partition_key}' failed after {committed_slices} committed slices ({written} rows written): {source}"
    )]
    Aborted {
        partition_key: String,
        committed_slices: usize,
        written: usize,
        #[source]
        source: Box<Error>,
    },

    /// Some slices failed while independent slices were still submitted.
    #[error("{} batch slices failed; {written} rows written", .failures.len())]
    Partial {
        written: usize,
        /// Records an iterate callback reported as changed; `None` for plain writes.
        changed: Option<usize>,
        failures: Vec<SliceFailure>,
    },
}

#[derive(Debug, Error)]
pub enum QueryError {
    #[error("invalid filter expression: {0}")]
    InvalidFilter(String),
}

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("expected a JSON object, got {0}")]
    NotAnObject(&'static str),

    #[error("unsupported JSON value for field '{0}'")]
    UnsupportedValue(String),

    #[error("section [{0}] not found")]
    SectionNotFound(String),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("failed to parse settings: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid connection string: {0}")]
    ConnectionString(String),

    #[error("invalid setting '{name}': {reason}")]
    InvalidSetting { name: &'static str, reason: String },
}

pub type Result<T> = std::result::Result<T, Error>;
