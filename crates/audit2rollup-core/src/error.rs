//! Error types for decoding, encoding and aggregating event tables

use arrow::datatypes::DataType;
use thiserror::Error;

/// Errors raised while converting between raw bytes and Arrow tables
#[derive(Debug, Error)]
pub enum CodecError {
    /// The delimited text has no header column for the temporal key
    #[error("temporal column '{column}' missing from header")]
    MissingTemporalColumn { column: String },

    /// A temporal key value could not be parsed (row numbers are 1-based, header excluded)
    #[error("row {row}: cannot parse '{column}' value {value:?} as a timestamp")]
    InvalidTimestamp {
        column: String,
        row: usize,
        value: String,
    },

    /// A temporal key value is empty
    #[error("row {row}: '{column}' is empty")]
    MissingTimestamp { column: String, row: usize },

    /// Columnar encoding requires at least one column
    #[error("cannot encode a table without columns")]
    EmptySchema,

    /// Error from the Arrow CSV reader or compute kernels
    #[error("arrow: {0}")]
    Arrow(#[from] arrow::error::ArrowError),

    /// Error from the Parquet reader or writer
    #[error("parquet: {0}")]
    Parquet(#[from] parquet::errors::ParquetError),

    /// Ledger metadata stored in the columnar file is not valid JSON
    #[error("invalid metadata '{key}': {reason}")]
    InvalidMetadata { key: String, reason: String },
}

/// Errors raised by merge and resample
#[derive(Debug, Error)]
pub enum AggregateError {
    /// Resampling requires the temporal key column
    #[error("temporal column '{column}' is absent; cannot resample")]
    MissingTemporalKey { column: String },

    /// The temporal key exists but cannot be interpreted as a timestamp
    #[error("temporal column '{column}' has type {data_type} which is not a timestamp")]
    TemporalKeyType { column: String, data_type: DataType },

    /// Bucket width must be a positive duration
    #[error("bucket width must be greater than zero")]
    InvalidBucketWidth,

    /// The unmapped-column policy is `reject` and unmapped columns are present
    #[error("columns without an aggregation rule: {}", columns.join(", "))]
    UnmappedColumns { columns: Vec<String> },

    #[error("arrow: {0}")]
    Arrow(#[from] arrow::error::ArrowError),
}

pub type CodecResult<T> = std::result::Result<T, CodecError>;
pub type AggregateResult<T> = std::result::Result<T, AggregateError>;
