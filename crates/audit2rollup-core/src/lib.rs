// audit2rollup-core - Platform-agnostic core logic
//
// This crate contains the PURE processing logic for turning delimited event
// logs into time-bucketed rollups. No I/O, no async, no runtime dependencies.
//
// - Essence: CSV bytes → merged table → resampled table → Parquet bytes
// - Accident: object storage, credentials, invocation envelopes

use arrow::array::RecordBatch;
use std::time::Duration;

pub mod aggregate;
pub mod codec;
pub mod error;
pub mod rules;
pub mod table;

// Re-export commonly used types
pub use aggregate::{merge, resample, DEFAULT_BUCKET_WIDTH};
pub use codec::{decode_csv, decode_parquet, encode_parquet, parse_event_time, CsvOptions};
pub use error::{AggregateError, AggregateResult, CodecError, CodecResult};
pub use rules::{
    AggregationRules, ColumnRule, Reduction, UnmappedColumnPolicy, DEFAULT_TIME_COLUMN,
};
pub use table::{Accumulator, Batch};

/// How merged rows are bucketed and reduced
#[derive(Debug, Clone, PartialEq)]
pub struct RollupOptions {
    pub time_column: String,
    pub bucket_width: Duration,
    pub rules: AggregationRules,
}

impl Default for RollupOptions {
    fn default() -> Self {
        Self {
            time_column: DEFAULT_TIME_COLUMN.to_string(),
            bucket_width: DEFAULT_BUCKET_WIDTH,
            rules: AggregationRules::default(),
        }
    }
}

/// Result of folding new batches into the accumulator
#[derive(Debug)]
pub struct RollupOutput {
    /// Accumulator including the new rows, ready to persist
    pub accumulator: Accumulator,
    /// Resampled view over the full accumulator
    pub rollup: RecordBatch,
}

/// Decode one source object into a batch tagged with its key
pub fn decode_object(source: &str, bytes: &[u8], options: &CsvOptions) -> CodecResult<Batch> {
    let table = decode_csv(bytes, options)?;
    Ok(Batch::new(source, table))
}

/// Merge `batches` into `accumulator` and resample the result.
///
/// The rollup is always recomputed over the whole accumulator, so replaying
/// the same accumulator yields the same rollup.
pub fn fold_batches(
    accumulator: Accumulator,
    batches: &[Batch],
    options: &RollupOptions,
) -> AggregateResult<RollupOutput> {
    let accumulator = merge(accumulator, batches)?;
    let rollup = resample(
        accumulator.table(),
        &options.time_column,
        options.bucket_width,
        &options.rules,
    )?;
    Ok(RollupOutput {
        accumulator,
        rollup,
    })
}
