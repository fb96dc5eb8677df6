//! Batch and accumulator types
//!
//! Both wrap an Arrow `RecordBatch`: a sparse table keyed by column name in
//! which absent values are explicit nulls.

use crate::codec::{decode_parquet, encode_parquet};
use crate::error::{CodecError, CodecResult};
use arrow::array::RecordBatch;
use arrow::datatypes::Schema;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

/// Footer metadata key holding the processed-object ledger
pub const LEDGER_METADATA_KEY: &str = "audit2rollup.processed_objects";

/// Rows decoded from exactly one source object
#[derive(Debug, Clone, PartialEq)]
pub struct Batch {
    /// Identity of the source object the rows came from
    pub source: String,
    pub table: RecordBatch,
}

impl Batch {
    pub fn new(source: impl Into<String>, table: RecordBatch) -> Self {
        Self {
            source: source.into(),
            table,
        }
    }

    pub fn num_rows(&self) -> usize {
        self.table.num_rows()
    }
}

/// The running merged dataset plus the keys of every object merged into it
#[derive(Debug, Clone, PartialEq)]
pub struct Accumulator {
    table: RecordBatch,
    processed: BTreeSet<String>,
}

impl Accumulator {
    /// Zero rows, no schema
    pub fn empty() -> Self {
        Self {
            table: RecordBatch::new_empty(Arc::new(Schema::empty())),
            processed: BTreeSet::new(),
        }
    }

    pub fn new(table: RecordBatch, processed: BTreeSet<String>) -> Self {
        Self { table, processed }
    }

    pub fn table(&self) -> &RecordBatch {
        &self.table
    }

    pub fn processed(&self) -> &BTreeSet<String> {
        &self.processed
    }

    pub fn has_processed(&self, key: &str) -> bool {
        self.processed.contains(key)
    }

    pub fn num_rows(&self) -> usize {
        self.table.num_rows()
    }

    /// True when nothing has ever been merged (no columns at all)
    pub fn is_empty(&self) -> bool {
        self.table.num_columns() == 0
    }

    pub fn into_parts(self) -> (RecordBatch, BTreeSet<String>) {
        (self.table, self.processed)
    }

    /// Encode to Parquet, carrying the ledger in footer metadata
    pub fn to_parquet(&self) -> CodecResult<Vec<u8>> {
        let ledger = serde_json::to_string(&self.processed).map_err(|e| {
            CodecError::InvalidMetadata {
                key: LEDGER_METADATA_KEY.to_string(),
                reason: e.to_string(),
            }
        })?;
        let mut metadata = BTreeMap::new();
        metadata.insert(LEDGER_METADATA_KEY.to_string(), ledger);
        encode_parquet(&self.table, &metadata)
    }

    /// Decode from Parquet; a file without a ledger yields an empty ledger
    pub fn from_parquet(bytes: Vec<u8>) -> CodecResult<Self> {
        let decoded = decode_parquet(bytes)?;
        let processed = match decoded.metadata.get(LEDGER_METADATA_KEY) {
            Some(raw) => serde_json::from_str::<BTreeSet<String>>(raw).map_err(|e| {
                CodecError::InvalidMetadata {
                    key: LEDGER_METADATA_KEY.to_string(),
                    reason: e.to_string(),
                }
            })?,
            None => BTreeSet::new(),
        };
        Ok(Self {
            table: decoded.batch,
            processed,
        })
    }
}

impl Default for Accumulator {
    fn default() -> Self {
        Self::empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{decode_csv, CsvOptions};

    #[test]
    fn test_empty_accumulator() {
        let acc = Accumulator::empty();
        assert!(acc.is_empty());
        assert_eq!(acc.num_rows(), 0);
        assert!(acc.processed().is_empty());
    }

    #[test]
    fn test_parquet_round_trip_keeps_ledger() {
        let table = decode_csv(
            b"eventTime,awsRegion\n2021-01-01T00:00:00Z,us-east-1\n",
            &CsvOptions::default(),
        )
        .unwrap();
        let processed: BTreeSet<String> = ["input/a.csv".to_string(), "input/b.csv".to_string()]
            .into_iter()
            .collect();
        let acc = Accumulator::new(table, processed);

        let restored = Accumulator::from_parquet(acc.to_parquet().unwrap()).unwrap();
        assert_eq!(restored, acc);
        assert!(restored.has_processed("input/a.csv"));
    }
}
