// Integration tests for audit2rollup-core
//
// Tests the complete workflow from CSV bytes to a persisted rollup and back

use arrow::array::{Array, AsArray, Int64Array};
use arrow::datatypes::TimestampNanosecondType;
use audit2rollup_core::{
    decode_object, decode_parquet, encode_parquet, fold_batches, parse_event_time, Accumulator,
    AggregationRules, CsvOptions, RollupOptions, UnmappedColumnPolicy,
};
use std::collections::BTreeMap;

const SAMPLE: &str = include_str!("../testdata/cloudtrail_sample.csv");

fn sample_batch(source: &str) -> audit2rollup_core::Batch {
    decode_object(source, SAMPLE.as_bytes(), &CsvOptions::default()).unwrap()
}

#[test]
fn test_sample_rolls_up_into_sparse_windows() {
    let out = fold_batches(
        Accumulator::empty(),
        &[sample_batch("input/2021-03-04.csv")],
        &RollupOptions::default(),
    )
    .unwrap();

    // 10:00, 10:05, 10:20; 10:10 and 10:15 have no rows
    assert_eq!(out.rollup.num_rows(), 3);

    let starts = out.rollup.column(0).as_primitive::<TimestampNanosecondType>();
    assert_eq!(starts.value(0), parse_event_time("2021-03-04T10:00:00Z").unwrap());
    assert_eq!(starts.value(1), parse_event_time("2021-03-04T10:05:00Z").unwrap());
    assert_eq!(starts.value(2), parse_event_time("2021-03-04T10:20:00Z").unwrap());

    let schema = out.rollup.schema();
    let errors = out
        .rollup
        .column(schema.index_of("isError").unwrap())
        .as_any()
        .downcast_ref::<Int64Array>()
        .unwrap();
    assert_eq!(errors.values(), &[1, 1, 0]);

    let sources = out.rollup.column(schema.index_of("eventSource").unwrap());
    let first = sources.as_list::<i32>().value(0);
    let first: Vec<&str> = first.as_string::<i32>().iter().flatten().collect();
    assert_eq!(first, vec!["s3.amazonaws.com", "iam.amazonaws.com"]);

    assert!(schema.field_with_name("requestID").is_err());
}

#[test]
fn test_incremental_folds_match_single_fold() {
    let options = RollupOptions::default();

    let once = fold_batches(
        Accumulator::empty(),
        &[sample_batch("a.csv"), sample_batch("b.csv")],
        &options,
    )
    .unwrap();

    let first = fold_batches(Accumulator::empty(), &[sample_batch("a.csv")], &options).unwrap();
    let persisted = first.accumulator.to_parquet().unwrap();
    let restored = Accumulator::from_parquet(persisted).unwrap();
    let twice = fold_batches(restored, &[sample_batch("b.csv")], &options).unwrap();

    assert_eq!(once.rollup, twice.rollup);
    assert_eq!(once.accumulator.processed(), twice.accumulator.processed());
    assert_eq!(twice.accumulator.num_rows(), 10);
}

#[test]
fn test_rollup_survives_parquet_round_trip() {
    let options = RollupOptions {
        rules: AggregationRules::default().with_unmapped_policy(UnmappedColumnPolicy::Infer),
        ..RollupOptions::default()
    };
    let out = fold_batches(Accumulator::empty(), &[sample_batch("a.csv")], &options).unwrap();

    let bytes = encode_parquet(&out.rollup, &BTreeMap::new()).unwrap();
    let decoded = decode_parquet(bytes).unwrap();
    assert_eq!(decoded.batch, out.rollup);
    assert!(decoded.batch.schema().field_with_name("requestID").is_ok());
}
