// Integration tests for audit2rollup-storage
//
// Exercises the accumulator store and snapshot writer against one in-memory bucket

use audit2rollup_core::{decode_object, fold_batches, Accumulator, CsvOptions, RollupOptions};
use audit2rollup_storage::{AccumulatorStore, BlobGateway, RetryPolicy, SnapshotWriter};
use bytes::Bytes;
use chrono::{TimeZone, Utc};
use opendal::{services, Operator};
use std::collections::BTreeMap;

fn bucket() -> BlobGateway {
    let operator = Operator::new(services::Memory::default()).unwrap().finish();
    BlobGateway::from_operator("rollups", operator)
}

#[tokio::test]
async fn test_two_invocations_share_the_accumulator() {
    let gateway = bucket();
    let store = AccumulatorStore::new(gateway.clone(), "accumulator/events.parquet");
    let snapshots = SnapshotWriter::new(gateway.clone(), "rollups/");
    let options = RollupOptions::default();

    for (n, (key, csv)) in [
        ("input/a.csv", "eventTime,isError\n2021-01-01T00:00:00Z,true\n"),
        ("input/b.csv", "eventTime,isError\n2021-01-01T00:07:00Z,false\n"),
    ]
    .into_iter()
    .enumerate()
    {
        let accumulator = store.load().await.unwrap();
        let batch = decode_object(key, csv.as_bytes(), &CsvOptions::default()).unwrap();
        let out = fold_batches(accumulator, &[batch], &options).unwrap();

        let rollup =
            audit2rollup_core::encode_parquet(&out.rollup, &BTreeMap::new()).unwrap();
        let at = Utc.with_ymd_and_hms(2021, 1, 1, 0, 10, n as u32).unwrap();
        snapshots.write(Bytes::from(rollup), at).await.unwrap();
        store.save(&out.accumulator).await.unwrap();
    }

    let accumulator = store.load().await.unwrap();
    assert_eq!(accumulator.num_rows(), 2);
    assert!(accumulator.has_processed("input/a.csv"));
    assert!(accumulator.has_processed("input/b.csv"));

    assert!(gateway.exists("rollups/ms-2021-01-01T00:10:00.parquet").await.unwrap());
    let latest = gateway.get("rollups/ms-2021-01-01T00:10:01.parquet").await.unwrap();
    let decoded = audit2rollup_core::decode_parquet(latest).unwrap();
    assert_eq!(decoded.batch.num_rows(), 2);
}

#[tokio::test]
async fn test_save_under_retry_policy() {
    let store = AccumulatorStore::new(bucket(), "accumulator/events.parquet");
    let batch = decode_object(
        "input/a.csv",
        b"eventTime,isError\n2021-01-01T00:00:00Z,true\n",
        &CsvOptions::default(),
    )
    .unwrap();
    let accumulator = audit2rollup_core::merge(Accumulator::empty(), &[batch]).unwrap();
    let encoded = store.encode(&accumulator).unwrap();

    RetryPolicy::default()
        .retry_async(|_| store.save_encoded(encoded.clone()), |e| !e.is_not_found())
        .await
        .unwrap();

    assert_eq!(store.load().await.unwrap(), accumulator);
}
