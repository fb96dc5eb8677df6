// Batch orchestrator
//
// One invocation, end to end:
//   Received → Authenticated → Fetched(n) → Merged → Resampled → Persisted
//
// Fetches run concurrently (bounded) and are joined before merging. The
// rollup snapshot is written before the accumulator so a failure between the
// two leaves the accumulator untouched and redelivery replays the batch.

use crate::error::{Result, RollupError};
use crate::message::{ObjectRef, SourceObject};
use crate::report::{InvocationReport, InvocationStatus, QuarantinedObject};
use arrow::array::RecordBatch;
use audit2rollup_config::{ObjectErrorPolicy, RuntimeConfig};
use audit2rollup_core::{
    decode_object, encode_parquet, fold_batches, Accumulator, Batch, CsvOptions, RollupOptions,
};
use audit2rollup_storage::snapshot::snapshot_key;
use audit2rollup_storage::{
    AccumulatorStore, BlobGateway, CredentialProvider, GatewayFactory, RetryPolicy,
    ScopedCredential, SnapshotWriter, StorageError,
};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

/// Footer key recording the bucket width a rollup was computed with
pub const BUCKET_WIDTH_METADATA_KEY: &str = "audit2rollup.bucket_width_secs";

#[derive(Debug, Clone)]
pub struct PipelineSettings {
    /// Bucket for objects whose message names none
    pub source_bucket: String,
    pub source_role: Option<String>,
    pub csv: CsvOptions,
    pub rollup: RollupOptions,
    pub max_concurrent_fetches: usize,
    pub on_object_error: ObjectErrorPolicy,
    pub skip_processed_objects: bool,
    pub retry: RetryPolicy,
}

impl PipelineSettings {
    pub fn from_config(config: &RuntimeConfig) -> Self {
        let retry = &config.pipeline.retry;
        Self {
            source_bucket: config.source.bucket.clone(),
            source_role: config.source.role_arn.clone(),
            csv: CsvOptions {
                delimiter: config.aggregation.delimiter as u8,
                time_column: config.aggregation.time_column.clone(),
            },
            rollup: config.aggregation.rollup_options(),
            max_concurrent_fetches: config.pipeline.max_concurrent_fetches,
            on_object_error: config.pipeline.on_object_error,
            skip_processed_objects: config.pipeline.skip_processed_objects,
            retry: RetryPolicy::new(retry.max_attempts, retry.base_delay(), retry.max_delay()),
        }
    }
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self::from_config(&RuntimeConfig::default())
    }
}

pub struct RollupPipeline {
    credentials: Arc<dyn CredentialProvider>,
    sources: Arc<dyn GatewayFactory>,
    accumulator: AccumulatorStore,
    snapshots: SnapshotWriter,
    settings: PipelineSettings,
}

impl RollupPipeline {
    pub fn new(
        credentials: Arc<dyn CredentialProvider>,
        sources: Arc<dyn GatewayFactory>,
        accumulator: AccumulatorStore,
        snapshots: SnapshotWriter,
        settings: PipelineSettings,
    ) -> Self {
        Self {
            credentials,
            sources,
            accumulator,
            snapshots,
            settings,
        }
    }

    /// Build from runtime configuration with the target bucket already connected
    pub fn from_config(
        config: &RuntimeConfig,
        credentials: Arc<dyn CredentialProvider>,
        sources: Arc<dyn GatewayFactory>,
        target: BlobGateway,
    ) -> Self {
        Self::new(
            credentials,
            sources,
            AccumulatorStore::new(target.clone(), &config.target.accumulator_key),
            SnapshotWriter::new(target, &config.target.snapshot_prefix),
            PipelineSettings::from_config(config),
        )
    }

    pub fn settings(&self) -> &PipelineSettings {
        &self.settings
    }

    pub async fn run(&self, objects: Vec<ObjectRef>) -> Result<InvocationReport> {
        self.run_at(objects, Utc::now()).await
    }

    /// Run one invocation; `now` names the rollup snapshot
    pub async fn run_at(
        &self,
        objects: Vec<ObjectRef>,
        now: DateTime<Utc>,
    ) -> Result<InvocationReport> {
        let requested = objects.len();
        tracing::info!(objects = requested, "Received rollup request");

        if objects.is_empty() {
            tracing::info!("Message lists no objects; nothing to do");
            return Ok(InvocationReport::skipped(0, Vec::new()));
        }

        let objects = self.resolve_objects(objects)?;
        let credential = self.authenticate().await?;

        let accumulator = self
            .accumulator
            .load()
            .await
            .map_err(|source| RollupError::Fetch {
                bucket: self.accumulator.bucket().to_string(),
                key: self.accumulator.key().to_string(),
                source,
            })?;

        let (pending, skipped) = self.partition_processed(&accumulator, objects);
        if pending.is_empty() {
            tracing::info!(
                skipped = skipped.len(),
                "All objects already merged; nothing to write"
            );
            return Ok(InvocationReport::skipped(requested, skipped));
        }

        let (batches, quarantined) = self.fetch_all(pending, credential.as_ref()).await?;

        let rows_merged: usize = batches.iter().map(Batch::num_rows).sum();
        let objects_merged: Vec<String> = batches.iter().map(|b| b.source.clone()).collect();

        let output = fold_batches(accumulator, &batches, &self.settings.rollup)?;
        tracing::info!(
            batches = batches.len(),
            rows_merged,
            accumulator_rows = output.accumulator.num_rows(),
            rollup_rows = output.rollup.num_rows(),
            "Merged and resampled"
        );

        let rollup_key = self.persist_rollup(&output.rollup, now).await?;
        self.persist_accumulator(&output.accumulator).await?;

        tracing::info!(
            rollup_key = %rollup_key,
            accumulator_key = %self.accumulator.key(),
            "Invocation complete"
        );

        Ok(InvocationReport {
            status: InvocationStatus::Completed,
            objects_requested: requested,
            objects_merged,
            objects_skipped: skipped,
            objects_quarantined: quarantined,
            rows_merged,
            accumulator_rows: output.accumulator.num_rows(),
            rollup_rows: output.rollup.num_rows(),
            rollup_key: Some(rollup_key),
            accumulator_key: Some(self.accumulator.key().to_string()),
        })
    }

    async fn authenticate(&self) -> Result<Option<ScopedCredential>> {
        let Some(role) = &self.settings.source_role else {
            tracing::debug!("No source role configured; using ambient credentials");
            return Ok(None);
        };

        let credential = self
            .credentials
            .assume_role(role)
            .await
            .map_err(|source| RollupError::Auth {
                role: role.clone(),
                source,
            })?;
        tracing::info!(role = %role, "Authenticated against source account");
        Ok(Some(credential))
    }

    /// Apply the default source bucket, then drop repeats of the same bucket and key
    fn resolve_objects(&self, objects: Vec<ObjectRef>) -> Result<Vec<SourceObject>> {
        let mut seen = HashSet::new();
        let mut resolved = Vec::with_capacity(objects.len());
        for object in &objects {
            let source = object.resolve(&self.settings.source_bucket)?;
            if seen.insert(source.clone()) {
                resolved.push(source);
            } else {
                tracing::debug!(object = %source.identity(), "Dropping repeated object");
            }
        }
        Ok(resolved)
    }

    fn partition_processed(
        &self,
        accumulator: &Accumulator,
        objects: Vec<SourceObject>,
    ) -> (Vec<SourceObject>, Vec<String>) {
        if !self.settings.skip_processed_objects {
            return (objects, Vec::new());
        }

        let (pending, done): (Vec<_>, Vec<_>) = objects
            .into_iter()
            .partition(|object| !accumulator.has_processed(&object.identity()));

        let done: Vec<String> = done.iter().map(SourceObject::identity).collect();
        for object in &done {
            tracing::info!(object = %object, "Skipping object already merged");
        }
        (pending, done)
    }

    async fn connect_sources(
        &self,
        objects: &[SourceObject],
        credential: Option<&ScopedCredential>,
    ) -> Result<HashMap<String, BlobGateway>> {
        let mut gateways = HashMap::new();
        for object in objects {
            if gateways.contains_key(&object.bucket) {
                continue;
            }
            let gateway = self
                .sources
                .connect(&object.bucket, credential)
                .await
                .map_err(|e| RollupError::config(e.to_string()))?;
            gateways.insert(object.bucket.clone(), gateway);
        }
        Ok(gateways)
    }

    /// Fetch and decode every object, then apply the object error policy.
    async fn fetch_all(
        &self,
        objects: Vec<SourceObject>,
        credential: Option<&ScopedCredential>,
    ) -> Result<(Vec<Batch>, Vec<QuarantinedObject>)> {
        let gateways = self.connect_sources(&objects, credential).await?;

        let mut jobs = Vec::with_capacity(objects.len());
        for (index, object) in objects.into_iter().enumerate() {
            let gateway = gateways
                .get(&object.bucket)
                .cloned()
                .ok_or_else(|| RollupError::config("source gateway missing"))?;
            jobs.push((index, object, gateway));
        }

        let csv = &self.settings.csv;
        let mut fetched: Vec<(usize, SourceObject, Result<Batch>)> = stream::iter(jobs)
            .map(|(index, object, gateway)| async move {
                let result = fetch_and_decode(&gateway, &object, csv).await;
                (index, object, result)
            })
            .buffer_unordered(self.settings.max_concurrent_fetches.max(1))
            .collect()
            .await;
        fetched.sort_by_key(|(index, _, _)| *index);

        let mut batches = Vec::with_capacity(fetched.len());
        let mut quarantined = Vec::new();
        let mut first_error = None;

        for (_, object, result) in fetched {
            match result {
                Ok(batch) => batches.push(batch),
                Err(err) => match self.settings.on_object_error {
                    ObjectErrorPolicy::Abort => {
                        tracing::error!(object = %object.identity(), error = %err, "Object failed; aborting");
                        return Err(err);
                    }
                    ObjectErrorPolicy::Quarantine => {
                        tracing::warn!(
                            object = %object.identity(),
                            error_type = err.error_type(),
                            error = %err,
                            "Quarantining object"
                        );
                        quarantined.push(QuarantinedObject {
                            object: object.identity(),
                            error_type: err.error_type().to_string(),
                            error: err.to_string(),
                        });
                        first_error.get_or_insert(err);
                    }
                },
            }
        }

        if batches.is_empty() {
            if let Some(err) = first_error {
                return Err(err);
            }
        }

        Ok((batches, quarantined))
    }

    async fn persist_rollup(
        &self,
        rollup: &RecordBatch,
        now: DateTime<Utc>,
    ) -> Result<String> {
        let prefix = self.snapshots.prefix();
        let key = snapshot_key(prefix, now);

        let mut metadata = BTreeMap::new();
        metadata.insert(
            BUCKET_WIDTH_METADATA_KEY.to_string(),
            self.settings.rollup.bucket_width.as_secs().to_string(),
        );
        let bytes = encode_parquet(rollup, &metadata)
            .map(Bytes::from)
            .map_err(|e| RollupError::Persist {
                key: key.clone(),
                source: StorageError::codec(&key, e),
            })?;

        self.settings
            .retry
            .retry_async(|_| self.snapshots.write(bytes.clone(), now), is_retryable)
            .await
            .map_err(|source| RollupError::Persist { key, source })
    }

    async fn persist_accumulator(&self, accumulator: &Accumulator) -> Result<()> {
        let key = self.accumulator.key().to_string();
        let bytes = self
            .accumulator
            .encode(accumulator)
            .map_err(|source| RollupError::Persist {
                key: key.clone(),
                source,
            })?;

        self.settings
            .retry
            .retry_async(|_| self.accumulator.save_encoded(bytes.clone()), is_retryable)
            .await
            .map_err(|source| RollupError::Persist { key, source })
    }
}

async fn fetch_and_decode(
    gateway: &BlobGateway,
    object: &SourceObject,
    csv: &CsvOptions,
) -> Result<Batch> {
    let bytes = gateway
        .get(&object.key)
        .await
        .map_err(|source| RollupError::Fetch {
            bucket: object.bucket.clone(),
            key: object.key.clone(),
            source,
        })?;
    let identity = object.identity();
    let batch = decode_object(&identity, &bytes, csv).map_err(|source| RollupError::Decode {
        key: object.key.clone(),
        source,
    })?;
    tracing::debug!(object = %identity, rows = batch.num_rows(), "Decoded object");
    Ok(batch)
}

fn is_retryable(err: &StorageError) -> bool {
    !matches!(
        err,
        StorageError::Codec { .. } | StorageError::Operator { .. } | StorageError::NotFound { .. }
    )
}
