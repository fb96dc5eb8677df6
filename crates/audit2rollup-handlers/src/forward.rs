// Object forwarder
//
// Reacts to an upload in the own-account bucket: reads the object with
// ambient credentials, converts it from CSV to Parquet, and writes it to the
// cross-account bucket as `<prefix><key>.parquet` under an assumed role.

use crate::error::{Result, RollupError};
use crate::report::ForwardReport;
use audit2rollup_config::{ForwardConfig, RuntimeConfig};
use audit2rollup_core::{decode_csv, encode_parquet, CsvOptions};
use audit2rollup_storage::{
    BlobGateway, CredentialProvider, GatewayFactory, RetryPolicy, ScopedCredential, StorageError,
};
use bytes::Bytes;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Footer key recording which object a forwarded file came from
pub const SOURCE_KEY_METADATA_KEY: &str = "audit2rollup.source_key";

/// An object named by an upload notification
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadedObject {
    pub bucket: Option<String>,
    pub key: String,
}

#[derive(Debug, Clone)]
pub struct ForwardSettings {
    pub source_bucket: String,
    pub target_bucket: String,
    pub role_arn: Option<String>,
    pub prefix: String,
    pub csv: CsvOptions,
    pub retry: RetryPolicy,
}

impl ForwardSettings {
    pub fn new(forward: &ForwardConfig, config: &RuntimeConfig) -> Self {
        let retry = &config.pipeline.retry;
        Self {
            source_bucket: forward.source_bucket.clone(),
            target_bucket: forward.target_bucket.clone(),
            role_arn: forward.role_arn.clone(),
            prefix: forward.prefix.clone(),
            csv: CsvOptions {
                delimiter: config.aggregation.delimiter as u8,
                time_column: config.aggregation.time_column.clone(),
            },
            retry: RetryPolicy::new(retry.max_attempts, retry.base_delay(), retry.max_delay()),
        }
    }

    /// Destination key for a source key
    pub fn target_key(&self, key: &str) -> String {
        format!("{}{}.parquet", self.prefix, key)
    }
}

pub struct ObjectForwarder {
    credentials: Arc<dyn CredentialProvider>,
    gateways: Arc<dyn GatewayFactory>,
    settings: ForwardSettings,
}

impl ObjectForwarder {
    pub fn new(
        credentials: Arc<dyn CredentialProvider>,
        gateways: Arc<dyn GatewayFactory>,
        settings: ForwardSettings,
    ) -> Self {
        Self {
            credentials,
            gateways,
            settings,
        }
    }

    pub async fn forward(&self, object: &UploadedObject) -> Result<ForwardReport> {
        let source_bucket = if self.settings.source_bucket.is_empty() {
            object.bucket.clone().unwrap_or_default()
        } else {
            self.settings.source_bucket.clone()
        };
        if source_bucket.is_empty() {
            return Err(RollupError::schema(format!(
                "no bucket for uploaded object '{}'",
                object.key
            )));
        }

        let credential = match &self.settings.role_arn {
            Some(role) => Some(self.credentials.assume_role(role).await.map_err(|source| {
                RollupError::Auth {
                    role: role.clone(),
                    source,
                }
            })?),
            None => None,
        };

        let source_gateway = self.connect(&source_bucket, None).await?;
        let target = self
            .connect(&self.settings.target_bucket, credential.as_ref())
            .await?;

        let raw = source_gateway.get(&object.key).await.map_err(|source| RollupError::Fetch {
            bucket: source_bucket.clone(),
            key: object.key.clone(),
            source,
        })?;
        let table = decode_csv(&raw, &self.settings.csv).map_err(|source| RollupError::Decode {
            key: object.key.clone(),
            source,
        })?;

        let target_key = self.settings.target_key(&object.key);
        let mut metadata = BTreeMap::new();
        metadata.insert(SOURCE_KEY_METADATA_KEY.to_string(), object.key.clone());
        let encoded = encode_parquet(&table, &metadata)
            .map(Bytes::from)
            .map_err(|e| RollupError::Persist {
                key: target_key.clone(),
                source: StorageError::codec(&target_key, e),
            })?;

        self.settings
            .retry
            .retry_async(
                |_| target.put(&target_key, encoded.clone()),
                |e| !e.is_not_found(),
            )
            .await
            .map_err(|source| RollupError::Persist {
                key: target_key.clone(),
                source,
            })?;

        tracing::info!(
            source_bucket = %source_bucket,
            source_key = %object.key,
            target_bucket = %self.settings.target_bucket,
            target_key = %target_key,
            rows = table.num_rows(),
            "Forwarded object"
        );

        Ok(ForwardReport {
            source_bucket,
            source_key: object.key.clone(),
            target_bucket: self.settings.target_bucket.clone(),
            target_key,
            rows: table.num_rows(),
        })
    }

    async fn connect(
        &self,
        bucket: &str,
        credential: Option<&ScopedCredential>,
    ) -> Result<BlobGateway> {
        self.gateways
            .connect(bucket, credential)
            .await
            .map_err(|e| RollupError::config(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_target_key_appends_extension() {
        let mut config = RuntimeConfig::default();
        config.target.bucket = "rollups".into();
        let forward = ForwardConfig {
            target_bucket: "partner".into(),
            prefix: "infra-eng/input/".into(),
            ..Default::default()
        };
        let settings = ForwardSettings::new(&forward, &config);
        assert_eq!(
            settings.target_key("2021-01-01T12:01:31-06:00.csv"),
            "infra-eng/input/2021-01-01T12:01:31-06:00.csv.parquet"
        );
    }
}
