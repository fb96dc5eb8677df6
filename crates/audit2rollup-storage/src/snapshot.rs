// Rollup snapshot writer
//
// Each invocation writes one immutable snapshot under
// `<prefix>ms-<YYYY-MM-DDTHH:MM:SS>.parquet` (UTC). If that key is already
// taken by different content, a short content hash is appended instead of
// overwriting. Identical content at either key is treated as already written.

use crate::error::Result;
use crate::gateway::BlobGateway;
use bytes::Bytes;
use chrono::{DateTime, Utc};

const HASH_SUFFIX_BYTES: usize = 4;

/// Key for a snapshot taken at `at`
pub fn snapshot_key(prefix: &str, at: DateTime<Utc>) -> String {
    format!("{}ms-{}.parquet", prefix, at.format("%Y-%m-%dT%H:%M:%S"))
}

/// Key used when the plain snapshot key is taken by other content
pub fn hashed_snapshot_key(prefix: &str, at: DateTime<Utc>, content: &[u8]) -> String {
    let hash = blake3::hash(content);
    format!(
        "{}ms-{}-{}.parquet",
        prefix,
        at.format("%Y-%m-%dT%H:%M:%S"),
        hex::encode(&hash.as_bytes()[..HASH_SUFFIX_BYTES])
    )
}

#[derive(Debug, Clone)]
pub struct SnapshotWriter {
    gateway: BlobGateway,
    prefix: String,
}

impl SnapshotWriter {
    pub fn new(gateway: BlobGateway, prefix: impl Into<String>) -> Self {
        Self {
            gateway,
            prefix: prefix.into(),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Write an encoded rollup taken at `at`; returns the key written
    pub async fn write(&self, content: Bytes, at: DateTime<Utc>) -> Result<String> {
        let key = snapshot_key(&self.prefix, at);
        if !self.gateway.exists(&key).await? {
            self.gateway.put(&key, content).await?;
            return Ok(key);
        }
        if self.same_content(&key, &content).await? {
            tracing::debug!(key = %key, "Snapshot already written");
            return Ok(key);
        }

        let hashed = hashed_snapshot_key(&self.prefix, at, &content);
        tracing::info!(taken = %key, key = %hashed, "Snapshot key taken; writing under content hash");
        if !self.gateway.exists(&hashed).await? {
            self.gateway.put(&hashed, content).await?;
        }
        Ok(hashed)
    }

    async fn same_content(&self, key: &str, content: &[u8]) -> Result<bool> {
        let existing = self.gateway.get(key).await?;
        Ok(blake3::hash(&existing) == blake3::hash(content))
    }
}
