use crate::error::{Result, StorageError};
use crate::gateway::BlobGateway;
use audit2rollup_core::Accumulator;
use bytes::Bytes;

/// Load/save of the single running dataset at a well-known key
#[derive(Debug, Clone)]
pub struct AccumulatorStore {
    gateway: BlobGateway,
    key: String,
}

impl AccumulatorStore {
    pub fn new(gateway: BlobGateway, key: impl Into<String>) -> Self {
        Self {
            gateway,
            key: key.into(),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn bucket(&self) -> &str {
        self.gateway.bucket()
    }

    /// Read the accumulator. A missing object is the first run and loads as empty.
    pub async fn load(&self) -> Result<Accumulator> {
        let bytes = match self.gateway.get(&self.key).await {
            Ok(bytes) => bytes,
            Err(e) if e.is_not_found() => {
                tracing::info!(
                    bucket = %self.gateway.bucket(),
                    key = %self.key,
                    "No accumulator found; starting empty"
                );
                return Ok(Accumulator::empty());
            }
            Err(e) => return Err(e),
        };

        let accumulator =
            Accumulator::from_parquet(bytes.to_vec()).map_err(|e| StorageError::codec(&self.key, e))?;
        tracing::debug!(
            key = %self.key,
            rows = accumulator.num_rows(),
            processed = accumulator.processed().len(),
            "Loaded accumulator"
        );
        Ok(accumulator)
    }

    /// Serialize without writing, so the bytes can be retried as-is
    pub fn encode(&self, accumulator: &Accumulator) -> Result<Bytes> {
        accumulator
            .to_parquet()
            .map(Bytes::from)
            .map_err(|e| StorageError::codec(&self.key, e))
    }

    /// Overwrite the accumulator with already-encoded bytes
    pub async fn save_encoded(&self, bytes: Bytes) -> Result<()> {
        self.gateway.put(&self.key, bytes).await
    }

    pub async fn save(&self, accumulator: &Accumulator) -> Result<()> {
        let bytes = self.encode(accumulator)?;
        self.save_encoded(bytes).await
    }
}
