// Blob store gateway
//
// Opaque get/put of byte payloads by key within one bucket. The bytes move
// through an `ObjectBackend`; production uses an OpenDAL S3 operator, tests
// use the memory service or wrap it to inject failures.

use crate::credentials::ScopedCredential;
use crate::error::{Result, StorageError};
use async_trait::async_trait;
use bytes::Bytes;
use opendal::Operator;
use std::fmt::Debug;
use std::sync::Arc;

/// Byte-level object access a gateway delegates to
#[async_trait]
pub trait ObjectBackend: Send + Sync + Debug {
    async fn read_object(&self, key: &str) -> opendal::Result<Bytes>;
    async fn write_object(&self, key: &str, data: Bytes) -> opendal::Result<()>;
    async fn stat_object(&self, key: &str) -> opendal::Result<()>;
}

#[async_trait]
impl ObjectBackend for Operator {
    async fn read_object(&self, key: &str) -> opendal::Result<Bytes> {
        Ok(self.read(key).await?.to_bytes())
    }

    async fn write_object(&self, key: &str, data: Bytes) -> opendal::Result<()> {
        self.write(key, data).await?;
        Ok(())
    }

    async fn stat_object(&self, key: &str) -> opendal::Result<()> {
        self.stat(key).await?;
        Ok(())
    }
}

/// Where a bucket lives
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BucketLocation {
    pub bucket: String,
    pub region: String,
    pub endpoint: Option<String>,
}

impl BucketLocation {
    pub fn new(bucket: impl Into<String>, region: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            region: region.into(),
            endpoint: None,
        }
    }

    pub fn with_endpoint(mut self, endpoint: Option<String>) -> Self {
        self.endpoint = endpoint;
        self
    }
}

#[derive(Clone, Debug)]
pub struct BlobGateway {
    backend: Arc<dyn ObjectBackend>,
    bucket: String,
}

impl BlobGateway {
    /// Create a gateway for S3; without a credential the default provider chain is used
    pub fn s3(location: &BucketLocation, credential: Option<&ScopedCredential>) -> Result<Self> {
        let mut builder = opendal::services::S3::default()
            .bucket(&location.bucket)
            .region(&location.region);

        if let Some(endpoint) = &location.endpoint {
            builder = builder.endpoint(endpoint);
        }

        if let Some(credential) = credential {
            builder = builder
                .access_key_id(&credential.access_key)
                .secret_access_key(&credential.secret_key);
            if let Some(token) = &credential.session_token {
                builder = builder.session_token(token);
            }
        }

        let operator = Operator::new(builder)
            .map_err(|e| StorageError::Operator {
                bucket: location.bucket.clone(),
                reason: e.to_string(),
            })?
            .finish();

        Ok(Self::from_operator(location.bucket.clone(), operator))
    }

    /// Wrap an existing operator (memory or fs backends in tests)
    pub fn from_operator(bucket: impl Into<String>, operator: Operator) -> Self {
        Self::from_backend(bucket, Arc::new(operator))
    }

    pub fn from_backend(bucket: impl Into<String>, backend: Arc<dyn ObjectBackend>) -> Self {
        Self {
            backend,
            bucket: bucket.into(),
        }
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    /// Read a whole object; a missing object is `StorageError::NotFound`
    pub async fn get(&self, key: &str) -> Result<Bytes> {
        let bytes = self
            .backend
            .read_object(key)
            .await
            .map_err(|e| StorageError::backend("read", &self.bucket, key, e))?;
        tracing::debug!(bucket = %self.bucket, key = %key, size = bytes.len(), "Read object");
        Ok(bytes)
    }

    /// Write a whole object, replacing any existing one
    pub async fn put(&self, key: &str, data: Bytes) -> Result<()> {
        let size = data.len();
        self.backend
            .write_object(key, data)
            .await
            .map_err(|e| StorageError::backend("write", &self.bucket, key, e))?;
        tracing::debug!(bucket = %self.bucket, key = %key, size, "Wrote object");
        Ok(())
    }

    pub async fn exists(&self, key: &str) -> Result<bool> {
        match self.backend.stat_object(key).await {
            Ok(_) => Ok(true),
            Err(e) if e.kind() == opendal::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(StorageError::backend("stat", &self.bucket, key, e)),
        }
    }
}

/// Builds gateways for a bucket, optionally under a scoped credential
#[async_trait]
pub trait GatewayFactory: Send + Sync {
    async fn connect(
        &self,
        bucket: &str,
        credential: Option<&ScopedCredential>,
    ) -> Result<BlobGateway>;
}

/// Connects to S3 buckets in one region
#[derive(Debug, Clone)]
pub struct S3GatewayFactory {
    region: String,
    endpoint: Option<String>,
}

impl S3GatewayFactory {
    pub fn new(region: impl Into<String>, endpoint: Option<String>) -> Self {
        Self {
            region: region.into(),
            endpoint,
        }
    }
}

#[async_trait]
impl GatewayFactory for S3GatewayFactory {
    async fn connect(
        &self,
        bucket: &str,
        credential: Option<&ScopedCredential>,
    ) -> Result<BlobGateway> {
        let location =
            BucketLocation::new(bucket, &self.region).with_endpoint(self.endpoint.clone());
        BlobGateway::s3(&location, credential)
    }
}
