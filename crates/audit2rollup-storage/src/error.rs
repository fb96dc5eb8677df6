//! Error types for blob storage and credential exchange

use audit2rollup_core::CodecError;
use thiserror::Error;

/// Errors raised by the blob gateway and the stores built on it
#[derive(Debug, Error)]
pub enum StorageError {
    /// The object does not exist
    #[error("object not found: s3://{bucket}/{key}")]
    NotFound { bucket: String, key: String },

    /// Any other backend failure
    #[error("{operation} s3://{bucket}/{key} failed: {source}")]
    Backend {
        operation: &'static str,
        bucket: String,
        key: String,
        #[source]
        source: opendal::Error,
    },

    /// Operator could not be constructed
    #[error("failed to build operator for bucket '{bucket}': {reason}")]
    Operator { bucket: String, reason: String },

    /// Role assumption or credential resolution failed
    #[error("failed to assume role '{role}': {reason}")]
    Credentials { role: String, reason: String },

    /// Persisted bytes could not be decoded or a table could not be encoded
    #[error("codec error for '{key}': {source}")]
    Codec {
        key: String,
        #[source]
        source: CodecError,
    },
}

impl StorageError {
    pub(crate) fn backend(
        operation: &'static str,
        bucket: &str,
        key: &str,
        source: opendal::Error,
    ) -> Self {
        if source.kind() == opendal::ErrorKind::NotFound {
            return Self::NotFound {
                bucket: bucket.to_string(),
                key: key.to_string(),
            };
        }
        Self::Backend {
            operation,
            bucket: bucket.to_string(),
            key: key.to_string(),
            source,
        }
    }

    pub fn credentials(role: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        Self::Credentials {
            role: role.into(),
            reason: reason.to_string(),
        }
    }

    pub fn codec(key: &str, source: CodecError) -> Self {
        Self::Codec {
            key: key.to_string(),
            source,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

pub type Result<T> = std::result::Result<T, StorageError>;
