//! Invocation error taxonomy
//!
//! Every failure that reaches the invocation boundary is one of these. The
//! Lambda adapter returns it to the runtime so the transport redelivers.

use audit2rollup_core::{AggregateError, CodecError};
use audit2rollup_storage::StorageError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RollupError {
    /// Inbound message or event does not match the expected payload schema
    #[error("message did not conform to the expected payload schema: {message}")]
    Schema { message: String },

    /// Cross-account credential could not be obtained
    #[error("authentication failed for role '{role}': {source}")]
    Auth {
        role: String,
        #[source]
        source: StorageError,
    },

    /// An object (or the accumulator) could not be read
    #[error("failed to fetch s3://{bucket}/{key}: {source}")]
    Fetch {
        bucket: String,
        key: String,
        #[source]
        source: StorageError,
    },

    /// An object was read but could not be decoded
    #[error("failed to decode '{key}': {source}")]
    Decode {
        key: String,
        #[source]
        source: CodecError,
    },

    /// A destination write failed after retries
    #[error("failed to persist '{key}': {source}")]
    Persist {
        key: String,
        #[source]
        source: StorageError,
    },

    /// Merge or resample failed
    #[error("aggregation failed: {0}")]
    Aggregation(#[from] AggregateError),

    /// Runtime configuration is missing or inconsistent
    #[error("configuration error: {message}")]
    Config { message: String },
}

impl RollupError {
    pub fn schema(message: impl Into<String>) -> Self {
        Self::Schema {
            message: message.into(),
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Error type string for reports and logs
    pub fn error_type(&self) -> &'static str {
        match self {
            Self::Schema { .. } => "SchemaError",
            Self::Auth { .. } => "AuthError",
            Self::Fetch { .. } => "FetchError",
            Self::Decode { .. } => "DecodeError",
            Self::Persist { .. } => "PersistError",
            Self::Aggregation(_) => "AggregationError",
            Self::Config { .. } => "ConfigError",
        }
    }

    /// Whether redelivering the same message could succeed
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Auth { .. } | Self::Persist { .. } => true,
            Self::Fetch { source, .. } => !source.is_not_found(),
            Self::Schema { .. } | Self::Decode { .. } | Self::Aggregation(_) | Self::Config { .. } => {
                false
            }
        }
    }
}

pub type Result<T> = std::result::Result<T, RollupError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_types() {
        assert_eq!(RollupError::schema("x").error_type(), "SchemaError");
        assert_eq!(RollupError::config("x").error_type(), "ConfigError");
        assert_eq!(
            RollupError::from(AggregateError::InvalidBucketWidth).error_type(),
            "AggregationError"
        );
    }

    #[test]
    fn test_transient_classification() {
        assert!(!RollupError::schema("missing s3_objects").is_transient());

        let missing = RollupError::Fetch {
            bucket: "b".into(),
            key: "k".into(),
            source: StorageError::NotFound {
                bucket: "b".into(),
                key: "k".into(),
            },
        };
        assert!(!missing.is_transient());

        let denied = RollupError::Auth {
            role: "r".into(),
            source: StorageError::credentials("r", "throttled"),
        };
        assert!(denied.is_transient());
    }

    #[test]
    fn test_display_names_object() {
        let err = RollupError::Decode {
            key: "input/a.csv".into(),
            source: CodecError::MissingTemporalColumn {
                column: "eventTime".into(),
            },
        };
        assert_eq!(
            err.to_string(),
            "failed to decode 'input/a.csv': temporal column 'eventTime' missing from header"
        );
    }
}
