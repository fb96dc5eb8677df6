// audit2rollup-storage - Blob storage and cross-account access
//
// Everything that touches the network lives here: the OpenDAL-backed gateway,
// STS role assumption, and the two persisted artifacts (the accumulator and
// rollup snapshots).

pub mod accumulator;
pub mod credentials;
pub mod error;
pub mod gateway;
pub mod retry;
pub mod snapshot;

pub use accumulator::AccumulatorStore;
pub use credentials::{
    CredentialProvider, ScopedCredential, StaticCredentialProvider, StsCredentialProvider,
};
pub use error::{Result, StorageError};
pub use gateway::{BlobGateway, BucketLocation, GatewayFactory, ObjectBackend, S3GatewayFactory};
pub use retry::RetryPolicy;
pub use snapshot::{snapshot_key, SnapshotWriter};
