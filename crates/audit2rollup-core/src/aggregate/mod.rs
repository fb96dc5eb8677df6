// Merge and resample
//
// Both operate on in-memory Arrow tables only.

pub mod merge;
pub mod resample;

pub use merge::{concat_tables, merge, widen};
pub use resample::{bucket_start, resample, DEFAULT_BUCKET_WIDTH};
