// Tabular codec
//
// Raw delimited text → typed Arrow table, and Arrow table ↔ Parquet bytes.

pub mod csv;
pub mod parquet;

pub use self::csv::{decode_csv, parse_event_time, temporal_type, CsvOptions, UTC};
pub use self::parquet::{
    decode_parquet, encode_parquet, encode_parquet_into, writer_properties, DecodedParquet,
    VERSION_METADATA_KEY,
};
