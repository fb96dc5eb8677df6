// Columnar encoding
//
// Snappy compression and dictionary encoding keep rollups and the accumulator
// small. Caller-supplied key/value metadata is embedded in the file footer.

use crate::error::{CodecError, CodecResult};
use arrow::array::RecordBatch;
use arrow::compute::concat_batches;
use arrow::datatypes::Schema;
use bytes::Bytes;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use parquet::arrow::ArrowWriter;
use parquet::basic::Compression;
use parquet::file::properties::{EnabledStatistics, WriterProperties};
use parquet::format::KeyValue;
use std::collections::BTreeMap;
use std::io::Write;
use std::sync::{Arc, OnceLock};

/// Key under which the crate version is embedded in every file
pub const VERSION_METADATA_KEY: &str = "audit2rollup.version";

/// Get shared writer properties (cached)
///
/// - Snappy compression
/// - Dictionary encoding enabled
/// - 32k rows per group
pub fn writer_properties() -> &'static WriterProperties {
    static PROPERTIES: OnceLock<WriterProperties> = OnceLock::new();
    PROPERTIES.get_or_init(|| {
        WriterProperties::builder()
            .set_dictionary_enabled(true)
            .set_statistics_enabled(EnabledStatistics::Page)
            .set_compression(Compression::SNAPPY)
            .set_data_page_size_limit(256 * 1024)
            .set_write_batch_size(32 * 1024)
            .set_max_row_group_size(32 * 1024)
            .set_dictionary_page_size_limit(128 * 1024)
            .build()
    })
}

/// Write a table into an arbitrary `Write` sink.
pub fn encode_parquet_into<W>(
    batch: &RecordBatch,
    metadata: &BTreeMap<String, String>,
    writer: &mut W,
) -> CodecResult<()>
where
    W: Write + Send,
{
    if batch.num_columns() == 0 {
        return Err(CodecError::EmptySchema);
    }

    let props = writer_properties().clone();
    let mut arrow_writer = ArrowWriter::try_new(writer, batch.schema(), Some(props))?;

    arrow_writer.append_key_value_metadata(KeyValue {
        key: VERSION_METADATA_KEY.to_string(),
        value: Some(env!("CARGO_PKG_VERSION").to_string()),
    });
    for (key, value) in metadata {
        arrow_writer.append_key_value_metadata(KeyValue {
            key: key.clone(),
            value: Some(value.clone()),
        });
    }

    arrow_writer.write(batch)?;
    arrow_writer.close()?;
    Ok(())
}

/// Encode a table to Parquet bytes (in-memory buffer)
pub fn encode_parquet(batch: &RecordBatch, metadata: &BTreeMap<String, String>) -> CodecResult<Vec<u8>> {
    let mut buffer = Vec::new();
    encode_parquet_into(batch, metadata, &mut buffer)?;
    Ok(buffer)
}

/// A decoded columnar file: the table plus footer key/value metadata
#[derive(Debug)]
pub struct DecodedParquet {
    pub batch: RecordBatch,
    pub metadata: BTreeMap<String, String>,
}

/// Decode Parquet bytes back into a single table.
///
/// Schema-level metadata restored by the reader is stripped so that the table
/// equals the one that was encoded; footer metadata is returned separately.
pub fn decode_parquet(bytes: impl Into<Bytes>) -> CodecResult<DecodedParquet> {
    let builder = ParquetRecordBatchReaderBuilder::try_new(bytes.into())?;

    let metadata = builder
        .metadata()
        .file_metadata()
        .key_value_metadata()
        .map(|pairs| {
            pairs
                .iter()
                .filter_map(|kv| kv.value.as_ref().map(|v| (kv.key.clone(), v.clone())))
                .collect::<BTreeMap<_, _>>()
        })
        .unwrap_or_default();

    let schema = Arc::new(Schema::new(builder.schema().fields().clone()));
    let reader = builder.build()?;

    let mut batches = Vec::new();
    for batch in reader {
        let batch = batch?;
        batches.push(RecordBatch::try_new(schema.clone(), batch.columns().to_vec())?);
    }

    let batch = concat_batches(&schema, &batches)?;
    Ok(DecodedParquet { batch, metadata })
}
