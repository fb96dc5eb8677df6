// Delimited-text decoding
//
// Schema is inferred from the whole object so a column with mixed content
// decodes as strings instead of failing the row set. Typed columns are read
// as text and cast afterwards; a column whose values do not all cast (say a
// date of 2021-02-30) stays text. All-empty columns stay `Null` so a later
// batch decides their type. The temporal key is parsed here and any
// unparseable value is fatal for the batch.

use crate::error::{CodecError, CodecResult};
use arrow::array::{Array, ArrayRef, RecordBatch, StringArray, TimestampNanosecondArray};
use arrow::compute::{cast, cast_with_options, concat_batches, CastOptions};
use arrow::csv::reader::Format;
use arrow::csv::ReaderBuilder;
use arrow::datatypes::{DataType, Field, Schema, SchemaRef, TimeUnit};
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use std::io::Cursor;
use std::sync::Arc;

const READ_BATCH_SIZE: usize = 8 * 1024;

/// Timezone attached to every normalised temporal column
pub const UTC: &str = "UTC";

/// Options for delimited-text decoding
#[derive(Debug, Clone)]
pub struct CsvOptions {
    pub delimiter: u8,
    pub time_column: String,
}

impl Default for CsvOptions {
    fn default() -> Self {
        Self {
            delimiter: b',',
            time_column: crate::rules::DEFAULT_TIME_COLUMN.to_string(),
        }
    }
}

/// Arrow type used for the temporal key everywhere in the pipeline
pub fn temporal_type() -> DataType {
    DataType::Timestamp(TimeUnit::Nanosecond, Some(UTC.into()))
}

/// Decode delimited text with a header row into a typed table.
pub fn decode_csv(bytes: &[u8], options: &CsvOptions) -> CodecResult<RecordBatch> {
    let format = Format::default()
        .with_header(true)
        .with_delimiter(options.delimiter)
        .with_truncated_rows(true);

    let (inferred, _) = format.infer_schema(Cursor::new(bytes), None)?;

    if inferred.field_with_name(&options.time_column).is_err() {
        return Err(CodecError::MissingTemporalColumn {
            column: options.time_column.clone(),
        });
    }

    // Everything except all-empty columns is read as text
    let read_schema: SchemaRef = Arc::new(Schema::new(
        inferred
            .fields()
            .iter()
            .map(|field| {
                if field.data_type() == &DataType::Null && field.name() != &options.time_column {
                    Field::new(field.name(), DataType::Null, true)
                } else {
                    Field::new(field.name(), DataType::Utf8, true)
                }
            })
            .collect::<Vec<_>>(),
    ));

    let reader = ReaderBuilder::new(read_schema.clone())
        .with_header(true)
        .with_delimiter(options.delimiter)
        .with_truncated_rows(true)
        .with_batch_size(READ_BATCH_SIZE)
        .build(Cursor::new(bytes))?;

    let batches = reader.collect::<Result<Vec<_>, _>>()?;
    let raw = concat_batches(&read_schema, &batches)?;
    let typed = apply_inferred_types(&raw, &inferred, &options.time_column)?;

    normalize_temporal_column(&typed, &options.time_column)
}

/// Cast text columns to their inferred type, keeping text where any value does not cast
fn apply_inferred_types(
    raw: &RecordBatch,
    inferred: &Schema,
    time_column: &str,
) -> CodecResult<RecordBatch> {
    let strict = CastOptions {
        safe: false,
        ..Default::default()
    };

    let mut fields = Vec::with_capacity(raw.num_columns());
    let mut columns = Vec::with_capacity(raw.num_columns());
    for (field, column) in inferred.fields().iter().zip(raw.columns()) {
        let target = field.data_type();
        let keep_raw = field.name() == time_column
            || matches!(target, DataType::Null | DataType::Utf8);

        let (data_type, array) = if keep_raw {
            (column.data_type().clone(), column.clone())
        } else {
            match cast_with_options(column, target, &strict) {
                Ok(array) => (target.clone(), array),
                Err(e) => {
                    tracing::debug!(column = %field.name(), error = %e, "column kept as text");
                    (DataType::Utf8, column.clone())
                }
            }
        };
        fields.push(Field::new(field.name(), data_type, true));
        columns.push(array);
    }

    Ok(RecordBatch::try_new(Arc::new(Schema::new(fields)), columns)?)
}

/// Replace the textual temporal column with UTC nanosecond timestamps
fn normalize_temporal_column(batch: &RecordBatch, time_column: &str) -> CodecResult<RecordBatch> {
    let schema = batch.schema();
    let index = schema
        .index_of(time_column)
        .map_err(|_| CodecError::MissingTemporalColumn {
            column: time_column.to_string(),
        })?;

    let text = cast(batch.column(index), &DataType::Utf8)?;
    let text = text
        .as_any()
        .downcast_ref::<StringArray>()
        .ok_or_else(|| CodecError::MissingTemporalColumn {
            column: time_column.to_string(),
        })?;

    let mut nanos = Vec::with_capacity(text.len());
    for row in 0..text.len() {
        if text.is_null(row) || text.value(row).trim().is_empty() {
            return Err(CodecError::MissingTimestamp {
                column: time_column.to_string(),
                row: row + 1,
            });
        }
        let value = text.value(row);
        let parsed = parse_event_time(value).ok_or_else(|| CodecError::InvalidTimestamp {
            column: time_column.to_string(),
            row: row + 1,
            value: value.to_string(),
        })?;
        nanos.push(parsed);
    }

    let timestamps: ArrayRef = Arc::new(TimestampNanosecondArray::from(nanos).with_timezone(UTC));

    let mut fields: Vec<Field> = schema.fields().iter().map(|f| f.as_ref().clone()).collect();
    fields[index] = Field::new(time_column, temporal_type(), true);

    let mut columns = batch.columns().to_vec();
    columns[index] = timestamps;

    Ok(RecordBatch::try_new(Arc::new(Schema::new(fields)), columns)?)
}

/// Parse a textual event time into UTC nanoseconds since the epoch.
///
/// Accepts RFC 3339 (with `Z` or an offset), ISO-8601 without offset
/// (interpreted as UTC, `T` or space separated, optional fraction), and bare dates.
pub fn parse_event_time(value: &str) -> Option<i64> {
    let value = value.trim();

    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return dt.with_timezone(&Utc).timestamp_nanos_opt();
    }

    const OFFSET_FORMATS: &[&str] = &["%Y-%m-%d %H:%M:%S%.f%:z", "%Y-%m-%dT%H:%M:%S%.f%z"];
    for fmt in OFFSET_FORMATS {
        if let Ok(dt) = DateTime::parse_from_str(value, fmt) {
            return dt.with_timezone(&Utc).timestamp_nanos_opt();
        }
    }

    const NAIVE_FORMATS: &[&str] = &[
        "%Y-%m-%dT%H:%M:%S%.f",
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y-%m-%dT%H:%M",
        "%Y-%m-%d %H:%M",
    ];
    let naive = value.strip_suffix(" UTC").unwrap_or(value);
    for fmt in NAIVE_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(naive, fmt) {
            return dt.and_utc().timestamp_nanos_opt();
        }
    }

    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .and_then(|dt| dt.and_utc().timestamp_nanos_opt())
}
