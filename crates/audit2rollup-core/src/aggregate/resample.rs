// Fixed-width time bucketing
//
// Buckets are half-open [start, start + width) with starts aligned to
// multiples of the width since the Unix epoch, so the first bucket is the one
// containing the minimum timestamp. Output is sparse: only buckets that hold
// at least one row appear, ordered by bucket start.

use crate::codec::{temporal_type, UTC};
use crate::error::{AggregateError, AggregateResult};
use crate::rules::{inferred_reduction, AggregationRules, Reduction, UnmappedColumnPolicy};
use arrow::array::{
    new_empty_array, Array, ArrayRef, AsArray, BooleanArray, Float64Array, Int64Array, ListArray, RecordBatch,
    StringArray, TimestampNanosecondArray, UInt32Array,
};
use arrow::buffer::OffsetBuffer;
use arrow::compute::{cast, take};
use arrow::datatypes::{
    DataType, Field, Float64Type, Int64Type, Schema, TimeUnit, TimestampNanosecondType,
};
use arrow::row::{RowConverter, SortField};
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

/// Default bucket width (five minutes)
pub const DEFAULT_BUCKET_WIDTH: Duration = Duration::from_secs(5 * 60);

/// Row indices grouped by bucket start (nanoseconds since epoch)
struct Buckets {
    starts: Vec<i64>,
    rows: Vec<Vec<u32>>,
}

/// Resample a table into fixed-width time buckets, reducing each column per rule.
///
/// The output has the temporal column (holding each bucket's start) followed by
/// one column per applied rule. Rows whose temporal key is null are skipped.
pub fn resample(
    table: &RecordBatch,
    time_column: &str,
    bucket_width: Duration,
    rules: &AggregationRules,
) -> AggregateResult<RecordBatch> {
    let width = i64::try_from(bucket_width.as_nanos()).unwrap_or(i64::MAX);
    if width <= 0 {
        return Err(AggregateError::InvalidBucketWidth);
    }

    let schema = table.schema();
    let time_index = schema
        .index_of(time_column)
        .map_err(|_| AggregateError::MissingTemporalKey {
            column: time_column.to_string(),
        })?;

    let buckets = bucket_rows(table.column(time_index), time_column, width)?;
    let plan = column_plan(&schema, time_column, rules)?;

    let mut fields = vec![Field::new(time_column, temporal_type(), true)];
    let mut columns: Vec<ArrayRef> = vec![Arc::new(
        TimestampNanosecondArray::from(buckets.starts.clone()).with_timezone(UTC),
    )];

    for (name, reduction) in plan {
        let Ok(index) = schema.index_of(&name) else {
            continue;
        };
        let source = table.column(index);
        let reduced = match reduction {
            Reduction::Unique => Some(reduce_unique(source, &buckets)?),
            Reduction::Sum => reduce_sum(source, &buckets)?,
        };
        match reduced {
            Some(array) => {
                fields.push(Field::new(&name, array.data_type().clone(), true));
                columns.push(array);
            }
            None => tracing::warn!(
                column = %name,
                data_type = %source.data_type(),
                "Column cannot be summed; omitted from rollup"
            ),
        }
    }

    tracing::debug!(
        input_rows = table.num_rows(),
        buckets = buckets.starts.len(),
        width_secs = bucket_width.as_secs(),
        "Resampled table"
    );

    Ok(RecordBatch::try_new(Arc::new(Schema::new(fields)), columns)?)
}

/// Floor a timestamp to the start of its bucket, or `None` when the start
/// falls below `i64::MIN`
pub fn bucket_start(timestamp_nanos: i64, width_nanos: i64) -> Option<i64> {
    timestamp_nanos
        .checked_div_euclid(width_nanos)?
        .checked_mul(width_nanos)
}

fn bucket_rows(column: &ArrayRef, time_column: &str, width: i64) -> AggregateResult<Buckets> {
    let nanos = match column.data_type() {
        DataType::Timestamp(_, _) | DataType::Utf8 | DataType::LargeUtf8 | DataType::Date32
        | DataType::Date64 => cast(column, &DataType::Timestamp(TimeUnit::Nanosecond, None))?,
        other => {
            return Err(AggregateError::TemporalKeyType {
                column: time_column.to_string(),
                data_type: other.clone(),
            })
        }
    };
    let nanos = nanos.as_primitive::<TimestampNanosecondType>();

    let mut grouped: BTreeMap<i64, Vec<u32>> = BTreeMap::new();
    let mut skipped = 0usize;
    let mut unrepresentable = 0usize;
    for (row, value) in nanos.iter().enumerate() {
        let Some(ts) = value else {
            skipped += 1;
            continue;
        };
        match bucket_start(ts, width) {
            Some(start) => grouped.entry(start).or_default().push(row as u32),
            None => unrepresentable += 1,
        }
    }

    if skipped > 0 {
        tracing::warn!(
            column = %time_column,
            skipped,
            "Rows without a temporal key were excluded from the rollup"
        );
    }
    if unrepresentable > 0 {
        tracing::warn!(
            column = %time_column,
            rows = unrepresentable,
            "Rows whose bucket start is out of range were excluded from the rollup"
        );
    }

    let (starts, rows) = grouped.into_iter().unzip();
    Ok(Buckets { starts, rows })
}

/// Columns to reduce, in output order: rules first, then (for `infer`) the
/// remaining columns in table order.
fn column_plan(
    schema: &Schema,
    time_column: &str,
    rules: &AggregationRules,
) -> AggregateResult<Vec<(String, Reduction)>> {
    let mut plan: Vec<(String, Reduction)> = rules
        .rules()
        .iter()
        .filter(|r| r.column != time_column)
        .map(|r| (r.column.clone(), r.reduction))
        .collect();

    let unmapped: Vec<&Field> = schema
        .fields()
        .iter()
        .map(|f| f.as_ref())
        .filter(|f| f.name() != time_column && rules.reduction_for(f.name()).is_none())
        .collect();

    if unmapped.is_empty() {
        return Ok(plan);
    }

    match rules.unmapped_policy() {
        UnmappedColumnPolicy::Drop => {
            tracing::debug!(
                columns = ?unmapped.iter().map(|f| f.name()).collect::<Vec<_>>(),
                "Dropping columns without an aggregation rule"
            );
        }
        UnmappedColumnPolicy::Infer => {
            plan.extend(
                unmapped
                    .iter()
                    .map(|f| (f.name().clone(), inferred_reduction(f.data_type()))),
            );
        }
        UnmappedColumnPolicy::Reject => {
            return Err(AggregateError::UnmappedColumns {
                columns: unmapped.iter().map(|f| f.name().clone()).collect(),
            });
        }
    }

    Ok(plan)
}

/// Distinct non-null values per bucket, as a list column of the source type
fn reduce_unique(column: &ArrayRef, buckets: &Buckets) -> AggregateResult<ArrayRef> {
    // Never-populated column: every bucket gets an empty list
    if column.data_type() == &DataType::Null {
        let item = Arc::new(Field::new_list_field(DataType::Null, true));
        let lengths = std::iter::repeat(0).take(buckets.rows.len());
        let list = ListArray::try_new(
            item,
            OffsetBuffer::from_lengths(lengths),
            new_empty_array(&DataType::Null),
            None,
        )?;
        return Ok(Arc::new(list));
    }

    let converter = RowConverter::new(vec![SortField::new(column.data_type().clone())])?;
    let rows = converter.convert_columns(std::slice::from_ref(column))?;

    let mut picked: Vec<u32> = Vec::new();
    let mut lengths: Vec<usize> = Vec::with_capacity(buckets.rows.len());
    for bucket in &buckets.rows {
        let mut seen = HashSet::new();
        let before = picked.len();
        for &row in bucket {
            if column.is_null(row as usize) {
                continue;
            }
            if seen.insert(rows.row(row as usize)) {
                picked.push(row);
            }
        }
        lengths.push(picked.len() - before);
    }

    let values = take(column.as_ref(), &UInt32Array::from(picked), None)?;
    let item = Arc::new(Field::new_list_field(column.data_type().clone(), true));
    let list = ListArray::try_new(item, OffsetBuffer::from_lengths(lengths), values, None)?;
    Ok(Arc::new(list))
}

/// Per-bucket sum, or `None` when the column type cannot be summed
fn reduce_sum(column: &ArrayRef, buckets: &Buckets) -> AggregateResult<Option<ArrayRef>> {
    let data_type = column.data_type();

    if data_type == &DataType::Null {
        return Ok(Some(Arc::new(Int64Array::from(vec![0i64; buckets.rows.len()]))));
    }
    if let Some(flags) = column.as_boolean_opt() {
        return Ok(Some(sum_booleans(flags, buckets)));
    }
    if data_type.is_integer() {
        let ints = cast(column, &DataType::Int64)?;
        return Ok(Some(sum_integers(ints.as_primitive::<Int64Type>(), buckets)));
    }
    if data_type.is_floating()
        || matches!(data_type, DataType::Decimal128(_, _) | DataType::Decimal256(_, _))
    {
        let floats = cast(column, &DataType::Float64)?;
        return Ok(Some(sum_floats(floats.as_primitive::<Float64Type>(), buckets)));
    }
    if matches!(data_type, DataType::Utf8 | DataType::LargeUtf8 | DataType::Utf8View) {
        let text = cast(column, &DataType::Utf8)?;
        return Ok(Some(sum_text(text.as_string::<i32>(), buckets)));
    }

    Ok(None)
}

fn sum_booleans(flags: &BooleanArray, buckets: &Buckets) -> ArrayRef {
    let sums: Vec<i64> = buckets
        .rows
        .iter()
        .map(|bucket| {
            bucket
                .iter()
                .filter(|&&row| flags.is_valid(row as usize) && flags.value(row as usize))
                .count() as i64
        })
        .collect();
    Arc::new(Int64Array::from(sums))
}

fn sum_integers(ints: &Int64Array, buckets: &Buckets) -> ArrayRef {
    let sums: Vec<i64> = buckets
        .rows
        .iter()
        .map(|bucket| {
            bucket
                .iter()
                .filter(|&&row| ints.is_valid(row as usize))
                .fold(0i64, |acc, &row| acc.saturating_add(ints.value(row as usize)))
        })
        .collect();
    Arc::new(Int64Array::from(sums))
}

fn sum_floats(floats: &Float64Array, buckets: &Buckets) -> ArrayRef {
    let sums: Vec<f64> = buckets
        .rows
        .iter()
        .map(|bucket| {
            bucket
                .iter()
                .filter(|&&row| floats.is_valid(row as usize))
                .map(|&row| floats.value(row as usize))
                .sum()
        })
        .collect();
    Arc::new(Float64Array::from(sums))
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Numeric {
    Int(i64),
    Float(f64),
}

fn parse_numeric(value: &str) -> Option<Numeric> {
    let value = value.trim();
    if let Ok(i) = value.parse::<i64>() {
        return Some(Numeric::Int(i));
    }
    if value.eq_ignore_ascii_case("true") {
        return Some(Numeric::Int(1));
    }
    if value.eq_ignore_ascii_case("false") {
        return Some(Numeric::Int(0));
    }
    value
        .parse::<f64>()
        .ok()
        .filter(|f| f.is_finite())
        .map(Numeric::Float)
}

/// Sum string values that parse as numbers or booleans; anything else is skipped.
/// The output is Int64 unless a fractional value was seen.
fn sum_text(text: &StringArray, buckets: &Buckets) -> ArrayRef {
    let mut unparsed = 0usize;
    let mut any_float = false;
    let parsed: Vec<Vec<Numeric>> = buckets
        .rows
        .iter()
        .map(|bucket| {
            bucket
                .iter()
                .filter(|&&row| text.is_valid(row as usize))
                .filter_map(|&row| {
                    let value = parse_numeric(text.value(row as usize));
                    match value {
                        Some(Numeric::Float(_)) => any_float = true,
                        Some(Numeric::Int(_)) => {}
                        None => unparsed += 1,
                    }
                    value
                })
                .collect()
        })
        .collect();

    if unparsed > 0 {
        tracing::warn!(unparsed, "Non-numeric values skipped while summing text column");
    }

    if any_float {
        let sums: Vec<f64> = parsed
            .iter()
            .map(|values| {
                values
                    .iter()
                    .map(|v| match v {
                        Numeric::Int(i) => *i as f64,
                        Numeric::Float(f) => *f,
                    })
                    .sum()
            })
            .collect();
        Arc::new(Float64Array::from(sums))
    } else {
        let sums: Vec<i64> = parsed
            .iter()
            .map(|values| {
                values.iter().fold(0i64, |acc, v| match v {
                    Numeric::Int(i) => acc.saturating_add(*i),
                    Numeric::Float(_) => acc,
                })
            })
            .collect();
        Arc::new(Int64Array::from(sums))
    }
}
