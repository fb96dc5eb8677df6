// Merge newly fetched batches into the accumulator
//
// Rows are concatenated, never joined or deduplicated. The output column set
// is the union of every input's columns in first-seen order; a table lacking a
// column contributes nulls for it. Columns whose types disagree are widened.

use crate::codec::temporal_type;
use crate::error::AggregateResult;
use crate::table::{Accumulator, Batch};
use arrow::array::{new_null_array, Array, ArrayRef, RecordBatch};
use arrow::compute::{cast, concat};
use arrow::datatypes::{DataType, Field, Schema};
use std::sync::Arc;

/// Concatenate the accumulator's rows with every batch's rows.
///
/// Row count of the result is `acc.num_rows() + Σ batch.num_rows()`, and every
/// batch source is added to the processed-object ledger.
pub fn merge(accumulator: Accumulator, batches: &[Batch]) -> AggregateResult<Accumulator> {
    let (table, mut processed) = accumulator.into_parts();

    let mut tables: Vec<&RecordBatch> = Vec::with_capacity(batches.len() + 1);
    tables.push(&table);
    tables.extend(batches.iter().map(|b| &b.table));

    let merged = concat_tables(&tables)?;

    for batch in batches {
        processed.insert(batch.source.clone());
    }

    tracing::debug!(
        batches = batches.len(),
        rows = merged.num_rows(),
        columns = merged.num_columns(),
        "Merged batches into accumulator"
    );

    Ok(Accumulator::new(merged, processed))
}

/// Union-schema concatenation of arbitrary tables
pub fn concat_tables(tables: &[&RecordBatch]) -> AggregateResult<RecordBatch> {
    let fields = union_fields(tables);
    let schema = Arc::new(Schema::new(fields.clone()));

    if fields.is_empty() {
        return Ok(RecordBatch::new_empty(schema));
    }

    let mut columns: Vec<ArrayRef> = Vec::with_capacity(fields.len());
    for field in &fields {
        let mut parts: Vec<ArrayRef> = Vec::with_capacity(tables.len());
        for table in tables {
            if table.num_rows() == 0 {
                continue;
            }
            let part = match table.schema().index_of(field.name()) {
                Ok(index) => align_column(table.column(index), field.data_type())?,
                Err(_) => new_null_array(field.data_type(), table.num_rows()),
            };
            parts.push(part);
        }

        let column = if parts.is_empty() {
            new_null_array(field.data_type(), 0)
        } else {
            let refs: Vec<&dyn Array> = parts.iter().map(|a| a.as_ref()).collect();
            concat(&refs)?
        };
        columns.push(column);
    }

    Ok(RecordBatch::try_new(schema, columns)?)
}

fn align_column(column: &ArrayRef, target: &DataType) -> AggregateResult<ArrayRef> {
    if column.data_type() == target {
        Ok(column.clone())
    } else {
        Ok(cast(column, target)?)
    }
}

fn union_fields(tables: &[&RecordBatch]) -> Vec<Field> {
    let mut fields: Vec<Field> = Vec::new();
    for table in tables {
        for field in table.schema().fields() {
            match fields.iter_mut().find(|f| f.name() == field.name()) {
                Some(existing) => {
                    let widened = widen(existing.data_type(), field.data_type());
                    if &widened != existing.data_type() {
                        tracing::debug!(
                            column = %field.name(),
                            from = %existing.data_type(),
                            to = %widened,
                            "Widening column type during merge"
                        );
                        *existing = Field::new(field.name(), widened, true);
                    }
                }
                None => fields.push(Field::new(field.name(), field.data_type().clone(), true)),
            }
        }
    }
    fields
}

/// Common type for two column types seen under the same name
pub fn widen(left: &DataType, right: &DataType) -> DataType {
    use DataType::*;

    if left == right {
        return left.clone();
    }

    match (left, right) {
        (Null, other) | (other, Null) => other.clone(),
        (Timestamp(_, _), Timestamp(_, _)) => temporal_type(),
        (l, r) if l.is_integer() && r.is_integer() => Int64,
        (l, r) if l.is_numeric() && r.is_numeric() => Float64,
        _ => Utf8,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{decode_csv, CsvOptions};
    use arrow::array::{Int64Array, StringArray};
    use arrow::compute::{lexsort_to_indices, take_record_batch, SortColumn};
    use arrow::datatypes::TimeUnit;

    fn batch(source: &str, csv: &str) -> Batch {
        Batch::new(
            source,
            decode_csv(csv.as_bytes(), &CsvOptions::default()).unwrap(),
        )
    }

    fn sorted(table: &RecordBatch) -> RecordBatch {
        let columns: Vec<SortColumn> = table
            .columns()
            .iter()
            .map(|c| SortColumn {
                values: cast(c, &DataType::Utf8).unwrap(),
                options: None,
            })
            .collect();
        let indices = lexsort_to_indices(&columns, None).unwrap();
        take_record_batch(table, &indices).unwrap()
    }

    #[test]
    fn test_merge_into_empty_accumulator() {
        let b = batch(
            "a.csv",
            "eventTime,awsRegion\n2021-01-01T00:00:00Z,us-east-1\n2021-01-01T00:01:00Z,us-west-2\n",
        );
        let merged = merge(Accumulator::empty(), std::slice::from_ref(&b)).unwrap();
        assert_eq!(merged.table(), &b.table);
        assert!(merged.has_processed("a.csv"));
    }

    #[test]
    fn test_merge_preserves_row_count() {
        let b1 = batch("a.csv", "eventTime,awsRegion\n2021-01-01T00:00:00Z,us-east-1\n");
        let b2 = batch(
            "b.csv",
            "eventTime,eventName\n2021-01-01T00:02:00Z,GetObject\n2021-01-01T00:03:00Z,PutObject\n",
        );
        let acc = merge(Accumulator::empty(), &[b1]).unwrap();
        let acc = merge(acc, &[b2.clone(), b2]).unwrap();
        assert_eq!(acc.num_rows(), 5);
    }

    #[test]
    fn test_merge_unions_columns_with_nulls() {
        let b1 = batch("a.csv", "eventTime,awsRegion\n2021-01-01T00:00:00Z,us-east-1\n");
        let b2 = batch("b.csv", "eventTime,eventName\n2021-01-01T00:02:00Z,GetObject\n");
        let acc = merge(Accumulator::empty(), &[b1, b2]).unwrap();

        let schema = acc.table().schema();
        let names: Vec<&str> = schema.fields().iter().map(|f| f.name().as_str()).collect();
        assert_eq!(names, vec!["eventTime", "awsRegion", "eventName"]);

        let regions = acc.table().column(1).as_any().downcast_ref::<StringArray>().unwrap();
        assert_eq!(regions.value(0), "us-east-1");
        assert!(regions.is_null(1));
        let names = acc.table().column(2).as_any().downcast_ref::<StringArray>().unwrap();
        assert!(names.is_null(0));
        assert_eq!(names.value(1), "GetObject");
    }

    #[test]
    fn test_merge_is_commutative_over_batch_order() {
        let b1 = batch(
            "a.csv",
            "eventTime,awsRegion,isError\n2021-01-01T00:00:00Z,us-east-1,true\n",
        );
        let b2 = batch(
            "b.csv",
            "eventTime,awsRegion,eventName\n2021-01-01T00:02:00Z,us-west-2,GetObject\n",
        );
        let forward = merge(Accumulator::empty(), &[b1.clone(), b2.clone()]).unwrap();
        let backward = merge(Accumulator::empty(), &[b2, b1]).unwrap();

        assert_eq!(forward.num_rows(), backward.num_rows());
        assert_eq!(forward.processed(), backward.processed());

        // Column order follows first-seen; compare after aligning columns and sorting rows
        let order: Vec<usize> = forward
            .table()
            .schema()
            .fields()
            .iter()
            .map(|f| backward.table().schema().index_of(f.name()).unwrap())
            .collect();
        let aligned = backward.table().project(&order).unwrap();
        assert_eq!(sorted(forward.table()), sorted(&aligned));
    }

    #[test]
    fn test_merge_widens_conflicting_types() {
        let b1 = batch("a.csv", "eventTime,accountId\n2021-01-01T00:00:00Z,123\n");
        let b2 = batch("b.csv", "eventTime,accountId\n2021-01-01T00:01:00Z,anonymous\n");
        let acc = merge(Accumulator::empty(), &[b1, b2]).unwrap();

        let ids = acc.table().column(1).as_any().downcast_ref::<StringArray>().unwrap();
        assert_eq!(ids.value(0), "123");
        assert_eq!(ids.value(1), "anonymous");
    }

    #[test]
    fn test_merge_keeps_integer_columns_integer() {
        let b1 = batch("a.csv", "eventTime,count\n2021-01-01T00:00:00Z,1\n");
        let b2 = batch("b.csv", "eventTime,count\n2021-01-01T00:01:00Z,2\n");
        let acc = merge(Accumulator::empty(), &[b1, b2]).unwrap();
        let counts = acc.table().column(1).as_any().downcast_ref::<Int64Array>().unwrap();
        assert_eq!(counts.values(), &[1, 2]);
    }

    #[test]
    fn test_blank_column_takes_type_of_later_batch() {
        let blank = batch(
            "a.csv",
            "eventTime,accountId\n2021-01-01T00:00:00Z,\n2021-01-01T00:01:00Z,\n",
        );
        let typed = batch("b.csv", "eventTime,accountId\n2021-01-01T00:02:00Z,123\n");

        // Blank rows land in the accumulator first, the typed batch arrives on a later run
        let acc = merge(Accumulator::empty(), &[blank.clone()]).unwrap();
        assert_eq!(acc.table().schema().field(1).data_type(), &DataType::Null);
        let acc = merge(acc, std::slice::from_ref(&typed)).unwrap();

        let ids = acc.table().column(1).as_any().downcast_ref::<Int64Array>().unwrap();
        assert!(ids.is_null(0));
        assert!(ids.is_null(1));
        assert_eq!(ids.value(2), 123);

        let reversed = merge(Accumulator::empty(), &[typed, blank]).unwrap();
        assert_eq!(reversed.table().schema().field(1).data_type(), &DataType::Int64);
    }

    #[test]
    fn test_widen_rules() {
        assert_eq!(widen(&DataType::Int32, &DataType::Int64), DataType::Int64);
        assert_eq!(widen(&DataType::Int64, &DataType::Float64), DataType::Float64);
        assert_eq!(widen(&DataType::Null, &DataType::Boolean), DataType::Boolean);
        assert_eq!(widen(&DataType::Boolean, &DataType::Int64), DataType::Utf8);
        assert_eq!(
            widen(
                &DataType::Timestamp(TimeUnit::Second, None),
                &DataType::Timestamp(TimeUnit::Nanosecond, Some("UTC".into()))
            ),
            temporal_type()
        );
    }
}
