//! Parquet snapshots of table rows.
//!
//! Column mapping:
//! - text → `Utf8`
//! - bigint → `Int64`
//! - float → `Float64`
//! - date → `Date32`
//! - time and timestamp → `Utf8` (`HH:MM:SS[.f]`, RFC 3339)

use std::sync::Arc;

use arrow_array::{
    Array, ArrayRef, Date32Array, Float64Array, Int64Array, RecordBatch, StringArray,
};
use arrow_schema::{DataType, Field, Schema, SchemaRef};
use bytes::Bytes;
use chrono::{DateTime, NaiveDate, NaiveTime, SecondsFormat, Utc};
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use parquet::arrow::ArrowWriter;
use parquet::basic::Compression;
use parquet::file::properties::WriterProperties;

use crate::storage::ObjectStorage;
use crate::tables::{CellValue, Column, ColumnKind, Row, Table};
use crate::{HarnessError, HarnessResult};

fn arrow_type(kind: ColumnKind) -> DataType {
    match kind {
        ColumnKind::Text | ColumnKind::Time | ColumnKind::Timestamp => DataType::Utf8,
        ColumnKind::BigInt => DataType::Int64,
        ColumnKind::Float => DataType::Float64,
        ColumnKind::Date => DataType::Date32,
    }
}

pub fn arrow_schema(table: Table) -> SchemaRef {
    let fields: Vec<Field> = table
        .columns()
        .iter()
        .map(|c| Field::new(c.name, arrow_type(c.kind), c.nullable))
        .collect();
    Arc::new(Schema::new(fields))
}

/// Whether a Parquet column type can hold values of a Postgres column type.
pub fn is_compatible_type(arrow: &DataType, pg_type: &str) -> bool {
    let is_string = matches!(arrow, DataType::Utf8 | DataType::LargeUtf8 | DataType::Utf8View);
    let is_timestamp = matches!(arrow, DataType::Timestamp(_, _));
    match pg_type.to_ascii_lowercase().as_str() {
        "character varying" | "varchar" | "text" => is_string,
        "double precision" | "float8" | "real" => {
            matches!(arrow, DataType::Float16 | DataType::Float32 | DataType::Float64)
        }
        "integer" | "int" | "bigint" | "smallint" => arrow.is_integer(),
        "date" => matches!(arrow, DataType::Date32 | DataType::Date64) || is_timestamp || is_string,
        "time without time zone" => {
            matches!(arrow, DataType::Time32(_) | DataType::Time64(_)) || is_string
        }
        other if other.contains("timestamp") => is_timestamp || is_string,
        _ => false,
    }
}

fn mismatch(table: Table, column: &Column, cell: &CellValue) -> HarnessError {
    HarnessError::Snapshot(format!(
        "{}.{} expects {:?}, found {cell:?}",
        table.name(),
        column.name,
        column.kind
    ))
}

fn epoch() -> NaiveDate {
    NaiveDate::default()
}

fn build_column(table: Table, column: &Column, rows: &[Row]) -> HarnessResult<ArrayRef> {
    let cells = rows.iter().map(|row| row.get(column.name).unwrap_or(&CellValue::Null));

    let array: ArrayRef = match column.kind {
        ColumnKind::Text | ColumnKind::Time | ColumnKind::Timestamp => {
            let values = cells
                .map(|cell| match (column.kind, cell) {
                    (_, CellValue::Null) => Ok(None),
                    (ColumnKind::Text, CellValue::Text(s)) => Ok(Some(s.clone())),
                    (ColumnKind::Time, CellValue::Time(t)) => Ok(Some(t.to_string())),
                    (ColumnKind::Timestamp, CellValue::Timestamp(ts)) => {
                        Ok(Some(ts.to_rfc3339_opts(SecondsFormat::AutoSi, true)))
                    }
                    _ => Err(mismatch(table, column, cell)),
                })
                .collect::<HarnessResult<Vec<Option<String>>>>()?;
            Arc::new(StringArray::from(values))
        }
        ColumnKind::BigInt => {
            let values = cells
                .map(|cell| match cell {
                    CellValue::Null => Ok(None),
                    CellValue::Int(v) => Ok(Some(*v)),
                    _ => Err(mismatch(table, column, cell)),
                })
                .collect::<HarnessResult<Vec<Option<i64>>>>()?;
            Arc::new(Int64Array::from(values))
        }
        ColumnKind::Float => {
            let values = cells
                .map(|cell| match cell {
                    CellValue::Null => Ok(None),
                    CellValue::Float(v) => Ok(Some(*v)),
                    _ => Err(mismatch(table, column, cell)),
                })
                .collect::<HarnessResult<Vec<Option<f64>>>>()?;
            Arc::new(Float64Array::from(values))
        }
        ColumnKind::Date => {
            let values = cells
                .map(|cell| match cell {
                    CellValue::Null => Ok(None),
                    CellValue::Date(d) => Ok(Some((*d - epoch()).num_days() as i32)),
                    _ => Err(mismatch(table, column, cell)),
                })
                .collect::<HarnessResult<Vec<Option<i32>>>>()?;
            Arc::new(Date32Array::from(values))
        }
    };
    Ok(array)
}

/// Encodes rows of `table` as a single-batch, Snappy-compressed Parquet file.
pub fn encode(table: Table, rows: &[Row]) -> HarnessResult<Bytes> {
    let schema = arrow_schema(table);
    let columns = table
        .columns()
        .iter()
        .map(|c| build_column(table, c, rows))
        .collect::<HarnessResult<Vec<_>>>()?;
    let batch = RecordBatch::try_new(schema.clone(), columns)?;

    let props = WriterProperties::builder()
        .set_compression(Compression::SNAPPY)
        .build();
    let mut buffer = Vec::new();
    let mut writer = ArrowWriter::try_new(&mut buffer, schema, Some(props))?;
    writer.write(&batch)?;
    writer.close()?;
    Ok(Bytes::from(buffer))
}

fn column_of<'a, T: 'static>(
    batch: &'a RecordBatch,
    table: Table,
    name: &str,
) -> HarnessResult<&'a T> {
    batch
        .column_by_name(name)
        .ok_or_else(|| HarnessError::Snapshot(format!("{}.{name} is missing", table.name())))?
        .as_any()
        .downcast_ref::<T>()
        .ok_or_else(|| {
            HarnessError::Snapshot(format!("{}.{name} has an unexpected type", table.name()))
        })
}

fn read_column(table: Table, column: &Column, batch: &RecordBatch) -> HarnessResult<Vec<CellValue>> {
    let name = column.name;
    let rows = 0..batch.num_rows();
    let cells = match column.kind {
        ColumnKind::Text | ColumnKind::Time | ColumnKind::Timestamp => {
            let array = column_of::<StringArray>(batch, table, name)?;
            rows.map(|i| {
                if array.is_null(i) {
                    return Ok(CellValue::Null);
                }
                let raw = array.value(i);
                let bad = || {
                    HarnessError::Snapshot(format!(
                        "{}.{name} holds unparseable value '{raw}'",
                        table.name()
                    ))
                };
                Ok(match column.kind {
                    ColumnKind::Time => CellValue::Time(raw.parse::<NaiveTime>().map_err(|_| bad())?),
                    ColumnKind::Timestamp => CellValue::Timestamp(
                        DateTime::parse_from_rfc3339(raw)
                            .map_err(|_| bad())?
                            .with_timezone(&Utc),
                    ),
                    _ => CellValue::Text(raw.to_owned()),
                })
            })
            .collect::<HarnessResult<Vec<_>>>()?
        }
        ColumnKind::BigInt => {
            let array = column_of::<Int64Array>(batch, table, name)?;
            rows.map(|i| CellValue::from(array.is_valid(i).then(|| array.value(i))))
                .collect()
        }
        ColumnKind::Float => {
            let array = column_of::<Float64Array>(batch, table, name)?;
            rows.map(|i| CellValue::from(array.is_valid(i).then(|| array.value(i))))
                .collect()
        }
        ColumnKind::Date => {
            let array = column_of::<Date32Array>(batch, table, name)?;
            rows.map(|i| {
                CellValue::from(
                    array
                        .is_valid(i)
                        .then(|| epoch() + chrono::Duration::days(i64::from(array.value(i)))),
                )
            })
            .collect()
        }
    };
    Ok(cells)
}

fn read_batch(table: Table, batch: &RecordBatch, out: &mut Vec<Row>) -> HarnessResult<()> {
    let mut rows: Vec<Row> = (0..batch.num_rows()).map(|_| Row::new()).collect();
    for column in table.columns() {
        let cells = read_column(table, column, batch)?;
        for (row, cell) in rows.iter_mut().zip(cells) {
            row.insert(column.name.to_owned(), cell);
        }
    }
    out.extend(rows);
    Ok(())
}

/// Decodes a Parquet file written by [`encode`] back into rows.
pub fn decode(table: Table, bytes: Bytes) -> HarnessResult<Vec<Row>> {
    let reader = ParquetRecordBatchReaderBuilder::try_new(bytes)?.build()?;
    let mut rows = Vec::new();
    for batch in reader {
        read_batch(table, &batch?, &mut rows)?;
    }
    Ok(rows)
}

/// Arrow schema of a stored Parquet file.
pub fn read_schema(bytes: Bytes) -> HarnessResult<SchemaRef> {
    let builder = ParquetRecordBatchReaderBuilder::try_new(bytes)?;
    Ok(builder.schema().clone())
}

/// Encodes and uploads rows; returns the number of bytes written.
pub async fn write_snapshot(
    storage: &ObjectStorage,
    key: &str,
    table: Table,
    rows: &[Row],
) -> HarnessResult<usize> {
    let bytes = encode(table, rows)?;
    let size = bytes.len();
    storage.put(key, bytes).await?;
    tracing::info!(key, table = %table, rows = rows.len(), size, "snapshot written");
    Ok(size)
}

pub async fn read_snapshot(
    storage: &ObjectStorage,
    key: &str,
    table: Table,
) -> HarnessResult<Vec<Row>> {
    let bytes = storage.get(key).await?;
    decode(table, bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{FixtureSet, Namespace};
    use crate::tables::ToRow;
    use arrow_schema::TimeUnit;

    fn result_rows() -> Vec<Row> {
        let mut set = FixtureSet::standard(&Namespace::generate()).expect("set");
        set.assign_result_ids(&[1, 2, 3, 4, 5]).expect("ids");
        set.lab_results[1].result_value = None;
        set.lab_results.iter().map(ToRow::to_row).collect()
    }

    #[test]
    fn test_encode_decode_preserves_rows() {
        let rows = result_rows();
        let bytes = encode(Table::LabResults, &rows).expect("encode");
        let decoded = decode(Table::LabResults, bytes).expect("decode");
        assert_eq!(decoded, rows);
    }

    #[test]
    fn test_timestamps_and_nulls_survive() {
        let set = FixtureSet::unscoped().expect("set");
        let patients: Vec<Row> = set.patients.iter().map(ToRow::to_row).collect();
        let decoded = decode(
            Table::PatientInformation,
            encode(Table::PatientInformation, &patients).expect("encode"),
        )
        .expect("decode");
        assert_eq!(decoded, patients);
        assert_eq!(decoded[1]["allergies"], CellValue::Null);

        let admissions: Vec<Row> = set.admissions.iter().map(ToRow::to_row).collect();
        let decoded = decode(
            Table::Admissions,
            encode(Table::Admissions, &admissions).expect("encode"),
        )
        .expect("decode");
        assert_eq!(decoded[1]["release_date"], CellValue::Null);
        assert_eq!(decoded, admissions);
    }

    #[test]
    fn test_empty_table_round_trips() {
        let bytes = encode(Table::LabTests, &[]).expect("encode");
        assert!(decode(Table::LabTests, bytes).expect("decode").is_empty());
    }

    #[test]
    fn test_wrong_cell_type_is_rejected() {
        let mut rows = result_rows();
        rows[0].insert("result_value".into(), CellValue::Text("high".into()));
        let err = encode(Table::LabResults, &rows).expect_err("mismatch");
        assert!(matches!(err, HarnessError::Snapshot(msg) if msg.contains("lab_results.result_value")));
    }

    #[test]
    fn test_written_schema_is_compatible_with_postgres_types() {
        let bytes = encode(Table::Admissions, &[]).expect("encode");
        let schema = read_schema(bytes).expect("schema");
        for column in Table::Admissions.columns() {
            let field = schema.field_with_name(column.name).expect("field");
            assert!(
                is_compatible_type(field.data_type(), column.pg_type),
                "{} as {}",
                column.name,
                field.data_type()
            );
        }
    }

    #[test]
    fn test_type_compatibility_rules() {
        assert!(is_compatible_type(&DataType::Utf8, "character varying"));
        assert!(!is_compatible_type(&DataType::Int64, "text"));
        assert!(is_compatible_type(&DataType::Float32, "real"));
        assert!(is_compatible_type(&DataType::Int32, "integer"));
        assert!(is_compatible_type(&DataType::Int64, "bigint"));
        assert!(is_compatible_type(
            &DataType::Timestamp(TimeUnit::Microsecond, None),
            "date"
        ));
        assert!(is_compatible_type(&DataType::Utf8, "time without time zone"));
        assert!(is_compatible_type(&DataType::Utf8, "timestamp with time zone"));
        assert!(!is_compatible_type(&DataType::Float64, "timestamp without time zone"));
        assert!(!is_compatible_type(&DataType::Utf8, "jsonb"));
    }

    #[tokio::test]
    async fn test_snapshot_through_object_storage() {
        let storage = ObjectStorage::in_memory("bucket");
        let rows = result_rows();
        let size = write_snapshot(&storage, "raw/parquet/lab_results/x.parquet", Table::LabResults, &rows)
            .await
            .expect("write");
        assert!(size > 0);
        let back = read_snapshot(&storage, "raw/parquet/lab_results/x.parquet", Table::LabResults)
            .await
            .expect("read");
        assert_eq!(back, rows);
    }
}
