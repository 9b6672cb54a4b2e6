//! Parquet file writing module
//!
//! This module handles processed (columnar) snapshots: converting schema-keyed
//! rows into Arrow record batches, writing them to Parquet, and reading them
//! back as rows. The column layout always comes from a [`TableSchema`], never
//! from the data.

use arrow::array::{
    Array, ArrayRef, BooleanArray, BooleanBuilder, Float64Array, Float64Builder, Int64Array,
    Int64Builder, RecordBatch, StringArray, StringBuilder,
};
use arrow::datatypes::Schema;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use parquet::arrow::ArrowWriter;
use parquet::file::properties::WriterProperties;
use serde_json::{Number, Value};
use std::fs::File;
use std::path::Path;
use std::sync::Arc;
use tracing::info;

use crate::error::{PipelineError, Result};
use crate::model::DataRow;
use crate::schema::{ColumnSpec, ColumnType, TableSchema};
use crate::snapshot::create_file;

/// Writes rows of one table to a single Parquet file
pub struct ParquetWriter {
    table: TableSchema,
    schema: Arc<Schema>,
}

impl ParquetWriter {
    pub fn new(table: TableSchema) -> Self {
        Self {
            schema: table.arrow_schema(),
            table,
        }
    }

    /// Convert rows to a RecordBatch laid out as the table schema
    pub fn rows_to_batch(&self, rows: &[DataRow]) -> std::result::Result<RecordBatch, String> {
        let mut arrays: Vec<ArrayRef> = Vec::with_capacity(self.table.columns.len());

        for column in self.table.columns {
            let values = rows.iter().map(|row| row.get(column.name).unwrap_or(&Value::Null));

            let array: ArrayRef = match column.column_type {
                ColumnType::Integer => {
                    let mut builder = Int64Builder::with_capacity(rows.len());
                    for value in values {
                        builder.append_option(value_as_i64(value));
                    }
                    Arc::new(builder.finish())
                }
                ColumnType::Float => {
                    let mut builder = Float64Builder::with_capacity(rows.len());
                    for value in values {
                        builder.append_option(value_as_f64(value));
                    }
                    Arc::new(builder.finish())
                }
                ColumnType::Boolean => {
                    let mut builder = BooleanBuilder::with_capacity(rows.len());
                    for value in values {
                        builder.append_option(value_as_bool(value));
                    }
                    Arc::new(builder.finish())
                }
                ColumnType::Text | ColumnType::Timestamp => {
                    let mut builder = StringBuilder::new();
                    for value in values {
                        match value {
                            Value::Null => builder.append_null(),
                            Value::String(s) => builder.append_value(s),
                            other => builder.append_value(other.to_string()),
                        }
                    }
                    Arc::new(builder.finish())
                }
            };

            arrays.push(array);
        }

        RecordBatch::try_new(self.schema.clone(), arrays).map_err(|e| e.to_string())
    }

    /// Write all rows to `path`, replacing any existing file
    pub fn write(&self, path: &Path, rows: &[DataRow]) -> Result<()> {
        let batch = self
            .rows_to_batch(rows)
            .map_err(|e| PipelineError::snapshot(path, e))?;

        let file = create_file(path)?;
        let props = WriterProperties::builder().build();
        let mut writer = ArrowWriter::try_new(file, self.schema.clone(), Some(props))
            .map_err(|e| PipelineError::snapshot(path, e))?;

        if batch.num_rows() > 0 {
            writer
                .write(&batch)
                .map_err(|e| PipelineError::snapshot(path, e))?;
        }
        writer
            .close()
            .map_err(|e| PipelineError::snapshot(path, e))?;

        info!("Wrote {} records to {:?}", batch.num_rows(), path);
        Ok(())
    }
}

/// Read a processed snapshot back into rows; a missing file is `NotFound`
pub fn read_parquet_rows(path: &Path, table: &TableSchema) -> Result<Vec<DataRow>> {
    if !path.is_file() {
        return Err(PipelineError::NotFound {
            path: path.to_path_buf(),
        });
    }

    let file = File::open(path).map_err(|e| PipelineError::io(path, e))?;
    let builder = ParquetRecordBatchReaderBuilder::try_new(file)
        .map_err(|e| PipelineError::snapshot(path, e))?;

    let expected = table.arrow_schema();
    if !schemas_compatible(builder.schema().as_ref(), expected.as_ref()) {
        return Err(PipelineError::snapshot(
            path,
            format!("schema does not match table '{}'", table.name),
        ));
    }

    let reader = builder
        .build()
        .map_err(|e| PipelineError::snapshot(path, e))?;

    let mut rows = Vec::new();
    for batch in reader {
        let batch = batch.map_err(|e| PipelineError::snapshot(path, e))?;
        append_batch_rows(&batch, table, &mut rows).map_err(|e| PipelineError::snapshot(path, e))?;
    }

    Ok(rows)
}

fn append_batch_rows(
    batch: &RecordBatch,
    table: &TableSchema,
    rows: &mut Vec<DataRow>,
) -> std::result::Result<(), String> {
    let start = rows.len();
    rows.extend((0..batch.num_rows()).map(|_| DataRow::with_capacity(table.columns.len())));

    for column in table.columns {
        let array = batch
            .column_by_name(column.name)
            .ok_or_else(|| format!("missing column {}", column.name))?;

        for i in 0..batch.num_rows() {
            let value = if array.is_null(i) {
                Value::Null
            } else {
                cell_value(array.as_ref(), column, i)?
            };
            rows[start + i].insert(column.name.to_string(), value);
        }
    }

    Ok(())
}

fn cell_value(array: &dyn Array, column: &ColumnSpec, i: usize) -> std::result::Result<Value, String> {
    let wrong_type = || format!("column {} has unexpected type {:?}", column.name, array.data_type());
    let any = array.as_any();

    let value = match column.column_type {
        ColumnType::Integer => {
            let values = any.downcast_ref::<Int64Array>().ok_or_else(wrong_type)?;
            Value::from(values.value(i))
        }
        ColumnType::Float => {
            let values = any.downcast_ref::<Float64Array>().ok_or_else(wrong_type)?;
            Number::from_f64(values.value(i)).map_or(Value::Null, Value::Number)
        }
        ColumnType::Boolean => {
            let values = any.downcast_ref::<BooleanArray>().ok_or_else(wrong_type)?;
            Value::Bool(values.value(i))
        }
        ColumnType::Text | ColumnType::Timestamp => {
            let values = any.downcast_ref::<StringArray>().ok_or_else(wrong_type)?;
            Value::String(values.value(i).to_string())
        }
    };

    Ok(value)
}

fn value_as_i64(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse::<i64>().ok(),
        Value::Bool(b) => Some(i64::from(*b)),
        _ => None,
    }
}

fn value_as_f64(value: &Value) -> Option<f64> {
    let parsed = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    parsed.filter(|f| f.is_finite())
}

fn value_as_bool(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(b) => Some(*b),
        Value::Number(n) => n.as_i64().map(|n| n != 0),
        Value::String(s) => s.parse::<bool>().ok(),
        _ => None,
    }
}

/// Check if two schemas are compatible (same fields and types)
pub fn schemas_compatible(schema1: &Schema, schema2: &Schema) -> bool {
    if schema1.fields().len() != schema2.fields().len() {
        return false;
    }

    for (field1, field2) in schema1.fields().iter().zip(schema2.fields().iter()) {
        if field1.name() != field2.name() || field1.data_type() != field2.data_type() {
            return false;
        }
    }

    true
}
