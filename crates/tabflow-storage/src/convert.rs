//! Conversion between arrow `RecordBatch`es and tabflow chunks.
//!
//! Reading widens every supported arrow type to one of the three chunk
//! column types; writing always produces Int64, Float64 and Utf8 columns.

use std::sync::Arc;

use arrow::array::{Array, ArrayRef, Float64Array, Int64Array, StringArray};
use arrow::compute::cast;
use arrow::datatypes::{DataType, Field, Schema, SchemaRef};
use arrow::record_batch::RecordBatch;

use tabflow_types::chunk::{Chunk, ColumnData};
use tabflow_types::error::{Result, TabflowError};
use tabflow_types::flex_type::FlexTypeEnum;

/// Arrow type used to store a chunk column of the given type.
pub fn dtype_to_arrow(dtype: FlexTypeEnum) -> DataType {
    match dtype {
        FlexTypeEnum::Integer | FlexTypeEnum::Undefined => DataType::Int64,
        FlexTypeEnum::Float => DataType::Float64,
        FlexTypeEnum::String => DataType::Utf8,
    }
}

/// Chunk column type an arrow column is widened to on read.
pub fn arrow_to_dtype(data_type: &DataType) -> Result<FlexTypeEnum> {
    match data_type {
        DataType::Boolean
        | DataType::Int8
        | DataType::Int16
        | DataType::Int32
        | DataType::Int64
        | DataType::UInt8
        | DataType::UInt16
        | DataType::UInt32
        | DataType::UInt64 => Ok(FlexTypeEnum::Integer),
        DataType::Float16 | DataType::Float32 | DataType::Float64 => Ok(FlexTypeEnum::Float),
        DataType::Utf8 | DataType::LargeUtf8 => Ok(FlexTypeEnum::String),
        DataType::Dictionary(_, value) => match arrow_to_dtype(value)? {
            FlexTypeEnum::String => Ok(FlexTypeEnum::String),
            other => Err(TabflowError::Data(format!(
                "Unsupported dictionary value type {} (as {})",
                value, other
            ))),
        },
        other => Err(TabflowError::Data(format!(
            "Unsupported arrow column type {}",
            other
        ))),
    }
}

/// Build a nullable arrow schema for the given chunk schema.
pub fn arrow_schema(schema: &[(String, FlexTypeEnum)]) -> SchemaRef {
    let fields: Vec<Field> = schema
        .iter()
        .map(|(name, dtype)| Field::new(name, dtype_to_arrow(*dtype), true))
        .collect();
    Arc::new(Schema::new(fields))
}

/// Chunk schema of an arrow schema, with read-side widening applied.
pub fn schema_from_arrow(schema: &Schema) -> Result<Vec<(String, FlexTypeEnum)>> {
    schema
        .fields()
        .iter()
        .map(|f| Ok((f.name().clone(), arrow_to_dtype(f.data_type())?)))
        .collect()
}

/// Convert a chunk into a record batch with the given schema.
pub fn chunk_to_record_batch(chunk: &Chunk, schema: &SchemaRef) -> Result<RecordBatch> {
    let arrays: Vec<ArrayRef> = chunk
        .columns()
        .iter()
        .map(|col| -> ArrayRef {
            match col {
                ColumnData::Integer(v) => Arc::new(Int64Array::from(v.clone())),
                ColumnData::Float(v) => Arc::new(Float64Array::from(v.clone())),
                ColumnData::String(v) => {
                    Arc::new(StringArray::from_iter(v.iter().map(|s| s.as_deref())))
                }
            }
        })
        .collect();
    RecordBatch::try_new(schema.clone(), arrays)
        .map_err(|e| TabflowError::Format(format!("Failed to build record batch: {}", e)))
}

/// Convert a record batch into a chunk, widening column types.
pub fn record_batch_to_chunk(batch: &RecordBatch) -> Result<Chunk> {
    let schema = batch.schema();
    let mut names = Vec::with_capacity(batch.num_columns());
    let mut columns = Vec::with_capacity(batch.num_columns());
    for (field, array) in schema.fields().iter().zip(batch.columns()) {
        let dtype = arrow_to_dtype(field.data_type())?;
        names.push(field.name().clone());
        columns.push(array_to_column(array, dtype, field.name())?);
    }
    Chunk::new(names, columns)
}

fn array_to_column(array: &ArrayRef, dtype: FlexTypeEnum, name: &str) -> Result<ColumnData> {
    let target = dtype_to_arrow(dtype);
    let cast_err =
        |e: arrow::error::ArrowError| TabflowError::Data(format!("Column '{}': {}", name, e));
    let widened = if array.data_type() == &target {
        array.clone()
    } else {
        cast(array, &target).map_err(cast_err)?
    };
    let downcast_err = || TabflowError::Data(format!("Column '{}' is not {}", name, target));
    match dtype {
        FlexTypeEnum::Integer | FlexTypeEnum::Undefined => {
            let arr = widened
                .as_any()
                .downcast_ref::<Int64Array>()
                .ok_or_else(downcast_err)?;
            Ok(ColumnData::Integer(arr.iter().collect()))
        }
        FlexTypeEnum::Float => {
            let arr = widened
                .as_any()
                .downcast_ref::<Float64Array>()
                .ok_or_else(downcast_err)?;
            Ok(ColumnData::Float(arr.iter().collect()))
        }
        FlexTypeEnum::String => {
            let arr = widened
                .as_any()
                .downcast_ref::<StringArray>()
                .ok_or_else(downcast_err)?;
            Ok(ColumnData::String(arr.iter().map(|s| s.map(Arc::from)).collect()))
        }
    }
}
