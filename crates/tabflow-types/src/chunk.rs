//! In-memory chunk representation.
//!
//! `Chunk` is a bounded slice of a table: named columns of equal length,
//! each stored as a typed vector so that per-value tags are avoided.

use std::sync::Arc;

use crate::error::{Result, TabflowError};
use crate::flex_type::{FlexType, FlexTypeEnum};

/// Typed column vector. `None` represents a null cell.
#[derive(Debug, Clone, PartialEq)]
pub enum ColumnData {
    Integer(Vec<Option<i64>>),
    Float(Vec<Option<f64>>),
    String(Vec<Option<Arc<str>>>),
}

impl ColumnData {
    /// No rows. `Undefined` columns are stored as integers.
    pub fn empty(dtype: FlexTypeEnum) -> Self {
        match dtype {
            FlexTypeEnum::Integer => ColumnData::Integer(Vec::new()),
            FlexTypeEnum::Float => ColumnData::Float(Vec::new()),
            FlexTypeEnum::String => ColumnData::String(Vec::new()),
            FlexTypeEnum::Undefined => ColumnData::Integer(Vec::new()),
        }
    }

    pub fn len(&self) -> usize {
        match self {
            ColumnData::Integer(v) => v.len(),
            ColumnData::Float(v) => v.len(),
            ColumnData::String(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn dtype(&self) -> FlexTypeEnum {
        match self {
            ColumnData::Integer(_) => FlexTypeEnum::Integer,
            ColumnData::Float(_) => FlexTypeEnum::Float,
            ColumnData::String(_) => FlexTypeEnum::String,
        }
    }

    /// Append one cell. Nulls fit any column; an integer widens into a
    /// float column.
    pub fn push(&mut self, value: &FlexType) -> Result<()> {
        match (self, value) {
            (ColumnData::Integer(v), FlexType::Integer(i)) => v.push(Some(*i)),
            (ColumnData::Integer(v), FlexType::Undefined) => v.push(None),
            (ColumnData::Float(v), FlexType::Float(f)) => v.push(Some(*f)),
            (ColumnData::Float(v), FlexType::Integer(i)) => v.push(Some(*i as f64)),
            (ColumnData::Float(v), FlexType::Undefined) => v.push(None),
            (ColumnData::String(v), FlexType::String(s)) => v.push(Some(s.clone())),
            (ColumnData::String(v), FlexType::Undefined) => v.push(None),
            (col, val) => {
                return Err(TabflowError::Type(format!(
                    "Cannot push {} into {} column",
                    val.type_enum(),
                    col.dtype()
                )));
            }
        }
        Ok(())
    }

    pub fn get(&self, index: usize) -> FlexType {
        match self {
            ColumnData::Integer(v) => match &v[index] {
                Some(i) => FlexType::Integer(*i),
                None => FlexType::Undefined,
            },
            ColumnData::Float(v) => match &v[index] {
                Some(f) => FlexType::Float(*f),
                None => FlexType::Undefined,
            },
            ColumnData::String(v) => match &v[index] {
                Some(s) => FlexType::String(s.clone()),
                None => FlexType::Undefined,
            },
        }
    }

    pub fn is_null(&self, index: usize) -> bool {
        match self {
            ColumnData::Integer(v) => v[index].is_none(),
            ColumnData::Float(v) => v[index].is_none(),
            ColumnData::String(v) => v[index].is_none(),
        }
    }

    pub fn null_count(&self) -> usize {
        match self {
            ColumnData::Integer(v) => v.iter().filter(|x| x.is_none()).count(),
            ColumnData::Float(v) => v.iter().filter(|x| x.is_none()).count(),
            ColumnData::String(v) => v.iter().filter(|x| x.is_none()).count(),
        }
    }

    /// Numeric view of the column. Fails for string columns.
    pub fn to_f64(&self) -> Result<Vec<Option<f64>>> {
        match self {
            ColumnData::Integer(v) => Ok(v.iter().map(|x| x.map(|i| i as f64)).collect()),
            ColumnData::Float(v) => Ok(v.clone()),
            ColumnData::String(_) => Err(TabflowError::Type(
                "Cannot view a string column as float".to_string(),
            )),
        }
    }

    /// Append every cell of `other`, which must have the same dtype.
    pub fn extend(&mut self, other: &ColumnData) -> Result<()> {
        match (self, other) {
            (ColumnData::Integer(a), ColumnData::Integer(b)) => a.extend_from_slice(b),
            (ColumnData::Float(a), ColumnData::Float(b)) => a.extend_from_slice(b),
            (ColumnData::String(a), ColumnData::String(b)) => a.extend_from_slice(b),
            (a, b) => {
                return Err(TabflowError::Type(format!(
                    "Cannot extend {} column with {} column",
                    a.dtype(),
                    b.dtype()
                )));
            }
        }
        Ok(())
    }

    /// Gather the given row indices. Indices must be in range.
    pub fn take(&self, indices: &[usize]) -> ColumnData {
        match self {
            ColumnData::Integer(v) => ColumnData::Integer(indices.iter().map(|&i| v[i]).collect()),
            ColumnData::Float(v) => ColumnData::Float(indices.iter().map(|&i| v[i]).collect()),
            ColumnData::String(v) => {
                ColumnData::String(indices.iter().map(|&i| v[i].clone()).collect())
            }
        }
    }
}

/// A batch of rows stored in columnar format with named, typed columns.
#[derive(Debug, Clone, PartialEq)]
pub struct Chunk {
    names: Vec<String>,
    columns: Vec<ColumnData>,
    num_rows: usize,
}

impl Chunk {
    /// Create a chunk from named columns. All columns must have the same
    /// length and names must be unique.
    pub fn new(names: Vec<String>, columns: Vec<ColumnData>) -> Result<Self> {
        if names.len() != columns.len() {
            return Err(TabflowError::Format(format!(
                "Got {} column names for {} columns",
                names.len(),
                columns.len()
            )));
        }
        for (i, name) in names.iter().enumerate() {
            if names[..i].contains(name) {
                return Err(TabflowError::Format(format!(
                    "Duplicate column name '{}'",
                    name
                )));
            }
        }
        let num_rows = columns.first().map(|c| c.len()).unwrap_or(0);
        for (name, col) in names.iter().zip(columns.iter()) {
            if col.len() != num_rows {
                return Err(TabflowError::Format(format!(
                    "Column '{}' has {} rows, expected {}",
                    name,
                    col.len(),
                    num_rows
                )));
            }
        }
        Ok(Chunk {
            names,
            columns,
            num_rows,
        })
    }

    /// Create an empty chunk with the given schema.
    pub fn empty(schema: &[(String, FlexTypeEnum)]) -> Self {
        Chunk {
            names: schema.iter().map(|(n, _)| n.clone()).collect(),
            columns: schema.iter().map(|(_, dt)| ColumnData::empty(*dt)).collect(),
            num_rows: 0,
        }
    }

    /// Convert from row-major values to columnar format.
    pub fn from_rows(schema: &[(String, FlexTypeEnum)], rows: &[Vec<FlexType>]) -> Result<Self> {
        let mut chunk = Chunk::empty(schema);
        for (row_idx, row) in rows.iter().enumerate() {
            if row.len() != schema.len() {
                return Err(TabflowError::Format(format!(
                    "Row {} has {} values, expected {}",
                    row_idx,
                    row.len(),
                    schema.len()
                )));
            }
            for (col, val) in chunk.columns.iter_mut().zip(row.iter()) {
                col.push(val)?;
            }
        }
        chunk.num_rows = rows.len();
        Ok(chunk)
    }

    pub fn num_rows(&self) -> usize {
        self.num_rows
    }

    pub fn num_columns(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.num_rows == 0
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn dtypes(&self) -> Vec<FlexTypeEnum> {
        self.columns.iter().map(|c| c.dtype()).collect()
    }

    /// Column names paired with their types.
    pub fn schema(&self) -> Vec<(String, FlexTypeEnum)> {
        self.names
            .iter()
            .cloned()
            .zip(self.columns.iter().map(|c| c.dtype()))
            .collect()
    }

    pub fn column(&self, index: usize) -> &ColumnData {
        &self.columns[index]
    }

    pub fn columns(&self) -> &[ColumnData] {
        &self.columns
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.names.iter().position(|n| n == name)
    }

    /// Look up a column by name.
    pub fn column_by_name(&self, name: &str) -> Result<&ColumnData> {
        self.index_of(name)
            .map(|i| &self.columns[i])
            .ok_or_else(|| TabflowError::Data(format!("Column '{}' not found in chunk", name)))
    }

    /// Replace the column called `name`, or append it when absent.
    pub fn set_column(&mut self, name: &str, data: ColumnData) -> Result<()> {
        if !self.columns.is_empty() && data.len() != self.num_rows {
            return Err(TabflowError::Format(format!(
                "Column '{}' has {} rows, expected {}",
                name,
                data.len(),
                self.num_rows
            )));
        }
        if self.columns.is_empty() {
            self.num_rows = data.len();
        }
        match self.index_of(name) {
            Some(i) => self.columns[i] = data,
            None => {
                self.names.push(name.to_string());
                self.columns.push(data);
            }
        }
        Ok(())
    }

    pub fn row(&self, index: usize) -> Vec<FlexType> {
        self.columns.iter().map(|col| col.get(index)).collect()
    }

    /// Row-major copy, mostly for tests.
    pub fn to_rows(&self) -> Vec<Vec<FlexType>> {
        (0..self.num_rows).map(|i| self.row(i)).collect()
    }

    /// Select columns by name, in the given order.
    pub fn select(&self, names: &[String]) -> Result<Self> {
        let mut columns = Vec::with_capacity(names.len());
        for name in names {
            columns.push(self.column_by_name(name)?.clone());
        }
        Ok(Chunk {
            names: names.to_vec(),
            columns,
            num_rows: self.num_rows,
        })
    }

    /// Gather rows by index, in the given order.
    pub fn take(&self, indices: &[usize]) -> Result<Self> {
        if let Some(&bad) = indices.iter().find(|&&i| i >= self.num_rows) {
            return Err(TabflowError::Format(format!(
                "Row index {} out of range ({})",
                bad, self.num_rows
            )));
        }
        Ok(Chunk {
            names: self.names.clone(),
            columns: self.columns.iter().map(|c| c.take(indices)).collect(),
            num_rows: indices.len(),
        })
    }

    /// Keep the rows where `mask` is true.
    pub fn filter_mask(&self, mask: &[bool]) -> Result<Self> {
        if mask.len() != self.num_rows {
            return Err(TabflowError::Format(format!(
                "Mask has {} entries, expected {}",
                mask.len(),
                self.num_rows
            )));
        }
        let keep: Vec<usize> = mask
            .iter()
            .enumerate()
            .filter_map(|(i, &m)| m.then_some(i))
            .collect();
        self.take(&keep)
    }

    /// Append another chunk (vertically). Names and types must match.
    pub fn append(&mut self, other: &Chunk) -> Result<()> {
        if self.names != other.names {
            return Err(TabflowError::Format(format!(
                "Column mismatch: {:?} vs {:?}",
                self.names, other.names
            )));
        }
        for (i, (a, b)) in self.columns.iter_mut().zip(other.columns.iter()).enumerate() {
            if a.dtype() != b.dtype() {
                return Err(TabflowError::Type(format!(
                    "Column '{}' type mismatch: {} vs {}",
                    self.names[i],
                    a.dtype(),
                    b.dtype()
                )));
            }
            a.extend(b)?;
        }
        self.num_rows += other.num_rows;
        Ok(())
    }
}
