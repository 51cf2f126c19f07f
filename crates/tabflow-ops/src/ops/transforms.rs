//! Column transforms.
//!
//! Each transform reads its input columns from the chunk and writes one
//! output column per input. Operators that read statistics declare the
//! stat operator producing them so the plan can schedule it first.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use tabflow_types::chunk::{Chunk, ColumnData};
use tabflow_types::error::{Result, TabflowError};

use super::stat_ops::{Encoder, Median, Moments};
use super::{StatOperator, TransformOperator};
use crate::columns::ColumnGroup;
use crate::hashing::hash_value;
use crate::stats::{StatKind, Stats};

/// Compute each output column from its input column.
fn map_columns(
    mut chunk: Chunk,
    inputs: &[String],
    outputs: &[String],
    mut f: impl FnMut(&str, &ColumnData) -> Result<ColumnData>,
) -> Result<Chunk> {
    if inputs.len() != outputs.len() {
        return Err(TabflowError::Configuration(format!(
            "{} input columns mapped to {} outputs",
            inputs.len(),
            outputs.len()
        )));
    }
    for (input, output) in inputs.iter().zip(outputs) {
        let result = f(input, chunk.column_by_name(input)?)?;
        chunk.set_column(output, result)?;
    }
    Ok(chunk)
}

fn numeric_only(op: &str, input: &str, column: &ColumnData) -> Result<()> {
    if let ColumnData::String(_) = column {
        return Err(TabflowError::Type(format!(
            "{} needs a numeric column, '{}' is string",
            op, input
        )));
    }
    Ok(())
}

/// Replace nulls with `value`. Integer columns stay integer when the
/// value is integral.
fn fill_nulls(op: &str, input: &str, column: &ColumnData, value: f64) -> Result<ColumnData> {
    numeric_only(op, input, column)?;
    let integral = value.is_finite() && value.fract() == 0.0;
    Ok(match column {
        ColumnData::Integer(v) if integral => {
            let fill = value as i64;
            ColumnData::Integer(v.iter().map(|x| Some(x.unwrap_or(fill))).collect())
        }
        other => ColumnData::Float(
            other
                .to_f64()?
                .into_iter()
                .map(|x| Some(x.unwrap_or(value)))
                .collect(),
        ),
    })
}

macro_rules! transform_ctor {
    ($op:ident { $($field:ident: $value:expr),* }) => {
        impl $op {
            pub fn new() -> Self {
                Self::default()
            }

            /// Restrict the operator to these columns of its group.
            pub fn on<S: Into<String>>(columns: impl IntoIterator<Item = S>) -> Self {
                $op {
                    columns: Some(columns.into_iter().map(Into::into).collect()),
                    ..Self::default()
                }
            }

            /// Write `<input>_<name>` next to the input instead of
            /// overwriting it.
            pub fn appending(mut self) -> Self {
                self.replace = false;
                self
            }
        }

        impl Default for $op {
            fn default() -> Self {
                $op {
                    columns: None,
                    replace: true,
                    $($field: $value),*
                }
            }
        }
    };
}

/// Nulls and negative values become 0.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ZeroFill {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub columns: Option<Vec<String>>,
    pub replace: bool,
}

/// Nulls become a constant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FillMissing {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub columns: Option<Vec<String>>,
    pub replace: bool,
    pub fill_value: f64,
}

/// Nulls become the column median.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FillMedian {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub columns: Option<Vec<String>>,
    pub replace: bool,
}

/// `ln(1 + x)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogOp {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub columns: Option<Vec<String>>,
    pub replace: bool,
}

/// Standardize to zero mean and unit variance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Normalize {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub columns: Option<Vec<String>>,
    pub replace: bool,
}

/// Map categories to their vocabulary codes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Categorify {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub columns: Option<Vec<String>>,
    pub replace: bool,
}

/// Bucket count for [`HashBucket`]: one for every column, or per column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Buckets {
    Global(u64),
    PerColumn(BTreeMap<String, u64>),
}

impl Buckets {
    fn for_column(&self, column: &str) -> Result<u64> {
        let n = match self {
            Buckets::Global(n) => *n,
            Buckets::PerColumn(map) => *map.get(column).ok_or_else(|| {
                TabflowError::Configuration(format!(
                    "No bucket count given for column '{}'",
                    column
                ))
            })?,
        };
        if n == 0 {
            return Err(TabflowError::Configuration(format!(
                "Bucket count for column '{}' must be positive",
                column
            )));
        }
        Ok(n)
    }
}

/// Hash values into a fixed number of buckets.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HashBucket {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub columns: Option<Vec<String>>,
    pub replace: bool,
    pub num_buckets: Buckets,
}

/// Drop rows holding a null in any targeted column.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Dropna {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub columns: Option<Vec<String>>,
}

transform_ctor!(ZeroFill {});
transform_ctor!(FillMissing { fill_value: 0.0 });
transform_ctor!(FillMedian {});
transform_ctor!(LogOp {});
transform_ctor!(Normalize {});
transform_ctor!(Categorify {});
transform_ctor!(HashBucket { num_buckets: Buckets::Global(10) });

impl FillMissing {
    pub fn with_value(fill_value: f64) -> Self {
        FillMissing {
            fill_value,
            ..Self::default()
        }
    }
}

impl HashBucket {
    pub fn with_buckets(num_buckets: Buckets) -> Self {
        HashBucket {
            num_buckets,
            ..Self::default()
        }
    }
}

impl Dropna {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on<S: Into<String>>(columns: impl IntoIterator<Item = S>) -> Self {
        Dropna {
            columns: Some(columns.into_iter().map(Into::into).collect()),
        }
    }
}

impl TransformOperator for ZeroFill {
    fn name(&self) -> &'static str {
        "ZeroFill"
    }

    fn columns(&self) -> Option<&[String]> {
        self.columns.as_deref()
    }

    fn default_group(&self) -> ColumnGroup {
        ColumnGroup::Continuous
    }

    fn replace(&self) -> bool {
        self.replace
    }

    fn transform(&self, chunk: Chunk, inputs: &[String], outputs: &[String], _stats: &Stats) -> Result<Chunk> {
        map_columns(chunk, inputs, outputs, |input, column| match column {
            ColumnData::Integer(v) => Ok(ColumnData::Integer(
                v.iter().map(|x| Some(x.unwrap_or(0).max(0))).collect(),
            )),
            ColumnData::Float(v) => Ok(ColumnData::Float(
                v.iter().map(|x| Some(x.unwrap_or(0.0).max(0.0))).collect(),
            )),
            ColumnData::String(_) => Err(TabflowError::Type(format!(
                "ZeroFill needs a numeric column, '{}' is string",
                input
            ))),
        })
    }
}

impl TransformOperator for FillMissing {
    fn name(&self) -> &'static str {
        "FillMissing"
    }

    fn columns(&self) -> Option<&[String]> {
        self.columns.as_deref()
    }

    fn default_group(&self) -> ColumnGroup {
        ColumnGroup::Continuous
    }

    fn replace(&self) -> bool {
        self.replace
    }

    fn transform(&self, chunk: Chunk, inputs: &[String], outputs: &[String], _stats: &Stats) -> Result<Chunk> {
        map_columns(chunk, inputs, outputs, |input, column| {
            fill_nulls(self.name(), input, column, self.fill_value)
        })
    }
}

impl TransformOperator for FillMedian {
    fn name(&self) -> &'static str {
        "FillMedian"
    }

    fn columns(&self) -> Option<&[String]> {
        self.columns.as_deref()
    }

    fn default_group(&self) -> ColumnGroup {
        ColumnGroup::Continuous
    }

    fn replace(&self) -> bool {
        self.replace
    }

    fn dependencies(&self) -> Vec<Arc<dyn StatOperator>> {
        vec![Arc::new(Median::new())]
    }

    fn required_stats(&self) -> &'static [StatKind] {
        &[StatKind::Medians]
    }

    fn transform(&self, chunk: Chunk, inputs: &[String], outputs: &[String], stats: &Stats) -> Result<Chunk> {
        map_columns(chunk, inputs, outputs, |input, column| {
            let median = stats.scalar(StatKind::Medians, input)?;
            fill_nulls(self.name(), input, column, median)
        })
    }
}

impl TransformOperator for LogOp {
    fn name(&self) -> &'static str {
        "LogOp"
    }

    fn columns(&self) -> Option<&[String]> {
        self.columns.as_deref()
    }

    fn default_group(&self) -> ColumnGroup {
        ColumnGroup::Continuous
    }

    fn replace(&self) -> bool {
        self.replace
    }

    fn transform(&self, chunk: Chunk, inputs: &[String], outputs: &[String], _stats: &Stats) -> Result<Chunk> {
        map_columns(chunk, inputs, outputs, |input, column| {
            numeric_only(self.name(), input, column)?;
            Ok(ColumnData::Float(
                column
                    .to_f64()?
                    .into_iter()
                    .map(|x| x.map(f64::ln_1p))
                    .collect(),
            ))
        })
    }
}

impl TransformOperator for Normalize {
    fn name(&self) -> &'static str {
        "Normalize"
    }

    fn columns(&self) -> Option<&[String]> {
        self.columns.as_deref()
    }

    fn default_group(&self) -> ColumnGroup {
        ColumnGroup::Continuous
    }

    fn replace(&self) -> bool {
        self.replace
    }

    fn dependencies(&self) -> Vec<Arc<dyn StatOperator>> {
        vec![Arc::new(Moments::new())]
    }

    fn required_stats(&self) -> &'static [StatKind] {
        &[StatKind::Means, StatKind::Stds]
    }

    fn transform(&self, chunk: Chunk, inputs: &[String], outputs: &[String], stats: &Stats) -> Result<Chunk> {
        map_columns(chunk, inputs, outputs, |input, column| {
            numeric_only(self.name(), input, column)?;
            let mean = stats.scalar(StatKind::Means, input)?;
            let std = stats.scalar(StatKind::Stds, input)?;
            Ok(ColumnData::Float(
                column
                    .to_f64()?
                    .into_iter()
                    .map(|x| x.map(|v| if std > 0.0 { (v - mean) / std } else { v - mean }))
                    .collect(),
            ))
        })
    }
}

impl TransformOperator for Categorify {
    fn name(&self) -> &'static str {
        "Categorify"
    }

    fn columns(&self) -> Option<&[String]> {
        self.columns.as_deref()
    }

    fn default_group(&self) -> ColumnGroup {
        ColumnGroup::Categorical
    }

    fn replace(&self) -> bool {
        self.replace
    }

    fn dependencies(&self) -> Vec<Arc<dyn StatOperator>> {
        vec![Arc::new(Encoder::new())]
    }

    fn required_stats(&self) -> &'static [StatKind] {
        &[StatKind::Encoders]
    }

    fn transform(&self, chunk: Chunk, inputs: &[String], outputs: &[String], stats: &Stats) -> Result<Chunk> {
        map_columns(chunk, inputs, outputs, |input, column| {
            let vocab = stats.encoder(input)?;
            Ok(ColumnData::Integer(
                (0..column.len())
                    .map(|i| Some(vocab.encode(&column.get(i))))
                    .collect(),
            ))
        })
    }
}

impl TransformOperator for HashBucket {
    fn name(&self) -> &'static str {
        "HashBucket"
    }

    fn columns(&self) -> Option<&[String]> {
        self.columns.as_deref()
    }

    fn default_group(&self) -> ColumnGroup {
        ColumnGroup::Categorical
    }

    fn replace(&self) -> bool {
        self.replace
    }

    fn transform(&self, chunk: Chunk, inputs: &[String], outputs: &[String], _stats: &Stats) -> Result<Chunk> {
        map_columns(chunk, inputs, outputs, |input, column| {
            let n = self.num_buckets.for_column(input)?;
            Ok(ColumnData::Integer(
                (0..column.len())
                    .map(|i| Some(hash_value(&column.get(i)).map_or(0, |h| (h % n) as i64)))
                    .collect(),
            ))
        })
    }
}

impl TransformOperator for Dropna {
    fn name(&self) -> &'static str {
        "Dropna"
    }

    fn columns(&self) -> Option<&[String]> {
        self.columns.as_deref()
    }

    fn default_group(&self) -> ColumnGroup {
        ColumnGroup::All
    }

    fn produces_columns(&self) -> bool {
        false
    }

    fn transform(&self, chunk: Chunk, inputs: &[String], _outputs: &[String], _stats: &Stats) -> Result<Chunk> {
        let columns = inputs
            .iter()
            .map(|name| chunk.column_by_name(name))
            .collect::<Result<Vec<_>>>()?;
        let mask: Vec<bool> = (0..chunk.num_rows())
            .map(|row| columns.iter().all(|c| !c.is_null(row)))
            .collect();
        chunk.filter_mask(&mask)
    }
}
