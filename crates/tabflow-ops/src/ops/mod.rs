//! Operator capabilities.
//!
//! A [`StatOperator`] accumulates a mergeable partial state per chunk and
//! writes finalized values into [`Stats`]. A [`TransformOperator`] maps a
//! chunk to a new chunk using finalized statistics. The plan holds them as
//! tagged [`Operator`] values, singly or chained in an [`OpGroup`].

pub mod stat_ops;
pub mod transforms;

use std::any::Any;
use std::sync::Arc;

use tabflow_types::chunk::{Chunk, ColumnData};
use tabflow_types::error::{Result, TabflowError};

use crate::columns::{ColumnGroup, ColumnsContext};
use crate::config::WorkflowConfig;
use crate::stats::{StatKind, Stats};

pub use stat_ops::{Encoder, Median, MinMax, Moments};
pub use transforms::{
    Buckets, Categorify, Dropna, FillMedian, FillMissing, HashBucket, LogOp, Normalize, ZeroFill,
};

/// Partial aggregate of one stat operator over a set of columns.
pub trait StatState: Send {
    /// Absorb the operator's columns of one chunk.
    fn update(&mut self, chunk: &Chunk) -> Result<()>;

    /// Fold in a partial built over disjoint rows. Fails when `other`
    /// belongs to a different operator or column set.
    fn merge(&mut self, other: &dyn StatState) -> Result<()>;

    /// Write the finalized values into `stats`.
    fn finalize(self: Box<Self>, stats: &mut Stats) -> Result<()>;

    fn as_any(&self) -> &dyn Any;
}

pub trait StatOperator: Send + Sync + std::fmt::Debug {
    fn name(&self) -> &'static str;

    /// Column selection within the group; `None` targets the whole group.
    fn columns(&self) -> Option<&[String]>;

    fn default_group(&self) -> ColumnGroup;

    /// Statistic kinds this operator writes for each of its columns.
    fn stat_kinds(&self) -> &'static [StatKind];

    fn new_state(&self, columns: &[String], config: &WorkflowConfig) -> Box<dyn StatState>;

    /// Compute this operator's statistics over a single chunk, store
    /// them, and pass the chunk through unchanged.
    fn apply_op(
        &self,
        chunk: Chunk,
        ctx: &ColumnsContext,
        group: ColumnGroup,
        stats: &mut Stats,
        config: &WorkflowConfig,
    ) -> Result<Chunk> {
        let columns: Vec<String> = ctx
            .targets(group, self.columns())?
            .into_iter()
            .map(|c| c.current)
            .collect();
        let mut state = self.new_state(&columns, config);
        state.update(&chunk)?;
        state.finalize(stats)?;
        Ok(chunk)
    }
}

pub trait TransformOperator: Send + Sync + std::fmt::Debug {
    fn name(&self) -> &'static str;

    /// Column selection within the group; `None` targets the whole group.
    fn columns(&self) -> Option<&[String]>;

    fn default_group(&self) -> ColumnGroup;

    /// Overwrite the input columns instead of adding new ones.
    fn replace(&self) -> bool {
        true
    }

    /// False for operators that only filter rows.
    fn produces_columns(&self) -> bool {
        true
    }

    /// Stat operators whose results this transform reads. They run on the
    /// transform's input columns.
    fn dependencies(&self) -> Vec<Arc<dyn StatOperator>> {
        Vec::new()
    }

    /// Statistics read for each input column.
    fn required_stats(&self) -> &'static [StatKind] {
        &[]
    }

    /// Name of the column written for `input`.
    fn output_name(&self, input: &str) -> String {
        if self.replace() || !self.produces_columns() {
            input.to_string()
        } else {
            format!("{}_{}", input, self.name())
        }
    }

    /// Transform `inputs` into `outputs` (parallel slices).
    fn transform(
        &self,
        chunk: Chunk,
        inputs: &[String],
        outputs: &[String],
        stats: &Stats,
    ) -> Result<Chunk>;

    /// Apply this transform to one chunk over the group's current columns.
    fn apply_op(
        &self,
        chunk: Chunk,
        ctx: &ColumnsContext,
        group: ColumnGroup,
        stats: &Stats,
    ) -> Result<Chunk> {
        let inputs: Vec<String> = ctx
            .targets(group, self.columns())?
            .into_iter()
            .map(|c| c.current)
            .collect();
        for kind in self.required_stats() {
            for column in &inputs {
                stats.require(*kind, column)?;
            }
        }
        let outputs: Vec<String> = inputs.iter().map(|c| self.output_name(c)).collect();
        self.transform(chunk, &inputs, &outputs, stats)
    }
}

/// A pipeline operator: either capability.
#[derive(Debug, Clone)]
pub enum Operator {
    Stat(Arc<dyn StatOperator>),
    Transform(Arc<dyn TransformOperator>),
}

impl Operator {
    pub fn name(&self) -> &'static str {
        match self {
            Operator::Stat(op) => op.name(),
            Operator::Transform(op) => op.name(),
        }
    }

    pub fn default_group(&self) -> ColumnGroup {
        match self {
            Operator::Stat(op) => op.default_group(),
            Operator::Transform(op) => op.default_group(),
        }
    }

    pub fn columns(&self) -> Option<&[String]> {
        match self {
            Operator::Stat(op) => op.columns(),
            Operator::Transform(op) => op.columns(),
        }
    }
}

/// One plan entry's operators: a single operator or a chain applied in
/// declared order, each reading the previous one's outputs.
#[derive(Debug, Clone)]
pub enum OpGroup {
    Single(Operator),
    Chain(Vec<Operator>),
}

impl OpGroup {
    pub fn operators(&self) -> &[Operator] {
        match self {
            OpGroup::Single(op) => std::slice::from_ref(op),
            OpGroup::Chain(ops) => ops,
        }
    }

    /// Group used when the entry does not name one: the first operator's.
    pub fn default_group(&self) -> Result<ColumnGroup> {
        self.operators()
            .first()
            .map(Operator::default_group)
            .ok_or_else(|| TabflowError::Configuration("Empty operator chain".to_string()))
    }
}

impl From<Operator> for OpGroup {
    fn from(op: Operator) -> Self {
        OpGroup::Single(op)
    }
}

impl From<Vec<Operator>> for OpGroup {
    fn from(ops: Vec<Operator>) -> Self {
        OpGroup::Chain(ops)
    }
}

macro_rules! operator_conversions {
    (stat: $($s:ty),*; transform: $($t:ty),*) => {
        $(
            impl From<$s> for Operator {
                fn from(op: $s) -> Self {
                    Operator::Stat(Arc::new(op))
                }
            }
            impl From<$s> for OpGroup {
                fn from(op: $s) -> Self {
                    OpGroup::Single(op.into())
                }
            }
        )*
        $(
            impl From<$t> for Operator {
                fn from(op: $t) -> Self {
                    Operator::Transform(Arc::new(op))
                }
            }
            impl From<$t> for OpGroup {
                fn from(op: $t) -> Self {
                    OpGroup::Single(op.into())
                }
            }
        )*
    };
}

operator_conversions!(
    stat: MinMax, Moments, Median, Encoder;
    transform: ZeroFill, FillMissing, FillMedian, LogOp, Normalize, Categorify, HashBucket, Dropna
);

/// Per-column aggregator driven by [`ColumnStates`].
pub(crate) trait ColumnAggregator: Clone + Send + 'static {
    fn update(&mut self, column: &ColumnData) -> Result<()>;
    fn merge(&mut self, other: &Self);
    fn finalize(&mut self, column: &str, stats: &mut Stats) -> Result<()>;
}

/// One aggregator per targeted column.
pub(crate) struct ColumnStates<A> {
    op: &'static str,
    columns: Vec<String>,
    aggs: Vec<A>,
}

impl<A: ColumnAggregator> ColumnStates<A> {
    pub(crate) fn new(op: &'static str, columns: &[String], make: impl Fn() -> A) -> Self {
        ColumnStates {
            op,
            columns: columns.to_vec(),
            aggs: columns.iter().map(|_| make()).collect(),
        }
    }
}

impl<A: ColumnAggregator> StatState for ColumnStates<A> {
    fn update(&mut self, chunk: &Chunk) -> Result<()> {
        for (name, agg) in self.columns.iter().zip(self.aggs.iter_mut()) {
            let column = chunk.column_by_name(name)?;
            agg.update(column).map_err(|e| match e {
                TabflowError::Type(msg) => {
                    TabflowError::Type(format!("{} on column '{}': {}", self.op, name, msg))
                }
                other => other,
            })?;
        }
        Ok(())
    }

    fn merge(&mut self, other: &dyn StatState) -> Result<()> {
        let other = other
            .as_any()
            .downcast_ref::<ColumnStates<A>>()
            .filter(|o| o.columns == self.columns)
            .ok_or_else(|| {
                TabflowError::Configuration(format!(
                    "Cannot merge a different partial into {} over {:?}",
                    self.op, self.columns
                ))
            })?;
        for (agg, o) in self.aggs.iter_mut().zip(&other.aggs) {
            agg.merge(o);
        }
        Ok(())
    }

    fn finalize(self: Box<Self>, stats: &mut Stats) -> Result<()> {
        let ColumnStates { columns, aggs, .. } = *self;
        for (name, mut agg) in columns.iter().zip(aggs) {
            agg.finalize(name, stats)?;
        }
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
