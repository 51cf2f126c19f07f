//! Pipeline plan and its compiled form.
//!
//! A [`PipelinePlan`] is the ordered list of operator entries the caller
//! declared. Finalizing a workflow compiles it against the declared
//! columns into a flat list of [`Step`]s with every name resolved.
//!
//! Statistics are computed in levels. A transform that reads a statistic
//! can only run once that statistic is final, so any stat step reading
//! the transform's output belongs to a later pass over the dataset.
//! Level assignment, for column availability `avail` and row level `R`:
//!
//! - base columns are available at level 0 and `R` starts at 0,
//! - a stat step has level `max(avail(columns), R)`,
//! - a transform has level `max(avail(inputs), level(needed stats) + 1, R)`
//!   and its outputs become available at that level,
//! - a row filter additionally raises `R` to its level.
//!
//! Pass `k` runs every transform of level `<= k` and accumulates the stat
//! steps of level `k`. Nothing of level `<= k` reads the output of a
//! skipped step, so the chunk seen by each stat step matches the one the
//! transform pass will see.

use std::collections::HashMap;
use std::sync::Arc;

use tabflow_ops::columns::{ColumnGroup, ColumnRef, ColumnsContext};
use tabflow_ops::config::WorkflowConfig;
use tabflow_ops::ops::{OpGroup, Operator, StatOperator, StatState, TransformOperator};
use tabflow_ops::stats::{StatKind, Stats};
use tabflow_types::chunk::Chunk;
use tabflow_types::error::{Result, TabflowError};
use tracing::debug;

/// Execution phase of a plan entry. Feature engineering runs first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    FeatureEngineering,
    Preprocessing,
}

impl Phase {
    pub const ORDER: [Phase; 2] = [Phase::FeatureEngineering, Phase::Preprocessing];
}

#[derive(Debug, Clone)]
pub struct PlanEntry {
    pub phase: Phase,
    pub group: ColumnGroup,
    pub ops: OpGroup,
}

/// Operator entries in insertion order.
#[derive(Debug, Clone, Default)]
pub struct PipelinePlan {
    entries: Vec<PlanEntry>,
}

impl PipelinePlan {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an entry. Without a group the first operator's default
    /// group is used.
    pub fn add(&mut self, phase: Phase, group: Option<ColumnGroup>, ops: impl Into<OpGroup>) -> Result<()> {
        let ops = ops.into();
        let group = match group {
            Some(g) => g,
            None => ops.default_group()?,
        };
        if ops.operators().is_empty() {
            return Err(TabflowError::Configuration(
                "Empty operator chain".to_string(),
            ));
        }
        self.entries.push(PlanEntry { phase, group, ops });
        Ok(())
    }

    pub fn entries(&self) -> &[PlanEntry] {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Resolve every entry against `columns` and assign stats levels.
    pub fn compile(&self, columns: &ColumnsContext) -> Result<CompiledPlan> {
        let mut compiler = Compiler::new(columns.clone());
        for phase in Phase::ORDER {
            for entry in self.entries.iter().filter(|e| e.phase == phase) {
                compiler.entry(entry)?;
            }
        }
        compiler.finish()
    }
}

/// One resolved operator application.
#[derive(Debug, Clone)]
pub enum Step {
    Stat {
        op: Arc<dyn StatOperator>,
        columns: Vec<String>,
        level: usize,
    },
    Transform {
        op: Arc<dyn TransformOperator>,
        inputs: Vec<String>,
        outputs: Vec<String>,
        level: usize,
    },
}

impl Step {
    pub fn level(&self) -> usize {
        match self {
            Step::Stat { level, .. } | Step::Transform { level, .. } => *level,
        }
    }
}

/// A frozen plan: resolved steps, the final column registry and the
/// statistics the plan produces and reads.
#[derive(Debug, Clone)]
pub struct CompiledPlan {
    steps: Vec<Step>,
    num_levels: usize,
    columns: ColumnsContext,
    final_columns: Vec<String>,
    produced: Vec<(StatKind, String)>,
    required: Vec<(StatKind, String)>,
}

impl CompiledPlan {
    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    /// Number of dataset passes needed to compute every statistic.
    pub fn num_levels(&self) -> usize {
        self.num_levels
    }

    pub fn columns_ctx(&self) -> &ColumnsContext {
        &self.columns
    }

    /// Output columns: categorical terminals, continuous, then labels.
    pub fn final_columns(&self) -> &[String] {
        &self.final_columns
    }

    /// `(kind, column)` entries the stat steps write.
    pub fn produced_stats(&self) -> &[(StatKind, String)] {
        &self.produced
    }

    /// `(kind, column)` entries the transforms read.
    pub fn required_stats(&self) -> &[(StatKind, String)] {
        &self.required
    }

    /// Fail with `StatsNotReady` for the first statistic a transform
    /// needs that `stats` lacks.
    pub fn check_stats(&self, stats: &Stats) -> Result<()> {
        for (kind, column) in &self.required {
            stats.require(*kind, column)?;
        }
        Ok(())
    }

    /// Fresh partial states for the stat steps of `level`, in step order.
    pub fn new_states(&self, level: usize, config: &WorkflowConfig) -> Vec<Box<dyn StatState>> {
        self.steps
            .iter()
            .filter_map(|step| match step {
                Step::Stat { op, columns, level: l } if *l == level => {
                    Some(op.new_state(columns, config))
                }
                _ => None,
            })
            .collect()
    }

    /// Run one chunk through the pipeline for stats pass `level`.
    ///
    /// `states` come from [`CompiledPlan::new_states`] for the same
    /// level; `stats` must hold every statistic of lower levels.
    pub fn accumulate(
        &self,
        mut chunk: Chunk,
        level: usize,
        states: &mut [Box<dyn StatState>],
        stats: &Stats,
    ) -> Result<()> {
        let mut remaining = states.iter_mut();
        for step in &self.steps {
            match step {
                Step::Stat { level: l, .. } if *l == level => {
                    let Some(state) = remaining.next() else {
                        break;
                    };
                    state.update(&chunk)?;
                }
                Step::Transform {
                    op,
                    inputs,
                    outputs,
                    level: l,
                } if *l <= level => {
                    chunk = op.transform(chunk, inputs, outputs, stats)?;
                }
                _ => {}
            }
            if remaining.len() == 0 {
                break;
            }
        }
        Ok(())
    }

    /// Apply every transform and project onto the final columns.
    pub fn transform_chunk(&self, mut chunk: Chunk, stats: &Stats) -> Result<Chunk> {
        for step in &self.steps {
            if let Step::Transform {
                op,
                inputs,
                outputs,
                ..
            } = step
            {
                chunk = op.transform(chunk, inputs, outputs, stats)?;
            }
        }
        chunk.select(&self.final_columns)
    }
}

/// One base column followed through an entry.
struct Tracked {
    column: ColumnRef,
    current: String,
}

struct Compiler {
    columns: ColumnsContext,
    steps: Vec<Step>,
    avail: HashMap<String, usize>,
    /// Number of times a column has been written by a transform.
    version: HashMap<String, usize>,
    row_level: usize,
    /// Version and level at which each statistic is produced.
    produced: HashMap<(StatKind, String), (usize, usize)>,
    produced_order: Vec<(StatKind, String)>,
    required: Vec<(StatKind, String)>,
}

impl Compiler {
    fn new(columns: ColumnsContext) -> Self {
        let avail = columns.base_columns().into_iter().map(|c| (c, 0)).collect();
        Compiler {
            columns,
            steps: Vec::new(),
            avail,
            version: HashMap::new(),
            row_level: 0,
            produced: HashMap::new(),
            produced_order: Vec::new(),
            required: Vec::new(),
        }
    }

    fn avail(&self, name: &str) -> Result<usize> {
        self.avail.get(name).copied().ok_or_else(|| {
            TabflowError::Configuration(format!("Column '{}' is not available", name))
        })
    }

    fn version(&self, name: &str) -> usize {
        self.version.get(name).copied().unwrap_or(0)
    }

    fn entry(&mut self, entry: &PlanEntry) -> Result<()> {
        let mut tracked: Vec<Tracked> = self
            .columns
            .targets(entry.group, None)?
            .into_iter()
            .map(|column| Tracked {
                current: column.current.clone(),
                column,
            })
            .collect();

        for op in entry.ops.operators() {
            if let Some(selection) = op.columns() {
                for name in selection {
                    let known = tracked
                        .iter()
                        .any(|t| &t.column.base == name || &t.current == name);
                    if !known {
                        return Err(TabflowError::Configuration(format!(
                            "{} selects column '{}' which is not part of the {} group here",
                            op.name(),
                            name,
                            entry.group
                        )));
                    }
                }
                tracked.retain(|t| {
                    selection
                        .iter()
                        .any(|s| s == &t.column.base || s == &t.current)
                });
            }
            let inputs: Vec<String> = tracked.iter().map(|t| t.current.clone()).collect();
            match op {
                Operator::Stat(stat) => self.stat(stat.clone(), &inputs)?,
                Operator::Transform(transform) => {
                    let outputs = self.transform(transform.clone(), &tracked, &inputs)?;
                    for (t, output) in tracked.iter_mut().zip(outputs) {
                        t.current = output;
                    }
                }
            }
        }

        for t in &tracked {
            if t.current != t.column.current {
                self.columns
                    .set_terminal(t.column.group, &t.column.base, &t.current)?;
            }
        }
        Ok(())
    }

    fn stat(&mut self, op: Arc<dyn StatOperator>, inputs: &[String]) -> Result<()> {
        let mut columns = Vec::new();
        for column in inputs {
            let version = self.version(column);
            let mut seen = false;
            for kind in op.stat_kinds() {
                if let Some((v, _)) = self.produced.get(&(*kind, column.clone())) {
                    if *v != version {
                        return Err(TabflowError::Configuration(format!(
                            "Statistic '{}' of column '{}' is computed before and after the column is rewritten",
                            kind, column
                        )));
                    }
                    seen = true;
                }
            }
            if !seen {
                columns.push(column.clone());
            }
        }
        if columns.is_empty() {
            return Ok(());
        }

        let mut level = self.row_level;
        for column in &columns {
            level = level.max(self.avail(column)?);
        }
        for column in &columns {
            let version = self.version(column);
            for kind in op.stat_kinds() {
                let key = (*kind, column.clone());
                self.produced.insert(key.clone(), (version, level));
                self.produced_order.push(key);
            }
        }
        debug!(op = op.name(), ?columns, level, "planned stat step");
        self.steps.push(Step::Stat { op, columns, level });
        Ok(())
    }

    fn transform(
        &mut self,
        op: Arc<dyn TransformOperator>,
        tracked: &[Tracked],
        inputs: &[String],
    ) -> Result<Vec<String>> {
        for dependency in op.dependencies() {
            self.stat(dependency, inputs)?;
        }

        let mut level = self.row_level;
        for input in inputs {
            level = level.max(self.avail(input)?);
            for kind in op.required_stats() {
                let key = (*kind, input.clone());
                match self.produced.get(&key) {
                    Some((version, stat_level)) if *version == self.version(input) => {
                        level = level.max(stat_level + 1);
                    }
                    _ => {
                        return Err(TabflowError::Configuration(format!(
                            "{} needs statistic '{}' of column '{}' which no step computes",
                            op.name(),
                            kind,
                            input
                        )))
                    }
                }
                if !self.required.contains(&key) {
                    self.required.push(key);
                }
            }
        }

        let outputs: Vec<String> = inputs.iter().map(|i| op.output_name(i)).collect();
        if op.produces_columns() {
            for ((t, input), output) in tracked.iter().zip(inputs).zip(&outputs) {
                if output != input {
                    self.columns.add_derived(t.column.group, output)?;
                }
                self.avail.insert(output.clone(), level);
                *self.version.entry(output.clone()).or_insert(0) += 1;
            }
        } else {
            self.row_level = level;
        }
        debug!(op = op.name(), ?inputs, ?outputs, level, "planned transform step");
        self.steps.push(Step::Transform {
            op,
            inputs: inputs.to_vec(),
            outputs: outputs.clone(),
            level,
        });
        Ok(outputs)
    }

    fn finish(self) -> Result<CompiledPlan> {
        let num_levels = self
            .steps
            .iter()
            .filter(|s| matches!(s, Step::Stat { .. }))
            .map(|s| s.level() + 1)
            .max()
            .unwrap_or(0);
        let final_columns = self.columns.final_columns();
        Ok(CompiledPlan {
            steps: self.steps,
            num_levels,
            columns: self.columns,
            final_columns,
            produced: self.produced_order,
            required: self.required,
        })
    }
}
