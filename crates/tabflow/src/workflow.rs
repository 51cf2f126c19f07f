//! The workflow orchestrator.
//!
//! A [`Workflow`] collects operator entries while `Configuring`, compiles
//! them on [`Workflow::finalize`], computes statistics over a dataset in
//! one pass per stats level, and then streams the transformed dataset
//! into a [`ShuffleWriter`].

use std::path::{Path, PathBuf};
use std::sync::Arc;

use futures::StreamExt;
use rayon::prelude::*;
use tracing::{debug, info, warn};

use tabflow_ops::columns::{ColumnGroup, ColumnsContext};
use tabflow_ops::config::WorkflowConfig;
use tabflow_ops::ops::{OpGroup, StatState};
use tabflow_ops::stats::Stats;
use tabflow_storage::dataset::Dataset;
use tabflow_storage::manifest::Manifest;
use tabflow_storage::stream::{for_each_chunk_sync, ChunkStream};
use tabflow_types::chunk::Chunk;
use tabflow_types::error::{Result, TabflowError};

use crate::plan::{CompiledPlan, Phase, PipelinePlan};
use crate::shuffle::ShuffleWriter;

/// Lifecycle of a workflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkflowState {
    /// Operators may still be added.
    Configuring,
    /// The plan is frozen; statistics are not computed.
    Finalized,
    /// Statistics are computed or loaded.
    StatsComputed,
    /// A transformed dataset has been written.
    Done,
}

/// Options for [`Workflow::apply`].
#[derive(Debug, Clone)]
pub struct ApplyOptions {
    /// Write the transformed dataset instead of returning a stream.
    pub apply_offline: bool,
    /// Recompute statistics before transforming.
    pub record_stats: bool,
    pub shuffle: bool,
    /// Output directory, required when `apply_offline` is set.
    pub output_path: Option<PathBuf>,
    pub num_out_files: usize,
}

impl Default for ApplyOptions {
    fn default() -> Self {
        ApplyOptions {
            apply_offline: true,
            record_stats: true,
            shuffle: true,
            output_path: None,
            num_out_files: 1,
        }
    }
}

/// Result of [`Workflow::apply`].
pub enum ApplyOutput {
    Written(Manifest),
    /// Lazily transformed chunks.
    Stream(ChunkStream),
}

impl std::fmt::Debug for ApplyOutput {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ApplyOutput::Written(m) => f.debug_tuple("Written").field(m).finish(),
            ApplyOutput::Stream(_) => f.write_str("Stream(..)"),
        }
    }
}

pub struct Workflow {
    config: WorkflowConfig,
    columns: ColumnsContext,
    plan: PipelinePlan,
    compiled: Option<Arc<CompiledPlan>>,
    stats: Stats,
    state: WorkflowState,
}

impl Workflow {
    /// Declare the categorical, continuous and label columns.
    pub fn new(categorical: Vec<String>, continuous: Vec<String>, label: Vec<String>) -> Result<Self> {
        Self::with_config(categorical, continuous, label, WorkflowConfig::default())
    }

    pub fn with_config(
        categorical: Vec<String>,
        continuous: Vec<String>,
        label: Vec<String>,
        config: WorkflowConfig,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Workflow {
            config,
            columns: ColumnsContext::new(categorical, continuous, label)?,
            plan: PipelinePlan::new(),
            compiled: None,
            stats: Stats::new(),
            state: WorkflowState::Configuring,
        })
    }

    /// Build a workflow around an existing plan and finalize it.
    pub fn from_plan(
        categorical: Vec<String>,
        continuous: Vec<String>,
        label: Vec<String>,
        plan: PipelinePlan,
        config: WorkflowConfig,
    ) -> Result<Self> {
        let mut workflow = Self::with_config(categorical, continuous, label, config)?;
        workflow.plan = plan;
        workflow.finalize()?;
        Ok(workflow)
    }

    pub fn state(&self) -> WorkflowState {
        self.state
    }

    pub fn config(&self) -> &WorkflowConfig {
        &self.config
    }

    pub fn stats(&self) -> &Stats {
        &self.stats
    }

    pub fn plan(&self) -> &PipelinePlan {
        &self.plan
    }

    /// The column registry: as declared before finalize, with every
    /// derived and terminal name afterwards.
    pub fn columns_ctx(&self) -> &ColumnsContext {
        match &self.compiled {
            Some(plan) => plan.columns_ctx(),
            None => &self.columns,
        }
    }

    /// Output columns, known once the workflow is finalized.
    pub fn final_columns(&self) -> Option<&[String]> {
        self.compiled.as_ref().map(|p| p.final_columns())
    }

    /// Add an entry to `phase` over `group`.
    pub fn add_op(&mut self, phase: Phase, group: ColumnGroup, ops: impl Into<OpGroup>) -> Result<()> {
        self.add_entry(phase, Some(group), ops.into())
    }

    fn add_entry(&mut self, phase: Phase, group: Option<ColumnGroup>, ops: OpGroup) -> Result<()> {
        if self.state != WorkflowState::Configuring {
            return Err(TabflowError::Configuration(
                "Cannot add operators to a finalized workflow".to_string(),
            ));
        }
        self.plan.add(phase, group, ops)
    }

    /// Feature-engineering entry over the operators' default group.
    pub fn add_feature(&mut self, ops: impl Into<OpGroup>) -> Result<()> {
        self.add_entry(Phase::FeatureEngineering, None, ops.into())
    }

    /// Preprocessing entry over the operators' default group.
    pub fn add_preprocess(&mut self, ops: impl Into<OpGroup>) -> Result<()> {
        self.add_entry(Phase::Preprocessing, None, ops.into())
    }

    pub fn add_cat_feature(&mut self, ops: impl Into<OpGroup>) -> Result<()> {
        self.add_op(Phase::FeatureEngineering, ColumnGroup::Categorical, ops)
    }

    pub fn add_cont_feature(&mut self, ops: impl Into<OpGroup>) -> Result<()> {
        self.add_op(Phase::FeatureEngineering, ColumnGroup::Continuous, ops)
    }

    pub fn add_cat_preprocess(&mut self, ops: impl Into<OpGroup>) -> Result<()> {
        self.add_op(Phase::Preprocessing, ColumnGroup::Categorical, ops)
    }

    pub fn add_cont_preprocess(&mut self, ops: impl Into<OpGroup>) -> Result<()> {
        self.add_op(Phase::Preprocessing, ColumnGroup::Continuous, ops)
    }

    /// Freeze the plan and the final column set.
    pub fn finalize(&mut self) -> Result<()> {
        if self.state != WorkflowState::Configuring {
            return Err(TabflowError::Configuration(
                "Workflow is already finalized".to_string(),
            ));
        }
        let compiled = self.plan.compile(&self.columns)?;
        info!(
            steps = compiled.steps().len(),
            stats_passes = compiled.num_levels(),
            final_columns = ?compiled.final_columns(),
            "finalized workflow"
        );
        self.compiled = Some(Arc::new(compiled));
        self.state = WorkflowState::Finalized;
        Ok(())
    }

    fn compiled(&self) -> Result<Arc<CompiledPlan>> {
        self.compiled.clone().ok_or_else(|| {
            TabflowError::Configuration("Workflow must be finalized first".to_string())
        })
    }

    /// Compute every statistic of the plan over `dataset`.
    ///
    /// Entries the plan produces are recomputed from scratch. On failure
    /// the statistics and the state are left as they were.
    pub fn update_stats(&mut self, dataset: &Dataset) -> Result<()> {
        let plan = self.compiled()?;
        let mut scratch = self.stats.clone();
        for (kind, column) in plan.produced_stats() {
            scratch.remove(*kind, column);
        }
        for level in 0..plan.num_levels() {
            info!(level, partitions = dataset.num_partitions(), "starting stats pass");
            let partials = self.partition_partials(&plan, dataset, level, &scratch)?;
            let mut partials = partials.into_iter();
            let mut merged = partials
                .next()
                .unwrap_or_else(|| plan.new_states(level, &self.config));
            for partial in partials {
                for (into, from) in merged.iter_mut().zip(&partial) {
                    into.merge(from.as_ref())?;
                }
            }
            for state in merged {
                state.finalize(&mut scratch)?;
            }
            info!(level, "finished stats pass");
        }
        self.stats = scratch;
        self.state = WorkflowState::StatsComputed;
        Ok(())
    }

    /// Per-partition partial states for one level, in partition order.
    fn partition_partials(
        &self,
        plan: &CompiledPlan,
        dataset: &Dataset,
        level: usize,
        stats: &Stats,
    ) -> Result<Vec<Vec<Box<dyn StatState>>>> {
        let run = |index: usize| -> Result<Vec<Box<dyn StatState>>> {
            let mut states = plan.new_states(level, &self.config);
            let mut rows = 0usize;
            for_each_chunk_sync(dataset.partition_stream(index)?, |chunk| {
                rows += chunk.num_rows();
                plan.accumulate(chunk, level, &mut states, stats)
            })?;
            debug!(partition = index, level, rows, "accumulated partition");
            Ok(states)
        };

        let num_partitions = dataset.num_partitions();
        if self.config.num_workers > 1 && num_partitions > 1 {
            let pool = rayon::ThreadPoolBuilder::new()
                .num_threads(self.config.num_workers)
                .build()
                .map_err(|e| TabflowError::Configuration(format!("Failed to build worker pool: {}", e)))?;
            pool.install(|| (0..num_partitions).into_par_iter().map(run).collect())
        } else {
            (0..num_partitions).map(run).collect()
        }
    }

    /// Write the statistics as JSON.
    pub fn save_stats(&self, path: &Path) -> Result<()> {
        self.stats.save(path)?;
        info!(path = %path.display(), "saved stats");
        Ok(())
    }

    /// Replace the statistics with a saved document.
    pub fn load_stats(&mut self, path: &Path) -> Result<()> {
        let plan = self.compiled()?;
        let stats = Stats::load(path)?;
        if let Err(e) = plan.check_stats(&stats) {
            warn!(path = %path.display(), error = %e, "loaded stats do not cover the plan");
        }
        self.stats = stats;
        self.state = WorkflowState::StatsComputed;
        info!(path = %path.display(), "loaded stats");
        Ok(())
    }

    /// Drop every statistic and go back to `Finalized`.
    pub fn clear_stats(&mut self) {
        self.stats.clear();
        if self.state != WorkflowState::Configuring {
            self.state = WorkflowState::Finalized;
        }
    }

    fn ready_to_transform(&self) -> Result<Arc<CompiledPlan>> {
        let plan = self.compiled()?;
        match self.state {
            WorkflowState::StatsComputed | WorkflowState::Done => {}
            other => {
                return Err(TabflowError::Configuration(format!(
                    "Statistics must be computed before transforming (state {:?})",
                    other
                )))
            }
        }
        plan.check_stats(&self.stats)?;
        Ok(plan)
    }

    /// Run the transform pipeline on one chunk.
    pub fn transform_chunk(&self, chunk: Chunk) -> Result<Chunk> {
        let plan = self.ready_to_transform()?;
        plan.transform_chunk(chunk, &self.stats)
    }

    /// Transform `dataset` and write it as `num_out_files` files in
    /// `output_dir` with a manifest.
    ///
    /// With `apply_ops` unset the declared columns are written as read.
    pub fn write_to_dataset(
        &mut self,
        output_dir: &Path,
        dataset: &Dataset,
        num_out_files: usize,
        shuffle: bool,
        apply_ops: bool,
    ) -> Result<Manifest> {
        let plan = if apply_ops {
            self.ready_to_transform()?
        } else {
            self.compiled()?
        };
        if num_out_files == 0 {
            return Err(TabflowError::Configuration(
                "Number of output files must be positive".to_string(),
            ));
        }
        let base_columns = self.columns.base_columns();
        let stats = &self.stats;
        let transform = |chunk: Chunk| -> Result<Chunk> {
            if apply_ops {
                plan.transform_chunk(chunk, stats)
            } else {
                chunk.select(&base_columns)
            }
        };

        // The output schema is that of a transformed empty chunk.
        let schema = transform(Chunk::empty(&dataset.schema()?))?.schema();
        info!(
            dir = %output_dir.display(),
            num_out_files,
            shuffle,
            apply_ops,
            "starting transform pass"
        );
        let writer = ShuffleWriter::create(
            output_dir,
            &schema,
            num_out_files,
            shuffle,
            self.config.shuffle_buffer_rows,
            self.config.shuffle_seed,
        )?;

        let run = |index: usize| -> Result<()> {
            for_each_chunk_sync(dataset.partition_stream(index)?, |chunk| {
                writer.write_chunk(&transform(chunk)?)
            })
        };
        let num_partitions = dataset.num_partitions();
        let result = if self.config.num_workers > 1 && num_partitions > 1 {
            rayon::ThreadPoolBuilder::new()
                .num_threads(self.config.num_workers)
                .build()
                .map_err(|e| TabflowError::Configuration(format!("Failed to build worker pool: {}", e)))
                .and_then(|pool| pool.install(|| (0..num_partitions).into_par_iter().try_for_each(run)))
        } else {
            (0..num_partitions).try_for_each(run)
        };

        if let Err(e) = result {
            writer.abort();
            return Err(e);
        }
        let manifest = writer.close()?;
        self.state = WorkflowState::Done;
        Ok(manifest)
    }

    /// Optionally recompute statistics, then transform `dataset`.
    ///
    /// Offline the result is written to `output_path`; online a lazy
    /// stream of transformed chunks is returned. On failure the
    /// statistics and the state are left as they were.
    pub fn apply(&mut self, dataset: &Dataset, options: ApplyOptions) -> Result<ApplyOutput> {
        if options.apply_offline && options.output_path.is_none() {
            return Err(TabflowError::Configuration(
                "Offline apply needs an output path".to_string(),
            ));
        }
        let previous = (self.stats.clone(), self.state);
        let result = self.apply_inner(dataset, &options);
        if let Err(e) = &result {
            warn!(error = %e, "apply failed, restoring previous statistics");
            (self.stats, self.state) = previous;
        }
        result
    }

    fn apply_inner(&mut self, dataset: &Dataset, options: &ApplyOptions) -> Result<ApplyOutput> {
        if options.record_stats {
            self.update_stats(dataset)?;
        }
        match &options.output_path {
            Some(path) if options.apply_offline => {
                let manifest = self.write_to_dataset(
                    path,
                    dataset,
                    options.num_out_files,
                    options.shuffle,
                    true,
                )?;
                Ok(ApplyOutput::Written(manifest))
            }
            _ => {
                let plan = self.ready_to_transform()?;
                let stats = Arc::new(self.stats.clone());
                let stream = dataset
                    .stream()
                    .map(move |chunk| chunk.and_then(|c| plan.transform_chunk(c, &stats)));
                Ok(ApplyOutput::Stream(Box::pin(stream)))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use tabflow_ops::ops::{FillMissing, LogOp, Normalize};
    use tabflow_types::chunk::ColumnData;

    use super::*;

    fn strings(v: &[&str]) -> Vec<String> {
        v.iter().map(|s| s.to_string()).collect()
    }

    fn workflow() -> Workflow {
        Workflow::new(strings(&["name"]), strings(&["x"]), strings(&["label"])).unwrap()
    }

    #[test]
    fn test_state_transitions() {
        let mut wf = workflow();
        assert_eq!(wf.state(), WorkflowState::Configuring);
        assert!(wf.final_columns().is_none());
        wf.add_cont_feature(FillMissing::new()).unwrap();
        wf.finalize().unwrap();
        assert_eq!(wf.state(), WorkflowState::Finalized);
        assert!(matches!(
            wf.add_feature(LogOp::new()),
            Err(TabflowError::Configuration(_))
        ));
        assert!(wf.finalize().is_err());
        assert_eq!(wf.final_columns().unwrap(), &strings(&["name", "x", "label"])[..]);
    }

    #[test]
    fn test_transform_requires_stats() {
        let mut wf = workflow();
        wf.add_preprocess(Normalize::new()).unwrap();
        let chunk = Chunk::new(
            strings(&["name", "x", "label"]),
            vec![
                ColumnData::String(vec![None]),
                ColumnData::Float(vec![Some(1.0)]),
                ColumnData::Integer(vec![Some(0)]),
            ],
        )
        .unwrap();
        assert!(wf.transform_chunk(chunk.clone()).is_err());
        wf.finalize().unwrap();
        assert!(matches!(
            wf.transform_chunk(chunk.clone()),
            Err(TabflowError::Configuration(_))
        ));

        // Marking stats computed without the means still fails.
        wf.state = WorkflowState::StatsComputed;
        assert!(matches!(
            wf.transform_chunk(chunk.clone()),
            Err(TabflowError::StatsNotReady { .. })
        ));

        wf.stats.means.insert("x".into(), 0.5);
        wf.stats.stds.insert("x".into(), 0.25);
        let out = wf.transform_chunk(chunk).unwrap();
        assert_eq!(out.column_by_name("x").unwrap().get(0).as_f64(), Some(2.0));

        wf.clear_stats();
        assert_eq!(wf.state(), WorkflowState::Finalized);
        assert!(wf.stats().is_empty());
    }

    #[test]
    fn test_apply_offline_needs_path() {
        let mut wf = workflow();
        wf.finalize().unwrap();
        let dataset = Dataset::new(Vec::<PathBuf>::new(), tabflow_storage::dataset::FileFormat::Parquet);
        let err = wf.apply(&dataset, ApplyOptions::default()).unwrap_err();
        assert!(matches!(err, TabflowError::Configuration(_)));
        assert_eq!(wf.state(), WorkflowState::Finalized);
    }
}
