//! JSON pipeline definitions.
//!
//! ```json
//! {
//!   "categorical": ["name"],
//!   "continuous": ["x"],
//!   "label": ["label"],
//!   "feature_engineering": [
//!     { "ops": [{ "op": "FillMissing", "fill_value": 42 }, { "op": "LogOp" }] }
//!   ],
//!   "preprocessing": [
//!     { "group": "continuous", "ops": [{ "op": "Normalize" }] },
//!     { "ops": [{ "op": "Categorify" }] }
//!   ]
//! }
//! ```

use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use serde::{Deserialize, Serialize};

use tabflow_ops::columns::ColumnGroup;
use tabflow_ops::config::WorkflowConfig;
use tabflow_ops::ops::{
    Categorify, Dropna, Encoder, FillMedian, FillMissing, HashBucket, LogOp, Median, MinMax,
    Moments, Normalize, OpGroup, Operator, ZeroFill,
};
use tabflow_types::error::{Result, TabflowError};

use crate::plan::{Phase, PipelinePlan};
use crate::workflow::Workflow;

/// One operator with its options, tagged by `"op"`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op")]
pub enum OpSpec {
    MinMax(MinMax),
    Moments(Moments),
    Median(Median),
    Encoder(Encoder),
    ZeroFill(ZeroFill),
    FillMissing(FillMissing),
    FillMedian(FillMedian),
    LogOp(LogOp),
    Normalize(Normalize),
    Categorify(Categorify),
    HashBucket(HashBucket),
    Dropna(Dropna),
}

impl From<OpSpec> for Operator {
    fn from(spec: OpSpec) -> Self {
        match spec {
            OpSpec::MinMax(op) => op.into(),
            OpSpec::Moments(op) => op.into(),
            OpSpec::Median(op) => op.into(),
            OpSpec::Encoder(op) => op.into(),
            OpSpec::ZeroFill(op) => op.into(),
            OpSpec::FillMissing(op) => op.into(),
            OpSpec::FillMedian(op) => op.into(),
            OpSpec::LogOp(op) => op.into(),
            OpSpec::Normalize(op) => op.into(),
            OpSpec::Categorify(op) => op.into(),
            OpSpec::HashBucket(op) => op.into(),
            OpSpec::Dropna(op) => op.into(),
        }
    }
}

/// A single operator or a chain, over an optional group.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntrySpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group: Option<ColumnGroup>,
    pub ops: Vec<OpSpec>,
}

impl EntrySpec {
    fn op_group(&self) -> Result<OpGroup> {
        let mut ops: Vec<Operator> = self.ops.iter().cloned().map(Operator::from).collect();
        match ops.len() {
            0 => Err(TabflowError::Configuration(
                "Pipeline entry has no operators".to_string(),
            )),
            1 => Ok(OpGroup::Single(ops.remove(0))),
            _ => Ok(OpGroup::Chain(ops)),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineDefinition {
    pub categorical: Vec<String>,
    pub continuous: Vec<String>,
    pub label: Vec<String>,
    pub feature_engineering: Vec<EntrySpec>,
    pub preprocessing: Vec<EntrySpec>,
}

impl PipelineDefinition {
    pub fn from_json(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let reader = BufReader::new(File::open(path)?);
        Ok(serde_json::from_reader(reader)?)
    }

    pub fn to_plan(&self) -> Result<PipelinePlan> {
        let mut plan = PipelinePlan::new();
        for (phase, entries) in [
            (Phase::FeatureEngineering, &self.feature_engineering),
            (Phase::Preprocessing, &self.preprocessing),
        ] {
            for entry in entries {
                plan.add(phase, entry.group, entry.op_group()?)?;
            }
        }
        Ok(plan)
    }

    /// A finalized workflow for this definition.
    pub fn build_workflow(&self, config: WorkflowConfig) -> Result<Workflow> {
        Workflow::from_plan(
            self.categorical.clone(),
            self.continuous.clone(),
            self.label.clone(),
            self.to_plan()?,
            config,
        )
    }
}
