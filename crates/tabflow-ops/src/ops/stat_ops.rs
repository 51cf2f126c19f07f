//! Statistic-gathering operators.

use serde::{Deserialize, Serialize};
use tracing::warn;

use tabflow_types::chunk::ColumnData;
use tabflow_types::error::{Result, TabflowError};
use tabflow_types::flex_type::FlexType;

use super::{ColumnAggregator, ColumnStates, StatOperator, StatState};
use crate::algorithms::aggregators::{
    MedianAggregator, MinMaxAggregator, MomentsAggregator, VocabularyBuilder,
};
use crate::columns::ColumnGroup;
use crate::config::WorkflowConfig;
use crate::stats::{StatKind, Stats};

macro_rules! with_columns {
    ($op:ident) => {
        impl $op {
            pub fn new() -> Self {
                Self::default()
            }

            /// Restrict the operator to these columns of its group.
            pub fn on<S: Into<String>>(columns: impl IntoIterator<Item = S>) -> Self {
                $op {
                    columns: Some(columns.into_iter().map(Into::into).collect()),
                }
            }
        }
    };
}

/// Exact minimum and maximum of every targeted column.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MinMax {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub columns: Option<Vec<String>>,
}

/// Count, mean and sample standard deviation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Moments {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub columns: Option<Vec<String>>,
}

/// Approximate median, accurate to the configured quantile epsilon.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Median {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub columns: Option<Vec<String>>,
}

/// Categorical vocabulary in first-seen order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Encoder {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub columns: Option<Vec<String>>,
}

with_columns!(MinMax);
with_columns!(Moments);
with_columns!(Median);
with_columns!(Encoder);

/// JSON has no encoding for NaN or infinity, so such a result cannot be
/// saved and read back.
fn finite(op: &str, column: &str, value: f64) -> Result<f64> {
    if value.is_finite() {
        Ok(value)
    } else {
        Err(TabflowError::Data(format!(
            "{} on column '{}' produced a non-finite value {}",
            op, column, value
        )))
    }
}

fn finite_flex(op: &str, column: &str, value: FlexType) -> Result<FlexType> {
    match value {
        FlexType::Float(f) => finite(op, column, f).map(FlexType::Float),
        other => Ok(other),
    }
}

impl ColumnAggregator for MinMaxAggregator {
    fn update(&mut self, column: &ColumnData) -> Result<()> {
        MinMaxAggregator::update(self, column);
        Ok(())
    }

    fn merge(&mut self, other: &Self) {
        MinMaxAggregator::merge(self, other);
    }

    fn finalize(&mut self, column: &str, stats: &mut Stats) -> Result<()> {
        let (min, max) = MinMaxAggregator::finalize(self);
        let min = finite_flex("MinMax", column, min)?;
        let max = finite_flex("MinMax", column, max)?;
        stats.mins.insert(column.to_string(), min);
        stats.maxs.insert(column.to_string(), max);
        Ok(())
    }
}

impl ColumnAggregator for MomentsAggregator {
    fn update(&mut self, column: &ColumnData) -> Result<()> {
        MomentsAggregator::update(self, column)
    }

    fn merge(&mut self, other: &Self) {
        MomentsAggregator::merge(self, other);
    }

    fn finalize(&mut self, column: &str, stats: &mut Stats) -> Result<()> {
        let mean = finite("Moments", column, self.mean())?;
        let std = finite("Moments", column, self.std())?;
        stats.counts.insert(column.to_string(), self.count());
        stats.means.insert(column.to_string(), mean);
        stats.stds.insert(column.to_string(), std);
        Ok(())
    }
}

impl ColumnAggregator for MedianAggregator {
    fn update(&mut self, column: &ColumnData) -> Result<()> {
        MedianAggregator::update(self, column)
    }

    fn merge(&mut self, other: &Self) {
        MedianAggregator::merge(self, other);
    }

    fn finalize(&mut self, column: &str, stats: &mut Stats) -> Result<()> {
        let median = MedianAggregator::finalize(self).unwrap_or_else(|| {
            warn!(column, "no values observed for median, storing 0");
            0.0
        });
        let median = finite("Median", column, median)?;
        stats.medians.insert(column.to_string(), median);
        Ok(())
    }
}

impl ColumnAggregator for VocabularyBuilder {
    fn update(&mut self, column: &ColumnData) -> Result<()> {
        VocabularyBuilder::update(self, column);
        Ok(())
    }

    fn merge(&mut self, other: &Self) {
        VocabularyBuilder::merge(self, other);
    }

    fn finalize(&mut self, column: &str, stats: &mut Stats) -> Result<()> {
        stats
            .encoders
            .insert(column.to_string(), VocabularyBuilder::finalize(self));
        Ok(())
    }
}

impl StatOperator for MinMax {
    fn name(&self) -> &'static str {
        "MinMax"
    }

    fn columns(&self) -> Option<&[String]> {
        self.columns.as_deref()
    }

    fn default_group(&self) -> ColumnGroup {
        ColumnGroup::All
    }

    fn stat_kinds(&self) -> &'static [StatKind] {
        &[StatKind::Mins, StatKind::Maxs]
    }

    fn new_state(&self, columns: &[String], _config: &WorkflowConfig) -> Box<dyn StatState> {
        Box::new(ColumnStates::new(self.name(), columns, MinMaxAggregator::new))
    }
}

impl StatOperator for Moments {
    fn name(&self) -> &'static str {
        "Moments"
    }

    fn columns(&self) -> Option<&[String]> {
        self.columns.as_deref()
    }

    fn default_group(&self) -> ColumnGroup {
        ColumnGroup::Continuous
    }

    fn stat_kinds(&self) -> &'static [StatKind] {
        &[StatKind::Counts, StatKind::Means, StatKind::Stds]
    }

    fn new_state(&self, columns: &[String], _config: &WorkflowConfig) -> Box<dyn StatState> {
        Box::new(ColumnStates::new(self.name(), columns, MomentsAggregator::new))
    }
}

impl StatOperator for Median {
    fn name(&self) -> &'static str {
        "Median"
    }

    fn columns(&self) -> Option<&[String]> {
        self.columns.as_deref()
    }

    fn default_group(&self) -> ColumnGroup {
        ColumnGroup::Continuous
    }

    fn stat_kinds(&self) -> &'static [StatKind] {
        &[StatKind::Medians]
    }

    fn new_state(&self, columns: &[String], config: &WorkflowConfig) -> Box<dyn StatState> {
        let epsilon = config.quantile_epsilon;
        Box::new(ColumnStates::new(self.name(), columns, move || {
            MedianAggregator::new(epsilon)
        }))
    }
}

impl StatOperator for Encoder {
    fn name(&self) -> &'static str {
        "Encoder"
    }

    fn columns(&self) -> Option<&[String]> {
        self.columns.as_deref()
    }

    fn default_group(&self) -> ColumnGroup {
        ColumnGroup::Categorical
    }

    fn stat_kinds(&self) -> &'static [StatKind] {
        &[StatKind::Encoders]
    }

    fn new_state(&self, columns: &[String], _config: &WorkflowConfig) -> Box<dyn StatState> {
        Box::new(ColumnStates::new(self.name(), columns, VocabularyBuilder::new))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use tabflow_types::chunk::Chunk;
    use tabflow_types::error::TabflowError;
    use tabflow_types::flex_type::FlexType;

    use super::*;
    use crate::columns::ColumnsContext;

    fn chunk(x: Vec<Option<f64>>, name: Vec<Option<&str>>) -> Chunk {
        Chunk::new(
            vec!["x".into(), "name".into()],
            vec![
                ColumnData::Float(x),
                ColumnData::String(name.into_iter().map(|s| s.map(Arc::from)).collect()),
            ],
        )
        .unwrap()
    }

    fn ctx() -> ColumnsContext {
        ColumnsContext::new(vec!["name".into()], vec!["x".into()], vec![]).unwrap()
    }

    #[test]
    fn test_partials_merge_in_order() {
        let config = WorkflowConfig::default();
        let columns = vec!["x".to_string()];
        let op = Moments::new();
        let mut a = op.new_state(&columns, &config);
        let mut b = op.new_state(&columns, &config);
        a.update(&chunk(vec![Some(1.0), None], vec![None, None])).unwrap();
        b.update(&chunk(vec![Some(3.0), Some(5.0)], vec![None, None]))
            .unwrap();
        a.merge(b.as_ref()).unwrap();

        let mut stats = Stats::new();
        a.finalize(&mut stats).unwrap();
        assert_eq!(stats.counts["x"], 3);
        assert_eq!(stats.means["x"], 3.0);
        assert_eq!(stats.stds["x"], 2.0);
    }

    #[test]
    fn test_merge_rejects_foreign_partial() {
        let config = WorkflowConfig::default();
        let x = vec!["x".to_string()];
        let mut moments = Moments::new().new_state(&x, &config);
        let median = Median::new().new_state(&x, &config);
        assert!(matches!(
            moments.merge(median.as_ref()),
            Err(TabflowError::Configuration(_))
        ));
        let other_cols = Moments::new().new_state(&["y".to_string()], &config);
        assert!(moments.merge(other_cols.as_ref()).is_err());
    }

    #[test]
    fn test_apply_op_passes_chunk_through() {
        let input = chunk(
            vec![Some(2.0), Some(-1.0), None],
            vec![Some("b"), Some("a"), Some("b")],
        );
        let mut stats = Stats::new();
        let config = WorkflowConfig::default();
        let out = MinMax::new()
            .apply_op(input.clone(), &ctx(), ColumnGroup::All, &mut stats, &config)
            .unwrap();
        assert_eq!(out, input);
        assert_eq!(stats.mins["x"], FlexType::Float(-1.0));
        assert_eq!(stats.maxs["name"], FlexType::from("b"));

        Encoder::new()
            .apply_op(input, &ctx(), ColumnGroup::Categorical, &mut stats, &config)
            .unwrap();
        assert_eq!(stats.encoders["name"].len(), 3);
        assert_eq!(stats.encoders["name"].encode(&FlexType::from("b")), 1);
    }

    #[test]
    fn test_string_column_rejected_by_moments() {
        let input = chunk(vec![Some(1.0)], vec![Some("a")]);
        let mut stats = Stats::new();
        let err = Moments::on(["name"])
            .apply_op(
                input,
                &ctx(),
                ColumnGroup::All,
                &mut stats,
                &WorkflowConfig::default(),
            )
            .unwrap_err();
        assert!(matches!(err, TabflowError::Type(msg) if msg.contains("name")));
        assert!(stats.is_empty());
    }

    #[test]
    fn test_empty_median_stores_zero() {
        let input = chunk(vec![None, None], vec![None, None]);
        let mut stats = Stats::new();
        Median::new()
            .apply_op(
                input,
                &ctx(),
                ColumnGroup::Continuous,
                &mut stats,
                &WorkflowConfig::default(),
            )
            .unwrap();
        assert_eq!(stats.medians["x"], 0.0);
    }

    #[test]
    fn test_non_finite_results_rejected() {
        let input = chunk(
            vec![Some(f64::NEG_INFINITY), Some(2.0), Some(3.0)],
            vec![None, None, None],
        );
        let config = WorkflowConfig::default();
        let mut stats = Stats::new();
        let err = Moments::new()
            .apply_op(input.clone(), &ctx(), ColumnGroup::Continuous, &mut stats, &config)
            .unwrap_err();
        assert!(matches!(err, TabflowError::Data(msg) if msg.contains("'x'")));
        assert!(stats.is_empty());

        let err = MinMax::new()
            .apply_op(input, &ctx(), ColumnGroup::Continuous, &mut stats, &config)
            .unwrap_err();
        assert!(matches!(err, TabflowError::Data(_)));
        assert!(stats.mins.is_empty());
    }

    #[test]
    fn test_serde_options() {
        let op: Median = serde_json::from_str(r#"{"columns": ["x"]}"#).unwrap();
        assert_eq!(op, Median::on(["x"]));
        let op: MinMax = serde_json::from_str("{}").unwrap();
        assert_eq!(op.columns, None);
    }
}
