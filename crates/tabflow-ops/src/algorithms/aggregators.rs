//! Mergeable per-column aggregators backing the stat operators.
//!
//! Each aggregator absorbs whole columns, merges with a partial built
//! over a disjoint set of rows, and finalizes to the value stored in
//! [`Stats`](crate::stats::Stats). Nulls are skipped everywhere.

use std::cmp::Ordering;

use indexmap::IndexSet;

use tabflow_types::chunk::ColumnData;
use tabflow_types::error::{Result, TabflowError};
use tabflow_types::flex_type::{compare_flex_type, FlexType};

use super::quantile_sketch::QuantileSketch;
use crate::vocabulary::{CategoryKey, CategoryVocabulary};

fn numeric_values(column: &ColumnData) -> Result<Box<dyn Iterator<Item = f64> + '_>> {
    match column {
        ColumnData::Integer(v) => Ok(Box::new(v.iter().flatten().map(|&i| i as f64))),
        ColumnData::Float(v) => Ok(Box::new(v.iter().flatten().copied().filter(|f| !f.is_nan()))),
        ColumnData::String(_) => Err(TabflowError::Type(
            "Expected a numeric column, found string".to_string(),
        )),
    }
}

/// Exact min and max over any column type.
#[derive(Clone, Debug, Default)]
pub struct MinMaxAggregator {
    min: Option<FlexType>,
    max: Option<FlexType>,
}

impl MinMaxAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    fn observe(&mut self, value: FlexType) {
        if value.is_undefined() || matches!(value, FlexType::Float(f) if f.is_nan()) {
            return;
        }
        let below = self
            .min
            .as_ref()
            .map_or(true, |cur| compare_flex_type(&value, cur) == Ordering::Less);
        let above = self
            .max
            .as_ref()
            .map_or(true, |cur| compare_flex_type(&value, cur) == Ordering::Greater);
        if below {
            self.min = Some(value.clone());
        }
        if above {
            self.max = Some(value);
        }
    }

    pub fn update(&mut self, column: &ColumnData) {
        for i in 0..column.len() {
            self.observe(column.get(i));
        }
    }

    pub fn merge(&mut self, other: &MinMaxAggregator) {
        if let Some(v) = &other.min {
            self.observe(v.clone());
        }
        if let Some(v) = &other.max {
            self.observe(v.clone());
        }
    }

    /// `(min, max)`, both `Undefined` when no value was seen.
    pub fn finalize(&self) -> (FlexType, FlexType) {
        (
            self.min.clone().unwrap_or(FlexType::Undefined),
            self.max.clone().unwrap_or(FlexType::Undefined),
        )
    }
}

/// Count, mean and sum of squared deviations (M2).
///
/// A chunk is first reduced with Welford's update, then folded in with
/// the parallel merge: for partials (n1, m1, M2a) and (n2, m2, M2b),
/// `M2 = M2a + M2b + delta^2 * n1 * n2 / (n1 + n2)` with `delta = m2 - m1`.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct MomentsAggregator {
    count: u64,
    mean: f64,
    m2: f64,
}

impl MomentsAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&mut self, column: &ColumnData) -> Result<()> {
        let mut partial = MomentsAggregator::new();
        for x in numeric_values(column)? {
            partial.count += 1;
            let delta = x - partial.mean;
            partial.mean += delta / partial.count as f64;
            partial.m2 += delta * (x - partial.mean);
        }
        self.merge(&partial);
        Ok(())
    }

    pub fn merge(&mut self, o: &MomentsAggregator) {
        if o.count == 0 {
            return;
        }
        if self.count == 0 {
            *self = o.clone();
            return;
        }
        let total = self.count + o.count;
        let delta = o.mean - self.mean;
        self.m2 += o.m2 + delta * delta * (self.count as f64 * o.count as f64) / total as f64;
        self.mean = (self.mean * self.count as f64 + o.mean * o.count as f64) / total as f64;
        self.count = total;
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    /// Mean of the observed values; 0 when nothing was observed.
    pub fn mean(&self) -> f64 {
        self.mean
    }

    /// Sample standard deviation; 0 when fewer than two values were seen.
    pub fn std(&self) -> f64 {
        if self.count < 2 {
            return 0.0;
        }
        (self.m2 / (self.count - 1) as f64).sqrt()
    }
}

/// Approximate median through a quantile sketch.
#[derive(Clone, Debug)]
pub struct MedianAggregator {
    sketch: QuantileSketch,
}

impl MedianAggregator {
    pub fn new(epsilon: f64) -> Self {
        MedianAggregator {
            sketch: QuantileSketch::new(epsilon),
        }
    }

    pub fn update(&mut self, column: &ColumnData) -> Result<()> {
        for x in numeric_values(column)? {
            self.sketch.insert(x);
        }
        Ok(())
    }

    pub fn merge(&mut self, other: &MedianAggregator) {
        self.sketch.merge(&other.sketch);
    }

    pub fn count(&self) -> usize {
        self.sketch.count()
    }

    /// The 0.5 quantile, `None` when nothing was observed.
    pub fn finalize(&mut self) -> Option<f64> {
        self.sketch.finish();
        self.sketch.query(0.5)
    }
}

/// Distinct non-null values in first-seen order.
#[derive(Clone, Debug, Default)]
pub struct VocabularyBuilder {
    seen: IndexSet<CategoryKey>,
}

impl VocabularyBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&mut self, column: &ColumnData) {
        for i in 0..column.len() {
            if let Some(key) = CategoryKey::of(&column.get(i)) {
                self.seen.insert(key);
            }
        }
    }

    /// Append the other partial's values not seen here, in its order.
    pub fn merge(&mut self, other: &VocabularyBuilder) {
        for key in &other.seen {
            if !self.seen.contains(key) {
                self.seen.insert(key.clone());
            }
        }
    }

    pub fn finalize(&self) -> CategoryVocabulary {
        let mut vocab = CategoryVocabulary::new();
        for key in &self.seen {
            vocab.insert(&key.to_flex());
        }
        vocab
    }
}
