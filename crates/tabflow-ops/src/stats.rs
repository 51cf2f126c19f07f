//! Finalized statistics of a workflow.
//!
//! `Stats` maps each statistic kind to a per-column value. Stat operators
//! write into it when a statistics pass finishes; transforms only read it.
//! The serialized form is a JSON document keyed by kind, then column.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

use serde::{Deserialize, Serialize};

use tabflow_types::error::{Result, TabflowError};
use tabflow_types::flex_type::FlexType;

use crate::vocabulary::CategoryVocabulary;

/// Kind of a statistic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StatKind {
    Mins,
    Maxs,
    Means,
    Stds,
    Medians,
    Counts,
    Encoders,
}

impl StatKind {
    pub fn as_str(self) -> &'static str {
        match self {
            StatKind::Mins => "mins",
            StatKind::Maxs => "maxs",
            StatKind::Means => "means",
            StatKind::Stds => "stds",
            StatKind::Medians => "medians",
            StatKind::Counts => "counts",
            StatKind::Encoders => "encoders",
        }
    }
}

impl std::fmt::Display for StatKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Stats {
    pub mins: BTreeMap<String, FlexType>,
    pub maxs: BTreeMap<String, FlexType>,
    pub means: BTreeMap<String, f64>,
    pub stds: BTreeMap<String, f64>,
    pub medians: BTreeMap<String, f64>,
    pub counts: BTreeMap<String, u64>,
    pub encoders: BTreeMap<String, CategoryVocabulary>,
}

fn not_ready(kind: StatKind, column: &str) -> TabflowError {
    TabflowError::StatsNotReady {
        kind: kind.to_string(),
        column: column.to_string(),
    }
}

impl Stats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a value of `kind` is recorded for `column`.
    pub fn contains(&self, kind: StatKind, column: &str) -> bool {
        match kind {
            StatKind::Mins => self.mins.contains_key(column),
            StatKind::Maxs => self.maxs.contains_key(column),
            StatKind::Means => self.means.contains_key(column),
            StatKind::Stds => self.stds.contains_key(column),
            StatKind::Medians => self.medians.contains_key(column),
            StatKind::Counts => self.counts.contains_key(column),
            StatKind::Encoders => self.encoders.contains_key(column),
        }
    }

    /// Fail with `StatsNotReady` unless `kind` is recorded for `column`.
    pub fn require(&self, kind: StatKind, column: &str) -> Result<()> {
        if self.contains(kind, column) {
            Ok(())
        } else {
            Err(not_ready(kind, column))
        }
    }

    /// A scalar float statistic (`means`, `stds` or `medians`).
    pub fn scalar(&self, kind: StatKind, column: &str) -> Result<f64> {
        let map = match kind {
            StatKind::Means => &self.means,
            StatKind::Stds => &self.stds,
            StatKind::Medians => &self.medians,
            other => {
                return Err(TabflowError::Type(format!(
                    "Statistic '{}' is not a float scalar",
                    other
                )))
            }
        };
        map.get(column).copied().ok_or_else(|| not_ready(kind, column))
    }

    pub fn encoder(&self, column: &str) -> Result<&CategoryVocabulary> {
        self.encoders
            .get(column)
            .ok_or_else(|| not_ready(StatKind::Encoders, column))
    }

    /// Remove the entry of `kind` for `column`, if any.
    pub fn remove(&mut self, kind: StatKind, column: &str) {
        match kind {
            StatKind::Mins => {
                self.mins.remove(column);
            }
            StatKind::Maxs => {
                self.maxs.remove(column);
            }
            StatKind::Means => {
                self.means.remove(column);
            }
            StatKind::Stds => {
                self.stds.remove(column);
            }
            StatKind::Medians => {
                self.medians.remove(column);
            }
            StatKind::Counts => {
                self.counts.remove(column);
            }
            StatKind::Encoders => {
                self.encoders.remove(column);
            }
        }
    }

    pub fn clear(&mut self) {
        *self = Stats::default();
    }

    pub fn is_empty(&self) -> bool {
        self.mins.is_empty()
            && self.maxs.is_empty()
            && self.means.is_empty()
            && self.stds.is_empty()
            && self.medians.is_empty()
            && self.counts.is_empty()
            && self.encoders.is_empty()
    }

    /// Write the statistics as pretty-printed JSON.
    pub fn save(&self, path: &Path) -> Result<()> {
        let writer = BufWriter::new(File::create(path)?);
        serde_json::to_writer_pretty(writer, self)?;
        Ok(())
    }

    /// Read statistics written by [`Stats::save`].
    pub fn load(path: &Path) -> Result<Self> {
        let reader = BufReader::new(File::open(path)?);
        Ok(serde_json::from_reader(reader)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Stats {
        let mut stats = Stats::new();
        stats.mins.insert("x".into(), FlexType::Float(-1.5));
        stats.maxs.insert("name".into(), FlexType::from("zeta"));
        stats.means.insert("x".into(), 0.1 + 0.2);
        stats.stds.insert("x".into(), 1.0 / 3.0);
        stats.medians.insert("x".into(), 2.5);
        stats.counts.insert("x".into(), 4321);
        let mut vocab = CategoryVocabulary::new();
        vocab.insert(&FlexType::from("a"));
        stats.encoders.insert("name".into(), vocab);
        stats
    }

    #[test]
    fn test_save_load_exact() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stats.json");
        let stats = sample();
        stats.save(&path).unwrap();
        let back = Stats::load(&path).unwrap();
        assert_eq!(back, stats);
        assert_eq!(back.means["x"].to_bits(), (0.1f64 + 0.2).to_bits());
        assert_eq!(back.stds["x"].to_bits(), (1.0f64 / 3.0).to_bits());
    }

    #[test]
    fn test_require_and_scalar() {
        let mut stats = sample();
        assert!(stats.require(StatKind::Means, "x").is_ok());
        assert_eq!(stats.scalar(StatKind::Medians, "x").unwrap(), 2.5);
        match stats.scalar(StatKind::Means, "y") {
            Err(TabflowError::StatsNotReady { kind, column }) => {
                assert_eq!(kind, "means");
                assert_eq!(column, "y");
            }
            other => panic!("expected StatsNotReady, got {:?}", other),
        }
        assert!(stats.scalar(StatKind::Counts, "x").is_err());

        stats.remove(StatKind::Encoders, "name");
        assert!(stats.encoder("name").is_err());
        stats.clear();
        assert!(stats.is_empty());
    }

    #[test]
    fn test_missing_kinds_default() {
        let stats: Stats = serde_json::from_str(r#"{"means": {"x": 1.0}}"#).unwrap();
        assert_eq!(stats.means["x"], 1.0);
        assert!(stats.encoders.is_empty());
    }
}
