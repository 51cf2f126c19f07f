//! Column groups and the live registry of column names.
//!
//! Every declared column belongs to exactly one of the categorical,
//! continuous or label groups. As operators are planned, each base column
//! tracks its current (terminal) name and every newly created name is
//! recorded as derived in the group of its base column.

use std::str::FromStr;

use serde::{Deserialize, Serialize};

use tabflow_types::error::{Result, TabflowError};

/// A semantic column group. `All` is continuous followed by categorical.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnGroup {
    Continuous,
    Categorical,
    Label,
    All,
}

impl ColumnGroup {
    pub fn as_str(self) -> &'static str {
        match self {
            ColumnGroup::Continuous => "continuous",
            ColumnGroup::Categorical => "categorical",
            ColumnGroup::Label => "label",
            ColumnGroup::All => "all",
        }
    }

    /// The concrete groups this group spans.
    pub fn members(self) -> &'static [ColumnGroup] {
        match self {
            ColumnGroup::Continuous => &[ColumnGroup::Continuous],
            ColumnGroup::Categorical => &[ColumnGroup::Categorical],
            ColumnGroup::Label => &[ColumnGroup::Label],
            ColumnGroup::All => &[ColumnGroup::Continuous, ColumnGroup::Categorical],
        }
    }
}

impl std::fmt::Display for ColumnGroup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ColumnGroup {
    type Err = TabflowError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "continuous" | "cont" => Ok(ColumnGroup::Continuous),
            "categorical" | "cat" => Ok(ColumnGroup::Categorical),
            "label" => Ok(ColumnGroup::Label),
            "all" => Ok(ColumnGroup::All),
            other => Err(TabflowError::Configuration(format!(
                "Unknown column group '{}'",
                other
            ))),
        }
    }
}

/// Base, derived and terminal names of one concrete group.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GroupColumns {
    base: Vec<String>,
    derived: Vec<String>,
    /// Current name of each base column, parallel to `base`.
    terminal: Vec<String>,
}

impl GroupColumns {
    fn new(base: Vec<String>) -> Self {
        GroupColumns {
            terminal: base.clone(),
            base,
            derived: Vec::new(),
        }
    }

    pub fn base(&self) -> &[String] {
        &self.base
    }

    pub fn derived(&self) -> &[String] {
        &self.derived
    }

    pub fn terminal(&self) -> &[String] {
        &self.terminal
    }
}

/// A base column together with its current name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnRef {
    pub group: ColumnGroup,
    pub base: String,
    pub current: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ColumnsContext {
    continuous: GroupColumns,
    categorical: GroupColumns,
    label: GroupColumns,
}

impl ColumnsContext {
    /// Declare the base columns. Names must be unique across all groups.
    pub fn new(categorical: Vec<String>, continuous: Vec<String>, label: Vec<String>) -> Result<Self> {
        let mut seen: Vec<&String> = Vec::new();
        for name in categorical.iter().chain(&continuous).chain(&label) {
            if seen.contains(&name) {
                return Err(TabflowError::Configuration(format!(
                    "Column '{}' is declared more than once",
                    name
                )));
            }
            seen.push(name);
        }
        Ok(ColumnsContext {
            continuous: GroupColumns::new(continuous),
            categorical: GroupColumns::new(categorical),
            label: GroupColumns::new(label),
        })
    }

    /// Columns of one concrete group. `All` is not a concrete group and
    /// resolves to the continuous group here; use the list accessors for
    /// the combined view.
    pub fn group(&self, group: ColumnGroup) -> &GroupColumns {
        match group {
            ColumnGroup::Continuous | ColumnGroup::All => &self.continuous,
            ColumnGroup::Categorical => &self.categorical,
            ColumnGroup::Label => &self.label,
        }
    }

    fn group_mut(&mut self, group: ColumnGroup) -> &mut GroupColumns {
        match group {
            ColumnGroup::Continuous | ColumnGroup::All => &mut self.continuous,
            ColumnGroup::Categorical => &mut self.categorical,
            ColumnGroup::Label => &mut self.label,
        }
    }

    fn collect(&self, group: ColumnGroup, f: impl Fn(&GroupColumns) -> &[String]) -> Vec<String> {
        group
            .members()
            .iter()
            .flat_map(|g| f(self.group(*g)).iter().cloned())
            .collect()
    }

    pub fn base(&self, group: ColumnGroup) -> Vec<String> {
        self.collect(group, GroupColumns::base)
    }

    pub fn derived(&self, group: ColumnGroup) -> Vec<String> {
        self.collect(group, GroupColumns::derived)
    }

    /// Current names of the group's base columns, in base order.
    pub fn current(&self, group: ColumnGroup) -> Vec<String> {
        self.collect(group, GroupColumns::terminal)
    }

    /// Resolve the columns an operator works on.
    ///
    /// Without a selection every base column of the group is targeted.
    /// A selection names base or current columns of the group; any other
    /// name is a configuration error.
    pub fn targets(&self, group: ColumnGroup, selection: Option<&[String]>) -> Result<Vec<ColumnRef>> {
        let all: Vec<ColumnRef> = group
            .members()
            .iter()
            .flat_map(|g| {
                let cols = self.group(*g);
                cols.base.iter().zip(&cols.terminal).map(move |(b, t)| ColumnRef {
                    group: *g,
                    base: b.clone(),
                    current: t.clone(),
                })
            })
            .collect();
        let Some(selection) = selection else {
            return Ok(all);
        };
        for name in selection {
            if !all.iter().any(|c| &c.base == name || &c.current == name) {
                return Err(TabflowError::Configuration(format!(
                    "Column '{}' is not part of the {} group",
                    name, group
                )));
            }
        }
        Ok(all
            .into_iter()
            .filter(|c| selection.iter().any(|s| s == &c.base || s == &c.current))
            .collect())
    }

    /// Whether `name` is a base or derived column of any group.
    pub fn contains_name(&self, name: &str) -> bool {
        [&self.continuous, &self.categorical, &self.label]
            .iter()
            .any(|g| g.base.iter().chain(&g.derived).any(|n| n == name))
    }

    /// Record a newly created column. Reusing any existing name is a
    /// configuration error.
    pub fn add_derived(&mut self, group: ColumnGroup, name: &str) -> Result<()> {
        if self.contains_name(name) {
            return Err(TabflowError::Configuration(format!(
                "Output column '{}' collides with an existing column",
                name
            )));
        }
        self.group_mut(group).derived.push(name.to_string());
        Ok(())
    }

    /// Set the current name of a base column.
    pub fn set_terminal(&mut self, group: ColumnGroup, base: &str, name: &str) -> Result<()> {
        let cols = self.group_mut(group);
        let idx = cols.base.iter().position(|b| b == base).ok_or_else(|| {
            TabflowError::Configuration(format!(
                "Column '{}' is not a base column of the {} group",
                base, group
            ))
        })?;
        cols.terminal[idx] = name.to_string();
        Ok(())
    }

    /// Output columns: categorical terminals, then continuous, then labels.
    pub fn final_columns(&self) -> Vec<String> {
        [&self.categorical, &self.continuous, &self.label]
            .iter()
            .flat_map(|g| g.terminal.iter().cloned())
            .collect()
    }

    /// Base columns in output order.
    pub fn base_columns(&self) -> Vec<String> {
        [&self.categorical, &self.continuous, &self.label]
            .iter()
            .flat_map(|g| g.base.iter().cloned())
            .collect()
    }
}
