use std::cmp::Ordering;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// Type tag for a column or a cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FlexTypeEnum {
    Integer,
    Float,
    String,
    Undefined,
}

impl std::fmt::Display for FlexTypeEnum {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Integer => "integer",
            Self::Float => "float",
            Self::String => "string",
            Self::Undefined => "undefined",
        })
    }
}

impl FlexTypeEnum {
    /// Whether values of this type take part in arithmetic.
    pub fn is_numeric(self) -> bool {
        matches!(self, FlexTypeEnum::Integer | FlexTypeEnum::Float)
    }
}

/// A single cell value.
///
/// Serialized untagged, so a stats document reads as plain JSON scalars
/// (`3`, `2.5`, `"abc"`, `null`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FlexType {
    Integer(i64),
    Float(f64),
    String(Arc<str>),
    Undefined,
}

impl FlexType {
    pub fn type_enum(&self) -> FlexTypeEnum {
        match self {
            FlexType::Integer(_) => FlexTypeEnum::Integer,
            FlexType::Float(_) => FlexTypeEnum::Float,
            FlexType::String(_) => FlexTypeEnum::String,
            FlexType::Undefined => FlexTypeEnum::Undefined,
        }
    }

    pub fn is_undefined(&self) -> bool {
        matches!(self, FlexType::Undefined)
    }

    /// Numeric view of the value. Strings and `Undefined` have none.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            FlexType::Integer(i) => Some(*i as f64),
            FlexType::Float(f) => Some(*f),
            _ => None,
        }
    }
}

impl From<i64> for FlexType {
    fn from(v: i64) -> Self {
        FlexType::Integer(v)
    }
}

impl From<f64> for FlexType {
    fn from(v: f64) -> Self {
        FlexType::Float(v)
    }
}

impl From<&str> for FlexType {
    fn from(v: &str) -> Self {
        FlexType::String(Arc::from(v))
    }
}

impl std::fmt::Display for FlexType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FlexType::Integer(v) => write!(f, "{}", v),
            FlexType::Float(v) => write!(f, "{}", v),
            FlexType::String(v) => write!(f, "{}", v),
            FlexType::Undefined => f.write_str("null"),
        }
    }
}

/// Total order over cells: numbers compare numerically across
/// integer/float, numbers sort before strings, `Undefined` sorts last.
pub fn compare_flex_type(a: &FlexType, b: &FlexType) -> Ordering {
    match (a, b) {
        (FlexType::Undefined, FlexType::Undefined) => Ordering::Equal,
        (FlexType::Undefined, _) => Ordering::Greater,
        (_, FlexType::Undefined) => Ordering::Less,

        (FlexType::Integer(x), FlexType::Integer(y)) => x.cmp(y),
        (FlexType::Float(x), FlexType::Float(y)) => x.total_cmp(y),
        (FlexType::String(x), FlexType::String(y)) => x.as_ref().cmp(y.as_ref()),

        (FlexType::Integer(x), FlexType::Float(y)) => (*x as f64).total_cmp(y),
        (FlexType::Float(x), FlexType::Integer(y)) => x.total_cmp(&(*y as f64)),

        (a, b) => type_rank(a).cmp(&type_rank(b)),
    }
}

fn type_rank(v: &FlexType) -> u8 {
    match v {
        FlexType::Integer(_) => 0,
        FlexType::Float(_) => 1,
        FlexType::String(_) => 2,
        FlexType::Undefined => 3,
    }
}
