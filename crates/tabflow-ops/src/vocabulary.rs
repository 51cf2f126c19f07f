//! Categorical vocabularies.
//!
//! A vocabulary maps each distinct non-null value of a column to an
//! integer code. Code 0 is reserved for null and unseen values; observed
//! values get codes 1, 2, ... in first-seen order.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use tabflow_types::flex_type::FlexType;

/// Hashable identity of a non-null cell value.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) enum CategoryKey {
    Integer(i64),
    Float(u64),
    String(Arc<str>),
}

impl CategoryKey {
    pub(crate) fn of(value: &FlexType) -> Option<CategoryKey> {
        match value {
            FlexType::Integer(i) => Some(CategoryKey::Integer(*i)),
            FlexType::Float(f) => Some(CategoryKey::Float(f.to_bits())),
            FlexType::String(s) => Some(CategoryKey::String(s.clone())),
            FlexType::Undefined => None,
        }
    }

    pub(crate) fn to_flex(&self) -> FlexType {
        match self {
            CategoryKey::Integer(i) => FlexType::Integer(*i),
            CategoryKey::Float(bits) => FlexType::Float(f64::from_bits(*bits)),
            CategoryKey::String(s) => FlexType::String(s.clone()),
        }
    }
}

/// Ordered, deduplicated categories with the null sentinel at code 0.
///
/// Serialized as a plain list whose first element is `null`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "Vec<FlexType>", into = "Vec<FlexType>")]
pub struct CategoryVocabulary {
    categories: Vec<FlexType>,
    index: HashMap<CategoryKey, i64>,
}

impl CategoryVocabulary {
    /// A vocabulary holding only the sentinel.
    pub fn new() -> Self {
        CategoryVocabulary {
            categories: vec![FlexType::Undefined],
            index: HashMap::new(),
        }
    }

    /// Append `value` if unseen and return its code. Null maps to 0.
    pub fn insert(&mut self, value: &FlexType) -> i64 {
        let Some(key) = CategoryKey::of(value) else {
            return 0;
        };
        if let Some(&code) = self.index.get(&key) {
            return code;
        }
        let code = self.categories.len() as i64;
        self.categories.push(key.to_flex());
        self.index.insert(key, code);
        code
    }

    /// Code of `value`; null and unseen values encode to 0.
    pub fn encode(&self, value: &FlexType) -> i64 {
        CategoryKey::of(value)
            .and_then(|k| self.index.get(&k).copied())
            .unwrap_or(0)
    }

    /// Value for a code. Code 0 decodes to `Undefined`.
    pub fn decode(&self, code: i64) -> Option<&FlexType> {
        usize::try_from(code).ok().and_then(|i| self.categories.get(i))
    }

    /// Number of codes, including the sentinel.
    pub fn len(&self) -> usize {
        self.categories.len()
    }

    /// True when only the sentinel is present.
    pub fn is_empty(&self) -> bool {
        self.categories.len() == 1
    }

    /// All categories by code, sentinel first.
    pub fn categories(&self) -> &[FlexType] {
        &self.categories
    }
}

impl Default for CategoryVocabulary {
    fn default() -> Self {
        Self::new()
    }
}

impl PartialEq for CategoryVocabulary {
    fn eq(&self, other: &Self) -> bool {
        self.categories == other.categories
    }
}

impl TryFrom<Vec<FlexType>> for CategoryVocabulary {
    type Error = String;

    fn try_from(values: Vec<FlexType>) -> Result<Self, Self::Error> {
        let mut iter = values.into_iter();
        match iter.next() {
            Some(FlexType::Undefined) => {}
            other => {
                return Err(format!(
                    "vocabulary must start with null sentinel, found {:?}",
                    other
                ))
            }
        }
        let mut vocab = CategoryVocabulary::new();
        for value in iter {
            if value.is_undefined() {
                return Err("null may only appear as the sentinel".to_string());
            }
            let expected = vocab.len() as i64;
            if vocab.insert(&value) != expected {
                return Err(format!("duplicate category {}", value));
            }
        }
        Ok(vocab)
    }
}

impl From<CategoryVocabulary> for Vec<FlexType> {
    fn from(vocab: CategoryVocabulary) -> Self {
        vocab.categories
    }
}
