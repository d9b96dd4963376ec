//! Declarative rule templates
//!
//! A `Run` binds attribute patterns to an output category, entity values
//! and auxiliary sidecar overrides. Rules are matched in declared list
//! order; pattern strings are full-string regexes against the
//! stringified attribute value, non-string patterns compare by value.

pub mod matcher;
pub mod ruleset;

use crate::error::CurateError;
use crate::value::Value;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// One element of an attribute pattern.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MatchValue {
    Int(i64),
    Float(f64),
    Str(String),
}

impl MatchValue {
    /// Full-string regex match for string patterns, value equality for
    /// scalar patterns.
    pub fn matches(&self, value: &Value) -> Result<bool, CurateError> {
        match self {
            MatchValue::Str(pattern) => {
                let anchored = format!("^(?:{})$", pattern.trim());
                let re = regex::Regex::new(&anchored).map_err(|e| CurateError::Pattern {
                    attribute: pattern.clone(),
                    message: e.to_string(),
                })?;
                Ok(re.is_match(value.to_string().trim()))
            }
            MatchValue::Int(i) => Ok(match value {
                Value::Int(v) => v == i,
                Value::Float(v) => *v == *i as f64,
                _ => false,
            }),
            MatchValue::Float(f) => Ok(match value {
                Value::Int(v) => *v as f64 == *f,
                Value::Float(v) => v == f,
                _ => false,
            }),
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, MatchValue::Str(s) if s.is_empty())
    }

    /// Pattern that matches exactly one observed value.
    pub fn from_observed(value: &Value) -> MatchValue {
        match value {
            Value::Int(i) => MatchValue::Int(*i),
            Value::Float(f) => MatchValue::Float(*f),
            other => MatchValue::Str(regex::escape(other.to_string().trim())),
        }
    }
}

/// An attribute pattern: a single test or a list of alternatives.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Pattern {
    One(MatchValue),
    Many(Vec<MatchValue>),
}

impl Pattern {
    /// A list pattern succeeds if any element matches.
    pub fn matches(&self, value: &Value) -> Result<bool, CurateError> {
        match self {
            Pattern::One(m) => m.matches(value),
            Pattern::Many(items) => {
                for m in items {
                    if m.matches(value)? {
                        return Ok(true);
                    }
                }
                Ok(false)
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            Pattern::One(m) => m.is_empty(),
            Pattern::Many(items) => items.is_empty(),
        }
    }
}

/// Auxiliary sidecar override: a template or a list of templates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AuxValue {
    One(String),
    Many(Vec<String>),
}

/// A rule template.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Run {
    /// Category this run files under; implied by its position in the
    /// ruleset, not persisted inside the run itself.
    #[serde(skip)]
    pub category: String,

    pub provenance: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub example: Option<String>,
    #[serde(default)]
    pub checked: bool,
    #[serde(default)]
    pub suffix: String,
    #[serde(default)]
    pub attributes: IndexMap<String, Option<Pattern>>,
    #[serde(default, rename = "bids")]
    pub entities: IndexMap<String, Option<String>>,
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub json: IndexMap<String, AuxValue>,
}

impl Run {
    /// Attribute patterns that actually constrain the match.
    pub fn constraining_patterns(&self) -> impl Iterator<Item = (&str, &Pattern)> {
        self.attributes.iter().filter_map(|(key, pattern)| {
            pattern
                .as_ref()
                .filter(|p| !p.is_empty())
                .map(|p| (key.as_str(), p))
        })
    }

    /// A run with no constraining patterns matches trivially.
    pub fn is_wildcard(&self) -> bool {
        self.constraining_patterns().next().is_none()
    }

    /// Structural equivalence used to de-duplicate promoted templates.
    pub fn is_equivalent(&self, other: &Run) -> bool {
        self.category == other.category
            && self.attributes == other.attributes
            && self.entities == other.entities
            && self.suffix == other.suffix
    }
}
