//! Sidecar metadata fields
//!
//! A `MetaField` names a template to resolve against the recording, an
//! optional scaling applied to the resolved value, and a default used
//! when resolution fails. The value itself is computed at export time,
//! never stored.

pub mod assembler;
pub mod defs;

use crate::value::Value;
use indexmap::IndexMap;

/// Transformation applied to a resolved field value.
#[derive(Debug, Clone, PartialEq)]
pub enum Scaling {
    /// Keep the natively-typed value
    Raw,
    /// Cast to integer and multiply
    Int(i64),
    /// Cast to float and multiply
    Float(f64),
    /// Stringify and trim
    Str,
    /// Map raw values to labels
    Select(IndexMap<String, String>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct MetaField {
    pub template: String,
    pub scaling: Scaling,
    pub default: Option<Value>,
}

impl MetaField {
    pub fn new(template: impl Into<String>, default: Option<Value>) -> MetaField {
        MetaField {
            template: template.into(),
            scaling: Scaling::Raw,
            default,
        }
    }

    pub fn with_scaling(mut self, scaling: Scaling) -> MetaField {
        self.scaling = scaling;
        self
    }

    /// True if the template references entity labels, which only exist
    /// after a run has been matched.
    pub fn is_deferred(&self) -> bool {
        self.template.contains("<<")
    }

    /// Apply the scaling to a resolved value. A value the scaling is not
    /// defined for yields `None`.
    pub fn apply(&self, value: Value) -> Option<Value> {
        match &self.scaling {
            Scaling::Raw => Some(value),
            Scaling::Int(k) => match &value {
                Value::Int(i) => Some(Value::Int(i * k)),
                Value::Float(f) => Some(Value::Int(f.trunc() as i64 * k)),
                Value::Str(s) => s.trim().parse::<i64>().ok().map(|i| Value::Int(i * k)),
                _ => {
                    tracing::warn!(field = %self.template, value = %value, "invalid value for integer field");
                    None
                }
            },
            Scaling::Float(k) => match value.as_f64() {
                Some(f) => Some(Value::Float(f * k)),
                None => {
                    if let Value::Str(s) = &value {
                        if let Ok(f) = s.trim().parse::<f64>() {
                            return Some(Value::Float(f * k));
                        }
                    }
                    tracing::warn!(field = %self.template, value = %value, "invalid value for float field");
                    None
                }
            },
            Scaling::Str => Some(Value::Str(value.to_string().trim().to_string())),
            Scaling::Select(levels) => {
                let key = value.to_string();
                match levels.get(key.trim()) {
                    Some(label) => Some(Value::Str(label.clone())),
                    None => {
                        tracing::warn!(field = %self.template, value = %key, "value not in selection levels");
                        None
                    }
                }
            }
        }
    }
}
