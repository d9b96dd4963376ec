//! Attribute value tree for decoded recordings
//!
//! A decoded recording is an opaque, read-only tree of scalars, lists and
//! sub-maps. Navigation uses `/`-separated paths; a failed lookup is
//! `None`, distinct from a stored null.

use chrono::NaiveDateTime;
use indexmap::IndexMap;
use std::fmt;

/// One node of the decoded attribute tree.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    DateTime(NaiveDateTime),
    List(Vec<Value>),
    Map(IndexMap<String, Value>),
}

impl Value {
    /// Navigate a parsed path. Returns `None` when a key or index does
    /// not exist, `Some(&Value::Null)` when the tree holds an actual null.
    pub fn get_path(&self, path: &[&str]) -> Option<&Value> {
        let mut current = self;
        for segment in path {
            current = match current {
                Value::Map(map) => map.get(*segment)?,
                Value::List(list) => {
                    let idx: usize = segment.parse().ok()?;
                    list.get(idx)?
                }
                _ => return None,
            };
        }
        Some(current)
    }

    /// Navigate a `/`-separated path string.
    pub fn lookup(&self, path: &str) -> Option<&Value> {
        let segments: Vec<&str> = path.split('/').collect();
        self.get_path(&segments)
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(i) => Some(*i as f64),
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Str(_) => "string",
            Value::DateTime(_) => "datetime",
            Value::List(_) => "list",
            Value::Map(_) => "map",
        }
    }

    /// Convert a decoded JSON attribute dump into a value tree.
    pub fn from_json(json: &serde_json::Value) -> Value {
        match json {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(*b),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Value::Int(i)
                } else {
                    Value::Float(n.as_f64().unwrap_or(f64::NAN))
                }
            }
            serde_json::Value::String(s) => Value::Str(s.clone()),
            serde_json::Value::Array(items) => {
                Value::List(items.iter().map(Value::from_json).collect())
            }
            serde_json::Value::Object(map) => Value::Map(
                map.iter()
                    .map(|(k, v)| (k.clone(), Value::from_json(v)))
                    .collect(),
            ),
        }
    }

    /// Render as a JSON-compatible value; datetimes become ISO-8601 strings.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Null => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::Int(i) => serde_json::Value::from(*i),
            Value::Float(f) => serde_json::Number::from_f64(*f)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Value::Str(s) => serde_json::Value::String(s.clone()),
            Value::DateTime(dt) => {
                serde_json::Value::String(dt.format("%Y-%m-%dT%H:%M:%S%.f").to_string())
            }
            Value::List(items) => {
                serde_json::Value::Array(items.iter().map(Value::to_json).collect())
            }
            Value::Map(map) => serde_json::Value::Object(
                map.iter().map(|(k, v)| (k.clone(), v.to_json())).collect(),
            ),
        }
    }
}

impl fmt::Display for Value {
    /// Stringification used when a resolved value is spliced into a
    /// template. Nulls render empty, lists render bracketed.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => Ok(()),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Int(i) => write!(f, "{}", i),
            Value::Float(x) => write!(f, "{}", x),
            Value::Str(s) => f.write_str(s),
            Value::DateTime(dt) => write!(f, "{}", dt.format("%Y-%m-%dT%H:%M:%S%.f")),
            Value::List(items) => {
                f.write_str("[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                f.write_str("]")
            }
            Value::Map(map) => {
                f.write_str("{")?;
                for (i, (k, v)) in map.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{}: {}", k, v)?;
                }
                f.write_str("}")
            }
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Str(s)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float(f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Value {
        Value::from_json(&serde_json::json!({
            "SeriesDescription": "task_bold_1",
            "EchoTime": 0.03,
            "ImageType": ["ORIGINAL", "PRIMARY"],
            "Private": {"Depth": 3, "Empty": null},
        }))
    }

    #[test]
    fn lookup_scalar() {
        let v = sample();
        assert_eq!(
            v.lookup("SeriesDescription"),
            Some(&Value::Str("task_bold_1".into()))
        );
        assert_eq!(v.lookup("Private/Depth"), Some(&Value::Int(3)));
        assert_eq!(v.lookup("ImageType/1"), Some(&Value::Str("PRIMARY".into())));
    }

    #[test]
    fn missing_is_distinct_from_null() {
        let v = sample();
        assert_eq!(v.lookup("Private/Empty"), Some(&Value::Null));
        assert_eq!(v.lookup("Private/Nope"), None);
        assert_eq!(v.lookup("Nope/Deeper"), None);
    }

    #[test]
    fn leftover_path_on_scalar_is_missing() {
        let v = sample();
        assert_eq!(v.lookup("EchoTime/0"), None);
    }

    #[test]
    fn display_splices() {
        assert_eq!(Value::Int(3).to_string(), "3");
        assert_eq!(Value::Null.to_string(), "");
        assert_eq!(
            Value::List(vec![Value::Int(1), Value::Str("a".into())]).to_string(),
            "[1, a]"
        );
    }
}
