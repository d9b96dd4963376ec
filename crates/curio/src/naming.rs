//! Canonical archive name construction
//!
//! Names are assembled from the locked session prefix, the bound entity
//! labels and the run suffix, joined with `_`. Building a name is pure:
//! identical inputs yield byte-identical output.

use crate::error::Result;
use crate::session::Session;
use indexmap::IndexMap;
use std::fmt;

/// Canonicalize a label: trim surrounding whitespace, then delete every
/// character outside `[A-Za-z0-9]`. If `prefix` is non-empty and the label
/// already carries it, the prefix is preserved verbatim and re-prepended.
///
/// `"task-Joe's reward_task"` with prefix `"task-"` becomes
/// `"task-Joesrewardtask"`. Idempotent.
pub fn cleanup(label: &str, prefix: &str) -> String {
    let mut label = label.trim();
    if !prefix.is_empty() {
        if let Some(stripped) = label.strip_prefix(prefix) {
            label = stripped;
        }
    }
    if label.is_empty() {
        return String::new();
    }
    let cleaned: String = label.chars().filter(char::is_ascii_alphanumeric).collect();
    format!("{}{}", prefix, cleaned)
}

/// Decide the entity iteration order for a category.
///
/// When the bound key set is exactly the category's declared key set, the
/// author-declared insertion order from the matched run is preserved.
/// Otherwise (strict subset, or unknown keys) the declared order is used,
/// unknown keys trailing in insertion order, and a warning is raised.
pub fn entity_order<'a>(
    declared: &[&'a str],
    bound: &'a IndexMap<String, Option<String>>,
) -> Vec<&'a str> {
    let exact = bound.len() == declared.len()
        && declared.iter().all(|key| bound.contains_key(*key));
    if exact {
        return bound.keys().map(String::as_str).collect();
    }

    tracing::warn!(
        declared = ?declared,
        bound = ?bound.keys().collect::<Vec<_>>(),
        "entity set differs from the declared naming schema"
    );
    let mut order: Vec<&str> = declared
        .iter()
        .copied()
        .filter(|key| bound.contains_key(*key))
        .collect();
    for key in bound.keys() {
        if !declared.contains(&key.as_str()) {
            order.push(key);
        }
    }
    order
}

/// The assembled archive name. A pure value: composing one never has
/// side effects, and rendering identical values is byte-identical.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CanonicalName {
    pub subject: String,
    pub session: Option<String>,
    /// `(key, cleaned value)` pairs in final iteration order
    pub entities: Vec<(String, String)>,
    pub suffix: String,
}

impl CanonicalName {
    /// Compose the name from the locked session, the bound entity labels
    /// (already resolved) and the suffix.
    pub fn compose(
        session: &Session,
        declared: &[&str],
        entities: &IndexMap<String, Option<String>>,
        suffix: &str,
    ) -> Result<CanonicalName> {
        let subject = session
            .subject()
            .filter(|s| !s.is_empty())
            .ok_or_else(|| crate::error::CurateError::InvalidSubject(String::new()))?
            .to_string();
        let ses = session
            .session()
            .filter(|s| !s.is_empty())
            .map(str::to_string);

        let mut pairs = Vec::new();
        for key in entity_order(declared, entities) {
            if let Some(Some(value)) = entities.get(key) {
                if value.is_empty() {
                    continue;
                }
                let prefix = format!("{}-", key);
                let cleaned = cleanup(value, &prefix);
                let label = cleaned.strip_prefix(&prefix).unwrap_or("");
                if !label.is_empty() {
                    pairs.push((key.to_string(), label.to_string()));
                }
            }
        }
        Ok(CanonicalName {
            subject,
            session: ses,
            entities: pairs,
            suffix: cleanup(suffix, ""),
        })
    }
}

impl fmt::Display for CanonicalName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.subject)?;
        if let Some(ses) = &self.session {
            write!(f, "_{}", ses)?;
        }
        for (key, value) in &self.entities {
            write!(f, "_{}-{}", key, value)?;
        }
        if !self.suffix.is_empty() {
            write!(f, "_{}", self.suffix)?;
        }
        Ok(())
    }
}

/// Compose and render in one step.
pub fn build(
    session: &Session,
    declared: &[&str],
    entities: &IndexMap<String, Option<String>>,
    suffix: &str,
) -> Result<String> {
    Ok(CanonicalName::compose(session, declared, entities, suffix)?.to_string())
}
