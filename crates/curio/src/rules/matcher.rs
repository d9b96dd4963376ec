//! Rule matching
//!
//! A greedy, order-sensitive classifier: categories are scanned in the
//! catalog's declared order, runs within a category in declared list
//! order, and the first matching run is binding. Ambiguity detection
//! continues the scan and reports further matches as diagnostics
//! without ever changing the selected result. Rule authors must order
//! specific patterns before wildcard ones.

use crate::catalog::{self, FormatSpec};
use crate::error::Result;
use crate::resolver::{self, Context};
use crate::rules::ruleset::RuleSet;
use crate::rules::{MatchValue, Pattern, Run};

/// An additional run that also matched; advisory only.
#[derive(Debug, Clone, PartialEq)]
pub struct Ambiguity {
    pub category: String,
    pub index: usize,
}

#[derive(Debug)]
pub struct MatchOutcome {
    pub category: String,
    /// Private copy of the selected run; synthetic for unclassified
    pub run: Run,
    /// Position of the selected run within its category, if any
    pub index: Option<usize>,
    pub ambiguities: Vec<Ambiguity>,
}

impl MatchOutcome {
    pub fn is_ignored(&self) -> bool {
        self.category == catalog::IGNORED
    }

    pub fn is_unclassified(&self) -> bool {
        self.category == catalog::UNCLASSIFIED
    }
}

/// Test one run against the recording: over all constraining patterns at
/// least one must succeed and every one must succeed; a run with no
/// constraining patterns matches trivially.
pub fn match_run(ctx: &mut Context<'_>, run: &Run) -> Result<bool> {
    let mut match_one = run.is_wildcard();
    let mut match_all = true;

    for (key, pattern) in run.attributes.iter() {
        let pattern = match pattern {
            Some(p) if !p.is_empty() => p,
            _ => continue,
        };
        let res = match_attribute(ctx, key, pattern)?;
        match_one = match_one || res;
        match_all = match_all && res;
        if !match_all {
            break;
        }
    }
    Ok(match_one && match_all)
}

fn match_attribute(ctx: &mut Context<'_>, key: &str, pattern: &Pattern) -> Result<bool> {
    let value = if key.starts_with('<') {
        resolver::resolve(key, ctx, true, false)?
    } else {
        ctx.recording.get_attribute(key)?
    };
    match value {
        Some(v) => pattern.matches(&v),
        None => Ok(false),
    }
}

/// Classify a recording against the ruleset for its format.
pub fn match_recording(
    ctx: &mut Context<'_>,
    ruleset: &RuleSet,
    check_ambiguity: bool,
) -> Result<MatchOutcome> {
    let format = ctx.recording.format();
    let mut selected: Option<(String, usize, Run)> = None;
    let mut ambiguities = Vec::new();

    'categories: for spec in format.categories {
        for (index, run) in ruleset.runs(format.name, spec.name).iter().enumerate() {
            if !match_run(ctx, run)? {
                continue;
            }
            match &selected {
                None => selected = Some((spec.name.to_string(), index, run.clone())),
                Some((sel_cat, sel_idx, _)) => {
                    tracing::warn!(
                        recording = %ctx.recording.identity(),
                        selected = %format!("{}/{}", sel_cat, sel_idx),
                        also = %format!("{}/{}", spec.name, index),
                        "ambiguous classification"
                    );
                    ambiguities.push(Ambiguity {
                        category: spec.name.to_string(),
                        index,
                    });
                }
            }
            if !check_ambiguity {
                break 'categories;
            }
        }
    }

    // The ignored pseudo-category is checked last, and only when no
    // ordinary category matched.
    if selected.is_none() {
        for (index, run) in ruleset.runs(format.name, catalog::IGNORED).iter().enumerate() {
            if match_run(ctx, run)? {
                selected = Some((catalog::IGNORED.to_string(), index, run.clone()));
                break;
            }
        }
    }

    let outcome = match selected {
        Some((category, index, run)) => {
            bind_labels(ctx, &category, &run, format)?;
            MatchOutcome {
                category,
                run,
                index: Some(index),
                ambiguities,
            }
        }
        None => {
            let run = synthetic_run(ctx);
            ctx.recording.modality = catalog::UNCLASSIFIED.to_string();
            ctx.recording.labels.clear();
            ctx.recording.suffix.clear();
            MatchOutcome {
                category: catalog::UNCLASSIFIED.to_string(),
                run,
                index: None,
                ambiguities,
            }
        }
    };
    Ok(outcome)
}

/// Bind the matched run's category, suffix and resolved entity labels to
/// the recording.
fn bind_labels(
    ctx: &mut Context<'_>,
    category: &str,
    run: &Run,
    format: &'static FormatSpec,
) -> Result<()> {
    ctx.recording.labels.clear();
    ctx.recording.suffix.clear();
    ctx.recording.modality = category.to_string();
    if category == catalog::IGNORED {
        return Ok(());
    }

    let spec = format
        .category(category)
        .expect("matched category is declared");
    let unknown: Vec<&String> = run
        .entities
        .keys()
        .filter(|key| !spec.entities.contains(&key.as_str()))
        .collect();
    if !unknown.is_empty() && !run.checked {
        tracing::warn!(
            recording = %ctx.recording.identity(),
            category,
            keys = ?unknown,
            "entity keys outside the declared naming schema"
        );
    }

    let suffix = resolver::resolve_string(&run.suffix, ctx, true)?;
    let mut labels = indexmap::IndexMap::new();
    for (key, template) in run.entities.iter() {
        let value = match template {
            Some(template) => {
                // strip vendor trailers before canonicalization, while
                // the separator is still present
                let resolved = resolver::resolve_string(template, ctx, false)?;
                let stripped = strip_trailing_suffix(&resolved, &suffix);
                Some(crate::naming::cleanup(&stripped, ""))
            }
            None => None,
        };
        labels.insert(key.clone(), value);
    }
    ctx.recording.labels = labels;
    ctx.recording.suffix = suffix;
    Ok(())
}

/// Vendors append the output suffix to some attribute-derived labels;
/// strip a trailing `_<suffix>` or `.<suffix>` once labels are resolved.
fn strip_trailing_suffix(label: &str, suffix: &str) -> String {
    if suffix.is_empty() {
        return label.to_string();
    }
    for sep in ['_', '.'] {
        let trailer = format!("{}{}", sep, suffix);
        if label.len() >= trailer.len() {
            let split = label.len() - trailer.len();
            if label.is_char_boundary(split) && label[split..].eq_ignore_ascii_case(&trailer) {
                return label[..split].to_string();
            }
        }
    }
    label.to_string()
}

/// Template an operator can promote later, built from the attributes the
/// match pass actually read.
fn synthetic_run(ctx: &mut Context<'_>) -> Run {
    let mut run = Run {
        category: catalog::UNCLASSIFIED.to_string(),
        provenance: Some(ctx.recording.path().display().to_string()),
        ..Run::default()
    };
    for (key, value) in ctx.recording.touched_attributes() {
        let pattern = value
            .as_ref()
            .map(|v| Pattern::One(MatchValue::from_observed(v)));
        run.attributes.insert(key, pattern);
    }
    run
}
