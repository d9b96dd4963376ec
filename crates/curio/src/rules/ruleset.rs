//! Rule catalog: persistence, promotion and sanity sweeps
//!
//! The catalog maps source format -> category -> ordered run list and is
//! persisted as YAML. Lookup order within a category is the declared
//! list order and is semantically significant.

use crate::catalog;
use crate::error::Result;
use crate::rules::Run;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::Path;

/// On-disk shape of the rule catalog.
#[derive(Debug, Serialize, Deserialize)]
struct RuleSetFile {
    #[serde(rename = "__version__", default, skip_serializing_if = "Option::is_none")]
    version: Option<String>,
    #[serde(flatten)]
    formats: IndexMap<String, IndexMap<String, Vec<Run>>>,
}

/// The full rule catalog.
#[derive(Debug, Clone)]
pub struct RuleSet {
    pub version: String,
    formats: IndexMap<String, IndexMap<String, Vec<Run>>>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct RunCounts {
    pub total: usize,
    pub unchecked: usize,
}

/// Integrity finding from the post-run sanity sweep.
#[derive(Debug, Clone, PartialEq)]
pub enum SanityIssue {
    MissingSuffix {
        format: String,
        category: String,
        index: usize,
    },
    NoExample {
        format: String,
        category: String,
        index: usize,
    },
    DuplicateProvenance {
        provenance: String,
        count: usize,
    },
    DuplicateExample {
        example: String,
        count: usize,
    },
}

impl fmt::Display for SanityIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SanityIssue::MissingSuffix { format, category, index } => {
                write!(f, "{}/{}[{}]: suffix not defined", format, category, index)
            }
            SanityIssue::NoExample { format, category, index } => {
                write!(f, "{}/{}[{}]: no matched recordings", format, category, index)
            }
            SanityIssue::DuplicateProvenance { provenance, count } => {
                write!(f, "provenance '{}' bound to {} runs", provenance, count)
            }
            SanityIssue::DuplicateExample { example, count } => {
                write!(f, "example '{}' produced by {} runs", example, count)
            }
        }
    }
}

impl Default for RuleSet {
    fn default() -> Self {
        Self::empty()
    }
}

impl RuleSet {
    pub fn empty() -> RuleSet {
        RuleSet {
            version: env!("CARGO_PKG_VERSION").to_string(),
            formats: IndexMap::new(),
        }
    }

    /// Load the catalog from a YAML file.
    pub fn load(path: &Path) -> Result<RuleSet> {
        let raw = fs::read_to_string(path)?;
        let file: RuleSetFile = serde_yaml::from_str(&raw)?;

        let version = file.version.unwrap_or_else(|| "Unknown".to_string());
        if version != env!("CARGO_PKG_VERSION") {
            tracing::warn!(
                path = %path.display(),
                file_version = %version,
                "catalog version differs from this build"
            );
        }

        let mut formats = IndexMap::new();
        for (format_name, categories) in file.formats {
            let spec = match catalog::format_spec(&format_name) {
                Some(spec) => spec,
                None => {
                    tracing::warn!(format = %format_name, "unknown format in catalog, skipped");
                    continue;
                }
            };
            let mut by_category: IndexMap<String, Vec<Run>> = IndexMap::new();
            for (category, mut runs) in categories {
                if !spec.is_valid_category(&category, true) {
                    tracing::warn!(
                        format = %format_name,
                        category = %category,
                        "undeclared category in catalog"
                    );
                }
                for run in &mut runs {
                    run.category = category.clone();
                    // provenance and example only mean something once an
                    // operator confirmed the run
                    if !run.checked {
                        run.provenance = None;
                        run.example = None;
                    }
                }
                by_category.insert(category, runs);
            }
            formats.insert(format_name, by_category);
        }
        Ok(RuleSet { version, formats })
    }

    /// Write the catalog as YAML.
    pub fn save(&self, path: &Path) -> Result<()> {
        tracing::info!(path = %path.display(), "writing rule catalog");
        let file = RuleSetFile {
            version: Some(self.version.clone()),
            formats: self.formats.clone(),
        };
        fs::write(path, serde_yaml::to_string(&file)?)?;
        Ok(())
    }

    /// Runs declared for a format/category; empty when absent.
    pub fn runs(&self, format: &str, category: &str) -> &[Run] {
        self.formats
            .get(format)
            .and_then(|categories| categories.get(category))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn formats(&self) -> impl Iterator<Item = (&str, &IndexMap<String, Vec<Run>>)> {
        self.formats.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn run_mut(&mut self, format: &str, category: &str, index: usize) -> Option<&mut Run> {
        self.formats
            .get_mut(format)
            .and_then(|categories| categories.get_mut(category))
            .and_then(|runs| runs.get_mut(index))
    }

    /// Append a copy of the run under its category. Returns the new
    /// run's index within the category list.
    pub fn append(&mut self, format: &str, run: &Run) -> usize {
        let list = self
            .formats
            .entry(format.to_string())
            .or_default()
            .entry(run.category.clone())
            .or_default();
        list.push(run.clone());
        list.len() - 1
    }

    /// Promotion that leaves `self` untouched: returns a new catalog
    /// handle with the run appended, safe to use while other workers
    /// still read the old handle.
    pub fn promoted(&self, format: &str, run: &Run) -> RuleSet {
        let mut next = self.clone();
        next.append(format, run);
        next
    }

    /// True if an equivalent template is already declared for the format.
    pub fn has_equivalent(&self, format: &str, run: &Run) -> bool {
        self.runs(format, &run.category)
            .iter()
            .any(|existing| existing.is_equivalent(run))
    }

    pub fn count_runs(&self) -> RunCounts {
        let mut counts = RunCounts::default();
        for (_, categories) in self.formats() {
            for runs in categories.values() {
                counts.total += runs.len();
                counts.unchecked += runs.iter().filter(|r| !r.checked).count();
            }
        }
        counts
    }

    /// Post-run integrity sweep: missing suffixes/examples and duplicate
    /// provenance or example bindings. Never run at match time.
    pub fn sanity_check(&self) -> Vec<SanityIssue> {
        let mut issues = Vec::new();
        let mut provenance_counts: IndexMap<&str, usize> = IndexMap::new();
        let mut example_counts: IndexMap<&str, usize> = IndexMap::new();

        for (format, categories) in self.formats() {
            for (category, runs) in categories {
                if category == catalog::IGNORED {
                    continue;
                }
                for (index, run) in runs.iter().enumerate() {
                    if run.suffix.is_empty() {
                        issues.push(SanityIssue::MissingSuffix {
                            format: format.to_string(),
                            category: category.clone(),
                            index,
                        });
                        continue;
                    }
                    if run.example.is_none() {
                        issues.push(SanityIssue::NoExample {
                            format: format.to_string(),
                            category: category.clone(),
                            index,
                        });
                        continue;
                    }
                    if let Some(provenance) = &run.provenance {
                        *provenance_counts.entry(provenance).or_default() += 1;
                    }
                    if let Some(example) = &run.example {
                        *example_counts.entry(example).or_default() += 1;
                    }
                }
            }
        }

        for (provenance, count) in provenance_counts {
            if count > 1 {
                issues.push(SanityIssue::DuplicateProvenance {
                    provenance: provenance.to_string(),
                    count,
                });
            }
        }
        for (example, count) in example_counts {
            if count > 1 {
                issues.push(SanityIssue::DuplicateExample {
                    example: example.to_string(),
                    count,
                });
            }
        }
        issues
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::{MatchValue, Pattern};

    const SAMPLE: &str = r#"
__version__: "0.1.0"
mri:
  func:
    - provenance: /raw/005
      example: func/sub-001_task-rest_bold
      checked: true
      suffix: bold
      attributes:
        SeriesDescription: ".*bold.*"
      bids:
        task: rest
        run: null
  __ignored__:
    - provenance: null
      suffix: ""
      attributes:
        SeriesDescription: "localizer.*"
"#;

    fn write_sample(dir: &Path) -> std::path::PathBuf {
        let path = dir.join("catalog.yaml");
        fs::write(&path, SAMPLE).unwrap();
        path
    }

    #[test]
    fn load_fills_categories() {
        let dir = tempfile::tempdir().unwrap();
        let rs = RuleSet::load(&write_sample(dir.path())).unwrap();
        assert_eq!(rs.version, "0.1.0");
        assert_eq!(rs.runs("mri", "func").len(), 1);
        assert_eq!(rs.runs("mri", catalog::IGNORED).len(), 1);
        assert_eq!(rs.runs("mri", "anat").len(), 0);
        let run = &rs.runs("mri", "func")[0];
        assert_eq!(run.category, "func");
        assert_eq!(run.provenance.as_deref(), Some("/raw/005"));
    }

    #[test]
    fn unchecked_runs_lose_provenance_on_load() {
        let dir = tempfile::tempdir().unwrap();
        let raw = SAMPLE.replace("checked: true", "checked: false");
        let path = dir.path().join("catalog.yaml");
        fs::write(&path, raw).unwrap();
        let rs = RuleSet::load(&path).unwrap();
        let run = &rs.runs("mri", "func")[0];
        assert!(run.provenance.is_none());
        assert!(run.example.is_none());
    }

    #[test]
    fn save_load_roundtrip_keeps_order_and_patterns() {
        let dir = tempfile::tempdir().unwrap();
        let rs = RuleSet::load(&write_sample(dir.path())).unwrap();
        let out = dir.path().join("copy.yaml");
        rs.save(&out).unwrap();
        let again = RuleSet::load(&out).unwrap();
        assert_eq!(again.runs("mri", "func").len(), 1);
        let a = &rs.runs("mri", "func")[0];
        let b = &again.runs("mri", "func")[0];
        assert_eq!(a.attributes, b.attributes);
        assert_eq!(a.entities, b.entities);
        assert_eq!(a.suffix, b.suffix);
    }

    #[test]
    fn promotion_returns_a_new_handle() {
        let dir = tempfile::tempdir().unwrap();
        let rs = RuleSet::load(&write_sample(dir.path())).unwrap();
        let mut run = Run {
            category: "anat".to_string(),
            suffix: "T1w".to_string(),
            ..Run::default()
        };
        run.attributes.insert(
            "SeriesDescription".into(),
            Some(Pattern::One(MatchValue::Str("t1_mprage".into()))),
        );
        let grown = rs.promoted("mri", &run);
        assert_eq!(rs.runs("mri", "anat").len(), 0);
        assert_eq!(grown.runs("mri", "anat").len(), 1);
        assert!(grown.has_equivalent("mri", &run));
        assert!(!rs.has_equivalent("mri", &run));
    }

    #[test]
    fn counts_track_unchecked() {
        let dir = tempfile::tempdir().unwrap();
        let mut rs = RuleSet::load(&write_sample(dir.path())).unwrap();
        assert_eq!(rs.count_runs(), RunCounts { total: 2, unchecked: 1 });
        rs.append("mri", &Run { category: "dwi".into(), ..Run::default() });
        assert_eq!(rs.count_runs(), RunCounts { total: 3, unchecked: 2 });
    }

    #[test]
    fn sanity_flags_duplicates_and_gaps() {
        let mut rs = RuleSet::empty();
        let checked = |suffix: &str, provenance: &str, example: &str| Run {
            category: "func".into(),
            suffix: suffix.into(),
            provenance: Some(provenance.into()),
            example: Some(example.into()),
            checked: true,
            ..Run::default()
        };
        rs.append("mri", &checked("bold", "/raw/a", "func/x"));
        rs.append("mri", &checked("bold", "/raw/a", "func/x"));
        rs.append("mri", &Run {
            category: "func".into(),
            suffix: "bold".into(),
            ..Run::default()
        });
        rs.append("mri", &checked("", "/raw/b", "func/y"));

        let issues = rs.sanity_check();
        assert!(issues.iter().any(|i| matches!(
            i,
            SanityIssue::DuplicateProvenance { count: 2, .. }
        )));
        assert!(issues.iter().any(|i| matches!(
            i,
            SanityIssue::DuplicateExample { count: 2, .. }
        )));
        // run without example (index 2) and run without suffix (index 3)
        assert!(issues.iter().any(|i| matches!(
            i,
            SanityIssue::NoExample { index: 2, .. }
        )));
        assert!(issues.iter().any(|i| matches!(
            i,
            SanityIssue::MissingSuffix { index: 3, .. }
        )));
    }
}
