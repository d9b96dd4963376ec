//! Static catalog of source formats, output categories and manufacturers
//!
//! The catalog is data, not behavior: each format family declares its
//! ordered category list (the match order used by the rule matcher) and,
//! per category, the ordered entity-key set (the canonical naming order).
//! Two pseudo-categories are reserved: recordings explicitly excluded
//! from output, and recordings no rule matched.

/// Reserved category for recordings excluded from the archive.
pub const IGNORED: &str = "__ignored__";
/// Reserved category for recordings no rule matched.
pub const UNCLASSIFIED: &str = "__unclassified__";

/// Fallback manufacturer name.
pub const UNKNOWN_MANUFACTURER: &str = "Unknown";

#[derive(Debug)]
pub struct CategorySpec {
    pub name: &'static str,
    /// Canonical entity-key order for names in this category
    pub entities: &'static [&'static str],
}

#[derive(Debug)]
pub struct FormatSpec {
    pub name: &'static str,
    /// Categories in match order
    pub categories: &'static [CategorySpec],
    /// Lowercase needle -> canonical manufacturer name
    pub manufacturers: &'static [(&'static str, &'static str)],
}

impl FormatSpec {
    pub fn category(&self, name: &str) -> Option<&CategorySpec> {
        self.categories.iter().find(|c| c.name == name)
    }

    pub fn is_valid_category(&self, name: &str, include_ignored: bool) -> bool {
        (include_ignored && name == IGNORED) || self.category(name).is_some()
    }

    /// Case-insensitive substring lookup of a raw vendor line against the
    /// known-manufacturer table.
    pub fn manufacturer(&self, raw: Option<&str>) -> &'static str {
        if let Some(line) = raw {
            let line = line.to_lowercase();
            for (needle, canonical) in self.manufacturers {
                if line.contains(needle) {
                    return canonical;
                }
            }
        }
        UNKNOWN_MANUFACTURER
    }
}

static MRI: FormatSpec = FormatSpec {
    name: "mri",
    categories: &[
        CategorySpec {
            name: "anat",
            entities: &["acq", "ce", "rec", "run", "mod"],
        },
        CategorySpec {
            name: "func",
            entities: &["task", "acq", "ce", "dir", "rec", "run", "echo"],
        },
        CategorySpec {
            name: "dwi",
            entities: &["acq", "dir", "run"],
        },
        CategorySpec {
            name: "fmap",
            entities: &["acq", "ce", "dir", "run"],
        },
    ],
    manufacturers: &[
        ("siemens", "Siemens"),
        ("philips", "Philips"),
        ("general electric", "GE"),
        ("ge medical", "GE"),
        ("bruker", "Bruker"),
    ],
};

static EEG: FormatSpec = FormatSpec {
    name: "eeg",
    categories: &[CategorySpec {
        name: "eeg",
        entities: &["task", "acq", "run"],
    }],
    manufacturers: &[
        ("brainproducts", "BrainProducts"),
        ("brain products", "BrainProducts"),
        ("biosemi", "BioSemi"),
        ("ant neuro", "ANT"),
    ],
};

static FORMATS: &[&FormatSpec] = &[&MRI, &EEG];

pub fn format_spec(name: &str) -> Option<&'static FormatSpec> {
    FORMATS.iter().copied().find(|f| f.name == name)
}

pub fn format_names() -> impl Iterator<Item = &'static str> {
    FORMATS.iter().map(|f| f.name)
}

pub fn is_pseudo_category(name: &str) -> bool {
    name == IGNORED || name == UNCLASSIFIED
}
