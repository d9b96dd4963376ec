//! Tabular companion records
//!
//! One row per archived artifact (or per subject), tab-separated with
//! `n/a` for nulls, written next to a JSON sidecar that defines the
//! columns.

use crate::error::Result;
use crate::value::Value;
use indexmap::IndexMap;
use serde::Serialize;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;

/// Definition of one column, mirrored into the definitions sidecar.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ColumnDef {
    #[serde(skip)]
    pub name: String,
    #[serde(rename = "LongName", skip_serializing_if = "String::is_empty")]
    pub long_name: String,
    #[serde(rename = "Description", skip_serializing_if = "String::is_empty")]
    pub description: String,
    #[serde(rename = "Levels", skip_serializing_if = "IndexMap::is_empty")]
    pub levels: IndexMap<String, String>,
    #[serde(rename = "Units", skip_serializing_if = "String::is_empty")]
    pub units: String,
    #[serde(rename = "TermURL", skip_serializing_if = "String::is_empty")]
    pub url: String,
}

impl ColumnDef {
    pub fn new(name: &str, long_name: &str, description: &str) -> ColumnDef {
        ColumnDef {
            name: name.to_string(),
            long_name: long_name.to_string(),
            description: description.to_string(),
            ..ColumnDef::default()
        }
    }

    pub fn with_units(mut self, units: &str) -> ColumnDef {
        self.units = units.to_string();
        self
    }

    pub fn with_levels(mut self, levels: &[(&str, &str)]) -> ColumnDef {
        self.levels = levels
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        self
    }
}

/// Ordered library of columns for one table.
#[derive(Debug, Clone, Default)]
pub struct FieldLibrary {
    columns: Vec<ColumnDef>,
}

impl FieldLibrary {
    pub fn new() -> FieldLibrary {
        FieldLibrary::default()
    }

    pub fn add_field(&mut self, column: ColumnDef) {
        if self.columns.iter().any(|c| c.name == column.name) {
            tracing::warn!(column = %column.name, "column already defined");
            return;
        }
        self.columns.push(column);
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|c| c.name.as_str())
    }

    /// Empty row keyed by column, for callers to fill.
    pub fn template(&self) -> IndexMap<String, Option<Value>> {
        self.names().map(|n| (n.to_string(), None)).collect()
    }

    pub fn header(&self) -> String {
        self.names().collect::<Vec<_>>().join("\t")
    }

    /// Tab-separated row; values are looked up by column name and
    /// normalized, absent columns render `n/a`.
    pub fn line(&self, values: &IndexMap<String, Option<Value>>) -> String {
        self.names()
            .map(|name| normalize(values.get(name).and_then(Option::as_ref)))
            .collect::<Vec<_>>()
            .join("\t")
    }

    /// Append one row, creating the file with its header line and the
    /// paired column-definition sidecar on first write.
    pub fn append_row(
        &self,
        tsv_path: &Path,
        values: &IndexMap<String, Option<Value>>,
    ) -> Result<()> {
        let fresh = !tsv_path.exists();
        let mut file = OpenOptions::new().create(true).append(true).open(tsv_path)?;
        if fresh {
            writeln!(file, "{}", self.header())?;
        }
        writeln!(file, "{}", self.line(values))?;
        if fresh {
            self.dump_definitions(&tsv_path.with_extension("json"))?;
        }
        Ok(())
    }

    /// Write the column definitions as a JSON sidecar.
    pub fn dump_definitions(&self, path: &Path) -> Result<()> {
        let map: IndexMap<&str, &ColumnDef> =
            self.columns.iter().map(|c| (c.name.as_str(), c)).collect();
        let body = serde_json::to_string_pretty(&map)?;
        std::fs::write(path, body)?;
        Ok(())
    }
}

/// Adapt a value to the tabular format: nulls and empty strings become
/// `n/a`, datetimes ISO-8601, embedded tabs and newlines spaces.
pub fn normalize(value: Option<&Value>) -> String {
    let value = match value {
        None | Some(Value::Null) => return "n/a".to_string(),
        Some(v) => v,
    };
    let rendered = match value {
        Value::DateTime(dt) => dt.format("%Y-%m-%dT%H:%M:%S").to_string(),
        other => other.to_string().replace(['\t', '\n'], " "),
    };
    if rendered.is_empty() {
        "n/a".to_string()
    } else {
        rendered
    }
}

/// Columns of the per-session recordings table.
pub fn recording_fields() -> FieldLibrary {
    let mut lib = FieldLibrary::new();
    lib.add_field(ColumnDef::new(
        "filename",
        "File Name",
        "Path to the archived recording",
    ));
    lib.add_field(ColumnDef::new(
        "acq_time",
        "Acquisition time",
        "Time corresponding to the first data taken during the recording",
    ));
    lib
}

/// Columns of the subject-level participants table.
pub fn subject_fields() -> FieldLibrary {
    let mut lib = FieldLibrary::new();
    lib.add_field(ColumnDef::new(
        "participant_id",
        "Participant Id",
        "label identifying a particular subject",
    ));
    lib.add_field(
        ColumnDef::new("age", "Age", "Age of a subject").with_units("year"),
    );
    lib.add_field(
        ColumnDef::new("sex", "Sex", "Sex of a subject")
            .with_levels(&[("F", "Female"), ("M", "Male")]),
    );
    lib
}
