//! Decoded recording container
//!
//! Format decoders are external: they emit one JSON attribute dump per
//! recording series (format identity, manufacturer line, acquisition
//! time, file list, nested attribute tree). This module loads the dump
//! into a closed value type with a small capability surface: path
//! lookup, identity, cached attribute access.

use crate::catalog::{self, FormatSpec, UNCLASSIFIED};
use crate::error::{CurateError, ResolveError, Result};
use crate::resolver::actions;
use crate::value::Value;
use chrono::NaiveDateTime;
use indexmap::IndexMap;
use serde::Deserialize;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

/// On-disk shape of a decoded recording dump.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RecordingDump {
    format: String,
    #[serde(rename = "type")]
    source_type: String,
    #[serde(default)]
    manufacturer: Option<String>,
    #[serde(default)]
    acq_time: Option<String>,
    #[serde(default)]
    rec_no: Option<i64>,
    #[serde(default)]
    rec_id: Option<String>,
    /// Payload file adjacent to the dump, copied into the archive
    #[serde(default)]
    data_file: Option<String>,
    #[serde(default)]
    files: Vec<String>,
    attributes: serde_json::Value,
}

/// One loaded recording plus the naming state bound to it after a match.
#[derive(Debug, Clone)]
pub struct Recording {
    format: &'static FormatSpec,
    source_type: String,
    path: PathBuf,
    data_file: Option<String>,
    files: Vec<String>,
    index: usize,
    attributes: Value,
    cache: HashMap<String, Option<Value>>,
    manufacturer: &'static str,
    acq_time: Option<NaiveDateTime>,
    rec_no: Option<i64>,
    rec_id: Option<String>,
    /// User-attached scratch values, addressed by the `custom:` namespace
    pub custom: IndexMap<String, Value>,
    /// Category bound by the matcher; starts unclassified
    pub modality: String,
    /// Entity labels bound by the matcher, in author-declared order
    pub labels: IndexMap<String, Option<String>>,
    /// Resolved run suffix
    pub suffix: String,
}

impl Recording {
    /// Load a decoded recording dump from disk.
    pub fn load(path: &Path) -> Result<Recording> {
        let raw = fs::read_to_string(path)?;
        let dump: RecordingDump = serde_json::from_str(&raw)?;
        let format = catalog::format_spec(&dump.format)
            .ok_or_else(|| CurateError::UnknownFormat(dump.format.clone()))?;
        let manufacturer = format.manufacturer(dump.manufacturer.as_deref());
        let acq_time = dump.acq_time.as_deref().and_then(parse_datetime);
        if dump.acq_time.is_some() && acq_time.is_none() {
            tracing::warn!(
                path = %path.display(),
                "unparseable acquisition time in dump"
            );
        }

        Ok(Recording {
            format,
            source_type: dump.source_type,
            path: path.to_path_buf(),
            data_file: dump.data_file,
            files: dump.files,
            index: 0,
            attributes: Value::from_json(&dump.attributes),
            cache: HashMap::new(),
            manufacturer,
            acq_time,
            rec_no: dump.rec_no,
            rec_id: dump.rec_id,
            custom: IndexMap::new(),
            modality: UNCLASSIFIED.to_string(),
            labels: IndexMap::new(),
            suffix: String::new(),
        })
    }

    pub fn format(&self) -> &'static FormatSpec {
        self.format
    }

    /// Identification string in form `{format}/{type}`.
    pub fn format_identity(&self) -> String {
        format!("{}/{}", self.format.name, self.source_type)
    }

    pub fn manufacturer(&self) -> &'static str {
        self.manufacturer
    }

    pub fn acq_time(&self) -> Option<NaiveDateTime> {
        self.acq_time
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Payload file adjacent to the dump, if the decoder recorded one.
    pub fn data_file(&self) -> Option<&str> {
        self.data_file.as_deref()
    }

    pub fn file_count(&self) -> usize {
        self.files.len()
    }

    pub fn file_index(&self) -> usize {
        self.index
    }

    /// Basename of the current file in the series, falling back to the
    /// dump file itself for single-artifact decoders.
    pub fn current_file(&self) -> Result<&str> {
        if let Some(name) = self.files.get(self.index) {
            return Ok(name);
        }
        self.path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or(CurateError::NoCurrentFile)
    }

    /// Identification string for diagnostics: `{recNo}-{recId}/{index}`.
    pub fn identity(&self) -> String {
        match (&self.rec_no, &self.rec_id) {
            (Some(no), Some(id)) => format!("{:03}-{}/{}", no, id, self.index),
            _ => self
                .current_file()
                .map(str::to_string)
                .unwrap_or_else(|_| self.path.display().to_string()),
        }
    }

    /// Retrieve a field by query string: zero or more `:`-separated
    /// action prefixes followed by a `/`-separated path. Actions apply
    /// right-to-left; a transform applied to an unsupported value fails
    /// the whole retrieval.
    pub fn get_field(&self, query: &str) -> std::result::Result<Option<Value>, ResolveError> {
        let (action_list, path) = match query.rsplit_once(':') {
            Some((prefixes, path)) => (prefixes.split(':').collect::<Vec<_>>(), path),
            None => (Vec::new(), query),
        };

        let mut value = match self.attributes.lookup(path) {
            Some(v) if !v.is_null() => v.clone(),
            _ => return Ok(None),
        };

        for action in action_list.iter().rev() {
            value = apply_elementwise(&value, action)?;
        }
        if let Value::Str(s) = &value {
            value = Value::Str(s.trim().to_string());
        }
        Ok(Some(value))
    }

    /// Cached field access: the first retrieval of a query is memoized
    /// for the lifetime of the loaded recording.
    pub fn get_attribute(&mut self, query: &str) -> std::result::Result<Option<Value>, ResolveError> {
        if let Some(cached) = self.cache.get(query) {
            return Ok(cached.clone());
        }
        let value = self.get_field(query)?;
        self.cache.insert(query.to_string(), value.clone());
        Ok(value)
    }

    pub fn set_attribute(&mut self, query: &str, value: Option<Value>) {
        self.cache.insert(query.to_string(), value);
    }

    /// Attributes touched so far, in deterministic order. Used to build
    /// the synthetic run for an unclassified recording.
    pub fn touched_attributes(&self) -> IndexMap<String, Option<Value>> {
        let mut keys: Vec<&String> = self.cache.keys().collect();
        keys.sort();
        keys.into_iter()
            .map(|k| (k.clone(), self.cache.get(k).cloned().flatten()))
            .collect()
    }
}

fn apply_elementwise(value: &Value, action: &str) -> std::result::Result<Value, ResolveError> {
    match value {
        Value::List(items) => {
            let mut out = Vec::with_capacity(items.len());
            for item in items {
                out.push(apply_elementwise(item, action)?);
            }
            Ok(Value::List(out))
        }
        Value::Map(map) => {
            let mut out = IndexMap::with_capacity(map.len());
            for (k, v) in map {
                out.insert(k.clone(), apply_elementwise(v, action)?);
            }
            Ok(Value::Map(out))
        }
        _ => actions::action_value(value, action),
    }
}

fn parse_datetime(raw: &str) -> Option<NaiveDateTime> {
    for fmt in [
        "%Y-%m-%dT%H:%M:%S%.f",
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y-%m-%dT%H:%M:%S",
        "%Y-%m-%d %H:%M:%S",
    ] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(raw, fmt) {
            return Some(dt);
        }
    }
    None
}
