//! Tiered metadata resolution and export merge
//!
//! Field definitions are selected by manufacturer, validated once
//! against the recording, then merged into the export map in a fixed
//! order: per-run auxiliary overrides first, then category-scoped
//! required/recommended/optional, then the common-scoped tiers. A key
//! already present is never overwritten. Required fields that cannot be
//! resolved export as explicit nulls; they never block the export.

use crate::error::Result;
use crate::meta::defs::{self, COMMON_SCOPE};
use crate::meta::MetaField;
use crate::resolver::{self, Context};
use crate::rules::AuxValue;
use crate::value::Value;
use indexmap::IndexMap;

type ScopedFields = IndexMap<String, IndexMap<String, Option<MetaField>>>;

/// Field slots per tier and scope; a `None` slot is a declared field
/// with no usable definition ("unset").
#[derive(Debug, Default, Clone)]
pub struct MetaFields {
    pub required: ScopedFields,
    pub recommended: ScopedFields,
    pub optional: ScopedFields,
}

impl MetaFields {
    fn tiers_mut(&mut self) -> [&mut ScopedFields; 3] {
        [&mut self.required, &mut self.recommended, &mut self.optional]
    }
}

/// Choose the field definitions governing this recording's format and
/// manufacturer.
pub fn setup_fields(format: &str, manufacturer: &str) -> MetaFields {
    let mut fields = MetaFields::default();
    let decl = match defs::meta_decl(format) {
        Some(decl) => decl,
        None => return fields,
    };

    for (scopes, out) in [
        (decl.required, &mut fields.required),
        (decl.recommended, &mut fields.recommended),
        (decl.optional, &mut fields.optional),
    ] {
        for scope in scopes {
            let slot_map: &mut IndexMap<String, Option<MetaField>> =
                out.entry(scope.scope.to_string()).or_default();
            for name in scope.fields {
                let slot = decl
                    .field_row(manufacturer, name)
                    .map(|(template, default)| MetaField::new(template, default.to_value()));
                slot_map.insert((*name).to_string(), slot);
            }
        }
    }
    fields
}

/// Eagerly resolve every field once and unset the ones that fail.
/// Fields referencing entity labels are left for export time, when the
/// labels exist. Never raises.
pub fn prevalidate(fields: &mut MetaFields, ctx: &mut Context<'_>) {
    for tier in fields.tiers_mut() {
        for slot_map in tier.values_mut() {
            for slot in slot_map.values_mut() {
                let field = match slot {
                    Some(field) if !field.is_deferred() => field,
                    _ => continue,
                };
                let usable = match resolver::resolve(&field.template, ctx, true, false) {
                    Ok(Some(_)) => true,
                    Ok(None) => field.default.is_some(),
                    Err(_) => false,
                };
                if !usable {
                    *slot = None;
                }
            }
        }
    }
}

/// Resolve the matched run's static sidecar overrides.
pub fn auxiliary(
    json: &IndexMap<String, AuxValue>,
    ctx: &mut Context<'_>,
) -> Result<IndexMap<String, Option<Value>>> {
    let mut out = IndexMap::new();
    for (key, aux) in json {
        if key.is_empty() {
            continue;
        }
        let value = match aux {
            AuxValue::One(template) => resolver::resolve(template, ctx, true, false)?,
            AuxValue::Many(templates) => {
                let mut items = Vec::with_capacity(templates.len());
                for template in templates {
                    items.push(
                        resolver::resolve(template, ctx, true, false)?.unwrap_or(Value::Null),
                    );
                }
                Some(Value::List(items))
            }
        };
        out.insert(key.clone(), value);
    }
    Ok(out)
}

/// Merge everything into the export map. First writer wins.
pub fn assemble(
    ctx: &mut Context<'_>,
    fields: &MetaFields,
    auxiliary: &IndexMap<String, Option<Value>>,
    category: &str,
) -> IndexMap<String, serde_json::Value> {
    let mut exp: IndexMap<String, serde_json::Value> = IndexMap::new();

    for (key, value) in auxiliary {
        if let Some(v) = value {
            exp.entry(key.clone()).or_insert_with(|| v.to_json());
        }
    }

    for scope in [category, COMMON_SCOPE] {
        for (tier, required) in [
            (&fields.required, true),
            (&fields.recommended, false),
            (&fields.optional, false),
        ] {
            let slot_map = match tier.get(scope) {
                Some(map) => map,
                None => continue,
            };
            for (key, slot) in slot_map {
                if exp.contains_key(key) {
                    continue;
                }
                let value = slot.as_ref().and_then(|field| resolve_secure(ctx, field));
                if value.is_none() && required {
                    tracing::warn!(
                        recording = %ctx.recording.identity(),
                        field = %key,
                        "required field not set"
                    );
                }
                exp.insert(
                    key.clone(),
                    value.map(|v| v.to_json()).unwrap_or(serde_json::Value::Null),
                );
            }
        }
    }
    exp
}

/// Resolution that cannot fail: errors and missing values fall back to
/// the field default.
fn resolve_secure(ctx: &mut Context<'_>, field: &MetaField) -> Option<Value> {
    let resolved = resolver::resolve(&field.template, ctx, true, false)
        .ok()
        .flatten()
        .filter(|v| !v.is_null());
    match resolved {
        Some(value) => field.apply(value),
        None => field.default.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recording::Recording;
    use crate::session::Session;
    use std::io::Write;
    use std::path::{Path, PathBuf};

    fn write_dump(dir: &Path, name: &str, body: serde_json::Value) -> PathBuf {
        let path = dir.join(name);
        let mut f = std::fs::File::create(&path).unwrap();
        write!(f, "{}", body).unwrap();
        path
    }

    fn fixture(dir: &Path) -> (Recording, Session) {
        let path = write_dump(
            dir,
            "rec.json",
            serde_json::json!({
                "format": "mri",
                "type": "dicom",
                "manufacturer": "SIEMENS",
                "files": ["f.dcm"],
                "attributes": {
                    "Manufacturer": "SIEMENS",
                    "RepetitionTime": 2300,
                    "EchoTime": 30,
                    "FlipAngle": 75,
                    "ReceiveCoilName": "HeadMatrix",
                },
            }),
        );
        let mut rec = Recording::load(&path).unwrap();
        rec.modality = "func".into();
        rec.labels.insert("task".into(), Some("rest".into()));
        rec.suffix = "bold".into();
        let mut session = Session::new();
        session.set_subject(Some("001".into())).unwrap();
        session.set_session(Some(String::new())).unwrap();
        session.lock();
        (rec, session)
    }

    #[test]
    fn export_resolves_tiers_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let (mut rec, session) = fixture(dir.path());
        let manufacturer = rec.manufacturer();
        let mut fields = setup_fields("mri", manufacturer);
        let mut ctx = Context::new(&mut rec, &session);
        prevalidate(&mut fields, &mut ctx);
        let exp = assemble(&mut ctx, &fields, &IndexMap::new(), "func");

        assert_eq!(exp["RepetitionTime"], serde_json::json!(2.3));
        assert_eq!(exp["TaskName"], serde_json::json!("rest"));
        assert_eq!(exp["EchoTime"], serde_json::json!(0.03));
        assert_eq!(exp["Manufacturer"], serde_json::json!("SIEMENS"));
        // category-required keys come before every common key
        let keys: Vec<&String> = exp.keys().collect();
        let rt = keys.iter().position(|k| *k == "RepetitionTime").unwrap();
        let man = keys.iter().position(|k| *k == "Manufacturer").unwrap();
        assert!(rt < man);
    }

    #[test]
    fn auxiliary_wins_over_every_tier() {
        let dir = tempfile::tempdir().unwrap();
        let (mut rec, session) = fixture(dir.path());
        let mut fields = setup_fields("mri", "Siemens");
        let mut aux = IndexMap::new();
        aux.insert("RepetitionTime".to_string(), Some(Value::Float(9.9)));
        aux.insert("SkippedNull".to_string(), None);
        let mut ctx = Context::new(&mut rec, &session);
        prevalidate(&mut fields, &mut ctx);
        let exp = assemble(&mut ctx, &fields, &aux, "func");
        assert_eq!(exp["RepetitionTime"], serde_json::json!(9.9));
        assert!(!exp.contains_key("SkippedNull"));
    }

    #[test]
    fn unresolved_required_field_exports_null() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_dump(
            dir.path(),
            "bare.json",
            serde_json::json!({
                "format": "mri",
                "type": "dicom",
                "files": ["f.dcm"],
                "attributes": {},
            }),
        );
        let mut rec = Recording::load(&path).unwrap();
        rec.modality = "fmap".into();
        let session = Session::new();
        let mut fields = setup_fields("mri", rec.manufacturer());
        let mut ctx = Context::new(&mut rec, &session);
        prevalidate(&mut fields, &mut ctx);
        let exp = assemble(&mut ctx, &fields, &IndexMap::new(), "fmap");
        assert_eq!(exp["EchoTime"], serde_json::Value::Null);
    }

    #[test]
    fn prevalidation_keeps_deferred_and_defaulted_fields() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_dump(
            dir.path(),
            "eeg.json",
            serde_json::json!({
                "format": "eeg",
                "type": "edf",
                "files": ["f.edf"],
                "attributes": {
                    "SamplingFrequency": 500,
                    "ChannelCount": "64",
                },
            }),
        );
        let mut rec = Recording::load(&path).unwrap();
        rec.modality = "eeg".into();
        rec.labels.insert("task".into(), Some("oddball".into()));
        let session = Session::new();
        let mut fields = setup_fields("eeg", rec.manufacturer());
        let mut ctx = Context::new(&mut rec, &session);
        prevalidate(&mut fields, &mut ctx);
        // TaskName is deferred (bids label), PowerLineFrequency survives
        // through its default, Duration is unset
        assert!(fields.required["eeg"]["TaskName"].is_some());
        assert!(fields.required["eeg"]["PowerLineFrequency"].is_some());
        assert!(fields.recommended[COMMON_SCOPE]["RecordingDuration"].is_none());

        let exp = assemble(&mut ctx, &fields, &IndexMap::new(), "eeg");
        assert_eq!(exp["TaskName"], serde_json::json!("oddball"));
        assert_eq!(exp["PowerLineFrequency"], serde_json::json!(50));
        assert_eq!(exp["EEGChannelCount"], serde_json::json!(64));
        assert_eq!(exp["RecordingDuration"], serde_json::Value::Null);
    }

    #[test]
    fn auxiliary_lists_resolve_elementwise() {
        let dir = tempfile::tempdir().unwrap();
        let (mut rec, session) = fixture(dir.path());
        let mut json = IndexMap::new();
        json.insert(
            "EchoTimes".to_string(),
            AuxValue::Many(vec!["<EchoTime>".to_string(), "<NoSuchTag>".to_string()]),
        );
        let mut ctx = Context::new(&mut rec, &session);
        let aux = auxiliary(&json, &mut ctx).unwrap();
        assert_eq!(
            aux["EchoTimes"],
            Some(Value::List(vec![Value::Int(30), Value::Null]))
        );
    }
}
