//! Template resolution
//!
//! Templates are scanned left-to-right for two placeholder forms:
//! `<query>` retrieves a (possibly action-prefixed) attribute from the
//! recording; `<<namespace:key>>` retrieves a characteristic, an entity
//! label, a custom value, a tabular value or a filename capture. With
//! `raw` set and the template being exactly one placeholder, the
//! natively-typed value is returned; otherwise resolved values are
//! stringified and spliced between the surrounding literal text.

pub mod actions;

use crate::error::ResolveError;
use crate::naming;
use crate::recording::Recording;
use crate::session::Session;
use crate::value::Value;
use regex::Regex;

/// Everything a template may refer to during resolution.
pub struct Context<'a> {
    pub recording: &'a mut Recording,
    pub session: &'a Session,
}

impl<'a> Context<'a> {
    pub fn new(recording: &'a mut Recording, session: &'a Session) -> Self {
        Self { recording, session }
    }
}

/// Resolve a template. Returns `None` only in raw mode, when the single
/// placeholder the template consists of cannot be resolved.
pub fn resolve(
    template: &str,
    ctx: &mut Context<'_>,
    raw: bool,
    cleanup: bool,
) -> Result<Option<Value>, ResolveError> {
    let mut res = String::new();
    let mut start = 0;

    while start < template.len() {
        let pos = match template[start..].find('<') {
            Some(off) => start + off,
            None => {
                res.push_str(&template[start..]);
                break;
            }
        };
        res.push_str(&template[start..pos]);

        let double = template[pos + 1..].starts_with('<');
        let (qstart, seek) = if double { (pos + 2, ">>") } else { (pos + 1, ">") };
        let qend = match template[qstart..].find(seek) {
            Some(off) => qstart + off,
            None => {
                return Err(ResolveError::Unterminated {
                    template: template.to_string(),
                    seek,
                })
            }
        };
        let query = &template[qstart..qend];
        let end = qend + seek.len();

        let value = if double {
            resolve_double(query, ctx, raw)?
        } else {
            match ctx.recording.get_attribute(query)? {
                Some(v) => Some(v),
                None => {
                    tracing::warn!(
                        recording = %ctx.recording.identity(),
                        query,
                        template,
                        "attribute not found"
                    );
                    missing(query, raw)
                }
            }
        };

        // A template that is exactly one placeholder threads the native
        // type through untouched.
        if raw && pos == 0 && end == template.len() {
            return Ok(value);
        }
        if let Some(v) = value {
            res.push_str(&v.to_string());
        }
        start = end;
    }

    if cleanup {
        res = naming::cleanup(&res, "");
    }
    Ok(Some(Value::Str(res)))
}

/// Resolve a template to a string, substituting literals for anything
/// unresolved.
pub fn resolve_string(
    template: &str,
    ctx: &mut Context<'_>,
    cleanup: bool,
) -> Result<String, ResolveError> {
    Ok(resolve(template, ctx, false, cleanup)?
        .map(|v| v.to_string())
        .unwrap_or_default())
}

fn missing(query: &str, raw: bool) -> Option<Value> {
    if raw {
        None
    } else {
        Some(Value::Str(query.to_string()))
    }
}

fn resolve_double(
    query: &str,
    ctx: &mut Context<'_>,
    raw: bool,
) -> Result<Option<Value>, ResolveError> {
    let (namespace, key) = match query.split_once(':') {
        Some((ns, key)) => (ns, key),
        None => return characteristic(query, ctx),
    };

    match namespace {
        "bids" => match ctx.recording.labels.get(key) {
            Some(Some(label)) => Ok(Some(Value::Str(label.clone()))),
            Some(None) => Ok(Some(Value::Null)),
            None => Err(ResolveError::UnknownLabel(key.to_string())),
        },
        "custom" => match ctx.recording.custom.get(key) {
            Some(v) => Ok(Some(v.clone())),
            None => Err(ResolveError::UnknownCustom(key.to_string())),
        },
        "sub_tsv" => match ctx.session.sub_values.get(key) {
            Some(Some(v)) => Ok(Some(v.clone())),
            Some(None) => Ok(Some(Value::Null)),
            None => Err(ResolveError::UnknownTabular(format!("sub_tsv:{}", key))),
        },
        "rec_tsv" => match ctx.session.rec_values.get(key) {
            Some(Some(v)) => Ok(Some(v.clone())),
            Some(None) => Ok(Some(Value::Null)),
            None => Err(ResolveError::UnknownTabular(format!("rec_tsv:{}", key))),
        },
        "fname" => {
            let fname = ctx.recording.current_file().map_err(|_| {
                ResolveError::UnknownTabular(format!("fname:{}", key))
            })?;
            let pattern = format!("{}-([a-zA-Z0-9]+)", regex::escape(key));
            let re = Regex::new(&pattern).expect("escaped capture pattern is valid");
            match re.captures(fname) {
                Some(caps) => Ok(Some(Value::Str(caps[1].to_string()))),
                None => {
                    tracing::warn!(
                        recording = %ctx.recording.identity(),
                        key,
                        fname,
                        "filename capture not found"
                    );
                    Ok(missing(query, raw))
                }
            }
        }
        other => Err(ResolveError::UnknownNamespace(other.to_string())),
    }
}

/// Fixed recording/session characteristics; an unprefixed name that is
/// not a characteristic falls back to the bound entity label of that
/// name.
fn characteristic(name: &str, ctx: &mut Context<'_>) -> Result<Option<Value>, ResolveError> {
    let value = match name {
        "subject" => ctx.session.subject().map(Value::from),
        "session" => ctx.session.session().map(Value::from),
        "modality" => Some(Value::from(ctx.recording.modality.as_str())),
        "index" => Some(Value::Int(ctx.recording.file_index() as i64 + 1)),
        "count" | "nfiles" => Some(Value::Int(ctx.recording.file_count() as i64)),
        "filename" => ctx.recording.current_file().ok().map(Value::from),
        "suffix" => Some(Value::from(ctx.recording.suffix.as_str())),
        "module" => Some(Value::from(ctx.recording.format().name)),
        "placeholder" => {
            tracing::warn!(
                recording = %ctx.recording.identity(),
                "placeholder found"
            );
            Some(Value::Str("<<placeholder>>".to_string()))
        }
        other => match ctx.recording.labels.get(other) {
            Some(Some(label)) => Some(Value::Str(label.clone())),
            Some(None) => Some(Value::Null),
            None => return Err(ResolveError::UnknownCharacteristic(other.to_string())),
        },
    };
    Ok(value.or(Some(Value::Null)))
}
