//! Archive driver
//!
//! Walks a prepared source tree (`sub-*/ses-*/<format>/<dump>.json`),
//! classifies each decoded recording, builds its canonical name and
//! writes the renamed artifact, its metadata sidecar and the tabular
//! companion rows into the destination tree. Errors abort only the
//! recording that raised them, never its siblings.

use crate::error::{CurateError, Result};
use crate::meta::assembler;
use crate::naming;
use crate::recording::Recording;
use crate::resolver::Context;
use crate::rules::matcher;
use crate::rules::ruleset::RuleSet;
use crate::session::Session;
use crate::table::{self, FieldLibrary};
use crate::value::Value;
use crate::catalog;
use std::fs;
use std::path::{Path, PathBuf};

pub struct CurateOptions<'a> {
    pub source: &'a Path,
    pub destination: &'a Path,
    pub ruleset: &'a Path,
    /// Subject-id expression; defaults to the subject directory name.
    /// May contain placeholders resolved against the group's first
    /// recording, e.g. `<PatientID>`.
    pub subject: Option<String>,
    /// Session-id expression; defaults to the session directory name.
    pub session: Option<String>,
    pub dry_run: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct CurateSummary {
    pub archived: usize,
    pub ignored: usize,
    pub unclassified: usize,
    pub failed: usize,
}

enum Disposition {
    Archived,
    Ignored,
    Unclassified,
}

/// Curate a prepared source tree into the destination archive.
pub fn curate(opts: &CurateOptions<'_>) -> Result<CurateSummary> {
    tracing::info!(
        source = %opts.source.display(),
        destination = %opts.destination.display(),
        "curating"
    );
    let ruleset = RuleSet::load(opts.ruleset)?;
    let counts = ruleset.count_runs();
    if counts.unchecked > 0 {
        return Err(CurateError::MalformedRuleSet(format!(
            "{} unchecked runs in catalog",
            counts.unchecked
        )));
    }
    if !opts.dry_run {
        fs::create_dir_all(opts.destination)?;
    }

    let sub_lib = table::subject_fields();
    let rec_lib = table::recording_fields();
    let mut summary = CurateSummary::default();

    for sub_dir in lsdirs(opts.source, "sub-")? {
        let sub_name = dir_name(&sub_dir);
        let mut session = Session::new();
        session.in_path = Some(sub_dir.clone());

        let mut ses_dirs = lsdirs(&sub_dir, "ses-")?;
        if ses_dirs.is_empty() {
            // single-session layout: recordings sit directly under the subject
            ses_dirs.push(sub_dir.clone());
        }
        for ses_dir in ses_dirs {
            let ses_name = if ses_dir == sub_dir {
                String::new()
            } else {
                dir_name(&ses_dir)
            };
            session.in_path = Some(ses_dir.clone());
            session.unlock_subject();
            session.unlock_session();
            let sub_expr = opts.subject.clone().unwrap_or_else(|| sub_name.clone());
            let ses_expr = opts.session.clone().unwrap_or_else(|| ses_name.clone());
            if let Err(e) = resolve_session_ids(&mut session, &ses_dir, &sub_expr, &ses_expr) {
                tracing::error!(
                    subject = %sub_name,
                    error = %e,
                    "could not determine group identity, group skipped"
                );
                summary.failed += 1;
                continue;
            }
            session.lock();
            if !session.is_valid() {
                tracing::error!(subject = %sub_name, "invalid subject Id, group skipped");
                continue;
            }
            session
                .sub_values
                .insert("participant_id".into(), session.subject().map(Value::from));

            process_group(&session, &ses_dir, &ruleset, opts, &rec_lib, &mut summary);
        }

        if !opts.dry_run && session.subject().is_some_and(|s| !s.is_empty()) {
            let mut row = sub_lib.template();
            for (key, value) in &session.sub_values {
                row.insert(key.clone(), value.clone());
            }
            sub_lib.append_row(&opts.destination.join("participants.tsv"), &row)?;
        }
    }

    tracing::info!(?summary, "curation finished");
    Ok(summary)
}

/// Populate the session's subject/session Ids from the configured
/// expressions. Plain names pass straight through; expressions with
/// placeholders are resolved against the group's first recording, with
/// a capture from the current file name as fallback.
fn resolve_session_ids(
    session: &mut Session,
    ses_dir: &Path,
    sub_expr: &str,
    ses_expr: &str,
) -> Result<()> {
    if !sub_expr.contains('<') && !ses_expr.contains('<') {
        session.set_subject(Some(sub_expr.to_string()))?;
        session.set_session(Some(ses_expr.to_string()))?;
        return Ok(());
    }

    let dump = first_dump(ses_dir)?
        .ok_or_else(|| CurateError::InvalidSubject(sub_expr.to_string()))?;
    let mut recording = Recording::load(&dump)?;
    let subject = derive_id(sub_expr, "sub-", &mut recording, session)?;
    let ses = derive_id(ses_expr, "ses-", &mut recording, session)?;
    session.set_subject(Some(subject))?;
    session.set_session(Some(ses))?;
    Ok(())
}

/// Resolve one id expression; an empty result falls back to a
/// `prefix-([A-Za-z0-9]+)` capture from the recording's current file.
fn derive_id(
    expr: &str,
    prefix: &str,
    recording: &mut Recording,
    session: &Session,
) -> Result<String> {
    let resolved = if expr.contains('<') {
        let mut ctx = Context::new(recording, session);
        crate::resolver::resolve_string(expr, &mut ctx, false)?
    } else {
        expr.to_string()
    };
    if !resolved.is_empty() && resolved != prefix {
        return Ok(resolved);
    }
    let re = regex::Regex::new(&format!("{}([a-zA-Z0-9]+)", prefix))
        .expect("static capture pattern is valid");
    match re.captures(recording.current_file()?) {
        Some(caps) => Ok(format!("{}{}", prefix, &caps[1])),
        None => Ok(resolved),
    }
}

/// First decoded dump of the group, scanning format directories in
/// catalog order.
fn first_dump(ses_dir: &Path) -> Result<Option<PathBuf>> {
    for format_name in catalog::format_names() {
        let format_dir = ses_dir.join(format_name);
        if !format_dir.is_dir() {
            continue;
        }
        let mut dumps: Vec<PathBuf> = fs::read_dir(&format_dir)?
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| p.extension().is_some_and(|e| e == "json"))
            .collect();
        dumps.sort();
        if let Some(first) = dumps.into_iter().next() {
            return Ok(Some(first));
        }
    }
    Ok(None)
}

/// Process every recording of one subject/session group; a failed
/// recording is reported and counted, its siblings continue.
fn process_group(
    session: &Session,
    ses_dir: &Path,
    ruleset: &RuleSet,
    opts: &CurateOptions<'_>,
    rec_lib: &FieldLibrary,
    summary: &mut CurateSummary,
) {
    for format_name in catalog::format_names() {
        let format_dir = ses_dir.join(format_name);
        if !format_dir.is_dir() {
            continue;
        }
        let mut dumps: Vec<PathBuf> = match fs::read_dir(&format_dir) {
            Ok(entries) => entries
                .filter_map(|e| e.ok())
                .map(|e| e.path())
                .filter(|p| p.extension().is_some_and(|e| e == "json"))
                .collect(),
            Err(e) => {
                tracing::error!(dir = %format_dir.display(), error = %e, "unreadable format directory");
                summary.failed += 1;
                continue;
            }
        };
        dumps.sort();

        for dump in dumps {
            match process_recording(session, &dump, ruleset, opts, rec_lib) {
                Ok(Disposition::Archived) => summary.archived += 1,
                Ok(Disposition::Ignored) => summary.ignored += 1,
                Ok(Disposition::Unclassified) => summary.unclassified += 1,
                Err(e) => {
                    tracing::error!(
                        subject = session.subject().unwrap_or("?"),
                        session = session.session().unwrap_or("?"),
                        file = %dump.display(),
                        error = %e,
                        "recording aborted"
                    );
                    summary.failed += 1;
                }
            }
        }
    }
}

fn process_recording(
    session: &Session,
    dump: &Path,
    ruleset: &RuleSet,
    opts: &CurateOptions<'_>,
    rec_lib: &FieldLibrary,
) -> Result<Disposition> {
    let mut recording = Recording::load(dump)?;

    let outcome = {
        let mut ctx = Context::new(&mut recording, session);
        matcher::match_recording(&mut ctx, ruleset, true)?
    };
    if outcome.is_ignored() {
        tracing::info!(
            subject = session.subject().unwrap_or("?"),
            recording = %recording.identity(),
            "recording excluded from output"
        );
        return Ok(Disposition::Ignored);
    }
    if outcome.is_unclassified() {
        tracing::error!(
            subject = session.subject().unwrap_or("?"),
            session = session.session().unwrap_or("?"),
            recording = %recording.identity(),
            file = %dump.display(),
            "no run matched the recording"
        );
        return Ok(Disposition::Unclassified);
    }

    let format = recording.format();
    let category = outcome.category.clone();
    let spec = format.category(&category).ok_or_else(|| {
        CurateError::UnknownCategory {
            format: format.name.to_string(),
            category: category.clone(),
        }
    })?;
    let name = naming::build(session, spec.entities, &recording.labels, &recording.suffix)?;

    let mut fields = assembler::setup_fields(format.name, recording.manufacturer());
    let export = {
        let mut ctx = Context::new(&mut recording, session);
        assembler::prevalidate(&mut fields, &mut ctx);
        let aux = assembler::auxiliary(&outcome.run.json, &mut ctx)?;
        assembler::assemble(&mut ctx, &fields, &aux, &category)
    };

    let outdir = opts
        .destination
        .join(session.rel_path()?)
        .join(&category);
    let payload = recording
        .data_file()
        .map(|f| (dump.parent().unwrap_or(Path::new(".")).join(f), payload_ext(f)));
    let sidecar = outdir.join(format!("{}.json", name));
    let target = payload
        .as_ref()
        .map(|(_, ext)| outdir.join(format!("{}{}", name, ext)));

    // the destination namespace is at-most-once; an existing name is a
    // hard conflict, never silently overwritten
    if sidecar.exists() || target.as_ref().is_some_and(|t| t.exists()) {
        return Err(CurateError::NameCollision(sidecar.display().to_string()));
    }

    tracing::debug!(
        recording = %recording.identity(),
        name = %name,
        category = %category,
        "archiving"
    );
    if opts.dry_run {
        return Ok(Disposition::Archived);
    }

    fs::create_dir_all(&outdir)?;
    if let Some((source, ext)) = &payload {
        fs::copy(source, outdir.join(format!("{}{}", name, ext)))?;
    }
    write_sidecar(&sidecar, &export)?;

    let mut row = rec_lib.template();
    let archived_name = match &payload {
        Some((_, ext)) => format!("{}/{}{}", category, name, ext),
        None => format!("{}/{}.json", category, name),
    };
    row.insert("filename".into(), Some(Value::Str(archived_name)));
    row.insert("acq_time".into(), recording.acq_time().map(Value::DateTime));
    let tsv = opts
        .destination
        .join(session.rel_path()?)
        .join(format!("{}_recordings.tsv", session.prefix('_')?));
    rec_lib.append_row(&tsv, &row)?;

    Ok(Disposition::Archived)
}

/// Sidecar JSON next to the artifact; null values are elided at the
/// file layer.
fn write_sidecar(
    path: &Path,
    export: &indexmap::IndexMap<String, serde_json::Value>,
) -> Result<()> {
    let body: indexmap::IndexMap<&String, &serde_json::Value> = export
        .iter()
        .filter(|(_, v)| !v.is_null())
        .collect();
    fs::write(path, serde_json::to_string_pretty(&body)?)?;
    Ok(())
}

/// Compound extension of a payload file, e.g. `.nii.gz`.
fn payload_ext(file_name: &str) -> String {
    match file_name.split_once('.') {
        Some((_, rest)) => format!(".{}", rest),
        None => String::new(),
    }
}

/// Sorted subdirectories with the given name prefix.
fn lsdirs(folder: &Path, prefix: &str) -> Result<Vec<PathBuf>> {
    let mut dirs: Vec<PathBuf> = fs::read_dir(folder)?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.is_dir() && dir_name(p).starts_with(prefix))
        .collect();
    dirs.sort();
    Ok(dirs)
}

fn dir_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

// ============================================================================
// Template mapping
// ============================================================================

pub struct MapOptions<'a> {
    pub source: &'a Path,
    pub ruleset: &'a Path,
    pub out: &'a Path,
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct MapSummary {
    pub scanned: usize,
    pub new_templates: usize,
    pub ambiguous: usize,
}

/// Scan a source tree against the catalog and append a template for
/// every recording no rule matched, so an operator can promote them.
pub fn map_tree(opts: &MapOptions<'_>) -> Result<MapSummary> {
    let mut ruleset = RuleSet::load(opts.ruleset)?;
    let mut summary = MapSummary::default();

    for sub_dir in lsdirs(opts.source, "sub-")? {
        let mut session = Session::new();
        session.set_subject(Some(dir_name(&sub_dir)))?;
        session.lock_subject();
        let mut ses_dirs = lsdirs(&sub_dir, "ses-")?;
        if ses_dirs.is_empty() {
            ses_dirs.push(sub_dir.clone());
        }
        for ses_dir in ses_dirs {
            let ses_name = if ses_dir == sub_dir {
                String::new()
            } else {
                dir_name(&ses_dir)
            };
            session.unlock_session();
            session.set_session(Some(ses_name))?;
            session.lock_session();

            for format_name in catalog::format_names() {
                let format_dir = ses_dir.join(format_name);
                if !format_dir.is_dir() {
                    continue;
                }
                let mut dumps: Vec<PathBuf> = fs::read_dir(&format_dir)?
                    .filter_map(|e| e.ok())
                    .map(|e| e.path())
                    .filter(|p| p.extension().is_some_and(|e| e == "json"))
                    .collect();
                dumps.sort();
                for dump in dumps {
                    if let Err(e) = map_recording(&session, &dump, &mut ruleset, &mut summary) {
                        tracing::error!(
                            subject = session.subject().unwrap_or("?"),
                            file = %dump.display(),
                            error = %e,
                            "recording skipped while mapping"
                        );
                    }
                }
            }
        }
    }

    for issue in ruleset.sanity_check() {
        tracing::warn!(%issue, "catalog sanity");
    }
    ruleset.save(opts.out)?;
    Ok(summary)
}

fn map_recording(
    session: &Session,
    dump: &Path,
    ruleset: &mut RuleSet,
    summary: &mut MapSummary,
) -> Result<()> {
    let mut recording = Recording::load(dump)?;
    let format_name = recording.format().name;
    let outcome = {
        let mut ctx = Context::new(&mut recording, session);
        matcher::match_recording(&mut ctx, ruleset, true)?
    };
    summary.scanned += 1;
    summary.ambiguous += outcome.ambiguities.len();

    if outcome.is_unclassified() {
        if !ruleset.has_equivalent(format_name, &outcome.run) {
            ruleset.append(format_name, &outcome.run);
            summary.new_templates += 1;
            tracing::info!(
                recording = %recording.identity(),
                "template appended for unclassified recording"
            );
        }
        return Ok(());
    }

    // remember where a still-unconfirmed run first matched
    if let Some(index) = outcome.index {
        if outcome.run.provenance.is_none() {
            let example = format!(
                "{}/{}",
                outcome.category,
                naming::build(
                    session,
                    recording
                        .format()
                        .category(&outcome.category)
                        .map(|c| c.entities)
                        .unwrap_or(&[]),
                    &recording.labels,
                    &recording.suffix,
                )?
            );
            if let Some(run) = ruleset.run_mut(format_name, &outcome.category, index) {
                run.provenance = Some(dump.display().to_string());
                run.example = Some(example);
            }
        }
    }
    Ok(())
}
