//! End-to-end pipeline: decoded dumps -> classification -> canonical
//! names -> sidecars and tabular records in the destination tree.

use curio::curate::{curate, map_tree, CurateOptions, MapOptions};
use curio::recording::Recording;
use curio::resolver::Context;
use curio::rules::matcher::match_recording;
use curio::rules::ruleset::RuleSet;
use curio::Session;
use std::fs;
use std::path::{Path, PathBuf};

const RULES: &str = r#"
__version__: "0.1.0"
mri:
  anat:
    - provenance: /raw/t1
      example: anat/sub-01_T1w
      checked: true
      suffix: T1w
      attributes:
        SeriesDescription: "t1_mprage.*"
      bids:
        acq: null
        run: null
  func:
    - provenance: /raw/bold
      example: func/sub-01_task-rest_bold
      checked: true
      suffix: bold
      attributes:
        SeriesDescription: ".*_bold.*"
      bids:
        task: "<<fname:task>>"
        run: "<EchoNumbers>"
  __ignored__:
    - provenance: /raw/localizer
      checked: true
      suffix: ""
      attributes:
        SeriesDescription: "localizer.*"
eeg:
  eeg:
    - provenance: /raw/oddball
      example: eeg/sub-01_task-oddball_eeg
      checked: true
      suffix: eeg
      attributes:
        RecordingMode: "continuous"
      bids:
        task: "<TaskDescription>"
"#;

fn dump(path: &Path, body: serde_json::Value) {
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, serde_json::to_string_pretty(&body).unwrap()).unwrap();
}

fn payload(path: &Path) {
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, b"binary payload").unwrap();
}

fn build_source(root: &Path) {
    let ses = root.join("sub-01/ses-01");
    dump(
        &ses.join("mri/001_t1.json"),
        serde_json::json!({
            "format": "mri",
            "type": "dicom",
            "manufacturer": "SIEMENS",
            "acqTime": "2024-05-01T09:00:00",
            "recNo": 1,
            "recId": "t1_mprage_sag",
            "dataFile": "001_t1.nii.gz",
            "files": ["001_0001.dcm"],
            "attributes": {
                "SeriesDescription": "t1_mprage_sag",
                "Manufacturer": "SIEMENS",
                "RepetitionTime": 2300,
                "EchoTime": 2.98,
                "FlipAngle": 9,
            },
        }),
    );
    payload(&ses.join("mri/001_t1.nii.gz"));

    dump(
        &ses.join("mri/005_bold.json"),
        serde_json::json!({
            "format": "mri",
            "type": "dicom",
            "manufacturer": "SIEMENS",
            "acqTime": "2024-05-01T09:12:30",
            "recNo": 5,
            "recId": "ep2d_bold_rest",
            "dataFile": "005_bold.nii.gz",
            "files": ["005_task-rest_bold.dcm"],
            "attributes": {
                "SeriesDescription": "ep2d_bold_rest",
                "Manufacturer": "SIEMENS",
                "RepetitionTime": 2000,
                "EchoNumbers": 1,
            },
        }),
    );
    payload(&ses.join("mri/005_bold.nii.gz"));

    dump(
        &ses.join("mri/099_localizer.json"),
        serde_json::json!({
            "format": "mri",
            "type": "dicom",
            "files": ["099_0001.dcm"],
            "attributes": {"SeriesDescription": "localizer_3plane"},
        }),
    );

    // second subject, single-session layout
    let sub2 = root.join("sub-02");
    dump(
        &sub2.join("eeg/oddball.json"),
        serde_json::json!({
            "format": "eeg",
            "type": "edf",
            "manufacturer": "Brain Products GmbH",
            "acqTime": "2024-05-02T14:00:00",
            "dataFile": "oddball.edf",
            "files": ["oddball.edf"],
            "attributes": {
                "RecordingMode": "continuous",
                "TaskDescription": "odd ball",
                "SamplingInterval": 2000,
                "NumberOfChannels": 64,
            },
        }),
    );
    payload(&sub2.join("eeg/oddball.edf"));
}

fn write_rules(dir: &Path) -> PathBuf {
    let path = dir.join("curio-rules.yaml");
    fs::write(&path, RULES).unwrap();
    path
}

#[test]
fn full_pipeline_archives_and_annotates() {
    let tmp = tempfile::tempdir().unwrap();
    let source = tmp.path().join("source");
    let destination = tmp.path().join("archive");
    build_source(&source);
    let rules = write_rules(tmp.path());

    let summary = curate(&CurateOptions {
        source: &source,
        destination: &destination,
        ruleset: &rules,
        subject: None,
        session: None,
        dry_run: false,
    })
    .unwrap();

    assert_eq!(summary.archived, 3);
    assert_eq!(summary.ignored, 1);
    assert_eq!(summary.unclassified, 0);
    assert_eq!(summary.failed, 0);

    let t1 = destination.join("sub-01/ses-01/anat/sub-01_ses-01_T1w.nii.gz");
    assert!(t1.is_file());
    let bold = destination.join("sub-01/ses-01/func/sub-01_ses-01_task-rest_run-1_bold.nii.gz");
    assert!(bold.is_file());
    let eeg = destination.join("sub-02/eeg/sub-02_task-oddball_eeg.edf");
    assert!(eeg.is_file());

    // sidecar carries resolved, unit-converted metadata
    let sidecar: serde_json::Value = serde_json::from_str(
        &fs::read_to_string(
            destination.join("sub-01/ses-01/func/sub-01_ses-01_task-rest_run-1_bold.json"),
        )
        .unwrap(),
    )
    .unwrap();
    assert_eq!(sidecar["TaskName"], serde_json::json!("rest"));
    assert_eq!(sidecar["RepetitionTime"], serde_json::json!(2.0));
    assert_eq!(sidecar["Manufacturer"], serde_json::json!("SIEMENS"));
    // nulls are elided at the file layer
    assert!(sidecar.get("InstitutionName").is_none());

    // BrainProducts table converts the sampling interval
    let eeg_sidecar: serde_json::Value = serde_json::from_str(
        &fs::read_to_string(destination.join("sub-02/eeg/sub-02_task-oddball_eeg.json")).unwrap(),
    )
    .unwrap();
    assert_eq!(eeg_sidecar["SamplingFrequency"], serde_json::json!(0.002));
    assert_eq!(eeg_sidecar["EEGChannelCount"], serde_json::json!(64));
    assert_eq!(eeg_sidecar["PowerLineFrequency"], serde_json::json!(50));

    // tabular companions
    let participants = fs::read_to_string(destination.join("participants.tsv")).unwrap();
    let lines: Vec<&str> = participants.lines().collect();
    assert_eq!(lines[0], "participant_id\tage\tsex");
    assert_eq!(lines[1], "sub-01\tn/a\tn/a");
    assert_eq!(lines[2], "sub-02\tn/a\tn/a");
    assert!(destination.join("participants.json").is_file());

    let recordings =
        fs::read_to_string(destination.join("sub-01/ses-01/sub-01_ses-01_recordings.tsv"))
            .unwrap();
    assert!(recordings.contains("anat/sub-01_ses-01_T1w.nii.gz\t2024-05-01T09:00:00"));
    assert!(recordings.contains("func/sub-01_ses-01_task-rest_run-1_bold.nii.gz\t2024-05-01T09:12:30"));
}

#[test]
fn rerun_hits_name_collisions_without_overwriting() {
    let tmp = tempfile::tempdir().unwrap();
    let source = tmp.path().join("source");
    let destination = tmp.path().join("archive");
    build_source(&source);
    let rules = write_rules(tmp.path());
    let opts = CurateOptions {
        source: &source,
        destination: &destination,
        ruleset: &rules,
        subject: None,
        session: None,
        dry_run: false,
    };

    let first = curate(&opts).unwrap();
    assert_eq!(first.archived, 3);
    let stamp = fs::metadata(destination.join("sub-01/ses-01/anat/sub-01_ses-01_T1w.nii.gz"))
        .unwrap()
        .modified()
        .unwrap();

    let second = curate(&opts).unwrap();
    assert_eq!(second.archived, 0);
    assert_eq!(second.failed, 3);
    let stamp_after = fs::metadata(destination.join("sub-01/ses-01/anat/sub-01_ses-01_T1w.nii.gz"))
        .unwrap()
        .modified()
        .unwrap();
    assert_eq!(stamp, stamp_after);
}

#[test]
fn dry_run_writes_nothing() {
    let tmp = tempfile::tempdir().unwrap();
    let source = tmp.path().join("source");
    let destination = tmp.path().join("archive");
    build_source(&source);
    let rules = write_rules(tmp.path());

    let summary = curate(&CurateOptions {
        source: &source,
        destination: &destination,
        ruleset: &rules,
        subject: None,
        session: None,
        dry_run: true,
    })
    .unwrap();
    assert_eq!(summary.archived, 3);
    assert!(!destination.exists());
}

#[test]
fn unchecked_catalog_is_rejected() {
    let tmp = tempfile::tempdir().unwrap();
    let source = tmp.path().join("source");
    build_source(&source);
    let raw = RULES.replace("checked: true", "checked: false");
    let rules = tmp.path().join("curio-rules.yaml");
    fs::write(&rules, raw).unwrap();

    let result = curate(&CurateOptions {
        source: &source,
        destination: &tmp.path().join("archive"),
        ruleset: &rules,
        subject: None,
        session: None,
        dry_run: false,
    });
    assert!(result.is_err());
}

#[test]
fn persisted_catalog_roundtrip_keeps_decisions() {
    let tmp = tempfile::tempdir().unwrap();
    let source = tmp.path().join("source");
    build_source(&source);
    let rules = write_rules(tmp.path());

    let original = RuleSet::load(&rules).unwrap();
    let copy_path = tmp.path().join("copy.yaml");
    original.save(&copy_path).unwrap();
    let reloaded = RuleSet::load(&copy_path).unwrap();

    let mut session = Session::new();
    session.set_subject(Some("sub-01".into())).unwrap();
    session.set_session(Some("ses-01".into())).unwrap();
    session.lock();

    for dump_name in ["mri/001_t1.json", "mri/005_bold.json", "mri/099_localizer.json"] {
        let path = source.join("sub-01/ses-01").join(dump_name);
        let mut rec = Recording::load(&path).unwrap();
        let before = {
            let mut ctx = Context::new(&mut rec, &session);
            match_recording(&mut ctx, &original, true).unwrap()
        };
        let mut rec = Recording::load(&path).unwrap();
        let after = {
            let mut ctx = Context::new(&mut rec, &session);
            match_recording(&mut ctx, &reloaded, true).unwrap()
        };
        assert_eq!(before.category, after.category);
        assert_eq!(before.index, after.index);
        assert_eq!(before.ambiguities, after.ambiguities);
    }
}

#[test]
fn mapping_appends_templates_for_unclassified_recordings() {
    let tmp = tempfile::tempdir().unwrap();
    let source = tmp.path().join("source");
    build_source(&source);
    // a recording no rule covers
    dump(
        &source.join("sub-01/ses-01/mri/042_dwi.json"),
        serde_json::json!({
            "format": "mri",
            "type": "dicom",
            "files": ["042_0001.dcm"],
            "attributes": {"SeriesDescription": "ep2d_diff_64dir"},
        }),
    );
    let rules = write_rules(tmp.path());
    let out = tmp.path().join("extended.yaml");

    let summary = map_tree(&MapOptions {
        source: &source,
        ruleset: &rules,
        out: &out,
    })
    .unwrap();
    assert_eq!(summary.scanned, 5);
    assert_eq!(summary.new_templates, 1);

    let body = fs::read_to_string(&out).unwrap();
    assert!(body.contains("__unclassified__"));
    assert!(body.contains("ep2d_diff_64dir"));

    // scanning again with the extended catalog appends nothing new
    let summary = map_tree(&MapOptions {
        source: &source,
        ruleset: &out,
        out: &tmp.path().join("extended2.yaml"),
    })
    .unwrap();
    assert_eq!(summary.new_templates, 0);
}

#[test]
fn subject_expression_derives_from_recording() {
    let tmp = tempfile::tempdir().unwrap();
    let source = tmp.path().join("source");
    let destination = tmp.path().join("archive");
    let ses = source.join("sub-raw/ses-01");
    dump(
        &ses.join("mri/001_t1.json"),
        serde_json::json!({
            "format": "mri",
            "type": "dicom",
            "dataFile": "001_t1.nii.gz",
            "files": ["001_0001.dcm"],
            "attributes": {
                "SeriesDescription": "t1_mprage_sag",
                "PatientID": "P042",
            },
        }),
    );
    payload(&ses.join("mri/001_t1.nii.gz"));
    let rules = write_rules(tmp.path());

    let summary = curate(&CurateOptions {
        source: &source,
        destination: &destination,
        ruleset: &rules,
        subject: Some("<PatientID>".into()),
        session: None,
        dry_run: false,
    })
    .unwrap();

    assert_eq!(summary.archived, 1);
    assert!(destination
        .join("sub-P042/ses-01/anat/sub-P042_ses-01_T1w.nii.gz")
        .is_file());
    let participants = fs::read_to_string(destination.join("participants.tsv")).unwrap();
    assert!(participants.contains("sub-P042"));
}
