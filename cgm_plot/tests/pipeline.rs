//! End-to-end runs over a synthetic Dexcom directory tree.

use std::fs;
use std::path::{Path, PathBuf};

use cgm_plot::{run, CgmError, ChartKind, RunConfig, SkipReason};
use serde_json::{json, Value};
use tempfile::TempDir;

fn cgm_document(values: &[Value]) -> Value {
    let entries: Vec<Value> = values
        .iter()
        .enumerate()
        .map(|(i, value)| {
            json!({
                "effective_time_frame": {
                    "time_interval": {
                        "start_date_time": format!("2023-08-01T10:{:02}:00Z", i * 5),
                        "end_date_time": format!("2023-08-01T10:{:02}:00Z", i * 5 + 5)
                    }
                },
                "blood_glucose": { "unit": "mg/dL", "value": value },
                "event_type": "EGV"
            })
        })
        .collect();
    json!({
        "header": { "uuid": "00000000-0000-0000-0000-000000000000" },
        "body": { "cgm": entries }
    })
}

struct Fixture {
    _dir: TempDir,
    config: RunConfig,
}

impl Fixture {
    fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let config = RunConfig {
            base_dir: dir.path().join("data"),
            out_dir: dir.path().join("outputs"),
            ..RunConfig::default()
        };
        fs::create_dir_all(config.vendor_dir()).unwrap();
        Self { _dir: dir, config }
    }

    fn participant_dir(&self, id: &str) -> PathBuf {
        let path = self.config.vendor_dir().join(id);
        fs::create_dir_all(&path).unwrap();
        path
    }

    fn add_participant(&self, id: &str, document: &Value) {
        let path = self.participant_dir(id).join(format!("{}_DEX.json", id));
        fs::write(path, serde_json::to_vec(document).unwrap()).unwrap();
    }

    fn write_metadata(&self, text: &str) {
        fs::write(self.config.metadata_path(), text).unwrap();
    }

    fn outputs(&self) -> Vec<String> {
        let Ok(entries) = fs::read_dir(&self.config.out_dir) else {
            return Vec::new();
        };
        let mut names: Vec<String> = entries
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }
}

fn valid_readings() -> Vec<Value> {
    vec![json!(98), json!("High"), json!("180"), json!(142.5)]
}

#[test]
fn six_participants_yield_first_five_plots() {
    let fx = Fixture::new();
    fx.write_metadata(
        "participant_id\tclinical_site\tage\tstudy_group\n\
         1001\tUAB\t54\thealthy\n\
         1002\tUCSD\t61\tpre_diabetes_lifestyle_controlled\n",
    );
    for id in ["1006", "1003", "1001", "1005", "1002", "1004"] {
        fx.add_participant(id, &cgm_document(&valid_readings()));
    }

    let summary = run(&fx.config).unwrap();

    assert_eq!(
        fx.outputs(),
        vec!["1001.png", "1002.png", "1003.png", "1004.png", "1005.png"]
    );
    assert_eq!(summary.rendered.len(), 5);
    assert!(summary.skipped.is_empty());
    assert_eq!(summary.rendered[0], fx.config.out_dir.join("1001.png"));
}

#[test]
fn folder_without_record_file_is_skipped() {
    let fx = Fixture::new();
    fx.write_metadata("participant_id\tage\tstudy_group\n");
    fx.add_participant("2001", &cgm_document(&valid_readings()));
    let empty = fx.participant_dir("2002");
    fs::write(empty.join("2002_DEX.csv"), "time,value\n").unwrap();
    fx.add_participant("2003", &cgm_document(&valid_readings()));

    let summary = run(&fx.config).unwrap();

    assert_eq!(fx.outputs(), vec!["2001.png", "2003.png"]);
    assert_eq!(
        summary.skipped,
        vec![("2002".to_string(), SkipReason::NoRecordFile)]
    );
}

#[test]
fn participant_without_valid_readings_is_skipped() {
    let fx = Fixture::new();
    fx.write_metadata("participant_id\tage\tstudy_group\n");
    fx.add_participant("3001", &cgm_document(&[json!("High"), json!("Low")]));
    fx.add_participant("3002", &json!({ "body": { "cgm": [] } }));
    fx.add_participant("3003", &cgm_document(&valid_readings()));

    let summary = run(&fx.config).unwrap();

    assert_eq!(fx.outputs(), vec!["3003.png"]);
    assert_eq!(
        summary.skipped,
        vec![
            ("3001".to_string(), SkipReason::NoReadings),
            ("3002".to_string(), SkipReason::NoReadings),
        ]
    );
}

#[test]
fn unreadable_record_file_does_not_abort_run() {
    let fx = Fixture::new();
    fx.write_metadata("participant_id\tage\tstudy_group\n");
    let dir = fx.participant_dir("4001");
    fs::write(dir.join("4001_DEX.json"), "{ truncated").unwrap();
    fx.add_participant("4002", &cgm_document(&valid_readings()));

    let summary = run(&fx.config).unwrap();

    assert_eq!(fx.outputs(), vec!["4002.png"]);
    assert!(matches!(
        summary.skipped.as_slice(),
        [(id, SkipReason::LoadFailed(_))] if id == "4001"
    ));
}

#[test]
fn missing_vendor_directory_aborts() {
    let dir = tempfile::tempdir().unwrap();
    let config = RunConfig {
        base_dir: dir.path().join("nowhere"),
        out_dir: dir.path().join("outputs"),
        ..RunConfig::default()
    };

    let err = run(&config).unwrap_err();

    assert!(matches!(err, CgmError::MissingVendorDir(ref p) if p == &config.vendor_dir()));
    assert!(!config.out_dir.exists());
}

#[test]
fn missing_metadata_table_falls_back_to_defaults() {
    let fx = Fixture::new();
    fx.add_participant("5001", &cgm_document(&valid_readings()));

    let summary = run(&fx.config).unwrap();

    assert_eq!(fx.outputs(), vec!["5001.png"]);
    assert!(summary.skipped.is_empty());
}

#[test]
fn malformed_metadata_table_aborts() {
    let fx = Fixture::new();
    fx.write_metadata("subject\tage\n1\t2\n");
    fx.add_participant("6001", &cgm_document(&valid_readings()));

    let err = run(&fx.config).unwrap_err();

    assert!(matches!(err, CgmError::Metadata(_)));
}

#[test]
fn svg_output_carries_metadata_title() {
    let fx = Fixture::new();
    fx.write_metadata("participant_id\tage\tstudy_group\n7001\t47\tinsulin_dependent\n");
    fx.add_participant("7001", &cgm_document(&valid_readings()));
    fx.add_participant("7002", &cgm_document(&valid_readings()));
    let config = RunConfig {
        format: ChartKind::Svg,
        ..fx.config.clone()
    };

    run(&config).unwrap();

    let read = |name: &str| fs::read_to_string(Path::new(&config.out_dir).join(name)).unwrap();
    assert!(read("7001.svg").contains("ID: 7001  |  Age: 47  |  Group: insulin_dependent"));
    assert!(read("7002.svg").contains("ID: 7002  |  Age: -1  |  Group: unknown"));
}

#[test]
fn render_failure_skips_only_that_participant() {
    let fx = Fixture::new();
    fx.write_metadata("participant_id\tage\tstudy_group\n");
    fx.add_participant("8001", &cgm_document(&valid_readings()));
    fx.add_participant("8002", &cgm_document(&valid_readings()));
    // An existing directory where the image should go makes the backend fail.
    fs::create_dir_all(fx.config.output_path("8001")).unwrap();

    let summary = run(&fx.config).unwrap();

    assert_eq!(summary.rendered, vec![fx.config.output_path("8002")]);
    assert!(matches!(
        summary.skipped.as_slice(),
        [(id, SkipReason::RenderFailed(msg))] if id == "8001" && msg.starts_with("plotting error")
    ));
    assert!(fx.config.out_dir.join("8002.png").is_file());
}

#[test]
fn summary_json_records_skips() {
    let fx = Fixture::new();
    fx.add_participant("9001", &cgm_document(&valid_readings()));
    fx.add_participant("9002", &cgm_document(&[json!("Low")]));
    let summary = run(&fx.config).unwrap();

    let path = fx.config.out_dir.join("summary.json");
    summary.write_json(&path).unwrap();

    let value: Value = serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
    assert_eq!(value["rendered"].as_array().unwrap().len(), 1);
    assert_eq!(value["skipped"][0], json!(["9002", { "reason": "no_readings" }]));
}
