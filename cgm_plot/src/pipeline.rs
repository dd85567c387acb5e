//! Batch driver: pick participant folders, load, resolve metadata, render.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::loader::load_cgm_file;
use crate::metadata::MetadataTable;
use crate::render::{render_participant, ChartKind};
use crate::CgmError;

/// Dexcom G6 folder relative to the base data directory.
pub const VENDOR_SUBDIR: [&str; 3] = [
    "wearable_blood_glucose",
    "continuous_glucose_monitoring",
    "dexcom_g6",
];
pub const METADATA_FILE: &str = "participants.tsv";
pub const RECORD_SUFFIX: &str = "_DEX.json";
pub const DEFAULT_SAMPLE_SIZE: usize = 5;
pub const DEFAULT_BASE_DIR: &str = "data";
pub const DEFAULT_OUT_DIR: &str = "outputs";

#[derive(Clone, Debug)]
pub struct RunConfig {
    pub base_dir: PathBuf,
    pub out_dir: PathBuf,
    pub sample_size: usize,
    pub format: ChartKind,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            base_dir: PathBuf::from(DEFAULT_BASE_DIR),
            out_dir: PathBuf::from(DEFAULT_OUT_DIR),
            sample_size: DEFAULT_SAMPLE_SIZE,
            format: ChartKind::Png,
        }
    }
}

impl RunConfig {
    pub fn vendor_dir(&self) -> PathBuf {
        VENDOR_SUBDIR
            .iter()
            .fold(self.base_dir.clone(), |path, part| path.join(part))
    }

    pub fn metadata_path(&self) -> PathBuf {
        self.base_dir.join(METADATA_FILE)
    }

    pub fn output_path(&self, participant_id: &str) -> PathBuf {
        self.out_dir
            .join(format!("{}.{}", participant_id, self.format.extension()))
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "reason", content = "detail", rename_all = "snake_case")]
pub enum SkipReason {
    NoRecordFile,
    LoadFailed(String),
    NoReadings,
    RenderFailed(String),
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::NoRecordFile => write!(f, "no *{} file", RECORD_SUFFIX),
            SkipReason::LoadFailed(err) => write!(f, "load failed: {}", err),
            SkipReason::NoReadings => f.write_str("no valid readings"),
            SkipReason::RenderFailed(err) => write!(f, "render failed: {}", err),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct RunSummary {
    pub rendered: Vec<PathBuf>,
    pub skipped: Vec<(String, SkipReason)>,
}

impl RunSummary {
    /// Write the summary as pretty-printed JSON, creating parent directories.
    pub fn write_json(&self, path: &Path) -> Result<(), CgmError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| CgmError::io(parent, e))?;
        }
        let text = serde_json::to_string_pretty(self)?;
        fs::write(path, text).map_err(|e| CgmError::io(path, e))
    }
}

/// Process the first `sample_size` participant folders.
///
/// Only a missing vendor directory, an unlistable vendor directory or a
/// malformed metadata table abort the run; per-participant problems are
/// recorded in the summary.
pub fn run(config: &RunConfig) -> Result<RunSummary, CgmError> {
    let vendor_dir = config.vendor_dir();
    if !vendor_dir.is_dir() {
        return Err(CgmError::MissingVendorDir(vendor_dir));
    }

    let metadata = load_metadata(&config.metadata_path())?;
    let folders = participant_folders(&vendor_dir, config.sample_size)?;
    info!(
        "Processing {} participant folders from {}",
        folders.len(),
        vendor_dir.display()
    );

    let mut summary = RunSummary::default();
    for folder in folders {
        let participant_id = folder
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        match process_participant(config, &metadata, &folder, &participant_id) {
            Ok(path) => {
                info!("Wrote plot: {}", path.display());
                summary.rendered.push(path);
            }
            Err(reason) => {
                warn!("Skipping participant {}: {}", participant_id, reason);
                summary.skipped.push((participant_id, reason));
            }
        }
    }
    Ok(summary)
}

fn process_participant(
    config: &RunConfig,
    metadata: &MetadataTable,
    folder: &Path,
    participant_id: &str,
) -> Result<PathBuf, SkipReason> {
    let record_path = find_record_file(folder)
        .map_err(|e| SkipReason::LoadFailed(e.to_string()))?
        .ok_or(SkipReason::NoRecordFile)?;
    let outcome =
        load_cgm_file(&record_path).map_err(|e| SkipReason::LoadFailed(e.to_string()))?;
    if outcome.series.is_empty() {
        return Err(SkipReason::NoReadings);
    }

    let meta = metadata.resolve(participant_id);
    if let (Some((start, end)), Some((low, high)), Some(mean)) = (
        outcome.series.time_span(),
        outcome.series.glucose_range(),
        outcome.series.mean_glucose(),
    ) {
        debug!(
            "Participant {}: {} readings {} .. {}, glucose {:.0}-{:.0} (mean {:.1}) mg/dL, age {}, group {}",
            participant_id,
            outcome.series.len(),
            start,
            end,
            low,
            high,
            mean,
            meta.age,
            meta.study_group
        );
    }

    let out_path = config.output_path(participant_id);
    render_participant(
        &outcome.series,
        participant_id,
        &meta,
        &out_path,
        config.format,
    )
    .map_err(|e| SkipReason::RenderFailed(e.to_string()))?;
    Ok(out_path)
}

/// Missing table means every participant gets defaults; a broken one is fatal.
fn load_metadata(path: &Path) -> Result<MetadataTable, CgmError> {
    if !path.exists() {
        warn!(
            "Metadata table {} not found; using defaults for all participants",
            path.display()
        );
        return Ok(MetadataTable::default());
    }
    MetadataTable::load(path)
}

/// Immediate subdirectories of `vendor_dir`, sorted by name, at most `limit`.
pub fn participant_folders(vendor_dir: &Path, limit: usize) -> Result<Vec<PathBuf>, CgmError> {
    let entries = fs::read_dir(vendor_dir).map_err(|e| CgmError::io(vendor_dir, e))?;
    let mut folders = Vec::new();
    for entry in entries {
        let path = entry.map_err(|e| CgmError::io(vendor_dir, e))?.path();
        if path.is_dir() {
            folders.push(path);
        }
    }
    folders.sort_by(|a, b| a.file_name().cmp(&b.file_name()));
    folders.truncate(limit);
    Ok(folders)
}

/// First `*_DEX.json` file in `folder` by name. Hidden files are ignored.
pub fn find_record_file(folder: &Path) -> Result<Option<PathBuf>, CgmError> {
    let entries = fs::read_dir(folder).map_err(|e| CgmError::io(folder, e))?;
    let mut matches = Vec::new();
    for entry in entries {
        let path = entry.map_err(|e| CgmError::io(folder, e))?.path();
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        if !name.starts_with('.') && name.ends_with(RECORD_SUFFIX) && path.is_file() {
            matches.push(path);
        }
    }
    matches.sort();
    Ok(matches.into_iter().next())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_layout() {
        let config = RunConfig::default();
        assert_eq!(
            config.vendor_dir(),
            Path::new("data/wearable_blood_glucose/continuous_glucose_monitoring/dexcom_g6")
        );
        assert_eq!(config.metadata_path(), Path::new("data/participants.tsv"));
        assert_eq!(config.output_path("1023"), Path::new("outputs/1023.png"));
        assert_eq!(config.sample_size, 5);
    }

    #[test]
    fn test_output_extension_follows_format() {
        let config = RunConfig {
            format: ChartKind::Svg,
            ..RunConfig::default()
        };
        assert_eq!(config.output_path("7"), Path::new("outputs/7.svg"));
    }

    #[test]
    fn test_find_record_file_filters_names() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("1001_DEX.csv"), "").unwrap();
        fs::write(dir.path().join(".hidden_DEX.json"), "{}").unwrap();
        fs::create_dir(dir.path().join("dir_DEX.json")).unwrap();
        assert_eq!(find_record_file(dir.path()).unwrap(), None);

        fs::write(dir.path().join("1001_b_DEX.json"), "{}").unwrap();
        fs::write(dir.path().join("1001_a_DEX.json"), "{}").unwrap();
        assert_eq!(
            find_record_file(dir.path()).unwrap(),
            Some(dir.path().join("1001_a_DEX.json"))
        );
    }

    #[test]
    fn test_participant_folders_sorted_and_limited() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["1010", "1002", "1001", "abc"] {
            fs::create_dir(dir.path().join(name)).unwrap();
        }
        fs::write(dir.path().join("0000_notes.txt"), "").unwrap();
        let folders = participant_folders(dir.path(), 3).unwrap();
        let names: Vec<_> = folders
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["1001", "1002", "1010"]);
    }

    #[test]
    fn test_summary_json_lists_rendered_and_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("reports").join("summary.json");
        let summary = RunSummary {
            rendered: vec![PathBuf::from("outputs/1001.png")],
            skipped: vec![
                ("1002".to_string(), SkipReason::NoRecordFile),
                (
                    "1003".to_string(),
                    SkipReason::RenderFailed("disk full".to_string()),
                ),
            ],
        };
        summary.write_json(&path).unwrap();

        let value: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(value["rendered"], serde_json::json!(["outputs/1001.png"]));
        assert_eq!(
            value["skipped"],
            serde_json::json!([
                ["1002", { "reason": "no_record_file" }],
                ["1003", { "reason": "render_failed", "detail": "disk full" }]
            ])
        );
    }
}
