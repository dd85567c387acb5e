//! Dexcom CGM export parsing.
//!
//! Entries live under `body.cgm`. Each one is parsed on its own so a malformed
//! entry only costs that entry; the reasons are tallied in a [`LoadReport`].

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde_json::Value as JsonValue;
use thiserror::Error;
use tracing::{debug, warn};

use crate::{CgmError, CgmReading, Timeseries};

const ENTRIES_POINTER: &str = "/body/cgm";
const START_TIME_POINTER: &str = "/effective_time_frame/time_interval/start_date_time";
const GLUCOSE_POINTER: &str = "/blood_glucose/value";

const OFFSET_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f%:z",
    "%Y-%m-%dT%H:%M:%S%.f%z",
    "%Y-%m-%d %H:%M:%S%.f%:z",
    "%Y-%m-%d %H:%M:%S%.f%z",
];

// Strings without an offset are read as UTC.
const NAIVE_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.fZ",
    "%Y-%m-%d %H:%M:%S%.fZ",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M",
];

/// Why a single CGM entry was dropped.
#[derive(Error, Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum EntrySkip {
    #[error("missing start_date_time")]
    MissingTimestamp,
    #[error("unparseable start_date_time")]
    InvalidTimestamp,
    #[error("missing blood_glucose value")]
    MissingGlucose,
    #[error("non-numeric blood_glucose value")]
    NonNumericGlucose,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct LoadReport {
    pub entries_seen: usize,
    pub readings_kept: usize,
    pub skipped: BTreeMap<EntrySkip, usize>,
}

impl LoadReport {
    pub fn skipped_total(&self) -> usize {
        self.skipped.values().sum()
    }

    pub fn skipped_for(&self, reason: EntrySkip) -> usize {
        self.skipped.get(&reason).copied().unwrap_or(0)
    }

    fn summary(&self) -> String {
        self.skipped
            .iter()
            .map(|(reason, count)| format!("{} x{}", reason, count))
            .collect::<Vec<_>>()
            .join(", ")
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct LoadOutcome {
    pub series: Timeseries,
    pub report: LoadReport,
}

/// Read and parse one participant's `*_DEX.json` file.
///
/// I/O and JSON syntax errors are returned; anything wrong inside individual
/// entries is counted in the report instead.
pub fn load_cgm_file(path: &Path) -> Result<LoadOutcome, CgmError> {
    let data = fs::read(path).map_err(|e| CgmError::io(path, e))?;
    let document: JsonValue = serde_json::from_slice(&data)?;
    let outcome = parse_cgm_document(&document);

    debug!(
        "Loaded {}: {} entries, {} readings kept",
        path.display(),
        outcome.report.entries_seen,
        outcome.report.readings_kept
    );
    if outcome.report.skipped_total() > 0 {
        warn!(
            "Dropped {} of {} entries in {} ({})",
            outcome.report.skipped_total(),
            outcome.report.entries_seen,
            path.display(),
            outcome.report.summary()
        );
    }
    Ok(outcome)
}

/// Extract the cleaned timeseries from an already parsed document.
///
/// A document without a `body.cgm` list yields an empty series.
pub fn parse_cgm_document(document: &JsonValue) -> LoadOutcome {
    let Some(entries) = document
        .pointer(ENTRIES_POINTER)
        .and_then(JsonValue::as_array)
    else {
        return LoadOutcome::default();
    };

    let mut report = LoadReport {
        entries_seen: entries.len(),
        ..LoadReport::default()
    };
    let mut readings = Vec::with_capacity(entries.len());
    for entry in entries {
        match parse_entry(entry) {
            Ok(reading) => readings.push(reading),
            Err(reason) => *report.skipped.entry(reason).or_insert(0) += 1,
        }
    }
    report.readings_kept = readings.len();

    LoadOutcome {
        series: Timeseries::from_readings(readings),
        report,
    }
}

/// Parse a single `body.cgm` entry.
pub fn parse_entry(entry: &JsonValue) -> Result<CgmReading, EntrySkip> {
    let raw_time = entry
        .pointer(START_TIME_POINTER)
        .ok_or(EntrySkip::MissingTimestamp)?;
    let raw_value = entry
        .pointer(GLUCOSE_POINTER)
        .ok_or(EntrySkip::MissingGlucose)?;

    let timestamp = raw_time
        .as_str()
        .and_then(parse_timestamp)
        .ok_or(EntrySkip::InvalidTimestamp)?;
    let glucose = coerce_glucose(raw_value).ok_or(EntrySkip::NonNumericGlucose)?;

    CgmReading::new(timestamp, glucose).ok_or(EntrySkip::NonNumericGlucose)
}

/// Numeric glucose value, or `None` for placeholders like `"High"`.
pub fn coerce_glucose(value: &JsonValue) -> Option<f64> {
    let number = match value {
        JsonValue::Number(n) => n.as_f64()?,
        JsonValue::String(s) => s.trim().parse::<f64>().ok()?,
        _ => return None,
    };
    number.is_finite().then_some(number)
}

/// Parse the ISO-like timestamps found in CGM exports into UTC.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let text = raw.trim();
    if text.is_empty() {
        return None;
    }

    if let Ok(ts) = DateTime::parse_from_rfc3339(text) {
        return Some(ts.with_timezone(&Utc));
    }
    for format in OFFSET_FORMATS {
        if let Ok(ts) = DateTime::parse_from_str(text, format) {
            return Some(ts.with_timezone(&Utc));
        }
    }
    for format in NAIVE_FORMATS {
        if let Ok(ts) = NaiveDateTime::parse_from_str(text, format) {
            return Some(ts.and_utc());
        }
    }
    NaiveDate::parse_from_str(text, "%Y-%m-%d")
        .ok()?
        .and_hms_opt(0, 0, 0)
        .map(|ts| ts.and_utc())
}
