//! Continuous glucose monitor plotting library.
//!
//! Loads Dexcom G6 CGM exports, joins them with the participant metadata table
//! and renders one glucose trace per participant.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use thiserror::Error;

mod font;
pub mod loader;
pub mod metadata;
pub mod pipeline;
pub mod render;

pub use loader::{
    load_cgm_file, parse_cgm_document, parse_entry, EntrySkip, LoadOutcome, LoadReport,
};
pub use metadata::{MetadataTable, ParticipantKey, ParticipantMeta, UNKNOWN_AGE, UNKNOWN_GROUP};
pub use pipeline::{run, RunConfig, RunSummary, SkipReason};
pub use render::{plot_title, render_participant, ChartKind};

#[derive(Error, Debug)]
pub enum CgmError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("failed to read metadata table: {0}")]
    Csv(#[from] csv::Error),
    #[error("metadata table error: {0}")]
    Metadata(String),
    #[error("Dexcom path not found: {0}")]
    MissingVendorDir(PathBuf),
    #[error("no glucose readings to plot")]
    InsufficientData,
    #[error("plotting error: {0}")]
    Render(String),
}

impl CgmError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// One glucose measurement.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CgmReading {
    timestamp: DateTime<Utc>,
    glucose_mg_dl: f64,
}

impl CgmReading {
    /// Returns `None` when the glucose value is not finite.
    pub fn new(timestamp: DateTime<Utc>, glucose_mg_dl: f64) -> Option<Self> {
        if !glucose_mg_dl.is_finite() {
            return None;
        }
        Some(Self {
            timestamp,
            glucose_mg_dl,
        })
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn glucose_mg_dl(&self) -> f64 {
        self.glucose_mg_dl
    }
}

/// Readings for a single participant, ordered by timestamp.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Timeseries {
    readings: Vec<CgmReading>,
}

impl Timeseries {
    /// Sorts the readings ascending by timestamp. Equal timestamps keep their
    /// input order and duplicates are retained.
    pub fn from_readings(mut readings: Vec<CgmReading>) -> Self {
        readings.sort_by_key(|r| r.timestamp);
        Self { readings }
    }

    pub fn readings(&self) -> &[CgmReading] {
        &self.readings
    }

    pub fn len(&self) -> usize {
        self.readings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.readings.is_empty()
    }

    /// First and last timestamp.
    pub fn time_span(&self) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
        Some((self.readings.first()?.timestamp, self.readings.last()?.timestamp))
    }

    /// Minimum and maximum glucose value.
    pub fn glucose_range(&self) -> Option<(f64, f64)> {
        let mut values = self.readings.iter().map(|r| r.glucose_mg_dl);
        let first = values.next()?;
        Some(values.fold((first, first), |(lo, hi), v| (lo.min(v), hi.max(v))))
    }

    pub fn mean_glucose(&self) -> Option<f64> {
        if self.readings.is_empty() {
            return None;
        }
        let total: f64 = self.readings.iter().map(|r| r.glucose_mg_dl).sum();
        Some(total / self.readings.len() as f64)
    }
}
