//! Participant metadata from `participants.tsv`.

use std::collections::HashMap;
use std::fmt;
use std::fs::File;
use std::io::Read;
use std::path::Path;

use tracing::{debug, warn};

use crate::CgmError;

pub const UNKNOWN_AGE: i64 = -1;
pub const UNKNOWN_GROUP: &str = "unknown";

const ID_COLUMN: &str = "participant_id";
const AGE_COLUMN: &str = "age";
const GROUP_COLUMN: &str = "study_group";

const NA_MARKERS: &[&str] = &[
    "", "NA", "N/A", "n/a", "NaN", "nan", "-NaN", "null", "NULL", "None", "#N/A",
];

/// Canonical participant identifier.
///
/// Integer-looking identifiers compare numerically, so `42`, `"042"` and
/// `42.0` name the same participant.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum ParticipantKey {
    Numeric(i64),
    Label(String),
}

impl ParticipantKey {
    pub fn parse(raw: &str) -> Self {
        let text = raw.trim();
        if let Ok(n) = text.parse::<i64>() {
            return Self::Numeric(n);
        }
        if let Ok(f) = text.parse::<f64>() {
            if f.is_finite() && f.fract() == 0.0 && f.abs() < i64::MAX as f64 {
                return Self::Numeric(f as i64);
            }
        }
        Self::Label(text.to_string())
    }

    /// True when `raw` is spelled exactly as this key renders.
    fn is_canonical_spelling(&self, raw: &str) -> bool {
        matches!(self, Self::Numeric(n) if raw.trim() == n.to_string())
    }
}

impl fmt::Display for ParticipantKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Numeric(n) => write!(f, "{}", n),
            Self::Label(s) => f.write_str(s),
        }
    }
}

impl From<i64> for ParticipantKey {
    fn from(value: i64) -> Self {
        Self::Numeric(value)
    }
}

impl From<&str> for ParticipantKey {
    fn from(value: &str) -> Self {
        Self::parse(value)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ParticipantMeta {
    pub age: i64,
    pub study_group: String,
}

impl Default for ParticipantMeta {
    fn default() -> Self {
        Self {
            age: UNKNOWN_AGE,
            study_group: UNKNOWN_GROUP.to_string(),
        }
    }
}

impl ParticipantMeta {
    /// Build from raw cell text, defaulting each absent or NA field.
    pub fn from_fields(age: Option<&str>, study_group: Option<&str>) -> Self {
        let age = age.and_then(parse_age).unwrap_or(UNKNOWN_AGE);
        let study_group = study_group
            .map(str::trim)
            .filter(|s| !is_na(s))
            .unwrap_or(UNKNOWN_GROUP)
            .to_string();
        Self { age, study_group }
    }
}

#[derive(Clone, Debug)]
struct Row {
    meta: ParticipantMeta,
    canonical: bool,
}

/// Read-only lookup table, loaded once per run.
#[derive(Clone, Debug, Default)]
pub struct MetadataTable {
    rows: HashMap<ParticipantKey, Row>,
}

impl MetadataTable {
    pub fn load(path: &Path) -> Result<Self, CgmError> {
        let file = File::open(path).map_err(|e| CgmError::io(path, e))?;
        let table = Self::from_reader(file)?;
        debug!(
            "Loaded metadata for {} participants from {}",
            table.len(),
            path.display()
        );
        Ok(table)
    }

    /// Parse a tab-separated table with a header row.
    pub fn from_reader<R: Read>(reader: R) -> Result<Self, CgmError> {
        let mut reader = csv::ReaderBuilder::new()
            .delimiter(b'\t')
            .flexible(true)
            .trim(csv::Trim::All)
            .from_reader(reader);

        let headers = reader.headers()?.clone();
        let column = |name: &str| headers.iter().position(|h| h == name);
        let id_idx = column(ID_COLUMN)
            .ok_or_else(|| CgmError::Metadata(format!("missing '{}' column", ID_COLUMN)))?;
        let age_idx = column(AGE_COLUMN);
        let group_idx = column(GROUP_COLUMN);

        let mut table = Self::default();
        let mut unnamed = 0usize;
        for record in reader.records() {
            let record = record?;
            let raw_id = match record.get(id_idx) {
                Some(id) if !is_na(id) => id,
                _ => {
                    unnamed += 1;
                    continue;
                }
            };
            let meta = ParticipantMeta::from_fields(
                age_idx.and_then(|i| record.get(i)),
                group_idx.and_then(|i| record.get(i)),
            );
            table.insert_raw(raw_id, meta);
        }
        if unnamed > 0 {
            debug!("Skipped {} metadata rows without a participant id", unnamed);
        }
        Ok(table)
    }

    /// Insert a row keyed by its raw identifier text.
    ///
    /// On a key collision a canonically spelled integer id replaces a
    /// non-canonical one; otherwise the earlier row is kept.
    pub fn insert_raw(&mut self, raw_id: &str, meta: ParticipantMeta) {
        let key = ParticipantKey::parse(raw_id);
        let canonical = key.is_canonical_spelling(raw_id);
        match self.rows.get(&key) {
            None => {
                self.rows.insert(key, Row { meta, canonical });
            }
            Some(existing) => {
                let replace = canonical && !existing.canonical;
                warn!(
                    "Duplicate metadata rows for participant {} ({} '{}')",
                    key,
                    if replace { "using" } else { "ignoring" },
                    raw_id.trim()
                );
                if replace {
                    self.rows.insert(key, Row { meta, canonical });
                }
            }
        }
    }

    pub fn get(&self, key: &ParticipantKey) -> Option<&ParticipantMeta> {
        self.rows.get(key).map(|row| &row.meta)
    }

    /// Metadata for a participant folder name, defaults when unknown.
    pub fn resolve(&self, participant_id: &str) -> ParticipantMeta {
        self.get(&ParticipantKey::parse(participant_id))
            .cloned()
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

fn is_na(text: &str) -> bool {
    NA_MARKERS.contains(&text.trim())
}

fn parse_age(raw: &str) -> Option<i64> {
    let text = raw.trim();
    if is_na(text) {
        return None;
    }
    if let Ok(age) = text.parse::<i64>() {
        return Some(age);
    }
    let value: f64 = text.parse().ok()?;
    if value.is_finite() && value.abs() < i64::MAX as f64 {
        Some(value.trunc() as i64)
    } else {
        None
    }
}
