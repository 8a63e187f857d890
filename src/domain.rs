use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

use crate::error::SyncError;

/// Primary key of a dataset: the trailing path segment of its landing page.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DatasetId(String);

impl DatasetId {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn from_landing_page(landing_page: &str) -> Result<Self, SyncError> {
        let without_fragment = landing_page.split('#').next().unwrap_or_default();
        let without_query = without_fragment.split('?').next().unwrap_or_default();
        let segment = without_query
            .trim()
            .trim_end_matches('/')
            .rsplit('/')
            .next()
            .unwrap_or_default();
        segment
            .parse()
            .map_err(|_| SyncError::InvalidLandingPage(landing_page.to_string()))
    }
}

impl fmt::Display for DatasetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for DatasetId {
    type Err = SyncError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let trimmed = value.trim();
        let is_valid = !trimmed.is_empty()
            && trimmed != "."
            && trimmed != ".."
            && !trimmed.contains(['/', '\\']);
        if !is_valid {
            return Err(SyncError::InvalidLandingPage(value.to_string()));
        }
        Ok(Self(trimmed.to_string()))
    }
}

/// A dataset modification stamp as published in the manifest.
///
/// The raw string is kept verbatim for the ledger. Ordering is chronological
/// when both sides parse as a date or timestamp, and lexical otherwise.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModifiedDate {
    raw: String,
    parsed: Option<NaiveDateTime>,
}

impl ModifiedDate {
    pub fn new(raw: impl Into<String>) -> Self {
        let raw = raw.into();
        let parsed = parse_timestamp(raw.trim());
        Self { raw, parsed }
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn parsed(&self) -> Option<NaiveDateTime> {
        self.parsed
    }

    pub fn compare(&self, other: &ModifiedDate) -> Ordering {
        match (self.parsed, other.parsed) {
            (Some(left), Some(right)) => left.cmp(&right),
            _ => self.raw.cmp(&other.raw),
        }
    }

    pub fn is_newer_than(&self, other: &ModifiedDate) -> bool {
        self.compare(other) == Ordering::Greater
    }
}

impl fmt::Display for ModifiedDate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.raw)
    }
}

fn parse_timestamp(value: &str) -> Option<NaiveDateTime> {
    if value.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Some(dt.naive_utc());
    }
    for pattern in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(value, pattern) {
            return Some(dt);
        }
    }
    ["%Y-%m-%d", "%m/%d/%Y"]
        .iter()
        .find_map(|pattern| NaiveDate::parse_from_str(value, pattern).ok())
        .and_then(|date| date.and_hms_opt(0, 0, 0))
}
