//! Core types for the Synheart Ingest pipeline
//!
//! This module defines the data structures that flow out of extraction:
//! candidate files, normalized records, the extraction result and the
//! integrity digest that seals it.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize, Serializer};
use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;

/// Device label used when no device identity can be resolved
pub const UNKNOWN_DEVICE: &str = "Unknown Device";

/// A file the classifier believes may hold export data
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CandidateFile {
    /// Absolute (or root-joined) path used to open the file
    pub path: PathBuf,
    /// Path relative to the archive root, used for logging and classification
    pub relative: PathBuf,
    /// Position in walk order
    pub index: usize,
}

impl CandidateFile {
    /// File name component as UTF-8 (lossy)
    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}

/// Canonical rendering of an instant: ISO-8601 UTC, millisecond precision
pub fn format_instant(instant: &DateTime<Utc>) -> String {
    instant.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn serialize_instant<S: Serializer>(instant: &DateTime<Utc>, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_str(&format_instant(instant))
}

/// One normalized `(timestamp, metric, value, device)` tuple
///
/// Field order is part of the artifact format and must not change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NormalizedRecord {
    #[serde(serialize_with = "serialize_instant")]
    pub timestamp: DateTime<Utc>,
    pub metric: String,
    pub value: String,
    pub device: String,
}

impl NormalizedRecord {
    /// Timestamp in its canonical string form
    pub fn timestamp_string(&self) -> String {
        format_instant(&self.timestamp)
    }
}

/// Per-metric overview of an extraction result
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MetricSummary {
    pub records: usize,
    pub first: String,
    pub last: String,
}

/// Records sorted by timestamp plus the distinct metrics and devices seen
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractionResult {
    records: Vec<NormalizedRecord>,
    metrics: BTreeSet<String>,
    devices: BTreeSet<String>,
    files_scanned: usize,
    files_skipped: usize,
}

impl ExtractionResult {
    /// Assemble a result. Records must already be sorted.
    pub(crate) fn new(
        records: Vec<NormalizedRecord>,
        metrics: BTreeSet<String>,
        devices: BTreeSet<String>,
        files_scanned: usize,
        files_skipped: usize,
    ) -> Self {
        Self {
            records,
            metrics,
            devices,
            files_scanned,
            files_skipped,
        }
    }

    pub fn records(&self) -> &[NormalizedRecord] {
        &self.records
    }

    pub fn metrics(&self) -> &BTreeSet<String> {
        &self.metrics
    }

    pub fn devices(&self) -> &BTreeSet<String> {
        &self.devices
    }

    /// Number of candidate files read
    pub fn files_scanned(&self) -> usize {
        self.files_scanned
    }

    /// Number of candidate files dropped as unreadable or malformed
    pub fn files_skipped(&self) -> usize {
        self.files_skipped
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn into_records(self) -> Vec<NormalizedRecord> {
        self.records
    }

    /// Canonical artifact bytes: compact JSON array of the sorted records
    ///
    /// This is the exact byte sequence the integrity digest covers.
    pub fn artifact(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(&self.records)
    }

    /// Record count and time span for every metric
    pub fn summary(&self) -> BTreeMap<String, MetricSummary> {
        let mut summary: BTreeMap<String, MetricSummary> = BTreeMap::new();
        for record in &self.records {
            let ts = record.timestamp_string();
            summary
                .entry(record.metric.clone())
                .and_modify(|s| {
                    s.records += 1;
                    s.last = ts.clone();
                })
                .or_insert_with(|| MetricSummary {
                    records: 1,
                    first: ts.clone(),
                    last: ts.clone(),
                });
        }
        summary
    }
}

/// Hash of a canonical artifact and the moment it was captured
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntegrityDigest {
    /// Hash algorithm name
    pub algorithm: String,
    /// Lower-case hex digest of the artifact bytes
    pub hex: String,
    /// When the digest was computed
    pub captured_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;

    fn record(secs: i64, metric: &str, value: &str) -> NormalizedRecord {
        NormalizedRecord {
            timestamp: Utc.timestamp_opt(secs, 0).unwrap(),
            metric: metric.to_string(),
            value: value.to_string(),
            device: UNKNOWN_DEVICE.to_string(),
        }
    }

    #[test]
    fn test_record_serialization_order() {
        let json = serde_json::to_string(&record(1_704_067_200, "heart rate", "72")).unwrap();
        assert_eq!(
            json,
            r#"{"timestamp":"2024-01-01T00:00:00.000Z","metric":"heart rate","value":"72","device":"Unknown Device"}"#
        );
    }

    #[test]
    fn test_record_deserializes_from_artifact() {
        let original = record(1_704_067_200, "steps", "1200");
        let json = serde_json::to_string(&original).unwrap();
        let parsed: NormalizedRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, original);
    }

    #[test]
    fn test_summary_spans() {
        let records = vec![
            record(100, "steps", "1"),
            record(200, "heart rate", "60"),
            record(300, "steps", "2"),
        ];
        let result = ExtractionResult::new(
            records,
            ["steps".to_string(), "heart rate".to_string()].into(),
            [UNKNOWN_DEVICE.to_string()].into(),
            2,
            0,
        );

        let summary = result.summary();
        let steps = &summary["steps"];
        assert_eq!(steps.records, 2);
        assert_eq!(steps.first, "1970-01-01T00:01:40.000Z");
        assert_eq!(steps.last, "1970-01-01T00:05:00.000Z");
        assert_eq!(summary["heart rate"].records, 1);
    }
}
