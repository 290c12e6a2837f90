//! Extraction orchestration
//!
//! This module provides the core entry point of Synheart Ingest. It walks an
//! unpacked export, decodes every candidate file and folds the records into
//! one time-ordered [`ExtractionResult`].
//!
//! Stages:
//! 1. PathClassifier - lazily yield candidate files
//! 2. MetricResolver - one metric label per file
//! 3. PointDecoder - one record per decodable point
//! 4. ExtractionBuilder - accumulate, then sort by timestamp

use crate::classifier::PathClassifier;
use crate::config::ExtractConfig;
use crate::decoder::PointDecoder;
use crate::error::{IngestError, SkipReason};
use crate::resolver::MetricResolver;
use crate::types::{CandidateFile, ExtractionResult, NormalizedRecord};
use serde_json::Value;
use std::collections::BTreeSet;
use std::fs;
use std::io;
use std::panic;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;

const LOG_TARGET: &str = "ingest::extractor";

const UTF8_BOM: &[u8] = b"\xEF\xBB\xBF";

/// Extract normalized records from an unpacked export with default settings.
///
/// # Arguments
/// * `root` - Directory the archive was unpacked into
///
/// # Returns
/// Records sorted by timestamp, plus the distinct metrics and devices
///
/// # Example
/// ```ignore
/// let result = synheart_ingest::extract("/tmp/upload-123")?;
/// println!("{} records", result.len());
/// ```
pub fn extract(root: impl AsRef<Path>) -> Result<ExtractionResult, IngestError> {
    Extractor::new(ExtractConfig::default())?.extract(root)
}

/// Records decoded from a single candidate file
#[derive(Debug, Clone)]
pub struct DecodedFile {
    /// Walk position of the source file
    pub index: usize,
    pub metric: String,
    pub records: Vec<NormalizedRecord>,
    /// Points dropped for lack of a value or timestamp
    pub points_skipped: usize,
}

/// Decode every point of one candidate file
///
/// Read and parse failures skip the whole file; undecodable points are
/// dropped individually.
pub fn decode_file(candidate: &CandidateFile) -> Result<DecodedFile, SkipReason> {
    let skip = |reason: String| SkipReason::FileSkipped {
        path: candidate.relative.clone(),
        reason,
    };

    let body = fs::read(&candidate.path).map_err(|e| skip(e.to_string()))?;
    let body = body.strip_prefix(UTF8_BOM).unwrap_or(&body);
    let document: Value = serde_json::from_slice(body).map_err(|e| skip(e.to_string()))?;

    let metric = MetricResolver::resolve(&candidate.file_name());
    let mut records = Vec::new();
    let mut points_skipped = 0;

    for (index, point) in PointDecoder::points(document).iter().enumerate() {
        match PointDecoder::decode(point) {
            Ok(decoded) => records.push(NormalizedRecord {
                timestamp: decoded.timestamp,
                metric: metric.clone(),
                value: decoded.value,
                device: decoded.device,
            }),
            Err(missing) => {
                if points_skipped == 0 {
                    let reason = SkipReason::PointSkipped {
                        path: candidate.relative.clone(),
                        index,
                        missing: missing.as_str(),
                    };
                    log::trace!(target: LOG_TARGET, "{reason}");
                }
                points_skipped += 1;
            }
        }
    }

    if points_skipped > 0 {
        log::debug!(
            target: LOG_TARGET,
            "Dropped {points_skipped} undecodable points from '{}'",
            candidate.relative.display()
        );
    }

    Ok(DecodedFile {
        index: candidate.index,
        metric,
        records,
        points_skipped,
    })
}

/// Accumulates decoded files into an [`ExtractionResult`]
///
/// Files must be added in walk order so that records with equal timestamps
/// keep file-then-point order after the final stable sort.
#[derive(Debug, Default)]
pub struct ExtractionBuilder {
    records: Vec<NormalizedRecord>,
    metrics: BTreeSet<String>,
    devices: BTreeSet<String>,
    files_scanned: usize,
    files_skipped: usize,
    points_skipped: usize,
}

impl ExtractionBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold the outcome of one candidate file
    pub fn add(&mut self, outcome: Result<DecodedFile, SkipReason>) {
        self.files_scanned += 1;
        match outcome {
            Ok(file) => {
                self.points_skipped += file.points_skipped;
                for record in file.records {
                    self.metrics.insert(record.metric.clone());
                    self.devices.insert(record.device.clone());
                    self.records.push(record);
                }
            }
            Err(reason) => {
                log::warn!(target: LOG_TARGET, "{reason}");
                self.files_skipped += 1;
            }
        }
    }

    /// Sort the records and seal the result
    pub fn finish(mut self) -> Result<ExtractionResult, IngestError> {
        if self.files_scanned == 0 {
            return Err(IngestError::NoFitDataFound);
        }
        if self.records.is_empty() {
            return Err(IngestError::NoValidDataFound);
        }

        self.records.sort_by(|a, b| a.timestamp.cmp(&b.timestamp));

        log::info!(
            target: LOG_TARGET,
            "Extracted {} records ({} metrics, {} devices) from {} files; {} files and {} points skipped",
            self.records.len(),
            self.metrics.len(),
            self.devices.len(),
            self.files_scanned,
            self.files_skipped,
            self.points_skipped,
        );

        Ok(ExtractionResult::new(
            self.records,
            self.metrics,
            self.devices,
            self.files_scanned,
            self.files_skipped,
        ))
    }
}

/// Extraction coordinator with its own settings
///
/// Holds no state between calls; every `extract` owns its accumulator.
#[derive(Debug, Clone)]
pub struct Extractor {
    config: ExtractConfig,
    classifier: PathClassifier,
}

impl Default for Extractor {
    fn default() -> Self {
        let config = ExtractConfig::default();
        Self {
            classifier: PathClassifier::new(&config),
            config,
        }
    }
}

impl Extractor {
    /// Create an extractor; fails if the settings are out of range
    pub fn new(config: ExtractConfig) -> Result<Self, IngestError> {
        config.validate()?;
        Ok(Self {
            classifier: PathClassifier::new(&config),
            config,
        })
    }

    pub fn config(&self) -> &ExtractConfig {
        &self.config
    }

    /// Candidate files below `root`, in walk order
    pub fn candidates<'a>(&'a self, root: &'a Path) -> impl Iterator<Item = CandidateFile> + 'a {
        self.classifier
            .candidate_files(root, self.config.follow_links)
    }

    /// Walk `root`, decode every candidate and return the sorted result
    pub fn extract(&self, root: impl AsRef<Path>) -> Result<ExtractionResult, IngestError> {
        let root = root.as_ref();
        if !fs::metadata(root)?.is_dir() {
            return Err(IngestError::Io(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("'{}' is not a directory", root.display()),
            )));
        }

        log::info!(target: LOG_TARGET, "Extracting fitness data from '{}'", root.display());

        let mut builder = ExtractionBuilder::new();
        if self.config.workers <= 1 {
            for candidate in self.candidates(root) {
                builder.add(decode_file(&candidate));
            }
        } else {
            let candidates: Vec<CandidateFile> = self.candidates(root).collect();
            for outcome in decode_parallel(&candidates, self.config.workers, decode_file) {
                builder.add(outcome);
            }
        }

        builder.finish()
    }
}

/// Decode files on a bounded set of scoped threads
///
/// Outcomes come back in walk order regardless of which worker produced them.
/// A panicking worker fails the whole extraction; its panic is re-raised on
/// the calling thread once every worker has stopped.
fn decode_parallel<F>(
    candidates: &[CandidateFile],
    workers: usize,
    decode: F,
) -> Vec<Result<DecodedFile, SkipReason>>
where
    F: Fn(&CandidateFile) -> Result<DecodedFile, SkipReason> + Sync,
{
    let workers = workers.min(candidates.len()).max(1);
    let next = AtomicUsize::new(0);
    let next = &next;
    let decode = &decode;

    let mut outcomes: Vec<(usize, Result<DecodedFile, SkipReason>)> = thread::scope(|scope| {
        let handles: Vec<_> = (0..workers)
            .map(|_| {
                scope.spawn(move || {
                    let mut local = Vec::new();
                    loop {
                        let position = next.fetch_add(1, Ordering::Relaxed);
                        let Some(candidate) = candidates.get(position) else {
                            break;
                        };
                        local.push((position, decode(candidate)));
                    }
                    local
                })
            })
            .collect();

        handles
            .into_iter()
            .flat_map(|handle| match handle.join() {
                Ok(local) => local,
                Err(payload) => {
                    log::error!(target: LOG_TARGET, "Decode worker panicked; aborting extraction");
                    panic::resume_unwind(payload)
                }
            })
            .collect()
    });

    outcomes.sort_by_key(|(position, _)| *position);
    outcomes.into_iter().map(|(_, outcome)| outcome).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::integrity;
    use crate::types::UNKNOWN_DEVICE;
    use pretty_assertions::assert_eq;
    use std::path::PathBuf;
    use tempfile::TempDir;

    const MIBAND_SOURCE: &str = "raw:com.google.heart_rate.bpm:com.mc.miband:";

    fn write(root: &Path, relative: &str, body: &str) -> PathBuf {
        let path = root.join(relative);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, body).unwrap();
        path
    }

    fn sample_export() -> TempDir {
        let dir = TempDir::new().unwrap();
        let root = dir.path();

        write(
            root,
            "Takeout/Fit/All Data/derived_com.google.heart_rate.bpm_com.google.android.gms.json",
            r#"{"Data Source": "derived:com.google.heart_rate.bpm", "Data Points": [
                {"fitValue": [{"value": {"fpVal": 64.0}}], "startTimeNanos": 1704067260000000000,
                 "originDataSourceId": "raw:com.google.heart_rate.bpm:com.mc.miband:"},
                {"fitValue": [{"value": {"fpVal": 66.5}}], "startTimeNanos": 1704067200000000000,
                 "originDataSourceId": "raw:com.google.heart_rate.bpm:com.mc.miband:"}
            ]}"#,
        );
        write(
            root,
            "Takeout/Fit/All Data/derived_com.google.heart_rate.bpm_com.google.android.gms (1).json",
            r#"[{"startTime": "2024-01-01T00:00:30Z", "value": [{"fpVal": 70}], "device": "Pixel Watch"}]"#,
        );
        write(
            root,
            "Takeout/Fit/Daily activity metrics/Fitness_StepCount.json",
            r#"[
                {"date": "2024-01-01", "steps": 4200},
                {"steps": 100},
                {"date": "2024-01-02", "steps": 5100, "device": {"manufacturer": "Fitbit"}}
            ]"#,
        );
        write(root, "Takeout/Fit/All Data/broken.json", "{ not json");
        write(root, "Takeout/Photos/album.json", r#"[{"startTime": "2024-01-01T00:00:00Z", "value": 1}]"#);
        dir
    }

    #[test]
    fn test_extract_sample_export() {
        let dir = sample_export();
        let result = extract(dir.path()).unwrap();

        let got: Vec<(String, &str, &str, &str)> = result
            .records()
            .iter()
            .map(|r| (r.timestamp_string(), r.metric.as_str(), r.value.as_str(), r.device.as_str()))
            .collect();

        assert_eq!(
            got,
            vec![
                ("2024-01-01T00:00:00.000Z".to_string(), "heart rate bpm", "66.5", MIBAND_SOURCE),
                ("2024-01-01T00:00:00.000Z".to_string(), "step count", "4200", UNKNOWN_DEVICE),
                ("2024-01-01T00:00:30.000Z".to_string(), "heart rate bpm", "70", "Pixel Watch"),
                ("2024-01-01T00:01:00.000Z".to_string(), "heart rate bpm", "64", MIBAND_SOURCE),
                ("2024-01-02T00:00:00.000Z".to_string(), "step count", "5100", "Fitbit"),
            ]
        );

        let metrics: Vec<&str> = result.metrics().iter().map(String::as_str).collect();
        assert_eq!(metrics, vec!["heart rate bpm", "step count"]);
        assert_eq!(result.devices().len(), 4);
        assert_eq!(result.files_scanned(), 4);
        assert_eq!(result.files_skipped(), 1);
    }

    #[test]
    fn test_records_sorted_and_complete() {
        let dir = sample_export();
        let result = extract(dir.path()).unwrap();

        assert!(result
            .records()
            .windows(2)
            .all(|w| w[0].timestamp <= w[1].timestamp));
        assert!(result
            .records()
            .iter()
            .all(|r| !r.value.is_empty() && !r.device.is_empty()));
    }

    #[test]
    fn test_equal_timestamps_keep_discovery_order() {
        let dir = TempDir::new().unwrap();
        write(
            dir.path(),
            "Fit/a.json",
            r#"[{"startTime": "2024-01-01T00:00:00Z", "value": 1}, {"startTime": "2024-01-01T00:00:00Z", "value": 2}]"#,
        );
        write(dir.path(), "Fit/b.json", r#"{"startTime": "2024-01-01T00:00:00Z", "value": 3}"#);

        let result = extract(dir.path()).unwrap();
        let values: Vec<&str> = result.records().iter().map(|r| r.value.as_str()).collect();
        assert_eq!(values, vec!["1", "2", "3"]);
    }

    #[test]
    fn test_extraction_is_reproducible() {
        let dir = sample_export();
        let first = extract(dir.path()).unwrap();
        let second = extract(dir.path()).unwrap();

        let a = first.artifact().unwrap();
        let b = second.artifact().unwrap();
        assert_eq!(a, b);
        assert_eq!(integrity::stamp(&a), integrity::stamp(&b));
        assert_eq!(
            serde_json::to_string(&first).unwrap(),
            serde_json::to_string(&second).unwrap()
        );
    }

    #[test]
    fn test_parallel_matches_sequential() {
        let dir = sample_export();
        for i in 0..12 {
            write(
                dir.path(),
                &format!("Takeout/Fit/All Data/weight_{i:02}.json"),
                &format!(r#"[{{"startTime": "2024-01-0{}T08:00:00Z", "weight": {}}}]"#, i % 9 + 1, 70 + i),
            );
        }

        let sequential = extract(dir.path()).unwrap();
        let parallel = Extractor::new(ExtractConfig::default().with_workers(4))
            .unwrap()
            .extract(dir.path())
            .unwrap();

        assert_eq!(parallel, sequential);
    }

    #[test]
    fn test_no_fit_data_found() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "notes.json", r#"[{"startTime": "2024-01-01T00:00:00Z", "value": 1}]"#);
        write(dir.path(), "Photos/meta.json", r#"[{"startTime": "2024-01-01T00:00:00Z", "value": 1}]"#);

        assert!(matches!(extract(dir.path()), Err(IngestError::NoFitDataFound)));
    }

    #[test]
    fn test_no_valid_data_found() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "Fit/heart.json", r#"[{"value": 60}, {"bpm": 61}]"#);
        write(dir.path(), "Fit/broken.json", "]");

        assert!(matches!(extract(dir.path()), Err(IngestError::NoValidDataFound)));
    }

    #[test]
    fn test_point_without_timestamp_does_not_affect_others() {
        let dir = TempDir::new().unwrap();
        write(
            dir.path(),
            "Fit/heart.json",
            r#"[{"value": 60}, {"startTime": "2024-01-01T00:00:00Z", "value": 61}]"#,
        );

        let result = extract(dir.path()).unwrap();
        assert_eq!(result.len(), 1);
        assert_eq!(result.records()[0].value, "61");
    }

    #[test]
    fn test_decode_file_strips_bom() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("Fit").join("bom.json");
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        let mut body = UTF8_BOM.to_vec();
        body.extend_from_slice(br#"[{"timestamp": "2024-01-01T00:00:00Z", "calories": 12.5}]"#);
        fs::write(&path, body).unwrap();

        let candidate = CandidateFile {
            path,
            relative: PathBuf::from("Fit/bom.json"),
            index: 0,
        };
        let decoded = decode_file(&candidate).unwrap();
        assert_eq!(decoded.metric, "bom");
        assert_eq!(decoded.records.len(), 1);
        assert_eq!(decoded.records[0].value, "12.5");
    }

    #[test]
    fn test_renamed_outer_folder_is_extracted() {
        for outer in ["Takeout (1)", "takeout-20240315T101010Z-001", "MyExport"] {
            let dir = TempDir::new().unwrap();
            write(
                dir.path(),
                &format!(
                    "{outer}/Fit/All Data/derived_com.google.heart_rate.bpm_com.google.android.gms.json"
                ),
                r#"[{"startTime": "2024-01-01T00:00:00Z", "bpm": 58}]"#,
            );

            let result = extract(dir.path()).unwrap();
            assert_eq!(result.len(), 1, "nothing extracted under '{outer}'");
            assert_eq!(result.records()[0].metric, "heart rate bpm");
        }
    }

    #[test]
    fn test_worker_panic_fails_extraction() {
        let candidates: Vec<CandidateFile> = (0..6)
            .map(|index| CandidateFile {
                path: PathBuf::from(format!("Fit/{index}.json")),
                relative: PathBuf::from(format!("Fit/{index}.json")),
                index,
            })
            .collect();

        let outcome = panic::catch_unwind(|| {
            decode_parallel(&candidates, 3, |candidate| {
                if candidate.index == 4 {
                    panic!("decoder bug");
                }
                Ok(DecodedFile {
                    index: candidate.index,
                    metric: "steps".to_string(),
                    records: Vec::new(),
                    points_skipped: 0,
                })
            })
        });

        assert!(outcome.is_err());
    }

    #[test]
    fn test_missing_root_is_io_error() {
        let dir = TempDir::new().unwrap();
        let missing = dir.path().join("nope");
        assert!(matches!(extract(&missing), Err(IngestError::Io(_))));
    }
}
