//! Error types for Synheart Ingest

use std::path::PathBuf;
use thiserror::Error;

/// Errors that end an ingestion call
///
/// Only aggregate conditions are fatal. Unreadable directories, unparseable
/// files and undecodable points are absorbed where they happen (see
/// [`SkipReason`]).
#[derive(Debug, Error)]
pub enum IngestError {
    #[error("Archive could not be unpacked: {0}")]
    CorruptArchive(String),

    #[error("No fitness data found in archive")]
    NoFitDataFound,

    #[error("Fitness data files were found but none contained a decodable record")]
    NoValidDataFound,

    #[error("Archive exceeds admission limits: {files} files / {bytes} bytes (limit {max_files} files / {max_bytes} bytes)")]
    ArchiveTooLarge {
        files: u64,
        bytes: u64,
        max_files: u64,
        max_bytes: u64,
    },

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Invalid JSON: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl IngestError {
    /// User-facing remediation text for the error
    pub fn remediation(&self) -> &'static str {
        match self {
            IngestError::CorruptArchive(_) => {
                "Upload the original export archive again; the file may be truncated or not an archive"
            }
            IngestError::NoFitDataFound => {
                "Re-export your data and make sure the export includes the fitness data category"
            }
            IngestError::NoValidDataFound => {
                "The export format was not recognized; re-export with the latest exporter version"
            }
            IngestError::ArchiveTooLarge { .. } => {
                "Export a shorter date range or fewer data categories"
            }
            IngestError::Config(_) => "Check the configuration file against the documented options",
            IngestError::JsonError(_) => "Check JSON syntax",
            IngestError::Io(_) => "Check file paths and permissions",
        }
    }
}

/// A unit of work that was dropped without failing the extraction
#[derive(Debug, Error)]
pub enum SkipReason {
    #[error("Skipped {path}: {reason}")]
    FileSkipped { path: PathBuf, reason: String },

    #[error("Skipped point {index} in {path}: no {missing}")]
    PointSkipped {
        path: PathBuf,
        index: usize,
        missing: &'static str,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatal_errors_carry_remediation() {
        assert!(IngestError::NoFitDataFound
            .remediation()
            .contains("fitness data category"));
        assert!(!IngestError::NoValidDataFound.remediation().is_empty());
    }

    #[test]
    fn test_skip_reason_display() {
        let skip = SkipReason::PointSkipped {
            path: PathBuf::from("All Data/heart.json"),
            index: 3,
            missing: "timestamp",
        };
        assert_eq!(
            skip.to_string(),
            "Skipped point 3 in All Data/heart.json: no timestamp"
        );
    }
}
