//! Archive intake
//!
//! Decompression is not done here: callers plug in an [`ArchiveUnpacker`].
//! This module checks admission limits on the unpacked tree, runs extraction
//! and stamps the result, leaving nothing behind when unpacking fails.

use crate::error::IngestError;
use crate::extractor::Extractor;
use crate::types::{ExtractionResult, IntegrityDigest};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

const LOG_TARGET: &str = "ingest::archive";

/// Default ceiling on files in an unpacked archive
pub const DEFAULT_MAX_FILES: u64 = 200_000;

/// Default ceiling on total bytes in an unpacked archive (4 GiB)
pub const DEFAULT_MAX_BYTES: u64 = 4 * 1024 * 1024 * 1024;

/// Trait for archive unpackers
pub trait ArchiveUnpacker {
    /// Unpack `archive` into `dest`
    ///
    /// Invalid or truncated input must fail with [`IngestError::CorruptArchive`].
    fn unpack(&self, archive: &Path, dest: &Path) -> Result<(), IngestError>;
}

/// File count and byte size of a directory tree
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TreeSize {
    pub files: u64,
    pub bytes: u64,
}

impl TreeSize {
    /// Measure every regular file below `root`
    pub fn measure(root: &Path) -> Self {
        let mut size = TreeSize::default();
        for entry in WalkDir::new(root).follow_links(false) {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    log::debug!(target: LOG_TARGET, "Not measuring unreadable entry: {e}");
                    continue;
                }
            };
            if entry.file_type().is_file() {
                size.files += 1;
                size.bytes += entry.metadata().map(|m| m.len()).unwrap_or(0);
            }
        }
        size
    }
}

/// Size ceilings applied before a walk starts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdmissionLimits {
    pub max_files: u64,
    pub max_bytes: u64,
}

impl Default for AdmissionLimits {
    fn default() -> Self {
        Self {
            max_files: DEFAULT_MAX_FILES,
            max_bytes: DEFAULT_MAX_BYTES,
        }
    }
}

impl AdmissionLimits {
    /// Reject trees over either ceiling
    pub fn admit(&self, root: &Path) -> Result<TreeSize, IngestError> {
        let size = TreeSize::measure(root);
        if size.files > self.max_files || size.bytes > self.max_bytes {
            return Err(IngestError::ArchiveTooLarge {
                files: size.files,
                bytes: size.bytes,
                max_files: self.max_files,
                max_bytes: self.max_bytes,
            });
        }
        Ok(size)
    }
}

/// Outcome of a successful ingestion
#[derive(Debug, Clone, Serialize)]
pub struct Ingested {
    /// Directory the archive was unpacked into
    pub workdir: PathBuf,
    pub result: ExtractionResult,
    pub digest: IntegrityDigest,
}

/// Admit, extract and stamp an already unpacked directory
pub fn ingest_directory(
    root: &Path,
    limits: &AdmissionLimits,
    extractor: &Extractor,
) -> Result<Ingested, IngestError> {
    let size = limits.admit(root)?;
    log::debug!(
        target: LOG_TARGET,
        "Admitted '{}' ({} files, {} bytes)",
        root.display(),
        size.files,
        size.bytes
    );

    let result = extractor.extract(root)?;
    let digest = IntegrityDigest::of_result(&result)?;

    Ok(Ingested {
        workdir: root.to_path_buf(),
        result,
        digest,
    })
}

/// Unpack `archive` into `workdir`, then ingest it
///
/// If unpacking fails and `workdir` did not exist beforehand, it is removed
/// again so a failed upload leaves no partial tree.
pub fn ingest(
    unpacker: &dyn ArchiveUnpacker,
    archive: &Path,
    workdir: &Path,
    limits: &AdmissionLimits,
    extractor: &Extractor,
) -> Result<Ingested, IngestError> {
    let existed = workdir.exists();

    if let Err(e) = unpacker.unpack(archive, workdir) {
        log::warn!(target: LOG_TARGET, "Unpacking '{}' failed: {e}", archive.display());
        if !existed && workdir.exists() {
            if let Err(cleanup) = fs::remove_dir_all(workdir) {
                log::warn!(
                    target: LOG_TARGET,
                    "Could not remove partial unpack at '{}': {cleanup}",
                    workdir.display()
                );
            }
        }
        return Err(e);
    }

    ingest_directory(workdir, limits, extractor)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::integrity;
    use tempfile::TempDir;

    /// Writes a fixed export tree, or fails half way like a truncated archive
    struct FakeUnpacker {
        corrupt: bool,
    }

    impl ArchiveUnpacker for FakeUnpacker {
        fn unpack(&self, _archive: &Path, dest: &Path) -> Result<(), IngestError> {
            let dir = dest.join("Takeout").join("Fit");
            fs::create_dir_all(&dir)?;
            if self.corrupt {
                return Err(IngestError::CorruptArchive("unexpected end of archive".to_string()));
            }
            fs::write(
                dir.join("heart_rate.json"),
                r#"[{"startTime": "2024-01-01T00:00:00Z", "bpm": 58}]"#,
            )?;
            Ok(())
        }
    }

    #[test]
    fn test_ingest_stamps_result() {
        let dir = TempDir::new().unwrap();
        let workdir = dir.path().join("upload");

        let ingested = ingest(
            &FakeUnpacker { corrupt: false },
            Path::new("export.zip"),
            &workdir,
            &AdmissionLimits::default(),
            &Extractor::default(),
        )
        .unwrap();

        assert_eq!(ingested.result.len(), 1);
        assert_eq!(ingested.result.records()[0].metric, "heart rate");
        assert!(integrity::verify(
            &ingested.digest.hex,
            &ingested.result.artifact().unwrap()
        ));
    }

    #[test]
    fn test_corrupt_archive_leaves_nothing_behind() {
        let dir = TempDir::new().unwrap();
        let workdir = dir.path().join("upload");

        let err = ingest(
            &FakeUnpacker { corrupt: true },
            Path::new("export.zip"),
            &workdir,
            &AdmissionLimits::default(),
            &Extractor::default(),
        )
        .unwrap_err();

        assert!(matches!(err, IngestError::CorruptArchive(_)));
        assert!(!workdir.exists());
    }

    #[test]
    fn test_admission_limits() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("a.json"), "[]").unwrap();
        fs::write(dir.path().join("b.json"), "[1]").unwrap();

        let size = AdmissionLimits::default().admit(dir.path()).unwrap();
        assert_eq!(size, TreeSize { files: 2, bytes: 5 });

        let tight = AdmissionLimits {
            max_files: 1,
            ..AdmissionLimits::default()
        };
        assert!(matches!(
            tight.admit(dir.path()),
            Err(IngestError::ArchiveTooLarge { files: 2, .. })
        ));
    }
}
