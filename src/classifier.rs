//! Path classification
//!
//! Decides from names alone which directories of an export are worth
//! descending into and which files may hold fitness data. Export layouts are
//! not stable across locales and exporter versions, so matching is permissive:
//! a false positive only costs a file that decodes to nothing, while a false
//! negative loses data.

use crate::config::ExtractConfig;
use crate::types::CandidateFile;
use regex::Regex;
use std::path::{Component, Path, PathBuf};
use std::sync::LazyLock;
use walkdir::WalkDir;

const LOG_TARGET: &str = "ingest::classifier";


/// Directory names of the data categories inside an export
const CATEGORY_MARKERS: &[&str] = &[
    "fit",
    "google fit",
    "all data",
    "all sessions",
    "daily activity metrics",
    "daily aggregations",
    "activities",
];

static CATEGORY_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)fit|activit|health|sleep|heart|step|workout|exercise|body|weight|nutrition|session|aggregat")
        .expect("invalid regex")
});

/// Outer container folders, which exporters rename with copy counters and timestamps
static CONTAINER_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)takeout|export").expect("invalid regex"));

static VENDOR_NAMESPACE_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(?:^|[_.])(?:com|org|net|io)\.[a-z0-9]+\.").expect("invalid regex")
});

/// Name and path heuristics for export trees
#[derive(Debug, Clone)]
pub struct PathClassifier {
    extra_markers: Vec<String>,
    lenient: bool,
}

impl Default for PathClassifier {
    fn default() -> Self {
        Self::new(&ExtractConfig::default())
    }
}

impl PathClassifier {
    pub fn new(config: &ExtractConfig) -> Self {
        Self {
            extra_markers: config
                .extra_markers
                .iter()
                .map(|m| m.trim().to_lowercase())
                .collect(),
            lenient: config.lenient_descent,
        }
    }

    /// Whether a directory with this base name should be entered
    pub fn should_descend(&self, directory_name: &str) -> bool {
        CONTAINER_REGEX.is_match(directory_name) || self.is_category(directory_name)
    }

    /// Whether a path segment names a fitness data category
    pub fn is_category(&self, segment: &str) -> bool {
        let lower = segment.trim().to_lowercase();
        CATEGORY_MARKERS.contains(&lower.as_str())
            || self.extra_markers.iter().any(|m| *m == lower)
            || CATEGORY_REGEX.is_match(segment)
    }

    /// Descent decision for a directory given its path below the archive root
    ///
    /// In lenient mode any matching ancestor admits the whole subtree.
    pub fn should_descend_path(&self, relative: &Path) -> bool {
        if self.lenient {
            segments(relative).any(|s| self.should_descend(&s))
        } else {
            relative
                .file_name()
                .is_some_and(|name| self.should_descend(&name.to_string_lossy()))
        }
    }

    /// Whether a file (path relative to the archive root) may hold export data
    pub fn is_candidate_file(&self, relative: &Path) -> bool {
        let Some(file_name) = relative.file_name().map(|n| n.to_string_lossy()) else {
            return false;
        };

        let is_json = relative
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
        if !is_json {
            return false;
        }

        let in_category = relative
            .parent()
            .is_some_and(|parent| segments(parent).any(|s| self.is_category(&s)));

        in_category
            || file_name.to_lowercase().starts_with("derived_")
            || VENDOR_NAMESPACE_REGEX.is_match(&file_name)
    }

    /// Lazily walk `root` and yield candidate files in deterministic order
    ///
    /// Entries are visited sorted by file name. Unreadable directories are
    /// logged and their subtree skipped; the walk itself never fails.
    pub fn candidate_files<'a>(
        &'a self,
        root: &'a Path,
        follow_links: bool,
    ) -> impl Iterator<Item = CandidateFile> + 'a {
        WalkDir::new(root)
            .follow_links(follow_links)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(move |entry| {
                entry.depth() == 0
                    || !entry.file_type().is_dir()
                    || self.should_descend_path(&relative_to(root, entry.path()))
            })
            .filter_map(|entry| match entry {
                Ok(entry) => Some(entry),
                Err(e) => {
                    let path = e
                        .path()
                        .map(|p| p.display().to_string())
                        .unwrap_or_default();
                    log::warn!(target: LOG_TARGET, "Skipping unreadable path '{path}': {e}");
                    None
                }
            })
            .filter(|entry| entry.file_type().is_file())
            .filter_map(move |entry| {
                let relative = relative_to(root, entry.path());
                if self.is_candidate_file(&relative) {
                    Some((entry.into_path(), relative))
                } else {
                    log::trace!(target: LOG_TARGET, "Ignoring '{}'", relative.display());
                    None
                }
            })
            .enumerate()
            .map(|(index, (path, relative))| CandidateFile {
                path,
                relative,
                index,
            })
    }
}

fn relative_to(root: &Path, path: &Path) -> PathBuf {
    path.strip_prefix(root).unwrap_or(path).to_path_buf()
}

fn segments(path: &Path) -> impl Iterator<Item = String> + '_ {
    path.components().filter_map(|c| match c {
        Component::Normal(s) => Some(s.to_string_lossy().into_owned()),
        _ => None,
    })
}
