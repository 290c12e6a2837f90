//! Extraction settings
//!
//! Settings can be built in code with the `with_*` methods or loaded from a
//! JSON document. Unknown keys are rejected so typos surface early.

use crate::error::IngestError;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Default number of decode workers (sequential)
pub const DEFAULT_WORKERS: usize = 1;

/// Upper bound on decode workers
pub const MAX_WORKERS: usize = 64;

/// Settings for one extraction run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ExtractConfig {
    /// Descend unconditionally once inside a recognized subtree
    pub lenient_descent: bool,
    /// Number of threads decoding files; 1 decodes on the calling thread
    pub workers: usize,
    /// Additional directory names (case-insensitive) treated as export markers
    pub extra_markers: Vec<String>,
    /// Follow symbolic links during the walk
    pub follow_links: bool,
}

impl Default for ExtractConfig {
    fn default() -> Self {
        Self {
            lenient_descent: true,
            workers: DEFAULT_WORKERS,
            extra_markers: Vec::new(),
            follow_links: false,
        }
    }
}

impl ExtractConfig {
    /// Parse settings from JSON
    pub fn from_json(json: &str) -> Result<Self, IngestError> {
        let config: ExtractConfig =
            serde_json::from_str(json).map_err(|e| IngestError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load settings from a JSON file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, IngestError> {
        let json = fs::read_to_string(path)?;
        Self::from_json(&json)
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    pub fn with_lenient_descent(mut self, lenient: bool) -> Self {
        self.lenient_descent = lenient;
        self
    }

    pub fn with_extra_marker(mut self, marker: impl Into<String>) -> Self {
        self.extra_markers.push(marker.into());
        self
    }

    /// Check value ranges
    pub fn validate(&self) -> Result<(), IngestError> {
        if self.workers == 0 || self.workers > MAX_WORKERS {
            return Err(IngestError::Config(format!(
                "workers must be between 1 and {MAX_WORKERS}, got {}",
                self.workers
            )));
        }
        if self.extra_markers.iter().any(|m| m.trim().is_empty()) {
            return Err(IngestError::Config(
                "extra_markers must not contain blank names".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_from_empty_json() {
        let config = ExtractConfig::from_json("{}").unwrap();
        assert_eq!(config, ExtractConfig::default());
        assert!(config.lenient_descent);
        assert_eq!(config.workers, 1);
    }

    #[test]
    fn test_partial_json_overrides() {
        let config =
            ExtractConfig::from_json(r#"{"workers": 4, "extra_markers": ["Fitnessdaten"]}"#)
                .unwrap();
        assert_eq!(config.workers, 4);
        assert_eq!(config.extra_markers, vec!["Fitnessdaten".to_string()]);
        assert!(config.lenient_descent);
    }

    #[test]
    fn test_rejects_unknown_keys_and_bad_ranges() {
        assert!(matches!(
            ExtractConfig::from_json(r#"{"wokers": 2}"#),
            Err(IngestError::Config(_))
        ));
        assert!(matches!(
            ExtractConfig::from_json(r#"{"workers": 0}"#),
            Err(IngestError::Config(_))
        ));
        assert!(ExtractConfig::default().with_workers(65).validate().is_err());
    }
}
