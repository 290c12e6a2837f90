//! Synheart Ingest - Fitness export extraction with integrity stamping
//!
//! Ingest walks an unpacked fitness-data export, decodes every recognizable
//! JSON data file into normalized `(timestamp, metric, value, device)` records
//! and seals the sorted result with a SHA-256 digest:
//! path classification → metric naming → point decoding → sort → stamp.
//!
//! ## Modules
//!
//! - **Extraction**: walk, decode and fold an export tree ([`Extractor`])
//! - **Integrity**: digest and verify the canonical artifact
//! - **Archive / Store**: admission limits around extraction and a result store

pub mod archive;
pub mod classifier;
pub mod config;
pub mod decoder;
pub mod error;
pub mod extractor;
pub mod integrity;
pub mod resolver;
pub mod store;
pub mod types;

// FFI bindings for C interop (always available for cdylib/staticlib builds)
pub mod ffi;

pub use classifier::PathClassifier;
pub use config::ExtractConfig;
pub use decoder::PointDecoder;
pub use error::{IngestError, SkipReason};
pub use extractor::{extract, Extractor};
pub use resolver::MetricResolver;
pub use store::ResultStore;
pub use types::{ExtractionResult, IntegrityDigest, NormalizedRecord, UNKNOWN_DEVICE};

/// Ingest version
pub const INGEST_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Producer name recorded by collaborators alongside stored artifacts
pub const PRODUCER_NAME: &str = "synheart-ingest";
