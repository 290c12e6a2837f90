//! Integrity stamping
//!
//! SHA-256 over the canonical artifact bytes of an extraction result. The
//! same bytes always give the same digest, so a stored artifact can be
//! re-hashed later to prove it has not been altered.

use crate::error::IngestError;
use crate::types::{ExtractionResult, IntegrityDigest};
use chrono::Utc;
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::{self, Read};
use std::path::Path;

/// Name of the digest algorithm recorded in [`IntegrityDigest`]
pub const DIGEST_ALGORITHM: &str = "sha256";

const SHA256_HEX_LEN: usize = 64;

/// Hex SHA-256 digest of `artifact`
pub fn stamp(artifact: &[u8]) -> String {
    hex::encode(Sha256::digest(artifact))
}

/// Whether `digest_hex` matches the digest of `artifact`
///
/// Upper- and lower-case hex are accepted; anything that is not a 64 digit
/// hex string never verifies.
pub fn verify(digest_hex: &str, artifact: &[u8]) -> bool {
    match normalize_digest(digest_hex) {
        Some(expected) => expected == stamp(artifact),
        None => false,
    }
}

/// Digest of everything readable from `reader`, streamed in 8 KiB chunks
pub fn stamp_reader(mut reader: impl Read) -> io::Result<String> {
    let mut hasher = Sha256::new();
    let mut buffer = [0u8; 8 * 1024];
    loop {
        let read = reader.read(&mut buffer)?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
    }
    Ok(hex::encode(hasher.finalize()))
}

/// Verify a persisted artifact file against a digest
pub fn verify_file(digest_hex: &str, path: impl AsRef<Path>) -> io::Result<bool> {
    let Some(expected) = normalize_digest(digest_hex) else {
        return Ok(false);
    };
    let file = File::open(path)?;
    Ok(stamp_reader(file)? == expected)
}

fn normalize_digest(digest_hex: &str) -> Option<String> {
    let trimmed = digest_hex.trim();
    if trimmed.len() != SHA256_HEX_LEN || !trimmed.bytes().all(|b| b.is_ascii_hexdigit()) {
        return None;
    }
    Some(trimmed.to_ascii_lowercase())
}

impl IntegrityDigest {
    /// Stamp arbitrary artifact bytes, recording the capture time
    pub fn capture(artifact: &[u8]) -> Self {
        Self {
            algorithm: DIGEST_ALGORITHM.to_string(),
            hex: stamp(artifact),
            captured_at: Utc::now(),
        }
    }

    /// Stamp the canonical artifact of an extraction result
    pub fn of_result(result: &ExtractionResult) -> Result<Self, IngestError> {
        Ok(Self::capture(&result.artifact()?))
    }

    /// Whether `artifact` still matches this digest
    pub fn verify(&self, artifact: &[u8]) -> bool {
        self.algorithm == DIGEST_ALGORITHM && verify(&self.hex, artifact)
    }
}
