//! Result store
//!
//! Keeps extraction results between the upload that produced them and the
//! requests that read or verify them. Entries are keyed by their integrity
//! digest or by an opaque session id, expire after a fixed time-to-live and
//! are evicted oldest-first once the store is full.

use crate::types::{ExtractionResult, IntegrityDigest};
use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

const LOG_TARGET: &str = "ingest::store";

/// Default time-to-live of a stored result in seconds
pub const DEFAULT_TTL_SECS: i64 = 60 * 60;

/// Default maximum number of stored results
pub const DEFAULT_CAPACITY: usize = 64;

/// A result together with the digest it was sealed with
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredResult {
    pub result: ExtractionResult,
    pub digest: IntegrityDigest,
    pub stored_at: DateTime<Utc>,
}

impl StoredResult {
    /// Recompute the artifact digest and compare it with the sealed one
    pub fn verify(&self) -> bool {
        match self.result.artifact() {
            Ok(artifact) => self.digest.verify(&artifact),
            Err(_) => false,
        }
    }
}

/// Key-value store of extraction results with expiry and a size cap
///
/// Persisted stores are checked on load: the time-to-live must be a positive
/// number of seconds within chrono's range and the capacity at least one.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "PersistedStore", into = "PersistedStore")]
pub struct ResultStore {
    entries: HashMap<String, StoredResult>,
    ttl: TimeDelta,
    capacity: usize,
}

/// On-disk form of a [`ResultStore`]
#[derive(Serialize, Deserialize)]
struct PersistedStore {
    entries: HashMap<String, StoredResult>,
    ttl_secs: i64,
    capacity: usize,
}

impl TryFrom<PersistedStore> for ResultStore {
    type Error = String;

    fn try_from(persisted: PersistedStore) -> Result<Self, Self::Error> {
        let ttl = TimeDelta::try_seconds(persisted.ttl_secs)
            .filter(|ttl| *ttl > TimeDelta::zero())
            .ok_or_else(|| format!("ttl_secs out of range: {}", persisted.ttl_secs))?;
        if persisted.capacity == 0 {
            return Err("capacity must be at least 1".to_string());
        }
        Ok(Self {
            entries: persisted.entries,
            ttl,
            capacity: persisted.capacity,
        })
    }
}

impl From<ResultStore> for PersistedStore {
    fn from(store: ResultStore) -> Self {
        Self {
            entries: store.entries,
            ttl_secs: store.ttl.num_seconds(),
            capacity: store.capacity,
        }
    }
}

impl Default for ResultStore {
    fn default() -> Self {
        Self::new(TimeDelta::seconds(DEFAULT_TTL_SECS), DEFAULT_CAPACITY)
    }
}

impl ResultStore {
    /// Create a store with the given time-to-live and capacity
    pub fn new(ttl: TimeDelta, capacity: usize) -> Self {
        Self {
            entries: HashMap::new(),
            ttl: ttl.max(TimeDelta::zero()),
            capacity: capacity.max(1),
        }
    }

    /// Store under the digest hex; identical content maps to the same key
    pub fn put(&mut self, result: ExtractionResult, digest: IntegrityDigest) -> String {
        let key = digest.hex.clone();
        self.put_at(key.clone(), result, digest, Utc::now());
        key
    }

    /// Store under a fresh opaque session id
    pub fn put_session(&mut self, result: ExtractionResult, digest: IntegrityDigest) -> String {
        let key = Uuid::new_v4().to_string();
        self.put_at(key.clone(), result, digest, Utc::now());
        key
    }

    /// Store under an explicit key at an explicit time
    pub fn put_at(
        &mut self,
        key: String,
        result: ExtractionResult,
        digest: IntegrityDigest,
        now: DateTime<Utc>,
    ) {
        self.evict_expired_at(now);
        self.entries.insert(
            key,
            StoredResult {
                result,
                digest,
                stored_at: now,
            },
        );

        while self.entries.len() > self.capacity {
            let oldest = self
                .entries
                .iter()
                .min_by(|a, b| a.1.stored_at.cmp(&b.1.stored_at).then_with(|| a.0.cmp(b.0)))
                .map(|(key, _)| key.clone());
            match oldest {
                Some(key) => {
                    log::debug!(target: LOG_TARGET, "Evicting '{key}' (store full)");
                    self.entries.remove(&key);
                }
                None => break,
            }
        }
    }

    pub fn get(&self, key: &str) -> Option<&StoredResult> {
        self.get_at(key, Utc::now())
    }

    /// Look up an entry; expired entries are invisible even before eviction
    pub fn get_at(&self, key: &str, now: DateTime<Utc>) -> Option<&StoredResult> {
        self.entries
            .get(key)
            .filter(|entry| !self.is_expired(entry, now))
    }

    pub fn remove(&mut self, key: &str) -> Option<StoredResult> {
        self.entries.remove(key)
    }

    /// Drop expired entries, returning how many were removed
    pub fn evict_expired_at(&mut self, now: DateTime<Utc>) -> usize {
        let before = self.entries.len();
        let ttl = self.ttl;
        self.entries.retain(|_, entry| now - entry.stored_at < ttl);
        let evicted = before - self.entries.len();
        if evicted > 0 {
            log::debug!(target: LOG_TARGET, "Evicted {evicted} expired results");
        }
        evicted
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn is_expired(&self, entry: &StoredResult, now: DateTime<Utc>) -> bool {
        now - entry.stored_at >= self.ttl
    }

    /// Load a store from JSON
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Serialize the store to JSON
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::NormalizedRecord;
    use chrono::TimeZone;

    fn sealed(value: &str) -> (ExtractionResult, IntegrityDigest) {
        let record = NormalizedRecord {
            timestamp: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
            metric: "steps".to_string(),
            value: value.to_string(),
            device: "Pixel Watch".to_string(),
        };
        let result = ExtractionResult::new(
            vec![record],
            ["steps".to_string()].into(),
            ["Pixel Watch".to_string()].into(),
            1,
            0,
        );
        let digest = IntegrityDigest::of_result(&result).unwrap();
        (result, digest)
    }

    fn at(minutes: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap() + TimeDelta::minutes(minutes)
    }

    #[test]
    fn test_put_keys_by_digest() {
        let mut store = ResultStore::default();
        let (result, digest) = sealed("100");
        let hex = digest.hex.clone();

        let key = store.put(result, digest);
        assert_eq!(key, hex);
        assert!(store.get(&key).unwrap().verify());
    }

    #[test]
    fn test_session_keys_are_unique() {
        let mut store = ResultStore::default();
        let (result, digest) = sealed("100");
        let a = store.put_session(result.clone(), digest.clone());
        let b = store.put_session(result, digest);
        assert_ne!(a, b);
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn test_expiry() {
        let mut store = ResultStore::new(TimeDelta::minutes(30), 8);
        let (result, digest) = sealed("100");
        store.put_at("k".to_string(), result, digest, at(0));

        assert!(store.get_at("k", at(29)).is_some());
        assert!(store.get_at("k", at(30)).is_none());
        assert_eq!(store.evict_expired_at(at(31)), 1);
        assert!(store.is_empty());
    }

    #[test]
    fn test_capacity_evicts_oldest() {
        let mut store = ResultStore::new(TimeDelta::hours(1), 2);
        for (i, key) in ["a", "b", "c"].iter().enumerate() {
            let (result, digest) = sealed(&i.to_string());
            store.put_at(key.to_string(), result, digest, at(i as i64));
        }

        assert_eq!(store.len(), 2);
        assert!(store.get_at("a", at(3)).is_none());
        assert!(store.get_at("b", at(3)).is_some());
        assert!(store.get_at("c", at(3)).is_some());
    }

    #[test]
    fn test_tampered_entry_fails_verification() {
        let mut store = ResultStore::default();
        let (result, digest) = sealed("100");
        let (tampered, _) = sealed("101");

        let key = store.put(result, digest.clone());
        assert!(store.get(&key).unwrap().verify());

        let forged = StoredResult {
            result: tampered,
            digest,
            stored_at: Utc::now(),
        };
        assert!(!forged.verify());
    }

    #[test]
    fn test_from_json_rejects_out_of_range_ttl() {
        for ttl_secs in [i64::MAX, 0, -5] {
            let json = format!(r#"{{"entries":{{}},"ttl_secs":{ttl_secs},"capacity":4}}"#);
            assert!(ResultStore::from_json(&json).is_err(), "accepted ttl_secs {ttl_secs}");
        }
    }

    #[test]
    fn test_from_json_rejects_zero_capacity() {
        assert!(ResultStore::from_json(r#"{"entries":{},"ttl_secs":3600,"capacity":0}"#).is_err());

        let mut store =
            ResultStore::from_json(r#"{"entries":{},"ttl_secs":3600,"capacity":1}"#).unwrap();
        let (result, digest) = sealed("100");
        let key = store.put(result, digest);
        assert!(store.get(&key).is_some());
    }

    #[test]
    fn test_serialization() {
        let mut store = ResultStore::default();
        let (result, digest) = sealed("100");
        let key = store.put(result, digest);

        let json = store.to_json().unwrap();
        let loaded = ResultStore::from_json(&json).unwrap();
        assert_eq!(loaded.len(), 1);
        assert!(loaded.get(&key).unwrap().verify());
    }
}
