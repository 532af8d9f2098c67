//! Persisted cache index format
//!
//! The index is read leniently: unknown fields are ignored and an entry that
//! fails to parse is dropped on its own without discarding the rest.

use crate::backend::BackendId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use tracing::warn;

/// Current on-disk format version
pub const INDEX_VERSION: u32 = 1;

/// File name of the index inside the cache directory
pub const INDEX_FILE: &str = "index.json";

/// A prior successful build
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub fingerprint: String,
    pub backend: BackendId,
    pub backend_version: String,
    /// Entry point as requested (before any pre-transform)
    pub entry_point: PathBuf,
    pub artifact: PathBuf,
    pub created_at: DateTime<Utc>,
    #[serde(default = "default_valid")]
    pub valid: bool,
}

fn default_valid() -> bool {
    true
}

/// Per-backend attempt counts on this machine
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackendHistory {
    #[serde(default)]
    pub successes: u32,
    #[serde(default)]
    pub failures: u32,
}

impl BackendHistory {
    pub fn record(&mut self, success: bool) {
        if success {
            self.successes = self.successes.saturating_add(1);
        } else {
            self.failures = self.failures.saturating_add(1);
        }
    }

    /// Success rate, `None` without any history
    pub fn success_rate(&self) -> Option<f64> {
        let total = self.successes as u64 + self.failures as u64;
        if total == 0 {
            None
        } else {
            Some(self.successes as f64 / total as f64)
        }
    }
}

/// Index as written to disk
#[derive(Debug, Clone, Default, Serialize)]
pub struct CacheIndex {
    pub version: u32,
    pub entries: BTreeMap<String, CacheEntry>,
    pub history: BTreeMap<BackendId, BackendHistory>,
}

/// Index as read from disk, before per-entry validation
#[derive(Debug, Deserialize)]
struct RawIndex {
    #[serde(default)]
    version: u32,
    #[serde(default)]
    entries: BTreeMap<String, serde_json::Value>,
    #[serde(default)]
    history: BTreeMap<String, serde_json::Value>,
}

impl CacheIndex {
    pub fn new() -> Self {
        Self {
            version: INDEX_VERSION,
            ..Default::default()
        }
    }

    /// Parse an index, dropping unreadable entries
    ///
    /// Returns the index and the fingerprints that were dropped.
    pub fn parse(json: &str) -> Result<(Self, Vec<String>), serde_json::Error> {
        let raw: RawIndex = serde_json::from_str(json)?;
        if raw.version > INDEX_VERSION {
            warn!(
                version = raw.version,
                supported = INDEX_VERSION,
                "cache index written by a newer version, reading known fields only"
            );
        }

        let mut index = Self::new();
        let mut dropped = Vec::new();
        for (key, value) in raw.entries {
            match serde_json::from_value::<CacheEntry>(value) {
                Ok(entry) if entry.fingerprint == key && entry.valid => {
                    index.entries.insert(key, entry);
                }
                Ok(_) => dropped.push(key),
                Err(e) => {
                    warn!(fingerprint = %key, error = %e, "dropping unreadable cache entry");
                    dropped.push(key);
                }
            }
        }
        for (key, value) in raw.history {
            let (Ok(backend), Ok(history)) = (
                key.parse::<BackendId>(),
                serde_json::from_value::<BackendHistory>(value),
            ) else {
                continue;
            };
            index.history.insert(backend, history);
        }
        Ok((index, dropped))
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn entry(fingerprint: &str) -> CacheEntry {
        CacheEntry {
            fingerprint: fingerprint.to_string(),
            backend: BackendId::Bundler,
            backend_version: "6.3.0".to_string(),
            entry_point: PathBuf::from("main.py"),
            artifact: PathBuf::from("dist/main"),
            created_at: Utc::now(),
            valid: true,
        }
    }

    #[test]
    fn test_index_survives_write_and_read() {
        let mut index = CacheIndex::new();
        index.entries.insert("abc".to_string(), entry("abc"));
        index
            .history
            .insert(BackendId::Translator, BackendHistory { successes: 2, failures: 1 });

        let (parsed, dropped) = CacheIndex::parse(&index.to_json().unwrap()).unwrap();
        assert!(dropped.is_empty());
        assert_eq!(parsed.entries, index.entries);
        assert_eq!(parsed.history, index.history);
    }

    #[test]
    fn test_unknown_fields_are_ignored() {
        let json = r#"{
            "version": 1,
            "future_setting": {"a": 1},
            "entries": {
                "abc": {
                    "fingerprint": "abc",
                    "backend": "freezer",
                    "backend_version": "7.2",
                    "entry_point": "main.py",
                    "artifact": "dist/main",
                    "created_at": "2026-01-01T00:00:00Z",
                    "compression": "upx"
                }
            }
        }"#;
        let (index, dropped) = CacheIndex::parse(json).unwrap();
        assert!(dropped.is_empty());
        assert_eq!(index.entries["abc"].backend, BackendId::Freezer);
        assert!(index.entries["abc"].valid);
    }

    #[test]
    fn test_corrupt_entry_is_dropped_alone() {
        let json = r#"{
            "version": 1,
            "entries": {
                "bad": {"fingerprint": "bad", "backend": "nonsense"},
                "mismatch": {
                    "fingerprint": "other",
                    "backend": "bundler",
                    "backend_version": "6",
                    "entry_point": "main.py",
                    "artifact": "dist/main",
                    "created_at": "2026-01-01T00:00:00Z"
                }
            },
            "history": {"bundler": {"successes": 3}}
        }"#;
        let (index, mut dropped) = CacheIndex::parse(json).unwrap();
        dropped.sort();
        assert!(index.entries.is_empty());
        assert_eq!(dropped, vec!["bad".to_string(), "mismatch".to_string()]);
        assert_eq!(index.history[&BackendId::Bundler].successes, 3);
    }

    #[test]
    fn test_success_rate() {
        let mut history = BackendHistory::default();
        assert_eq!(history.success_rate(), None);
        history.record(true);
        history.record(false);
        history.record(true);
        history.record(true);
        assert_eq!(history.success_rate(), Some(0.75));
    }
}
