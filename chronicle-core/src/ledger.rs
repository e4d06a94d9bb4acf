//! The ingestion ledger.
//!
//! The ledger is the single source of truth for whether a chapter has
//! been merged. It also carries the identifier counters, so it is written
//! after the collections it describes and never before.

use crate::ids::IdAllocator;
use crate::merge::MergeSummary;
use crate::persist::{read_json, write_json_atomic, PersistError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// Current ledger file version.
pub const LEDGER_VERSION: u32 = 1;

/// What the ledger remembers about a merged chapter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChapterEntry {
    pub merged_at: DateTime<Utc>,
    pub summary: MergeSummary,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IngestionLedger {
    pub version: u32,
    #[serde(default)]
    pub chapters: BTreeMap<String, ChapterEntry>,
    /// Next value per identifier partition, `"event:1248" → 8`.
    #[serde(default)]
    pub counters: BTreeMap<String, u32>,
}

impl Default for IngestionLedger {
    fn default() -> Self {
        Self {
            version: LEDGER_VERSION,
            chapters: BTreeMap::new(),
            counters: BTreeMap::new(),
        }
    }
}

impl IngestionLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_merged(&self, chapter: &str) -> bool {
        self.chapters.contains_key(chapter)
    }

    pub fn entry(&self, chapter: &str) -> Option<&ChapterEntry> {
        self.chapters.get(chapter)
    }

    /// Mark a chapter merged and capture the allocator's counters.
    pub fn record(&mut self, chapter: &str, summary: MergeSummary, ids: &IdAllocator) {
        self.chapters.insert(
            chapter.to_string(),
            ChapterEntry {
                merged_at: Utc::now(),
                summary,
            },
        );
        self.counters = ids.counters().clone();
    }

    pub fn len(&self) -> usize {
        self.chapters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chapters.is_empty()
    }

    /// Load a ledger; a missing file is an empty ledger.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self, PersistError> {
        let ledger: Self = match read_json(path.as_ref()).await? {
            Some(ledger) => ledger,
            None => return Ok(Self::new()),
        };

        if ledger.version != LEDGER_VERSION {
            return Err(PersistError::VersionMismatch {
                expected: LEDGER_VERSION,
                found: ledger.version,
            });
        }
        Ok(ledger)
    }

    pub async fn save(&self, path: impl AsRef<Path>) -> Result<(), PersistError> {
        write_json_atomic(path.as_ref(), self).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::IdSpace;
    use tempfile::TempDir;

    #[test]
    fn test_record_captures_counters() {
        let mut ids = IdAllocator::new();
        ids.allocate(IdSpace::Event, "1248");

        let mut ledger = IngestionLedger::new();
        assert!(!ledger.is_merged("chapter_01"));
        ledger.record("chapter_01", MergeSummary::default(), &ids);

        assert!(ledger.is_merged("chapter_01"));
        assert_eq!(ledger.counters.get("event:1248"), Some(&2));
    }

    #[tokio::test]
    async fn test_missing_ledger_is_empty() {
        let dir = TempDir::new().unwrap();
        let ledger = IngestionLedger::load(dir.path().join("ledger.json")).await.unwrap();
        assert!(ledger.is_empty());
        assert_eq!(ledger.version, LEDGER_VERSION);
    }

    #[tokio::test]
    async fn test_save_and_reload() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("ledger.json");

        let mut ids = IdAllocator::new();
        ids.allocate(IdSpace::Roll, "1250");
        let mut ledger = IngestionLedger::new();
        ledger.record("chapter_05", MergeSummary::default(), &ids);
        ledger.save(&path).await.unwrap();

        let loaded = IngestionLedger::load(&path).await.unwrap();
        assert_eq!(loaded, ledger);
    }

    #[tokio::test]
    async fn test_version_mismatch() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("ledger.json");
        tokio::fs::write(&path, r#"{"version": 7, "chapters": {}, "counters": {}}"#)
            .await
            .unwrap();

        let err = IngestionLedger::load(&path).await.unwrap_err();
        assert!(matches!(err, PersistError::VersionMismatch { expected: 1, found: 7 }));
    }
}
