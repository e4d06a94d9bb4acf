//! Persistence of the six collections, alias declarations and failed
//! extraction payloads.
//!
//! Each collection lives in its own JSON document:
//!
//! ```text
//! { "version": 1,
//!   "metadata": { "kind", "count", "first_date", "last_date", "updated_at" },
//!   "records": { id: record, ... } }
//! ```
//!
//! [`Store::save_kb`] writes all six documents to temporary files first and
//! only then renames them into place, so a failed write leaves the previous
//! state intact.

use crate::alias::AliasDeclarations;
use crate::config::IngestConfig;
use crate::ids::date_key;
use crate::model::{Collection, EntityKind, KnowledgeBase, Record};
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::fs;
use tracing::debug;

/// Errors from persistence operations.
#[derive(Debug, Error)]
pub enum PersistError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{kind} collection holds record '{key}' under a different ID")]
    MismatchedKey { kind: EntityKind, key: String },

    #[error("Version mismatch: expected {expected}, found {found}")]
    VersionMismatch { expected: u32, found: u32 },
}

/// Current collection file version.
pub const COLLECTION_VERSION: u32 = 1;

/// Summary stored beside the records of a collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectionMetadata {
    pub kind: EntityKind,
    pub count: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_date: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl CollectionMetadata {
    fn describe<T: Record>(records: &Collection<T>) -> Self {
        let mut dated: Vec<(_, &str)> = records
            .values()
            .filter_map(|r| r.date())
            .filter_map(|d| date_key(d).map(|key| (key, d)))
            .collect();
        dated.sort();

        Self {
            kind: T::KIND,
            count: records.len(),
            first_date: dated.first().map(|(_, d)| d.to_string()),
            last_date: dated.last().map(|(_, d)| d.to_string()),
            updated_at: Utc::now(),
        }
    }
}

#[derive(Serialize)]
struct CollectionOut<'a, T> {
    version: u32,
    metadata: CollectionMetadata,
    records: &'a Collection<T>,
}

#[derive(Deserialize)]
struct CollectionIn<T> {
    version: u32,
    #[serde(default = "Collection::new")]
    records: Collection<T>,
}

// ============================================================================
// JSON helpers
// ============================================================================

/// Read a JSON document; a missing file yields `None`.
pub async fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, PersistError> {
    match fs::read_to_string(path).await {
        Ok(content) => Ok(Some(serde_json::from_str(&content)?)),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

/// Write pretty JSON to a temporary file beside `path`.
async fn write_temp<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<PathBuf, PersistError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).await?;
    }
    let tmp = temp_path(path);
    let content = serde_json::to_string_pretty(value)?;
    fs::write(&tmp, content).await?;
    Ok(tmp)
}

/// Write JSON through a temporary file and a rename.
pub async fn write_json_atomic<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<(), PersistError> {
    let tmp = write_temp(path, value).await?;
    fs::rename(&tmp, path).await?;
    Ok(())
}

// ============================================================================
// Store
// ============================================================================

/// The on-disk layout of one knowledge base.
#[derive(Debug, Clone)]
pub struct Store {
    data_dir: PathBuf,
    failed_dir: PathBuf,
}

impl Store {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        let data_dir = data_dir.into();
        Self {
            failed_dir: data_dir.join("failed"),
            data_dir,
        }
    }

    pub fn from_config(config: &IngestConfig) -> Self {
        Self {
            data_dir: config.data_dir.clone(),
            failed_dir: config.failed_dir(),
        }
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn collection_path(&self, kind: EntityKind) -> PathBuf {
        self.data_dir.join(kind.file_name())
    }

    /// Load all six collections. Missing files are empty collections.
    pub async fn load_kb(&self) -> Result<KnowledgeBase, PersistError> {
        Ok(KnowledgeBase {
            events: self.load_collection().await?,
            characters: self.load_collection().await?,
            locations: self.load_collection().await?,
            factions: self.load_collection().await?,
            rolls: self.load_collection().await?,
            laws: self.load_collection().await?,
        })
    }

    async fn load_collection<T: Record>(&self) -> Result<Collection<T>, PersistError> {
        let path = self.collection_path(T::KIND);
        let Some(file) = read_json::<CollectionIn<T>>(&path).await? else {
            debug!(kind = %T::KIND, "no collection file yet");
            return Ok(Collection::new());
        };

        if file.version != COLLECTION_VERSION {
            return Err(PersistError::VersionMismatch {
                expected: COLLECTION_VERSION,
                found: file.version,
            });
        }
        if let Some((key, _)) = file.records.iter().find(|(key, record)| key.as_str() != record.id()) {
            return Err(PersistError::MismatchedKey {
                kind: T::KIND,
                key: key.clone(),
            });
        }
        Ok(file.records)
    }

    /// Write all six collections together.
    ///
    /// Every collection is staged to a temporary file before any is
    /// renamed into place.
    pub async fn save_kb(&self, kb: &KnowledgeBase) -> Result<(), PersistError> {
        let staged = vec![
            self.stage(&kb.events).await?,
            self.stage(&kb.characters).await?,
            self.stage(&kb.locations).await?,
            self.stage(&kb.factions).await?,
            self.stage(&kb.rolls).await?,
            self.stage(&kb.laws).await?,
        ];

        for (tmp, path) in staged {
            fs::rename(&tmp, &path).await?;
        }
        debug!(dir = %self.data_dir.display(), "collections written");
        Ok(())
    }

    async fn stage<T: Record>(&self, records: &Collection<T>) -> Result<(PathBuf, PathBuf), PersistError> {
        let path = self.collection_path(T::KIND);
        let file = CollectionOut {
            version: COLLECTION_VERSION,
            metadata: CollectionMetadata::describe(records),
            records,
        };
        let tmp = write_temp(&path, &file).await?;
        Ok((tmp, path))
    }

    /// Metadata of a persisted collection, without its records.
    pub async fn peek_metadata(&self, kind: EntityKind) -> Result<Option<CollectionMetadata>, PersistError> {
        #[derive(Deserialize)]
        struct Partial {
            metadata: CollectionMetadata,
        }

        let partial: Option<Partial> = read_json(&self.collection_path(kind)).await?;
        Ok(partial.map(|p| p.metadata))
    }

    /// Keep the raw output of a failed extraction for review.
    pub async fn save_failed(&self, chapter: &str, raw: &str) -> Result<PathBuf, PersistError> {
        fs::create_dir_all(&self.failed_dir).await?;
        let path = self.failed_dir.join(format!("{chapter}.raw.txt"));
        fs::write(&path, raw).await?;
        Ok(path)
    }
}

/// Load curated alias declarations; a missing file declares nothing.
pub async fn load_declarations(path: impl AsRef<Path>) -> Result<AliasDeclarations, PersistError> {
    Ok(read_json(path.as_ref()).await?.unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Character, Event};
    use tempfile::TempDir;

    fn sample_kb() -> KnowledgeBase {
        let mut kb = KnowledgeBase::new();
        for (id, date) in [("evt_1248_002", "1248-11-23"), ("evt_1247_001", "1247-08"), ("evt_1250_001", "1250")] {
            kb.events.insert(id.to_string(), Event::new(id, date, "chapter_01").with_summary("x"));
        }
        kb.characters
            .insert("fernando".to_string(), Character::new("fernando", "Fernando III"));
        kb
    }

    #[tokio::test]
    async fn test_save_and_load_kb() {
        let dir = TempDir::new().unwrap();
        let store = Store::new(dir.path());
        let kb = sample_kb();

        store.save_kb(&kb).await.unwrap();
        let loaded = store.load_kb().await.unwrap();
        assert_eq!(loaded, kb);

        for kind in EntityKind::ALL {
            assert!(store.collection_path(kind).exists(), "{kind} not written");
            assert!(!temp_path(&store.collection_path(kind)).exists());
        }
    }

    #[tokio::test]
    async fn test_metadata_spans_dates() {
        let dir = TempDir::new().unwrap();
        let store = Store::new(dir.path());
        store.save_kb(&sample_kb()).await.unwrap();

        let metadata = store.peek_metadata(EntityKind::Event).await.unwrap().unwrap();
        assert_eq!(metadata.count, 3);
        assert_eq!(metadata.first_date.as_deref(), Some("1247-08"));
        assert_eq!(metadata.last_date.as_deref(), Some("1250"));

        let laws = store.peek_metadata(EntityKind::Law).await.unwrap().unwrap();
        assert_eq!(laws.count, 0);
        assert!(laws.first_date.is_none());
    }

    #[tokio::test]
    async fn test_missing_directory_is_empty_kb() {
        let dir = TempDir::new().unwrap();
        let store = Store::new(dir.path().join("fresh"));
        assert!(store.load_kb().await.unwrap().is_empty());
        assert!(store.peek_metadata(EntityKind::Event).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_mismatched_key_rejected() {
        let dir = TempDir::new().unwrap();
        let store = Store::new(dir.path());
        let content = r#"{"version": 1, "records": {"a": {"id": "b", "name": "B"}}}"#;
        fs::write(store.collection_path(EntityKind::Location), content).await.unwrap();

        let err = store.load_kb().await.unwrap_err();
        assert!(matches!(err, PersistError::MismatchedKey { kind: EntityKind::Location, .. }));
    }

    #[tokio::test]
    async fn test_collection_without_records_is_empty() {
        let dir = TempDir::new().unwrap();
        let store = Store::new(dir.path());
        fs::write(store.collection_path(EntityKind::Character), r#"{"version": 1}"#)
            .await
            .unwrap();

        let kb = store.load_kb().await.unwrap();
        assert!(kb.characters.is_empty());
    }

    #[tokio::test]
    async fn test_failed_payload_kept() {
        let dir = TempDir::new().unwrap();
        let store = Store::new(dir.path());
        let path = store.save_failed("chapter_03", "not json at all").await.unwrap();

        assert!(path.ends_with("failed/chapter_03.raw.txt"));
        assert_eq!(fs::read_to_string(&path).await.unwrap(), "not json at all");
    }

    #[tokio::test]
    async fn test_declarations_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("aliases.json");
        assert!(load_declarations(&path).await.unwrap().is_empty());

        fs::write(&path, r#"{"character": {"alfonso_x": ["el Sabio", "Alfonso el Sabio"]}}"#)
            .await
            .unwrap();
        let declarations = load_declarations(&path).await.unwrap();
        assert_eq!(declarations.0[&EntityKind::Character]["alfonso_x"].len(), 2);
    }
}
