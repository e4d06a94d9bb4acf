//! Chapter discovery.
//!
//! A chapter is a narrative file `{key}.md` or `{key}.txt` in the chapters
//! directory. A `{key}.json` beside it holds a pre-extracted batch and is
//! used instead of calling the extraction service.

use crate::persist::PersistError;
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;

const NARRATIVE_EXTENSIONS: [&str; 2] = ["md", "txt"];

/// The files making up one chapter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChapterSource {
    pub key: String,
    pub narrative: Option<PathBuf>,
    pub batch: Option<PathBuf>,
}

impl ChapterSource {
    fn new(key: &str) -> Self {
        Self {
            key: key.to_string(),
            narrative: None,
            batch: None,
        }
    }

    /// Whether the extraction service is needed for this chapter.
    pub fn needs_extraction(&self) -> bool {
        self.batch.is_none()
    }

    pub async fn read_narrative(&self) -> Result<String, PersistError> {
        match &self.narrative {
            Some(path) => Ok(fs::read_to_string(path).await?),
            None => Ok(String::new()),
        }
    }
}

/// List every chapter in natural key order (`chapter_2` before `chapter_10`).
///
/// A missing directory has no chapters.
pub async fn discover(dir: &Path) -> Result<Vec<ChapterSource>, PersistError> {
    let mut entries = match fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };

    let mut found: BTreeMap<String, ChapterSource> = BTreeMap::new();
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if !entry.file_type().await?.is_file() {
            continue;
        }
        let (Some(stem), Some(ext)) = (
            path.file_stem().and_then(|s| s.to_str()),
            path.extension().and_then(|s| s.to_str()),
        ) else {
            continue;
        };
        let ext = ext.to_ascii_lowercase();

        if NARRATIVE_EXTENSIONS.contains(&ext.as_str()) {
            let source = found.entry(stem.to_string()).or_insert_with(|| ChapterSource::new(stem));
            // `.md` wins over `.txt` when both exist.
            if source.narrative.is_none() || ext == "md" {
                source.narrative = Some(path.clone());
            }
        } else if ext == "json" {
            found.entry(stem.to_string()).or_insert_with(|| ChapterSource::new(stem)).batch = Some(path.clone());
        }
    }

    let mut chapters: Vec<ChapterSource> = found.into_values().collect();
    chapters.sort_by(|a, b| natural_cmp(&a.key, &b.key));
    Ok(chapters)
}

/// Compare strings treating digit runs as numbers.
pub fn natural_cmp(a: &str, b: &str) -> Ordering {
    let mut a = chunks(a).into_iter();
    let mut b = chunks(b).into_iter();
    loop {
        match (a.next(), b.next()) {
            (None, None) => return Ordering::Equal,
            (None, Some(_)) => return Ordering::Less,
            (Some(_), None) => return Ordering::Greater,
            (Some(x), Some(y)) => {
                let ordering = match (x.parse::<u64>(), y.parse::<u64>()) {
                    (Ok(m), Ok(n)) => m.cmp(&n).then_with(|| x.len().cmp(&y.len())),
                    _ => x.cmp(y),
                };
                if ordering != Ordering::Equal {
                    return ordering;
                }
            }
        }
    }
}

fn chunks(s: &str) -> Vec<&str> {
    let mut out = Vec::new();
    let mut start = 0;
    let mut digits = None;
    for (i, c) in s.char_indices() {
        let is_digit = c.is_ascii_digit();
        if digits.is_some_and(|d| d != is_digit) {
            out.push(&s[start..i]);
            start = i;
        }
        digits = Some(is_digit);
    }
    if start < s.len() {
        out.push(&s[start..]);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_natural_order() {
        let mut keys = vec!["chapter_10", "chapter_2", "chapter_1", "appendix", "chapter_02b"];
        keys.sort_by(|a, b| natural_cmp(a, b));
        assert_eq!(keys, vec!["appendix", "chapter_1", "chapter_2", "chapter_02b", "chapter_10"]);
    }

    #[tokio::test]
    async fn test_discover_pairs_narratives_and_batches() {
        let dir = TempDir::new().unwrap();
        for name in ["chapter_10.md", "chapter_2.txt", "chapter_2.json", "notes.pdf", "chapter_3.json"] {
            fs::write(dir.path().join(name), "{}").await.unwrap();
        }
        fs::create_dir(dir.path().join("drafts.md")).await.unwrap();

        let chapters = discover(dir.path()).await.unwrap();
        let keys: Vec<&str> = chapters.iter().map(|c| c.key.as_str()).collect();
        assert_eq!(keys, vec!["chapter_2", "chapter_3", "chapter_10"]);

        assert!(!chapters[0].needs_extraction());
        assert!(chapters[0].narrative.is_some());
        assert!(chapters[1].narrative.is_none());
        assert!(chapters[2].needs_extraction());
    }

    #[tokio::test]
    async fn test_missing_directory() {
        let dir = TempDir::new().unwrap();
        assert!(discover(&dir.path().join("none")).await.unwrap().is_empty());
    }
}
