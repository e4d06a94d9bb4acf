//! Testing utilities for the ingestion pipeline.
//!
//! This module provides tools for integration testing:
//! - `MockExtractor` for deterministic extraction without API calls
//! - `ChapterFixture` for laying out chapter and data directories

use crate::config::IngestConfig;
use crate::extract::{ChapterBatch, ExtractError, ExtractionRequest, Extractor};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

/// A scripted response from the mock extractor.
#[derive(Debug, Clone)]
pub enum MockResponse {
    /// Raw output returned as if from the service.
    Payload(String),
    /// The service fails with this status.
    ServiceError { status: u16, message: String },
}

impl MockResponse {
    /// Serialize a batch as the service would return it.
    pub fn batch(batch: &ChapterBatch) -> Self {
        MockResponse::Payload(serde_json::to_string(batch).unwrap_or_default())
    }
}

impl From<String> for MockResponse {
    fn from(raw: String) -> Self {
        MockResponse::Payload(raw)
    }
}

/// An extractor that returns scripted responses in order.
///
/// Once the script runs out it returns an empty batch.
pub struct MockExtractor {
    responses: Mutex<VecDeque<MockResponse>>,
    requests: Mutex<Vec<ExtractionRequest>>,
    calls: AtomicUsize,
}

impl MockExtractor {
    pub fn new<R: Into<MockResponse>>(responses: Vec<R>) -> Self {
        Self {
            responses: Mutex::new(responses.into_iter().map(Into::into).collect()),
            requests: Mutex::new(Vec::new()),
            calls: AtomicUsize::new(0),
        }
    }

    /// Add a response to the queue.
    pub fn queue(&self, response: impl Into<MockResponse>) {
        if let Ok(mut responses) = self.responses.lock() {
            responses.push_back(response.into());
        }
    }

    /// Number of extraction calls made so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Every request received, in order.
    pub fn requests(&self) -> Vec<ExtractionRequest> {
        self.requests.lock().map(|r| r.clone()).unwrap_or_default()
    }
}

impl From<ChapterBatch> for MockResponse {
    fn from(batch: ChapterBatch) -> Self {
        MockResponse::batch(&batch)
    }
}

#[async_trait]
impl Extractor for MockExtractor {
    async fn extract(&self, request: &ExtractionRequest) -> Result<String, ExtractError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut requests) = self.requests.lock() {
            requests.push(request.clone());
        }

        let next = self.responses.lock().ok().and_then(|mut r| r.pop_front());
        match next {
            Some(MockResponse::Payload(raw)) => Ok(raw),
            Some(MockResponse::ServiceError { status, message }) => {
                Err(ExtractError::Service(claude::Error::Api { status, message }))
            }
            None => Ok("{}".to_string()),
        }
    }
}

/// Chapter and data directories under one root, for pipeline tests.
pub struct ChapterFixture {
    root: PathBuf,
}

impl ChapterFixture {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn chapters_dir(&self) -> PathBuf {
        self.root.join("chapters")
    }

    pub fn data_dir(&self) -> PathBuf {
        self.root.join("data")
    }

    /// A config pointing at this fixture.
    pub fn config(&self) -> IngestConfig {
        IngestConfig::new(self.data_dir()).with_chapters_dir(self.chapters_dir())
    }

    /// Write a chapter narrative.
    pub fn write_chapter(&self, key: &str, narrative: &str) -> std::io::Result<PathBuf> {
        self.write(&self.chapters_dir(), &format!("{key}.md"), narrative)
    }

    /// Write a pre-extracted batch beside the chapter.
    pub fn write_batch(&self, key: &str, batch: &ChapterBatch) -> std::io::Result<PathBuf> {
        let content = serde_json::to_string_pretty(batch)?;
        self.write(&self.chapters_dir(), &format!("{key}.json"), &content)
    }

    fn write(&self, dir: &Path, name: &str, content: &str) -> std::io::Result<PathBuf> {
        std::fs::create_dir_all(dir)?;
        let path = dir.join(name);
        std::fs::write(&path, content)?;
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extract::SYSTEM_PROMPT;

    fn request() -> ExtractionRequest {
        ExtractionRequest {
            chapter: "chapter_01".to_string(),
            system: SYSTEM_PROMPT.to_string(),
            user: "Nothing happens.".to_string(),
        }
    }

    #[tokio::test]
    async fn test_mock_extractor_script() {
        let extractor = MockExtractor::new(vec![
            MockResponse::Payload("first".to_string()),
            MockResponse::ServiceError {
                status: 529,
                message: "overloaded".to_string(),
            },
        ]);

        assert_eq!(extractor.extract(&request()).await.unwrap(), "first");
        let err = extractor.extract(&request()).await.unwrap_err();
        assert!(matches!(err, ExtractError::Service(ref e) if e.is_transient()));
        // Out of script: an empty batch.
        assert_eq!(extractor.extract(&request()).await.unwrap(), "{}");

        assert_eq!(extractor.calls(), 3);
        assert_eq!(extractor.requests()[0].chapter, "chapter_01");
    }
}
