//! Run configuration and extraction-service credentials.

use claude::RetryPolicy;
use std::fmt;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Model used for extraction unless overridden.
pub const DEFAULT_MODEL: &str = "claude-sonnet-4-20250514";

/// Environment variable holding the API key.
pub const API_KEY_VAR: &str = "ANTHROPIC_API_KEY";

/// Configuration for an ingestion run.
#[derive(Debug, Clone)]
pub struct IngestConfig {
    /// Where the six collections and the ledger live.
    pub data_dir: PathBuf,

    /// Where chapter narratives (and pre-extracted batches) live.
    pub chapters_dir: PathBuf,

    /// Curated alias declarations; defaults to `{data_dir}/aliases.json`.
    pub aliases_file: Option<PathBuf>,

    /// Model to use for extraction.
    pub model: String,

    /// Maximum tokens for an extraction response.
    pub max_tokens: usize,

    /// Retry policy for calls to the extraction service.
    pub retry: RetryPolicy,

    /// How many times unparseable output is requested again.
    pub parse_attempts: u32,

    /// Run the full merge in memory without writing anything.
    pub dry_run: bool,

    /// Merge chapters even if the ledger says they are done.
    pub force: bool,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self::new("data")
    }
}

impl IngestConfig {
    /// Create a config rooted at a data directory.
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            chapters_dir: PathBuf::from("chapters"),
            aliases_file: None,
            model: DEFAULT_MODEL.to_string(),
            max_tokens: 16_000,
            retry: RetryPolicy::default(),
            parse_attempts: 2,
            dry_run: false,
            force: false,
        }
    }

    pub fn with_chapters_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.chapters_dir = dir.into();
        self
    }

    pub fn with_aliases_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.aliases_file = Some(path.into());
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_max_tokens(mut self, tokens: usize) -> Self {
        self.max_tokens = tokens;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_parse_attempts(mut self, attempts: u32) -> Self {
        self.parse_attempts = attempts.max(1);
        self
    }

    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn with_force(mut self, force: bool) -> Self {
        self.force = force;
        self
    }

    pub fn aliases_path(&self) -> PathBuf {
        self.aliases_file
            .clone()
            .unwrap_or_else(|| self.data_dir.join("aliases.json"))
    }

    pub fn ledger_path(&self) -> PathBuf {
        self.data_dir.join("ledger.json")
    }

    /// Where raw payloads of failed extractions are kept.
    pub fn failed_dir(&self) -> PathBuf {
        self.data_dir.join("failed")
    }
}

/// Errors loading credentials.
#[derive(Debug, Error)]
pub enum CredentialsError {
    #[error("cannot read credentials file {}: {source}", .path.display())]
    File {
        path: PathBuf,
        #[source]
        source: dotenvy::Error,
    },

    #[error("ANTHROPIC_API_KEY is not set")]
    Missing,
}

/// Credentials for the extraction service.
#[derive(Clone)]
pub struct Credentials {
    api_key: String,
}

impl Credentials {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
        }
    }

    /// Load credentials from an explicit file, or from `.env` if present,
    /// then read the API key from the environment.
    pub fn load(file: Option<&Path>) -> Result<Self, CredentialsError> {
        match file {
            Some(path) => dotenvy::from_path(path).map_err(|source| CredentialsError::File {
                path: path.to_path_buf(),
                source,
            })?,
            None => {
                dotenvy::dotenv().ok();
            }
        }
        Self::from_env()
    }

    /// Read the API key from the environment only.
    pub fn from_env() -> Result<Self, CredentialsError> {
        match std::env::var(API_KEY_VAR) {
            Ok(key) if !key.trim().is_empty() => Ok(Self::new(key.trim())),
            _ => Err(CredentialsError::Missing),
        }
    }

    pub fn api_key(&self) -> &str {
        &self.api_key
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("api_key", &"<redacted>")
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_builder() {
        let config = IngestConfig::new("/tmp/chronicle")
            .with_chapters_dir("/tmp/chapters")
            .with_model("claude-3-5-haiku-20241022")
            .with_parse_attempts(0)
            .with_dry_run(true);

        assert_eq!(config.parse_attempts, 1);
        assert!(config.dry_run);
        assert!(!config.force);
        assert_eq!(config.aliases_path(), PathBuf::from("/tmp/chronicle/aliases.json"));
        assert_eq!(config.ledger_path(), PathBuf::from("/tmp/chronicle/ledger.json"));
        assert_eq!(config.failed_dir(), PathBuf::from("/tmp/chronicle/failed"));
    }

    #[test]
    fn test_explicit_aliases_file() {
        let config = IngestConfig::default().with_aliases_file("curated/aliases.json");
        assert_eq!(config.aliases_path(), PathBuf::from("curated/aliases.json"));
    }

    #[test]
    fn test_credentials_are_redacted() {
        let credentials = Credentials::new("sk-ant-secret");
        assert_eq!(credentials.api_key(), "sk-ant-secret");
        assert!(!format!("{credentials:?}").contains("secret"));
    }

    #[test]
    fn test_missing_credentials_file() {
        let err = Credentials::load(Some(Path::new("/nonexistent/credentials.env"))).unwrap_err();
        assert!(matches!(err, CredentialsError::File { .. }));
    }
}
