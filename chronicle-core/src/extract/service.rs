//! Extraction through the Claude Messages API.

use super::{ChapterBatch, ExtractError, ExtractionRequest, Extractor};
use crate::config::{Credentials, IngestConfig};
use async_trait::async_trait;
use claude::{Claude, Request};
use tracing::{debug, warn};

/// Extracts chapters by forcing a call to the `record_chapter` tool.
pub struct ClaudeExtractor {
    client: Claude,
    max_tokens: usize,
}

impl ClaudeExtractor {
    /// Default response budget; a busy chapter produces a large record.
    pub const DEFAULT_MAX_TOKENS: usize = 16_000;

    pub fn new(client: Claude) -> Self {
        Self {
            client,
            max_tokens: Self::DEFAULT_MAX_TOKENS,
        }
    }

    /// Create from the ANTHROPIC_API_KEY environment variable.
    pub fn from_env() -> Result<Self, ExtractError> {
        Ok(Self::new(Claude::from_env()?))
    }

    /// Create from loaded credentials and the run configuration.
    pub fn from_config(credentials: &Credentials, config: &IngestConfig) -> Self {
        let client = Claude::new(credentials.api_key())
            .with_model(&config.model)
            .with_retry(config.retry);
        Self::new(client).with_max_tokens(config.max_tokens)
    }

    pub fn with_max_tokens(mut self, max_tokens: usize) -> Self {
        self.max_tokens = max_tokens;
        self
    }
}

#[async_trait]
impl Extractor for ClaudeExtractor {
    async fn extract(&self, request: &ExtractionRequest) -> Result<String, ExtractError> {
        let api_request = Request::new(request.user.as_str())
            .with_system(&request.system)
            .with_max_tokens(self.max_tokens)
            .with_temperature(0.0)
            .forcing_tool(ChapterBatch::as_tool());

        let response = self.client.complete(api_request).await?;
        debug!(
            chapter = %request.chapter,
            input_tokens = response.usage.input_tokens,
            output_tokens = response.usage.output_tokens,
            "extraction response"
        );
        if response.is_truncated() {
            warn!(chapter = %request.chapter, max_tokens = self.max_tokens, "extraction output truncated");
        }

        // A forced tool call carries the payload as its input; anything else
        // falls through to the repair pass as text.
        match response.tool_input(ChapterBatch::tool_name()) {
            Some(input) => Ok(input.to_string()),
            None => Ok(response.text()),
        }
    }
}
