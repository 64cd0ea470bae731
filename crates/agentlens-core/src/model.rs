use super::Content;
use serde::{Deserialize, Serialize};

/// Request to an LLM, as far as telemetry needs to see it
#[derive(Debug, Clone, Default)]
pub struct LLMRequest {
    pub model: String,
}

impl LLMRequest {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
        }
    }
}

/// Response from an LLM
#[derive(Debug, Clone, Default)]
pub struct LLMResponse {
    pub content: Option<Content>,
    pub partial: bool,
    pub turn_complete: bool,
    pub error_code: Option<String>,
    pub usage_metadata: Option<UsageMetadata>,
    /// Model that actually served the request, when the provider reports one
    pub model_version: Option<String>,
}

/// Token accounting reported by the model provider
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageMetadata {
    #[serde(default)]
    pub prompt_token_count: i64,
    #[serde(default)]
    pub candidates_token_count: i64,
    #[serde(default)]
    pub total_token_count: i64,
}

impl UsageMetadata {
    /// Total tokens, derived from the prompt and candidate counts when the
    /// provider left it at zero.
    pub fn effective_total(&self) -> i64 {
        if self.total_token_count == 0
            && (self.prompt_token_count > 0 || self.candidates_token_count > 0)
        {
            self.prompt_token_count + self.candidates_token_count
        } else {
            self.total_token_count
        }
    }
}
