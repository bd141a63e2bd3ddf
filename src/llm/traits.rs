//! LlmBackend trait definition
//!
//! Uniform completion interface over the supported provider wire formats.
//! Same pattern as `GraphStore`: async trait + Send + Sync so backends can be
//! shared as `Arc<dyn LlmBackend>`.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::error::BackendError;

/// A single chat-style completion request
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CompletionRequest {
    pub system: String,
    pub prompt: String,
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
}

/// Token usage reported by a provider
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct TokenUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

/// Raw completion text plus usage when the provider reports it
#[derive(Debug, Clone, PartialEq)]
pub struct Completion {
    pub text: String,
    pub usage: Option<TokenUsage>,
}

/// Abstract interface for a language-model backend.
///
/// # Implementations
///
/// - [`HttpLlmBackend`](super::HttpLlmBackend): reqwest client speaking the
///   Ollama, OpenAI-compatible and Anthropic wire formats
/// - [`MockLlmBackend`](super::MockLlmBackend): scripted replies for tests
#[async_trait]
pub trait LlmBackend: Send + Sync {
    /// Run one completion. Timeouts applied by the caller are separate from
    /// any transport-level timeout the backend uses.
    async fn complete(&self, request: &CompletionRequest) -> Result<Completion, BackendError>;

    /// Name of the provider profile this backend serves
    fn name(&self) -> &str;
}
