//! HTTP LLM backend implementation
//!
//! Implements `LlmBackend` over three wire formats:
//! - **Ollama**: `POST {base_url}/api/chat` with `stream: false`
//! - **OpenAI-compatible** (OpenAI, LiteLLM, vLLM, LM Studio): `POST {base_url}/v1/chat/completions`
//! - **Anthropic**: `POST {base_url}/v1/messages`
//!
//! API keys are read from the environment variable named by the profile's
//! `api_key_env`.
//!
//! Status mapping: 429 is a rate limit (honouring `retry-after`), 408 and 504
//! are timeouts, every other non-success status is a failure.

use super::error::BackendError;
use super::profiles::{ProviderKind, ProviderProfile};
use super::traits::{Completion, CompletionRequest, LlmBackend, TokenUsage};
use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::json;

const ANTHROPIC_VERSION: &str = "2023-06-01";

/// HTTP-based LLM backend.
///
/// Cheaply cloneable (shares the reqwest client internally).
#[derive(Clone)]
pub struct HttpLlmBackend {
    client: reqwest::Client,
    name: String,
    kind: ProviderKind,
    base_url: String,
    api_key: Option<String>,
}

// ----------------------------------------------------------------------------
// Wire formats
// ----------------------------------------------------------------------------

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct OllamaResponse {
    message: OllamaMessage,
    #[serde(default)]
    prompt_eval_count: Option<u64>,
    #[serde(default)]
    eval_count: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct OllamaMessage {
    content: String,
}

#[derive(Debug, Deserialize)]
struct OpenAiResponse {
    choices: Vec<OpenAiChoice>,
    #[serde(default)]
    usage: Option<OpenAiUsage>,
}

#[derive(Debug, Deserialize)]
struct OpenAiChoice {
    message: OpenAiMessage,
}

#[derive(Debug, Deserialize)]
struct OpenAiMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OpenAiUsage {
    prompt_tokens: u64,
    completion_tokens: u64,
}

#[derive(Debug, Deserialize)]
struct AnthropicResponse {
    content: Vec<AnthropicBlock>,
    #[serde(default)]
    usage: Option<AnthropicUsage>,
}

#[derive(Debug, Deserialize)]
struct AnthropicBlock {
    #[serde(rename = "type")]
    block_type: String,
    #[serde(default)]
    text: String,
}

#[derive(Debug, Deserialize)]
struct AnthropicUsage {
    input_tokens: u64,
    output_tokens: u64,
}

impl HttpLlmBackend {
    /// Create a backend for a provider profile.
    ///
    /// Fails only if the HTTP client cannot be built.
    pub fn new(profile: &ProviderProfile) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(profile.timeout())
            .build()
            .context("Failed to build HTTP client")?;

        let api_key = profile
            .api_key_env
            .as_deref()
            .and_then(|var| std::env::var(var).ok())
            .filter(|k| !k.is_empty());

        Ok(Self {
            client,
            name: profile.name.clone(),
            kind: profile.kind,
            base_url: profile.base_url.trim_end_matches('/').to_string(),
            api_key,
        })
    }

    fn endpoint(&self) -> String {
        match self.kind {
            ProviderKind::Ollama => format!("{}/api/chat", self.base_url),
            ProviderKind::OpenaiCompatible => format!("{}/v1/chat/completions", self.base_url),
            ProviderKind::Anthropic => format!("{}/v1/messages", self.base_url),
        }
    }

    fn body(&self, request: &CompletionRequest) -> serde_json::Value {
        let system = ChatMessage {
            role: "system",
            content: &request.system,
        };
        let user = ChatMessage {
            role: "user",
            content: &request.prompt,
        };
        match self.kind {
            ProviderKind::Ollama => json!({
                "model": request.model,
                "messages": [system, user],
                "stream": false,
                "options": {
                    "temperature": request.temperature,
                    "num_predict": request.max_tokens,
                },
            }),
            ProviderKind::OpenaiCompatible => json!({
                "model": request.model,
                "messages": [system, user],
                "temperature": request.temperature,
                "max_tokens": request.max_tokens,
            }),
            ProviderKind::Anthropic => json!({
                "model": request.model,
                "system": request.system,
                "messages": [user],
                "temperature": request.temperature,
                "max_tokens": request.max_tokens,
            }),
        }
    }

    fn parse(&self, body: &str) -> Result<Completion, BackendError> {
        let malformed =
            |e: serde_json::Error| BackendError::Failed(format!("malformed response body: {}", e));
        match self.kind {
            ProviderKind::Ollama => {
                let resp: OllamaResponse = serde_json::from_str(body).map_err(malformed)?;
                let usage = match (resp.prompt_eval_count, resp.eval_count) {
                    (Some(input), Some(output)) => Some(TokenUsage {
                        input_tokens: input,
                        output_tokens: output,
                    }),
                    _ => None,
                };
                Ok(Completion {
                    text: resp.message.content,
                    usage,
                })
            }
            ProviderKind::OpenaiCompatible => {
                let resp: OpenAiResponse = serde_json::from_str(body).map_err(malformed)?;
                let text = resp
                    .choices
                    .into_iter()
                    .next()
                    .and_then(|c| c.message.content)
                    .ok_or_else(|| BackendError::Failed("response has no choices".to_string()))?;
                Ok(Completion {
                    text,
                    usage: resp.usage.map(|u| TokenUsage {
                        input_tokens: u.prompt_tokens,
                        output_tokens: u.completion_tokens,
                    }),
                })
            }
            ProviderKind::Anthropic => {
                let resp: AnthropicResponse = serde_json::from_str(body).map_err(malformed)?;
                let text: String = resp
                    .content
                    .into_iter()
                    .filter(|b| b.block_type == "text")
                    .map(|b| b.text)
                    .collect::<Vec<_>>()
                    .join("");
                Ok(Completion {
                    text,
                    usage: resp.usage.map(|u| TokenUsage {
                        input_tokens: u.input_tokens,
                        output_tokens: u.output_tokens,
                    }),
                })
            }
        }
    }
}

/// Parse a `retry-after` header given in seconds
fn retry_after_ms(headers: &reqwest::header::HeaderMap) -> Option<u64> {
    headers
        .get(reqwest::header::RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<f64>()
        .ok()
        .filter(|secs| *secs >= 0.0)
        .map(|secs| (secs * 1000.0) as u64)
}

#[async_trait]
impl LlmBackend for HttpLlmBackend {
    async fn complete(&self, request: &CompletionRequest) -> Result<Completion, BackendError> {
        let url = self.endpoint();
        let mut req = self.client.post(&url).json(&self.body(request));

        if let Some(ref key) = self.api_key {
            req = match self.kind {
                ProviderKind::Anthropic => req.header("x-api-key", key),
                _ => req.header("Authorization", format!("Bearer {}", key)),
            };
        }
        if self.kind == ProviderKind::Anthropic {
            req = req.header("anthropic-version", ANTHROPIC_VERSION);
        }

        let response = req.send().await.map_err(|e| {
            if e.is_timeout() {
                BackendError::Timeout
            } else {
                BackendError::Failed(format!("request to {} failed: {}", url, e))
            }
        })?;

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(BackendError::RateLimited {
                retry_after_ms: retry_after_ms(response.headers()),
            });
        }
        if status == StatusCode::REQUEST_TIMEOUT || status == StatusCode::GATEWAY_TIMEOUT {
            return Err(BackendError::Timeout);
        }

        let body = response.text().await.map_err(|e| {
            if e.is_timeout() {
                BackendError::Timeout
            } else {
                BackendError::Failed(format!("failed to read response body: {}", e))
            }
        })?;

        if !status.is_success() {
            return Err(BackendError::Failed(format!(
                "HTTP {}: {}",
                status.as_u16(),
                body
            )));
        }

        self.parse(&body)
    }

    fn name(&self) -> &str {
        &self.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn profile(kind: ProviderKind, base_url: &str) -> ProviderProfile {
        ProviderProfile {
            name: "test".to_string(),
            is_local: true,
            capability_tags: BTreeSet::new(),
            cost_per_1k_tokens: 0.0,
            max_retries: 0,
            timeout_ms: 5_000,
            kind,
            model: "m".to_string(),
            base_url: format!("{}/", base_url),
            api_key_env: None,
        }
    }

    fn request() -> CompletionRequest {
        CompletionRequest {
            system: "sys".to_string(),
            prompt: "hello".to_string(),
            model: "m".to_string(),
            temperature: 0.2,
            max_tokens: 64,
        }
    }

    #[tokio::test]
    async fn test_ollama_chat() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/chat"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "message": {"role": "assistant", "content": "hi"},
                "prompt_eval_count": 12,
                "eval_count": 3
            })))
            .mount(&server)
            .await;

        let backend = HttpLlmBackend::new(&profile(ProviderKind::Ollama, &server.uri())).unwrap();
        let completion = backend.complete(&request()).await.unwrap();
        assert_eq!(completion.text, "hi");
        assert_eq!(
            completion.usage,
            Some(TokenUsage {
                input_tokens: 12,
                output_tokens: 3
            })
        );
    }

    #[tokio::test]
    async fn test_openai_compatible_chat() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "choices": [{"message": {"role": "assistant", "content": "{\"a\":1}"}}],
                "usage": {"prompt_tokens": 5, "completion_tokens": 7}
            })))
            .mount(&server)
            .await;

        let backend =
            HttpLlmBackend::new(&profile(ProviderKind::OpenaiCompatible, &server.uri())).unwrap();
        let completion = backend.complete(&request()).await.unwrap();
        assert_eq!(completion.text, "{\"a\":1}");
        assert_eq!(completion.usage.unwrap().output_tokens, 7);
    }

    #[tokio::test]
    async fn test_anthropic_messages_sends_version_header() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/messages"))
            .and(header("anthropic-version", ANTHROPIC_VERSION))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "content": [{"type": "text", "text": "part one "}, {"type": "text", "text": "two"}],
                "usage": {"input_tokens": 9, "output_tokens": 4}
            })))
            .mount(&server)
            .await;

        let backend =
            HttpLlmBackend::new(&profile(ProviderKind::Anthropic, &server.uri())).unwrap();
        let completion = backend.complete(&request()).await.unwrap();
        assert_eq!(completion.text, "part one two");
    }

    #[tokio::test]
    async fn test_status_mapping() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/chat"))
            .respond_with(ResponseTemplate::new(429).insert_header("retry-after", "2"))
            .mount(&server)
            .await;
        let backend = HttpLlmBackend::new(&profile(ProviderKind::Ollama, &server.uri())).unwrap();
        assert_eq!(
            backend.complete(&request()).await.unwrap_err(),
            BackendError::RateLimited {
                retry_after_ms: Some(2000)
            }
        );

        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(504))
            .mount(&server)
            .await;
        let backend = HttpLlmBackend::new(&profile(ProviderKind::Ollama, &server.uri())).unwrap();
        assert_eq!(
            backend.complete(&request()).await.unwrap_err(),
            BackendError::Timeout
        );

        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(401).set_body_string("bad key"))
            .mount(&server)
            .await;
        let backend = HttpLlmBackend::new(&profile(ProviderKind::Ollama, &server.uri())).unwrap();
        match backend.complete(&request()).await.unwrap_err() {
            BackendError::Failed(msg) => assert!(msg.contains("401")),
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_malformed_body_is_failure() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
            .mount(&server)
            .await;
        let backend = HttpLlmBackend::new(&profile(ProviderKind::Ollama, &server.uri())).unwrap();
        assert!(matches!(
            backend.complete(&request()).await.unwrap_err(),
            BackendError::Failed(_)
        ));
    }
}
