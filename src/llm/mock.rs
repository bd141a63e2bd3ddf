//! Scripted mock LLM backend for tests
//!
//! Replies are consumed from a FIFO script; once it is empty the fallback
//! reply is used for every further call. Every request is recorded so tests
//! can assert on call counts and prompt contents.

use super::error::BackendError;
use super::traits::{Completion, CompletionRequest, LlmBackend, TokenUsage};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

/// One scripted reply
#[derive(Debug, Clone)]
pub enum MockReply {
    Text {
        text: String,
        usage: Option<TokenUsage>,
    },
    Timeout,
    RateLimited(Option<u64>),
    Fail(String),
    /// Sleep before answering, to exercise caller-side timeouts
    Delayed(Duration, Box<MockReply>),
    /// Panic inside the backend call
    Panic,
}

impl MockReply {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text {
            text: text.into(),
            usage: None,
        }
    }

    pub fn with_usage(text: impl Into<String>, input_tokens: u64, output_tokens: u64) -> Self {
        Self::Text {
            text: text.into(),
            usage: Some(TokenUsage {
                input_tokens,
                output_tokens,
            }),
        }
    }
}

/// Deterministic backend with scripted replies.
///
/// # Example
///
/// ```rust
/// use graph_discovery::llm::{CompletionRequest, LlmBackend, MockLlmBackend, MockReply};
///
/// # tokio_test::block_on(async {
/// let backend = MockLlmBackend::new("local").with_reply(MockReply::text("hello"));
/// let request = CompletionRequest {
///     system: String::new(),
///     prompt: "hi".into(),
///     model: "m".into(),
///     temperature: 0.0,
///     max_tokens: 16,
/// };
/// assert_eq!(backend.complete(&request).await.unwrap().text, "hello");
/// assert_eq!(backend.call_count(), 1);
/// # });
/// ```
pub struct MockLlmBackend {
    name: String,
    script: Mutex<VecDeque<MockReply>>,
    fallback: MockReply,
    calls: AtomicUsize,
    prompts: Mutex<Vec<String>>,
}

impl MockLlmBackend {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            script: Mutex::new(VecDeque::new()),
            fallback: MockReply::Fail("no scripted reply".to_string()),
            calls: AtomicUsize::new(0),
            prompts: Mutex::new(Vec::new()),
        }
    }

    /// Append a reply to the script
    pub fn with_reply(self, reply: MockReply) -> Self {
        self.push(reply);
        self
    }

    /// Reply used once the script is exhausted
    pub fn with_fallback(mut self, reply: MockReply) -> Self {
        self.fallback = reply;
        self
    }

    pub fn push(&self, reply: MockReply) {
        if let Ok(mut script) = self.script.lock() {
            script.push_back(reply);
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Prompts received so far, in call order
    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().map(|p| p.clone()).unwrap_or_default()
    }

    fn next_reply(&self) -> MockReply {
        self.script
            .lock()
            .ok()
            .and_then(|mut s| s.pop_front())
            .unwrap_or_else(|| self.fallback.clone())
    }
}

async fn resolve(reply: MockReply) -> Result<Completion, BackendError> {
    let mut reply = reply;
    loop {
        match reply {
            MockReply::Text { text, usage } => return Ok(Completion { text, usage }),
            MockReply::Timeout => return Err(BackendError::Timeout),
            MockReply::RateLimited(retry_after_ms) => {
                return Err(BackendError::RateLimited { retry_after_ms })
            }
            MockReply::Fail(message) => return Err(BackendError::Failed(message)),
            MockReply::Delayed(delay, inner) => {
                tokio::time::sleep(delay).await;
                reply = *inner;
            }
            MockReply::Panic => panic!("mock backend panicked"),
        }
    }
}

#[async_trait]
impl LlmBackend for MockLlmBackend {
    async fn complete(&self, request: &CompletionRequest) -> Result<Completion, BackendError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut prompts) = self.prompts.lock() {
            prompts.push(request.prompt.clone());
        }
        resolve(self.next_reply()).await
    }

    fn name(&self) -> &str {
        &self.name
    }
}
