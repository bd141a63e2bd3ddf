//! LLM invocation layer
//!
//! Runs a prompt against the backend of a provider profile with a per-attempt
//! timeout, bounded exponential backoff on transient failures and schema
//! validation of the response. Every attempt is written to the cost ledger.

use crate::ledger::{CostLedger, InvocationOutcome, InvocationRecord};
use crate::neo4j::models::PrivacyLevel;
use anyhow::Result;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use uuid::Uuid;

use super::error::{BackendError, ProviderError};
use super::profiles::{ProviderProfile, ProviderRegistry, TaskKind};
use super::prompts::Prompt;
use super::provider::HttpLlmBackend;
use super::schema::{parse_response, StructuredResult};
use super::traits::{CompletionRequest, LlmBackend};

/// Exponential backoff between retries: `base * 2^(n-1)` after the n-th
/// failed attempt, capped at `max_delay`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BackoffPolicy {
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
        }
    }
}

impl BackoffPolicy {
    /// Delay after the `attempt`-th (1-based) failed attempt
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(31);
        let delay = self.base_delay.saturating_mul(1u32 << exp);
        delay.min(self.max_delay)
    }

    /// Delay honouring a provider `retry-after` hint when it is longer
    pub fn delay_with_hint(&self, attempt: u32, retry_after_ms: Option<u64>) -> Duration {
        let computed = self.delay_for_attempt(attempt);
        let hinted = retry_after_ms.map(Duration::from_millis).unwrap_or_default();
        computed.max(hinted).min(self.max_delay)
    }
}

/// Where an invocation happens, for ledger attribution
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct InvocationContext {
    pub run_id: Option<Uuid>,
    pub privacy_level: PrivacyLevel,
}

/// A successful, schema-valid invocation
#[derive(Debug, Clone, PartialEq)]
pub struct Invocation {
    pub result: StructuredResult,
    pub attempts: u32,
    /// Sum of the cost estimates of every attempt
    pub cost: f64,
    /// `<provider>/<model>`
    pub discovered_by: String,
}

/// Estimated token count for text of `chars` characters
pub fn estimate_tokens(chars: usize) -> u64 {
    chars.div_ceil(4) as u64
}

/// Dispatches prompts to backends and records every attempt
pub struct Invoker {
    backends: HashMap<String, Arc<dyn LlmBackend>>,
    ledger: Arc<CostLedger>,
    backoff: BackoffPolicy,
}

impl Invoker {
    pub fn new(ledger: Arc<CostLedger>, backoff: BackoffPolicy) -> Self {
        Self {
            backends: HashMap::new(),
            ledger,
            backoff,
        }
    }

    /// Register the backend serving the profile named `name`
    pub fn with_backend(mut self, name: impl Into<String>, backend: Arc<dyn LlmBackend>) -> Self {
        self.backends.insert(name.into(), backend);
        self
    }

    /// One HTTP backend per configured profile
    pub fn from_registry(
        registry: &ProviderRegistry,
        ledger: Arc<CostLedger>,
        backoff: BackoffPolicy,
    ) -> Result<Self> {
        let mut invoker = Self::new(ledger, backoff);
        for profile in registry.profiles() {
            let backend = HttpLlmBackend::new(profile)?;
            let replaced = invoker
                .backends
                .insert(profile.name.clone(), Arc::new(backend));
            if replaced.is_some() {
                anyhow::bail!("Provider '{}' has more than one backend", profile.name);
            }
        }
        Ok(invoker)
    }

    pub fn ledger(&self) -> &Arc<CostLedger> {
        &self.ledger
    }

    /// Invoke `profile` with `prompt` and parse the response for `task`.
    ///
    /// Timeouts and rate limits are retried up to `profile.max_retries`
    /// times. Other failures, including schema validation, return at once.
    pub async fn invoke(
        &self,
        profile: &ProviderProfile,
        prompt: &Prompt,
        task: TaskKind,
        ctx: &InvocationContext,
    ) -> Result<Invocation, ProviderError> {
        let backend = self
            .backends
            .get(&profile.name)
            .ok_or_else(|| ProviderError::Failed {
                provider: profile.name.clone(),
                message: "no backend registered for provider".to_string(),
            })?;

        let request = CompletionRequest {
            system: prompt.system.clone(),
            prompt: prompt.user.clone(),
            model: profile.model.clone(),
            temperature: prompt.temperature,
            max_tokens: prompt.max_tokens,
        };
        let estimated_input = estimate_tokens(prompt.char_len());
        let max_attempts = profile.max_retries.saturating_add(1);
        let mut total_cost = 0.0;
        let mut attempt = 0u32;

        loop {
            attempt += 1;
            let started = Instant::now();
            let response =
                match tokio::time::timeout(profile.timeout(), backend.complete(&request)).await {
                    Ok(response) => response,
                    Err(_) => Err(BackendError::Timeout),
                };
            let latency_ms = started.elapsed().as_millis() as u64;

            match response {
                Ok(completion) => {
                    let (input, output) = match completion.usage {
                        Some(usage) => (usage.input_tokens, usage.output_tokens),
                        None => (
                            estimated_input,
                            estimate_tokens(completion.text.chars().count()),
                        ),
                    };
                    let cost = profile.cost_for(input + output);
                    total_cost += cost;

                    let parsed = parse_response(task, &completion.text);
                    let (outcome, error) = match &parsed {
                        Ok(_) => (InvocationOutcome::Success, None),
                        Err(reason) => (
                            InvocationOutcome::Failed,
                            Some(format!("schema validation failed: {}", reason)),
                        ),
                    };
                    self.record(
                        profile,
                        task,
                        ctx,
                        attempt,
                        (input, output),
                        cost,
                        latency_ms,
                        outcome,
                        error,
                    )
                    .await;

                    return match parsed {
                        Ok(result) => Ok(Invocation {
                            result,
                            attempts: attempt,
                            cost: total_cost,
                            discovered_by: profile.identifier(),
                        }),
                        Err(reason) => {
                            tracing::warn!(
                                provider = %profile.name,
                                task = %task,
                                "Response failed schema validation: {}",
                                reason
                            );
                            Err(ProviderError::SchemaValidation {
                                provider: profile.name.clone(),
                                reason,
                                raw: completion.text,
                            })
                        }
                    };
                }
                Err(err) => {
                    let err = ProviderError::from_backend(&profile.name, profile.timeout_ms, err);
                    let will_retry = err.is_retryable() && attempt < max_attempts;
                    let cost = profile.cost_for(estimated_input);
                    total_cost += cost;
                    let outcome = if will_retry {
                        InvocationOutcome::Retried
                    } else {
                        InvocationOutcome::Failed
                    };
                    self.record(
                        profile,
                        task,
                        ctx,
                        attempt,
                        (estimated_input, 0),
                        cost,
                        latency_ms,
                        outcome,
                        Some(err.to_string()),
                    )
                    .await;

                    if !will_retry {
                        tracing::warn!(
                            provider = %profile.name,
                            task = %task,
                            attempts = attempt,
                            "Invocation failed: {}",
                            err
                        );
                        return Err(err);
                    }

                    let hint = match &err {
                        ProviderError::RateLimited { retry_after_ms, .. } => *retry_after_ms,
                        _ => None,
                    };
                    let delay = self.backoff.delay_with_hint(attempt, hint);
                    tracing::debug!(
                        provider = %profile.name,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        "Retrying after transient failure: {}",
                        err
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn record(
        &self,
        profile: &ProviderProfile,
        task: TaskKind,
        ctx: &InvocationContext,
        attempt: u32,
        (input, output): (u64, u64),
        cost: f64,
        latency_ms: u64,
        outcome: InvocationOutcome,
        error: Option<String>,
    ) {
        self.ledger
            .record(InvocationRecord {
                id: Uuid::new_v4(),
                run_id: ctx.run_id,
                task_kind: task,
                provider: profile.name.clone(),
                model: profile.model.clone(),
                privacy_level_at_call: ctx.privacy_level,
                attempt,
                input_token_count: input,
                output_token_count: output,
                cost_estimate: cost,
                latency_ms,
                outcome,
                error,
                timestamp: Utc::now(),
            })
            .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::CostWindow;
    use crate::llm::mock::{MockLlmBackend, MockReply};
    use crate::llm::profiles::ProviderKind;
    use crate::neo4j::models::RelationKind;

    fn profile(max_retries: u32, timeout_ms: u64) -> ProviderProfile {
        ProviderProfile {
            name: "local".to_string(),
            is_local: true,
            capability_tags: [TaskKind::Connection].into_iter().collect(),
            cost_per_1k_tokens: 1.0,
            max_retries,
            timeout_ms,
            kind: ProviderKind::Ollama,
            model: "llama".to_string(),
            base_url: String::new(),
            api_key_env: None,
        }
    }

    fn prompt() -> Prompt {
        Prompt {
            system: String::new(),
            user: "x".repeat(40),
            temperature: 0.0,
            max_tokens: 10,
        }
    }

    fn fast_backoff() -> BackoffPolicy {
        BackoffPolicy {
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
        }
    }

    fn ctx() -> InvocationContext {
        InvocationContext {
            run_id: None,
            privacy_level: PrivacyLevel::Sensitive,
        }
    }

    const VERDICT: &str = r#"{"relation_kind": "causal", "confidence": 0.9, "rationale": "r"}"#;

    #[test]
    fn test_backoff_doubles_and_caps() {
        let policy = BackoffPolicy::default();
        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(500));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(1000));
        assert_eq!(policy.delay_for_attempt(4), Duration::from_millis(4000));
        assert_eq!(policy.delay_for_attempt(20), Duration::from_secs(30));
        assert_eq!(
            policy.delay_with_hint(1, Some(3000)),
            Duration::from_millis(3000)
        );
        assert_eq!(
            policy.delay_with_hint(1, Some(90_000)),
            Duration::from_secs(30)
        );
    }

    #[test]
    fn test_token_estimate_rounds_up() {
        assert_eq!(estimate_tokens(0), 0);
        assert_eq!(estimate_tokens(1), 1);
        assert_eq!(estimate_tokens(8), 2);
        assert_eq!(estimate_tokens(9), 3);
    }

    #[tokio::test]
    async fn test_retries_transient_failures_then_succeeds() {
        let ledger = Arc::new(CostLedger::new());
        let backend = Arc::new(
            MockLlmBackend::new("local")
                .with_reply(MockReply::Timeout)
                .with_reply(MockReply::RateLimited(Some(1)))
                .with_reply(MockReply::with_usage(VERDICT, 100, 20)),
        );
        let invoker =
            Invoker::new(ledger.clone(), fast_backoff()).with_backend("local", backend.clone());

        let invocation = invoker
            .invoke(&profile(3, 1000), &prompt(), TaskKind::Connection, &ctx())
            .await
            .unwrap();

        assert_eq!(invocation.attempts, 3);
        assert_eq!(invocation.discovered_by, "local/llama");
        let verdict = invocation.result.into_connection().unwrap();
        assert_eq!(verdict.relation_kind, Some(RelationKind::Causal));

        let records = ledger.records().await;
        let outcomes: Vec<_> = records.iter().map(|r| r.outcome).collect();
        assert_eq!(
            outcomes,
            vec![
                InvocationOutcome::Retried,
                InvocationOutcome::Retried,
                InvocationOutcome::Success
            ]
        );
        assert_eq!(records[0].input_token_count, 10);
        assert_eq!(records[2].attempt, 3);
        assert!((records[2].cost_estimate - 0.12).abs() < 1e-9);
        assert!((ledger.running_total(CostWindow::All) - invocation.cost).abs() < 1e-9);
        assert!(records
            .iter()
            .all(|r| r.privacy_level_at_call == PrivacyLevel::Sensitive));
    }

    #[tokio::test]
    async fn test_exhausted_retries_surface_last_error() {
        let ledger = Arc::new(CostLedger::new());
        let backend = Arc::new(MockLlmBackend::new("local").with_fallback(MockReply::Timeout));
        let invoker =
            Invoker::new(ledger.clone(), fast_backoff()).with_backend("local", backend.clone());

        let err = invoker
            .invoke(&profile(2, 1000), &prompt(), TaskKind::Connection, &ctx())
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::Timeout { .. }));
        assert_eq!(backend.call_count(), 3);
        let records = ledger.records().await;
        assert_eq!(records.len(), 3);
        assert_eq!(records[2].outcome, InvocationOutcome::Failed);
    }

    #[tokio::test]
    async fn test_provider_error_is_not_retried() {
        let ledger = Arc::new(CostLedger::new());
        let backend = Arc::new(
            MockLlmBackend::new("local").with_fallback(MockReply::Fail("HTTP 401".into())),
        );
        let invoker =
            Invoker::new(ledger.clone(), fast_backoff()).with_backend("local", backend.clone());

        let err = invoker
            .invoke(&profile(5, 1000), &prompt(), TaskKind::Connection, &ctx())
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::Failed { .. }));
        assert_eq!(backend.call_count(), 1);
        assert_eq!(ledger.len().await, 1);
    }

    #[tokio::test]
    async fn test_schema_failure_keeps_raw_and_is_not_retried() {
        let ledger = Arc::new(CostLedger::new());
        let backend = Arc::new(
            MockLlmBackend::new("local")
                .with_fallback(MockReply::text("I think they are related")),
        );
        let invoker =
            Invoker::new(ledger.clone(), fast_backoff()).with_backend("local", backend.clone());

        let err = invoker
            .invoke(&profile(3, 1000), &prompt(), TaskKind::Connection, &ctx())
            .await
            .unwrap_err();
        match err {
            ProviderError::SchemaValidation { raw, .. } => {
                assert_eq!(raw, "I think they are related")
            }
            other => panic!("unexpected error: {:?}", other),
        }
        assert_eq!(backend.call_count(), 1);
        assert_eq!(ledger.records().await[0].outcome, InvocationOutcome::Failed);
    }

    #[tokio::test]
    async fn test_per_attempt_timeout() {
        let ledger = Arc::new(CostLedger::new());
        let backend = Arc::new(MockLlmBackend::new("local").with_fallback(MockReply::Delayed(
            Duration::from_millis(500),
            Box::new(MockReply::text(VERDICT)),
        )));
        let invoker = Invoker::new(ledger.clone(), fast_backoff()).with_backend("local", backend);

        let err = invoker
            .invoke(&profile(0, 20), &prompt(), TaskKind::Connection, &ctx())
            .await
            .unwrap_err();
        assert_eq!(
            err,
            ProviderError::Timeout {
                provider: "local".into(),
                timeout_ms: 20
            }
        );
    }

    #[tokio::test]
    async fn test_missing_backend_is_provider_error() {
        let invoker = Invoker::new(Arc::new(CostLedger::new()), fast_backoff());
        let err = invoker
            .invoke(&profile(0, 20), &prompt(), TaskKind::Connection, &ctx())
            .await
            .unwrap_err();
        assert!(!err.is_retryable());
    }
}
