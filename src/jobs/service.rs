//! Discovery service facade
//!
//! Everything the HTTP layer, the CLI and the scheduler need: discovery runs
//! (triggered in the background or awaited), run reports, digests, cost
//! summaries, node ingestion and tag suggestions.

use crate::discovery::{
    Budget, DiscoveryConfig, DiscoveryEngine, DiscoveryReport, EvaluationLog, StopReason,
};
use crate::ingest::{IngestOutcome, NodeIngestor, NodeInput};
use crate::insights::{InsightAggregator, InsightError};
use crate::ledger::{CostLedger, CostSummary, CostWindow};
use crate::llm::prompts::provider_check_prompt;
use crate::llm::{
    ErrorKind, InvocationContext, Invoker, ProviderProfile, ProviderRegistry, TaskKind,
};
use crate::neo4j::models::{DigestPeriod, InsightDigest, Node, PrivacyLevel};
use crate::neo4j::GraphStore;
use crate::privacy::PrivacyClassifier;
use crate::tagging::{AutoTagger, TagSuggestion, TaggingError};
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Mutex;
use uuid::Uuid;

use super::debouncer::DiscoveryDebouncer;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Queued behind another run, or in progress
    Running,
    Completed,
    Failed,
}

/// A discovery run as seen by callers
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RunState {
    pub run_id: Uuid,
    pub status: RunStatus,
    pub budget: Budget,
    pub requested_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub report: Option<DiscoveryReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Finished runs kept for `get_run_report`; the oldest are evicted first
const MAX_RETAINED_RUNS: usize = 256;

/// Result of a provider connectivity check
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProviderCheck {
    pub provider: String,
    pub model: String,
    pub success: bool,
    pub latency_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Something that can run discovery on demand
#[async_trait]
pub trait DiscoveryRunner: Send + Sync {
    async fn run_discovery(&self, budget: Budget) -> Result<DiscoveryReport>;
}

#[derive(Clone)]
pub struct DiscoveryService {
    store: Arc<dyn GraphStore>,
    registry: Arc<ProviderRegistry>,
    invoker: Arc<Invoker>,
    ledger: Arc<CostLedger>,
    engine: Arc<DiscoveryEngine>,
    aggregator: Arc<InsightAggregator>,
    tagger: Arc<AutoTagger>,
    ingestor: Arc<NodeIngestor>,
    runs: Arc<DashMap<Uuid, RunState>>,
    /// Changes at or after this instant have not been fully processed.
    /// Held for the whole run, which serializes discovery runs.
    watermark: Arc<Mutex<DateTime<Utc>>>,
    default_budget: Budget,
    debouncer: Option<Arc<DiscoveryDebouncer>>,
}

impl DiscoveryService {
    pub fn new(
        store: Arc<dyn GraphStore>,
        registry: Arc<ProviderRegistry>,
        invoker: Arc<Invoker>,
        classifier: Arc<PrivacyClassifier>,
        config: DiscoveryConfig,
        default_budget: Budget,
    ) -> Self {
        let ledger = invoker.ledger().clone();
        let engine = Arc::new(DiscoveryEngine::new(
            store.clone(),
            registry.clone(),
            invoker.clone(),
            Arc::new(EvaluationLog::new()),
            config,
        ));
        let aggregator = Arc::new(InsightAggregator::new(
            store.clone(),
            registry.clone(),
            invoker.clone(),
        ));
        let tagger = Arc::new(AutoTagger::new(
            store.clone(),
            classifier.clone(),
            registry.clone(),
            invoker.clone(),
        ));
        let ingestor = Arc::new(NodeIngestor::new(store.clone(), classifier));

        Self {
            store,
            registry,
            invoker,
            ledger,
            engine,
            aggregator,
            tagger,
            ingestor,
            runs: Arc::new(DashMap::new()),
            watermark: Arc::new(Mutex::new(DateTime::<Utc>::UNIX_EPOCH)),
            default_budget,
            debouncer: None,
        }
    }

    /// Trigger a debounced discovery run whenever ingestion changes content
    pub fn with_debouncer(mut self, debouncer: Arc<DiscoveryDebouncer>) -> Self {
        self.debouncer = Some(debouncer);
        self
    }

    pub fn default_budget(&self) -> Budget {
        self.default_budget
    }

    pub fn ledger(&self) -> &Arc<CostLedger> {
        &self.ledger
    }

    pub async fn health_check(&self) -> Result<bool> {
        self.store.health_check().await
    }

    // ========================================================================
    // Discovery runs
    // ========================================================================

    /// Start a run in the background and return its id at once
    pub fn trigger_discovery_run(&self, budget: Budget) -> Uuid {
        let run_id = Uuid::new_v4();
        self.register_run(run_id, budget);
        let this = self.clone();
        self.supervise_run(run_id, async move { this.execute_run(run_id, budget).await });
        run_id
    }

    /// Run `work` in its own task; a panic or abort marks the run Failed
    fn supervise_run<F>(&self, run_id: Uuid, work: F)
    where
        F: Future<Output = Result<DiscoveryReport>> + Send + 'static,
    {
        let this = self.clone();
        tokio::spawn(async move {
            match tokio::spawn(work).await {
                Ok(Ok(_)) => {}
                Ok(Err(e)) => {
                    tracing::error!(run_id = %run_id, "Discovery run failed: {:#}", e);
                }
                Err(e) => {
                    tracing::error!(run_id = %run_id, "Discovery run aborted: {}", e);
                    this.finish_run(run_id, Err(format!("run task aborted: {}", e)));
                }
            }
        });
    }

    /// Run discovery to completion
    pub async fn run_discovery(&self, budget: Budget) -> Result<DiscoveryReport> {
        let run_id = Uuid::new_v4();
        self.register_run(run_id, budget);
        self.execute_run(run_id, budget).await
    }

    pub fn get_run_report(&self, run_id: Uuid) -> Option<RunState> {
        self.runs.get(&run_id).map(|r| r.clone())
    }

    fn register_run(&self, run_id: Uuid, budget: Budget) {
        self.evict_finished_runs();
        self.runs.insert(
            run_id,
            RunState {
                run_id,
                status: RunStatus::Running,
                budget,
                requested_at: Utc::now(),
                report: None,
                error: None,
            },
        );
    }

    /// Drop the oldest finished runs beyond `MAX_RETAINED_RUNS`
    fn evict_finished_runs(&self) {
        if self.runs.len() < MAX_RETAINED_RUNS {
            return;
        }
        let mut finished: Vec<(DateTime<Utc>, Uuid)> = self
            .runs
            .iter()
            .filter(|r| r.status != RunStatus::Running)
            .map(|r| (r.requested_at, r.run_id))
            .collect();
        finished.sort();
        let excess = self.runs.len() + 1 - MAX_RETAINED_RUNS;
        for (_, run_id) in finished.into_iter().take(excess) {
            self.runs.remove(&run_id);
        }
    }

    fn finish_run(&self, run_id: Uuid, result: std::result::Result<DiscoveryReport, String>) {
        if let Some(mut state) = self.runs.get_mut(&run_id) {
            match result {
                Ok(report) => {
                    state.status = RunStatus::Completed;
                    state.report = Some(report);
                }
                Err(error) => {
                    state.status = RunStatus::Failed;
                    state.error = Some(error);
                }
            }
        }
    }

    async fn execute_run(&self, run_id: Uuid, budget: Budget) -> Result<DiscoveryReport> {
        let mut watermark = self.watermark.lock().await;
        let started = Utc::now();
        let result = self.engine.run(run_id, *watermark, &budget).await;

        self.finish_run(
            run_id,
            match &result {
                Ok(report) => Ok(report.clone()),
                Err(e) => Err(format!("{:#}", e)),
            },
        );

        // A budget stop leaves candidates behind; keep the watermark so the
        // next run sees them again. Pairs that failed transiently come back
        // through the evaluation log's deferred set.
        if let Ok(report) = &result {
            if report.stop_reason == StopReason::Exhausted {
                *watermark = started;
            }
        }
        result
    }

    // ========================================================================
    // Digests
    // ========================================================================

    pub async fn summarize_period(
        &self,
        period: DigestPeriod,
    ) -> Result<InsightDigest, InsightError> {
        self.aggregator.summarize(period).await
    }

    pub async fn get_digest(&self, period: &DigestPeriod) -> Result<Option<InsightDigest>> {
        self.store.get_digest(period).await
    }

    // ========================================================================
    // Costs and providers
    // ========================================================================

    pub fn get_cost_summary(&self, window: CostWindow) -> CostSummary {
        self.ledger.cost_summary(window)
    }

    pub fn list_providers(&self) -> Vec<ProviderProfile> {
        self.registry.profiles().to_vec()
    }

    /// Send one small request to the named provider without retries.
    /// `None` when no such provider is configured.
    pub async fn test_provider(&self, name: &str) -> Option<ProviderCheck> {
        let mut profile = self.registry.get(name)?.clone();
        profile.max_retries = 0;
        let ctx = InvocationContext {
            run_id: None,
            privacy_level: PrivacyLevel::Public,
        };

        let started = Instant::now();
        let result = self
            .invoker
            .invoke(&profile, &provider_check_prompt(), TaskKind::Insight, &ctx)
            .await;
        let latency_ms = started.elapsed().as_millis() as u64;

        let (success, error_kind, error) = match result {
            Ok(_) => (true, None, None),
            Err(e) => (false, Some(e.kind()), Some(e.to_string())),
        };
        tracing::info!(provider = %profile.name, success, latency_ms, "Provider check");
        Some(ProviderCheck {
            provider: profile.name,
            model: profile.model,
            success,
            latency_ms,
            error_kind,
            error,
        })
    }

    // ========================================================================
    // Nodes
    // ========================================================================

    pub async fn ingest_node(&self, input: NodeInput) -> Result<IngestOutcome> {
        let outcome = self.ingestor.ingest(input).await?;
        if outcome.content_changed {
            if let Some(debouncer) = &self.debouncer {
                debouncer.trigger(outcome.node.id);
            }
        }
        Ok(outcome)
    }

    pub async fn changed_nodes_since(&self, since: DateTime<Utc>) -> Result<Vec<Node>> {
        self.store.changed_nodes_since(since).await
    }

    pub async fn suggest_tags(&self, node_id: Uuid) -> Result<TagSuggestion, TaggingError> {
        self.tagger.suggest_tags(node_id).await
    }
}

#[async_trait]
impl DiscoveryRunner for DiscoveryService {
    async fn run_discovery(&self, budget: Budget) -> Result<DiscoveryReport> {
        DiscoveryService::run_discovery(self, budget).await
    }
}
