//! Connection discovery engine
//!
//! Pulls ranked candidates, routes each pair by its effective privacy level,
//! invokes the selected provider (up to `concurrency` calls in flight) and
//! applies accepted verdicts through the edge writer from the run loop.
//! Per-candidate failures are recorded in the report; budget and deadline
//! exhaustion are normal stops.

use crate::ledger::CostLedger;
use crate::llm::prompts::connection_prompt;
use crate::llm::{
    ErrorKind, Invocation, InvocationContext, Invoker, ProviderError, ProviderRegistry, TaskKind,
};
use crate::neo4j::models::{Edge, PrivacyLevel};
use crate::neo4j::GraphStore;
use crate::privacy::effective_level;
use anyhow::Result;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tokio::task::{self, JoinSet};
use uuid::Uuid;

use super::candidates::{Candidate, CandidateConfig, CandidateGenerator, EvaluationLog};
use super::report::{AcceptedEdge, Budget, DiscoveryReport, SkippedCandidate, StopReason};
use super::writer::{EdgeWriteError, EdgeWriter, UpsertOutcome};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DiscoveryConfig {
    /// Invocations in flight at once
    pub concurrency: usize,
    pub max_candidates: usize,
    /// Minimum confidence for a connection verdict to become an edge
    pub acceptance_threshold: f64,
    pub candidates: CandidateConfig,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            concurrency: 4,
            max_candidates: 50,
            acceptance_threshold: 0.5,
            candidates: CandidateConfig::default(),
        }
    }
}

type InvocationResult = (Candidate, PrivacyLevel, Result<Invocation, ProviderError>);

pub struct DiscoveryEngine {
    store: Arc<dyn GraphStore>,
    registry: Arc<ProviderRegistry>,
    invoker: Arc<Invoker>,
    writer: Arc<EdgeWriter>,
    log: Arc<EvaluationLog>,
    generator: CandidateGenerator,
    config: DiscoveryConfig,
}

impl DiscoveryEngine {
    pub fn new(
        store: Arc<dyn GraphStore>,
        registry: Arc<ProviderRegistry>,
        invoker: Arc<Invoker>,
        log: Arc<EvaluationLog>,
        config: DiscoveryConfig,
    ) -> Self {
        let writer = Arc::new(EdgeWriter::new(store.clone(), registry.clone()));
        let generator = CandidateGenerator::new(store.clone(), log.clone(), config.candidates);
        Self {
            store,
            registry,
            invoker,
            writer,
            log,
            generator,
            config,
        }
    }

    pub fn ledger(&self) -> &Arc<CostLedger> {
        self.invoker.ledger()
    }

    pub fn config(&self) -> &DiscoveryConfig {
        &self.config
    }

    /// Run discovery over nodes changed since `since`, within `budget`
    pub async fn run(
        &self,
        run_id: Uuid,
        since: DateTime<Utc>,
        budget: &Budget,
    ) -> Result<DiscoveryReport> {
        let started_at = Utc::now();
        // A duration too large for the clock means no deadline
        let deadline = budget
            .max_duration
            .and_then(|d| Instant::now().checked_add(d));

        let changed = self.store.changed_nodes_since(since).await?;
        let mut candidates = self
            .generator
            .generate_candidates(&changed, self.config.max_candidates)
            .await?;

        tracing::info!(
            run_id = %run_id,
            changed = changed.len(),
            candidates = candidates.len(),
            max_invocations = budget.max_invocations,
            max_cost = budget.max_cost,
            "Starting discovery run"
        );

        let mut report = DiscoveryReport {
            run_id,
            started_at,
            finished_at: started_at,
            candidates_considered: 0,
            invocations: 0,
            attempts: 0,
            accepted: Vec::new(),
            unchanged: 0,
            rejected: 0,
            skipped: Vec::new(),
            total_cost: 0.0,
            stop_reason: StopReason::Exhausted,
        };

        let concurrency = self.config.concurrency.max(1);
        let mut in_flight: JoinSet<InvocationResult> = JoinSet::new();
        let mut pending: HashMap<task::Id, Candidate> = HashMap::new();
        let mut stop: Option<StopReason> = None;

        loop {
            while stop.is_none() && in_flight.len() < concurrency {
                if candidates.peek().is_none() {
                    stop = Some(StopReason::Exhausted);
                } else if deadline.is_some_and(|d| Instant::now() >= d) {
                    stop = Some(StopReason::Deadline);
                } else if report.invocations >= budget.max_invocations {
                    stop = Some(StopReason::BudgetInvocations);
                } else if self.ledger().run_cost(run_id) >= budget.max_cost {
                    stop = Some(StopReason::BudgetCost);
                }
                if stop.is_some() {
                    break;
                }
                let Some(candidate) = candidates.next() else {
                    break;
                };
                report.candidates_considered += 1;

                let level =
                    effective_level([candidate.left.privacy_level, candidate.right.privacy_level]);
                let profile = match self.registry.select(TaskKind::Connection, level) {
                    Ok(profile) => profile.clone(),
                    Err(e) => {
                        tracing::warn!(run_id = %run_id, pair = %candidate.pair, "{}", e);
                        report.skipped.push(SkippedCandidate {
                            pair: candidate.pair,
                            error_kind: ErrorKind::from(&e),
                            message: e.to_string(),
                        });
                        self.log.mark(&candidate);
                        continue;
                    }
                };

                report.invocations += 1;
                let invoker = self.invoker.clone();
                let prompt = connection_prompt(&candidate.left, &candidate.right);
                let ctx = InvocationContext {
                    run_id: Some(run_id),
                    privacy_level: level,
                };
                let task_candidate = candidate.clone();
                let handle = in_flight.spawn(async move {
                    let result = invoker
                        .invoke(&profile, &prompt, TaskKind::Connection, &ctx)
                        .await;
                    (task_candidate, level, result)
                });
                pending.insert(handle.id(), candidate);
            }

            match in_flight.join_next_with_id().await {
                Some(Ok((id, (candidate, level, result)))) => {
                    pending.remove(&id);
                    self.apply(&mut report, candidate, level, result).await;
                }
                Some(Err(e)) => {
                    tracing::error!(run_id = %run_id, "Discovery invocation task failed: {}", e);
                    if let Some(candidate) = pending.remove(&e.id()) {
                        self.log.defer(&candidate);
                        report.skipped.push(SkippedCandidate {
                            pair: candidate.pair,
                            error_kind: ErrorKind::ProviderError,
                            message: format!("invocation task failed: {}", e),
                        });
                    }
                }
                None => break,
            }
        }

        let totals = self.ledger().run_totals(run_id);
        report.attempts = totals.attempts;
        report.total_cost = totals.cost;
        report.stop_reason = stop.unwrap_or(StopReason::Exhausted);
        report.finished_at = Utc::now();

        tracing::info!(
            run_id = %run_id,
            considered = report.candidates_considered,
            invocations = report.invocations,
            accepted = report.accepted.len(),
            unchanged = report.unchanged,
            rejected = report.rejected,
            skipped = report.skipped.len(),
            cost = report.total_cost,
            stop_reason = ?report.stop_reason,
            "Discovery run finished"
        );
        Ok(report)
    }

    /// Fold one finished invocation into the report (single writer)
    async fn apply(
        &self,
        report: &mut DiscoveryReport,
        candidate: Candidate,
        level: PrivacyLevel,
        result: Result<Invocation, ProviderError>,
    ) {
        let invocation = match result {
            Ok(invocation) => invocation,
            Err(e) => {
                // Exhausted transient failures are offered again next run
                if e.is_retryable() {
                    self.log.defer(&candidate);
                } else {
                    self.log.mark(&candidate);
                }
                report.skipped.push(SkippedCandidate {
                    pair: candidate.pair,
                    error_kind: e.kind(),
                    message: e.to_string(),
                });
                return;
            }
        };

        let discovered_by = invocation.discovered_by;
        let Some(verdict) = invocation.result.into_connection() else {
            self.log.mark(&candidate);
            report.skipped.push(SkippedCandidate {
                pair: candidate.pair,
                error_kind: ErrorKind::SchemaValidationFailed,
                message: "response was not a connection verdict".to_string(),
            });
            return;
        };

        let kind = match verdict.relation_kind {
            Some(kind) if verdict.confidence >= self.config.acceptance_threshold => kind,
            _ => {
                tracing::debug!(
                    pair = %candidate.pair,
                    confidence = verdict.confidence,
                    "Rejected candidate"
                );
                self.log.mark(&candidate);
                report.rejected += 1;
                return;
            }
        };

        let edge = Edge::new(
            candidate.pair,
            kind,
            verdict.confidence,
            verdict.rationale,
            discovered_by,
        );
        match self.writer.upsert(edge, level).await {
            Ok(UpsertOutcome::Unchanged(_)) => {
                self.log.mark(&candidate);
                report.unchanged += 1;
            }
            Ok(outcome) => {
                self.log.mark(&candidate);
                let edge = outcome.edge();
                report.accepted.push(AcceptedEdge {
                    edge_id: edge.id,
                    pair: candidate.pair,
                    relation_kind: edge.relation_kind,
                    confidence: edge.confidence,
                    discovered_by: edge.discovered_by.clone(),
                    status: outcome.status(),
                });
            }
            Err(e) => {
                tracing::warn!(pair = %candidate.pair, "Edge write failed: {}", e);
                match &e {
                    EdgeWriteError::Storage(_) => self.log.defer(&candidate),
                    EdgeWriteError::PrivacyViolation { .. } => self.log.mark(&candidate),
                }
                report.skipped.push(SkippedCandidate {
                    pair: candidate.pair,
                    error_kind: e.kind(),
                    message: e.to_string(),
                });
            }
        }
    }
}
