//! API request handlers

use crate::discovery::Budget;
use crate::ingest::{IngestOutcome, IngestStatus, NodeInput};
use crate::insights::InsightError;
use crate::jobs::{DiscoveryService, ProviderCheck, RunState};
use crate::ledger::{CostSummary, CostWindow};
use crate::llm::{ErrorKind, ProviderKind, TaskKind};
use crate::neo4j::models::{DigestPeriod, InsightDigest, Node, PeriodKind};
use crate::tagging::{TagSuggestion, TaggingError};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// Shared server state
pub struct ServerState {
    pub service: DiscoveryService,
}

pub type ApiState = Arc<ServerState>;

// ============================================================================
// Health check
// ============================================================================

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub graph_store: String,
}

/// 200 when the graph store answers, 503 otherwise
pub async fn health(State(state): State<ApiState>) -> (StatusCode, Json<HealthResponse>) {
    let store_ok = state.service.health_check().await.unwrap_or(false);
    let (http_status, status) = if store_ok {
        (StatusCode::OK, "ok")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "unhealthy")
    };
    (
        http_status,
        Json(HealthResponse {
            status: status.to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            graph_store: if store_ok {
                "connected".to_string()
            } else {
                "disconnected".to_string()
            },
        }),
    )
}

// ============================================================================
// Nodes
// ============================================================================

pub async fn ingest_node(
    State(state): State<ApiState>,
    Json(input): Json<NodeInput>,
) -> Result<(StatusCode, Json<IngestOutcome>), AppError> {
    if input.title.trim().is_empty() {
        return Err(AppError::BadRequest("title must not be empty".into()));
    }
    let outcome = state.service.ingest_node(input).await?;
    let status = match outcome.status {
        IngestStatus::Created => StatusCode::CREATED,
        IngestStatus::Updated | IngestStatus::Unchanged => StatusCode::OK,
    };
    Ok((status, Json(outcome)))
}

#[derive(Debug, Deserialize)]
pub struct ChangedNodesQuery {
    pub since: DateTime<Utc>,
}

pub async fn changed_nodes(
    State(state): State<ApiState>,
    Query(query): Query<ChangedNodesQuery>,
) -> Result<Json<Vec<Node>>, AppError> {
    Ok(Json(state.service.changed_nodes_since(query.since).await?))
}

pub async fn suggest_tags(
    State(state): State<ApiState>,
    Path(node_id): Path<Uuid>,
) -> Result<Json<TagSuggestion>, AppError> {
    Ok(Json(state.service.suggest_tags(node_id).await?))
}

// ============================================================================
// Discovery runs
// ============================================================================

/// Longest run a caller may ask for
pub const MAX_RUN_DURATION_SECS: u64 = 24 * 60 * 60;

/// Budget overrides; unset fields use the configured default
#[derive(Debug, Default, Deserialize)]
pub struct TriggerRunRequest {
    pub max_invocations: Option<u32>,
    pub max_cost: Option<f64>,
    pub max_duration_secs: Option<u64>,
}

impl TriggerRunRequest {
    pub fn budget(&self, defaults: Budget) -> Result<Budget, AppError> {
        if matches!(self.max_duration_secs, Some(secs) if secs > MAX_RUN_DURATION_SECS) {
            return Err(AppError::BadRequest(format!(
                "max_duration_secs must be at most {}",
                MAX_RUN_DURATION_SECS
            )));
        }
        let budget = Budget {
            max_invocations: self.max_invocations.unwrap_or(defaults.max_invocations),
            max_cost: self.max_cost.unwrap_or(defaults.max_cost),
            max_duration: self
                .max_duration_secs
                .map(Duration::from_secs)
                .or(defaults.max_duration),
        };
        if !budget.max_cost.is_finite() || budget.max_cost < 0.0 {
            return Err(AppError::BadRequest(
                "max_cost must be a non-negative number".into(),
            ));
        }
        Ok(budget)
    }
}

#[derive(Debug, Serialize)]
pub struct TriggerRunResponse {
    pub run_id: Uuid,
    pub budget: Budget,
}

pub async fn trigger_run(
    State(state): State<ApiState>,
    Json(req): Json<TriggerRunRequest>,
) -> Result<(StatusCode, Json<TriggerRunResponse>), AppError> {
    let budget = req.budget(state.service.default_budget())?;
    let run_id = state.service.trigger_discovery_run(budget);
    Ok((
        StatusCode::ACCEPTED,
        Json(TriggerRunResponse { run_id, budget }),
    ))
}

pub async fn get_run(
    State(state): State<ApiState>,
    Path(run_id): Path<Uuid>,
) -> Result<Json<RunState>, AppError> {
    state
        .service
        .get_run_report(run_id)
        .map(Json)
        .ok_or_else(|| AppError::NotFound(format!("Run {} not found", run_id)))
}

// ============================================================================
// Insight digests
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct SummarizeRequest {
    pub period: PeriodKind,
    /// Any date inside the period; defaults to today
    pub start: Option<NaiveDate>,
}

pub async fn summarize_period(
    State(state): State<ApiState>,
    Json(req): Json<SummarizeRequest>,
) -> Result<Json<InsightDigest>, AppError> {
    let date = req.start.unwrap_or_else(|| Utc::now().date_naive());
    let period = DigestPeriod::containing(req.period, date);
    Ok(Json(state.service.summarize_period(period).await?))
}

pub async fn get_digest(
    State(state): State<ApiState>,
    Path((kind, start)): Path<(String, NaiveDate)>,
) -> Result<Json<InsightDigest>, AppError> {
    let kind: PeriodKind = kind.parse().map_err(AppError::BadRequest)?;
    let period = DigestPeriod::containing(kind, start);
    state
        .service
        .get_digest(&period)
        .await?
        .map(Json)
        .ok_or_else(|| AppError::NotFound(format!("No digest for {}", period)))
}

// ============================================================================
// Costs and providers
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct CostsQuery {
    /// Trailing UTC days (1-365) or "all"; defaults to 7
    pub days: Option<String>,
}

pub async fn get_costs(
    State(state): State<ApiState>,
    Query(query): Query<CostsQuery>,
) -> Result<Json<CostSummary>, AppError> {
    let window = match query.days.as_deref() {
        None => CostWindow::Days(7),
        Some(raw) => raw.parse::<CostWindow>().map_err(AppError::BadRequest)?,
    };
    if let CostWindow::Days(days) = window {
        if !(1..=365).contains(&days) {
            return Err(AppError::BadRequest("days must be between 1 and 365".into()));
        }
    }
    Ok(Json(state.service.get_cost_summary(window)))
}

/// Provider profile as exposed over HTTP (no credential wiring)
#[derive(Debug, Serialize)]
pub struct ProviderView {
    pub name: String,
    pub kind: ProviderKind,
    pub model: String,
    pub is_local: bool,
    pub capability_tags: BTreeSet<TaskKind>,
    pub cost_per_1k_tokens: f64,
    pub max_retries: u32,
    pub timeout_ms: u64,
}

pub async fn list_providers(State(state): State<ApiState>) -> Json<Vec<ProviderView>> {
    Json(
        state
            .service
            .list_providers()
            .into_iter()
            .map(|p| ProviderView {
                name: p.name,
                kind: p.kind,
                model: p.model,
                is_local: p.is_local,
                capability_tags: p.capability_tags,
                cost_per_1k_tokens: p.cost_per_1k_tokens,
                max_retries: p.max_retries,
                timeout_ms: p.timeout_ms,
            })
            .collect(),
    )
}

pub async fn test_provider(
    State(state): State<ApiState>,
    Path(name): Path<String>,
) -> Result<Json<ProviderCheck>, AppError> {
    state
        .service
        .test_provider(&name)
        .await
        .map(Json)
        .ok_or_else(|| AppError::NotFound(format!("Provider '{}' not found", name)))
}

// ============================================================================
// Error handling
// ============================================================================

/// API error type
#[derive(Debug)]
pub enum AppError {
    Internal(anyhow::Error),
    NotFound(String),
    BadRequest(String),
    /// No provider may handle the request at the content's privacy level
    Unprocessable { kind: ErrorKind, message: String },
    /// The selected provider failed after retries
    Upstream { kind: ErrorKind, message: String },
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let (status, body) = match self {
            AppError::Internal(e) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                serde_json::json!({ "error": format!("{:#}", e) }),
            ),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, serde_json::json!({ "error": msg })),
            AppError::BadRequest(msg) => {
                (StatusCode::BAD_REQUEST, serde_json::json!({ "error": msg }))
            }
            AppError::Unprocessable { kind, message } => (
                StatusCode::UNPROCESSABLE_ENTITY,
                serde_json::json!({ "error": message, "kind": kind }),
            ),
            AppError::Upstream { kind, message } => (
                StatusCode::BAD_GATEWAY,
                serde_json::json!({ "error": message, "kind": kind }),
            ),
        };

        (status, Json(body)).into_response()
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::Internal(err)
    }
}

impl From<InsightError> for AppError {
    fn from(err: InsightError) -> Self {
        match err {
            InsightError::Storage(e) => AppError::Internal(e),
            InsightError::Routing(e) => AppError::Unprocessable {
                kind: ErrorKind::from(&e),
                message: e.to_string(),
            },
            InsightError::Provider(e) => AppError::Upstream {
                kind: e.kind(),
                message: e.to_string(),
            },
        }
    }
}

impl From<TaggingError> for AppError {
    fn from(err: TaggingError) -> Self {
        match err {
            TaggingError::NodeNotFound(id) => AppError::NotFound(format!("Node {} not found", id)),
            TaggingError::Storage(e) => AppError::Internal(e),
            TaggingError::Routing(e) => AppError::Unprocessable {
                kind: ErrorKind::from(&e),
                message: e.to_string(),
            },
            TaggingError::Provider(e) => AppError::Upstream {
                kind: e.kind(),
                message: e.to_string(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trigger_request_fills_defaults() {
        let req: TriggerRunRequest = serde_json::from_str(r#"{"max_invocations": 3}"#).unwrap();
        let budget = req.budget(Budget::default()).unwrap();
        assert_eq!(budget.max_invocations, 3);
        assert_eq!(budget.max_cost, Budget::default().max_cost);
        assert_eq!(budget.max_duration, Budget::default().max_duration);

        let bad: TriggerRunRequest = serde_json::from_str(r#"{"max_cost": -1.0}"#).unwrap();
        assert!(matches!(
            bad.budget(Budget::default()),
            Err(AppError::BadRequest(_))
        ));
    }

    #[test]
    fn test_trigger_request_caps_duration() {
        let day = format!(r#"{{"max_duration_secs": {}}}"#, MAX_RUN_DURATION_SECS);
        let req: TriggerRunRequest = serde_json::from_str(&day).unwrap();
        let budget = req.budget(Budget::default()).unwrap();
        assert_eq!(
            budget.max_duration,
            Some(Duration::from_secs(MAX_RUN_DURATION_SECS))
        );

        let huge = format!(r#"{{"max_duration_secs": {}}}"#, u64::MAX);
        let req: TriggerRunRequest = serde_json::from_str(&huge).unwrap();
        assert!(matches!(
            req.budget(Budget::default()),
            Err(AppError::BadRequest(_))
        ));
    }

    #[test]
    fn test_tagging_errors_map_to_statuses() {
        let not_found = AppError::from(TaggingError::NodeNotFound(Uuid::nil()));
        assert_eq!(not_found.into_response().status(), StatusCode::NOT_FOUND);

        let routing = AppError::from(TaggingError::Routing(
            crate::llm::RoutingError::NoEligibleProvider {
                task: TaskKind::Tagging,
                level: crate::neo4j::models::PrivacyLevel::Encrypted,
            },
        ));
        assert_eq!(
            routing.into_response().status(),
            StatusCode::UNPROCESSABLE_ENTITY
        );
    }
}
