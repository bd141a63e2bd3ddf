//! Discovery run budgets and reports

use crate::llm::ErrorKind;
use crate::neo4j::models::{NodePair, RelationKind};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

use super::writer::UpsertStatus;

/// Bounds of a single discovery run
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct Budget {
    /// Candidate invocations the run may issue
    pub max_invocations: u32,
    /// Cost units the run may spend
    pub max_cost: f64,
    /// Wall-clock cap; stops issuing new candidates once elapsed
    #[serde(default, with = "opt_secs")]
    pub max_duration: Option<Duration>,
}

impl Default for Budget {
    fn default() -> Self {
        Self {
            max_invocations: 100,
            max_cost: 1.0,
            max_duration: Some(Duration::from_secs(15 * 60)),
        }
    }
}

/// Serialize an optional duration as whole seconds
mod opt_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Option<Duration>, s: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(d) => s.serialize_some(&d.as_secs()),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Duration>, D::Error> {
        Ok(Option::<u64>::deserialize(d)?.map(Duration::from_secs))
    }
}

/// Why a run stopped issuing candidates
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    Exhausted,
    BudgetInvocations,
    BudgetCost,
    Deadline,
}

/// A candidate that failed; the run carried on
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SkippedCandidate {
    pub pair: NodePair,
    pub error_kind: ErrorKind,
    pub message: String,
}

/// An edge created or strengthened by the run
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AcceptedEdge {
    pub edge_id: Uuid,
    pub pair: NodePair,
    pub relation_kind: RelationKind,
    pub confidence: f64,
    pub discovered_by: String,
    pub status: UpsertStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DiscoveryReport {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub candidates_considered: usize,
    /// Candidate invocations issued (retries not counted)
    pub invocations: u32,
    /// Provider attempts recorded in the ledger, retries included
    pub attempts: u64,
    pub accepted: Vec<AcceptedEdge>,
    /// Accepted verdicts where the stored edge was already as strong
    pub unchanged: usize,
    /// No relationship, or below the acceptance threshold
    pub rejected: usize,
    pub skipped: Vec<SkippedCandidate>,
    pub total_cost: f64,
    pub stop_reason: StopReason,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_budget_json_uses_seconds() {
        let budget: Budget =
            serde_json::from_str(r#"{"max_invocations": 5, "max_cost": 0.5, "max_duration": 60}"#)
                .unwrap();
        assert_eq!(budget.max_duration, Some(Duration::from_secs(60)));

        let open: Budget =
            serde_json::from_str(r#"{"max_invocations": 5, "max_cost": 0.5}"#).unwrap();
        assert_eq!(open.max_duration, None);

        let json = serde_json::to_value(Budget::default()).unwrap();
        assert_eq!(json["max_duration"], 900);
    }

    #[test]
    fn test_stop_reason_serializes_snake_case() {
        assert_eq!(
            serde_json::to_string(&StopReason::BudgetInvocations).unwrap(),
            "\"budget_invocations\""
        );
    }
}
