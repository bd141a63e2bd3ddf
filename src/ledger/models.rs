//! Cost ledger data models

use crate::llm::TaskKind;
use crate::neo4j::models::PrivacyLevel;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Outcome of a single invocation attempt
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum InvocationOutcome {
    Success,
    /// Transient failure followed by another attempt
    Retried,
    Failed,
}

/// One attempt against a provider. Append-only.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InvocationRecord {
    pub id: Uuid,
    #[serde(default)]
    pub run_id: Option<Uuid>,
    pub task_kind: TaskKind,
    pub provider: String,
    pub model: String,
    pub privacy_level_at_call: PrivacyLevel,
    /// 1-based attempt number
    pub attempt: u32,
    pub input_token_count: u64,
    pub output_token_count: u64,
    pub cost_estimate: f64,
    pub latency_ms: u64,
    pub outcome: InvocationOutcome,
    #[serde(default)]
    pub error: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl InvocationRecord {
    pub fn total_tokens(&self) -> u64 {
        self.input_token_count + self.output_token_count
    }

    /// `<provider>/<model>`
    pub fn model_key(&self) -> String {
        format!("{}/{}", self.provider, self.model)
    }
}

/// Trailing window for cost queries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CostWindow {
    /// The last N UTC days, today included
    Days(u32),
    All,
}

impl CostWindow {
    /// First UTC day covered by the window (`None` for `All`)
    pub fn start_day(&self, today: NaiveDate) -> Option<NaiveDate> {
        match self {
            Self::All => None,
            Self::Days(n) => Some(today - chrono::Duration::days(i64::from(*n) - 1)),
        }
    }

    pub fn contains(&self, day: NaiveDate, today: NaiveDate) -> bool {
        match self {
            Self::All => true,
            Self::Days(0) => false,
            Self::Days(_) => self
                .start_day(today)
                .is_some_and(|start| day >= start && day <= today),
        }
    }
}

impl fmt::Display for CostWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Days(n) => write!(f, "{}d", n),
            Self::All => write!(f, "all"),
        }
    }
}

impl FromStr for CostWindow {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim().to_lowercase();
        if s == "all" {
            return Ok(Self::All);
        }
        s.trim_end_matches('d')
            .parse::<u32>()
            .map(Self::Days)
            .map_err(|_| format!("Unknown cost window: {}", s))
    }
}

/// Aggregated usage for one provider or model
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct UsageTotals {
    pub cost: f64,
    pub tokens: u64,
    pub invocations: u64,
}

impl UsageTotals {
    pub fn add(&mut self, record: &InvocationRecord) {
        self.cost += record.cost_estimate;
        self.tokens += record.total_tokens();
        self.invocations += 1;
    }

    pub fn merge(&mut self, other: &UsageTotals) {
        self.cost += other.cost;
        self.tokens += other.tokens;
        self.invocations += other.invocations;
    }
}

/// Running totals of one discovery run
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct RunTotals {
    pub cost: f64,
    pub tokens: u64,
    pub attempts: u64,
    pub failed_attempts: u64,
}

/// Cost breakdown over a window
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct CostSummary {
    pub window: String,
    pub total_cost: f64,
    pub total_tokens: u64,
    pub invocations: u64,
    pub failed_invocations: u64,
    /// Mean latency over every attempt in the window
    pub avg_latency_ms: u64,
    /// Share of attempts that succeeded, 0.0..=1.0 (0.0 with no attempts)
    pub success_rate: f64,
    pub by_provider: BTreeMap<String, UsageTotals>,
    /// Keyed by `<provider>/<model>`
    pub by_model: BTreeMap<String, UsageTotals>,
    /// Earliest day with usage in the window
    pub period_start: Option<NaiveDate>,
    pub period_end: NaiveDate,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_window_parsing_and_membership() {
        assert_eq!("7".parse::<CostWindow>().unwrap(), CostWindow::Days(7));
        assert_eq!("30d".parse::<CostWindow>().unwrap(), CostWindow::Days(30));
        assert_eq!("ALL".parse::<CostWindow>().unwrap(), CostWindow::All);
        assert!("week".parse::<CostWindow>().is_err());

        let today = NaiveDate::from_ymd_opt(2026, 10, 19).unwrap();
        let window = CostWindow::Days(7);
        assert!(window.contains(today, today));
        assert!(window.contains(NaiveDate::from_ymd_opt(2026, 10, 13).unwrap(), today));
        assert!(!window.contains(NaiveDate::from_ymd_opt(2026, 10, 12).unwrap(), today));
        assert!(!CostWindow::Days(0).contains(today, today));
    }
}
