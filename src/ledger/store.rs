//! Cost ledger
//!
//! Append-only log of invocation records with incremental aggregates:
//! - Day buckets (`DashMap<NaiveDate, DayBucket>`) make window totals
//!   O(days in window)
//! - Run totals (`DashMap<Uuid, RunTotals>`) make budget checks O(1)
//!
//! Records can be persisted to a JSON-lines file: `open` replays it and
//! `flush` appends whatever has not been written yet.

use super::models::*;
use anyhow::{Context, Result};
use chrono::{NaiveDate, Utc};
use dashmap::DashMap;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tokio::sync::{Mutex, RwLock};
use uuid::Uuid;

/// Aggregates for one UTC day
#[derive(Debug, Clone, Default)]
struct DayBucket {
    totals: UsageTotals,
    failed: u64,
    succeeded: u64,
    latency_ms: u64,
    by_provider: BTreeMap<String, UsageTotals>,
    by_model: BTreeMap<String, UsageTotals>,
}

impl DayBucket {
    fn add(&mut self, record: &InvocationRecord) {
        self.totals.add(record);
        match record.outcome {
            InvocationOutcome::Success => self.succeeded += 1,
            InvocationOutcome::Failed => self.failed += 1,
            InvocationOutcome::Retried => {}
        }
        self.latency_ms += record.latency_ms;
        self.by_provider
            .entry(record.provider.clone())
            .or_default()
            .add(record);
        self.by_model
            .entry(record.model_key())
            .or_default()
            .add(record);
    }
}

struct JsonlSink {
    path: PathBuf,
    /// Number of records already written to `path`
    flushed: Mutex<usize>,
}

/// Thread-safe cost ledger, shared as `Arc<CostLedger>`
#[derive(Default)]
pub struct CostLedger {
    records: RwLock<Vec<InvocationRecord>>,
    days: DashMap<NaiveDate, DayBucket>,
    runs: DashMap<Uuid, RunTotals>,
    sink: Option<JsonlSink>,
}

impl CostLedger {
    /// In-memory ledger without persistence
    pub fn new() -> Self {
        Self::default()
    }

    /// Ledger backed by a JSON-lines file, replaying any existing records
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let mut ledger = Self::new();
        let mut replayed = 0usize;

        if path.exists() {
            let content = tokio::fs::read_to_string(&path)
                .await
                .with_context(|| format!("Failed to read ledger {}", path.display()))?;
            let mut records = Vec::new();
            for (line_no, line) in content.lines().enumerate() {
                if line.trim().is_empty() {
                    continue;
                }
                match serde_json::from_str::<InvocationRecord>(line) {
                    Ok(record) => records.push(record),
                    Err(e) => tracing::warn!(
                        "Skipping malformed ledger line {} in {}: {}",
                        line_no + 1,
                        path.display(),
                        e
                    ),
                }
            }
            for record in &records {
                ledger.aggregate(record);
            }
            replayed = records.len();
            ledger.records = RwLock::new(records);
            tracing::info!("Replayed {} invocation records from {}", replayed, path.display());
        }

        ledger.sink = Some(JsonlSink {
            path,
            flushed: Mutex::new(replayed),
        });
        Ok(ledger)
    }

    fn aggregate(&self, record: &InvocationRecord) {
        self.days
            .entry(record.timestamp.date_naive())
            .or_default()
            .add(record);
        if let Some(run_id) = record.run_id {
            let mut run = self.runs.entry(run_id).or_default();
            run.cost += record.cost_estimate;
            run.tokens += record.total_tokens();
            run.attempts += 1;
            if record.outcome == InvocationOutcome::Failed {
                run.failed_attempts += 1;
            }
        }
    }

    /// Append a record and update the aggregates
    pub async fn record(&self, record: InvocationRecord) {
        tracing::debug!(
            provider = %record.provider,
            model = %record.model,
            task = %record.task_kind,
            attempt = record.attempt,
            outcome = ?record.outcome,
            cost = record.cost_estimate,
            "Recorded invocation"
        );
        let mut records = self.records.write().await;
        self.aggregate(&record);
        records.push(record);
    }

    /// Total cost over the trailing window
    pub fn running_total(&self, window: CostWindow) -> f64 {
        let today = Utc::now().date_naive();
        self.days
            .iter()
            .filter(|entry| window.contains(*entry.key(), today))
            .map(|entry| entry.value().totals.cost)
            .sum()
    }

    /// Totals for one discovery run (zero when the run made no calls)
    pub fn run_totals(&self, run_id: Uuid) -> RunTotals {
        self.runs
            .get(&run_id)
            .map(|r| r.value().clone())
            .unwrap_or_default()
    }

    /// Cost of one run so far
    pub fn run_cost(&self, run_id: Uuid) -> f64 {
        self.runs.get(&run_id).map(|r| r.cost).unwrap_or(0.0)
    }

    /// Breakdown by provider and model over the trailing window
    pub fn cost_summary(&self, window: CostWindow) -> CostSummary {
        let today = Utc::now().date_naive();
        let mut summary = CostSummary {
            window: window.to_string(),
            period_end: today,
            ..Default::default()
        };

        let mut succeeded = 0u64;
        let mut latency_ms = 0u64;
        for entry in self.days.iter() {
            let day = *entry.key();
            if !window.contains(day, today) {
                continue;
            }
            let bucket = entry.value();
            summary.total_cost += bucket.totals.cost;
            summary.total_tokens += bucket.totals.tokens;
            summary.invocations += bucket.totals.invocations;
            summary.failed_invocations += bucket.failed;
            succeeded += bucket.succeeded;
            latency_ms += bucket.latency_ms;
            for (provider, totals) in &bucket.by_provider {
                summary
                    .by_provider
                    .entry(provider.clone())
                    .or_default()
                    .merge(totals);
            }
            for (model, totals) in &bucket.by_model {
                summary.by_model.entry(model.clone()).or_default().merge(totals);
            }
            summary.period_start = Some(summary.period_start.map_or(day, |d| d.min(day)));
        }
        if summary.invocations > 0 {
            summary.avg_latency_ms = latency_ms / summary.invocations;
            summary.success_rate = succeeded as f64 / summary.invocations as f64;
        }
        summary
    }

    /// Snapshot of all records, in insertion order
    pub async fn records(&self) -> Vec<InvocationRecord> {
        self.records.read().await.clone()
    }

    /// Number of records
    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }

    /// Append unwritten records to the JSON-lines file. No-op for in-memory ledgers.
    pub async fn flush(&self) -> Result<usize> {
        let Some(sink) = &self.sink else {
            return Ok(0);
        };
        let mut flushed = sink.flushed.lock().await;
        let pending: Vec<InvocationRecord> = {
            let records = self.records.read().await;
            records[(*flushed).min(records.len())..].to_vec()
        };
        if pending.is_empty() {
            return Ok(0);
        }

        if let Some(parent) = sink.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .with_context(|| format!("Failed to create {}", parent.display()))?;
            }
        }

        let mut buf = String::new();
        for record in &pending {
            buf.push_str(&serde_json::to_string(record)?);
            buf.push('\n');
        }

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&sink.path)
            .await
            .with_context(|| format!("Failed to open ledger {}", sink.path.display()))?;
        file.write_all(buf.as_bytes()).await?;
        file.flush().await?;

        *flushed += pending.len();
        tracing::debug!("Flushed {} invocation records to {}", pending.len(), sink.path.display());
        Ok(pending.len())
    }
}
