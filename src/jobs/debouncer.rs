//! Ingestion-triggered discovery debouncer.
//!
//! Coalesces bursts of content changes (an adapter importing a notebook
//! touches hundreds of nodes) into a single discovery run after a quiet
//! period.
//!
//! ## Design
//!
//! Uses an mpsc channel + timeout loop:
//! 1. `trigger(node_id)` sends a non-blocking message
//! 2. Background task waits for the first trigger, then keeps consuming
//!    triggers until `debounce_ms` of silence
//! 3. After the quiet period, runs discovery with the configured budget
//! 4. The loop is sequential, so triggered runs never overlap

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use uuid::Uuid;

use super::service::DiscoveryRunner;
use crate::discovery::Budget;

/// Debounced discovery trigger. Thread-safe and non-blocking.
pub struct DiscoveryDebouncer {
    trigger_tx: mpsc::Sender<Uuid>,
}

impl DiscoveryDebouncer {
    /// Spawns a background task that lives until the debouncer is dropped.
    pub fn new(runner: Arc<dyn DiscoveryRunner>, debounce_ms: u64, budget: Budget) -> Self {
        let (tx, rx) = mpsc::channel::<Uuid>(256);
        tokio::spawn(Self::run_loop(runner, rx, debounce_ms, budget));
        Self { trigger_tx: tx }
    }

    /// Note that `node_id` changed.
    ///
    /// If the channel is full the trigger is dropped; the pending run still
    /// fires and picks the node up through `changed_nodes_since`.
    pub fn trigger(&self, node_id: Uuid) {
        let _ = self.trigger_tx.try_send(node_id);
    }

    async fn run_loop(
        runner: Arc<dyn DiscoveryRunner>,
        mut rx: mpsc::Receiver<Uuid>,
        debounce_ms: u64,
        budget: Budget,
    ) {
        let debounce = Duration::from_millis(debounce_ms);

        loop {
            if rx.recv().await.is_none() {
                break;
            }
            let mut coalesced = 1usize;

            loop {
                match tokio::time::timeout(debounce, rx.recv()).await {
                    Ok(Some(_)) => coalesced += 1,
                    Ok(None) => return,
                    Err(_) => break,
                }
            }

            tracing::debug!(changes = coalesced, "Starting ingestion-triggered discovery");
            match runner.run_discovery(budget).await {
                Ok(report) => {
                    tracing::info!(
                        run_id = %report.run_id,
                        changes = coalesced,
                        accepted = report.accepted.len(),
                        "Triggered discovery run finished"
                    );
                }
                Err(e) => {
                    tracing::warn!("Triggered discovery run failed: {:#}", e);
                }
            }
        }
    }
}
