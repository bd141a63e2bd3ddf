//! Edge persistence with deduplication and confidence tracking
//!
//! At most one edge exists per (unordered pair, relation kind). A rediscovery
//! only replaces confidence, rationale and `discovered_by` when the new
//! confidence is strictly higher. Writes touching sensitive or encrypted nodes
//! are refused unless the edge was produced by a local provider.

use crate::llm::{ErrorKind, ProviderRegistry};
use crate::neo4j::models::{Edge, NodePair, PrivacyLevel};
use crate::neo4j::GraphStore;
use chrono::Utc;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex;

#[derive(Debug, Error)]
pub enum EdgeWriteError {
    #[error("refusing edge {pair} at privacy level '{level}' discovered by non-local '{discovered_by}'")]
    PrivacyViolation {
        pair: NodePair,
        level: PrivacyLevel,
        discovered_by: String,
    },

    #[error("storage error: {0:#}")]
    Storage(#[from] anyhow::Error),
}

impl EdgeWriteError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::PrivacyViolation { .. } => ErrorKind::PrivacyViolation,
            Self::Storage(_) => ErrorKind::Storage,
        }
    }
}

/// Result of an upsert
#[derive(Debug, Clone, PartialEq)]
pub enum UpsertOutcome {
    Created(Edge),
    /// An existing edge was replaced by a higher-confidence finding
    Strengthened { edge: Edge, previous_confidence: f64 },
    /// The existing edge is at least as confident; nothing was written
    Unchanged(Edge),
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum UpsertStatus {
    Created,
    Strengthened,
    Unchanged,
}

impl UpsertOutcome {
    pub fn edge(&self) -> &Edge {
        match self {
            Self::Created(edge) | Self::Unchanged(edge) => edge,
            Self::Strengthened { edge, .. } => edge,
        }
    }

    pub fn status(&self) -> UpsertStatus {
        match self {
            Self::Created(_) => UpsertStatus::Created,
            Self::Strengthened { .. } => UpsertStatus::Strengthened,
            Self::Unchanged(_) => UpsertStatus::Unchanged,
        }
    }
}

pub struct EdgeWriter {
    store: Arc<dyn GraphStore>,
    registry: Arc<ProviderRegistry>,
    locks: DashMap<NodePair, Arc<Mutex<()>>>,
}

impl EdgeWriter {
    pub fn new(store: Arc<dyn GraphStore>, registry: Arc<ProviderRegistry>) -> Self {
        Self {
            store,
            registry,
            locks: DashMap::new(),
        }
    }

    fn lock_for(&self, pair: NodePair) -> Arc<Mutex<()>> {
        self.locks
            .entry(pair)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Insert or strengthen `edge`.
    ///
    /// `level` is the pair's effective privacy level as seen by the caller;
    /// the stored levels of both nodes are re-read and the stricter one wins.
    pub async fn upsert(
        &self,
        edge: Edge,
        level: PrivacyLevel,
    ) -> Result<UpsertOutcome, EdgeWriteError> {
        let pair = edge.pair();
        let lock = self.lock_for(pair);
        let outcome = {
            let _guard = lock.lock().await;
            self.upsert_locked(edge, pair, level).await
        };
        drop(lock);
        self.locks.remove_if(&pair, |_, l| Arc::strong_count(l) == 1);
        outcome
    }

    async fn upsert_locked(
        &self,
        edge: Edge,
        pair: NodePair,
        level: PrivacyLevel,
    ) -> Result<UpsertOutcome, EdgeWriteError> {
        let stored_level = self
            .store
            .get_nodes(&[pair.a, pair.b])
            .await?
            .iter()
            .map(|n| n.privacy_level)
            .max()
            .unwrap_or(PrivacyLevel::Public);
        let level = level.max(stored_level);

        if level.requires_local() {
            let local = self
                .registry
                .resolve_identifier(&edge.discovered_by)
                .is_some_and(|p| p.is_local);
            if !local {
                tracing::error!(
                    pair = %pair,
                    level = %level,
                    discovered_by = %edge.discovered_by,
                    "Refused edge write that would leak private content"
                );
                return Err(EdgeWriteError::PrivacyViolation {
                    pair,
                    level,
                    discovered_by: edge.discovered_by,
                });
            }
        }

        let existing = self
            .store
            .get_edges_between(pair.a, pair.b)
            .await?
            .into_iter()
            .find(|e| e.relation_kind == edge.relation_kind);

        match existing {
            None => {
                self.store.upsert_edge(&edge).await?;
                tracing::info!(
                    pair = %pair,
                    kind = %edge.relation_kind,
                    confidence = edge.confidence,
                    "Created edge"
                );
                Ok(UpsertOutcome::Created(edge))
            }
            Some(previous) if edge.confidence > previous.confidence => {
                let previous_confidence = previous.confidence;
                let updated = Edge {
                    confidence: edge.confidence,
                    rationale: edge.rationale,
                    discovered_by: edge.discovered_by,
                    updated_at: Utc::now(),
                    ..previous
                };
                self.store.upsert_edge(&updated).await?;
                tracing::info!(
                    pair = %pair,
                    kind = %updated.relation_kind,
                    previous = previous_confidence,
                    confidence = updated.confidence,
                    "Strengthened edge"
                );
                Ok(UpsertOutcome::Strengthened {
                    edge: updated,
                    previous_confidence,
                })
            }
            Some(previous) => Ok(UpsertOutcome::Unchanged(previous)),
        }
    }
}
