//! In-memory mock implementation of GraphStore.
//!
//! Uses `tokio::sync::RwLock<HashMap<K, V>>` collections: concurrent readers,
//! one writer per collection. Used by the test suites and by `--in-memory`
//! runs of the binary.

use crate::neo4j::models::*;
use crate::neo4j::traits::GraphStore;
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

/// In-memory mock implementation of GraphStore.
#[derive(Default)]
pub struct MockGraphStore {
    pub nodes: RwLock<HashMap<Uuid, Node>>,
    pub edges: RwLock<HashMap<Uuid, Edge>>,
    pub digests: RwLock<HashMap<DigestPeriod, InsightDigest>>,
}

impl MockGraphStore {
    /// Create a new empty MockGraphStore.
    pub fn new() -> Self {
        Self::default()
    }

    // ========================================================================
    // Builder / seeding methods for tests
    // ========================================================================

    /// Seed a node into the store.
    pub async fn with_node(self, node: Node) -> Self {
        self.nodes.write().await.insert(node.id, node);
        self
    }

    /// Seed an edge into the store.
    pub async fn with_edge(self, edge: Edge) -> Self {
        self.edges.write().await.insert(edge.id, edge);
        self
    }

    /// Number of stored edges
    pub async fn edge_count(&self) -> usize {
        self.edges.read().await.len()
    }

    /// Snapshot of every stored edge
    pub async fn all_edges(&self) -> Vec<Edge> {
        self.edges.read().await.values().cloned().collect()
    }
}

#[async_trait]
impl GraphStore for MockGraphStore {
    async fn upsert_node(&self, node: &Node) -> Result<Uuid> {
        self.nodes.write().await.insert(node.id, node.clone());
        Ok(node.id)
    }

    async fn get_node(&self, id: Uuid) -> Result<Option<Node>> {
        Ok(self.nodes.read().await.get(&id).cloned())
    }

    async fn get_nodes(&self, ids: &[Uuid]) -> Result<Vec<Node>> {
        let nodes = self.nodes.read().await;
        Ok(ids.iter().filter_map(|id| nodes.get(id).cloned()).collect())
    }

    async fn changed_nodes_since(&self, since: DateTime<Utc>) -> Result<Vec<Node>> {
        let mut changed: Vec<Node> = self
            .nodes
            .read()
            .await
            .values()
            .filter(|n| n.updated_at >= since)
            .cloned()
            .collect();
        changed.sort_by(|a, b| b.updated_at.cmp(&a.updated_at).then(a.id.cmp(&b.id)));
        Ok(changed)
    }

    async fn nodes_by_tag_overlap(&self, node: &Node, k: usize) -> Result<Vec<Node>> {
        let mut scored: Vec<(f64, Node)> = self
            .nodes
            .read()
            .await
            .values()
            .filter(|other| other.id != node.id)
            .filter(|other| other.tags.iter().any(|t| node.tags.contains(t)))
            .map(|other| (node.tag_similarity(other), other.clone()))
            .collect();
        scored.sort_by(|(sa, a), (sb, b)| {
            sb.total_cmp(sa)
                .then(b.updated_at.cmp(&a.updated_at))
                .then(a.id.cmp(&b.id))
        });
        Ok(scored.into_iter().take(k).map(|(_, n)| n).collect())
    }

    async fn get_edges_between(&self, a: Uuid, b: Uuid) -> Result<Vec<Edge>> {
        let Some(pair) = NodePair::new(a, b) else {
            return Ok(vec![]);
        };
        let mut edges: Vec<Edge> = self
            .edges
            .read()
            .await
            .values()
            .filter(|e| e.pair() == pair)
            .cloned()
            .collect();
        edges.sort_by_key(|e| e.relation_kind);
        Ok(edges)
    }

    async fn upsert_edge(&self, edge: &Edge) -> Result<()> {
        self.edges.write().await.insert(edge.id, edge.clone());
        Ok(())
    }

    async fn edges_created_between(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Edge>> {
        let mut edges: Vec<Edge> = self
            .edges
            .read()
            .await
            .values()
            .filter(|e| e.created_at >= from && e.created_at < to)
            .cloned()
            .collect();
        edges.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(edges)
    }

    async fn save_digest(&self, digest: &InsightDigest) -> Result<()> {
        self.digests
            .write()
            .await
            .insert(digest.period, digest.clone());
        Ok(())
    }

    async fn get_digest(&self, period: &DigestPeriod) -> Result<Option<InsightDigest>> {
        Ok(self.digests.read().await.get(period).cloned())
    }

    async fn health_check(&self) -> Result<bool> {
        Ok(true)
    }
}
