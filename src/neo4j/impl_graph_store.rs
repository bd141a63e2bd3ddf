//! `GraphStore` implementation for `Neo4jClient`.
//!
//! Every method simply delegates to the corresponding inherent method on `Neo4jClient`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::client::Neo4jClient;
use super::models::*;
use super::traits::GraphStore;

#[async_trait]
impl GraphStore for Neo4jClient {
    // ========================================================================
    // Node operations
    // ========================================================================

    async fn upsert_node(&self, node: &Node) -> anyhow::Result<Uuid> {
        self.upsert_node(node).await
    }

    async fn get_node(&self, id: Uuid) -> anyhow::Result<Option<Node>> {
        self.get_node(id).await
    }

    async fn get_nodes(&self, ids: &[Uuid]) -> anyhow::Result<Vec<Node>> {
        self.get_nodes(ids).await
    }

    async fn changed_nodes_since(&self, since: DateTime<Utc>) -> anyhow::Result<Vec<Node>> {
        self.changed_nodes_since(since).await
    }

    async fn nodes_by_tag_overlap(&self, node: &Node, k: usize) -> anyhow::Result<Vec<Node>> {
        self.nodes_by_tag_overlap(node, k).await
    }

    // ========================================================================
    // Edge operations
    // ========================================================================

    async fn get_edges_between(&self, a: Uuid, b: Uuid) -> anyhow::Result<Vec<Edge>> {
        self.get_edges_between(a, b).await
    }

    async fn upsert_edge(&self, edge: &Edge) -> anyhow::Result<()> {
        self.upsert_edge(edge).await
    }

    async fn edges_created_between(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> anyhow::Result<Vec<Edge>> {
        self.edges_created_between(from, to).await
    }

    // ========================================================================
    // Digest operations
    // ========================================================================

    async fn save_digest(&self, digest: &InsightDigest) -> anyhow::Result<()> {
        self.save_digest(digest).await
    }

    async fn get_digest(&self, period: &DigestPeriod) -> anyhow::Result<Option<InsightDigest>> {
        self.get_digest(period).await
    }

    async fn health_check(&self) -> anyhow::Result<bool> {
        self.health_check().await
    }
}
