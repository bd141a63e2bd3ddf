//! GraphStore trait definition
//!
//! Defines the abstract interface the discovery engine needs from graph
//! storage. Implemented by `Neo4jClient` for production and by
//! `MockGraphStore` for tests and in-memory runs.

use crate::neo4j::models::*;
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Abstract interface for all graph database operations.
///
/// `upsert_edge` is a plain write keyed by edge id; the "never regress a
/// stronger finding" rule lives in the discovery engine's edge writer, which
/// reads the existing edges first.
#[async_trait]
pub trait GraphStore: Send + Sync {
    // ========================================================================
    // Node operations
    // ========================================================================

    /// Insert or replace a node, returning its id
    async fn upsert_node(&self, node: &Node) -> Result<Uuid>;

    /// Get a node by ID
    async fn get_node(&self, id: Uuid) -> Result<Option<Node>>;

    /// Get several nodes by ID (missing ids are skipped)
    async fn get_nodes(&self, ids: &[Uuid]) -> Result<Vec<Node>>;

    /// Nodes whose `updated_at` is at or after `since`, most recent first
    async fn changed_nodes_since(&self, since: DateTime<Utc>) -> Result<Vec<Node>>;

    /// Up to `k` other nodes sharing at least one tag with `node`, ranked by
    /// Jaccard similarity of the tag sets, ties broken by most recent `updated_at`
    async fn nodes_by_tag_overlap(&self, node: &Node, k: usize) -> Result<Vec<Node>>;

    // ========================================================================
    // Edge operations
    // ========================================================================

    /// All edges (of any relation kind) between two nodes, in either order
    async fn get_edges_between(&self, a: Uuid, b: Uuid) -> Result<Vec<Edge>>;

    /// Insert or replace an edge by id
    async fn upsert_edge(&self, edge: &Edge) -> Result<()>;

    /// Edges created in `[from, to)`, oldest first
    async fn edges_created_between(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Edge>>;

    // ========================================================================
    // Digest operations
    // ========================================================================

    /// Store a digest, replacing any digest for the same period
    async fn save_digest(&self, digest: &InsightDigest) -> Result<()>;

    /// Get the digest for a period
    async fn get_digest(&self, period: &DigestPeriod) -> Result<Option<InsightDigest>>;

    /// Check connectivity to the backing store
    async fn health_check(&self) -> Result<bool>;
}
