//! Neo4j client for interacting with the knowledge graph
//!
//! Nodes are stored as `(:Node)` with their tags as a string list. Edges are
//! `[:RELATES]` relationships stored in canonical direction
//! (`source_id < target_id`) and keyed by their deterministic id. Digests are
//! `(:Digest)` nodes merged on `(period_kind, period_start)`.
//!
//! Timestamps are stored as fixed-width RFC 3339 strings (UTC, microseconds)
//! so that string comparison in Cypher matches chronological order.

use super::models::*;
use anyhow::{Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use neo4rs::{query, Graph};
use std::collections::BTreeMap;
use std::sync::Arc;
use uuid::Uuid;

/// Client for Neo4j operations
pub struct Neo4jClient {
    graph: Arc<Graph>,
}

/// Fixed-width UTC timestamp, lexicographically ordered
fn ts(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_ts(s: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .with_context(|| format!("Invalid stored timestamp '{}'", s))
}

/// Stored privacy level; anything unreadable is treated as Encrypted
fn stored_privacy(raw: &str, node_id: &str) -> PrivacyLevel {
    raw.parse().unwrap_or_else(|e: String| {
        tracing::warn!(node_id, "{}; treating node as encrypted", e);
        PrivacyLevel::Encrypted
    })
}

impl Neo4jClient {
    /// Create a new Neo4j client
    pub async fn new(uri: &str, user: &str, password: &str) -> Result<Self> {
        let graph = Graph::new(uri, user, password)
            .await
            .context("Failed to connect to Neo4j")?;

        let client = Self {
            graph: Arc::new(graph),
        };

        // Initialize schema
        client.init_schema().await?;

        Ok(client)
    }

    /// Initialize the graph schema with constraints and indexes
    async fn init_schema(&self) -> Result<()> {
        let statements = [
            "CREATE CONSTRAINT node_id IF NOT EXISTS FOR (n:Node) REQUIRE n.id IS UNIQUE",
            "CREATE CONSTRAINT digest_id IF NOT EXISTS FOR (d:Digest) REQUIRE d.id IS UNIQUE",
            "CREATE INDEX node_updated_at IF NOT EXISTS FOR (n:Node) ON (n.updated_at)",
            "CREATE INDEX digest_period IF NOT EXISTS FOR (d:Digest) ON (d.period_kind, d.period_start)",
            "CREATE INDEX relates_created_at IF NOT EXISTS FOR ()-[r:RELATES]-() ON (r.created_at)",
        ];

        for statement in statements {
            if let Err(e) = self.graph.run(query(statement)).await {
                tracing::warn!("Schema statement failed (may already exist): {}", e);
            }
        }

        Ok(())
    }

    // ========================================================================
    // Node operations
    // ========================================================================

    /// Insert or replace a node
    pub async fn upsert_node(&self, node: &Node) -> Result<Uuid> {
        let q = query(
            r#"
            MERGE (n:Node {id: $id})
            SET n.node_type = $node_type,
                n.title = $title,
                n.content = $content,
                n.tags = $tags,
                n.privacy_level = $privacy_level,
                n.explicit_privacy = $explicit_privacy,
                n.shareable = $shareable,
                n.source = $source,
                n.content_fingerprint = $content_fingerprint,
                n.metadata_json = $metadata_json,
                n.created_at = $created_at,
                n.updated_at = $updated_at
            "#,
        )
        .param("id", node.id.to_string())
        .param("node_type", node.node_type.to_string())
        .param("title", node.title.clone())
        .param("content", node.content.clone())
        .param("tags", node.tags.iter().cloned().collect::<Vec<String>>())
        .param("privacy_level", node.privacy_level.to_string())
        .param(
            "explicit_privacy",
            node.explicit_privacy
                .map(|l| l.to_string())
                .unwrap_or_default(),
        )
        .param("shareable", node.shareable)
        .param("source", node.source.clone().unwrap_or_default())
        .param("content_fingerprint", node.content_fingerprint.clone())
        .param("metadata_json", serde_json::to_string(&node.metadata)?)
        .param("created_at", ts(&node.created_at))
        .param("updated_at", ts(&node.updated_at));

        self.graph
            .run(q)
            .await
            .with_context(|| format!("Failed to upsert node {}", node.id))?;
        Ok(node.id)
    }

    /// Get a node by ID
    pub async fn get_node(&self, id: Uuid) -> Result<Option<Node>> {
        let q = query("MATCH (n:Node {id: $id}) RETURN n").param("id", id.to_string());

        let mut result = self.graph.execute(q).await?;
        if let Some(row) = result.next().await? {
            let node: neo4rs::Node = row.get("n")?;
            Ok(Some(self.node_to_node(&node)?))
        } else {
            Ok(None)
        }
    }

    /// Get several nodes by ID
    pub async fn get_nodes(&self, ids: &[Uuid]) -> Result<Vec<Node>> {
        if ids.is_empty() {
            return Ok(vec![]);
        }
        let q = query("MATCH (n:Node) WHERE n.id IN $ids RETURN n").param(
            "ids",
            ids.iter().map(|id| id.to_string()).collect::<Vec<String>>(),
        );
        self.collect_nodes(q).await
    }

    /// Nodes updated at or after `since`, most recent first
    pub async fn changed_nodes_since(&self, since: DateTime<Utc>) -> Result<Vec<Node>> {
        let q = query(
            r#"
            MATCH (n:Node)
            WHERE n.updated_at >= $since
            RETURN n
            ORDER BY n.updated_at DESC, n.id
            "#,
        )
        .param("since", ts(&since));
        self.collect_nodes(q).await
    }

    /// Top-k nodes by tag Jaccard similarity, ties broken by recency
    pub async fn nodes_by_tag_overlap(&self, node: &Node, k: usize) -> Result<Vec<Node>> {
        if node.tags.is_empty() || k == 0 {
            return Ok(vec![]);
        }
        let q = query(
            r#"
            MATCH (m:Node)
            WHERE m.id <> $id AND any(t IN m.tags WHERE t IN $tags)
            WITH m, size([t IN m.tags WHERE t IN $tags]) AS shared
            WITH m, toFloat(shared) / (size($tags) + size(m.tags) - shared) AS jaccard
            RETURN m AS n
            ORDER BY jaccard DESC, m.updated_at DESC, m.id
            LIMIT $k
            "#,
        )
        .param("id", node.id.to_string())
        .param("tags", node.tags.iter().cloned().collect::<Vec<String>>())
        .param("k", k as i64);
        self.collect_nodes(q).await
    }

    async fn collect_nodes(&self, q: neo4rs::Query) -> Result<Vec<Node>> {
        let mut result = self.graph.execute(q).await?;
        let mut nodes = Vec::new();
        while let Some(row) = result.next().await? {
            let node: neo4rs::Node = row.get("n")?;
            nodes.push(self.node_to_node(&node)?);
        }
        Ok(nodes)
    }

    /// Convert a Neo4j node to a graph Node
    fn node_to_node(&self, node: &neo4rs::Node) -> Result<Node> {
        let node_type: String = node.get("node_type")?;
        let id: String = node.get("id")?;
        let privacy: String = node.get("privacy_level").unwrap_or_default();
        let explicit: String = node.get("explicit_privacy").unwrap_or_default();
        let source: String = node.get("source").unwrap_or_default();
        let metadata_json: String = node.get("metadata_json").unwrap_or_default();
        let tags: Vec<String> = node.get("tags").unwrap_or_default();

        Ok(Node {
            id: id.parse()?,
            node_type: node_type
                .parse()
                .map_err(|e: String| anyhow::anyhow!(e))?,
            title: node.get("title").unwrap_or_default(),
            content: node.get("content").unwrap_or_default(),
            tags: tags.into_iter().collect(),
            privacy_level: stored_privacy(&privacy, &id),
            explicit_privacy: if explicit.is_empty() {
                None
            } else {
                Some(stored_privacy(&explicit, &id))
            },
            shareable: node.get("shareable").unwrap_or(false),
            source: if source.is_empty() { None } else { Some(source) },
            content_fingerprint: node.get("content_fingerprint").unwrap_or_default(),
            metadata: serde_json::from_str(&metadata_json).unwrap_or(serde_json::Value::Null),
            created_at: parse_ts(&node.get::<String>("created_at")?)?,
            updated_at: parse_ts(&node.get::<String>("updated_at")?)?,
        })
    }

    // ========================================================================
    // Edge operations
    // ========================================================================

    /// All edges between two nodes
    pub async fn get_edges_between(&self, a: Uuid, b: Uuid) -> Result<Vec<Edge>> {
        let Some(pair) = NodePair::new(a, b) else {
            return Ok(vec![]);
        };
        let q = query(
            r#"
            MATCH (s:Node {id: $source})-[r:RELATES]->(t:Node {id: $target})
            RETURN r, s.id AS source_id, t.id AS target_id
            ORDER BY r.kind
            "#,
        )
        .param("source", pair.a.to_string())
        .param("target", pair.b.to_string());
        self.collect_edges(q).await
    }

    /// Insert or replace an edge by id
    pub async fn upsert_edge(&self, edge: &Edge) -> Result<()> {
        let pair = edge.pair();
        let q = query(
            r#"
            MATCH (s:Node {id: $source}), (t:Node {id: $target})
            MERGE (s)-[r:RELATES {id: $id}]->(t)
            SET r.kind = $kind,
                r.confidence = $confidence,
                r.rationale = $rationale,
                r.discovered_by = $discovered_by,
                r.created_at = $created_at,
                r.updated_at = $updated_at
            "#,
        )
        .param("id", edge.id.to_string())
        .param("source", pair.a.to_string())
        .param("target", pair.b.to_string())
        .param("kind", edge.relation_kind.to_string())
        .param("confidence", edge.confidence)
        .param("rationale", edge.rationale.clone())
        .param("discovered_by", edge.discovered_by.clone())
        .param("created_at", ts(&edge.created_at))
        .param("updated_at", ts(&edge.updated_at));

        self.graph
            .run(q)
            .await
            .with_context(|| format!("Failed to upsert edge {} ({})", edge.id, pair))?;
        Ok(())
    }

    /// Edges created in `[from, to)`
    pub async fn edges_created_between(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Edge>> {
        let q = query(
            r#"
            MATCH (s:Node)-[r:RELATES]->(t:Node)
            WHERE r.created_at >= $from AND r.created_at < $to
            RETURN r, s.id AS source_id, t.id AS target_id
            ORDER BY r.created_at, r.id
            "#,
        )
        .param("from", ts(&from))
        .param("to", ts(&to));
        self.collect_edges(q).await
    }

    async fn collect_edges(&self, q: neo4rs::Query) -> Result<Vec<Edge>> {
        let mut result = self.graph.execute(q).await?;
        let mut edges = Vec::new();
        while let Some(row) = result.next().await? {
            let rel: neo4rs::Relation = row.get("r")?;
            let source_id: String = row.get("source_id")?;
            let target_id: String = row.get("target_id")?;
            let kind: String = rel.get("kind")?;
            edges.push(Edge {
                id: rel.get::<String>("id")?.parse()?,
                source_id: source_id.parse()?,
                target_id: target_id.parse()?,
                relation_kind: kind.parse().map_err(|e: String| anyhow::anyhow!(e))?,
                confidence: rel.get("confidence").unwrap_or(0.0),
                rationale: rel.get("rationale").unwrap_or_default(),
                discovered_by: rel.get("discovered_by").unwrap_or_default(),
                created_at: parse_ts(&rel.get::<String>("created_at")?)?,
                updated_at: parse_ts(&rel.get::<String>("updated_at")?)?,
            });
        }
        Ok(edges)
    }

    // ========================================================================
    // Digest operations
    // ========================================================================

    /// Store a digest, replacing the digest of the same period
    pub async fn save_digest(&self, digest: &InsightDigest) -> Result<()> {
        let q = query(
            r#"
            MERGE (d:Digest {period_kind: $period_kind, period_start: $period_start})
            SET d.id = $id,
                d.summary_text = $summary_text,
                d.referenced_edges = $referenced_edges,
                d.relation_counts_json = $relation_counts_json,
                d.type_pair_counts_json = $type_pair_counts_json,
                d.discovered_by = $discovered_by,
                d.generated_at = $generated_at
            "#,
        )
        .param("period_kind", digest.period.kind.to_string())
        .param("period_start", digest.period.start.to_string())
        .param("id", digest.id.to_string())
        .param("summary_text", digest.summary_text.clone())
        .param(
            "referenced_edges",
            digest
                .referenced_edges
                .iter()
                .map(|id| id.to_string())
                .collect::<Vec<String>>(),
        )
        .param(
            "relation_counts_json",
            serde_json::to_string(&digest.relation_counts)?,
        )
        .param(
            "type_pair_counts_json",
            serde_json::to_string(&digest.type_pair_counts)?,
        )
        .param(
            "discovered_by",
            digest.discovered_by.clone().unwrap_or_default(),
        )
        .param("generated_at", ts(&digest.generated_at));

        self.graph
            .run(q)
            .await
            .with_context(|| format!("Failed to save digest {}", digest.period))?;
        Ok(())
    }

    /// Get the digest for a period
    pub async fn get_digest(&self, period: &DigestPeriod) -> Result<Option<InsightDigest>> {
        let q = query(
            r#"
            MATCH (d:Digest {period_kind: $period_kind, period_start: $period_start})
            RETURN d
            "#,
        )
        .param("period_kind", period.kind.to_string())
        .param("period_start", period.start.to_string());

        let mut result = self.graph.execute(q).await?;
        let Some(row) = result.next().await? else {
            return Ok(None);
        };
        let d: neo4rs::Node = row.get("d")?;

        let referenced: Vec<String> = d.get("referenced_edges").unwrap_or_default();
        let relation_counts: BTreeMap<RelationKind, usize> = serde_json::from_str(
            &d.get::<String>("relation_counts_json").unwrap_or_default(),
        )
        .unwrap_or_default();
        let type_pair_counts: BTreeMap<String, usize> = serde_json::from_str(
            &d.get::<String>("type_pair_counts_json")
                .unwrap_or_default(),
        )
        .unwrap_or_default();
        let discovered_by: String = d.get("discovered_by").unwrap_or_default();

        Ok(Some(InsightDigest {
            id: d.get::<String>("id")?.parse()?,
            period: *period,
            summary_text: d.get("summary_text").unwrap_or_default(),
            referenced_edges: referenced
                .iter()
                .filter_map(|s| s.parse().ok())
                .collect(),
            relation_counts,
            type_pair_counts,
            discovered_by: if discovered_by.is_empty() {
                None
            } else {
                Some(discovered_by)
            },
            generated_at: parse_ts(&d.get::<String>("generated_at")?)?,
        }))
    }

    /// Check connectivity
    pub async fn health_check(&self) -> Result<bool> {
        let mut result = self.graph.execute(query("RETURN 1 AS ok")).await?;
        Ok(result.next().await?.is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timestamps_sort_lexicographically() {
        let earlier = DateTime::parse_from_rfc3339("2026-01-02T03:04:05Z")
            .unwrap()
            .with_timezone(&Utc);
        let later = earlier + chrono::Duration::milliseconds(1500);
        assert!(ts(&earlier) < ts(&later));
        assert_eq!(ts(&earlier).len(), ts(&later).len());
        assert_eq!(parse_ts(&ts(&earlier)).unwrap(), earlier);
    }

    #[test]
    fn test_unreadable_timestamp_is_an_error() {
        assert!(parse_ts("").is_err());
        assert!(parse_ts("yesterday").is_err());
    }

    #[test]
    fn test_unreadable_privacy_fails_closed() {
        assert_eq!(stored_privacy("public", "n1"), PrivacyLevel::Public);
        assert_eq!(stored_privacy("Sensitive", "n1"), PrivacyLevel::Sensitive);
        assert_eq!(stored_privacy("", "n1"), PrivacyLevel::Encrypted);
        assert_eq!(stored_privacy("top-secret", "n1"), PrivacyLevel::Encrypted);
    }
}
