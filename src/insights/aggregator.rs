//! Insight aggregation
//!
//! Summarizes the edges created within a digest period. The summary request
//! is routed at the strictest privacy level among the nodes the period's
//! edges reference, so a week touching a sensitive journal entry is only ever
//! summarized by a local model.

use crate::llm::prompts::insight_prompt;
use crate::llm::{
    ErrorKind, InvocationContext, Invoker, ProviderError, ProviderRegistry, RoutingError, TaskKind,
};
use crate::neo4j::models::{DigestPeriod, Edge, InsightDigest, Node, NodeType, RelationKind};
use crate::neo4j::GraphStore;
use crate::privacy::effective_level;
use chrono::Utc;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

/// Summary stored for periods without new edges
pub const EMPTY_PERIOD_SUMMARY: &str = "No new connections were discovered in this period.";

#[derive(Debug, Error)]
pub enum InsightError {
    #[error(transparent)]
    Routing(#[from] RoutingError),

    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error("storage error: {0:#}")]
    Storage(#[from] anyhow::Error),
}

impl InsightError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Routing(e) => ErrorKind::from(e),
            Self::Provider(e) => e.kind(),
            Self::Storage(_) => ErrorKind::Storage,
        }
    }
}

/// Key for a node type pair, in sorted order ("document-vendor")
pub fn type_pair_key(a: NodeType, b: NodeType) -> String {
    let (first, second) = if a.to_string() <= b.to_string() {
        (a, b)
    } else {
        (b, a)
    };
    format!("{}-{}", first, second)
}

pub struct InsightAggregator {
    store: Arc<dyn GraphStore>,
    registry: Arc<ProviderRegistry>,
    invoker: Arc<Invoker>,
}

impl InsightAggregator {
    pub fn new(
        store: Arc<dyn GraphStore>,
        registry: Arc<ProviderRegistry>,
        invoker: Arc<Invoker>,
    ) -> Self {
        Self {
            store,
            registry,
            invoker,
        }
    }

    /// Build and store the digest for `period`, replacing any earlier one
    pub async fn summarize(&self, period: DigestPeriod) -> Result<InsightDigest, InsightError> {
        let edges = self
            .store
            .edges_created_between(period.start_at(), period.end_at())
            .await?;

        let digest = if edges.is_empty() {
            tracing::info!(period = %period, "No new edges; storing empty digest");
            InsightDigest {
                id: Uuid::new_v4(),
                period,
                summary_text: EMPTY_PERIOD_SUMMARY.to_string(),
                referenced_edges: Vec::new(),
                relation_counts: BTreeMap::new(),
                type_pair_counts: BTreeMap::new(),
                discovered_by: None,
                generated_at: Utc::now(),
            }
        } else {
            self.summarize_edges(period, edges).await?
        };

        self.store.save_digest(&digest).await?;
        Ok(digest)
    }

    async fn summarize_edges(
        &self,
        period: DigestPeriod,
        edges: Vec<Edge>,
    ) -> Result<InsightDigest, InsightError> {
        let ids: Vec<Uuid> = edges
            .iter()
            .flat_map(|e| [e.source_id, e.target_id])
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        let nodes: HashMap<Uuid, Node> = self
            .store
            .get_nodes(&ids)
            .await?
            .into_iter()
            .map(|n| (n.id, n))
            .collect();

        let mut relation_counts: BTreeMap<RelationKind, usize> = BTreeMap::new();
        let mut type_pair_counts: BTreeMap<String, usize> = BTreeMap::new();
        for edge in &edges {
            *relation_counts.entry(edge.relation_kind).or_default() += 1;
            if let (Some(a), Some(b)) = (nodes.get(&edge.source_id), nodes.get(&edge.target_id)) {
                *type_pair_counts
                    .entry(type_pair_key(a.node_type, b.node_type))
                    .or_default() += 1;
            }
        }

        let level = effective_level(nodes.values().map(|n| n.privacy_level));
        let profile = self.registry.select(TaskKind::Insight, level)?;
        let prompt = insight_prompt(
            &period.to_string(),
            &edges,
            &nodes,
            &relation_counts,
            &type_pair_counts,
        );
        let ctx = InvocationContext {
            run_id: None,
            privacy_level: level,
        };
        let invocation = self
            .invoker
            .invoke(profile, &prompt, TaskKind::Insight, &ctx)
            .await?;
        let summary_text = invocation.result.into_insight().unwrap_or_default();

        tracing::info!(
            period = %period,
            edges = edges.len(),
            level = %level,
            provider = %invocation.discovered_by,
            "Generated insight digest"
        );

        Ok(InsightDigest {
            id: Uuid::new_v4(),
            period,
            summary_text,
            referenced_edges: edges.iter().map(|e| e.id).collect(),
            relation_counts,
            type_pair_counts,
            discovered_by: Some(invocation.discovered_by),
            generated_at: Utc::now(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::CostLedger;
    use crate::llm::mock::{MockLlmBackend, MockReply};
    use crate::llm::profiles::default_profiles;
    use crate::llm::BackoffPolicy;
    use crate::neo4j::models::{NodePair, PeriodKind, PrivacyLevel};
    use crate::neo4j::MockGraphStore;
    use chrono::NaiveDate;

    struct Harness {
        store: Arc<MockGraphStore>,
        aggregator: InsightAggregator,
        local: Arc<MockLlmBackend>,
        remote: Arc<MockLlmBackend>,
    }

    fn harness(store: MockGraphStore) -> Harness {
        let store = Arc::new(store);
        let (profiles, defaults) = default_profiles();
        let registry = Arc::new(ProviderRegistry::new(profiles, defaults).unwrap());
        let summary = r#"{"summary": "Vendor notes cluster around Acme."}"#;
        let local =
            Arc::new(MockLlmBackend::new("ollama").with_fallback(MockReply::text(summary)));
        let remote = Arc::new(
            MockLlmBackend::new("anthropic-sonnet").with_fallback(MockReply::text(summary)),
        );
        let invoker = Arc::new(
            Invoker::new(Arc::new(CostLedger::new()), BackoffPolicy::default())
                .with_backend("ollama", local.clone())
                .with_backend("anthropic-sonnet", remote.clone()),
        );
        Harness {
            aggregator: InsightAggregator::new(store.clone(), registry, invoker),
            store,
            local,
            remote,
        }
    }

    fn today_week() -> DigestPeriod {
        DigestPeriod::containing(PeriodKind::Week, Utc::now().date_naive())
    }

    async fn connected(level: PrivacyLevel) -> (MockGraphStore, Edge) {
        let a = Node::new(NodeType::Vendor, "Acme", "").with_privacy(level);
        let b = Node::new(NodeType::Document, "Contract", "");
        let pair = NodePair::new(a.id, b.id).unwrap();
        let edge = Edge::new(pair, RelationKind::References, 0.8, "r", "ollama/llama3.1:8b");
        let store = MockGraphStore::new()
            .with_node(a)
            .await
            .with_node(b)
            .await
            .with_edge(edge.clone())
            .await;
        (store, edge)
    }

    #[test]
    fn test_type_pair_key_is_order_independent() {
        assert_eq!(
            type_pair_key(NodeType::Vendor, NodeType::Document),
            type_pair_key(NodeType::Document, NodeType::Vendor)
        );
        assert_eq!(
            type_pair_key(NodeType::Vendor, NodeType::Document),
            "document-vendor"
        );
    }

    #[tokio::test]
    async fn test_empty_period_makes_no_call() {
        let h = harness(MockGraphStore::new());
        let period = DigestPeriod {
            kind: PeriodKind::Day,
            start: NaiveDate::from_ymd_opt(2020, 1, 1).unwrap(),
        };
        let digest = h.aggregator.summarize(period).await.unwrap();
        assert_eq!(digest.summary_text, EMPTY_PERIOD_SUMMARY);
        assert!(digest.referenced_edges.is_empty());
        assert_eq!(digest.discovered_by, None);
        assert_eq!(h.local.call_count() + h.remote.call_count(), 0);
        assert!(h.store.get_digest(&period).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_digest_counts_and_routes_remote_for_private() {
        let (store, edge) = connected(PrivacyLevel::Private).await;
        let h = harness(store);

        let digest = h.aggregator.summarize(today_week()).await.unwrap();
        assert_eq!(digest.referenced_edges, vec![edge.id]);
        assert_eq!(digest.relation_counts[&RelationKind::References], 1);
        assert_eq!(digest.type_pair_counts["document-vendor"], 1);
        assert_eq!(digest.summary_text, "Vendor notes cluster around Acme.");
        assert_eq!(
            digest.discovered_by.as_deref(),
            Some("anthropic-sonnet/claude-sonnet-4-5")
        );
        assert_eq!(h.remote.call_count(), 1);
        assert!(h.remote.prompts()[0].contains("Acme"));
    }

    #[tokio::test]
    async fn test_sensitive_period_is_summarized_locally() {
        let (store, _) = connected(PrivacyLevel::Sensitive).await;
        let h = harness(store);

        let digest = h.aggregator.summarize(today_week()).await.unwrap();
        assert_eq!(digest.discovered_by.as_deref(), Some("ollama/llama3.1:8b"));
        assert_eq!(h.remote.call_count(), 0);
        assert_eq!(h.local.call_count(), 1);
    }

    #[tokio::test]
    async fn test_resummarizing_replaces_digest() {
        let (store, _) = connected(PrivacyLevel::Private).await;
        let h = harness(store);
        let period = today_week();

        let first = h.aggregator.summarize(period).await.unwrap();
        h.remote.push(MockReply::text(r#"{"summary": "Second take."}"#));
        let second = h.aggregator.summarize(period).await.unwrap();
        assert_ne!(first.id, second.id);

        let stored = h.store.get_digest(&period).await.unwrap().unwrap();
        assert_eq!(stored.id, second.id);
        assert_eq!(stored.summary_text, "Second take.");
        assert_eq!(h.store.digests.read().await.len(), 1);
    }

    #[tokio::test]
    async fn test_provider_failure_keeps_previous_digest() {
        let (store, _) = connected(PrivacyLevel::Private).await;
        let h = harness(store);
        let period = today_week();
        let first = h.aggregator.summarize(period).await.unwrap();

        h.remote.push(MockReply::Fail("HTTP 500".into()));
        let err = h.aggregator.summarize(period).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ProviderError);
        let stored = h.store.get_digest(&period).await.unwrap().unwrap();
        assert_eq!(stored.id, first.id);
    }
}
