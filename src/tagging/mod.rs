//! LLM tag suggestions for stored nodes
//!
//! The suggestion request is routed at the node's current privacy level.
//! Accepted tags are merged into the node, which is then reclassified and
//! refingerprinted: a suggested sensitive tag tightens the node's level for
//! every later discovery run.

use crate::ingest::{content_fingerprint, normalize_tags};
use crate::llm::prompts::tagging_prompt;
use crate::llm::{
    ErrorKind, InvocationContext, Invoker, ProviderError, ProviderRegistry, RoutingError, TaskKind,
};
use crate::neo4j::models::Node;
use crate::neo4j::GraphStore;
use crate::privacy::PrivacyClassifier;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

/// Most tags merged from a single suggestion
pub const MAX_SUGGESTED_TAGS: usize = 10;

#[derive(Debug, Error)]
pub enum TaggingError {
    #[error("node {0} not found")]
    NodeNotFound(Uuid),

    #[error(transparent)]
    Routing(#[from] RoutingError),

    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error("storage error: {0:#}")]
    Storage(#[from] anyhow::Error),
}

impl TaggingError {
    pub fn kind(&self) -> Option<ErrorKind> {
        match self {
            Self::NodeNotFound(_) => None,
            Self::Routing(e) => Some(ErrorKind::from(e)),
            Self::Provider(e) => Some(e.kind()),
            Self::Storage(_) => Some(ErrorKind::Storage),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TagSuggestion {
    pub node_id: Uuid,
    /// Tags returned by the model, cleaned
    pub suggested: Vec<String>,
    /// Suggested tags that were not already on the node
    pub added: Vec<String>,
    pub discovered_by: String,
    pub node: Node,
}

pub struct AutoTagger {
    store: Arc<dyn GraphStore>,
    classifier: Arc<PrivacyClassifier>,
    registry: Arc<ProviderRegistry>,
    invoker: Arc<Invoker>,
}

impl AutoTagger {
    pub fn new(
        store: Arc<dyn GraphStore>,
        classifier: Arc<PrivacyClassifier>,
        registry: Arc<ProviderRegistry>,
        invoker: Arc<Invoker>,
    ) -> Self {
        Self {
            store,
            classifier,
            registry,
            invoker,
        }
    }

    pub async fn suggest_tags(&self, node_id: Uuid) -> Result<TagSuggestion, TaggingError> {
        let mut node = self
            .store
            .get_node(node_id)
            .await?
            .ok_or(TaggingError::NodeNotFound(node_id))?;

        let level = node.privacy_level;
        let profile = self.registry.select(TaskKind::Tagging, level)?;
        let ctx = InvocationContext {
            run_id: None,
            privacy_level: level,
        };
        let invocation = self
            .invoker
            .invoke(profile, &tagging_prompt(&node), TaskKind::Tagging, &ctx)
            .await?;

        let suggested: Vec<String> = invocation
            .result
            .into_tags()
            .unwrap_or_default()
            .into_iter()
            .take(MAX_SUGGESTED_TAGS)
            .collect();
        let added: Vec<String> = normalize_tags(&suggested)
            .into_iter()
            .filter(|t| !node.tags.contains(t))
            .collect();

        if !added.is_empty() {
            node.tags.extend(added.iter().cloned());
            node.content_fingerprint = content_fingerprint(&node.title, &node.content, &node.tags);
            // Added tags can only tighten the level
            node.privacy_level = node.privacy_level.max(self.classifier.classify(&node));
            node.updated_at = Utc::now();
            self.store.upsert_node(&node).await?;
        }

        tracing::info!(
            node_id = %node_id,
            suggested = suggested.len(),
            added = added.len(),
            provider = %invocation.discovered_by,
            "Suggested tags"
        );

        Ok(TagSuggestion {
            node_id,
            suggested,
            added,
            discovered_by: invocation.discovered_by,
            node,
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
    use crate::neo4j::models::{NodeType, PrivacyLevel};
    use crate::neo4j::MockGraphStore;

    struct Harness {
        store: Arc<MockGraphStore>,
        tagger: AutoTagger,
        local: Arc<MockLlmBackend>,
        remote: Arc<MockLlmBackend>,
    }

    async fn harness(node: Node, reply: &str) -> Harness {
        let store = Arc::new(MockGraphStore::new().with_node(node).await);
        let (profiles, defaults) = default_profiles();
        let registry = Arc::new(ProviderRegistry::new(profiles, defaults).unwrap());
        let local = Arc::new(MockLlmBackend::new("ollama").with_fallback(MockReply::text(reply)));
        let remote =
            Arc::new(MockLlmBackend::new("anthropic-haiku").with_fallback(MockReply::text(reply)));
        let invoker = Arc::new(
            Invoker::new(Arc::new(CostLedger::new()), BackoffPolicy::default())
                .with_backend("ollama", local.clone())
                .with_backend("anthropic-haiku", remote.clone()),
        );
        Harness {
            tagger: AutoTagger::new(
                store.clone(),
                Arc::new(PrivacyClassifier::default()),
                registry,
                invoker,
            ),
            store,
            local,
            remote,
        }
    }

    #[tokio::test]
    async fn test_suggested_tags_are_merged_and_refingerprinted() {
        let node = Node::new(NodeType::Article, "Async Rust", "tokio runtimes").with_tags(["rust"]);
        let id = node.id;
        let before = node.updated_at;
        let h = harness(node, "Rust, Async Programming, tokio").await;

        let suggestion = h.tagger.suggest_tags(id).await.unwrap();
        assert_eq!(suggestion.suggested, vec!["rust", "async-programming", "tokio"]);
        assert_eq!(suggestion.added, vec!["async-programming", "tokio"]);
        assert_eq!(suggestion.discovered_by, "anthropic-haiku/claude-3-5-haiku-latest");
        assert_eq!(h.remote.call_count(), 1);

        let stored = h.store.get_node(id).await.unwrap().unwrap();
        assert!(stored.tags.contains("tokio"));
        assert!(stored.updated_at >= before);
        assert_eq!(
            stored.content_fingerprint,
            content_fingerprint(&stored.title, &stored.content, &stored.tags)
        );
    }

    #[tokio::test]
    async fn test_sensitive_node_is_tagged_locally() {
        let node =
            Node::new(NodeType::Note, "Session notes", "").with_privacy(PrivacyLevel::Sensitive);
        let id = node.id;
        let h = harness(node, "sleep, anxiety").await;

        let suggestion = h.tagger.suggest_tags(id).await.unwrap();
        assert_eq!(suggestion.discovered_by, "ollama/llama3.1:8b");
        assert_eq!(h.remote.call_count(), 0);
        assert_eq!(h.local.call_count(), 1);
    }

    #[tokio::test]
    async fn test_sensitive_suggestion_reclassifies_node() {
        let node = Node::new(NodeType::Note, "Weekly check-in", "");
        let id = node.id;
        let h = harness(node, "therapy, routines").await;

        let suggestion = h.tagger.suggest_tags(id).await.unwrap();
        assert_eq!(suggestion.node.privacy_level, PrivacyLevel::Sensitive);
        let stored = h.store.get_node(id).await.unwrap().unwrap();
        assert_eq!(stored.privacy_level, PrivacyLevel::Sensitive);
    }

    #[tokio::test]
    async fn test_nothing_new_leaves_node_untouched() {
        let node = Node::new(NodeType::Note, "n", "").with_tags(["rust"]);
        let id = node.id;
        let original = node.clone();
        let h = harness(node, "rust").await;

        let suggestion = h.tagger.suggest_tags(id).await.unwrap();
        assert!(suggestion.added.is_empty());
        assert_eq!(h.store.get_node(id).await.unwrap().unwrap(), original);
    }

    #[tokio::test]
    async fn test_unknown_node() {
        let h = harness(Node::new(NodeType::Note, "n", ""), "x").await;
        let err = h.tagger.suggest_tags(Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(err, TaggingError::NodeNotFound(_)));
        assert_eq!(err.kind(), None);
    }
}
