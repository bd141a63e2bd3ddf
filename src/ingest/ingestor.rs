//! Node ingestion write path
//!
//! Used by ingestion adapters: normalizes tags, computes the content
//! fingerprint, classifies privacy and upserts the node. `updated_at` only
//! advances when the fingerprint changes, which is what the candidate
//! generator keys on.

use crate::neo4j::models::{Node, NodeType, PrivacyLevel};
use crate::neo4j::GraphStore;
use crate::privacy::{normalize_tag, PrivacyClassifier};
use anyhow::Result;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;
use uuid::Uuid;

use super::hashing::content_fingerprint;

/// Node payload supplied by an ingestion adapter
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NodeInput {
    /// Existing node id to update; a new id is generated when absent
    #[serde(default)]
    pub id: Option<Uuid>,
    #[serde(rename = "type")]
    pub node_type: NodeType,
    pub title: String,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub tags: BTreeSet<String>,
    /// Explicit user-set privacy level
    #[serde(default)]
    pub privacy_level: Option<PrivacyLevel>,
    #[serde(default)]
    pub shareable: bool,
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub metadata: serde_json::Value,
}

/// What an ingest did to the store
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum IngestStatus {
    Created,
    Updated,
    Unchanged,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IngestOutcome {
    pub status: IngestStatus,
    /// The content changed, so discovery should revisit this node
    pub content_changed: bool,
    pub node: Node,
}

pub struct NodeIngestor {
    store: Arc<dyn GraphStore>,
    classifier: Arc<PrivacyClassifier>,
}

/// Lowercase, trim and drop empty tags
pub fn normalize_tags<I, S>(tags: I) -> BTreeSet<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    tags.into_iter()
        .map(|t| normalize_tag(t.as_ref()))
        .filter(|t| !t.is_empty())
        .collect()
}

impl NodeIngestor {
    pub fn new(store: Arc<dyn GraphStore>, classifier: Arc<PrivacyClassifier>) -> Self {
        Self { store, classifier }
    }

    pub async fn ingest(&self, input: NodeInput) -> Result<IngestOutcome> {
        let id = input.id.unwrap_or_else(Uuid::new_v4);
        let existing = self.store.get_node(id).await?;
        let tags = normalize_tags(&input.tags);
        let fingerprint = content_fingerprint(&input.title, &input.content, &tags);
        let now = Utc::now();

        let content_changed = existing
            .as_ref()
            .map_or(true, |e| e.content_fingerprint != fingerprint);

        let mut node = Node {
            id,
            node_type: input.node_type,
            title: input.title,
            content: input.content,
            tags,
            privacy_level: PrivacyLevel::default(),
            explicit_privacy: input.privacy_level,
            shareable: input.shareable,
            source: input.source,
            content_fingerprint: fingerprint,
            metadata: input.metadata,
            created_at: existing.as_ref().map_or(now, |e| e.created_at),
            updated_at: match &existing {
                Some(e) if !content_changed => e.updated_at,
                _ => now,
            },
        };
        node.privacy_level = self.classifier.classify(&node);

        let status = match &existing {
            None => IngestStatus::Created,
            Some(e) if *e == node => IngestStatus::Unchanged,
            Some(_) => IngestStatus::Updated,
        };

        if status != IngestStatus::Unchanged {
            self.store.upsert_node(&node).await?;
        }

        tracing::debug!(
            node_id = %node.id,
            status = ?status,
            privacy = %node.privacy_level,
            "Ingested node"
        );

        Ok(IngestOutcome {
            status,
            content_changed,
            node,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::neo4j::MockGraphStore;

    fn input(title: &str, tags: &[&str]) -> NodeInput {
        NodeInput {
            id: None,
            node_type: NodeType::Note,
            title: title.to_string(),
            content: "body".to_string(),
            tags: tags.iter().map(|s| s.to_string()).collect(),
            privacy_level: None,
            shareable: false,
            source: Some("standard_notes".to_string()),
            metadata: serde_json::Value::Null,
        }
    }

    fn ingestor() -> (Arc<MockGraphStore>, NodeIngestor) {
        let store = Arc::new(MockGraphStore::new());
        let ingestor = NodeIngestor::new(store.clone(), Arc::new(PrivacyClassifier::default()));
        (store, ingestor)
    }

    #[tokio::test]
    async fn test_ingest_classifies_and_fingerprints() {
        let (store, ingestor) = ingestor();
        let outcome = ingestor
            .ingest(input("Session", &[" Therapy ", "health"]))
            .await
            .unwrap();

        assert_eq!(outcome.status, IngestStatus::Created);
        assert!(outcome.content_changed);
        assert_eq!(outcome.node.privacy_level, PrivacyLevel::Sensitive);
        assert!(outcome.node.tags.contains("therapy"));
        assert_eq!(outcome.node.content_fingerprint.len(), 64);

        let stored = store.get_node(outcome.node.id).await.unwrap().unwrap();
        assert_eq!(stored, outcome.node);
    }

    #[tokio::test]
    async fn test_reingest_unchanged_keeps_updated_at() {
        let (_store, ingestor) = ingestor();
        let first = ingestor.ingest(input("Note", &["rust"])).await.unwrap();

        let mut again = input("Note", &["rust"]);
        again.id = Some(first.node.id);
        let second = ingestor.ingest(again).await.unwrap();
        assert_eq!(second.status, IngestStatus::Unchanged);
        assert!(!second.content_changed);
        assert_eq!(second.node.updated_at, first.node.updated_at);

        let mut shared = input("Note", &["rust"]);
        shared.id = Some(first.node.id);
        shared.shareable = true;
        let third = ingestor.ingest(shared).await.unwrap();
        assert_eq!(third.status, IngestStatus::Updated);
        assert!(!third.content_changed);
        assert_eq!(third.node.privacy_level, PrivacyLevel::Public);
        assert_eq!(third.node.updated_at, first.node.updated_at);
    }

    #[tokio::test]
    async fn test_content_change_bumps_updated_at() {
        let (_store, ingestor) = ingestor();
        let first = ingestor.ingest(input("Note", &["rust"])).await.unwrap();

        let mut changed = input("Note", &["rust", "tokio"]);
        changed.id = Some(first.node.id);
        let second = ingestor.ingest(changed).await.unwrap();
        assert_eq!(second.status, IngestStatus::Updated);
        assert!(second.content_changed);
        assert!(second.node.updated_at >= first.node.updated_at);
        assert_eq!(second.node.created_at, first.node.created_at);
        assert_ne!(
            second.node.content_fingerprint,
            first.node.content_fingerprint
        );
    }
}
