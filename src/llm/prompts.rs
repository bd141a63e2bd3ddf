//! Prompt templates for each task kind

use crate::neo4j::models::{Edge, Node, RelationKind};
use std::collections::{BTreeMap, HashMap};
use uuid::Uuid;

/// Content is truncated to this many characters before being sent
const CONTENT_EXCERPT_CHARS: usize = 1000;

/// A rendered prompt plus sampling settings
#[derive(Debug, Clone, PartialEq)]
pub struct Prompt {
    pub system: String,
    pub user: String,
    pub temperature: f32,
    pub max_tokens: u32,
}

impl Prompt {
    /// Characters sent to the model, used to estimate input tokens
    pub fn char_len(&self) -> usize {
        self.system.chars().count() + self.user.chars().count()
    }
}

fn excerpt(content: &str) -> String {
    let mut out: String = content.chars().take(CONTENT_EXCERPT_CHARS).collect();
    if content.chars().count() > CONTENT_EXCERPT_CHARS {
        out.push_str("...");
    }
    out
}

fn describe(node: &Node) -> String {
    let tags = node.tags.iter().cloned().collect::<Vec<_>>().join(", ");
    format!(
        "Type: {}\nTitle: {}\nTags: {}\nContent:\n{}",
        node.node_type,
        node.title,
        if tags.is_empty() { "None" } else { tags.as_str() },
        excerpt(&node.content)
    )
}

/// Ask whether two nodes are related and how
pub fn connection_prompt(left: &Node, right: &Node) -> Prompt {
    let kinds = RelationKind::ALL
        .iter()
        .map(|k| k.to_string())
        .collect::<Vec<_>>()
        .join(", ");
    let system = format!(
        "You find non-obvious relationships in a personal knowledge graph.\n\
         Answer with a single JSON object and nothing else:\n\
         {{\"relation_kind\": one of [{}] or \"none\", \"confidence\": number between 0 and 1, \"rationale\": one short sentence}}",
        kinds
    );
    let user = format!(
        "Item A\n{}\n\nItem B\n{}\n\nHow are these two items related?",
        describe(left),
        describe(right)
    );
    Prompt {
        system,
        user,
        temperature: 0.2,
        max_tokens: 300,
    }
}

/// Ask for a summary of the edges discovered in a period
pub fn insight_prompt(
    period_label: &str,
    edges: &[Edge],
    nodes: &HashMap<Uuid, Node>,
    relation_counts: &BTreeMap<RelationKind, usize>,
    type_pair_counts: &BTreeMap<String, usize>,
) -> Prompt {
    let system = "You write short digests of newly discovered connections in a personal knowledge graph.\n\
                  Answer with a JSON object {\"summary\": \"...\"} of at most five sentences, \
                  highlighting patterns rather than listing every connection."
        .to_string();

    let title = |id: &Uuid| {
        nodes
            .get(id)
            .map(|n| n.title.clone())
            .unwrap_or_else(|| id.to_string())
    };

    let mut user = format!("Period: {}\n\nCounts by relation kind:\n", period_label);
    for (kind, count) in relation_counts {
        user.push_str(&format!("- {}: {}\n", kind, count));
    }
    user.push_str("\nCounts by node type pair:\n");
    for (pair, count) in type_pair_counts {
        user.push_str(&format!("- {}: {}\n", pair, count));
    }
    user.push_str("\nConnections:\n");
    for edge in edges {
        user.push_str(&format!(
            "- \"{}\" {} \"{}\" ({:.2}): {}\n",
            title(&edge.source_id),
            edge.relation_kind,
            title(&edge.target_id),
            edge.confidence,
            edge.rationale
        ));
    }

    Prompt {
        system,
        user,
        temperature: 0.4,
        max_tokens: 600,
    }
}

/// Ask for 5-10 tags for a node
pub fn tagging_prompt(node: &Node) -> Prompt {
    let system = "You are a helpful assistant that generates relevant tags for knowledge management.\n\
                  Generate 5-10 specific, relevant tags for the given content.\n\
                  Return ONLY a comma-separated list of tags, nothing else.\n\
                  Tags should be concise (1-3 words) and relevant to the content."
        .to_string();
    let existing = node.tags.iter().cloned().collect::<Vec<_>>().join(", ");
    let user = format!(
        "Title: {}\n\nContent:\n{}\n\nExisting tags: {}\n\nGenerate relevant tags:",
        node.title,
        excerpt(&node.content),
        if existing.is_empty() { "None" } else { existing.as_str() }
    );
    Prompt {
        system,
        user,
        temperature: 0.3,
        max_tokens: 100,
    }
}

/// Tiny request used to check that a provider answers at all.
/// Carries no user content, so any provider may receive it.
pub fn provider_check_prompt() -> Prompt {
    Prompt {
        system: "You are a connectivity check.".to_string(),
        user: "Reply with the single word OK.".to_string(),
        temperature: 0.0,
        max_tokens: 10,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::neo4j::models::NodeType;

    #[test]
    fn test_connection_prompt_mentions_both_items_and_kinds() {
        let a = Node::new(NodeType::Vendor, "Acme", "supplies widgets").with_tags(["vendor-x"]);
        let b = Node::new(NodeType::Document, "Contract", "signed with Acme");
        let prompt = connection_prompt(&a, &b);
        assert!(prompt.user.contains("Acme"));
        assert!(prompt.user.contains("Contract"));
        assert!(prompt.user.contains("Tags: None"));
        assert!(prompt.system.contains("contradicts"));
    }

    #[test]
    fn test_excerpt_truncates_long_content() {
        let long = "x".repeat(CONTENT_EXCERPT_CHARS + 50);
        let node = Node::new(NodeType::Note, "long", long);
        let prompt = tagging_prompt(&node);
        assert!(prompt.user.contains("..."));
        assert!(prompt.user.len() < CONTENT_EXCERPT_CHARS + 200);
    }
}
