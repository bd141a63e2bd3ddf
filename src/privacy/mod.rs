//! Privacy classification
//!
//! Assigns a [`PrivacyLevel`] to a node from its explicit user setting, its
//! tags and its shareable flag. Classification is pure: callers persist the
//! result on the node.

use crate::neo4j::models::{Node, PrivacyLevel};
use std::collections::{BTreeSet, HashSet};

/// Tags treated as sensitive when no list is configured
pub const DEFAULT_SENSITIVE_TAGS: &[&str] = &[
    "personal",
    "anxiety",
    "therapy",
    "procurement-contract",
    "confidential",
    "private",
];

/// Classifies nodes against a configured sensitive-tag set.
///
/// Tags are compared case-insensitively after trimming whitespace.
///
/// ```rust
/// use graph_discovery::neo4j::{Node, NodeType, PrivacyLevel};
/// use graph_discovery::privacy::PrivacyClassifier;
///
/// let classifier = PrivacyClassifier::new(["therapy"]);
/// let node = Node::new(NodeType::Note, "Session notes", "").with_tags([" Therapy "]);
/// assert_eq!(classifier.classify(&node), PrivacyLevel::Sensitive);
/// ```
#[derive(Debug, Clone)]
pub struct PrivacyClassifier {
    sensitive_tags: HashSet<String>,
}

impl Default for PrivacyClassifier {
    fn default() -> Self {
        Self::new(DEFAULT_SENSITIVE_TAGS.iter().copied())
    }
}

impl PrivacyClassifier {
    pub fn new<I, S>(sensitive_tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            sensitive_tags: sensitive_tags
                .into_iter()
                .map(|t| normalize_tag(t.as_ref()))
                .filter(|t| !t.is_empty())
                .collect(),
        }
    }

    /// Classify a node.
    ///
    /// An explicit level always wins. Otherwise any sensitive tag makes the
    /// node `Sensitive`, a shareable node is `Public`, and everything else is
    /// `Private`.
    pub fn classify(&self, node: &Node) -> PrivacyLevel {
        if let Some(explicit) = node.explicit_privacy {
            return explicit;
        }
        if self.has_sensitive_tag(&node.tags) {
            return PrivacyLevel::Sensitive;
        }
        if node.shareable {
            PrivacyLevel::Public
        } else {
            PrivacyLevel::Private
        }
    }

    /// Whether any of the tags is in the sensitive set
    pub fn has_sensitive_tag(&self, tags: &BTreeSet<String>) -> bool {
        tags.iter()
            .any(|t| self.sensitive_tags.contains(&normalize_tag(t)))
    }

    /// The configured sensitive tags, sorted
    pub fn sensitive_tags(&self) -> Vec<String> {
        let mut tags: Vec<String> = self.sensitive_tags.iter().cloned().collect();
        tags.sort();
        tags
    }
}

/// The most restrictive of the given levels (`Public` for an empty input)
pub fn effective_level<I>(levels: I) -> PrivacyLevel
where
    I: IntoIterator<Item = PrivacyLevel>,
{
    levels.into_iter().max().unwrap_or(PrivacyLevel::Public)
}

/// Whether content at `level` may only be processed by a local provider
pub fn requires_local(level: PrivacyLevel) -> bool {
    level.requires_local()
}

/// Lowercase and trim a tag
pub fn normalize_tag(tag: &str) -> String {
    tag.trim().to_lowercase()
}
