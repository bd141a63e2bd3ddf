//! Data models for the knowledge graph
//!
//! Nodes are typed content units written by ingestion adapters. Edges are
//! undirected, confidence-scored relationships stored canonically
//! (`source_id < target_id`) so that one unordered pair maps to exactly one
//! edge per relation kind. Digests are the periodic summaries produced by the
//! insight aggregator.

use chrono::{DateTime, Datelike, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Namespace for deterministic edge ids (UUIDv5 over pair + relation kind)
const EDGE_NAMESPACE: Uuid = Uuid::from_u128(0x6b1f_3c2e_9a4d_4f7a_8e21_5d0c_7b93_a4e6);

// ============================================================================
// Node
// ============================================================================

/// Type of a knowledge graph node
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum NodeType {
    Note,
    Document,
    Person,
    Concept,
    Project,
    Company,
    Vendor,
    Technology,
    Location,
    Event,
    Task,
    Topic,
    Book,
    Article,
    Bookmark,
    Email,
    RssItem,
}

impl fmt::Display for NodeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Note => "note",
            Self::Document => "document",
            Self::Person => "person",
            Self::Concept => "concept",
            Self::Project => "project",
            Self::Company => "company",
            Self::Vendor => "vendor",
            Self::Technology => "technology",
            Self::Location => "location",
            Self::Event => "event",
            Self::Task => "task",
            Self::Topic => "topic",
            Self::Book => "book",
            Self::Article => "article",
            Self::Bookmark => "bookmark",
            Self::Email => "email",
            Self::RssItem => "rss_item",
        };
        write!(f, "{}", s)
    }
}

impl FromStr for NodeType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "note" => Ok(Self::Note),
            "document" => Ok(Self::Document),
            "person" => Ok(Self::Person),
            "concept" => Ok(Self::Concept),
            "project" => Ok(Self::Project),
            "company" => Ok(Self::Company),
            "vendor" => Ok(Self::Vendor),
            "technology" => Ok(Self::Technology),
            "location" => Ok(Self::Location),
            "event" => Ok(Self::Event),
            "task" => Ok(Self::Task),
            "topic" => Ok(Self::Topic),
            "book" => Ok(Self::Book),
            "article" => Ok(Self::Article),
            "bookmark" => Ok(Self::Bookmark),
            "email" => Ok(Self::Email),
            "rss_item" => Ok(Self::RssItem),
            _ => Err(format!("Unknown node type: {}", s)),
        }
    }
}

/// Privacy classification of a node.
///
/// Variants are ordered from least to most restrictive, so `max()` over a set
/// of levels yields the effective level for content that mixes them.
#[derive(
    Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord,
)]
#[serde(rename_all = "snake_case")]
pub enum PrivacyLevel {
    Public,
    #[default]
    Private,
    /// May only be processed by local providers
    Sensitive,
    /// Encrypted at rest; local providers only
    Encrypted,
}

impl PrivacyLevel {
    /// Whether content at this level may only be sent to a local provider
    pub fn requires_local(&self) -> bool {
        matches!(self, Self::Sensitive | Self::Encrypted)
    }
}

impl fmt::Display for PrivacyLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Public => write!(f, "public"),
            Self::Private => write!(f, "private"),
            Self::Sensitive => write!(f, "sensitive"),
            Self::Encrypted => write!(f, "encrypted"),
        }
    }
}

impl FromStr for PrivacyLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "public" => Ok(Self::Public),
            "private" => Ok(Self::Private),
            "sensitive" => Ok(Self::Sensitive),
            "encrypted" => Ok(Self::Encrypted),
            _ => Err(format!("Unknown privacy level: {}", s)),
        }
    }
}

/// A typed entity in the knowledge graph
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Node {
    pub id: Uuid,
    #[serde(rename = "type")]
    pub node_type: NodeType,
    pub title: String,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub tags: BTreeSet<String>,
    /// Level computed by the privacy classifier
    #[serde(default)]
    pub privacy_level: PrivacyLevel,
    /// Level set explicitly by the user; overrides classification
    #[serde(default)]
    pub explicit_privacy: Option<PrivacyLevel>,
    /// Marked shareable by the user (eligible for `public`)
    #[serde(default)]
    pub shareable: bool,
    /// Originating adapter (e.g. "standard_notes", "bookmarks")
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub content_fingerprint: String,
    #[serde(default)]
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Node {
    /// Create a new node with a fresh id and no tags
    pub fn new(node_type: NodeType, title: impl Into<String>, content: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            node_type,
            title: title.into(),
            content: content.into(),
            tags: BTreeSet::new(),
            privacy_level: PrivacyLevel::default(),
            explicit_privacy: None,
            shareable: false,
            source: None,
            content_fingerprint: String::new(),
            metadata: serde_json::Value::Null,
            created_at: now,
            updated_at: now,
        }
    }

    /// Builder: replace the tag set
    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    /// Builder: set the stored privacy level
    pub fn with_privacy(mut self, level: PrivacyLevel) -> Self {
        self.privacy_level = level;
        self
    }

    /// Jaccard similarity between this node's tag set and another's
    pub fn tag_similarity(&self, other: &Node) -> f64 {
        tag_jaccard(&self.tags, &other.tags)
    }
}

/// Jaccard similarity of two tag sets (0.0 when both are empty)
pub fn tag_jaccard(a: &BTreeSet<String>, b: &BTreeSet<String>) -> f64 {
    let shared = a.intersection(b).count();
    let union = a.len() + b.len() - shared;
    if union == 0 {
        0.0
    } else {
        shared as f64 / union as f64
    }
}

// ============================================================================
// Edge
// ============================================================================

/// Kind of relationship between two nodes
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum RelationKind {
    Related,
    Causal,
    Temporal,
    Contradicts,
    Supports,
    References,
}

impl RelationKind {
    /// Every relation kind, in declaration order
    pub const ALL: [RelationKind; 6] = [
        Self::Related,
        Self::Causal,
        Self::Temporal,
        Self::Contradicts,
        Self::Supports,
        Self::References,
    ];
}

impl fmt::Display for RelationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Related => write!(f, "related"),
            Self::Causal => write!(f, "causal"),
            Self::Temporal => write!(f, "temporal"),
            Self::Contradicts => write!(f, "contradicts"),
            Self::Supports => write!(f, "supports"),
            Self::References => write!(f, "references"),
        }
    }
}

impl FromStr for RelationKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "related" | "related_to" => Ok(Self::Related),
            "causal" | "causes" | "caused_by" => Ok(Self::Causal),
            "temporal" => Ok(Self::Temporal),
            "contradicts" => Ok(Self::Contradicts),
            "supports" => Ok(Self::Supports),
            "references" => Ok(Self::References),
            _ => Err(format!("Unknown relation kind: {}", s)),
        }
    }
}

/// An unordered node pair in canonical form (`a < b`)
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodePair {
    pub a: Uuid,
    pub b: Uuid,
}

impl NodePair {
    /// Canonicalize two ids into a pair. Returns `None` for a self-pair.
    pub fn new(x: Uuid, y: Uuid) -> Option<Self> {
        match x.cmp(&y) {
            std::cmp::Ordering::Less => Some(Self { a: x, b: y }),
            std::cmp::Ordering::Greater => Some(Self { a: y, b: x }),
            std::cmp::Ordering::Equal => None,
        }
    }

    pub fn contains(&self, id: Uuid) -> bool {
        self.a == id || self.b == id
    }
}

impl fmt::Display for NodePair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}~{}", self.a, self.b)
    }
}

/// A confidence-scored relationship between two nodes
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Edge {
    pub id: Uuid,
    pub source_id: Uuid,
    pub target_id: Uuid,
    pub relation_kind: RelationKind,
    pub confidence: f64,
    pub rationale: String,
    /// `<provider>/<model>` that produced the current confidence
    pub discovered_by: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Edge {
    /// Create a new edge for a canonical pair. Confidence is clamped to 0.0..=1.0.
    pub fn new(
        pair: NodePair,
        relation_kind: RelationKind,
        confidence: f64,
        rationale: impl Into<String>,
        discovered_by: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Self::id_for(pair, relation_kind),
            source_id: pair.a,
            target_id: pair.b,
            relation_kind,
            confidence: confidence.clamp(0.0, 1.0),
            rationale: rationale.into(),
            discovered_by: discovered_by.into(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Deterministic id of the edge for (pair, relation kind)
    pub fn id_for(pair: NodePair, relation_kind: RelationKind) -> Uuid {
        let key = format!("{}:{}:{}", pair.a, pair.b, relation_kind);
        Uuid::new_v5(&EDGE_NAMESPACE, key.as_bytes())
    }

    /// The canonical pair this edge connects
    pub fn pair(&self) -> NodePair {
        NodePair {
            a: self.source_id.min(self.target_id),
            b: self.source_id.max(self.target_id),
        }
    }

    /// Provider name part of `discovered_by`
    pub fn provider_name(&self) -> &str {
        self.discovered_by
            .split_once('/')
            .map(|(provider, _)| provider)
            .unwrap_or(&self.discovered_by)
    }
}

// ============================================================================
// Insight digests
// ============================================================================

/// Granularity of a digest period
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum PeriodKind {
    Day,
    Week,
}

impl fmt::Display for PeriodKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Day => write!(f, "day"),
            Self::Week => write!(f, "week"),
        }
    }
}

impl FromStr for PeriodKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "day" | "daily" => Ok(Self::Day),
            "week" | "weekly" => Ok(Self::Week),
            _ => Err(format!("Unknown period: {}", s)),
        }
    }
}

/// A digest period: a UTC day, or an ISO week starting on Monday
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct DigestPeriod {
    pub kind: PeriodKind,
    pub start: NaiveDate,
}

impl DigestPeriod {
    /// The period of the given kind that contains `date`
    pub fn containing(kind: PeriodKind, date: NaiveDate) -> Self {
        let start = match kind {
            PeriodKind::Day => date,
            PeriodKind::Week => {
                date - Duration::days(date.weekday().num_days_from_monday() as i64)
            }
        };
        Self { kind, start }
    }

    /// The period immediately before this one
    pub fn previous(&self) -> Self {
        Self {
            kind: self.kind,
            start: self.start - self.length(),
        }
    }

    pub fn length(&self) -> Duration {
        match self.kind {
            PeriodKind::Day => Duration::days(1),
            PeriodKind::Week => Duration::days(7),
        }
    }

    /// Inclusive start instant (00:00 UTC)
    pub fn start_at(&self) -> DateTime<Utc> {
        self.start.and_time(chrono::NaiveTime::MIN).and_utc()
    }

    /// Exclusive end instant
    pub fn end_at(&self) -> DateTime<Utc> {
        self.start_at() + self.length()
    }
}

impl fmt::Display for DigestPeriod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind, self.start)
    }
}

/// Periodic natural-language summary of newly discovered edges
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InsightDigest {
    pub id: Uuid,
    pub period: DigestPeriod,
    pub summary_text: String,
    /// Edge ids in creation order (oldest first)
    pub referenced_edges: Vec<Uuid>,
    pub relation_counts: BTreeMap<RelationKind, usize>,
    /// Keyed by `"<type>-<type>"` with the two types sorted
    pub type_pair_counts: BTreeMap<String, usize>,
    /// Absent when the period had no edges and no model was called
    pub discovered_by: Option<String>,
    pub generated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_pair_is_canonical() {
        let x = Uuid::new_v4();
        let y = Uuid::new_v4();
        assert_eq!(NodePair::new(x, y), NodePair::new(y, x));
        let pair = NodePair::new(x, y).unwrap();
        assert!(pair.a < pair.b);
        assert!(NodePair::new(x, x).is_none());
    }

    #[test]
    fn test_edge_id_is_deterministic_per_kind() {
        let pair = NodePair::new(Uuid::new_v4(), Uuid::new_v4()).unwrap();
        let related = Edge::id_for(pair, RelationKind::Related);
        assert_eq!(related, Edge::id_for(pair, RelationKind::Related));
        assert_ne!(related, Edge::id_for(pair, RelationKind::Supports));
    }

    #[test]
    fn test_edge_clamps_confidence() {
        let pair = NodePair::new(Uuid::new_v4(), Uuid::new_v4()).unwrap();
        let edge = Edge::new(pair, RelationKind::Causal, 1.7, "x", "ollama/llama3");
        assert_eq!(edge.confidence, 1.0);
        assert_eq!(edge.provider_name(), "ollama");
        assert_eq!(edge.pair(), pair);
    }

    #[test]
    fn test_privacy_level_ordering() {
        assert!(PrivacyLevel::Public < PrivacyLevel::Private);
        assert!(PrivacyLevel::Private < PrivacyLevel::Sensitive);
        assert!(PrivacyLevel::Sensitive < PrivacyLevel::Encrypted);
        assert!(!PrivacyLevel::Private.requires_local());
        assert!(PrivacyLevel::Sensitive.requires_local());
        assert!(PrivacyLevel::Encrypted.requires_local());
    }

    #[test]
    fn test_enum_round_trips_through_strings() {
        assert_eq!("rss_item".parse::<NodeType>().unwrap(), NodeType::RssItem);
        assert_eq!(NodeType::RssItem.to_string(), "rss_item");
        assert_eq!(
            "Contradicts".parse::<RelationKind>().unwrap(),
            RelationKind::Contradicts
        );
        assert!("friendship".parse::<RelationKind>().is_err());
    }

    #[test]
    fn test_tag_jaccard() {
        let a: BTreeSet<String> = ["x", "y"].iter().map(|s| s.to_string()).collect();
        let b: BTreeSet<String> = ["y", "z"].iter().map(|s| s.to_string()).collect();
        assert!((tag_jaccard(&a, &b) - 1.0 / 3.0).abs() < 1e-9);
        assert_eq!(tag_jaccard(&BTreeSet::new(), &BTreeSet::new()), 0.0);
    }

    #[test]
    fn test_week_period_starts_on_monday() {
        // 2026-10-22 is a Thursday
        let date = NaiveDate::from_ymd_opt(2026, 10, 22).unwrap();
        let week = DigestPeriod::containing(PeriodKind::Week, date);
        assert_eq!(week.start, NaiveDate::from_ymd_opt(2026, 10, 19).unwrap());
        assert_eq!(week.end_at() - week.start_at(), Duration::days(7));
        assert_eq!(
            week.previous().start,
            NaiveDate::from_ymd_opt(2026, 10, 12).unwrap()
        );
        assert_eq!(week.to_string(), "week:2026-10-19");
    }
}
