//! Candidate pair generation
//!
//! Bounds the pairwise search space with a cheap lexical signal: for each
//! changed node, the top-K other nodes by tag Jaccard similarity. Pairs that
//! already carry every relation kind, or that were evaluated recently with
//! unchanged content, are skipped.

use crate::neo4j::models::{tag_jaccard, Node, NodePair, RelationKind};
use crate::neo4j::GraphStore;
use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use dashmap::{DashMap, DashSet};
use futures::future::try_join_all;
use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use uuid::Uuid;

/// Neighbours fetched per node before filtering, as a multiple of `top_k`
const OVERFETCH_FACTOR: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CandidateConfig {
    /// Neighbours kept per changed node
    pub top_k: usize,
    /// How long an evaluated pair with unchanged content is skipped
    pub cooldown: Duration,
}

impl Default for CandidateConfig {
    fn default() -> Self {
        Self {
            top_k: 10,
            cooldown: Duration::hours(24),
        }
    }
}

// ============================================================================
// Evaluation log (cool-down memory)
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
struct Evaluation {
    at: DateTime<Utc>,
    /// Fingerprints of `pair.a` and `pair.b` at evaluation time
    fingerprints: (String, String),
}

/// Pairs evaluated by past runs of this process, plus pairs whose evaluation
/// failed transiently and must be offered again
#[derive(Debug, Default)]
pub struct EvaluationLog {
    entries: DashMap<NodePair, Evaluation>,
    deferred: DashSet<NodePair>,
}

impl EvaluationLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Remember that `candidate` was evaluated now
    pub fn mark(&self, candidate: &Candidate) {
        self.mark_at(candidate, Utc::now());
    }

    pub fn mark_at(&self, candidate: &Candidate, at: DateTime<Utc>) {
        self.deferred.remove(&candidate.pair);
        self.entries.insert(
            candidate.pair,
            Evaluation {
                at,
                fingerprints: (
                    candidate.left.content_fingerprint.clone(),
                    candidate.right.content_fingerprint.clone(),
                ),
            },
        );
    }

    /// Queue `candidate` for the next generation even if neither node changes
    pub fn defer(&self, candidate: &Candidate) {
        self.deferred.insert(candidate.pair);
    }

    pub fn is_deferred(&self, pair: &NodePair) -> bool {
        self.deferred.contains(pair)
    }

    pub fn deferred_pairs(&self) -> Vec<NodePair> {
        let mut pairs: Vec<NodePair> = self.deferred.iter().map(|p| *p).collect();
        pairs.sort();
        pairs
    }

    fn forget_deferred(&self, pair: &NodePair) {
        self.deferred.remove(pair);
    }

    /// Whether the pair was evaluated within `cooldown` of `now` and neither
    /// node's fingerprint has changed since
    pub fn is_cooling_down(
        &self,
        pair: &NodePair,
        left: &Node,
        right: &Node,
        cooldown: Duration,
        now: DateTime<Utc>,
    ) -> bool {
        self.entries.get(pair).is_some_and(|e| {
            now - e.at < cooldown
                && e.fingerprints.0 == left.content_fingerprint
                && e.fingerprints.1 == right.content_fingerprint
        })
    }

    /// Drop evaluations whose cool-down has passed; returns how many
    pub fn prune(&self, cooldown: Duration, now: DateTime<Utc>) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, e| now - e.at < cooldown);
        before - self.entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

// ============================================================================
// Candidates
// ============================================================================

/// A pair worth evaluating. `left` is the node with id `pair.a`.
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub pair: NodePair,
    pub left: Node,
    pub right: Node,
    pub similarity: f64,
}

impl Candidate {
    fn new(x: &Node, y: &Node) -> Option<Self> {
        let pair = NodePair::new(x.id, y.id)?;
        let (left, right) = if pair.a == x.id { (x, y) } else { (y, x) };
        Some(Self {
            pair,
            left: left.clone(),
            right: right.clone(),
            similarity: tag_jaccard(&x.tags, &y.tags),
        })
    }

    /// Most recent `updated_at` of the two nodes
    pub fn recency(&self) -> DateTime<Utc> {
        self.left.updated_at.max(self.right.updated_at)
    }

    /// Similarity desc, then recency desc, then pair order
    fn rank_cmp(&self, other: &Self) -> Ordering {
        other
            .similarity
            .total_cmp(&self.similarity)
            .then_with(|| other.recency().cmp(&self.recency()))
            .then_with(|| self.pair.cmp(&other.pair))
    }
}

/// Finite, restartable cursor over ranked candidates
#[derive(Debug, Clone, Default)]
pub struct CandidateSequence {
    items: Vec<Candidate>,
    cursor: usize,
}

impl CandidateSequence {
    pub fn new(items: Vec<Candidate>) -> Self {
        Self { items, cursor: 0 }
    }

    pub fn peek(&self) -> Option<&Candidate> {
        self.items.get(self.cursor)
    }

    /// Rewind to the first candidate
    pub fn restart(&mut self) {
        self.cursor = 0;
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn remaining(&self) -> usize {
        self.items.len() - self.cursor
    }

    pub fn pairs(&self) -> Vec<NodePair> {
        self.items.iter().map(|c| c.pair).collect()
    }
}

impl Iterator for CandidateSequence {
    type Item = Candidate;

    fn next(&mut self) -> Option<Candidate> {
        let item = self.items.get(self.cursor).cloned();
        if item.is_some() {
            self.cursor += 1;
        }
        item
    }
}

pub struct CandidateGenerator {
    store: Arc<dyn GraphStore>,
    log: Arc<EvaluationLog>,
    config: CandidateConfig,
}

impl CandidateGenerator {
    pub fn new(
        store: Arc<dyn GraphStore>,
        log: Arc<EvaluationLog>,
        config: CandidateConfig,
    ) -> Self {
        Self { store, log, config }
    }

    /// Rank candidate pairs around `changed` nodes, at most `max_candidates`
    pub async fn generate_candidates(
        &self,
        changed: &[Node],
        max_candidates: usize,
    ) -> Result<CandidateSequence> {
        if max_candidates == 0 || self.config.top_k == 0 {
            return Ok(CandidateSequence::default());
        }

        let now = Utc::now();
        let pruned = self.log.prune(self.config.cooldown, now);
        if pruned > 0 {
            tracing::debug!(pruned, "Pruned expired evaluations");
        }

        let mut seen: HashSet<NodePair> = HashSet::new();
        let mut candidates: Vec<Candidate> = Vec::new();
        let mut edge_kinds: HashMap<NodePair, HashSet<RelationKind>> = HashMap::new();

        let tagged: Vec<&Node> = changed.iter().filter(|n| !n.tags.is_empty()).collect();
        let neighbourhoods = try_join_all(tagged.iter().map(|node| {
            self.store
                .nodes_by_tag_overlap(node, self.config.top_k * OVERFETCH_FACTOR)
        }))
        .await?;

        for (node, neighbours) in tagged.into_iter().zip(neighbourhoods) {
            let mut kept = 0usize;
            for neighbour in &neighbours {
                if kept >= self.config.top_k {
                    break;
                }
                let Some(candidate) = Candidate::new(node, neighbour) else {
                    continue;
                };
                if candidate.similarity <= 0.0 || seen.contains(&candidate.pair) {
                    continue;
                }
                if !self.admit(&candidate, &mut edge_kinds, now).await? {
                    continue;
                }
                seen.insert(candidate.pair);
                candidates.push(candidate);
                kept += 1;
            }
        }

        // Pairs left unfinished by earlier runs, whatever changed since
        let deferred = self.log.deferred_pairs();
        if !deferred.is_empty() {
            let ids: Vec<Uuid> = deferred.iter().flat_map(|p| [p.a, p.b]).collect();
            let nodes: HashMap<Uuid, Node> = self
                .store
                .get_nodes(&ids)
                .await?
                .into_iter()
                .map(|n| (n.id, n))
                .collect();
            for pair in deferred {
                if seen.contains(&pair) {
                    continue;
                }
                let candidate = match (nodes.get(&pair.a), nodes.get(&pair.b)) {
                    (Some(a), Some(b)) => Candidate::new(a, b).filter(|c| c.similarity > 0.0),
                    _ => None,
                };
                let admitted = match &candidate {
                    Some(c) => self.admit(c, &mut edge_kinds, now).await?,
                    None => false,
                };
                match candidate {
                    Some(candidate) if admitted => {
                        seen.insert(candidate.pair);
                        candidates.push(candidate);
                    }
                    _ => {
                        tracing::debug!(pair = %pair, "Dropping deferred pair");
                        self.log.forget_deferred(&pair);
                    }
                }
            }
        }

        candidates.sort_by(Candidate::rank_cmp);
        candidates.truncate(max_candidates);

        tracing::debug!(
            changed = changed.len(),
            candidates = candidates.len(),
            "Generated discovery candidates"
        );
        Ok(CandidateSequence::new(candidates))
    }

    /// Not fully connected already and not in cool-down
    async fn admit(
        &self,
        candidate: &Candidate,
        edge_kinds: &mut HashMap<NodePair, HashSet<RelationKind>>,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        if !edge_kinds.contains_key(&candidate.pair) {
            let kinds = self
                .store
                .get_edges_between(candidate.pair.a, candidate.pair.b)
                .await?
                .into_iter()
                .map(|e| e.relation_kind)
                .collect();
            edge_kinds.insert(candidate.pair, kinds);
        }
        let fully_connected = edge_kinds
            .get(&candidate.pair)
            .is_some_and(|kinds| RelationKind::ALL.iter().all(|k| kinds.contains(k)));
        if fully_connected {
            return Ok(false);
        }

        if self.log.is_cooling_down(
            &candidate.pair,
            &candidate.left,
            &candidate.right,
            self.config.cooldown,
            now,
        ) {
            tracing::trace!(pair = %candidate.pair, "Skipping pair in cool-down");
            return Ok(false);
        }
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::neo4j::models::{Edge, NodeType};
    use crate::neo4j::MockGraphStore;

    fn node(title: &str, tags: &[&str]) -> Node {
        let mut n = Node::new(NodeType::Note, title, "").with_tags(tags.iter().copied());
        n.content_fingerprint = format!("fp-{}", title);
        n
    }

    async fn store_with(nodes: &[Node]) -> Arc<MockGraphStore> {
        let mut store = MockGraphStore::new();
        for n in nodes {
            store = store.with_node(n.clone()).await;
        }
        Arc::new(store)
    }

    fn generator(store: Arc<MockGraphStore>, log: Arc<EvaluationLog>) -> CandidateGenerator {
        CandidateGenerator::new(store, log, CandidateConfig::default())
    }

    #[tokio::test]
    async fn test_shared_tag_pairs_rank_ahead_of_weaker_overlap() {
        let a = node("a", &["vendor-x"]);
        let b = node("b", &["vendor-x"]);
        let c = node("c", &["vendor-x"]);
        let d = node("d", &["vendor-x", "misc", "other"]);
        let nodes = vec![a.clone(), b.clone(), c.clone(), d.clone()];
        let store = store_with(&nodes).await;

        let seq = generator(store, Arc::new(EvaluationLog::new()))
            .generate_candidates(&nodes, 50)
            .await
            .unwrap();

        let pairs = seq.pairs();
        assert_eq!(pairs.len(), 6);
        let strong: HashSet<NodePair> = [(&a, &b), (&a, &c), (&b, &c)]
            .iter()
            .map(|(x, y)| NodePair::new(x.id, y.id).unwrap())
            .collect();
        assert!(pairs[..3].iter().all(|p| strong.contains(p)));
        assert!(pairs[3..].iter().all(|p| p.contains(d.id)));
    }

    #[tokio::test]
    async fn test_excludes_zero_overlap_and_dedupes_pairs() {
        let a = node("a", &["rust"]);
        let b = node("b", &["rust"]);
        let lonely = node("lonely", &["poetry"]);
        let untagged = node("untagged", &[]);
        let nodes = vec![a.clone(), b.clone(), lonely.clone(), untagged];
        let store = store_with(&nodes).await;

        let seq = generator(store, Arc::new(EvaluationLog::new()))
            .generate_candidates(&nodes, 50)
            .await
            .unwrap();
        assert_eq!(seq.pairs(), vec![NodePair::new(a.id, b.id).unwrap()]);
    }

    #[tokio::test]
    async fn test_skips_pairs_with_every_relation_kind() {
        let a = node("a", &["rust"]);
        let b = node("b", &["rust"]);
        let pair = NodePair::new(a.id, b.id).unwrap();
        let mut store = MockGraphStore::new()
            .with_node(a.clone())
            .await
            .with_node(b.clone())
            .await;
        for kind in RelationKind::ALL {
            store = store.with_edge(Edge::new(pair, kind, 0.9, "r", "p/m")).await;
        }

        let seq = generator(Arc::new(store), Arc::new(EvaluationLog::new()))
            .generate_candidates(&[a], 50)
            .await
            .unwrap();
        assert!(seq.is_empty());
    }

    #[tokio::test]
    async fn test_cooldown_until_fingerprint_changes() {
        let a = node("a", &["rust"]);
        let b = node("b", &["rust"]);
        let store = store_with(&[a.clone(), b.clone()]).await;
        let log = Arc::new(EvaluationLog::new());
        let gen = generator(store.clone(), log.clone());

        let mut seq = gen.generate_candidates(&[a.clone()], 50).await.unwrap();
        let candidate = seq.next().unwrap();
        log.mark(&candidate);

        assert!(gen
            .generate_candidates(&[a.clone()], 50)
            .await
            .unwrap()
            .is_empty());

        let mut edited = a.clone();
        edited.content_fingerprint = "fp-a-edited".to_string();
        store.upsert_node(&edited).await.unwrap();
        assert_eq!(gen.generate_candidates(&[edited], 50).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_cooldown_expires() {
        let a = node("a", &["rust"]);
        let b = node("b", &["rust"]);
        let store = store_with(&[a.clone(), b.clone()]).await;
        let log = Arc::new(EvaluationLog::new());
        let gen = generator(store, log.clone());

        let candidate = gen
            .generate_candidates(&[a.clone()], 50)
            .await
            .unwrap()
            .next()
            .unwrap();
        log.mark_at(&candidate, Utc::now() - Duration::hours(25));
        assert_eq!(gen.generate_candidates(&[a], 50).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_deferred_pair_returns_without_changes() {
        let a = node("a", &["rust"]);
        let b = node("b", &["rust"]);
        let store = store_with(&[a.clone(), b.clone()]).await;
        let log = Arc::new(EvaluationLog::new());
        let gen = generator(store, log.clone());

        let candidate = gen
            .generate_candidates(&[a], 50)
            .await
            .unwrap()
            .next()
            .unwrap();
        log.defer(&candidate);

        let seq = gen.generate_candidates(&[], 50).await.unwrap();
        assert_eq!(seq.pairs(), vec![candidate.pair]);
        assert!(log.is_deferred(&candidate.pair));

        log.mark(&candidate);
        assert!(!log.is_deferred(&candidate.pair));
        assert!(gen.generate_candidates(&[], 50).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_deferred_pair_dropped_when_node_missing() {
        let a = node("a", &["rust"]);
        let b = node("b", &["rust"]);
        let store = store_with(&[a.clone()]).await;
        let log = Arc::new(EvaluationLog::new());
        let candidate = Candidate::new(&a, &b).unwrap();
        log.defer(&candidate);

        let seq = generator(store, log.clone())
            .generate_candidates(&[], 50)
            .await
            .unwrap();
        assert!(seq.is_empty());
        assert!(log.deferred_pairs().is_empty());
    }

    #[test]
    fn test_prune_drops_expired_evaluations() {
        let a = node("a", &["rust"]);
        let b = node("b", &["rust"]);
        let c = node("c", &["rust"]);
        let log = EvaluationLog::new();
        let now = Utc::now();
        log.mark_at(&Candidate::new(&a, &b).unwrap(), now - Duration::hours(30));
        log.mark_at(&Candidate::new(&a, &c).unwrap(), now - Duration::hours(1));

        assert_eq!(log.prune(Duration::hours(24), now), 1);
        assert_eq!(log.len(), 1);
    }

    #[tokio::test]
    async fn test_max_candidates_and_restart() {
        let nodes: Vec<Node> = (0..5).map(|i| node(&format!("n{}", i), &["t"])).collect();
        let store = store_with(&nodes).await;
        let gen = generator(store, Arc::new(EvaluationLog::new()));

        assert!(gen.generate_candidates(&nodes, 0).await.unwrap().is_empty());

        let mut seq = gen.generate_candidates(&nodes, 3).await.unwrap();
        assert_eq!(seq.len(), 3);
        let first: Vec<NodePair> = seq.by_ref().map(|c| c.pair).collect();
        assert_eq!(seq.remaining(), 0);
        seq.restart();
        let second: Vec<NodePair> = seq.map(|c| c.pair).collect();
        assert_eq!(first, second);
    }
}
