//! Labeled directed graph with JSON snapshot persistence
//!
//! One engine backs both the durable knowledge graph and the episodic memory
//! graph. Nodes are keyed by string id; every structural mutation rewrites
//! the snapshot.

use anyhow::Result;
use chrono::{DateTime, Utc};
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::unionfind::UnionFind;
use petgraph::visit::EdgeRef;
use petgraph::Direction;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::{debug, info, warn};

use super::snapshot::NodeLinkSnapshot;

/// Components smaller than this are reported as weak connections
const WEAK_COMPONENT_SIZE: usize = 3;
/// Title matches count this many times a body match
const TITLE_WEIGHT: f64 = 2.0;

/// A typed vertex
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KnowledgeNode {
    pub id: String,
    #[serde(rename = "type")]
    pub node_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    pub content: String,
    #[serde(default)]
    pub metadata: BTreeMap<String, serde_json::Value>,
    /// Backing file in the knowledge tree, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_path: Option<PathBuf>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub access_count: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_accessed: Option<DateTime<Utc>>,
}

impl KnowledgeNode {
    pub fn new(id: &str, node_type: &str, content: &str) -> Self {
        let now = Utc::now();
        Self {
            id: id.to_string(),
            node_type: node_type.to_string(),
            title: None,
            content: content.to_string(),
            metadata: BTreeMap::new(),
            file_path: None,
            created_at: now,
            updated_at: now,
            access_count: 0,
            last_accessed: None,
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn with_metadata(mut self, metadata: BTreeMap<String, serde_json::Value>) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn with_file_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.file_path = Some(path.into());
        self
    }
}

/// A directed, typed edge
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KnowledgeRelation {
    pub source: String,
    pub target: String,
    pub relation_type: String,
    pub weight: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
    #[serde(default)]
    pub metadata: BTreeMap<String, serde_json::Value>,
    pub created_at: DateTime<Utc>,
}

/// A node reached by `traverse`
#[derive(Debug, Clone, Serialize)]
pub struct TraversalHit {
    pub node: KnowledgeNode,
    /// Hop count from the start node
    pub distance: usize,
    /// Relation type of the edge that reached this node
    pub relation: String,
    /// Node the edge came from
    pub via: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct SearchHit {
    pub node: KnowledgeNode,
    pub score: f64,
}

/// Under-integrated parts of a graph
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct GapReport {
    /// Nodes with no edges at all
    pub isolated: Vec<String>,
    /// Weakly-connected components of fewer than 3 nodes, singletons included
    pub weak_clusters: Vec<Vec<String>>,
}

impl GapReport {
    pub fn is_empty(&self) -> bool {
        self.isolated.is_empty() && self.weak_clusters.is_empty()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct GraphStatistics {
    pub node_count: usize,
    pub edge_count: usize,
    pub node_types: BTreeMap<String, usize>,
    pub relation_types: BTreeMap<String, usize>,
    pub weakly_connected_components: usize,
    pub average_degree: f64,
}

#[derive(Debug, Default)]
struct GraphState {
    graph: DiGraph<KnowledgeNode, KnowledgeRelation>,
    index: HashMap<String, NodeIndex>,
}

impl GraphState {
    fn from_snapshot(snapshot: NodeLinkSnapshot) -> Self {
        let mut state = GraphState::default();
        for node in snapshot.nodes {
            state.upsert(node);
        }
        for link in snapshot.links {
            match (state.index.get(&link.source), state.index.get(&link.target)) {
                (Some(&a), Some(&b)) => {
                    state.graph.update_edge(a, b, link);
                }
                _ => warn!(
                    "Dropping snapshot link {} -> {}: endpoint missing",
                    link.source, link.target
                ),
            }
        }
        state
    }

    fn to_snapshot(&self) -> NodeLinkSnapshot {
        NodeLinkSnapshot::new(
            self.graph.node_weights().cloned().collect(),
            self.graph.edge_weights().cloned().collect(),
        )
    }

    fn upsert(&mut self, node: KnowledgeNode) -> NodeIndex {
        match self.index.get(&node.id) {
            Some(&idx) => {
                self.graph[idx] = node;
                idx
            }
            None => {
                let id = node.id.clone();
                let idx = self.graph.add_node(node);
                self.index.insert(id, idx);
                idx
            }
        }
    }

    /// Union-find over edges ignoring direction; groups keyed by root
    fn weak_components(&self) -> Vec<Vec<NodeIndex>> {
        let mut uf = UnionFind::new(self.graph.node_count());
        for edge in self.graph.edge_references() {
            uf.union(edge.source().index(), edge.target().index());
        }

        let mut groups: BTreeMap<usize, Vec<NodeIndex>> = BTreeMap::new();
        for idx in self.graph.node_indices() {
            groups.entry(uf.find(idx.index())).or_default().push(idx);
        }
        groups.into_values().collect()
    }
}

/// A persistent labeled graph
pub struct KnowledgeGraph {
    name: String,
    snapshot_path: PathBuf,
    state: RwLock<GraphState>,
}

impl KnowledgeGraph {
    /// Load the snapshot at `snapshot_path`, or start empty if it is missing or corrupt
    pub fn open(name: &str, snapshot_path: impl Into<PathBuf>) -> Self {
        let snapshot_path = snapshot_path.into();
        let state = match NodeLinkSnapshot::load(&snapshot_path) {
            Ok(Some(snapshot)) => GraphState::from_snapshot(snapshot),
            Ok(None) => GraphState::default(),
            Err(e) => {
                warn!(
                    "Failed to load {} graph from {}: {:#}; starting empty",
                    name,
                    snapshot_path.display(),
                    e
                );
                GraphState::default()
            }
        };

        info!(
            "Loaded {} graph: {} nodes, {} edges",
            name,
            state.graph.node_count(),
            state.graph.edge_count()
        );

        Self {
            name: name.to_string(),
            snapshot_path,
            state: RwLock::new(state),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn snapshot_path(&self) -> &Path {
        &self.snapshot_path
    }

    fn read(&self) -> RwLockReadGuard<'_, GraphState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, GraphState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn persist(&self, state: &GraphState) -> Result<()> {
        state.to_snapshot().save(&self.snapshot_path)
    }

    /// Upsert a node with fresh timestamps and access count, then persist
    pub fn add_node(
        &self,
        id: &str,
        node_type: &str,
        content: &str,
        metadata: BTreeMap<String, serde_json::Value>,
    ) -> Result<()> {
        let title = metadata.get("title").and_then(|v| v.as_str()).map(str::to_string);
        let mut node = KnowledgeNode::new(id, node_type, content).with_metadata(metadata);
        node.title = title;
        self.insert_node(node)
    }

    /// Upsert a fully built node, then persist
    pub fn insert_node(&self, node: KnowledgeNode) -> Result<()> {
        let mut state = self.write();
        debug!("{} graph: upsert node {} ({})", self.name, node.id, node.node_type);
        state.upsert(node);
        self.persist(&state)
    }

    /// Add the node only if its id is not present yet. Returns true if added.
    pub fn ensure_node(&self, node: KnowledgeNode) -> Result<bool> {
        if self.contains(&node.id) {
            return Ok(false);
        }
        self.insert_node(node)?;
        Ok(true)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.read().index.contains_key(id)
    }

    /// Fetch a node, bumping its access count
    pub fn get_node(&self, id: &str) -> Option<KnowledgeNode> {
        let mut state = self.write();
        let idx = *state.index.get(id)?;
        let node = &mut state.graph[idx];
        node.access_count += 1;
        node.last_accessed = Some(Utc::now());
        Some(node.clone())
    }

    /// Fetch a node without touching access statistics
    pub fn peek_node(&self, id: &str) -> Option<KnowledgeNode> {
        let state = self.read();
        state.index.get(id).map(|&idx| state.graph[idx].clone())
    }

    /// Add (or re-weight) the edge `source -> target`.
    ///
    /// Returns false without touching the graph if either endpoint is missing.
    pub fn add_relation(
        &self,
        source: &str,
        target: &str,
        relation_type: &str,
        context: Option<&str>,
        weight: f64,
    ) -> Result<bool> {
        let mut state = self.write();
        let (Some(&a), Some(&b)) = (state.index.get(source), state.index.get(target)) else {
            warn!(
                "{} graph: cannot relate {} -> {} ({}): endpoint missing",
                self.name, source, target, relation_type
            );
            return Ok(false);
        };

        let relation = KnowledgeRelation {
            source: source.to_string(),
            target: target.to_string(),
            relation_type: relation_type.to_string(),
            weight,
            context: context.map(str::to_string),
            metadata: BTreeMap::new(),
            created_at: Utc::now(),
        };
        state.graph.update_edge(a, b, relation);
        debug!("{} graph: {} -[{}]-> {}", self.name, source, relation_type, target);

        self.persist(&state)?;
        Ok(true)
    }

    /// Outgoing relations of a node
    pub fn relations_from(&self, id: &str) -> Vec<KnowledgeRelation> {
        let state = self.read();
        let Some(&idx) = state.index.get(id) else {
            return Vec::new();
        };
        state
            .graph
            .edges_directed(idx, Direction::Outgoing)
            .map(|e| e.weight().clone())
            .collect()
    }

    /// Breadth-first exploration along outgoing edges up to `max_depth` hops.
    ///
    /// `relation_filter`, when given, lists the relation types that may be followed.
    pub fn traverse(
        &self,
        start_id: &str,
        relation_filter: Option<&[&str]>,
        max_depth: usize,
        limit: usize,
    ) -> Vec<TraversalHit> {
        let state = self.read();
        let Some(&start) = state.index.get(start_id) else {
            return Vec::new();
        };
        if max_depth == 0 || limit == 0 {
            return Vec::new();
        }

        let mut visited: HashSet<NodeIndex> = HashSet::from([start]);
        let mut queue: VecDeque<(NodeIndex, usize)> = VecDeque::from([(start, 0)]);
        let mut hits = Vec::new();

        while let Some((current, depth)) = queue.pop_front() {
            if depth >= max_depth {
                continue;
            }
            for edge in state.graph.edges_directed(current, Direction::Outgoing) {
                let relation = &edge.weight().relation_type;
                if let Some(allowed) = relation_filter {
                    if !allowed.contains(&relation.as_str()) {
                        continue;
                    }
                }
                let next = edge.target();
                if !visited.insert(next) {
                    continue;
                }
                hits.push(TraversalHit {
                    node: state.graph[next].clone(),
                    distance: depth + 1,
                    relation: relation.clone(),
                    via: state.graph[current].id.clone(),
                });
                queue.push_back((next, depth + 1));
            }
        }

        hits.sort_by_key(|h| h.distance);
        hits.truncate(limit);
        hits
    }

    /// One hop in either direction
    pub fn neighbors(&self, id: &str) -> Vec<KnowledgeNode> {
        let state = self.read();
        let Some(&idx) = state.index.get(id) else {
            return Vec::new();
        };
        let mut seen = HashSet::new();
        state
            .graph
            .neighbors_undirected(idx)
            .filter(|n| seen.insert(*n))
            .map(|n| state.graph[n].clone())
            .collect()
    }

    /// Unweighted directed shortest path as a list of node ids
    pub fn shortest_path(&self, from: &str, to: &str) -> Option<Vec<String>> {
        let state = self.read();
        let (&a, &b) = (state.index.get(from)?, state.index.get(to)?);
        let (_, path) = petgraph::algo::astar(&state.graph, a, |n| n == b, |_| 1usize, |_| 0)?;
        Some(path.into_iter().map(|idx| state.graph[idx].id.clone()).collect())
    }

    /// Case-insensitive substring search over content and title
    pub fn search(&self, query: &str, type_filter: Option<&str>, limit: usize) -> Vec<SearchHit> {
        let needle = query.trim().to_lowercase();
        if needle.is_empty() {
            return Vec::new();
        }

        let state = self.read();
        let mut hits: Vec<SearchHit> = state
            .graph
            .node_weights()
            .filter(|n| type_filter.map_or(true, |t| n.node_type == t))
            .filter_map(|n| {
                let body = n.content.to_lowercase().matches(&needle).count() as f64;
                let title = n
                    .title
                    .as_deref()
                    .map(|t| t.to_lowercase().matches(&needle).count() as f64)
                    .unwrap_or(0.0);
                let score = body + TITLE_WEIGHT * title;
                (score > 0.0).then(|| SearchHit {
                    node: n.clone(),
                    score,
                })
            })
            .collect();

        hits.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.node.id.cmp(&b.node.id))
        });
        hits.truncate(limit);
        hits
    }

    /// Isolated nodes and small weakly-connected components
    pub fn gap_analysis(&self) -> GapReport {
        let state = self.read();
        let graph = &state.graph;

        let mut isolated: Vec<String> = graph
            .node_indices()
            .filter(|&idx| graph.neighbors_undirected(idx).next().is_none())
            .map(|idx| graph[idx].id.clone())
            .collect();
        isolated.sort();

        let mut weak_clusters: Vec<Vec<String>> = state
            .weak_components()
            .into_iter()
            .filter(|c| c.len() < WEAK_COMPONENT_SIZE)
            .map(|c| {
                let mut ids: Vec<String> = c.into_iter().map(|idx| graph[idx].id.clone()).collect();
                ids.sort();
                ids
            })
            .collect();
        weak_clusters.sort();

        GapReport {
            isolated,
            weak_clusters,
        }
    }

    pub fn statistics(&self) -> GraphStatistics {
        let state = self.read();
        let graph = &state.graph;

        let mut node_types = BTreeMap::new();
        for node in graph.node_weights() {
            *node_types.entry(node.node_type.clone()).or_default() += 1;
        }
        let mut relation_types = BTreeMap::new();
        for rel in graph.edge_weights() {
            *relation_types.entry(rel.relation_type.clone()).or_default() += 1;
        }

        let node_count = graph.node_count();
        let edge_count = graph.edge_count();
        GraphStatistics {
            node_count,
            edge_count,
            node_types,
            relation_types,
            weakly_connected_components: state.weak_components().len(),
            average_degree: if node_count > 0 {
                2.0 * edge_count as f64 / node_count as f64
            } else {
                0.0
            },
        }
    }

    pub fn node_count(&self) -> usize {
        self.read().graph.node_count()
    }

    pub fn edge_count(&self) -> usize {
        self.read().graph.edge_count()
    }

    /// All nodes, in insertion order
    pub fn nodes(&self) -> Vec<KnowledgeNode> {
        self.read().graph.node_weights().cloned().collect()
    }

    /// All relations, in insertion order
    pub fn relations(&self) -> Vec<KnowledgeRelation> {
        self.read().graph.edge_weights().cloned().collect()
    }

    /// Write the current snapshot even if nothing changed structurally
    /// (e.g. to keep access counts)
    pub fn flush(&self) -> Result<()> {
        let state = self.read();
        self.persist(&state)
    }
}
