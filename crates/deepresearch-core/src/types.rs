//! Core data model (ยง3): run identity, the query, the DAG (nodes and
//! edges), atomic claims, and critique results.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::HdrpError;

pub const MAX_DEPTH: u8 = 3;

/// Opaque unique identifier for a single run, stamped onto every log
/// entry, artefact path, and outbound subrequest.
pub type RunId = String;

/// A validated, length-bounded free-text research query.
///
/// Construction is the only validation boundary: once a `Query` exists,
/// every downstream component can assume it is non-empty and
/// `<= 500` characters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Query(String);

impl Query {
    pub const MAX_LEN: usize = 500;

    pub fn new(raw: impl Into<String>) -> Result<Self, HdrpError> {
        let trimmed = raw.into().trim().to_string();
        if trimmed.is_empty() {
            return Err(HdrpError::InvalidArgument("query must not be empty".into()));
        }
        if trimmed.chars().count() > Self::MAX_LEN {
            return Err(HdrpError::InvalidArgument(format!(
                "query must be at most {} characters",
                Self::MAX_LEN
            )));
        }
        Ok(Self(trimmed))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Query {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The three node roles a DAG can contain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeType {
    Researcher,
    Critic,
    Synthesiser,
}

impl NodeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Researcher => "researcher",
            Self::Critic => "critic",
            Self::Synthesiser => "synthesiser",
        }
    }
}

/// Lifecycle status of a single DAG node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NodeStatus {
    Created,
    Running,
    Succeeded,
    Failed,
    Skipped,
}

impl NodeStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Skipped)
    }
}

/// A single DAG vertex.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
    pub id: String,
    #[serde(rename = "type")]
    pub node_type: NodeType,
    pub config: BTreeMap<String, String>,
    pub depth: u8,
    pub status: NodeStatus,
    pub relevance_score: f32,
}

impl Node {
    pub fn new(id: impl Into<String>, node_type: NodeType, depth: u8) -> Self {
        Self {
            id: id.into(),
            node_type,
            config: BTreeMap::new(),
            depth,
            status: NodeStatus::Created,
            relevance_score: 1.0,
        }
    }

    pub fn with_config(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.config.insert(key.into(), value.into());
        self
    }
}

/// A directed edge `from -> to` between two node ids.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Edge {
    pub from: String,
    pub to: String,
}

/// Metadata describing how a graph was produced.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphMetadata {
    pub goal: String,
    pub run_id: RunId,
    pub decomposition_method: DecompositionMethod,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecompositionMethod {
    Llm,
    FallbackLinear,
}

/// A validated directed acyclic graph of research/critic/synthesiser
/// nodes, as produced by the Planner (ยง4.1) and consumed by the DAG
/// Executor (ยง4.2).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Graph {
    pub id: RunId,
    pub nodes: Vec<Node>,
    pub edges: Vec<Edge>,
    pub metadata: GraphMetadata,
}

impl Graph {
    pub fn node(&self, id: &str) -> Option<&Node> {
        self.nodes.iter().find(|n| n.id == id)
    }

    pub fn node_mut(&mut self, id: &str) -> Option<&mut Node> {
        self.nodes.iter_mut().find(|n| n.id == id)
    }

    pub fn predecessors(&self, id: &str) -> Vec<&str> {
        self.edges
            .iter()
            .filter(|e| e.to == id)
            .map(|e| e.from.as_str())
            .collect()
    }

    pub fn successors(&self, id: &str) -> Vec<&str> {
        self.edges
            .iter()
            .filter(|e| e.from == id)
            .map(|e| e.to.as_str())
            .collect()
    }

    /// Validates the structural invariants from ยง3: no self-loops, no
    /// cycles, every edge references an existing node, every non-root
    /// node has an incoming edge, exactly one sink (the synthesiser),
    /// and exactly one critic node.
    pub fn validate(&self) -> Result<(), HdrpError> {
        let ids: std::collections::HashSet<&str> =
            self.nodes.iter().map(|n| n.id.as_str()).collect();

        for edge in &self.edges {
            if edge.from == edge.to {
                return Err(HdrpError::Internal(format!(
                    "self-loop on node {}",
                    edge.from
                )));
            }
            if !ids.contains(edge.from.as_str()) || !ids.contains(edge.to.as_str()) {
                return Err(HdrpError::Internal(format!(
                    "edge {} -> {} references an unknown node",
                    edge.from, edge.to
                )));
            }
        }

        if self.topological_order().is_none() {
            return Err(HdrpError::Internal("graph contains a cycle".into()));
        }

        let synthesisers: Vec<&Node> = self
            .nodes
            .iter()
            .filter(|n| n.node_type == NodeType::Synthesiser)
            .collect();
        if synthesisers.len() != 1 {
            return Err(HdrpError::Internal(format!(
                "graph must contain exactly one synthesiser node, found {}",
                synthesisers.len()
            )));
        }
        let sink = synthesisers[0];
        if !self.successors(&sink.id).is_empty() {
            return Err(HdrpError::Internal(
                "synthesiser node must be the unique sink".into(),
            ));
        }

        let critics: Vec<&Node> = self
            .nodes
            .iter()
            .filter(|n| n.node_type == NodeType::Critic)
            .collect();
        if critics.len() != 1 {
            return Err(HdrpError::Internal(format!(
                "graph must contain exactly one critic node, found {}",
                critics.len()
            )));
        }

        let researchers = self
            .nodes
            .iter()
            .filter(|n| n.node_type == NodeType::Researcher)
            .count();
        if researchers == 0 {
            return Err(HdrpError::Internal(
                "graph must contain at least one researcher node".into(),
            ));
        }

        for node in &self.nodes {
            if node.depth >= MAX_DEPTH {
                return Err(HdrpError::Internal(format!(
                    "node {} has depth {} >= MAX_DEPTH",
                    node.id, node.depth
                )));
            }
        }

        Ok(())
    }

    /// Kahn's-algorithm topological order, or `None` if the graph has a
    /// cycle.
    pub fn topological_order(&self) -> Option<Vec<String>> {
        let mut indegree: BTreeMap<&str, usize> =
            self.nodes.iter().map(|n| (n.id.as_str(), 0)).collect();
        for edge in &self.edges {
            *indegree.entry(edge.to.as_str()).or_insert(0) += 1;
        }

        let mut ready: std::collections::VecDeque<&str> = indegree
            .iter()
            .filter(|(_, &deg)| deg == 0)
            .map(|(id, _)| *id)
            .collect();
        let mut ready_sorted: Vec<&str> = ready.drain(..).collect();
        ready_sorted.sort_unstable();
        let mut ready: std::collections::VecDeque<&str> = ready_sorted.into();

        let mut order = Vec::with_capacity(self.nodes.len());
        while let Some(id) = ready.pop_front() {
            order.push(id.to_string());
            let mut newly_ready = Vec::new();
            for succ in self.successors(id) {
                let entry = indegree.get_mut(succ).expect("successor must be known");
                *entry -= 1;
                if *entry == 0 {
                    newly_ready.push(succ);
                }
            }
            newly_ready.sort_unstable();
            ready.extend(newly_ready);
        }

        if order.len() == self.nodes.len() {
            Some(order)
        } else {
            None
        }
    }
}

/// A single extracted factual assertion paired with the verbatim span of
/// its supporting source text.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AtomicClaim {
    pub statement: String,
    pub source_url: String,
    pub support_text: String,
    pub source_node_id: String,
    pub timestamp: DateTime<Utc>,
    pub source_title: Option<String>,
    pub source_rank: Option<u32>,
}

/// The Claim Verifier's per-claim verdict.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CritiqueResult {
    pub claim: AtomicClaim,
    pub is_valid: bool,
    pub reasoning: String,
    pub entailment_score: f32,
}

/// A single result returned by the Search collaborator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResult {
    pub url: String,
    pub title: String,
    pub rank: u32,
    pub snippet: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn linear_graph() -> Graph {
        Graph {
            id: "run-1".into(),
            nodes: vec![
                Node::new("researcher_1", NodeType::Researcher, 0),
                Node::new("critic_1", NodeType::Critic, 1),
                Node::new("synthesiser_1", NodeType::Synthesiser, 2),
            ],
            edges: vec![
                Edge {
                    from: "researcher_1".into(),
                    to: "critic_1".into(),
                },
                Edge {
                    from: "critic_1".into(),
                    to: "synthesiser_1".into(),
                },
            ],
            metadata: GraphMetadata {
                goal: "q".into(),
                run_id: "run-1".into(),
                decomposition_method: DecompositionMethod::FallbackLinear,
            },
        }
    }

    #[test]
    fn query_rejects_empty() {
        assert!(Query::new("").is_err());
        assert!(Query::new("   ").is_err());
    }

    #[test]
    fn query_boundary_lengths() {
        let at_limit = "a".repeat(Query::MAX_LEN);
        assert!(Query::new(at_limit).is_ok());
        let over_limit = "a".repeat(Query::MAX_LEN + 1);
        assert!(Query::new(over_limit).is_err());
    }

    #[test]
    fn linear_graph_validates() {
        assert!(linear_graph().validate().is_ok());
    }

    #[test]
    fn topological_order_respects_dependencies() {
        let graph = linear_graph();
        let order = graph.topological_order().unwrap();
        assert_eq!(order, vec!["researcher_1", "critic_1", "synthesiser_1"]);
    }

    #[test]
    fn cycle_is_rejected() {
        let mut graph = linear_graph();
        graph.edges.push(Edge {
            from: "synthesiser_1".into(),
            to: "researcher_1".into(),
        });
        assert!(graph.validate().is_err());
    }

    #[test]
    fn multiple_synthesisers_rejected() {
        let mut graph = linear_graph();
        graph
            .nodes
            .push(Node::new("synthesiser_2", NodeType::Synthesiser, 2));
        assert!(graph.validate().is_err());
    }
}
