//! The Planner (C3, ยง4.1): turns a query into a bounded DAG of
//! researcher/critic/synthesiser nodes.

use std::collections::{HashMap, HashSet};

use tracing::{info, warn};

use crate::collaborators::{DynCompletion, Subtask};
use crate::logging::log_event;
use crate::types::{
    DecompositionMethod, Edge, Graph, GraphMetadata, Node, NodeType, Query, RunId, MAX_DEPTH,
};

pub struct Planner {
    completion: DynCompletion,
}

impl Planner {
    pub fn new(completion: DynCompletion) -> Self {
        Self { completion }
    }

    /// `Decompose(query, run_id) -> Graph` (ยง4.1). Never fails: any
    /// internal error is logged and recovered by the fallback linear DAG.
    pub async fn decompose(&self, query: &Query, run_id: &RunId) -> Graph {
        log_event(
            run_id,
            "info",
            "planner",
            "decompose_start",
            serde_json::json!({ "query": query.as_str() }),
        );

        match self.completion.decompose(query.as_str()).await {
            Ok(response) => match Self::validate_subtasks(response.subtasks) {
                Ok(subtasks) => {
                    let graph = Self::build_graph(&subtasks, query.as_str(), run_id.clone());
                    info!(run_id, node_count = graph.nodes.len(), "decomposition succeeded");
                    log_event(
                        run_id,
                        "info",
                        "planner",
                        "decompose_success",
                        serde_json::json!({
                            "node_count": graph.nodes.len(),
                            "edge_count": graph.edges.len(),
                        }),
                    );
                    graph
                }
                Err(reason) => self.fallback(query, run_id, &reason),
            },
            Err(err) => self.fallback(query, run_id, &err.to_string()),
        }
    }

    fn fallback(&self, query: &Query, run_id: &RunId, reason: &str) -> Graph {
        warn!(run_id, reason, "decomposition fell back to linear DAG");
        log_event(
            run_id,
            "warn",
            "planner",
            "decompose_fallback",
            serde_json::json!({ "error": reason }),
        );
        Self::fallback_linear_dag(query.as_str(), run_id.clone())
    }

    /// Reject a missing/empty subtask list or duplicate ids (keeping the
    /// first occurrence). Malformed JSON is rejected upstream by the
    /// collaborator itself.
    fn validate_subtasks(subtasks: Vec<Subtask>) -> Result<Vec<Subtask>, String> {
        let mut seen = HashSet::new();
        let mut kept = Vec::new();
        for subtask in subtasks {
            if subtask.id.trim().is_empty() || seen.contains(&subtask.id) {
                continue;
            }
            seen.insert(subtask.id.clone());
            kept.push(subtask);
        }
        if kept.is_empty() {
            return Err("no valid subtasks in response".to_string());
        }
        Ok(kept)
    }

    /// Memoised recursive depth: `0` for no dependencies, else
    /// `1 + max(depth(d))` over known dependencies. Unknown dependency
    /// ids are ignored.
    fn calculate_depths(subtasks: &[Subtask]) -> HashMap<String, u32> {
        let by_id: HashMap<&str, &Subtask> =
            subtasks.iter().map(|s| (s.id.as_str(), s)).collect();
        let mut depths: HashMap<String, u32> = HashMap::new();

        fn get_depth<'a>(
            id: &'a str,
            by_id: &HashMap<&'a str, &'a Subtask>,
            depths: &mut HashMap<String, u32>,
        ) -> u32 {
            if let Some(&d) = depths.get(id) {
                return d;
            }
            let depth = match by_id.get(id) {
                None => 0,
                Some(subtask) if subtask.dependencies.is_empty() => 0,
                Some(subtask) => subtask
                    .dependencies
                    .iter()
                    .filter(|dep| by_id.contains_key(dep.as_str()))
                    .map(|dep| get_depth(dep, by_id, depths) + 1)
                    .max()
                    .unwrap_or(0),
            };
            depths.insert(id.to_string(), depth);
            depth
        }

        for subtask in subtasks {
            get_depth(&subtask.id, &by_id, &mut depths);
        }
        depths
    }

    fn build_graph(subtasks: &[Subtask], original_query: &str, run_id: RunId) -> Graph {
        let depth_map = Self::calculate_depths(subtasks);

        let mut nodes = Vec::new();
        let mut edges = Vec::new();
        let mut valid_ids: HashSet<&str> = HashSet::new();

        for subtask in subtasks {
            let depth = *depth_map.get(&subtask.id).unwrap_or(&0);
            if depth >= MAX_DEPTH as u32 {
                log_event(
                    &run_id,
                    "info",
                    "planner",
                    "depth_exceeded",
                    serde_json::json!({ "subtask_id": subtask.id, "depth": depth }),
                );
                continue;
            }
            valid_ids.insert(subtask.id.as_str());
            nodes.push(
                Node::new(
                    format!("researcher_{}", subtask.id),
                    NodeType::Researcher,
                    depth as u8,
                )
                .with_config("query", subtask.query.clone()),
            );
        }

        for subtask in subtasks {
            if !valid_ids.contains(subtask.id.as_str()) {
                continue;
            }
            for dep in &subtask.dependencies {
                if valid_ids.contains(dep.as_str()) {
                    edges.push(Edge {
                        from: format!("researcher_{dep}"),
                        to: format!("researcher_{}", subtask.id),
                    });
                }
            }
        }

        let has_outgoing: HashSet<&str> = edges.iter().map(|e| e.from.as_str()).collect();
        let leaves: Vec<String> = nodes
            .iter()
            .map(|n| n.id.clone())
            .filter(|id| !has_outgoing.contains(id.as_str()))
            .collect();

        let max_researcher_depth = nodes.iter().map(|n| n.depth).max().unwrap_or(0);
        let critic_depth = std::cmp::min(max_researcher_depth + 1, MAX_DEPTH - 1);

        nodes.push(
            Node::new("critic_1", NodeType::Critic, critic_depth)
                .with_config("task", original_query.to_string()),
        );
        for leaf in &leaves {
            edges.push(Edge {
                from: leaf.clone(),
                to: "critic_1".to_string(),
            });
        }

        let synth_depth = std::cmp::min(critic_depth + 1, MAX_DEPTH - 1);
        nodes.push(
            Node::new("synthesiser_1", NodeType::Synthesiser, synth_depth)
                .with_config("query", original_query.to_string()),
        );
        edges.push(Edge {
            from: "critic_1".to_string(),
            to: "synthesiser_1".to_string(),
        });

        Graph {
            id: run_id.clone(),
            nodes,
            edges,
            metadata: GraphMetadata {
                goal: original_query.to_string(),
                run_id,
                decomposition_method: DecompositionMethod::Llm,
            },
        }
    }

    fn fallback_linear_dag(query: &str, run_id: RunId) -> Graph {
        let nodes = vec![
            Node::new("researcher_1", NodeType::Researcher, 0).with_config("query", query),
            Node::new("critic_1", NodeType::Critic, 1).with_config("task", query),
            Node::new("synthesiser_1", NodeType::Synthesiser, 2).with_config("query", query),
        ];
        let edges = vec![
            Edge {
                from: "researcher_1".to_string(),
                to: "critic_1".to_string(),
            },
            Edge {
                from: "critic_1".to_string(),
                to: "synthesiser_1".to_string(),
            },
        ];

        Graph {
            id: run_id.clone(),
            nodes,
            edges,
            metadata: GraphMetadata {
                goal: query.to_string(),
                run_id,
                decomposition_method: DecompositionMethod::FallbackLinear,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::StubCompletion;
    use std::sync::Arc;

    fn planner() -> Planner {
        Planner::new(Arc::new(StubCompletion::new()))
    }

    #[tokio::test]
    async fn single_topic_query_yields_three_node_graph() {
        let query = Query::new("What is the history of machine learning?").unwrap();
        let graph = planner().decompose(&query, &"run-1".to_string()).await;
        assert!(graph.validate().is_ok());
        assert_eq!(graph.metadata.decomposition_method, DecompositionMethod::Llm);
        assert_eq!(
            graph
                .nodes
                .iter()
                .filter(|n| n.node_type == NodeType::Researcher)
                .count(),
            1
        );
    }

    #[tokio::test]
    async fn comparison_query_yields_multiple_researchers_and_leaves_to_critic() {
        let query = Query::new("Compare quantum vs classical computing").unwrap();
        let graph = planner().decompose(&query, &"run-2".to_string()).await;
        assert!(graph.validate().is_ok());

        let researcher_count = graph
            .nodes
            .iter()
            .filter(|n| n.node_type == NodeType::Researcher)
            .count();
        assert!(researcher_count >= 2);

        let critic_predecessors: HashSet<&str> =
            graph.predecessors("critic_1").into_iter().collect();
        let leaves: HashSet<&str> = graph
            .nodes
            .iter()
            .filter(|n| n.node_type == NodeType::Researcher)
            .map(|n| n.id.as_str())
            .filter(|id| graph.successors(id).is_empty())
            .collect();
        assert_eq!(critic_predecessors, leaves);
    }

    #[test]
    fn fallback_linear_dag_has_expected_shape() {
        let graph = Planner::fallback_linear_dag("q", "run-3".to_string());
        assert!(graph.validate().is_ok());
        assert_eq!(
            graph.metadata.decomposition_method,
            DecompositionMethod::FallbackLinear
        );
        assert_eq!(graph.nodes.len(), 3);
    }

    #[test]
    fn dependency_chain_deeper_than_max_depth_is_pruned() {
        let subtasks: Vec<Subtask> = (0..6)
            .map(|i| Subtask {
                id: format!("s{i}"),
                query: format!("question {i}"),
                dependencies: if i == 0 {
                    vec![]
                } else {
                    vec![format!("s{}", i - 1)]
                },
                entities: vec![],
            })
            .collect();
        let graph = Planner::build_graph(&subtasks, "original", "run-4".to_string());
        let researcher_count = graph
            .nodes
            .iter()
            .filter(|n| n.node_type == NodeType::Researcher)
            .count();
        assert_eq!(researcher_count, MAX_DEPTH as usize);
    }
}
