//! The DAG Executor (C4, ยง4.2): schedules a validated `Graph`, running
//! independent nodes concurrently over a bounded worker pool while
//! honouring dependency order, with per-node failure isolation and a
//! run-level deadline.
//!
//! The dispatch loop owns all scheduling state (indegree, ready queue,
//! inflight set) and runs as a single task; node bodies execute as
//! independent spawned tasks that report back over a completion channel,
//! mirroring this codebase's orchestrator/event-collector split.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{mpsc, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::collaborators::{DynSearch, Search};
use crate::error::{HdrpError, NodeFailure, NodeFailureKind};
use crate::logging::log_event;
use crate::synthesiser::{self, SynthesisContext, SynthesisOutput};
use crate::types::{AtomicClaim, CritiqueResult, Graph, Node, NodeStatus, NodeType, RunId};
use crate::verifier::ClaimVerifier;

/// Whatever a single node produces for its successors to consume.
#[derive(Debug, Clone)]
enum NodeOutput {
    Researcher(Vec<AtomicClaim>),
    Critic(Vec<CritiqueResult>),
    Synthesiser(SynthesisOutput),
}

struct NodeCompletion {
    node_id: String,
    result: Result<NodeOutput, NodeFailure>,
    duration_ms: u64,
}

/// Summary returned once the graph has finished executing.
#[derive(Debug, Clone)]
pub struct ExecutionReport {
    pub run_id: RunId,
    pub node_statuses: HashMap<String, NodeStatus>,
    pub report: SynthesisOutput,
    pub duration_ms: u64,
    pub claim_stats: crate::artifact::BundleStatistics,
}

fn node_failure_from_hdrp(err: &HdrpError) -> NodeFailure {
    match err {
        HdrpError::Timeout(_) => NodeFailure::new(NodeFailureKind::Timeout, err.to_string()),
        HdrpError::ExternalUnavailable(_) => NodeFailure::external_unavailable(err.to_string()),
        HdrpError::InvalidArgument(_) | HdrpError::Parse(_) => {
            NodeFailure::new(NodeFailureKind::Validation, err.to_string())
        }
        _ => NodeFailure::internal(err.to_string()),
    }
}

pub struct Executor {
    search: DynSearch,
    verifier: Arc<ClaimVerifier>,
    worker_pool_size: usize,
    run_deadline_secs: u64,
    top_k_results: usize,
}

impl Executor {
    pub fn new(
        search: DynSearch,
        verifier: Arc<ClaimVerifier>,
        worker_pool_size: usize,
        run_deadline_secs: u64,
        top_k_results: usize,
    ) -> Self {
        Self {
            search,
            verifier,
            worker_pool_size,
            run_deadline_secs,
            top_k_results,
        }
    }

    /// `execute(Graph, run_id) -> Report` (ยง4.2). Requires an already
    /// `validate()`d graph. Returns `Timeout` if the run deadline elapses
    /// before every node reaches a terminal status.
    pub async fn execute(
        &self,
        mut graph: Graph,
        query: &str,
        run_id: &RunId,
    ) -> Result<ExecutionReport, HdrpError> {
        graph.validate()?;

        log_event(
            run_id,
            "info",
            "executor",
            "run_start",
            serde_json::json!({ "node_count": graph.nodes.len() }),
        );

        let cancel = CancellationToken::new();
        let deadline = Duration::from_secs(self.run_deadline_secs);
        let watchdog_cancel = cancel.clone();
        let watchdog = tokio::spawn(async move {
            tokio::time::sleep(deadline).await;
            watchdog_cancel.cancel();
        });

        let start = Instant::now();
        let outputs = self
            .run_inner(&mut graph, query, run_id, cancel.clone(), start, deadline)
            .await;
        watchdog.abort();

        let duration_ms = start.elapsed().as_millis() as u64;

        if cancel.is_cancelled() {
            log_event(
                run_id,
                "error",
                "executor",
                "run_timeout",
                serde_json::json!({ "deadline_secs": self.run_deadline_secs }),
            );
            return Err(HdrpError::Timeout(deadline));
        }

        let synthesiser_id = graph
            .nodes
            .iter()
            .find(|n| n.node_type == NodeType::Synthesiser)
            .map(|n| n.id.clone())
            .ok_or_else(|| HdrpError::Internal("graph has no synthesiser node".into()))?;

        let report = match outputs.get(&synthesiser_id) {
            Some(NodeOutput::Synthesiser(output)) => output.clone(),
            _ => {
                log_event(
                    run_id,
                    "error",
                    "executor",
                    "synthesiser_failed",
                    serde_json::json!({}),
                );
                return Err(HdrpError::Internal(
                    "synthesiser node did not produce a report".into(),
                ));
            }
        };

        let node_statuses = graph
            .nodes
            .iter()
            .map(|n| (n.id.clone(), n.status))
            .collect();

        let claim_stats = Self::aggregate_claim_stats(&outputs, &report);

        log_event(
            run_id,
            "info",
            "executor",
            "run_complete",
            serde_json::json!({ "duration_ms": duration_ms }),
        );

        Ok(ExecutionReport {
            run_id: run_id.clone(),
            node_statuses,
            report,
            duration_ms,
            claim_stats,
        })
    }

    fn aggregate_claim_stats(
        outputs: &HashMap<String, NodeOutput>,
        report: &SynthesisOutput,
    ) -> crate::artifact::BundleStatistics {
        let mut total_claims = 0;
        let mut verified_claims = 0;
        for output in outputs.values() {
            if let NodeOutput::Critic(results) = output {
                total_claims += results.len();
                verified_claims += results.iter().filter(|r| r.is_valid).count();
            }
        }

        crate::artifact::BundleStatistics {
            total_claims,
            verified_claims,
            rejected_claims: total_claims.saturating_sub(verified_claims),
            unique_sources: report.sources.len(),
        }
    }

    async fn run_inner(
        &self,
        graph: &mut Graph,
        query: &str,
        run_id: &RunId,
        cancel: CancellationToken,
        run_start: Instant,
        deadline: Duration,
    ) -> HashMap<String, NodeOutput> {
        let mut indegree: HashMap<String, usize> =
            graph.nodes.iter().map(|n| (n.id.clone(), 0)).collect();
        for edge in &graph.edges {
            *indegree.entry(edge.to.clone()).or_insert(0) += 1;
        }

        let mut initially_ready: Vec<String> = indegree
            .iter()
            .filter(|(_, &degree)| degree == 0)
            .map(|(id, _)| id.clone())
            .collect();
        initially_ready.sort();
        let mut ready: VecDeque<String> = initially_ready.into();

        let mut inflight: HashSet<String> = HashSet::new();
        let mut outputs: HashMap<String, NodeOutput> = HashMap::new();
        let semaphore = Arc::new(Semaphore::new(self.worker_pool_size.max(1)));
        let (tx, mut rx) = mpsc::unbounded_channel::<NodeCompletion>();

        loop {
            if cancel.is_cancelled() {
                break;
            }

            while let Some(node_id) = ready.pop_front() {
                if cancel.is_cancelled() {
                    ready.push_front(node_id);
                    break;
                }
                let node = graph.node(&node_id).cloned().expect("ready node must exist");
                if let Some(n) = graph.node_mut(&node_id) {
                    n.status = NodeStatus::Running;
                }
                inflight.insert(node_id.clone());

                let dep_claims = self.gather_researcher_claims(graph, &outputs, &node_id);
                let critic_output = self.gather_critic_output(graph, &outputs, &node_id);

                let permit = semaphore.clone().acquire_owned().await.expect("semaphore open");
                let tx = tx.clone();
                let search = self.search.clone();
                let verifier = self.verifier.clone();
                let run_id_owned = run_id.clone();
                let query_owned = query.to_string();
                let top_k = self.top_k_results;
                let remaining = deadline.saturating_sub(run_start.elapsed());

                tokio::spawn(async move {
                    let start = Instant::now();
                    let result = match tokio::time::timeout(
                        remaining,
                        Self::dispatch_node(
                            &node,
                            dep_claims,
                            critic_output,
                            search,
                            verifier,
                            &query_owned,
                            &run_id_owned,
                            top_k,
                        ),
                    )
                    .await
                    {
                        Ok(result) => result,
                        Err(_) => Err(NodeFailure::new(
                            NodeFailureKind::Timeout,
                            "node exceeded the remaining run deadline".to_string(),
                        )),
                    };
                    let duration_ms = start.elapsed().as_millis() as u64;
                    drop(permit);
                    let _ = tx.send(NodeCompletion {
                        node_id: node.id.clone(),
                        result,
                        duration_ms,
                    });
                });
            }

            if inflight.is_empty() {
                break;
            }

            match rx.recv().await {
                Some(completion) => {
                    inflight.remove(&completion.node_id);
                    self.apply_completion(graph, &mut outputs, &mut indegree, &mut ready, completion, run_id);
                }
                None => break,
            }
        }

        if cancel.is_cancelled() {
            self.drain_with_grace(graph, &mut outputs, &mut indegree, &mut ready, &mut inflight, &mut rx, run_id)
                .await;
            for node in graph.nodes.iter_mut() {
                if !node.status.is_terminal() {
                    node.status = NodeStatus::Skipped;
                }
            }
        }

        outputs
    }

    fn apply_completion(
        &self,
        graph: &mut Graph,
        outputs: &mut HashMap<String, NodeOutput>,
        indegree: &mut HashMap<String, usize>,
        ready: &mut VecDeque<String>,
        completion: NodeCompletion,
        run_id: &RunId,
    ) {
        match completion.result {
            Ok(output) => {
                if let Some(n) = graph.node_mut(&completion.node_id) {
                    n.status = NodeStatus::Succeeded;
                }
                log_event(
                    run_id,
                    "info",
                    "executor",
                    "node_succeeded",
                    serde_json::json!({
                        "node_id": completion.node_id,
                        "duration_ms": completion.duration_ms,
                    }),
                );
                outputs.insert(completion.node_id.clone(), output);
            }
            Err(failure) => {
                if let Some(n) = graph.node_mut(&completion.node_id) {
                    n.status = NodeStatus::Failed;
                }
                warn!(node_id = %completion.node_id, kind = %failure.kind, reason = %failure.reason, "node failed");
                log_event(
                    run_id,
                    "warn",
                    "executor",
                    "node_failed",
                    serde_json::json!({
                        "node_id": completion.node_id,
                        "kind": failure.kind.to_string(),
                        "reason": failure.reason,
                        "duration_ms": completion.duration_ms,
                    }),
                );
            }
        }

        let successors: Vec<String> = graph
            .successors(&completion.node_id)
            .into_iter()
            .map(|s| s.to_string())
            .collect();
        let mut newly_ready: Vec<String> = Vec::new();
        for succ in successors {
            if let Some(entry) = indegree.get_mut(&succ) {
                *entry = entry.saturating_sub(1);
                if *entry == 0 {
                    newly_ready.push(succ);
                }
            }
        }
        newly_ready.sort();
        ready.extend(newly_ready);
    }

    #[allow(clippy::too_many_arguments)]
    async fn drain_with_grace(
        &self,
        graph: &mut Graph,
        outputs: &mut HashMap<String, NodeOutput>,
        indegree: &mut HashMap<String, usize>,
        ready: &mut VecDeque<String>,
        inflight: &mut HashSet<String>,
        rx: &mut mpsc::UnboundedReceiver<NodeCompletion>,
        run_id: &RunId,
    ) {
        const GRACE: Duration = Duration::from_secs(5);
        let deadline = Instant::now() + GRACE;
        while !inflight.is_empty() {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }
            match tokio::time::timeout(remaining, rx.recv()).await {
                Ok(Some(completion)) => {
                    inflight.remove(&completion.node_id);
                    self.apply_completion(graph, outputs, indegree, ready, completion, run_id);
                }
                _ => break,
            }
        }
    }

    /// Transitive union of claims from every `Researcher` ancestor of
    /// `node_id` (ยง4.2: "the union of claims from predecessor researchers
    /// transitively"), concatenated in deterministic node-id order (ยง5).
    fn gather_researcher_claims(
        &self,
        graph: &Graph,
        outputs: &HashMap<String, NodeOutput>,
        node_id: &str,
    ) -> Vec<AtomicClaim> {
        let mut visited = HashSet::new();
        let mut stack: Vec<String> = graph
            .predecessors(node_id)
            .into_iter()
            .map(|p| p.to_string())
            .collect();
        let mut ancestors = Vec::new();

        while let Some(id) = stack.pop() {
            if !visited.insert(id.clone()) {
                continue;
            }
            ancestors.push(id.clone());
            stack.extend(graph.predecessors(&id).into_iter().map(|p| p.to_string()));
        }

        ancestors.sort();
        let mut claims = Vec::new();
        for id in ancestors {
            if let Some(NodeOutput::Researcher(node_claims)) = outputs.get(&id) {
                claims.extend(node_claims.iter().cloned());
            }
        }

        claims
    }

    fn gather_critic_output(
        &self,
        graph: &Graph,
        outputs: &HashMap<String, NodeOutput>,
        node_id: &str,
    ) -> Vec<CritiqueResult> {
        for predecessor in graph.predecessors(node_id) {
            if let Some(NodeOutput::Critic(results)) = outputs.get(predecessor) {
                return results.clone();
            }
        }
        Vec::new()
    }

    #[allow(clippy::too_many_arguments)]
    async fn dispatch_node(
        node: &Node,
        dep_claims: Vec<AtomicClaim>,
        critic_output: Vec<CritiqueResult>,
        search: DynSearch,
        verifier: Arc<ClaimVerifier>,
        query: &str,
        run_id: &RunId,
        top_k: usize,
    ) -> Result<NodeOutput, NodeFailure> {
        match node.node_type {
            NodeType::Researcher => {
                let subquery = node
                    .config
                    .get("query")
                    .cloned()
                    .ok_or_else(|| NodeFailure::new(NodeFailureKind::Validation, "researcher node missing config.query"))?;

                let results = search
                    .search(&subquery)
                    .await
                    .map_err(|err| node_failure_from_hdrp(&err))?;

                let claims: Vec<AtomicClaim> = results
                    .into_iter()
                    .take(top_k)
                    .filter(|r| !r.snippet.trim().is_empty())
                    .map(|r| AtomicClaim {
                        statement: r.snippet.trim().to_string(),
                        source_url: r.url,
                        support_text: r.snippet.trim().to_string(),
                        source_node_id: node.id.clone(),
                        timestamp: chrono::Utc::now(),
                        source_title: Some(r.title),
                        source_rank: Some(r.rank),
                    })
                    .collect();

                log_event(
                    run_id,
                    "info",
                    "executor",
                    "researcher_claims_extracted",
                    serde_json::json!({ "node_id": node.id, "claim_count": claims.len() }),
                );

                Ok(NodeOutput::Researcher(claims))
            }
            NodeType::Critic => {
                let task = node
                    .config
                    .get("task")
                    .cloned()
                    .unwrap_or_else(|| query.to_string());
                let results = verifier.verify(dep_claims, &task).await;
                log_event(
                    run_id,
                    "info",
                    "executor",
                    "critic_verified",
                    serde_json::json!({
                        "node_id": node.id,
                        "claim_count": results.len(),
                        "accepted": results.iter().filter(|r| r.is_valid).count(),
                    }),
                );
                Ok(NodeOutput::Critic(results))
            }
            NodeType::Synthesiser => {
                let context = SynthesisContext::for_query(query);
                let output = synthesiser::synthesise(&critic_output, &context);
                Ok(NodeOutput::Synthesiser(output))
            }
        }
    }
}
