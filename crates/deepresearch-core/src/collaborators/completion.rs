use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;

use super::Completion;

/// A single subtask as returned by the decomposition collaborator, prior
/// to graph construction.
#[derive(Debug, Clone, Deserialize)]
pub struct Subtask {
    pub id: String,
    pub query: String,
    #[serde(default)]
    pub dependencies: Vec<String>,
    #[serde(default)]
    pub entities: Vec<String>,
}

/// The parsed decomposition response (ยง4.1's `{subtasks, reasoning}`
/// shape).
#[derive(Debug, Clone, Deserialize)]
pub struct DecompositionResponse {
    pub subtasks: Vec<Subtask>,
    #[serde(default)]
    pub reasoning: String,
}

/// Any failure from the decomposition collaborator: network failure,
/// malformed JSON, or a structurally invalid response. The Planner
/// treats all of these identically — as a trigger for the fallback
/// linear DAG (ยง4.1) — but keeps the distinction for logging.
#[derive(Debug, Clone, thiserror::Error)]
pub enum CompletionError {
    #[error("decomposition request failed: {0}")]
    Unavailable(String),
    #[error("malformed decomposition response: {0}")]
    Parse(String),
    #[error("decomposition response contained no usable subtasks")]
    Empty,
}

const SYSTEM_PROMPT: &str = "You are a research planning assistant. Decompose the query into \
independently researchable subtasks, identify dependencies between them, and group independent \
work at the same depth for parallel execution. Maximum depth is 3 levels.";

/// Deterministic in-process stand-in for an LLM decomposition call.
///
/// Mirrors the fixed system prompt plus few-shot decomposition strategy
/// this system's real LLM path would use: independent clauses split on a
/// small set of comparison/conjunction separators become independent
/// subtasks, and a query that does not split becomes a single subtask.
/// When more than one independent subtask is found, an extra
/// "comparison" subtask is appended that depends on all of them, mirroring
/// the worked examples this pipeline's LLM prompt is seeded with.
pub struct StubCompletion;

impl StubCompletion {
    pub fn new() -> Self {
        Self
    }

    fn split_independent_clauses(query: &str) -> Vec<String> {
        const SEPARATORS: &[&str] = &[" versus ", " vs. ", " vs ", " and "];
        for sep in SEPARATORS {
            let parts: Vec<&str> = query.splitn(2, sep).collect();
            if parts.len() == 2 && !parts[0].trim().is_empty() && !parts[1].trim().is_empty() {
                return parts.into_iter().map(|p| p.trim().to_string()).collect();
            }
        }
        vec![query.trim().to_string()]
    }

    fn slug(text: &str) -> String {
        text.split_whitespace()
            .take(3)
            .collect::<Vec<_>>()
            .join("_")
            .to_lowercase()
            .chars()
            .filter(|c| c.is_alphanumeric() || *c == '_')
            .collect()
    }
}

impl Default for StubCompletion {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Completion for StubCompletion {
    async fn decompose(&self, query: &str) -> Result<DecompositionResponse, CompletionError> {
        let clauses = Self::split_independent_clauses(query);

        if clauses.len() == 1 {
            return Ok(DecompositionResponse {
                subtasks: vec![Subtask {
                    id: "topic".to_string(),
                    query: clauses[0].clone(),
                    dependencies: vec![],
                    entities: vec![],
                }],
                reasoning: format!("{SYSTEM_PROMPT} Single focused question; no split needed."),
            });
        }

        let mut subtasks = Vec::new();
        let mut ids = Vec::new();
        for clause in &clauses {
            let id = Self::slug(clause);
            let id = if id.is_empty() {
                format!("topic_{}", subtasks.len())
            } else {
                id
            };
            ids.push(id.clone());
            subtasks.push(Subtask {
                id,
                query: clause.clone(),
                dependencies: vec![],
                entities: vec![],
            });
        }

        subtasks.push(Subtask {
            id: "comparison".to_string(),
            query: format!("How do {} compare?", clauses.join(" and ")),
            dependencies: ids,
            entities: vec![],
        });

        Ok(DecompositionResponse {
            subtasks,
            reasoning: format!(
                "{SYSTEM_PROMPT} Split into {} independent streams with a comparison step.",
                clauses.len()
            ),
        })
    }
}

/// HTTP-backed decomposition collaborator for a real LLM endpoint.
pub struct HttpCompletion {
    client: reqwest::Client,
    endpoint: String,
    api_key: Option<String>,
    model: String,
}

impl HttpCompletion {
    pub fn new(
        endpoint: impl Into<String>,
        api_key: Option<String>,
        model: impl Into<String>,
        timeout: Duration,
    ) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(timeout)
                .build()
                .unwrap_or_default(),
            endpoint: endpoint.into(),
            api_key,
            model: model.into(),
        }
    }
}

#[async_trait]
impl Completion for HttpCompletion {
    async fn decompose(&self, query: &str) -> Result<DecompositionResponse, CompletionError> {
        let mut request = self.client.post(&self.endpoint).json(&serde_json::json!({
            "model": self.model,
            "system": SYSTEM_PROMPT,
            "query": query,
            "temperature": 0.3,
            "response_format": "json_object",
        }));
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request
            .send()
            .await
            .map_err(|err| CompletionError::Unavailable(err.to_string()))?;

        if !response.status().is_success() {
            return Err(CompletionError::Unavailable(format!(
                "decomposition endpoint returned status {}",
                response.status()
            )));
        }

        let body: DecompositionResponse = response
            .json()
            .await
            .map_err(|err| CompletionError::Parse(err.to_string()))?;

        if body.subtasks.is_empty() {
            return Err(CompletionError::Empty);
        }

        Ok(body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn single_clause_query_yields_one_subtask() {
        let completion = StubCompletion::new();
        let response = completion
            .decompose("What is the history of machine learning?")
            .await
            .unwrap();
        assert_eq!(response.subtasks.len(), 1);
        assert!(response.subtasks[0].dependencies.is_empty());
    }

    #[tokio::test]
    async fn comparison_query_yields_dependent_subtask() {
        let completion = StubCompletion::new();
        let response = completion
            .decompose("Compare quantum vs classical computing")
            .await
            .unwrap();
        assert_eq!(response.subtasks.len(), 3);
        let comparison = response.subtasks.last().unwrap();
        assert_eq!(comparison.dependencies.len(), 2);
    }
}
