use async_trait::async_trait;
use std::time::Duration;

use crate::types::SearchResult;
use crate::HdrpError;

use super::Search;

/// Deterministic, offline search provider (`provider = "simulated"`,
/// ยง6's default). Produces a small, stable set of fixture results keyed
/// only by the query text, so the same query always returns the same
/// results within a process and across processes.
pub struct SimulatedSearch {
    hits_per_query: usize,
}

impl SimulatedSearch {
    pub fn new() -> Self {
        Self { hits_per_query: 3 }
    }

    pub fn with_hits_per_query(hits_per_query: usize) -> Self {
        Self { hits_per_query }
    }
}

impl Default for SimulatedSearch {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Search for SimulatedSearch {
    async fn search(&self, query: &str) -> Result<Vec<SearchResult>, HdrpError> {
        let slug = query
            .split_whitespace()
            .take(4)
            .collect::<Vec<_>>()
            .join("-")
            .to_lowercase();
        let slug = if slug.is_empty() {
            "result".to_string()
        } else {
            slug
        };

        Ok((1..=self.hits_per_query as u32)
            .map(|rank| SearchResult {
                url: format!("https://example.invalid/{slug}/{rank}"),
                title: format!("{query} (source {rank})"),
                rank,
                snippet: format!("Simulated finding #{rank} relevant to: {query}"),
            })
            .collect())
    }
}

/// HTTP-backed search provider for a real search API (`google`,
/// `tavily`, …). The endpoint and credentials are supplied by the
/// surrounding configuration; this type only knows how to issue the
/// request and parse a uniform response shape.
pub struct HttpSearch {
    client: reqwest::Client,
    endpoint: String,
    api_key: Option<String>,
}

impl HttpSearch {
    pub fn new(endpoint: impl Into<String>, api_key: Option<String>, timeout: Duration) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(timeout)
                .build()
                .unwrap_or_default(),
            endpoint: endpoint.into(),
            api_key,
        }
    }
}

#[async_trait]
impl Search for HttpSearch {
    async fn search(&self, query: &str) -> Result<Vec<SearchResult>, HdrpError> {
        let mut request = self.client.get(&self.endpoint).query(&[("q", query)]);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request
            .send()
            .await
            .map_err(|err| HdrpError::ExternalUnavailable(format!("search request failed: {err}")))?;

        if !response.status().is_success() {
            return Err(HdrpError::ExternalUnavailable(format!(
                "search provider returned status {}",
                response.status()
            )));
        }

        response
            .json::<Vec<SearchResult>>()
            .await
            .map_err(|err| HdrpError::Parse(format!("malformed search response: {err}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn simulated_search_is_deterministic() {
        let search = SimulatedSearch::new();
        let first = search.search("capital of France").await.unwrap();
        let second = search.search("capital of France").await.unwrap();
        assert_eq!(first.len(), second.len());
        assert_eq!(first[0].url, second[0].url);
        assert_eq!(first[0].rank, 1);
    }
}
