use std::sync::Arc;

use async_trait::async_trait;
use deepresearch_core::{
    write_bundle, BundleStatistics, ClaimVerifier, Config, DynSearch, Executor, HdrpError,
    Planner, Query, SearchResult, StubCompletion, StubEntailment,
};

struct SingleHitSearch {
    snippet: &'static str,
}

#[async_trait]
impl deepresearch_core::Search for SingleHitSearch {
    async fn search(&self, _query: &str) -> Result<Vec<SearchResult>, HdrpError> {
        Ok(vec![SearchResult {
            url: "https://example.invalid/paris".to_string(),
            title: "Paris".to_string(),
            rank: 1,
            snippet: self.snippet.to_string(),
        }])
    }
}

/// ยง8 scenario S1: a single hit whose snippet entails the claim should
/// produce a one-source, one-citation report.
#[tokio::test]
async fn single_grounded_hit_produces_cited_report() {
    let search: DynSearch = Arc::new(SingleHitSearch {
        snippet: "Paris is the capital of France.",
    });
    let verifier = Arc::new(ClaimVerifier::new(
        Arc::new(StubEntailment::new()),
        Default::default(),
    ));
    let executor = Executor::new(search, verifier, 4, 300, 5);
    let planner = Planner::new(Arc::new(StubCompletion::new()));

    let query = Query::new("What is the capital of France?").unwrap();
    let run_id = "run-s1".to_string();

    let graph = planner.decompose(&query, &run_id).await;
    let execution = executor
        .execute(graph, query.as_str(), &run_id)
        .await
        .expect("pipeline should succeed");

    assert!(execution.report.report.contains("Paris"));
    assert!(execution.report.report.contains("[1]"));
    assert_eq!(execution.report.sources.len(), 1);
    assert_eq!(execution.report.sources[0].url, "https://example.invalid/paris");
}

struct NoHitsSearch;

#[async_trait]
impl deepresearch_core::Search for NoHitsSearch {
    async fn search(&self, _query: &str) -> Result<Vec<SearchResult>, HdrpError> {
        Ok(vec![])
    }
}

/// ยง8 scenario S4: zero researcher hits collapse to the literal
/// "no information" report rather than an empty five-part document.
#[tokio::test]
async fn no_search_hits_yields_no_information_report() {
    let search: DynSearch = Arc::new(NoHitsSearch);
    let verifier = Arc::new(ClaimVerifier::new(
        Arc::new(StubEntailment::new()),
        Default::default(),
    ));
    let executor = Executor::new(search, verifier, 4, 300, 5);
    let planner = Planner::new(Arc::new(StubCompletion::new()));

    let query = Query::new("What is the tallest mountain on Mars?").unwrap();
    let run_id = "run-s4".to_string();

    let graph = planner.decompose(&query, &run_id).await;
    let execution = executor
        .execute(graph, query.as_str(), &run_id)
        .await
        .expect("pipeline should succeed even with no results");

    assert_eq!(execution.report.report, "No information found for this query.");
    assert_eq!(execution.claim_stats.total_claims, 0);
}

#[tokio::test]
async fn write_bundle_persists_report_and_metadata_for_a_real_run() {
    let temp = tempfile::tempdir().unwrap();
    unsafe {
        std::env::set_var("HDRP_ARTIFACT_DIR", temp.path());
    }

    let search: DynSearch = Arc::new(SingleHitSearch {
        snippet: "Paris is the capital of France.",
    });
    let verifier = Arc::new(ClaimVerifier::new(
        Arc::new(StubEntailment::new()),
        Default::default(),
    ));
    let executor = Executor::new(search, verifier, 4, 300, 5);
    let planner = Planner::new(Arc::new(StubCompletion::new()));

    let query = Query::new("What is the capital of France?").unwrap();
    let run_id = "run-bundle-1".to_string();

    let graph = planner.decompose(&query, &run_id).await;
    let execution = executor
        .execute(graph, query.as_str(), &run_id)
        .await
        .unwrap();

    let persisted = write_bundle(
        &run_id,
        query.as_str(),
        "HDRP Research Report: What is the capital of France?",
        &execution.report.report,
        &execution.report.sources,
        execution.claim_stats,
        true,
    );
    assert!(persisted);

    let run_dir = temp.path().join(&run_id);
    assert!(run_dir.join("report.md").exists());
    assert!(run_dir.join("metadata.json").exists());

    unsafe {
        std::env::remove_var("HDRP_ARTIFACT_DIR");
    }
}

#[test]
fn default_config_builds_a_verifier_without_a_live_nli_endpoint() {
    let config = Config::default();
    assert!(config.nli.endpoint.is_none());
    let stats = BundleStatistics::default();
    assert_eq!(stats.total_claims, 0);
}
