//! The Synthesiser (C2, ยง4.4): assembles verified claims into a cited
//! markdown report with a dense, referenced bibliography.

use std::collections::HashMap;
use std::fmt::Write as _;

use crate::types::CritiqueResult;

/// Context the synthesiser needs beyond the critique results themselves
/// (ยง4.2's dispatch rule: `report_title = "HDRP Research Report: <query>"`
/// plus an introduction paragraph).
#[derive(Debug, Clone)]
pub struct SynthesisContext {
    pub report_title: String,
    pub introduction: String,
}

impl SynthesisContext {
    pub fn for_query(query: &str) -> Self {
        Self {
            report_title: format!("HDRP Research Report: {query}"),
            introduction: format!(
                "This report synthesises claims gathered and verified while researching: \"{query}\"."
            ),
        }
    }
}

/// One row of the artefact bundle's `sources` array (ยง4.5), derived here
/// so the artefact writer does not need to recompute citation ordering.
#[derive(Debug, Clone)]
pub struct SourceSummary {
    pub url: String,
    pub title: String,
    pub rank: usize,
    pub claims: usize,
}

#[derive(Debug, Clone)]
pub struct SynthesisOutput {
    pub report: String,
    pub sources: Vec<SourceSummary>,
}

/// `Synthesise(results[], context) -> markdown text` (ยง4.4).
///
/// When `results` is empty — no researcher produced a single claim, so
/// the critic itself never ran meaningfully — the whole report collapses
/// to the literal "no results" sentence (ยง8 scenario S4), rather than an
/// empty-bodied version of the five-part report.
pub fn synthesise(results: &[CritiqueResult], context: &SynthesisContext) -> SynthesisOutput {
    if results.is_empty() {
        return SynthesisOutput {
            report: "No information found for this query.".to_string(),
            sources: Vec::new(),
        };
    }

    let accepted: Vec<&CritiqueResult> = results.iter().filter(|r| r.is_valid).collect();

    let mut body = String::new();
    let _ = writeln!(body, "# {}", context.report_title);
    body.push('\n');
    let _ = writeln!(body, "{}", context.introduction);
    body.push('\n');

    let mut url_order: Vec<String> = Vec::new();
    let mut url_index: HashMap<String, usize> = HashMap::new();
    let mut url_title: HashMap<String, String> = HashMap::new();
    let mut url_claims: HashMap<String, usize> = HashMap::new();

    for result in &accepted {
        let url = result.claim.source_url.clone();
        url_index.entry(url.clone()).or_insert_with(|| {
            url_order.push(url.clone());
            url_title.insert(
                url.clone(),
                result
                    .claim
                    .source_title
                    .clone()
                    .unwrap_or_else(|| url.clone()),
            );
            url_order.len()
        });
        *url_claims.entry(url).or_insert(0) += 1;
    }

    if accepted.is_empty() {
        let _ = writeln!(
            body,
            "No claims could be confirmed against their sources for this query."
        );
    } else {
        for result in &accepted {
            let n = url_index[&result.claim.source_url];
            let _ = writeln!(body, "- {} [{}]", result.claim.statement, n);
        }
    }

    body.push('\n');
    let _ = writeln!(body, "## Bibliography");
    for (i, url) in url_order.iter().enumerate() {
        let n = i + 1;
        let _ = writeln!(body, "[{n}] {} — {url}", url_title[url]);
    }

    let sources = url_order
        .iter()
        .enumerate()
        .map(|(i, url)| SourceSummary {
            url: url.clone(),
            title: url_title[url].clone(),
            rank: i + 1,
            claims: url_claims[url],
        })
        .collect();

    SynthesisOutput {
        report: body,
        sources,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::AtomicClaim;
    use chrono::Utc;

    fn accepted_claim(statement: &str, url: &str) -> CritiqueResult {
        CritiqueResult {
            claim: AtomicClaim {
                statement: statement.to_string(),
                source_url: url.to_string(),
                support_text: statement.to_string(),
                source_node_id: "researcher_1".to_string(),
                timestamp: Utc::now(),
                source_title: None,
                source_rank: Some(1),
            },
            is_valid: true,
            reasoning: "accepted".to_string(),
            entailment_score: 0.9,
        }
    }

    #[test]
    fn empty_results_collapse_to_no_results_sentence() {
        let output = synthesise(&[], &SynthesisContext::for_query("anything"));
        assert_eq!(output.report, "No information found for this query.");
        assert!(output.sources.is_empty());
    }

    #[test]
    fn single_accepted_claim_has_dense_numbering() {
        let results = vec![accepted_claim(
            "Paris is the capital of France.",
            "https://example.invalid/a",
        )];
        let output = synthesise(&results, &SynthesisContext::for_query("capital of France"));
        assert!(output.report.contains("[1]"));
        assert!(output.report.contains("## Bibliography"));
        assert_eq!(output.sources.len(), 1);
        assert_eq!(output.sources[0].rank, 1);
    }

    #[test]
    fn citation_numbers_follow_first_occurrence_order() {
        let results = vec![
            accepted_claim("claim about b", "https://example.invalid/b"),
            accepted_claim("claim about a", "https://example.invalid/a"),
            accepted_claim("another claim about b", "https://example.invalid/b"),
        ];
        let output = synthesise(&results, &SynthesisContext::for_query("q"));
        assert_eq!(output.sources[0].url, "https://example.invalid/b");
        assert_eq!(output.sources[0].claims, 2);
        assert_eq!(output.sources[1].url, "https://example.invalid/a");
        assert!(output.report.contains("[1]"));
        assert!(output.report.contains("[2]"));
    }

    #[test]
    fn zero_accepted_claims_uses_explanatory_paragraph() {
        let mut rejected = accepted_claim("unsupported", "https://example.invalid/a");
        rejected.is_valid = false;
        let output = synthesise(&[rejected], &SynthesisContext::for_query("q"));
        assert!(output.report.contains("No claims could be confirmed"));
        assert!(output.sources.is_empty());
    }
}
