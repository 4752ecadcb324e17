//! The Claim Verifier (C1, ยง4.3): a two-test rule over an entailment
//! collaborator, with lexical-overlap fallback and a bounded per-run
//! cache of entailment scores.

use std::collections::hash_map::DefaultHasher;
use std::collections::{HashMap, HashSet, VecDeque};
use std::hash::{Hash, Hasher};
use std::sync::Mutex;

use once_cell::sync::Lazy;

use crate::collaborators::{DynEntailment, EntailmentScore};
use crate::config::NliConfig;
use crate::types::{AtomicClaim, CritiqueResult};

static STOP_WORDS: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    [
        "a", "an", "and", "are", "as", "at", "be", "by", "for", "from", "has", "he", "in", "is",
        "it", "its", "of", "on", "that", "the", "to", "was", "were", "will", "with", "this",
        "what", "which", "who", "how", "do", "does", "did", "can", "could", "would", "should",
    ]
    .into_iter()
    .collect()
});

fn tokenize(text: &str) -> HashSet<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|tok| !tok.is_empty() && !STOP_WORDS.contains(tok))
        .map(|tok| tok.to_string())
        .collect()
}

/// Jaccard similarity over stop-word-filtered tokens (ยง4.3).
fn jaccard(a: &str, b: &str) -> f32 {
    let tokens_a = tokenize(a);
    let tokens_b = tokenize(b);
    if tokens_a.is_empty() && tokens_b.is_empty() {
        return 0.0;
    }
    let intersection = tokens_a.intersection(&tokens_b).count();
    let union = tokens_a.union(&tokens_b).count();
    if union == 0 {
        0.0
    } else {
        intersection as f32 / union as f32
    }
}

fn cache_key(premise: &str, hypothesis: &str, variant: &str) -> u64 {
    let mut hasher = DefaultHasher::new();
    premise.hash(&mut hasher);
    0u8.hash(&mut hasher);
    hypothesis.hash(&mut hasher);
    0u8.hash(&mut hasher);
    variant.hash(&mut hasher);
    hasher.finish()
}

#[derive(Default)]
struct CacheStats {
    hits: u64,
    misses: u64,
}

/// Bounded, FIFO-evicted cache of entailment scores, keyed by a hash of
/// `premise || hypothesis || variant` (ยง4.3, ยง5).
pub struct EntailmentCache {
    capacity: usize,
    entries: Mutex<HashMap<u64, EntailmentScore>>,
    order: Mutex<VecDeque<u64>>,
    stats: Mutex<CacheStats>,
}

impl EntailmentCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            entries: Mutex::new(HashMap::new()),
            order: Mutex::new(VecDeque::new()),
            stats: Mutex::new(CacheStats::default()),
        }
    }

    fn get(&self, key: u64) -> Option<EntailmentScore> {
        let entries = self.entries.lock().unwrap();
        let mut stats = self.stats.lock().unwrap();
        match entries.get(&key) {
            Some(score) => {
                stats.hits += 1;
                Some(score.clone())
            }
            None => {
                stats.misses += 1;
                None
            }
        }
    }

    fn insert(&self, key: u64, score: EntailmentScore) {
        let mut entries = self.entries.lock().unwrap();
        let mut order = self.order.lock().unwrap();
        if entries.contains_key(&key) {
            return;
        }
        if entries.len() >= self.capacity {
            if let Some(oldest) = order.pop_front() {
                entries.remove(&oldest);
            }
        }
        entries.insert(key, score);
        order.push_back(key);
    }

    /// `(hits, misses, hit_rate)`, reported in the run log (ยง4.3).
    pub fn hit_rate(&self) -> (u64, u64, f64) {
        let stats = self.stats.lock().unwrap();
        let total = stats.hits + stats.misses;
        let rate = if total == 0 {
            0.0
        } else {
            stats.hits as f64 / total as f64
        };
        (stats.hits, stats.misses, rate)
    }
}

pub struct ClaimVerifier {
    entailment: DynEntailment,
    config: NliConfig,
    cache: EntailmentCache,
}

impl ClaimVerifier {
    pub fn new(entailment: DynEntailment, config: NliConfig) -> Self {
        let cache = EntailmentCache::new(config.cache_capacity);
        Self {
            entailment,
            config,
            cache,
        }
    }

    pub fn cache_hit_rate(&self) -> (u64, u64, f64) {
        self.cache.hit_rate()
    }

    async fn score(&self, premise: &str, hypothesis: &str) -> Option<EntailmentScore> {
        let key = cache_key(premise, hypothesis, &self.config.variant_default);
        if let Some(cached) = self.cache.get(key) {
            return Some(cached);
        }
        let result = self
            .entailment
            .relation(premise, hypothesis, &self.config.variant_default)
            .await
            .ok()?;
        self.cache.insert(key, result.clone());
        Some(result)
    }

    /// `Verify(claims[], task, run_id) -> CritiqueResult[]` (ยง4.3).
    /// Length and order are preserved; exactly one result per claim.
    pub async fn verify(&self, claims: Vec<AtomicClaim>, task: &str) -> Vec<CritiqueResult> {
        let mut results = Vec::with_capacity(claims.len());
        for claim in claims {
            results.push(self.verify_one(claim, task).await);
        }
        results
    }

    async fn verify_one(&self, claim: AtomicClaim, task: &str) -> CritiqueResult {
        let grounding = self.score(&claim.support_text, &claim.statement).await;
        let grounding_unavailable = grounding.is_none();

        let (ground_pass, ground_score, ground_reason) = match &grounding {
            Some(score) => {
                let pass =
                    score.entailment >= self.config.tau_ground && score.contradiction <= self.config.kappa_contra;
                (pass, score.entailment, format!("entailment={:.2}", score.entailment))
            }
            None => {
                let overlap = jaccard(&claim.support_text, &claim.statement);
                (
                    overlap >= 0.5,
                    overlap,
                    format!("lexical_overlap={overlap:.2} (entailment unavailable)"),
                )
            }
        };

        if !ground_pass {
            return CritiqueResult {
                claim,
                is_valid: false,
                reasoning: format!("grounding test failed ({ground_reason})"),
                entailment_score: ground_score,
            };
        }

        let relevance = self.score(&claim.statement, task).await;
        let relevance_unavailable = relevance.is_none();

        if grounding_unavailable && relevance_unavailable {
            return CritiqueResult {
                claim,
                is_valid: false,
                reasoning: "verifier_unavailable".to_string(),
                entailment_score: 0.0,
            };
        }

        let (relevance_pass, relevance_score, relevance_reason) = match &relevance {
            Some(score) if score.entailment >= self.config.tau_relevance => (
                true,
                score.entailment,
                format!("entailment={:.2}", score.entailment),
            ),
            Some(score) => {
                let overlap = jaccard(&claim.statement, task);
                (
                    overlap > 0.6,
                    score.entailment,
                    format!("entailment={:.2}, lexical_overlap={overlap:.2}", score.entailment),
                )
            }
            None => {
                let overlap = jaccard(&claim.statement, task);
                (
                    overlap > 0.6,
                    overlap,
                    format!("lexical_overlap={overlap:.2} (entailment unavailable)"),
                )
            }
        };

        if !relevance_pass {
            return CritiqueResult {
                claim,
                is_valid: false,
                reasoning: format!("relevance test failed ({relevance_reason})"),
                entailment_score: ground_score.max(relevance_score),
            };
        }

        CritiqueResult {
            claim,
            is_valid: true,
            reasoning: format!("accepted ({ground_reason}; {relevance_reason})"),
            entailment_score: ground_score,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::{Entailment, StubEntailment};
    use crate::HdrpError;
    use async_trait::async_trait;
    use chrono::Utc;
    use std::sync::Arc;

    struct FailingEntailment;

    #[async_trait]
    impl Entailment for FailingEntailment {
        async fn relation(
            &self,
            _premise: &str,
            _hypothesis: &str,
            _variant: &str,
        ) -> Result<EntailmentScore, HdrpError> {
            Err(HdrpError::ExternalUnavailable("nli service down".to_string()))
        }
    }

    fn claim(statement: &str, support_text: &str) -> AtomicClaim {
        AtomicClaim {
            statement: statement.to_string(),
            source_url: "https://example.invalid/1".to_string(),
            support_text: support_text.to_string(),
            source_node_id: "researcher_1".to_string(),
            timestamp: Utc::now(),
            source_title: None,
            source_rank: Some(1),
        }
    }

    fn verifier() -> ClaimVerifier {
        ClaimVerifier::new(Arc::new(StubEntailment::new()), NliConfig::default())
    }

    #[tokio::test]
    async fn matching_claim_is_accepted() {
        let results = verifier()
            .verify(
                vec![claim(
                    "Paris is the capital of France.",
                    "Paris is the capital of France.",
                )],
                "What is the capital of France?",
            )
            .await;
        assert_eq!(results.len(), 1);
        assert!(results[0].is_valid);
    }

    #[tokio::test]
    async fn unrelated_claim_is_rejected() {
        let results = verifier()
            .verify(
                vec![claim("Bananas are yellow.", "Bananas are a fruit.")],
                "What is the capital of France?",
            )
            .await;
        assert_eq!(results.len(), 1);
        assert!(!results[0].is_valid);
    }

    #[tokio::test]
    async fn order_and_length_preserved() {
        let claims = vec![
            claim("A", "A is true."),
            claim("B", "B is true."),
            claim("C", "C is true."),
        ];
        let results = verifier().verify(claims.clone(), "task").await;
        assert_eq!(results.len(), claims.len());
        for (result, original) in results.iter().zip(claims.iter()) {
            assert_eq!(result.claim.statement, original.statement);
        }
    }

    #[tokio::test]
    async fn both_tests_unavailable_yields_verifier_unavailable_reasoning() {
        let verifier = ClaimVerifier::new(Arc::new(FailingEntailment), NliConfig::default());
        let results = verifier
            .verify(
                vec![claim(
                    "Paris is the capital of France.",
                    "Paris is the capital of France.",
                )],
                "What is the capital of France?",
            )
            .await;
        assert_eq!(results.len(), 1);
        assert!(!results[0].is_valid);
        assert_eq!(results[0].reasoning, "verifier_unavailable");
    }

    #[test]
    fn jaccard_identical_text_is_one() {
        assert!((jaccard("the capital of France", "capital of France") - 1.0).abs() < 0.01);
    }

    #[test]
    fn jaccard_disjoint_text_is_zero() {
        assert_eq!(jaccard("apples oranges", "trains planes"), 0.0);
    }
}
