use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;

use crate::HdrpError;

use super::Entailment;

/// The three-way score returned by the entailment collaborator for a
/// premise/hypothesis pair (ยง6).
#[derive(Debug, Clone, Deserialize)]
pub struct EntailmentScore {
    pub entailment: f32,
    pub contradiction: f32,
    pub neutral: f32,
    #[serde(default)]
    pub variant: String,
}

/// Deterministic in-process stand-in for the entailment model server.
/// Returns a high entailment score when premise and hypothesis are
/// identical (after trimming/case-folding) and a low score otherwise —
/// exactly the oracle behaviour this system's own test scenarios are
/// written against.
pub struct StubEntailment {
    pub match_score: f32,
    pub mismatch_score: f32,
}

impl StubEntailment {
    pub fn new() -> Self {
        Self {
            match_score: 0.9,
            mismatch_score: 0.2,
        }
    }
}

impl Default for StubEntailment {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Entailment for StubEntailment {
    async fn relation(
        &self,
        premise: &str,
        hypothesis: &str,
        variant: &str,
    ) -> Result<EntailmentScore, HdrpError> {
        let matches = premise.trim().eq_ignore_ascii_case(hypothesis.trim())
            || hypothesis
                .trim()
                .to_lowercase()
                .contains(&premise.trim().to_lowercase())
            || premise
                .trim()
                .to_lowercase()
                .contains(&hypothesis.trim().to_lowercase());

        let entailment = if matches {
            self.match_score
        } else {
            self.mismatch_score
        };

        Ok(EntailmentScore {
            entailment,
            contradiction: 1.0 - entailment,
            neutral: 0.0,
            variant: variant.to_string(),
        })
    }
}

/// HTTP-backed entailment collaborator: `POST /relation` with an
/// `X-Model-Variant` header, per ยง6.
pub struct HttpEntailment {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpEntailment {
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(timeout)
                .build()
                .unwrap_or_default(),
            endpoint: endpoint.into(),
        }
    }
}

#[async_trait]
impl Entailment for HttpEntailment {
    async fn relation(
        &self,
        premise: &str,
        hypothesis: &str,
        variant: &str,
    ) -> Result<EntailmentScore, HdrpError> {
        let response = self
            .client
            .post(format!("{}/relation", self.endpoint))
            .header("X-Model-Variant", variant)
            .json(&serde_json::json!({ "premise": premise, "hypothesis": hypothesis }))
            .send()
            .await
            .map_err(|err| {
                HdrpError::ExternalUnavailable(format!("entailment request failed: {err}"))
            })?;

        match response.status().as_u16() {
            200 => response
                .json::<EntailmentScore>()
                .await
                .map_err(|err| HdrpError::Parse(format!("malformed entailment response: {err}"))),
            400 => Err(HdrpError::InvalidArgument(format!(
                "unknown entailment model variant {variant}"
            ))),
            _ => Err(HdrpError::ExternalUnavailable(format!(
                "entailment endpoint returned status {}",
                response.status()
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn stub_entailment_matches_identical_text() {
        let entailment = StubEntailment::new();
        let score = entailment
            .relation(
                "Paris is the capital of France.",
                "Paris is the capital of France.",
                "default",
            )
            .await
            .unwrap();
        assert!(score.entailment >= 0.65);
    }

    #[tokio::test]
    async fn stub_entailment_rejects_unrelated_text() {
        let entailment = StubEntailment::new();
        let score = entailment
            .relation("Paris is the capital of France.", "Bananas are yellow.", "default")
            .await
            .unwrap();
        assert!(score.entailment < 0.65);
    }
}
