// Primary compute path: candidates from a remote HTTP service

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;
use turnstile_core::domain::{Candidate, GenerationInput};
use turnstile_core::error::{AppError, Result};
use turnstile_core::port::CandidateGenerator;

/// Convert reqwest::Error to AppError (any failure sends the pipeline to the fallback)
pub fn map_reqwest_error(err: reqwest::Error) -> AppError {
    if err.is_timeout() {
        AppError::Compute(format!("primary generator timed out: {}", err))
    } else if err.is_connect() {
        AppError::Compute(format!("primary generator unreachable: {}", err))
    } else if let Some(status) = err.status() {
        AppError::Compute(format!("primary generator returned {}", status))
    } else if err.is_decode() {
        AppError::Compute(format!("primary generator sent malformed body: {}", err))
    } else {
        AppError::Compute(err.to_string())
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest<'a> {
    request_id: &'a str,
    inputs: &'a serde_json::Map<String, serde_json::Value>,
    target_count: usize,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    candidates: Vec<Candidate>,
}

/// POSTs the job inputs to `endpoint` and reads `{"candidates": [...]}` back
pub struct HttpCandidateGenerator {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpCandidateGenerator {
    /// `timeout` bounds a single HTTP exchange; the pipeline has its own bound
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AppError::Config(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl CandidateGenerator for HttpCandidateGenerator {
    fn name(&self) -> &str {
        "http-primary"
    }

    async fn generate(&self, input: &GenerationInput) -> Result<Vec<Candidate>> {
        let body = GenerateRequest {
            request_id: &input.request_id,
            inputs: &input.inputs,
            target_count: input.target_count,
        };

        let response: GenerateResponse = self
            .client
            .post(&self.endpoint)
            .json(&body)
            .send()
            .await
            .map_err(map_reqwest_error)?
            .error_for_status()
            .map_err(map_reqwest_error)?
            .json()
            .await
            .map_err(map_reqwest_error)?;

        let candidates = sanitize(response.candidates);
        debug!(
            request_id = %input.request_id,
            count = candidates.len(),
            "Primary generator responded"
        );
        Ok(candidates)
    }
}

/// Drop blank and duplicate values, keeping first occurrence order
fn sanitize(candidates: Vec<Candidate>) -> Vec<Candidate> {
    let mut seen = std::collections::HashSet::new();
    candidates
        .into_iter()
        .filter(|c| !c.value.trim().is_empty())
        .filter(|c| seen.insert(c.value.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_response_shape() {
        let body = serde_json::json!({
            "candidates": [
                {"value": "Minjun", "rationale": "strong"},
                {"value": "Seoah", "attributes": {"hanja": "瑞娥"}}
            ]
        });
        let parsed: GenerateResponse = serde_json::from_value(body).unwrap();

        assert_eq!(parsed.candidates.len(), 2);
        assert_eq!(parsed.candidates[0].rationale.as_deref(), Some("strong"));
        assert_eq!(parsed.candidates[1].attributes["hanja"], "瑞娥");
    }

    #[test]
    fn test_request_is_camel_case() {
        let inputs = serde_json::Map::new();
        let body = GenerateRequest {
            request_id: "r1",
            inputs: &inputs,
            target_count: 30,
        };
        let value = serde_json::to_value(&body).unwrap();
        assert_eq!(value["requestId"], "r1");
        assert_eq!(value["targetCount"], 30);
    }

    #[test]
    fn test_sanitize_drops_blank_and_duplicates() {
        let kept = sanitize(vec![
            Candidate::new("a"),
            Candidate::new(" "),
            Candidate::new("b"),
            Candidate::new("a"),
        ]);
        let values: Vec<_> = kept.iter().map(|c| c.value.as_str()).collect();
        assert_eq!(values, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_is_compute_error() {
        // Port 9 (discard) on loopback is closed in test environments
        let generator =
            HttpCandidateGenerator::new("http://127.0.0.1:9/generate", Duration::from_secs(2))
                .unwrap();
        let input = GenerationInput {
            request_id: "r1".to_string(),
            inputs: serde_json::Map::new(),
            target_count: 5,
        };

        let err = generator.generate(&input).await.unwrap_err();
        assert!(matches!(err, AppError::Compute(_)));
    }
}
