//! Synthesizer backed by a local Ollama server.

use async_trait::async_trait;
use reqwest::{Client, ClientBuilder, StatusCode};
use serde_json::json;
use std::time::Duration;
use tracing::debug;

use crate::synthesizer::{SynthesisError, Synthesizer};

/// Ollama text-generation client.
#[derive(Clone)]
pub struct OllamaSynthesizer {
    /// HTTP client
    client: Client,

    /// Ollama server URL
    url: String,

    /// Model name
    model: String,

    /// Per-request timeout
    timeout: Duration,
}

/// Map a non-success HTTP status onto the error taxonomy.
pub(crate) fn classify_status(status: StatusCode, detail: String) -> SynthesisError {
    if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
        SynthesisError::Transient(format!("status {}: {}", status, detail))
    } else {
        SynthesisError::Rejected(format!("status {}: {}", status, detail))
    }
}

impl OllamaSynthesizer {
    /// Create a new Ollama client.
    pub fn new(url: impl Into<String>, model: impl Into<String>, timeout: Duration) -> Self {
        Self {
            client: ClientBuilder::new()
                .timeout(timeout)
                .build()
                .unwrap_or_default(),
            url: url.into().trim_end_matches('/').to_string(),
            model: model.into(),
            timeout,
        }
    }

    /// Check if the Ollama server is reachable.
    pub async fn health_check(&self) -> bool {
        match self.client.get(format!("{}/api/version", self.url)).send().await {
            Ok(response) => response.status().is_success(),
            Err(_) => false,
        }
    }
}

#[async_trait]
impl Synthesizer for OllamaSynthesizer {
    fn name(&self) -> &str {
        &self.model
    }

    async fn synthesize(&self, prompt: &str) -> Result<String, SynthesisError> {
        let payload = json!({
            "model": self.model,
            "prompt": prompt,
            "stream": false,
            "options": {
                "temperature": 0.2
            }
        });

        debug!("Requesting completion from {} ({} chars)", self.model, prompt.len());

        let response = self
            .client
            .post(format!("{}/api/generate", self.url))
            .json(&payload)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    SynthesisError::Timeout(self.timeout)
                } else {
                    SynthesisError::Transient(e.to_string())
                }
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(classify_status(status, error_text));
        }

        let body = response
            .text()
            .await
            .map_err(|e| SynthesisError::Transient(e.to_string()))?;
        parse_completion(&body)
    }
}

/// Pull the completion text out of a non-streaming `/api/generate` body.
pub(crate) fn parse_completion(body: &str) -> Result<String, SynthesisError> {
    #[derive(serde::Deserialize)]
    struct Response {
        response: String,
    }

    let data: Response = serde_json::from_str(body).map_err(|e| SynthesisError::Malformed(e.to_string()))?;
    if data.response.trim().is_empty() {
        return Err(SynthesisError::Malformed("empty completion".to_string()));
    }
    Ok(data.response)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overload_and_rate_limits_are_transient() {
        assert!(classify_status(StatusCode::TOO_MANY_REQUESTS, String::new()).is_transient());
        assert!(classify_status(StatusCode::SERVICE_UNAVAILABLE, String::new()).is_transient());
        assert!(matches!(
            classify_status(StatusCode::NOT_FOUND, "model not found".into()),
            SynthesisError::Rejected(_)
        ));
    }

    #[test]
    fn completion_body_is_parsed() {
        let body = r#"{"model":"qwen3:8b","response":"- **wait** for the retest","done":true}"#;
        assert_eq!(parse_completion(body).unwrap(), "- **wait** for the retest");
    }

    #[test]
    fn empty_or_garbled_completion_is_malformed() {
        for body in [r#"{"response":"   "}"#, r#"{"error":"oops"}"#, "not json"] {
            let err = parse_completion(body).unwrap_err();
            assert!(matches!(err, SynthesisError::Malformed(_)), "{}", body);
            assert!(!err.is_transient());
        }
    }
}
