use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::ChronicleError;

use super::{GenerateRequest, GenerateService};

/// Client for a local Ollama instance.
///
/// One shared `reqwest::Client` gives pooled, reused connections across
/// calls; connection setup is significant next to the small-prompt
/// inference times this system targets.
pub struct OllamaClient {
    base_url: String,
    model: String,
    client: Client,
    health_timeout: Duration,
}

impl OllamaClient {
    pub fn new(base_url: String, model: String, health_timeout: Duration) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            model,
            client: Client::new(),
            health_timeout,
        }
    }
}

// ============================================================================
// Ollama API Types
// ============================================================================

#[derive(Debug, Serialize)]
struct OllamaGenerateRequest {
    model: String,
    prompt: String,
    stream: bool,
    options: OllamaOptions,
}

#[derive(Debug, Serialize)]
struct OllamaOptions {
    temperature: f64,
    num_predict: u64,
    num_ctx: u64,
}

#[derive(Debug, Deserialize)]
struct OllamaGenerateResponse {
    #[serde(default)]
    response: String,
}

// ============================================================================
// GenerateService Implementation
// ============================================================================

fn classify_send_error(e: reqwest::Error, started: Instant) -> ChronicleError {
    if e.is_timeout() {
        ChronicleError::Timeout {
            service: "ollama",
            elapsed_ms: started.elapsed().as_millis() as u64,
        }
    } else {
        ChronicleError::ServiceUnavailable {
            service: "ollama",
            reason: e.to_string(),
        }
    }
}

#[async_trait]
impl GenerateService for OllamaClient {
    async fn generate(&self, request: GenerateRequest) -> Result<String, ChronicleError> {
        let body = OllamaGenerateRequest {
            model: self.model.clone(),
            prompt: request.prompt,
            stream: false,
            options: OllamaOptions {
                temperature: request.temperature,
                num_predict: request.max_tokens,
                num_ctx: request.context_window,
            },
        };

        let started = Instant::now();
        let resp = self
            .client
            .post(format!("{}/api/generate", self.base_url))
            .timeout(request.timeout)
            .json(&body)
            .send()
            .await
            .map_err(|e| classify_send_error(e, started))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            return Err(ChronicleError::ServiceUnavailable {
                service: "ollama",
                reason: format!("API error ({status}): {text}"),
            });
        }

        let api_resp: OllamaGenerateResponse =
            resp.json().await.map_err(|e| ChronicleError::ServiceUnavailable {
                service: "ollama",
                reason: format!("invalid response body: {e}"),
            })?;

        debug!(
            elapsed_ms = started.elapsed().as_millis() as u64,
            chars = api_resp.response.len(),
            "ollama generate complete"
        );
        Ok(api_resp.response.trim().to_string())
    }

    async fn health(&self) -> bool {
        self.client
            .get(format!("{}/api/tags", self.base_url))
            .timeout(self.health_timeout)
            .send()
            .await
            .map(|r| r.status().is_success())
            .unwrap_or(false)
    }

    fn model(&self) -> &str {
        &self.model
    }
}
