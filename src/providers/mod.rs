mod ollama;

pub use ollama::OllamaClient;

use std::time::Duration;

use async_trait::async_trait;

use crate::error::ChronicleError;

/// One completion request to the LLM service boundary.
#[derive(Debug, Clone)]
pub struct GenerateRequest {
    pub prompt: String,
    pub max_tokens: u64,
    pub temperature: f64,
    pub context_window: u64,
    /// Per-call deadline. The agent passes a generous value for calls that
    /// may trigger model loading and a tighter one thereafter.
    pub timeout: Duration,
}

/// The generate/completion boundary. Treated as opaque and replaceable;
/// tests substitute a wiremock-backed client.
#[async_trait]
pub trait GenerateService: Send + Sync {
    async fn generate(&self, request: GenerateRequest) -> Result<String, ChronicleError>;

    /// Cheap availability probe. `false` means the service is down, not
    /// that a model is unloaded.
    async fn health(&self) -> bool;

    fn model(&self) -> &str;
}
