use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::info;

/// Default HTTP port.
pub const DEFAULT_PORT: u16 = 8612;

/// Default search result limit when the caller does not specify one.
pub const DEFAULT_SEARCH_LIMIT: u32 = 20;

/// Hard ceiling on a caller-supplied search limit.
pub const MAX_SEARCH_LIMIT: u32 = 100;

/// Default Ollama endpoint.
pub const DEFAULT_OLLAMA_URL: &str = "http://localhost:11434";

/// Default Ollama model.
pub const DEFAULT_OLLAMA_MODEL: &str = "llama3.2";

/// Top-level Chronicle configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Config {
    pub server: ServerConfig,
    pub search: SearchConfig,
    pub assistant: AssistantConfig,
    pub transcription: TranscriptionConfig,

    /// State directory for persistent data (the SQLite database).
    #[serde(skip)]
    pub state_dir: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerConfig {
    pub port: u16,
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            bind: "127.0.0.1".to_string(),
        }
    }
}

/// Tunables for the search index. Snippet window sizes and result limits
/// carry no derivation beyond "bounded enough to keep prompts small", so
/// they live here rather than as fixed constants in the index.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SearchConfig {
    pub default_limit: u32,
    pub max_limit: u32,
    /// Approximate token window for title snippets.
    pub title_snippet_tokens: u32,
    /// Approximate token window for body snippets.
    pub body_snippet_tokens: u32,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            default_limit: DEFAULT_SEARCH_LIMIT,
            max_limit: MAX_SEARCH_LIMIT,
            title_snippet_tokens: 16,
            body_snippet_tokens: 48,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AssistantConfig {
    pub base_url: String,
    pub model: String,
    /// Generation budget for the keyword-extraction stage.
    pub extract_max_tokens: u64,
    /// Low randomness: extraction should be deterministic, not creative.
    pub extract_temperature: f64,
    /// Generation budget for the answer-synthesis stage.
    pub answer_max_tokens: u64,
    pub answer_temperature: f64,
    /// Context window requested from the model. Kept small on purpose:
    /// prompt size is the dominant latency factor for local inference.
    pub context_window: u64,
    /// How many recent conversation turns are echoed into prompts.
    pub history_turns: usize,
    /// Maximum events included in the synthesis context.
    pub max_context_events: usize,
    /// Per-snippet character bound inside the synthesis context.
    pub max_context_chars: usize,
    /// Search result limit the agent requests in stage 2.
    pub search_limit: u32,
    /// Timeout for generate calls once the model is resident.
    pub request_timeout_secs: u64,
    /// Generous timeout for the first generate call in a process, which
    /// may trigger the service loading the model into memory.
    pub load_timeout_secs: u64,
    /// Timeout for the availability probe.
    pub health_timeout_secs: u64,
}

impl Default for AssistantConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_OLLAMA_URL.to_string(),
            model: DEFAULT_OLLAMA_MODEL.to_string(),
            extract_max_tokens: 32,
            extract_temperature: 0.1,
            answer_max_tokens: 256,
            answer_temperature: 0.7,
            context_window: 2048,
            history_turns: 3,
            max_context_events: 5,
            max_context_chars: 150,
            search_limit: 10,
            request_timeout_secs: 60,
            load_timeout_secs: 120,
            health_timeout_secs: 2,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TranscriptionConfig {
    /// Optional GPU transcription service URL. When set, audio is sent
    /// there first and the local engine is only a fallback.
    pub gpu_url: Option<String>,
    /// Path to the whisper.cpp binary for the local CPU path.
    pub binary: String,
    /// Directory holding ggml model files.
    pub model_dir: String,
    /// Model name (tiny, base, small, medium, large).
    pub model: String,
    pub timeout_secs: u64,
}

impl Default for TranscriptionConfig {
    fn default() -> Self {
        Self {
            gpu_url: None,
            binary: "/usr/local/bin/whisper".to_string(),
            model_dir: "models".to_string(),
            model: "tiny".to_string(),
            timeout_secs: 120,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            search: SearchConfig::default(),
            assistant: AssistantConfig::default(),
            transcription: TranscriptionConfig::default(),
            state_dir: PathBuf::new(),
        }
    }
}

impl Config {
    /// Load configuration from file, environment, and defaults.
    pub fn load(path: Option<&str>) -> Result<Self> {
        let config_path = path
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("chronicle.json"));

        let mut config = if config_path.exists() {
            info!("Loading config from {}", config_path.display());
            load_config_file(&config_path)?
        } else {
            info!("No config file found, using defaults");
            Config::default()
        };

        config.apply_env_overrides();
        config.state_dir = resolve_state_dir();

        Ok(config)
    }

    /// Write default configuration to a file.
    pub fn write_default(path: &str) -> Result<()> {
        let config = Config::default();
        let json = serde_json::to_string_pretty(&config)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    /// Path of the SQLite database under the state directory.
    pub fn db_path(&self) -> PathBuf {
        self.state_dir.join("chronicle.db")
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(port) = std::env::var("CHRONICLE_PORT") {
            if let Ok(port) = port.parse() {
                self.server.port = port;
            }
        }

        if let Ok(url) = std::env::var("OLLAMA_URL") {
            self.assistant.base_url = url;
        }

        if let Ok(model) = std::env::var("OLLAMA_MODEL") {
            self.assistant.model = model;
        }

        if let Ok(url) = std::env::var("WHISPER_GPU_URL") {
            self.transcription.gpu_url = Some(url);
        }

        if let Ok(binary) = std::env::var("WHISPER_CPP_BINARY") {
            self.transcription.binary = binary;
        }

        if let Ok(dir) = std::env::var("WHISPER_CPP_MODELS") {
            self.transcription.model_dir = dir;
        }
    }
}

fn load_config_file(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file '{}'", path.display()))?;
    let config: Config = serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse config file '{}'", path.display()))?;
    Ok(config)
}

fn resolve_state_dir() -> PathBuf {
    if let Ok(dir) = std::env::var("CHRONICLE_STATE_DIR") {
        return PathBuf::from(dir);
    }
    PathBuf::from("data")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_round_trip() {
        let config = Config::default();
        let json = serde_json::to_string(&config).unwrap();
        let parsed: Config = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.server.port, DEFAULT_PORT);
        assert_eq!(parsed.search.default_limit, DEFAULT_SEARCH_LIMIT);
        assert_eq!(parsed.assistant.model, DEFAULT_OLLAMA_MODEL);
    }

    #[test]
    fn test_partial_config_fills_defaults() {
        let parsed: Config =
            serde_json::from_str(r#"{"server": {"port": 9000}}"#).unwrap();
        assert_eq!(parsed.server.port, 9000);
        assert_eq!(parsed.search.max_limit, MAX_SEARCH_LIMIT);
        assert_eq!(parsed.assistant.history_turns, 3);
    }
}
