//! Speech-to-text boundary.
//!
//! Transcription is served by either of two engines selected by runtime
//! configuration: a GPU-accelerated remote service, with a local
//! CPU whisper.cpp process as the fallback path. Each produces its own raw
//! output shape; both are returned as [`RawTranscription`] variants and
//! normalized by `Transcript::from_engine`, never leaked upward.

use std::path::Path;
use std::time::{Duration, Instant};

use reqwest::multipart;
use serde::Deserialize;
use tracing::{info, warn};

use crate::config::TranscriptionConfig;
use crate::error::ChronicleError;
use crate::transcript::{LocalOffsets, LocalSegment, RawTranscription, RemoteWord};

/// Raw engine output plus which device produced it.
#[derive(Debug)]
pub struct TranscriptionOutcome {
    pub raw: RawTranscription,
    pub device: String,
    pub elapsed_ms: u64,
}

/// Client for both transcription paths. The reqwest client keeps pooled
/// connections to the GPU service across calls.
pub struct Transcriber {
    config: TranscriptionConfig,
    client: reqwest::Client,
}

impl Transcriber {
    pub fn new(config: TranscriptionConfig) -> Self {
        Self {
            config,
            client: reqwest::Client::new(),
        }
    }

    /// Transcribe raw audio bytes. Tries the GPU service when configured,
    /// falling back to the local CPU engine on any remote failure.
    pub async fn transcribe(
        &self,
        audio: Vec<u8>,
        filename: &str,
        language: Option<&str>,
    ) -> Result<TranscriptionOutcome, ChronicleError> {
        if let Some(url) = self.config.gpu_url.clone() {
            match self
                .transcribe_remote(&url, audio.clone(), filename, language)
                .await
            {
                Ok(outcome) => return Ok(outcome),
                Err(e) => {
                    warn!(error = %e, "GPU transcription failed, falling back to CPU");
                }
            }
        }
        self.transcribe_local(audio, filename, language).await
    }

    async fn transcribe_remote(
        &self,
        base_url: &str,
        audio: Vec<u8>,
        filename: &str,
        language: Option<&str>,
    ) -> Result<TranscriptionOutcome, ChronicleError> {
        let started = Instant::now();

        let mut form = multipart::Form::new()
            .part(
                "audio_file",
                multipart::Part::bytes(audio)
                    .file_name(filename.to_string())
                    .mime_str("audio/mpeg")
                    .map_err(|e| ChronicleError::ServiceUnavailable {
                        service: "whisper-gpu",
                        reason: e.to_string(),
                    })?,
            )
            .text("word_timestamps", "true");
        if let Some(lang) = language {
            form = form.text("language", lang.to_string());
        }

        let resp = self
            .client
            .post(format!("{}/transcribe/", base_url.trim_end_matches('/')))
            .timeout(Duration::from_secs(self.config.timeout_secs))
            .multipart(form)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ChronicleError::Timeout {
                        service: "whisper-gpu",
                        elapsed_ms: started.elapsed().as_millis() as u64,
                    }
                } else {
                    ChronicleError::ServiceUnavailable {
                        service: "whisper-gpu",
                        reason: e.to_string(),
                    }
                }
            })?;

        if !resp.status().is_success() {
            return Err(ChronicleError::ServiceUnavailable {
                service: "whisper-gpu",
                reason: format!("status {}", resp.status()),
            });
        }

        let body: GpuResponse =
            resp.json()
                .await
                .map_err(|e| ChronicleError::MalformedTranscript(format!(
                    "GPU service returned unreadable body: {e}"
                )))?;

        let elapsed_ms = started.elapsed().as_millis() as u64;
        info!(elapsed_ms, device = %body.device, "GPU transcription complete");

        Ok(TranscriptionOutcome {
            raw: RawTranscription::Remote {
                text: body.transcription,
                words: body.words,
                language: body.language,
                duration: body.duration,
            },
            device: body.device,
            elapsed_ms,
        })
    }

    /// Local path: run whisper.cpp on a temp file and parse its JSON
    /// output (written next to the input as `<file>.json`).
    async fn transcribe_local(
        &self,
        audio: Vec<u8>,
        filename: &str,
        language: Option<&str>,
    ) -> Result<TranscriptionOutcome, ChronicleError> {
        let started = Instant::now();

        let suffix = Path::new(filename)
            .extension()
            .map(|e| format!(".{}", e.to_string_lossy()))
            .unwrap_or_else(|| ".wav".to_string());
        let temp = tempfile::Builder::new()
            .prefix("chronicle-audio-")
            .suffix(&suffix)
            .tempfile()
            .and_then(|f| {
                std::fs::write(f.path(), &audio)?;
                Ok(f)
            })
            .map_err(|e| ChronicleError::ServiceUnavailable {
                service: "whisper-cpp",
                reason: format!("cannot stage audio file: {e}"),
            })?;

        let audio_path = temp.path().to_path_buf();
        let model_path = format!(
            "{}/ggml-{}.bin",
            self.config.model_dir.trim_end_matches('/'),
            self.config.model
        );

        let mut cmd = tokio::process::Command::new(&self.config.binary);
        cmd.arg("-m")
            .arg(&model_path)
            .arg("-f")
            .arg(&audio_path)
            // JSON output, one segment per word, no console chatter.
            .arg("-oj")
            .arg("-ml")
            .arg("1")
            .arg("-np");
        if let Some(lang) = language {
            cmd.arg("-l").arg(lang);
        }

        let output = tokio::time::timeout(
            Duration::from_secs(self.config.timeout_secs),
            cmd.output(),
        )
        .await
        .map_err(|_| ChronicleError::Timeout {
            service: "whisper-cpp",
            elapsed_ms: started.elapsed().as_millis() as u64,
        })?
        .map_err(|e| ChronicleError::ServiceUnavailable {
            service: "whisper-cpp",
            reason: format!("cannot run {}: {e}", self.config.binary),
        })?;

        if !output.status.success() {
            return Err(ChronicleError::ServiceUnavailable {
                service: "whisper-cpp",
                reason: String::from_utf8_lossy(&output.stderr).into_owned(),
            });
        }

        let json_path = format!("{}.json", audio_path.display());
        let content = std::fs::read_to_string(&json_path).map_err(|e| {
            ChronicleError::MalformedTranscript(format!(
                "whisper.cpp output not found at {json_path}: {e}"
            ))
        })?;
        let _ = std::fs::remove_file(&json_path);

        let raw = parse_cpp_output(&content)?;
        let elapsed_ms = started.elapsed().as_millis() as u64;
        info!(elapsed_ms, "CPU transcription complete");

        Ok(TranscriptionOutcome {
            raw,
            device: "cpu".to_string(),
            elapsed_ms,
        })
    }
}

// ---------------------------------------------------------------------------
// Raw wire shapes
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct GpuResponse {
    #[serde(default)]
    transcription: String,
    #[serde(default)]
    words: Vec<RemoteWord>,
    language: Option<String>,
    duration: Option<f64>,
    #[serde(default = "unknown_device")]
    device: String,
}

fn unknown_device() -> String {
    "unknown".to_string()
}

#[derive(Debug, Deserialize)]
struct CppOutput {
    #[serde(default)]
    transcription: Vec<CppSegment>,
    result: Option<CppResult>,
}

#[derive(Debug, Deserialize)]
struct CppSegment {
    #[serde(default)]
    text: String,
    offsets: Option<LocalOffsets>,
}

#[derive(Debug, Deserialize)]
struct CppResult {
    language: Option<String>,
}

fn parse_cpp_output(content: &str) -> Result<RawTranscription, ChronicleError> {
    let parsed: CppOutput = serde_json::from_str(content)
        .map_err(|e| ChronicleError::MalformedTranscript(format!("whisper.cpp JSON: {e}")))?;

    let segments = parsed
        .transcription
        .into_iter()
        .map(|s| LocalSegment {
            text: s.text,
            offsets: s.offsets.unwrap_or(LocalOffsets {
                from: None,
                to: None,
            }),
        })
        .collect();

    Ok(RawTranscription::Local {
        segments,
        language: parsed.result.and_then(|r| r.language),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transcript::Transcript;

    #[test]
    fn test_parse_cpp_output() {
        let json = r#"{
            "transcription": [
                {"text": " Hello", "offsets": {"from": 0, "to": 480}},
                {"text": " there.", "offsets": {"from": 480, "to": 910}}
            ],
            "result": {"language": "en"}
        }"#;

        let raw = parse_cpp_output(json).unwrap();
        let t = Transcript::from_engine(raw).unwrap();
        assert_eq!(t.text, "Hello there.");
        assert_eq!(t.language, "en");
        assert_eq!(t.words[1].start, 0.48);
    }

    #[test]
    fn test_parse_cpp_output_rejects_garbage() {
        assert!(matches!(
            parse_cpp_output("not json"),
            Err(ChronicleError::MalformedTranscript(_))
        ));
    }

    #[test]
    fn test_segment_without_offsets_fails_normalization() {
        let json = r#"{"transcription": [{"text": "word"}], "result": {"language": "en"}}"#;
        let raw = parse_cpp_output(json).unwrap();
        assert!(matches!(
            Transcript::from_engine(raw),
            Err(ChronicleError::MalformedTranscript(_))
        ));
    }
}
