//! The two-stage conversational retrieval agent.
//!
//! One question runs three strictly sequential stages: reduce the question
//! to index query terms via the LLM, execute the query against the search
//! index, then synthesize an answer grounded only in the retrieved events.
//! Each stage's wall-clock duration is surfaced alongside the answer so a
//! slow cold-start call is distinguishable from a hung connection.

mod prompt;

pub use prompt::HistoryTurn;

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::AssistantConfig;
use crate::error::ChronicleError;
use crate::providers::{GenerateRequest, GenerateService};
use crate::store::{Event, EventStore};

// ---------------------------------------------------------------------------
// Pipeline types
// ---------------------------------------------------------------------------

/// Progression of one agent turn. Any stage can transition to `Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentStage {
    Idle,
    ExtractingKeywords,
    Searching,
    Synthesizing,
    Done,
    Failed,
}

impl fmt::Display for AgentStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AgentStage::Idle => "idle",
            AgentStage::ExtractingKeywords => "extracting_keywords",
            AgentStage::Searching => "searching",
            AgentStage::Synthesizing => "synthesizing",
            AgentStage::Done => "done",
            AgentStage::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Per-stage wall-clock durations for one turn.
#[derive(Debug, Clone, Copy, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StageTimings {
    pub extract_ms: u64,
    pub search_ms: u64,
    pub synthesize_ms: u64,
    pub total_ms: u64,
}

/// An event the answer cited by title.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceRef {
    pub source_id: String,
    pub title: String,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub has_audio: bool,
}

/// The outcome of one agent turn.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AskResult {
    pub answer: String,
    pub sources: Vec<SourceRef>,
    pub timing: StageTimings,
    pub model: String,
    pub search_results: usize,
}

/// Availability of the LLM service, for the UI to gate input on.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentStatus {
    pub available: bool,
    pub model: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

// ---------------------------------------------------------------------------
// RetrievalAgent
// ---------------------------------------------------------------------------

pub struct RetrievalAgent {
    llm: Arc<dyn GenerateService>,
    store: EventStore,
    config: AssistantConfig,
    /// Set after the first successful generate call. Until then, calls may
    /// trigger the external service loading its model and get the generous
    /// timeout; afterwards the tighter one applies.
    warmed: AtomicBool,
}

impl RetrievalAgent {
    pub fn new(llm: Arc<dyn GenerateService>, store: EventStore, config: AssistantConfig) -> Self {
        Self {
            llm,
            store,
            config,
            warmed: AtomicBool::new(false),
        }
    }

    /// Answer a natural-language question about the timeline.
    ///
    /// Short-circuits before stage 1 when the LLM service health check
    /// fails, so a known-down service never costs a full generate timeout.
    pub async fn ask(
        &self,
        question: &str,
        timeline: Option<&str>,
        history: &[HistoryTurn],
    ) -> Result<AskResult, ChronicleError> {
        let total_start = Instant::now();
        let mut timing = StageTimings::default();

        if !self.llm.health().await {
            debug!(stage = %AgentStage::Failed, "LLM service unavailable, short-circuiting");
            return Err(ChronicleError::ServiceUnavailable {
                service: "ollama",
                reason: "health check failed".to_string(),
            });
        }

        // With several timelines and no filter, ask the user to pick one
        // instead of answering from a mixed bag.
        if timeline.is_none() {
            let timelines = self.store.list_timelines()?;
            if timelines.len() > 1 {
                timing.total_ms = total_start.elapsed().as_millis() as u64;
                return Ok(AskResult {
                    answer: format!(
                        "I need to know which timeline to search. You have these \
                         timelines: {}. Please select a timeline first, then ask \
                         your question.",
                        timelines.join(", ")
                    ),
                    sources: Vec::new(),
                    timing,
                    model: self.llm.model().to_string(),
                    search_results: 0,
                });
            }
        }

        // Stage 1 — keyword extraction. Output goes unmodified into the
        // index's sanitizer; failure or emptiness falls back to the
        // verbatim question.
        debug!(stage = %AgentStage::ExtractingKeywords, question, "agent turn started");
        let stage_start = Instant::now();
        let query = match self
            .generate(
                prompt::extraction_prompt(question, history, self.config.history_turns),
                self.config.extract_max_tokens,
                self.config.extract_temperature,
            )
            .await
        {
            Ok(keywords) if !keywords.trim().is_empty() => keywords,
            Ok(_) => {
                debug!("extraction returned nothing, using question verbatim");
                question.to_string()
            }
            Err(e) => {
                warn!(error = %e, "keyword extraction failed, using question verbatim");
                question.to_string()
            }
        };
        timing.extract_ms = stage_start.elapsed().as_millis() as u64;

        // Stage 2 — search. Zero results is not an error; stage 3 still
        // runs with an empty snippet set.
        debug!(stage = %AgentStage::Searching, query, "executing search");
        let stage_start = Instant::now();
        let events = self.retrieve(&query, timeline);
        timing.search_ms = stage_start.elapsed().as_millis() as u64;

        // Stage 3 — grounded synthesis.
        debug!(stage = %AgentStage::Synthesizing, events = events.len(), "building answer");
        let stage_start = Instant::now();
        let context = prompt::build_context(
            &events,
            self.config.max_context_events,
            self.config.max_context_chars,
        );
        let answer = self
            .generate(
                prompt::synthesis_prompt(question, &context, history, self.config.history_turns),
                self.config.answer_max_tokens,
                self.config.answer_temperature,
            )
            .await?;
        timing.synthesize_ms = stage_start.elapsed().as_millis() as u64;
        timing.total_ms = total_start.elapsed().as_millis() as u64;

        let sources = cited_sources(&answer, &events);
        info!(
            stage = %AgentStage::Done,
            extract_ms = timing.extract_ms,
            search_ms = timing.search_ms,
            synthesize_ms = timing.synthesize_ms,
            sources = sources.len(),
            "agent turn complete"
        );

        Ok(AskResult {
            answer,
            sources,
            timing,
            model: self.llm.model().to_string(),
            search_results: events.len(),
        })
    }

    /// Availability probe for the UI.
    pub async fn status(&self) -> AgentStatus {
        let available = self.llm.health().await;
        AgentStatus {
            available,
            model: self.llm.model().to_string(),
            reason: (!available).then(|| "LLM service is not reachable".to_string()),
        }
    }

    /// Proactively trigger model loading outside the critical path of a
    /// user's first real question.
    pub async fn warmup(&self) -> Result<(), ChronicleError> {
        self.generate("Reply with OK.".to_string(), 2, 0.0).await?;
        info!("assistant warmed up");
        Ok(())
    }

    async fn generate(
        &self,
        prompt: String,
        max_tokens: u64,
        temperature: f64,
    ) -> Result<String, ChronicleError> {
        let timeout = if self.warmed.load(Ordering::Relaxed) {
            Duration::from_secs(self.config.request_timeout_secs)
        } else {
            Duration::from_secs(self.config.load_timeout_secs)
        };

        let text = self
            .llm
            .generate(GenerateRequest {
                prompt,
                max_tokens,
                temperature,
                context_window: self.config.context_window,
                timeout,
            })
            .await?;

        self.warmed.store(true, Ordering::Relaxed);
        Ok(text)
    }

    /// Run the extracted query against the index, resolve hits to their
    /// owning events, apply the timeline filter, and truncate.
    fn retrieve(&self, query: &str, timeline: Option<&str>) -> Vec<Event> {
        let limit = self.config.search_limit;
        // Over-fetch when filtering so the timeline cut happens before the
        // truncation to `limit`, not after.
        let fetch = if timeline.is_some() { limit * 5 } else { limit };

        let hits = self.store.index().search(query, fetch);
        let mut events: Vec<Event> = Vec::new();
        for hit in hits {
            if events.iter().any(|e| e.id == hit.event_id) {
                continue;
            }
            let Ok(Some(event)) = self.store.get_event(&hit.event_id) else {
                continue;
            };
            if let Some(t) = timeline {
                if event.timeline != t {
                    continue;
                }
            }
            events.push(event);
            if events.len() == limit as usize {
                break;
            }
        }
        events
    }
}

/// Events whose titles appear in the answer, as citation sources.
fn cited_sources(answer: &str, events: &[Event]) -> Vec<SourceRef> {
    let answer_lower = answer.to_lowercase();
    events
        .iter()
        .filter(|e| !e.title.is_empty() && answer_lower.contains(&e.title.to_lowercase()))
        .map(|e| SourceRef {
            source_id: e.id.clone(),
            title: e.title.clone(),
            timestamp: e.timestamp,
            has_audio: e.audio_file.is_some(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn event(id: &str, title: &str) -> Event {
        Event {
            id: id.to_string(),
            title: title.to_string(),
            description: String::new(),
            timestamp: Utc::now(),
            timeline: String::new(),
            tags: None,
            actor: None,
            audio_file: None,
            transcript: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_cited_sources_match_titles_case_insensitive() {
        let events = vec![event("e1", "Bank Call"), event("e2", "Lunch")];
        let sources = cited_sources("The bank call covered the loan terms.", &events);
        assert_eq!(sources.len(), 1);
        assert_eq!(sources[0].source_id, "e1");
    }

    #[test]
    fn test_cited_sources_empty_when_nothing_referenced() {
        let events = vec![event("e1", "Bank Call")];
        assert!(cited_sources("No events matched.", &events).is_empty());
    }

    #[test]
    fn test_stage_display() {
        assert_eq!(AgentStage::ExtractingKeywords.to_string(), "extracting_keywords");
        assert_eq!(AgentStage::Failed.to_string(), "failed");
    }
}
