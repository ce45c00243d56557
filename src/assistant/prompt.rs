//! Prompt construction for the two agent stages.
//!
//! Prompts stay deliberately compact: snippets instead of full source text,
//! abbreviated history, truncated descriptions. Prompt size is the dominant
//! latency factor for local inference.

use serde::{Deserialize, Serialize};

use crate::store::Event;

/// One prior question/answer cycle, carried by the caller for display and
/// prompt context only. Never persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryTurn {
    pub question: String,
    pub answer: String,
}

/// Stage 1 instruction: reduce a question to index query terms.
pub fn extraction_prompt(question: &str, history: &[HistoryTurn], history_turns: usize) -> String {
    let mut parts = vec![
        "Extract search keywords from the user's question. \
         Reply with only the keywords, joined with AND/OR where appropriate. \
         No explanations."
            .to_string(),
    ];

    if !history.is_empty() {
        parts.push("\nRecent conversation:".to_string());
        for turn in last_turns(history, history_turns) {
            parts.push(format!("User: {}", turn.question));
        }
    }

    parts.push(format!("\nQuestion: {question}\nKeywords:"));
    parts.join("\n")
}

/// Stage 3 instruction: answer strictly from the provided events.
pub fn synthesis_prompt(
    question: &str,
    context: &str,
    history: &[HistoryTurn],
    history_turns: usize,
) -> String {
    let system = "You help users query their personal timeline of events.\n\n\
        CRITICAL RULES:\n\
        - ONLY use information from the events provided below\n\
        - NEVER make up or invent event names, dates, or details\n\
        - If the events don't contain the answer, say \"I don't see any events about that in this timeline\"\n\
        - Always cite the actual event title when referencing information\n\
        - Be concise and factual";

    let mut parts = vec![system.to_string(), String::new()];

    if !history.is_empty() {
        parts.push("Previous conversation:".to_string());
        for turn in last_turns(history, history_turns) {
            parts.push(format!("User: {}", turn.question));
            parts.push(format!("Assistant: {}", turn.answer));
        }
        parts.push(String::new());
    }

    parts.push("EVENTS IN THIS TIMELINE:".to_string());
    parts.push(context.to_string());
    parts.push(format!("\nUser's question: {question}"));
    parts.push("\nAnswer (only use information from the events above):".to_string());

    parts.join("\n")
}

/// Bounded context block built from retrieved events, oldest-truncated.
///
/// With zero events the block tells the model to say nothing matched, so an
/// empty retrieval still produces a grounded non-answer instead of a
/// fabrication.
pub fn build_context(events: &[Event], max_events: usize, max_chars: usize) -> String {
    if events.is_empty() {
        return "No relevant events found in the timeline. Tell the user that no \
                matching events were found."
            .to_string();
    }

    let mut parts = vec!["Relevant events:".to_string()];
    for (i, event) in events.iter().take(max_events).enumerate() {
        let mut line = format!(
            "{}. {} ({})",
            i + 1,
            event.title,
            event.timestamp.format("%Y-%m-%d")
        );
        let description = event
            .transcript
            .as_ref()
            .map(|t| t.text.as_str())
            .filter(|t| !t.is_empty())
            .unwrap_or(&event.description);
        if !description.is_empty() {
            line.push_str(" - ");
            line.push_str(&truncate(description, max_chars));
        }
        parts.push(line);
    }
    parts.join("\n")
}

fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let cut: String = text.chars().take(max_chars).collect();
    format!("{cut}...")
}

fn last_turns(history: &[HistoryTurn], count: usize) -> &[HistoryTurn] {
    let skip = history.len().saturating_sub(count);
    &history[skip..]
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn event(title: &str, description: &str) -> Event {
        Event {
            id: "e1".to_string(),
            title: title.to_string(),
            description: description.to_string(),
            timestamp: Utc.with_ymd_and_hms(2025, 10, 3, 12, 0, 0).unwrap(),
            timeline: "work".to_string(),
            tags: None,
            actor: None,
            audio_file: None,
            transcript: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_context_numbers_and_truncates() {
        let long = "x".repeat(500);
        let context = build_context(&[event("Bank call", &long)], 5, 150);
        assert!(context.contains("1. Bank call (2025-10-03)"));
        assert!(context.contains("..."));
        // 150 chars + title line, never the full 500.
        assert!(context.len() < 250);
    }

    #[test]
    fn test_empty_context_instructs_no_fabrication() {
        let context = build_context(&[], 5, 150);
        assert!(context.contains("no matching events"));
    }

    #[test]
    fn test_context_caps_event_count() {
        let events: Vec<Event> = (0..10).map(|i| event(&format!("ev{i}"), "d")).collect();
        let context = build_context(&events, 5, 150);
        assert!(context.contains("5. ev4"));
        assert!(!context.contains("ev5"));
    }

    #[test]
    fn test_history_abbreviated_to_last_turns() {
        let history: Vec<HistoryTurn> = (0..6)
            .map(|i| HistoryTurn {
                question: format!("q{i}"),
                answer: format!("a{i}"),
            })
            .collect();
        let prompt = synthesis_prompt("next?", "ctx", &history, 3);
        assert!(!prompt.contains("q2"));
        assert!(prompt.contains("q3"));
        assert!(prompt.contains("a5"));
    }

    #[test]
    fn test_extraction_prompt_mentions_operators() {
        let prompt = extraction_prompt("what happened with the bank?", &[], 3);
        assert!(prompt.contains("AND/OR"));
        assert!(prompt.contains("what happened with the bank?"));
    }
}
