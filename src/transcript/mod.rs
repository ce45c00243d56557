//! The word-level timestamp model tying transcribed audio to playback and
//! search highlighting.
//!
//! Two engines can produce raw output (a local whisper.cpp process and a
//! remote GPU service) and they shape timing differently: whisper.cpp emits
//! one segment per word with millisecond offsets, the GPU service a flat
//! word list in seconds. Both are normalized here, at this boundary, into
//! one canonical [`Transcript`]; nothing above this module sees engine
//! field names.

use serde::{Deserialize, Serialize};

use crate::error::ChronicleError;

// ---------------------------------------------------------------------------
// Canonical model
// ---------------------------------------------------------------------------

/// One transcribed word with its time span in seconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Word {
    pub text: String,
    /// Seconds from the start of the recording, sub-second precision.
    pub start: f64,
    pub end: f64,
}

/// A normalized transcription of one recording.
///
/// Invariant: `words` is non-decreasing in `start`, and every offset falls
/// within `[0, duration]`. Created atomically when transcription completes
/// and replaced wholesale on re-transcription, never patched word-by-word.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transcript {
    pub text: String,
    pub words: Vec<Word>,
    pub language: String,
    /// Recording length in seconds.
    pub duration: f64,
}

/// A (word, timestamp) pair a UI can seek playback to from a search match.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JumpTarget {
    pub word_index: usize,
    pub text: String,
    pub start: f64,
}

// ---------------------------------------------------------------------------
// Raw engine output
// ---------------------------------------------------------------------------

/// Untyped-engine output, tagged by which path produced it.
#[derive(Debug, Clone)]
pub enum RawTranscription {
    /// whisper.cpp JSON: one segment per word, offsets in milliseconds.
    Local {
        segments: Vec<LocalSegment>,
        language: Option<String>,
    },
    /// GPU service JSON: full text plus a word list in seconds.
    Remote {
        text: String,
        words: Vec<RemoteWord>,
        language: Option<String>,
        duration: Option<f64>,
    },
}

#[derive(Debug, Clone, Deserialize)]
pub struct LocalSegment {
    pub text: String,
    pub offsets: LocalOffsets,
}

/// Millisecond offsets as whisper.cpp writes them.
#[derive(Debug, Clone, Deserialize)]
pub struct LocalOffsets {
    pub from: Option<u64>,
    pub to: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RemoteWord {
    pub word: String,
    pub start: Option<f64>,
    pub end: Option<f64>,
}

// ---------------------------------------------------------------------------
// Normalization
// ---------------------------------------------------------------------------

impl Transcript {
    /// Normalize raw engine output into the canonical transcript shape.
    ///
    /// Fails fast with [`ChronicleError::MalformedTranscript`] when required
    /// fields are missing or word ordering is corrupted, rather than ever
    /// producing a transcript that violates the ordering invariant.
    pub fn from_engine(raw: RawTranscription) -> Result<Self, ChronicleError> {
        let (text, words, language, duration) = match raw {
            RawTranscription::Local { segments, language } => {
                let mut text = String::new();
                let mut words = Vec::with_capacity(segments.len());
                for segment in segments {
                    let trimmed = segment.text.trim();
                    if trimmed.is_empty() {
                        continue;
                    }
                    let from = segment.offsets.from.ok_or_else(|| {
                        ChronicleError::MalformedTranscript(
                            "segment missing start offset".to_string(),
                        )
                    })?;
                    let to = segment.offsets.to.ok_or_else(|| {
                        ChronicleError::MalformedTranscript(
                            "segment missing end offset".to_string(),
                        )
                    })?;
                    text.push_str(&segment.text);
                    words.push(Word {
                        text: trimmed.to_string(),
                        start: from as f64 / 1000.0,
                        end: to as f64 / 1000.0,
                    });
                }
                // whisper.cpp does not report duration; derive it from the
                // last word's end offset.
                let duration = words.last().map(|w| w.end).unwrap_or(0.0);
                (
                    text.trim().to_string(),
                    words,
                    language.unwrap_or_else(|| "en".to_string()),
                    duration,
                )
            }
            RawTranscription::Remote {
                text,
                words,
                language,
                duration,
            } => {
                let mut normalized = Vec::with_capacity(words.len());
                for w in words {
                    let start = w.start.ok_or_else(|| {
                        ChronicleError::MalformedTranscript("word missing start".to_string())
                    })?;
                    let end = w.end.ok_or_else(|| {
                        ChronicleError::MalformedTranscript("word missing end".to_string())
                    })?;
                    let trimmed = w.word.trim();
                    if trimmed.is_empty() {
                        continue;
                    }
                    normalized.push(Word {
                        text: trimmed.to_string(),
                        start,
                        end,
                    });
                }
                let duration = duration
                    .filter(|d| *d > 0.0)
                    .or_else(|| normalized.last().map(|w| w.end))
                    .unwrap_or(0.0);
                (
                    text.trim().to_string(),
                    normalized,
                    language.unwrap_or_else(|| "unknown".to_string()),
                    duration,
                )
            }
        };

        let transcript = Transcript {
            text,
            words,
            language,
            duration,
        };
        transcript.validate()?;
        Ok(transcript)
    }

    fn validate(&self) -> Result<(), ChronicleError> {
        let mut prev_start = 0.0_f64;
        for (i, word) in self.words.iter().enumerate() {
            if word.start < 0.0 || word.end < word.start {
                return Err(ChronicleError::MalformedTranscript(format!(
                    "word {i} has invalid span [{}, {}]",
                    word.start, word.end
                )));
            }
            if word.start < prev_start {
                return Err(ChronicleError::MalformedTranscript(format!(
                    "word {i} starts at {} before previous word at {prev_start}",
                    word.start
                )));
            }
            if word.end > self.duration + f64::EPSILON {
                return Err(ChronicleError::MalformedTranscript(format!(
                    "word {i} ends at {} past duration {}",
                    word.end, self.duration
                )));
            }
            prev_start = word.start;
        }
        Ok(())
    }

    /// Index of the word active at playback position `t`: the last word
    /// whose start offset is `<= t`, or `None` before the first word.
    ///
    /// Binary search; this runs on every playback timer tick.
    pub fn active_word_at(&self, t: f64) -> Option<usize> {
        let after = self.words.partition_point(|w| w.start <= t);
        after.checked_sub(1)
    }

    /// Resolve matched search terms to every word they hit, producing seek
    /// targets for playback. Matching is case-insensitive and tolerates the
    /// stemmed forms the index reports (a matched term counts when the
    /// word starts with it).
    pub fn jump_targets(&self, terms: &[String]) -> Vec<JumpTarget> {
        let terms: Vec<String> = terms.iter().map(|t| t.to_lowercase()).collect();
        self.words
            .iter()
            .enumerate()
            .filter(|(_, word)| {
                let normalized = normalize_word(&word.text);
                terms
                    .iter()
                    .any(|t| normalized == *t || normalized.starts_with(t.as_str()))
            })
            .map(|(i, word)| JumpTarget {
                word_index: i,
                text: word.text.clone(),
                start: word.start,
            })
            .collect()
    }
}

/// Lowercase a word and trim surrounding punctuation for term matching.
fn normalize_word(text: &str) -> String {
    text.trim_matches(|c: char| !c.is_alphanumeric())
        .to_lowercase()
}
