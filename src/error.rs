use thiserror::Error;

/// The error taxonomy for the whole system. Recoverable conditions carry
/// enough context for the HTTP layer to map them onto meaningful statuses
/// instead of bare 500s.
#[derive(Debug, Error)]
pub enum ChronicleError {
    /// Reserved for surfaces that reject a query outright. The index never
    /// produces it: a query the FTS5 grammar rejects after sanitization and
    /// the OR-of-words fallback degrades to empty results instead.
    #[error("unparseable search query: {0}")]
    QuerySyntax(String),

    #[error("{service} unavailable: {reason}")]
    ServiceUnavailable {
        service: &'static str,
        reason: String,
    },

    #[error("{service} timed out after {elapsed_ms}ms")]
    Timeout {
        service: &'static str,
        elapsed_ms: u64,
    },

    /// Engine output missing required fields or violating word ordering.
    #[error("malformed transcript: {0}")]
    MalformedTranscript(String),

    #[error("event not found: {0}")]
    EventNotFound(String),

    #[error("document not found: {0}")]
    DocumentNotFound(String),

    #[error("storage error: {0}")]
    Storage(#[from] rusqlite::Error),
}

pub type Result<T, E = ChronicleError> = std::result::Result<T, E>;
