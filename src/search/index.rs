use std::sync::Arc;

use parking_lot::Mutex;
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::SearchConfig;

use super::sanitize::{fallback_or_query, sanitize};

// ---------------------------------------------------------------------------
// Source kinds
// ---------------------------------------------------------------------------

/// What an index entry was projected from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    Event,
    Transcript,
    Document,
}

impl SourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceKind::Event => "event",
            SourceKind::Transcript => "transcript",
            SourceKind::Document => "document",
        }
    }

    fn from_db(s: &str) -> Self {
        match s {
            "transcript" => SourceKind::Transcript,
            "document" => SourceKind::Document,
            _ => SourceKind::Event,
        }
    }
}

// ---------------------------------------------------------------------------
// Entry fields and hits
// ---------------------------------------------------------------------------

/// Searchable projection of one source, as handed to [`SearchIndex::index`].
#[derive(Debug, Clone, Default)]
pub struct IndexFields {
    pub title: String,
    pub body: String,
    pub timeline: String,
}

/// A single ranked search hit.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchHit {
    pub source_id: String,
    pub kind: SourceKind,
    /// Owning event, used for enrichment and the timestamp tie-break.
    pub event_id: String,
    /// FTS5 rank; more negative is more relevant.
    pub rank: f64,
    pub title_snippet: String,
    pub body_snippet: String,
    /// Lowercased terms found inside highlight markup, used to resolve
    /// transcript word jump targets and document page locators.
    pub matched_terms: Vec<String>,
}

/// Highlight markup wrapped around matched spans in snippets.
pub const MARK_OPEN: &str = "<mark>";
pub const MARK_CLOSE: &str = "</mark>";

// ---------------------------------------------------------------------------
// SearchIndex
// ---------------------------------------------------------------------------

/// The inverted full-text index over events, transcripts, and documents.
///
/// Entries are derived and rebuildable; writers hold the connection only
/// for a single upsert or remove. Cheaply cloneable.
#[derive(Clone)]
pub struct SearchIndex {
    db: Arc<Mutex<Connection>>,
    config: SearchConfig,
}

/// Upsert one entry on an already-held connection. Delete-then-insert so
/// re-indexing the same source never duplicates matches. The store calls
/// this inside its own write transactions; [`SearchIndex::index`] wraps it
/// with the lock for standalone callers.
pub(crate) fn upsert_entry(
    conn: &Connection,
    source_id: &str,
    kind: SourceKind,
    event_id: &str,
    fields: &IndexFields,
) -> rusqlite::Result<()> {
    conn.execute(
        "DELETE FROM entries_fts WHERE source_id = ?1 AND kind = ?2",
        rusqlite::params![source_id, kind.as_str()],
    )?;
    conn.execute(
        "INSERT INTO entries_fts (source_id, kind, event_id, title, body, timeline)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        rusqlite::params![
            source_id,
            kind.as_str(),
            event_id,
            fields.title,
            fields.body,
            fields.timeline
        ],
    )?;
    debug!(source_id, kind = kind.as_str(), "indexed source");
    Ok(())
}

pub(crate) fn delete_entry(
    conn: &Connection,
    source_id: &str,
    kind: SourceKind,
) -> rusqlite::Result<()> {
    conn.execute(
        "DELETE FROM entries_fts WHERE source_id = ?1 AND kind = ?2",
        rusqlite::params![source_id, kind.as_str()],
    )?;
    Ok(())
}

/// Remove every entry whose owning event is `event_id`.
pub(crate) fn delete_event_entries(conn: &Connection, event_id: &str) -> rusqlite::Result<()> {
    conn.execute(
        "DELETE FROM entries_fts WHERE event_id = ?1",
        rusqlite::params![event_id],
    )?;
    Ok(())
}

impl SearchIndex {
    pub fn new(db: Arc<Mutex<Connection>>, config: SearchConfig) -> Self {
        Self { db, config }
    }

    /// Upsert the searchable content for one source.
    pub fn index(
        &self,
        source_id: &str,
        kind: SourceKind,
        event_id: &str,
        fields: &IndexFields,
    ) -> rusqlite::Result<()> {
        let conn = self.db.lock();
        upsert_entry(&conn, source_id, kind, event_id, fields)
    }

    /// Remove the entry for one source.
    pub fn remove(&self, source_id: &str, kind: SourceKind) -> rusqlite::Result<()> {
        let conn = self.db.lock();
        delete_entry(&conn, source_id, kind)
    }

    /// Remove every entry whose owning event is `event_id`.
    pub fn remove_event(&self, event_id: &str) -> rusqlite::Result<()> {
        let conn = self.db.lock();
        delete_event_entries(&conn, event_id)
    }

    /// Drop all entries. Used by a full rebuild.
    pub fn clear(&self) -> rusqlite::Result<()> {
        let conn = self.db.lock();
        conn.execute("DELETE FROM entries_fts", [])?;
        Ok(())
    }

    /// Execute a sanitized search and return ranked, highlighted hits.
    ///
    /// A query that the FTS5 grammar still rejects after sanitization is
    /// retried once as a pure OR-of-words; if that also fails the result is
    /// an empty list, never an error to the caller.
    pub fn search(&self, raw_query: &str, limit: u32) -> Vec<SearchHit> {
        let query = sanitize(raw_query);
        if query.is_empty() {
            return Vec::new();
        }

        match self.execute_match(&query, limit) {
            Ok(hits) => hits,
            Err(e) => {
                warn!(query, error = %e, "FTS query failed, retrying as OR-of-words");
                let fallback = fallback_or_query(raw_query);
                if fallback.is_empty() {
                    return Vec::new();
                }
                match self.execute_match(&fallback, limit) {
                    Ok(hits) => hits,
                    Err(e) => {
                        warn!(fallback, error = %e, "fallback query failed");
                        Vec::new()
                    }
                }
            }
        }
    }

    fn execute_match(&self, query: &str, limit: u32) -> rusqlite::Result<Vec<SearchHit>> {
        let conn = self.db.lock();
        // Relevance order from FTS5 rank; ties broken by the owning
        // event's timestamp, newest first.
        let mut stmt = conn.prepare(
            "SELECT f.source_id, f.kind, f.event_id, f.rank,
                    snippet(entries_fts, 3, ?3, ?4, '...', ?5) AS title_snippet,
                    snippet(entries_fts, 4, ?3, ?4, '...', ?6) AS body_snippet
             FROM entries_fts f
             LEFT JOIN events e ON e.id = f.event_id
             WHERE entries_fts MATCH ?1
             ORDER BY f.rank, e.timestamp DESC
             LIMIT ?2",
        )?;

        let rows = stmt.query_map(
            rusqlite::params![
                query,
                limit,
                MARK_OPEN,
                MARK_CLOSE,
                self.config.title_snippet_tokens,
                self.config.body_snippet_tokens
            ],
            |row| {
                let kind: String = row.get(1)?;
                let title_snippet: String = row.get(4)?;
                let body_snippet: String = row.get(5)?;
                Ok(SearchHit {
                    source_id: row.get(0)?,
                    kind: SourceKind::from_db(&kind),
                    event_id: row.get(2)?,
                    rank: row.get(3)?,
                    matched_terms: extract_marked_terms(&title_snippet, &body_snippet),
                    title_snippet,
                    body_snippet,
                })
            },
        )?;

        let hits: Vec<SearchHit> = rows.collect::<rusqlite::Result<_>>()?;
        debug!(query, hits = hits.len(), "search executed");
        Ok(hits)
    }
}

/// Pull the lowercased terms wrapped in highlight markup out of snippets.
fn extract_marked_terms(title_snippet: &str, body_snippet: &str) -> Vec<String> {
    let mut terms = Vec::new();
    for snippet in [title_snippet, body_snippet] {
        let mut rest = snippet;
        while let Some(open) = rest.find(MARK_OPEN) {
            rest = &rest[open + MARK_OPEN.len()..];
            let Some(close) = rest.find(MARK_CLOSE) else {
                break;
            };
            let term = rest[..close].to_lowercase();
            if !term.is_empty() && !terms.contains(&term) {
                terms.push(term);
            }
            rest = &rest[close + MARK_CLOSE.len()..];
        }
    }
    terms
}
